pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod node;
pub mod notifier;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
