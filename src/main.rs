use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use meanflow::config::{
    JobLimits, NodeConfig, SchedulerConfig, DEFAULT_DATA_DIR, DEFAULT_MAX_FILES_PER_JOB,
    DEFAULT_MAX_VALUES_PER_FILE,
};
use meanflow::node::Node;
use meanflow::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "meanflow")]
#[command(version)]
#[command(about = "Throughput-aware scheduler for distributed elementwise averaging")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the scheduler, local workers and the HTTP API
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Cluster management commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the HTTP API
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Directory holding `<job_id>/<file>.csv` data files
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Number of in-process workers to start
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Hostname prefix for in-process workers
    #[arg(long, default_value = "worker")]
    worker_prefix: String,

    /// Maximum file indices per aggregate task
    #[arg(long, default_value = "5")]
    max_indices_per_task: usize,

    /// Largest numFiles accepted by create_job
    #[arg(long, default_value_t = DEFAULT_MAX_FILES_PER_JOB)]
    max_files_per_job: u64,

    /// Largest numValues accepted by create_job
    #[arg(long, default_value_t = DEFAULT_MAX_VALUES_PER_FILE)]
    max_values_per_file: u64,

    /// POST completion notifications to this URL instead of recording them
    /// in-process
    #[arg(long)]
    notify_url: Option<String>,
}

// =============================================================================
// Client Arguments (shared by job and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// API address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Generate input files and submit a new job
    Submit {
        /// Values per input file
        #[arg(long)]
        num_values: u64,
        /// Number of input files
        #[arg(long)]
        num_files: u64,
    },
    /// Get status of a specific job
    Status {
        /// The job ID
        job_id: String,
    },
    /// List all jobs
    List,
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Show workers and in-flight jobs
    Status,
    /// Grow the worker pool to the given size
    Scale {
        /// Target number of workers
        num_workers: u64,
    },
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = NodeConfig {
        scheduler: SchedulerConfig::default().with_max_indices_per_task(args.max_indices_per_task),
        worker_hostname_prefix: args.worker_prefix,
        ..NodeConfig::default()
    }
    .with_listen_addr(listen_addr)
    .with_data_dir(args.data_dir)
    .with_local_workers(args.workers)
    .with_job_limits(JobLimits {
        max_files_per_job: args.max_files_per_job,
        max_values_per_file: args.max_values_per_file,
    });
    if let Some(url) = args.notify_url {
        config = config.with_notify_url(url);
    }

    tracing::info!(
        listen_addr = %config.api.listen_addr,
        data_dir = %config.api.data_dir.display(),
        workers = config.local_workers,
        max_indices_per_task = config.scheduler.max_indices_per_task,
        "Starting meanflow node"
    );

    let cancel = install_shutdown_handler();
    Node::new(config)?.run(cancel).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn read_json(response: reqwest::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("request failed");
        return Err(format!("{} ({})", msg, status).into());
    }
    Ok(body)
}

fn print_job_row(job: &Value) {
    println!(
        "{:<38} {:<24} {:>8} {:>10}",
        job["jobId"].as_str().unwrap_or("-"),
        job["status"].as_str().unwrap_or("-"),
        job["numFiles"],
        job["numValues"],
    );
}

async fn handle_job(
    http: &reqwest::Client,
    client: &ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = client.addr.trim_end_matches('/');
    let body = match &command {
        JobCommands::Submit {
            num_values,
            num_files,
        } => {
            let request = json!({ "numValues": num_values, "numFiles": num_files });
            read_json(
                http.post(format!("{}/api/create_job", base))
                    .json(&request)
                    .send()
                    .await?,
            )
            .await?
        }
        JobCommands::Status { job_id } => {
            read_json(http.get(format!("{}/api/jobs/{}", base, job_id)).send().await?).await?
        }
        JobCommands::List => read_json(http.get(format!("{}/api/jobs", base)).send().await?).await?,
    };

    if matches!(client.output, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match command {
        JobCommands::Submit { .. } => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", body["jobId"].as_str().unwrap_or("-"));
        }
        JobCommands::Status { .. } => {
            println!("Job ID:     {}", body["jobId"].as_str().unwrap_or("-"));
            println!("Status:     {}", body["status"].as_str().unwrap_or("-"));
            println!("Files:      {}", body["numFiles"]);
            println!("Values:     {}", body["numValues"]);
            if let Some(result) = body["result"].as_str() {
                println!("Result:     {}", result);
            }
        }
        JobCommands::List => {
            let jobs = body.as_array().cloned().unwrap_or_default();
            if jobs.is_empty() {
                println!("No jobs found");
                return Ok(());
            }
            println!("{:<38} {:<24} {:>8} {:>10}", "JOB ID", "STATUS", "FILES", "VALUES");
            for job in &jobs {
                print_job_row(job);
            }
        }
    }
    Ok(())
}

async fn handle_cluster(
    http: &reqwest::Client,
    client: &ClientArgs,
    command: ClusterCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = client.addr.trim_end_matches('/');
    match command {
        ClusterCommands::Status => {
            let body = read_json(http.get(format!("{}/api/cluster", base)).send().await?).await?;
            if matches!(client.output, OutputFormat::Json) {
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }

            println!("{:<20} {:<6} {:>14} {:<38}", "WORKER", "STATUS", "THROUGHPUT", "JOB");
            for worker in body["workers"].as_array().into_iter().flatten() {
                println!(
                    "{:<20} {:<6} {:>14.2} {:<38}",
                    worker["hostname"].as_str().unwrap_or("-"),
                    worker["status"].as_str().unwrap_or("-"),
                    worker["throughput"].as_f64().unwrap_or(0.0),
                    worker["current_job_id"].as_str().unwrap_or("-"),
                );
            }
            println!();
            println!("{:<38} {:>12} {:>10}", "JOB", "UNPROCESSED", "IN FLIGHT");
            for job in body["jobs"].as_array().into_iter().flatten() {
                println!(
                    "{:<38} {:>12} {:>10}",
                    job["job_id"].as_str().unwrap_or("-"),
                    job["unprocessed_file_indices"]
                        .as_array()
                        .map_or(0, Vec::len),
                    job["wip_distribution"].as_object().map_or(0, |m| m.len()),
                );
            }
        }
        ClusterCommands::Scale { num_workers } => {
            let request = json!({ "numWorkers": num_workers });
            let body = read_json(
                http.post(format!("{}/api/set_num_workers", base))
                    .json(&request)
                    .send()
                    .await?,
            )
            .await?;
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
                OutputFormat::Table => println!("Worker pool scaled to {}", body["numWorkers"]),
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let http = reqwest::Client::new();
            handle_job(&http, &client, command).await?;
        }
        Commands::Cluster { client, command } => {
            let http = reqwest::Client::new();
            handle_cluster(&http, &client, command).await?;
        }
    }

    Ok(())
}
