use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use meanflow::api::{generate_input_files, router, ApiState, JobRecord, JobStatus, JobStore};
use meanflow::config::JobLimits;
use meanflow::gateway::{InMemoryBroker, MessageGateway};
use meanflow::protocol::{SchedulerEvent, SCHEDULER_QUEUE};
use meanflow::scheduler::{SchedulerSnapshot, WorkerRegistry};
use meanflow::worker::WorkerPool;

struct TestApi {
    app: Router,
    store: Arc<JobStore>,
    broker: Arc<InMemoryBroker>,
    pool: Arc<WorkerPool>,
    snapshots: watch::Sender<SchedulerSnapshot>,
    dir: TempDir,
}

/// Helper to create test state over a temp data dir and an in-memory broker
async fn create_test_api() -> TestApi {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    broker.declare_queue(SCHEDULER_QUEUE).await.unwrap();
    let store = Arc::new(JobStore::new());
    let (snapshots, snapshot_rx) = watch::channel(SchedulerSnapshot::default());
    let pool = Arc::new(WorkerPool::new(
        broker.clone(),
        dir.path(),
        "test-worker",
        CancellationToken::new(),
    ));

    let state = ApiState {
        store: store.clone(),
        gateway: broker.clone(),
        data_dir: dir.path().to_path_buf(),
        limits: JobLimits {
            max_files_per_job: 100,
            max_values_per_file: 50,
        },
        snapshots: snapshot_rx,
        pool: pool.clone(),
    };

    TestApi {
        app: router(state),
        store,
        broker,
        pool,
        snapshots,
        dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_create_job_generates_files_and_notifies_scheduler() {
    let api = create_test_api().await;

    let (status, body) = send(
        &api.app,
        post("/api/create_job", json!({ "numValues": 4, "numFiles": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let record = api.store.get(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::InputFilesCreated);
    assert_eq!(record.num_files, 3);

    let published = api.broker.drain(SCHEDULER_QUEUE).unwrap();
    assert_eq!(published.len(), 1);
    let SchedulerEvent::JobAdded {
        job_id: event_job_id,
        num_original_files,
        num_values,
        unprocessed_file_indices,
    } = SchedulerEvent::from_slice(&published[0]).unwrap()
    else {
        panic!("expected job_added");
    };
    assert_eq!(event_job_id, job_id);
    assert_eq!(num_original_files, 3);
    assert_eq!(num_values, 4);
    assert_eq!(unprocessed_file_indices.len(), 3);

    for index in &unprocessed_file_indices {
        let path = api.dir.path().join(&job_id).join(format!("{}.csv", index));
        let row = std::fs::read_to_string(path).unwrap();
        let values: Vec<u32> = row.split(',').map(|v| v.parse().unwrap()).collect();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| (1..=1000).contains(v)));
    }
}

#[tokio::test]
async fn test_create_job_rejects_non_positive_sizes() {
    let api = create_test_api().await;

    for body in [
        json!({ "numValues": 0, "numFiles": 3 }),
        json!({ "numValues": 4, "numFiles": -1 }),
    ] {
        let (status, response) = send(&api.app, post("/api/create_job", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].as_str().unwrap().contains("positive"));
    }
    assert_eq!(api.broker.queue_depth(SCHEDULER_QUEUE).unwrap(), 0);
    assert!(api.store.list().await.is_empty());
}

#[tokio::test]
async fn test_create_job_rejects_sizes_over_limits() {
    let api = create_test_api().await;

    for body in [
        json!({ "numValues": 4, "numFiles": i64::MAX }),
        json!({ "numValues": i64::MAX, "numFiles": 3 }),
        json!({ "numValues": 51, "numFiles": 3 }),
        json!({ "numValues": 4, "numFiles": 101 }),
    ] {
        let (status, response) = send(&api.app, post("/api/create_job", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].as_str().unwrap().contains("must not exceed"));
    }
    assert_eq!(api.broker.queue_depth(SCHEDULER_QUEUE).unwrap(), 0);
    assert!(api.store.list().await.is_empty());
    assert_eq!(std::fs::read_dir(api.dir.path()).unwrap().count(), 0);

    let (status, _) = send(
        &api.app,
        post("/api/create_job", json!({ "numValues": 50, "numFiles": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_notify_marks_job_completed_and_exposes_result() {
    let api = create_test_api().await;
    api.store
        .insert(JobRecord::new("job-1".into(), 3, 2))
        .await;
    let job_dir = api.dir.path().join("job-1");
    std::fs::create_dir_all(&job_dir).unwrap();
    std::fs::write(job_dir.join("output_file.csv"), "1.50,2.00,333.33\n").unwrap();

    let (status, job) = send(&api.app, get("/api/jobs/job-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending_files_creation");
    assert!(job["result"].is_null());

    let (status, _) = send(
        &api.app,
        post("/api/notify_job_completed", json!({ "jobId": "job-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, job) = send(&api.app, get("/api/jobs/job-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["jobId"], "job-1");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"], "1.50,2.00,333.33");
    assert!(job["completedAt"].is_string());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let api = create_test_api().await;

    let (status, _) = send(&api.app, get("/api/jobs/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &api.app,
        post("/api/notify_job_completed", json!({ "jobId": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_list_jobs_in_creation_order() {
    let api = create_test_api().await;
    for id in ["job-a", "job-b", "job-c"] {
        api.store.insert(JobRecord::new(id.into(), 1, 1)).await;
    }

    let (status, body) = send(&api.app, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["jobId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["job-a", "job-b", "job-c"]);
}

#[tokio::test]
async fn test_cluster_reports_latest_snapshot() {
    let api = create_test_api().await;

    let (_, body) = send(&api.app, get("/api/cluster")).await;
    assert_eq!(body, json!({ "workers": [], "jobs": [] }));

    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();
    registry.record_completion("worker-1", 10, 2.0).unwrap();
    api.snapshots.send_replace(SchedulerSnapshot {
        workers: registry.workers().to_vec(),
        jobs: vec![],
    });

    let (status, body) = send(&api.app, get("/api/cluster")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workers"][0]["hostname"], "worker-1");
    assert_eq!(body["workers"][0]["status"], "idle");
    assert_eq!(body["workers"][0]["throughput"], 5.0);
}

#[tokio::test]
async fn test_set_num_workers_grows_pool() {
    let api = create_test_api().await;

    let (status, body) = send(
        &api.app,
        post("/api/set_num_workers", json!({ "numWorkers": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["numWorkers"], 2);
    assert_eq!(
        api.pool.hostnames().await,
        vec!["test-worker-1".to_string(), "test-worker-2".to_string()]
    );

    let (status, _) = send(
        &api.app,
        post("/api/set_num_workers", json!({ "numWorkers": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &api.app,
        post("/api/set_num_workers", json!({ "numWorkers": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(api.pool.len().await, 2);

    api.pool.shutdown().await;
}

#[tokio::test]
async fn test_generate_input_files_layout() {
    let dir = TempDir::new().unwrap();

    let indices = generate_input_files(dir.path(), "job-1", 5, 2).await.unwrap();

    assert_eq!(indices.len(), 2);
    assert_ne!(indices[0], indices[1]);
    let entries = std::fs::read_dir(dir.path().join("job-1")).unwrap().count();
    assert_eq!(entries, 2);
}
