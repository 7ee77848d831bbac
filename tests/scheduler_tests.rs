
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meanflow::error::MeanflowError;
use meanflow::protocol::FileIndex;
use meanflow::scheduler::{Job, JobPhase, JobTable, WorkerRegistry, WorkerStatus};
use test_harness::files;

fn job(job_id: &str, tokens: &[&str]) -> Job {
    Job::new(job_id.to_string(), tokens.len() as u64, 100, files(tokens)).unwrap()
}

fn assert_ascending(registry: &WorkerRegistry) {
    let throughputs: Vec<f64> = registry.workers().iter().map(|w| w.throughput).collect();
    assert!(
        throughputs.windows(2).all(|w| w[0] <= w[1]),
        "registry out of order: {:?}",
        throughputs
    );
}

// =============================================================================
// WorkerRegistry
// =============================================================================

#[test]
fn test_worker_added_idle_with_zero_throughput() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();

    let worker = registry.get("worker-1").unwrap();
    assert_eq!(worker.throughput, 0.0);
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert!(worker.current_job_id.is_none());
    assert!(worker.current_file_indices.is_empty());
    assert_eq!(registry.list_idle(), vec!["worker-1".to_string()]);
}

#[test]
fn test_duplicate_worker_rejected() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();

    let err = registry.add("worker-1").unwrap_err();
    assert!(matches!(err, MeanflowError::DuplicateWorker(h) if h == "worker-1"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unknown_worker_operations() {
    let mut registry = WorkerRegistry::new();

    assert!(matches!(
        registry.remove("ghost"),
        Err(MeanflowError::UnknownWorker(_))
    ));
    assert!(matches!(
        registry.record_completion("ghost", 10, 1.0),
        Err(MeanflowError::UnknownWorker(_))
    ));
    assert!(matches!(
        registry.assign("ghost", "job-1", files(&["f1"])),
        Err(MeanflowError::UnknownWorker(_))
    ));
}

#[test]
fn test_record_completion_updates_throughput_and_order() {
    let mut registry = WorkerRegistry::new();
    registry.add("slow").unwrap();
    registry.add("fast").unwrap();

    registry.assign("fast", "job-1", files(&["f1", "f2"])).unwrap();
    registry.record_completion("fast", 30, 2.0).unwrap();
    registry.record_completion("slow", 5, 1.0).unwrap();

    let fast = registry.get("fast").unwrap();
    assert_eq!(fast.throughput, 15.0);
    assert_eq!(fast.status, WorkerStatus::Idle);
    assert!(fast.current_job_id.is_none());
    assert!(fast.current_file_indices.is_empty());

    // Fastest idle worker is at the tail.
    assert_eq!(
        registry.list_idle(),
        vec!["slow".to_string(), "fast".to_string()]
    );
}

#[test]
fn test_invalid_measurement_leaves_worker_untouched() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();
    registry.assign("worker-1", "job-1", files(&["f1"])).unwrap();

    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let err = registry.record_completion("worker-1", 10, bad).unwrap_err();
        assert!(matches!(err, MeanflowError::InvalidMeasurement { .. }));
    }

    let worker = registry.get("worker-1").unwrap();
    assert_eq!(worker.status, WorkerStatus::Busy);
    assert_eq!(worker.throughput, 0.0);
}

#[test]
fn test_ties_ordered_by_last_update() {
    let mut registry = WorkerRegistry::new();
    registry.add("a").unwrap();
    registry.add("b").unwrap();
    registry.add("c").unwrap();

    registry.record_completion("b", 10, 1.0).unwrap();
    registry.record_completion("a", 10, 1.0).unwrap();

    let order: Vec<&str> = registry
        .workers()
        .iter()
        .map(|w| w.hostname.as_str())
        .collect();
    assert_eq!(order, vec!["c", "b", "a"]);
}

#[test]
fn test_busy_workers_excluded_from_idle() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();
    registry.add("worker-2").unwrap();
    registry.assign("worker-1", "job-1", files(&["f1"])).unwrap();

    assert_eq!(registry.list_idle(), vec!["worker-2".to_string()]);
}

#[test]
fn test_each_assignment_gets_fresh_task_id() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();

    let first = registry.assign("worker-1", "job-1", files(&["f1"])).unwrap();
    assert_eq!(
        registry.get("worker-1").unwrap().current_task_id.as_deref(),
        Some(first.as_str())
    );

    registry.record_completion("worker-1", 1, 1.0).unwrap();
    assert!(registry.get("worker-1").unwrap().current_task_id.is_none());

    let second = registry.assign("worker-1", "job-1", files(&["f2"])).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_assigning_busy_worker_is_invariant_violation() {
    let mut registry = WorkerRegistry::new();
    registry.add("worker-1").unwrap();
    registry.assign("worker-1", "job-1", files(&["f1"])).unwrap();

    let err = registry
        .assign("worker-1", "job-2", files(&["g1"]))
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_remove_returns_assignment() {
    let mut registry = WorkerRegistry::new();
    registry.add("idle").unwrap();
    registry.add("busy").unwrap();
    registry.assign("busy", "job-1", files(&["f4", "f5"])).unwrap();

    assert!(registry.remove("idle").unwrap().is_none());

    let assignment = registry.remove("busy").unwrap().unwrap();
    assert_eq!(assignment.job_id, "job-1");
    assert_eq!(assignment.file_indices, files(&["f4", "f5"]));
    assert!(registry.is_empty());
}

#[test]
fn test_ordering_holds_under_random_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut registry = WorkerRegistry::new();
    let mut next_id = 0;

    for _ in 0..500 {
        match rng.gen_range(0..3) {
            0 => {
                next_id += 1;
                registry.add(&format!("worker-{}", next_id)).unwrap();
            }
            1 if !registry.is_empty() => {
                let idx = rng.gen_range(0..registry.len());
                let hostname = registry.workers()[idx].hostname.clone();
                let ops = rng.gen_range(0..1000);
                let time = rng.gen_range(0.01..5.0);
                registry.record_completion(&hostname, ops, time).unwrap();
            }
            2 if !registry.is_empty() => {
                let idx = rng.gen_range(0..registry.len());
                let hostname = registry.workers()[idx].hostname.clone();
                registry.remove(&hostname).unwrap();
            }
            _ => {}
        }
        assert_ascending(&registry);

        let idle = registry.list_idle();
        let idle_throughputs: Vec<f64> = idle
            .iter()
            .map(|h| registry.get(h).unwrap().throughput)
            .collect();
        assert!(idle_throughputs.windows(2).all(|w| w[0] <= w[1]));
    }
}

// =============================================================================
// JobTable
// =============================================================================

#[test]
fn test_job_table_operations() {
    let mut table = JobTable::new();
    table.add(job("job-b", &["f1", "f2"])).unwrap();
    table.add(job("job-a", &["f3"])).unwrap();
    table.add(job("job-c", &["f4"])).unwrap();

    assert_eq!(table.len(), 3);
    assert_eq!(table.job_ids(), vec!["job-b", "job-a", "job-c"]);
    assert_eq!(table.get("job-a").unwrap().unprocessed_file_indices.len(), 1);

    table.remove("job-a").unwrap();
    let ids: Vec<&str> = table.iter_in_order().map(|j| j.job_id.as_str()).collect();
    assert_eq!(ids, vec!["job-b", "job-c"]);
    assert!(!table.contains("job-a"));
    assert!(table.remove("job-a").is_none());
}

#[test]
fn test_job_table_rejects_duplicates_and_unknown_ids() {
    let mut table = JobTable::new();
    table.add(job("job-1", &["f1"])).unwrap();

    assert!(matches!(
        table.add(job("job-1", &["f9"])),
        Err(MeanflowError::DuplicateJob(id)) if id == "job-1"
    ));
    assert!(matches!(
        table.get("job-2"),
        Err(MeanflowError::UnknownJob(_))
    ));
    assert!(matches!(
        table.get_mut("job-2"),
        Err(MeanflowError::UnknownJob(_))
    ));
    assert_eq!(
        table.get("job-1").unwrap().unprocessed_file_indices[0],
        FileIndex::file("f1")
    );
}

// =============================================================================
// Job
// =============================================================================

#[test]
fn test_invalid_jobs_rejected() {
    assert!(matches!(
        Job::new("job-1".into(), 1, 10, vec![]),
        Err(MeanflowError::InvalidJob { .. })
    ));
    assert!(matches!(
        Job::new("job-1".into(), 1, 10, vec![FileIndex::file("f1"), FileIndex::Final]),
        Err(MeanflowError::InvalidJob { .. })
    ));
    assert!(matches!(
        Job::new("job-1".into(), 0, 10, files(&["f1"])),
        Err(MeanflowError::InvalidJob { .. })
    ));
}

#[test]
fn test_job_phases() {
    let mut j = job("job-1", &["f1", "f2", "f3"]);
    assert_eq!(j.phase().unwrap(), JobPhase::Reducible);

    j.take_chunk("w1", 2).unwrap();
    assert_eq!(j.phase().unwrap(), JobPhase::AwaitingPeers);

    j.take_chunk("w2", 5).unwrap();
    assert_eq!(j.phase().unwrap(), JobPhase::InFlight);

    j.complete_chunk("w1", FileIndex::file("g1")).unwrap();
    j.complete_chunk("w2", FileIndex::file("g2")).unwrap();
    assert_eq!(j.phase().unwrap(), JobPhase::Reducible);

    j.take_chunk("w1", 5).unwrap();
    j.complete_chunk("w1", FileIndex::file("h1")).unwrap();
    assert_eq!(j.phase().unwrap(), JobPhase::AwaitingAverage);

    j.take_chunk("w1", 1).unwrap();
    j.complete_chunk("w1", FileIndex::Final).unwrap();
    assert_eq!(j.phase().unwrap(), JobPhase::Finished);
    assert_eq!(
        j.unprocessed_file_indices.iter().cloned().collect::<Vec<_>>(),
        vec![FileIndex::Final]
    );
}

#[test]
fn test_empty_job_without_work_in_flight_is_fatal() {
    let mut j = job("job-1", &["f1"]);
    j.unprocessed_file_indices.clear();

    let err = j.phase().unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_sentinel_never_shares_the_queue() {
    let mut j = job("job-1", &["f1", "f2", "f3"]);
    j.take_chunk("w1", 2).unwrap();

    // f3 is still unprocessed, so a final result cannot be accepted.
    let err = j.complete_chunk("w1", FileIndex::Final).unwrap_err();
    assert!(err.is_fatal());
    assert!(!j.unprocessed_file_indices.contains(&FileIndex::Final));

    let mut j = job("job-2", &["f1"]);
    j.unprocessed_file_indices.push_back(FileIndex::Final);
    assert!(j.phase().unwrap_err().is_fatal());
}

#[test]
fn test_outstanding_shrinks_on_merge_and_is_preserved_on_requeue() {
    let mut j = job("job-1", &["f1", "f2", "f3", "f4", "f5", "f6", "f7"]);
    assert_eq!(j.outstanding(), 7);

    j.take_chunk("w1", 5).unwrap();
    j.take_chunk("w2", 5).unwrap();
    assert_eq!(j.outstanding(), 7);

    let restored = j.requeue("w2").unwrap();
    assert_eq!(restored, 2);
    assert_eq!(j.outstanding(), 7);
    assert!(!j.is_assigned_to("w2"));

    j.complete_chunk("w1", FileIndex::file("g1")).unwrap();
    assert_eq!(j.outstanding(), 3);
}

#[test]
fn test_worker_holds_at_most_one_chunk_per_job() {
    let mut j = job("job-1", &["f1", "f2", "f3", "f4"]);
    j.take_chunk("w1", 2).unwrap();

    assert!(j.take_chunk("w1", 2).unwrap_err().is_fatal());
    assert_eq!(j.wip_distribution.len(), 1);
    assert_eq!(j.unprocessed_file_indices.len(), 2);
}
