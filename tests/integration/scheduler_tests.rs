//! Job scheduler integration tests.
//!
//! Tests verify:
//! - The number of running jobs never exceeds the concurrency limit
//! - Waiting jobs start in priority order, not submission order
//! - A job past its deadline fails and frees its slot
//! - Requests for the same key share one job

use std::sync::Arc;

use deepzoom::config::SchedulerConfig;
use deepzoom::error::TileError;
use deepzoom::queue::Priority;
use deepzoom::scheduler::{JobEvent, JobOwner, JobRequest, JobScheduler, JobState};
use deepzoom::tile::{CacheKey, LayerId, TileCoord};

use super::test_utils::{CountingLoader, GatedLoader};

fn config(concurrency_limit: usize, timeout_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        concurrency_limit,
        timeout_ms,
    }
}

fn request(address: &str, priority: f64, layer: u32) -> JobRequest {
    JobRequest {
        key: CacheKey::from_address(address, None),
        address: address.to_string(),
        post_data: None,
        priority: Priority::new(priority),
        owner: JobOwner::new(LayerId(layer), TileCoord::new(0, 0, 0)),
    }
}

// =============================================================================
// Concurrency Bound
// =============================================================================

#[tokio::test]
async fn test_running_jobs_never_exceed_limit() {
    let loader = GatedLoader::new();
    let mut scheduler = JobScheduler::new(config(3, 30_000), Arc::new(loader.clone()));

    for i in 0..20 {
        scheduler.submit(request(&format!("t{i}"), i as f64, 0));
        assert!(scheduler.running() <= 3);
    }
    assert_eq!(scheduler.running(), 3);
    assert_eq!(scheduler.queued(), 17);

    let mut completed = 0;
    let mut now = 0;
    while completed < 20 {
        loader.release(1);
        assert!(scheduler.wait_for_completion().await);
        now += 10;
        for event in scheduler.poll(now) {
            if matches!(event, JobEvent::Completed { .. }) {
                completed += 1;
            }
        }
        assert!(scheduler.running() <= 3);
    }

    assert!(loader.peak() <= 3);
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.stats().completed, 20);
}

#[tokio::test]
async fn test_lower_priority_value_starts_next() {
    let loader = GatedLoader::new();
    let mut scheduler = JobScheduler::new(config(1, 30_000), Arc::new(loader.clone()));

    let j1 = scheduler.submit(request("j1", 5.0, 0));
    let j2 = scheduler.submit(request("j2", 1.0, 0));
    let j3 = scheduler.submit(request("j3", 3.0, 0));
    assert_eq!(scheduler.job_state(j1), Some(JobState::Running));
    assert_eq!(scheduler.job_state(j2), Some(JobState::Queued));
    assert_eq!(scheduler.job_state(j3), Some(JobState::Queued));

    let mut now = 0;
    for _ in 0..3 {
        loader.release(1);
        assert!(scheduler.wait_for_completion().await);
        now += 10;
        scheduler.poll(now);
    }

    assert_eq!(loader.started(), vec!["j1", "j2", "j3"]);
}

#[tokio::test]
async fn test_reprioritized_job_jumps_the_queue() {
    let loader = GatedLoader::new();
    let mut scheduler = JobScheduler::new(config(1, 30_000), Arc::new(loader.clone()));

    scheduler.submit(request("first", 0.0, 0));
    scheduler.submit(request("near", 1.0, 0));
    let far = scheduler.submit(request("far", 2.0, 0));
    assert!(scheduler.reprioritize(far, Priority::new(0.5)));

    for now in [10, 20, 30] {
        loader.release(1);
        assert!(scheduler.wait_for_completion().await);
        scheduler.poll(now);
    }
    assert_eq!(loader.started(), vec!["first", "far", "near"]);
}

// =============================================================================
// Timeouts and Failures
// =============================================================================

#[tokio::test]
async fn test_timeout_frees_slot() {
    let loader = GatedLoader::new();
    let mut scheduler = JobScheduler::new(config(1, 5000), Arc::new(loader.clone()));

    let t = scheduler.submit(request("slow", 1.0, 0));
    let next = scheduler.submit(request("next", 2.0, 0));
    assert!(scheduler.poll(4999).is_empty());
    assert_eq!(scheduler.job_state(t), Some(JobState::Running));

    let events = scheduler.poll(5001);
    let failed = events
        .iter()
        .find(|e| e.handle() == t)
        .expect("timeout event");
    assert!(matches!(
        failed,
        JobEvent::Failed {
            error: TileError::Timeout { timeout_ms: 5000, .. },
            ..
        }
    ));

    // The freed slot went to the waiting job
    assert_eq!(scheduler.job_state(t), None);
    assert_eq!(scheduler.job_state(next), Some(JobState::Running));
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::Started { handle, .. } if *handle == next)));
    assert_eq!(scheduler.stats().timed_out, 1);
}

#[tokio::test]
async fn test_failure_is_local() {
    let loader = CountingLoader::new();
    let mut scheduler = JobScheduler::new(config(2, 30_000), Arc::new(loader.clone()));

    let bad = scheduler.submit(request("fail.jpg", 1.0, 0));
    let good = scheduler.submit(request("good.jpg", 1.0, 0));

    let mut events = Vec::new();
    while !scheduler.is_idle() {
        scheduler.wait_for_completion().await;
        events.extend(scheduler.poll(0));
    }

    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Failed { handle, error: TileError::NetworkFailure { .. }, .. } if *handle == bad
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::Completed { handle, .. } if *handle == good)));
    assert_eq!(scheduler.stats().failed, 1);
    assert_eq!(scheduler.stats().completed, 1);
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn test_same_key_shares_one_job() {
    let loader = CountingLoader::new();
    let mut scheduler = JobScheduler::new(config(4, 30_000), Arc::new(loader.clone()));

    let a = scheduler.submit(request("shared.jpg", 1.0, 0));
    let b = scheduler.submit(request("shared.jpg", 1.0, 1));
    assert_eq!(a, b);
    assert_eq!(scheduler.owners(a).len(), 2);
    assert_eq!(scheduler.stats().deduplicated, 1);

    assert!(scheduler.wait_for_completion().await);
    let events = scheduler.poll(0);
    assert_eq!(events.len(), 1);
    let JobEvent::Completed { owners, .. } = &events[0] else {
        panic!("expected completion, got {:?}", events[0]);
    };
    assert_eq!(owners.len(), 2);
    assert_eq!(loader.count("shared.jpg"), 1);
}

#[tokio::test]
async fn test_last_owner_release_cancels() {
    let loader = GatedLoader::new();
    let mut scheduler = JobScheduler::new(config(1, 30_000), Arc::new(loader.clone()));

    scheduler.submit(request("busy", 0.0, 0));
    let shared = scheduler.submit(request("shared", 1.0, 0));
    scheduler.submit(request("shared", 1.0, 1));

    let owner0 = JobOwner::new(LayerId(0), TileCoord::new(0, 0, 0));
    let owner1 = JobOwner::new(LayerId(1), TileCoord::new(0, 0, 0));

    assert!(!scheduler.release_owner(shared, owner0));
    assert_eq!(scheduler.job_state(shared), Some(JobState::Queued));

    assert!(scheduler.release_owner(shared, owner1));
    assert_eq!(scheduler.job_state(shared), None);
    assert_eq!(scheduler.queued(), 0);
    assert_eq!(scheduler.stats().cancelled, 1);
}
