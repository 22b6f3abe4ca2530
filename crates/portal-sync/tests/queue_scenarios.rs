//! End-to-end queue scenarios against an in-process mock remote.

mod common;

use common::{assert_single_placement, eventually, queue_config, MockRemote};
use portal_sync::{
    ManualTimer, SyncAdmin, SyncConfig, SyncError, SyncQueue, TaskKind, TaskState, TokioTimer,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_disabled_feature_is_noop() {
    let queue = SyncQueue::from_config(&SyncConfig::default()).unwrap();
    assert!(queue.enqueue_upload("a.txt").is_none());

    let admin = SyncAdmin::new(queue);
    let report = admin.status().await.unwrap();
    assert!(!report.enabled);
    assert!(report.status.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_peak_concurrency_then_all_complete() {
    let remote = Arc::new(MockRemote::new(Duration::from_secs(2)));
    let queue = SyncQueue::start(queue_config(2, 3), remote.clone(), Arc::new(TokioTimer));

    let ids: Vec<String> = (0..5)
        .map(|i| queue.enqueue_upload(&format!("photos/{}.jpg", i)).unwrap())
        .collect();

    let status = queue.status().await.unwrap();
    assert_eq!(status.running_tasks, 2);
    assert_eq!(status.pending_tasks, 3);
    assert_eq!(status.total_tasks, 5);

    let snapshot = queue.snapshot().await.unwrap();
    assert_single_placement(&snapshot, &ids);
    assert!(snapshot.running.iter().all(|t| t.state == TaskState::Running));
    assert!(snapshot.pending.iter().all(|t| t.state == TaskState::Pending));

    queue.wait_idle().await.unwrap();

    let status = queue.status().await.unwrap();
    assert_eq!(status.completed_tasks, 5);
    assert_eq!(status.total_tasks, 5);
    assert_eq!(remote.peak(), 2);
    assert_single_placement(&queue.snapshot().await.unwrap(), &ids);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_ends_failed_after_max_retries() {
    let remote = Arc::new(MockRemote::new(Duration::from_millis(10)));
    remote.fail_object("broken.iso");
    let queue = SyncQueue::start(queue_config(3, 3), remote.clone(), Arc::new(TokioTimer));

    let started = tokio::time::Instant::now();
    let id = queue.enqueue_upload("broken.iso").unwrap();
    queue.wait_idle().await.unwrap();

    // four attempts of 10ms plus backoff of 50 + 100 + 200ms
    assert!(started.elapsed() >= Duration::from_millis(390));
    assert_eq!(remote.attempts(), 4);

    let history = queue.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, id);
    assert_eq!(history[0].state, TaskState::Failed);
    assert_eq!(history[0].retry_count, 3);
    assert_eq!(
        history[0].last_error.as_deref(),
        Some("rsync failed (exit 30): timeout in data send/receive")
    );
}

#[tokio::test]
async fn test_backoff_delays_follow_exponential_schedule() {
    let remote = Arc::new(MockRemote::new(Duration::ZERO));
    remote.fail_object("x");
    let timer = ManualTimer::new();
    let queue = SyncQueue::start(queue_config(1, 4), remote.clone(), Arc::new(timer.clone()));

    queue.enqueue_delete("x");
    for _ in 0..4 {
        eventually(|| {
            let timer = timer.clone();
            async move { timer.armed() == 1 }
        })
        .await;
        timer.fire_all();
    }
    queue.wait_idle().await.unwrap();

    let expected: Vec<Duration> = [50, 100, 200, 400]
        .iter()
        .map(|ms| Duration::from_millis(*ms))
        .collect();
    assert_eq!(timer.delays(), expected);
    assert_eq!(remote.attempts(), 5);
}

#[tokio::test]
async fn test_manual_retry_runs_independently() {
    let remote = Arc::new(MockRemote::new(Duration::from_millis(1)));
    remote.fail_object("contract.pdf");
    let queue = SyncQueue::start(queue_config(2, 0), remote.clone(), Arc::new(TokioTimer));
    let admin = SyncAdmin::new(queue.clone());

    let original = queue.enqueue_upload("contract.pdf").unwrap();
    queue.wait_idle().await.unwrap();

    remote.heal_object("contract.pdf");
    let fresh = admin.retry(&original).await.unwrap();
    assert_ne!(fresh, original);
    queue.wait_idle().await.unwrap();

    let history = admin.history(None).await.unwrap().history;
    assert_eq!(history.len(), 2);
    let new_task = history.iter().find(|t| t.id == fresh).unwrap();
    assert_eq!(new_task.state, TaskState::Completed);
    assert_eq!(new_task.kind, TaskKind::Upload);
    assert_eq!(new_task.object_name, "contract.pdf");
    let old_task = history.iter().find(|t| t.id == original).unwrap();
    assert_eq!(old_task.state, TaskState::Failed);

    // The original stays failed, so it can be retried again; the new one cannot.
    assert!(admin.retry(&original).await.is_ok());
    assert!(matches!(
        admin.retry(&fresh).await,
        Err(SyncError::TaskNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_respects_limit() {
    let remote = Arc::new(MockRemote::new(Duration::from_millis(2)));
    let queue = SyncQueue::start(queue_config(3, 0), remote.clone(), Arc::new(TokioTimer));

    let mut handles = vec![];
    for producer in 0..10 {
        let q = queue.clone();
        handles.push(tokio::spawn(async move {
            (0..20)
                .map(|i| q.enqueue_upload(&format!("p{}/f{}", producer, i)).unwrap())
                .collect::<Vec<_>>()
        }));
    }
    let mut ids = vec![];
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }

    eventually(|| {
        let remote = remote.clone();
        async move { remote.in_flight() > 0 }
    })
    .await;
    let snapshot = queue.snapshot().await.unwrap();
    assert!(snapshot.running.len() <= 3);
    assert_single_placement(&snapshot, &ids);

    queue.wait_idle().await.unwrap();
    let status = queue.status().await.unwrap();
    assert_eq!(status.completed_tasks, 200);
    assert_eq!(status.total_tasks, 200);
    assert!(remote.peak() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_outcomes_keep_counts_consistent() {
    let remote = Arc::new(MockRemote::new(Duration::from_millis(20)));
    remote.fail_object("bad-1");
    remote.fail_object("bad-2");
    let queue = SyncQueue::start(queue_config(2, 1), remote.clone(), Arc::new(TokioTimer));

    let mut ids = vec![];
    for name in ["ok-1", "bad-1", "ok-2", "bad-2", "ok-3"] {
        ids.push(queue.enqueue_upload(name).unwrap());
    }

    for _ in 0..20 {
        let status = queue.status().await.unwrap();
        assert_eq!(
            status.total_tasks,
            status.running_tasks + status.pending_tasks + status.failed_tasks + status.completed_tasks
        );
        assert_eq!(status.total_tasks, 5);
        assert!(status.running_tasks <= 2);
        assert_single_placement(&queue.snapshot().await.unwrap(), &ids);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    queue.wait_idle().await.unwrap();
    let status = queue.status().await.unwrap();
    assert_eq!(status.completed_tasks, 3);
    assert_eq!(status.failed_tasks, 2);
}
