//! Common test utilities for queue integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use portal_sync::{QueueConfig, QueueSnapshot, TaskKind, Transfer, TransferError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-process stand-in for the remote node.
///
/// Each transfer sleeps for `latency`; objects listed in `failing` fail on
/// every attempt until healed.
pub struct MockRemote {
    latency: Duration,
    failing: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockRemote {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn fail_object(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal_object(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for MockRemote {
    async fn transfer(&self, _kind: TaskKind, object_name: &str) -> Result<(), TransferError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(object_name) {
            return Err(TransferError::ExitStatus {
                program: "rsync".to_string(),
                code: Some(30),
                output: "timeout in data send/receive".to_string(),
            });
        }
        Ok(())
    }
}

pub fn queue_config(max_concurrent: usize, max_retries: u32) -> QueueConfig {
    QueueConfig {
        max_retries,
        retry_base_delay: Duration::from_millis(50),
        max_concurrent,
        max_history_size: 1000,
    }
}

/// Poll `check` until it holds, panicking after a generous bound.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Assert that every id occurs exactly once across pending, running and history.
pub fn assert_single_placement(snapshot: &QueueSnapshot, ids: &[String]) {
    for id in ids {
        let places = snapshot.pending.iter().filter(|t| &t.id == id).count()
            + snapshot.running.iter().filter(|t| &t.id == id).count()
            + snapshot.history.iter().filter(|t| &t.id == id).count();
        assert_eq!(places, 1, "task {} found in {} places", id, places);
    }
}
