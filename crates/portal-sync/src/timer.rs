//! Cancellable delayed callbacks used for retry backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Callback run when a scheduled delay elapses.
pub type Wake = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a callback after a delay.
pub trait Timer: Send + Sync + 'static {
    /// Run `wake` once `delay` has elapsed, unless the handle is cancelled first.
    fn schedule(&self, delay: Duration, wake: Wake) -> TimerHandle;
}

/// Handle to a scheduled callback.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Wrap a cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Prevent the callback from running if it has not run yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Timer backed by `tokio::time::sleep` on a spawned task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, wake: Wake) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            wake();
        });
        TimerHandle::new(move || handle.abort())
    }
}

struct Scheduled {
    delay: Duration,
    wake: Option<Wake>,
    cancelled: Arc<AtomicBool>,
}

/// Timer that only fires when told to. Records every requested delay.
#[derive(Clone, Default)]
pub struct ManualTimer {
    entries: Arc<Mutex<Vec<Scheduled>>>,
}

impl ManualTimer {
    /// Create an empty manual timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.lock().iter().map(|s| s.delay).collect()
    }

    /// Callbacks neither fired nor cancelled.
    pub fn armed(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.wake.is_some() && !s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Fire every armed callback. Returns how many ran.
    pub fn fire_all(&self) -> usize {
        let wakes: Vec<Wake> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|s| !s.cancelled.load(Ordering::SeqCst))
                .filter_map(|s| s.wake.take())
                .collect()
        };
        let fired = wakes.len();
        for wake in wakes {
            wake();
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Scheduled>> {
        // A poisoned lock only means a wake callback panicked in a test.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, wake: Wake) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.lock().push(Scheduled {
            delay,
            wake: Some(wake),
            cancelled: cancelled.clone(),
        });
        TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}
