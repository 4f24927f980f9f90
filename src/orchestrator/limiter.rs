use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Caps concurrent generator calls and calls started per rolling minute.
///
/// Both queues are FIFO: tokio's semaphore and mutex hand out access in
/// request order, so a waiting request is never overtaken.
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
    per_minute: usize,
}

impl RequestLimiter {
    /// `max_concurrent` is clamped to at least 1; `per_minute == 0` disables
    /// the rolling cap.
    pub fn new(max_concurrent: usize, per_minute: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            window: Mutex::new(VecDeque::new()),
            per_minute,
        }
    }

    /// Wait for a rate slot and then a concurrency permit. The permit is
    /// released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        if self.per_minute > 0 {
            let mut started = self.window.lock().await;
            loop {
                let now = Instant::now();
                while started.front().is_some_and(|at| now.duration_since(*at) >= WINDOW) {
                    started.pop_front();
                }
                if started.len() < self.per_minute {
                    started.push_back(now);
                    break;
                }
                let Some(oldest) = started.front().copied() else {
                    break;
                };
                debug!(queued = started.len(), "per-minute request cap reached, waiting");
                tokio::time::sleep_until(oldest + WINDOW).await;
            }
        }
        self.permits.clone().acquire_owned().await
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
