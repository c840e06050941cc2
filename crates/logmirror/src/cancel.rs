use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Token for cooperative shutdown of shard workers.
///
/// Set once by the signal handler, polled by workers at loop boundaries.
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Sleep for `duration`, waking early once cancelled.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let worker_copy = token.clone();
        assert!(!worker_copy.is_cancelled());
        token.cancel();
        assert!(worker_copy.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_wakes_early_when_cancelled() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(10)).await);

        token.cancel();
        let started = std::time::Instant::now();
        assert!(!token.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
