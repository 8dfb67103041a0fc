//! Tracking of outstanding SEND transactions

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of waiting for every outstanding chunk response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    AllAcknowledged,
    ErrorResponse(u16),
    TimedOut,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
struct PendingChunk {
    last_byte: u64,
    total: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: HashMap<String, PendingChunk>,
    received_ok: usize,
    failure: Option<u16>,
    terminated: bool,
}

/// Book-keeping for SEND requests that expect a transaction response
#[derive(Debug, Default)]
pub struct TransactionTracker {
    state: Mutex<TrackerState>,
    notify: Notify,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk sent under `transaction_id`
    pub fn register(&self, transaction_id: &str, last_byte: u64, total: u64) {
        self.state
            .lock()
            .pending
            .insert(transaction_id.to_string(), PendingChunk { last_byte, total });
    }

    /// `(last_byte, total)` of an outstanding chunk
    pub fn lookup(&self, transaction_id: &str) -> Option<(u64, u64)> {
        self.state
            .lock()
            .pending
            .get(transaction_id)
            .map(|chunk| (chunk.last_byte, chunk.total))
    }

    /// Apply a response. Returns `(last_byte, total)` of the acknowledged chunk on 2xx.
    pub fn on_response(&self, transaction_id: &str, status: u16) -> Option<(u64, u64)> {
        let acked = {
            let mut state = self.state.lock();
            let chunk = state.pending.remove(transaction_id)?;
            if (200..300).contains(&status) {
                state.received_ok += 1;
                Some((chunk.last_byte, chunk.total))
            } else {
                state.failure.get_or_insert(status);
                None
            }
        };
        self.notify.notify_one();
        acked
    }

    /// Forget outstanding chunks and failures from a previous transfer
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.failure = None;
        state.received_ok = 0;
    }

    pub fn received_ok(&self) -> usize {
        self.state.lock().received_ok
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Unblock any waiter, the session is going away
    pub fn terminate(&self) {
        self.state.lock().terminated = true;
        self.notify.notify_one();
    }

    /// Wait until no chunk is outstanding, a chunk fails, or `timeout` expires
    pub async fn wait_all(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock();
                if state.terminated {
                    return WaitOutcome::Terminated;
                }
                if let Some(status) = state.failure {
                    return WaitOutcome::ErrorResponse(status);
                }
                if state.pending.is_empty() {
                    return WaitOutcome::AllAcknowledged;
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return WaitOutcome::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_all_after_every_response() {
        let tracker = TransactionTracker::new();
        tracker.register("t1", 10, 20);
        tracker.register("t2", 20, 20);

        assert_eq!(tracker.on_response("t1", 200), Some((10, 20)));
        assert_eq!(tracker.on_response("unknown", 200), None);
        assert_eq!(tracker.on_response("t2", 200), Some((20, 20)));

        assert_eq!(
            tracker.wait_all(Duration::from_millis(10)).await,
            WaitOutcome::AllAcknowledged
        );
        assert_eq!(tracker.received_ok(), 2);
    }

    #[tokio::test]
    async fn test_error_response_fails_the_wait() {
        let tracker = TransactionTracker::new();
        tracker.register("t1", 10, 10);
        tracker.on_response("t1", 481);
        assert_eq!(
            tracker.wait_all(Duration::from_secs(1)).await,
            WaitOutcome::ErrorResponse(481)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_response_times_out() {
        let tracker = TransactionTracker::new();
        tracker.register("t1", 10, 10);
        assert_eq!(
            tracker.wait_all(Duration::from_secs(30)).await,
            WaitOutcome::TimedOut
        );
        assert_eq!(tracker.pending(), 1);
    }

    #[tokio::test]
    async fn test_terminate_releases_waiter() {
        let tracker = std::sync::Arc::new(TransactionTracker::new());
        tracker.register("t1", 10, 10);
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_all(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        tracker.terminate();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Terminated);
    }
}
