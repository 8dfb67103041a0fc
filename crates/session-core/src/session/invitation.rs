//! The single-resolution gate a terminating session waits on
//!
//! Whichever comes first among the user's answer, a remote CANCEL, a system
//! abort and the ringing timeout resolves the gate. Every later attempt is
//! refused, so the run task and the aborting caller agree on one outcome.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome of waiting for the local decision on an incoming invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvitationAnswer {
    Accepted,
    /// Rejected by the user with 603 Decline
    Declined,
    /// Rejected by the user with 486 Busy Here
    BusyHere,
    RejectedBySystem,
    Timeout,
    /// CANCEL received from the remote
    Canceled,
    Deleted,
}

#[derive(Debug)]
pub struct InvitationGate {
    sender: Mutex<Option<oneshot::Sender<InvitationAnswer>>>,
    receiver: tokio::sync::Mutex<Option<oneshot::Receiver<InvitationAnswer>>>,
}

impl Default for InvitationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InvitationGate {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    /// Resolve the gate; true only for the call that actually resolved it
    pub fn resolve(&self, answer: InvitationAnswer) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            debug!("Invitation already answered, ignoring {:?}", answer);
            return false;
        };
        if sender.send(answer).is_err() {
            debug!("Nobody waits for the invitation answer {:?}", answer);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Wait for the answer, resolving the gate as `Timeout` when `timeout` elapses
    ///
    /// Only one waiter is supported; a second call returns `RejectedBySystem`.
    pub async fn wait(&self, timeout: Duration) -> InvitationAnswer {
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            warn!("Invitation answer awaited twice");
            return InvitationAnswer::RejectedBySystem;
        };

        tokio::select! {
            answer = &mut receiver => return answer.unwrap_or_else(|_| dropped()),
            _ = tokio::time::sleep(timeout) => {}
        }

        if self.resolve(InvitationAnswer::Timeout) {
            return InvitationAnswer::Timeout;
        }
        // Lost the race against a concurrent resolve; its answer is in flight.
        receiver.await.unwrap_or_else(|_| dropped())
    }
}

fn dropped() -> InvitationAnswer {
    warn!("Invitation gate dropped without an answer");
    InvitationAnswer::RejectedBySystem
}
