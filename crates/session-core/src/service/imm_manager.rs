//! Outbound instant multimedia messages (SIP MESSAGE)
//!
//! Messages are sent one at a time in the order they were queued. A 407
//! challenge is answered and the MESSAGE resent with the next CSeq.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::contact::ContactId;
use crate::dialog::{generate_call_id, DialogPath};
use crate::errors::{Result, SessionError};
use crate::session::session::panic_message;
use crate::session::SessionContext;
use crate::sip::SessionAuthenticationAgent;

/// A one-shot SIP MESSAGE to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantMultimediaMessage {
    pub contact: ContactId,
    pub feature_tag: String,
    pub content: Bytes,
    pub content_type: String,
}

impl InstantMultimediaMessage {
    pub fn new(
        contact: ContactId,
        feature_tag: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            contact,
            feature_tag: feature_tag.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

type Outcome = oneshot::Sender<Result<()>>;

pub struct ImmManager {
    sender: Mutex<Option<mpsc::UnboundedSender<(InstantMultimediaMessage, Outcome)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ImmManager {
    /// Start the drain task
    pub fn start(ctx: Arc<SessionContext>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(InstantMultimediaMessage, Outcome)>();
        let worker = tokio::spawn(async move {
            info!("Instant multimedia message manager started");
            while let Some((message, outcome)) = receiver.recv().await {
                debug!("Dequeue instant message for {}", message.contact);
                let result = match AssertUnwindSafe(send_message(&ctx, &message)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!("Sending instant message panicked: {}", reason);
                        Err(SessionError::internal(reason))
                    }
                };
                if let Err(e) = &result {
                    warn!("Instant message to {} failed: {}", message.contact, e);
                }
                let _ = outcome.send(result);
            }
            info!("Instant multimedia message manager stopped");
        });
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `message`; the receiver yields its outcome once sent
    pub fn queue(&self, message: InstantMultimediaMessage) -> Result<oneshot::Receiver<Result<()>>> {
        let (outcome, receipt) = oneshot::channel();
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| SessionError::invalid_state("instant message manager terminated"))?;
        sender
            .send((message, outcome))
            .map_err(|_| SessionError::invalid_state("instant message manager stopped"))?;
        Ok(receipt)
    }

    /// Queue `message` and wait until it was sent
    pub async fn send(&self, message: InstantMultimediaMessage) -> Result<()> {
        self.queue(message)?
            .await
            .map_err(|_| SessionError::internal("instant message dropped"))?
    }

    /// Close the queue; messages already queued are still sent
    pub async fn terminate(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Instant message manager task failed: {}", e);
            }
        }
    }
}

async fn send_message(ctx: &SessionContext, message: &InstantMultimediaMessage) -> Result<()> {
    let settings = ctx.settings.as_ref();
    let remote = message.contact.to_tel_uri();
    let mut dialog = DialogPath::originating(
        generate_call_id(&ctx.network.local_ip().to_string()),
        remote.clone(),
        settings.local_user(),
        remote,
    );
    let (username, password) = settings.digest_credentials();
    let mut auth = SessionAuthenticationAgent::new(username, password);
    let timeout = settings.sip_transaction_timeout();
    let mut challenges = 0;

    loop {
        let mut request = ctx.factory.create_message(
            &dialog,
            Some(&message.feature_tag),
            &message.content_type,
            message.content.clone(),
        );
        auth.set_proxy_authorization(&mut request);
        info!("Send MESSAGE to {} (CSeq {})", message.contact, dialog.cseq());

        let response = tokio::time::timeout(timeout, ctx.transport.send_request_and_wait(request, timeout))
            .await
            .map_err(|_| SessionError::timeout("no response to MESSAGE"))??;

        match response.status {
            200..=299 => {
                info!("{} response received for MESSAGE to {}", response.status, message.contact);
                return Ok(());
            }
            407 => {
                challenges += 1;
                if challenges > settings.max_auth_attempts() {
                    return Err(SessionError::authentication(format!(
                        "MESSAGE still challenged after {} attempts",
                        settings.max_auth_attempts()
                    )));
                }
                info!("407 response received for MESSAGE, resending with credentials");
                auth.read_proxy_authenticate(&response)?;
                dialog.increment_cseq();
            }
            status => {
                return Err(SessionError::network(format!(
                    "MESSAGE rejected with {} {}",
                    status, response.reason
                )));
            }
        }
    }
}
