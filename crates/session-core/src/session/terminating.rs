//! Answering side of the session state machine

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contact::remote_display_name;
use crate::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use crate::sdp::{MsrpMediaParams, SetupRole};

use super::content::split_invite_body;
use super::invitation::InvitationAnswer;
use super::media::MediaSession;
use super::session::ImsSession;
use super::state::{SessionState, TerminationReason};

impl ImsSession {
    pub(crate) async fn run_terminating(self: &Arc<Self>) -> Result<()> {
        info!(
            "Initiate a new {:?} session {} as terminating from {}",
            self.kind(),
            self.id(),
            self.contact()
        );

        let invite = self
            .dialog
            .lock()
            .invite()
            .cloned()
            .ok_or_else(|| SessionError::invalid_state("terminating session without INVITE"))?;
        if let Some(name) = remote_display_name(&invite) {
            self.ctx.contacts.set_display_name(self.contact(), &name);
        }

        if self.behavior.early_ringing() {
            self.send_ringing().await;
        }

        let (sdp, icon) = match split_invite_body(&invite) {
            Ok(parts) => parts,
            Err(e) => {
                self.reject_invitation(415, ImsServiceError::new(ErrorCode::SessionInitiationFailed, e.to_string()))
                    .await;
                return Ok(());
            }
        };
        self.dialog.lock().set_remote_content(sdp.clone());

        let remote = if self.kind().uses_msrp() {
            match MsrpMediaParams::from_sdp(&sdp, self.behavior.requires_file_selector()) {
                Ok(params) => Some(params),
                Err(e) => {
                    warn!("Invalid SDP in invitation {}: {}", self.id(), e);
                    self.reject_invitation(415, ImsServiceError::new(ErrorCode::SessionInitiationFailed, e.to_string()))
                        .await;
                    return Ok(());
                }
            }
        } else {
            None
        };

        if let Err(rejection) = self.behavior.check_invitation(self, remote.as_ref(), icon) {
            self.reject_invitation(rejection.status, rejection.error).await;
            return Ok(());
        }
        *self.remote_media.lock() = remote.clone();

        if self.behavior.auto_accept(self) {
            info!("Auto accept invitation {}", self.id());
            self.behavior.on_auto_accepted(self);
        } else {
            self.notify_state(|l, id, contact| l.on_session_invited(id, contact));
            if !self.behavior.early_ringing() {
                self.send_ringing().await;
            }
            self.set_state(SessionState::Ringing);
            self.notify_state(|l, id, _| l.on_session_ringing(id));

            let Some(answer) = self.interruptible(self.gate.wait(self.settings().ringing_period())).await else {
                return Ok(());
            };
            debug!("Invitation {} answered {:?}", self.id(), answer);
            match answer {
                InvitationAnswer::Accepted => {}
                InvitationAnswer::Declined => {
                    self.finish_rejected(Some(603), TerminationReason::ByUser).await;
                    return Ok(());
                }
                InvitationAnswer::BusyHere => {
                    self.finish_rejected(Some(486), TerminationReason::ByUser).await;
                    return Ok(());
                }
                InvitationAnswer::Timeout => {
                    self.finish_rejected(Some(486), TerminationReason::ByTimeout).await;
                    return Ok(());
                }
                InvitationAnswer::RejectedBySystem | InvitationAnswer::Canceled | InvitationAnswer::Deleted => {
                    self.finish_silently(SessionState::Rejected);
                    return Ok(());
                }
            }
        }

        self.notify_state(|l, id, contact| l.on_session_accepting(id, contact));
        self.set_state(SessionState::Accepted);
        self.answer(remote).await
    }

    async fn send_ringing(&self) {
        let ringing = self.ctx.factory.create_ringing(&self.dialog.lock());
        let Some(ringing) = ringing else {
            return;
        };
        info!("Send 180 Ringing for session {}", self.id());
        if let Err(e) = self.ctx.transport.send_response(ringing).await {
            warn!("Cannot send 180 for session {}: {}", self.id(), e);
        }
    }

    async fn answer(self: &Arc<Self>, remote: Option<MsrpMediaParams>) -> Result<()> {
        let (media, role) = match &remote {
            Some(remote) => {
                let role = remote.setup_answer();
                let Some(media) = self.interruptible(self.allocate_media(role, remote.is_secured())).await else {
                    return Ok(());
                };
                let media = media?;
                media.set_remote_path(&remote.path)?;
                (Some(media), role)
            }
            None => (None, SetupRole::Passive),
        };

        let sdp = self
            .behavior
            .build_answer(self, media.as_deref(), remote.as_ref())?;
        debug!("Local answer of session {}:\n{}", self.id(), sdp);
        let response = {
            let mut dialog = self.dialog.lock();
            dialog.set_local_content(sdp.clone());
            let response = self
                .ctx
                .factory
                .create_200_ok_invite(&dialog, &self.behavior.feature_tags(), &sdp);
            dialog.sig_established();
            response
        };
        let response = response.ok_or_else(|| SessionError::invalid_state("no INVITE to answer"))?;
        self.set_state(SessionState::MediaNegotiated);

        if let Some(media) = media.as_ref().filter(|_| role != SetupRole::Active) {
            self.spawn_passive_open(Arc::clone(media));
        }

        info!("Send 200 OK for session {}", self.id());
        let timeout = self.settings().sip_transaction_timeout();
        let exchange = tokio::time::timeout(
            timeout,
            self.ctx.transport.send_response_and_wait_ack(response, timeout),
        );
        let Some(ack) = self.interruptible(exchange).await else {
            return Ok(());
        };
        match ack {
            Ok(Ok(_)) => info!("ACK received for session {}", self.id()),
            Ok(Err(e)) => {
                warn!("No ACK for session {}: {}", self.id(), e);
                self.handle_error(ImsServiceError::new(ErrorCode::SendResponseFailed, e.to_string()));
                return Ok(());
            }
            Err(_) => {
                warn!("No ACK for session {} before timeout", self.id());
                self.handle_error(ImsServiceError::from_code(ErrorCode::SendResponseFailed));
                return Ok(());
            }
        }

        self.dialog.lock().session_established();
        self.set_state(SessionState::Established);

        if let (Some(media), Some(remote), SetupRole::Active) = (media.as_ref(), remote.as_ref(), role) {
            let connect = async {
                media.open_active(&remote.host, remote.port).await?;
                media.send_empty_chunk()
            };
            let Some(opened) = self.interruptible(connect).await else {
                return Ok(());
            };
            if let Err(e) = opened {
                warn!("Cannot connect media of session {}: {}", self.id(), e);
                self.handle_media_error(ImsServiceError::transfer(&e)).await;
                return Ok(());
            }
        }
        if self.is_terminal() {
            return Ok(());
        }

        self.notify_state(|l, id, contact| l.on_session_started(id, contact));
        let behavior = Arc::clone(&self.behavior);
        if let Err(e) = behavior.on_established(self).await {
            warn!("Session {} cannot start its media: {}", self.id(), e);
            self.handle_media_error(ImsServiceError::transfer(&e)).await;
        }
        Ok(())
    }

    /// Wait for the remote's connection without blocking the 200/ACK exchange
    fn spawn_passive_open(self: &Arc<Self>, media: Arc<MediaSession>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let open = async {
                media.open_passive().await?;
                media.send_empty_chunk()
            };
            let Some(opened) = session.interruptible(open).await else {
                return;
            };
            if let Err(e) = opened {
                if media.is_closed() {
                    return;
                }
                warn!("Cannot accept media of session {}: {}", session.id(), e);
                session.handle_media_error(ImsServiceError::transfer(&e)).await;
            }
        });
    }
}
