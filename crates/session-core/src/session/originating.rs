//! INVITE side of the session state machine

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dialog::parse_delta_seconds;
use crate::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use crate::sdp::{offerer_listens, MsrpMediaParams, SetupRole};
use crate::sip::{headers, SipRequest, SipResponse};

use super::behavior::OfferBody;
use super::media::MediaSession;
use super::session::ImsSession;
use super::state::{SessionState, TerminationReason};

impl ImsSession {
    pub(crate) async fn run_originating(self: &Arc<Self>) -> Result<()> {
        info!(
            "Initiate a new {:?} session {} as originating with {}",
            self.kind(),
            self.id(),
            self.contact()
        );

        let media = if self.kind().uses_msrp() {
            let role = self.behavior.setup_offer(self.settings());
            let secured = self.wants_secured_msrp();
            let Some(media) = self.interruptible(self.allocate_media(role, secured)).await else {
                return Ok(());
            };
            Some((media?, role))
        } else {
            None
        };

        let offer = self
            .behavior
            .build_offer(self, media.as_ref().map(|(media, _)| &**media))?;
        debug!("Local offer of session {}:\n{}", self.id(), offer.sdp);
        self.dialog.lock().set_local_content(offer.sdp.clone());

        let invite = self.build_invite(&offer);
        self.dialog.lock().set_invite(invite.clone());
        self.set_state(SessionState::InviteSent);

        let Some(response) = self.send_invite(invite, &offer).await? else {
            return Ok(());
        };

        self.handle_200_ok(response, media).await;
        Ok(())
    }

    fn build_invite(&self, offer: &OfferBody) -> SipRequest {
        let mut invite = {
            let dialog = self.dialog.lock();
            self.ctx.factory.create_invite(
                &dialog,
                &self.behavior.feature_tags(),
                &self.behavior.accept_tags(),
                &offer.content_type,
                &offer.body,
            )
        };
        self.auth.lock().set_proxy_authorization(&mut invite);
        invite
    }

    /// Send the INVITE until a 2xx arrives
    ///
    /// Returns `None` when the session finished on the way (rejected,
    /// cancelled or interrupted).
    async fn send_invite(&self, mut invite: SipRequest, offer: &OfferBody) -> Result<Option<SipResponse>> {
        let timeout = self.settings().sip_transaction_timeout();
        let max_auth_attempts = self.settings().max_auth_attempts();
        let mut auth_attempts = 0;

        loop {
            info!("Send INVITE for session {}", self.id());
            let exchange = tokio::time::timeout(
                timeout,
                self.ctx.transport.send_request_and_wait(invite, timeout),
            );
            let Some(result) = self.interruptible(exchange).await else {
                return Ok(None);
            };
            let response = result
                .map_err(|_| SessionError::timeout("no response to INVITE"))??;

            match response.status {
                200..=299 => {
                    info!("{} OK response received for session {}", response.status, self.id());
                    return Ok(Some(response));
                }
                407 => {
                    auth_attempts += 1;
                    if auth_attempts > max_auth_attempts {
                        return Err(SessionError::authentication(format!(
                            "INVITE still challenged after {} attempts",
                            max_auth_attempts
                        )));
                    }
                    info!("407 response received for session {}", self.id());
                    self.auth.lock().read_proxy_authenticate(&response)?;
                    invite = self.rebuild_invite(offer);
                }
                422 => {
                    let min_se = response
                        .headers
                        .get(headers::MIN_SE)
                        .and_then(parse_delta_seconds)
                        .ok_or_else(|| SessionError::payload("422 without a Min-SE header"))?;
                    info!("422 response received for session {}, Min-SE {}", self.id(), min_se);
                    self.dialog.lock().set_min_session_expire(min_se);
                    invite = self.rebuild_invite(offer);
                }
                486 | 480 | 603 => {
                    info!("Session {} declined by remote with {}", self.id(), response.status);
                    self.finish_rejected(None, TerminationReason::ByRemote).await;
                    return Ok(None);
                }
                487 => {
                    info!("Session {} initiation cancelled", self.id());
                    self.handle_error(ImsServiceError::from_code(ErrorCode::SessionInitiationCancelled));
                    return Ok(None);
                }
                status => {
                    return Err(SessionError::network(format!("{} {}", status, response.reason)));
                }
            }
        }
    }

    fn rebuild_invite(&self, offer: &OfferBody) -> SipRequest {
        self.dialog.lock().increment_cseq();
        let invite = self.build_invite(offer);
        self.dialog.lock().set_invite(invite.clone());
        invite
    }

    async fn handle_200_ok(self: &Arc<Self>, response: SipResponse, media: Option<(Arc<MediaSession>, SetupRole)>) {
        let remote_sdp = response.body_str().unwrap_or_default().to_string();
        {
            let mut dialog = self.dialog.lock();
            if let Some(tag) = response.to_tag() {
                dialog.set_remote_tag(tag);
            }
            if let Some(target) = response.contact_uri() {
                dialog.set_target(target);
            }
            dialog.set_remote_content(remote_sdp.clone());
            dialog.sig_established();
        }

        let remote = media
            .as_ref()
            .map(|_| MsrpMediaParams::from_sdp(&remote_sdp, false));

        let ack = self.ctx.factory.create_ack(&self.dialog.lock());
        info!("Send ACK for session {}", self.id());
        if let Err(e) = self.ctx.transport.send_request(ack).await {
            warn!("Cannot send ACK for session {}: {}", self.id(), e);
            self.handle_media_error(ImsServiceError::initiation(&e)).await;
            return;
        }

        let (media, remote) = match (media, remote) {
            (Some((media, _)), Some(Ok(remote))) => (Some(media), Some(remote)),
            (_, Some(Err(e))) => {
                warn!("Remote SDP of session {} unusable: {}", self.id(), e);
                self.handle_media_error(ImsServiceError::new(ErrorCode::SessionInitiationFailed, e.to_string()))
                    .await;
                return;
            }
            _ => (None, None),
        };
        self.set_state(SessionState::MediaNegotiated);
        *self.remote_media.lock() = remote.clone();

        self.dialog.lock().session_established();
        self.set_state(SessionState::Established);

        if let (Some(media), Some(remote)) = (media, remote) {
            let Some(opened) = self.interruptible(self.open_offerer_media(&media, &remote)).await else {
                return;
            };
            if let Err(e) = opened {
                warn!("Cannot open media of session {}: {}", self.id(), e);
                self.handle_media_error(ImsServiceError::transfer(&e)).await;
                return;
            }
        }
        if self.is_terminal() {
            return;
        }

        self.notify_state(|l, id, contact| l.on_session_started(id, contact));
        let behavior = Arc::clone(&self.behavior);
        if let Err(e) = behavior.on_established(self).await {
            warn!("Session {} cannot start its transfer: {}", self.id(), e);
            self.handle_media_error(ImsServiceError::transfer(&e)).await;
        }
    }

    async fn open_offerer_media(&self, media: &MediaSession, remote: &MsrpMediaParams) -> Result<()> {
        media.set_remote_path(&remote.path)?;
        if offerer_listens(remote.setup) {
            media.open_passive().await
        } else {
            media.open_active(&remote.host, remote.port).await?;
            media.send_empty_chunk()
        }
    }
}
