//! Generic multimedia sessions for service extensions
//!
//! The MSRP kind exchanges opaque data on a `sendrecv` MSRP stream. The RTP
//! kind only negotiates a caller supplied media block; the media itself is
//! handled outside the engine.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rcs_msrp_core::MsrpEvent;
use tracing::{debug, info};

use crate::contact::ContactId;
use crate::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use crate::sdp::{MediaDirection, MsrpMediaParams, SdpBuilder};
use crate::sip::SipRequest;

use super::behavior::{OfferBody, SessionBehavior};
use super::listener::{ListenerSet, SessionErrorListener, SessionStateListener, SipDataListener};
use super::media::MediaSession;
use super::session::{ImsSession, SessionContext};
use super::state::{SessionId, SessionKind, SessionState, TerminationReason};

/// IARI prefix of RCS service extensions
pub const EXTENSION_IARI_PREFIX: &str = "urn%3Aurn-7%3A3gpp-application.ims.iari.rcs.ext.";

/// Feature tag of the extension `service_id`
pub fn extension_feature_tag(service_id: &str) -> String {
    format!("+g.3gpp.iari-ref=\"{}{}\"", EXTENSION_IARI_PREFIX, service_id)
}

/// Service id carried by an extension feature tag
pub fn extension_service_id(request: &SipRequest) -> Option<String> {
    request
        .headers
        .get_all(crate::sip::headers::CONTACT)
        .chain(request.headers.get_all(crate::sip::headers::ACCEPT_CONTACT))
        .find_map(|value| {
            let start = value.find(EXTENSION_IARI_PREFIX)? + EXTENSION_IARI_PREFIX.len();
            let rest = &value[start..];
            let end = rest.find(['"', ';', ',', '>']).unwrap_or(rest.len());
            Some(rest[..end].to_string()).filter(|id| !id.is_empty())
        })
}

pub struct GenericBehavior {
    kind: SessionKind,
    feature_tag: String,
    /// `m=` block of the RTP kind
    local_media: Mutex<Option<String>>,
    listeners: ListenerSet<dyn SipDataListener>,
}

impl GenericBehavior {
    fn new(kind: SessionKind, feature_tag: String, local_media: Option<String>) -> Self {
        Self {
            kind,
            feature_tag,
            local_media: Mutex::new(local_media),
            listeners: ListenerSet::new(),
        }
    }

    fn msrp_sdp(&self, session: &ImsSession, media: Option<&MediaSession>) -> Result<String> {
        let media = media.ok_or_else(|| SessionError::invalid_state("MSRP session without media"))?;
        Ok(session
            .msrp_sdp(media)
            .accept_types(session.settings().generic_accept_types().join(" "))
            .direction(MediaDirection::SendRecv)
            .build())
    }

    fn rtp_sdp(&self, session: &ImsSession) -> Result<String> {
        let block = self
            .local_media
            .lock()
            .clone()
            .ok_or_else(|| SessionError::invalid_state("RTP session without local media"))?;
        Ok(SdpBuilder::new(session.network().local_ip()).raw_media(block).build())
    }
}

#[async_trait]
impl SessionBehavior for GenericBehavior {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn feature_tags(&self) -> Vec<String> {
        vec![self.feature_tag.clone()]
    }

    fn accept_tags(&self) -> Vec<String> {
        vec![self.feature_tag.clone()]
    }

    fn buffer_incoming(&self) -> bool {
        true
    }

    fn build_offer(&self, session: &ImsSession, media: Option<&MediaSession>) -> Result<OfferBody> {
        let sdp = match self.kind {
            SessionKind::GenericRtp => self.rtp_sdp(session)?,
            _ => self.msrp_sdp(session, media)?,
        };
        Ok(OfferBody::sdp(sdp))
    }

    fn build_answer(
        &self,
        session: &ImsSession,
        media: Option<&MediaSession>,
        _remote: Option<&MsrpMediaParams>,
    ) -> Result<String> {
        match self.kind {
            SessionKind::GenericRtp => self.rtp_sdp(session),
            _ => self.msrp_sdp(session, media),
        }
    }

    async fn on_media_event(&self, session: &Arc<ImsSession>, event: MsrpEvent) {
        match event {
            MsrpEvent::DataReceived { data, content_type, .. } => {
                debug!("Session {} received {} bytes", session.id(), data.len());
                self.listeners.for_each(|l| {
                    l.on_data_received(session.id(), session.contact(), &data, content_type.as_deref())
                });
            }
            MsrpEvent::TransferProgress { current, total } => session.notify_progress(current, total),
            MsrpEvent::TransferError { error, .. } => {
                session.handle_media_error(ImsServiceError::media(&error)).await;
            }
            MsrpEvent::ConnectionClosed if !session.is_terminal() => {
                session
                    .handle_media_error(ImsServiceError::new(
                        ErrorCode::MediaTransferFailed,
                        "MSRP connection closed",
                    ))
                    .await;
            }
            other => debug!("Generic session {} ignores {:?}", session.id(), other),
        }
    }
}

/// A generic MSRP or RTP session of a service extension
#[derive(Clone)]
pub struct GenericSipSession {
    session: Arc<ImsSession>,
    behavior: Arc<GenericBehavior>,
}

impl GenericSipSession {
    /// MSRP session towards `contact`
    pub fn outgoing_msrp(ctx: Arc<SessionContext>, contact: ContactId, feature_tag: String) -> Self {
        Self::outgoing(ctx, contact, GenericBehavior::new(SessionKind::GenericMsrp, feature_tag, None))
    }

    /// RTP session towards `contact` offering the `m=` block `media`
    pub fn outgoing_rtp(ctx: Arc<SessionContext>, contact: ContactId, feature_tag: String, media: String) -> Self {
        Self::outgoing(ctx, contact, GenericBehavior::new(SessionKind::GenericRtp, feature_tag, Some(media)))
    }

    fn outgoing(ctx: Arc<SessionContext>, contact: ContactId, behavior: GenericBehavior) -> Self {
        let behavior = Arc::new(behavior);
        let session = Arc::new(ImsSession::originating(ctx, behavior.clone(), contact));
        Self { session, behavior }
    }

    pub fn incoming(
        ctx: Arc<SessionContext>,
        contact: ContactId,
        invite: &SipRequest,
        kind: SessionKind,
        feature_tag: String,
    ) -> Self {
        let behavior = Arc::new(GenericBehavior::new(kind, feature_tag, None));
        let session = Arc::new(ImsSession::terminating(ctx, behavior.clone(), contact, invite));
        Self { session, behavior }
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn core(&self) -> &Arc<ImsSession> {
        &self.session
    }

    pub fn kind(&self) -> SessionKind {
        self.behavior.kind
    }

    pub fn feature_tag(&self) -> &str {
        &self.behavior.feature_tag
    }

    pub fn add_listener<L>(&self, listener: Arc<L>)
    where
        L: SessionStateListener + SessionErrorListener + SipDataListener + 'static,
    {
        self.session.add_state_listener(listener.clone());
        self.session.add_error_listener(listener.clone());
        self.behavior.listeners.add(listener);
    }

    pub fn start(&self) {
        self.session.ctx.registry.add_generic(self.clone());
        self.session.spawn();
    }

    pub fn accept(&self) -> bool {
        self.session.accept_invitation()
    }

    /// Accept an RTP invitation answering with the `m=` block `media`
    pub fn accept_with_media(&self, media: String) -> bool {
        *self.behavior.local_media.lock() = Some(media);
        self.session.accept_invitation()
    }

    pub fn reject(&self) -> bool {
        self.session.reject_invitation_by_user()
    }

    pub async fn abort(&self, reason: TerminationReason) {
        self.session.terminate_session(reason).await;
    }

    /// Send `data` on the established MSRP stream
    pub async fn send_data(&self, data: Bytes, content_type: &str) -> Result<()> {
        if self.behavior.kind != SessionKind::GenericMsrp {
            return Err(SessionError::invalid_state("data can only be sent on an MSRP session"));
        }
        if self.session.state() != SessionState::Established {
            return Err(SessionError::invalid_state(format!(
                "session {} is {}",
                self.id(),
                self.session.state()
            )));
        }
        let media = self
            .session
            .media()
            .ok_or_else(|| SessionError::invalid_state("session has no media"))?;
        let size = data.len() as u64;
        info!("Send {} bytes of {} on session {}", size, content_type, self.id());
        media.msrp().send_chunks(Cursor::new(data), content_type, size).await?;
        Ok(())
    }
}
