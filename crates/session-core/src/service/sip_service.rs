//! Generic SIP sessions of service extensions

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contact::{remote_contact, ContactId};
use crate::dialog::generate_tag;
use crate::errors::{Result, SessionError};
use crate::sdp::parse_sdp;
use crate::session::content::split_invite_body;
use crate::session::{extension_feature_tag, GenericSipSession, SessionContext, SessionKind};
use crate::sip::SipRequest;

use super::core_listener::CoreListener;
use super::dispatch::DispatchQueues;
use super::registry::SessionRegistry;

/// Media kind an invitation negotiates: MSRP when it offers an `m=message` block
pub fn invitation_session_kind(invite: &SipRequest) -> SessionKind {
    let is_msrp = split_invite_body(invite)
        .ok()
        .and_then(|(sdp, _)| parse_sdp(&sdp).ok())
        .is_some_and(|sdp| sdp.media.iter().any(|m| m.media.eq_ignore_ascii_case("message")));
    if is_msrp {
        SessionKind::GenericMsrp
    } else {
        SessionKind::GenericRtp
    }
}

/// Send a final response to an INVITE that never gets a session
pub(crate) async fn reject_out_of_session(ctx: &SessionContext, invite: &SipRequest, code: u16) {
    let response = ctx.factory.create_response(invite, Some(&generate_tag()), code);
    if let Err(e) = ctx.transport.send_response(response).await {
        warn!("Failed to send {} for rejected invitation: {}", code, e);
    }
}

/// Resolve the remote contact of an invitation and screen it
///
/// Answers 488 when no phone identity can be extracted and 603 when the
/// contact is blocked. `None` means the invitation has been answered.
pub(crate) async fn screen_invitation(ctx: &SessionContext, invite: &SipRequest) -> Option<ContactId> {
    let Some(contact) = remote_contact(invite) else {
        warn!("Invitation without a valid remote identity");
        reject_out_of_session(ctx, invite, 488).await;
        return None;
    };
    if ctx.contacts.is_blocked(&contact) {
        info!("Contact {} is blocked: decline invitation", contact);
        reject_out_of_session(ctx, invite, 603).await;
        return None;
    }
    Some(contact)
}

pub struct SipService {
    ctx: Arc<SessionContext>,
    queues: Arc<DispatchQueues>,
}

impl SipService {
    pub fn new(ctx: Arc<SessionContext>, queues: Arc<DispatchQueues>) -> Self {
        Self { ctx, queues }
    }

    fn registry(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    /// Start an MSRP session of the extension `service_id`
    pub fn initiate_msrp_session(&self, contact: ContactId, service_id: &str) -> GenericSipSession {
        info!("Initiate MSRP session with {} for service {}", contact, service_id);
        let session = GenericSipSession::outgoing_msrp(self.ctx.clone(), contact, extension_feature_tag(service_id));
        session.start();
        session
    }

    /// Start an RTP session of the extension `service_id` offering `media`
    pub fn initiate_rtp_session(&self, contact: ContactId, service_id: &str, media: String) -> GenericSipSession {
        info!("Initiate RTP session with {} for service {}", contact, service_id);
        let session =
            GenericSipSession::outgoing_rtp(self.ctx.clone(), contact, extension_feature_tag(service_id), media);
        session.start();
        session
    }

    /// Handle an invitation of the extension `service_id` on its queue
    pub fn receive_invitation(
        &self,
        invite: SipRequest,
        service_id: String,
        listener: Arc<dyn CoreListener>,
    ) -> Result<()> {
        let kind = invitation_session_kind(&invite);
        let ctx = self.ctx.clone();
        let task = async move {
            let Some(contact) = screen_invitation(&ctx, &invite).await else {
                return;
            };
            debug!("Incoming {:?} invitation from {} for service {}", kind, contact, service_id);
            let session =
                GenericSipSession::incoming(ctx, contact, &invite, kind, extension_feature_tag(&service_id));
            listener.on_sip_session_invitation(&session);
            session.start();
        };
        match kind {
            SessionKind::GenericRtp => self.queues.streaming.submit(task),
            _ => self.queues.messaging.submit(task),
        }
    }

    pub fn get_msrp_session(&self, id: &crate::session::SessionId) -> Option<GenericSipSession> {
        self.registry().get_generic_msrp(id)
    }

    pub fn get_rtp_session(&self, id: &crate::session::SessionId) -> Option<GenericSipSession> {
        self.registry().get_generic_rtp(id)
    }

    pub fn sessions(&self) -> Vec<GenericSipSession> {
        self.registry().generic_sessions()
    }

    /// Sessions of the extension `service_id` with `contact`
    pub fn sessions_with(&self, contact: &ContactId, service_id: &str) -> Vec<GenericSipSession> {
        let tag = extension_feature_tag(service_id);
        self.sessions()
            .into_iter()
            .filter(|s| s.core().contact() == contact && s.feature_tag() == tag)
            .collect()
    }

    /// Look up a session the caller expects to exist
    pub fn session(&self, id: &crate::session::SessionId) -> Result<GenericSipSession> {
        self.get_msrp_session(id)
            .or_else(|| self.get_rtp_session(id))
            .ok_or_else(|| SessionError::session_not_found(id.to_string()))
    }
}
