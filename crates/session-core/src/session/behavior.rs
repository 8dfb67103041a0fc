//! Per-kind capabilities plugged into the shared session state machine

use std::sync::Arc;

use async_trait::async_trait;
use rcs_msrp_core::MsrpEvent;
use tracing::debug;

use crate::config::SettingsProvider;
use crate::errors::{ImsServiceError, Result};
use crate::sdp::{create_setup_offer, MsrpMediaParams, SetupRole};

use super::content::FileIcon;
use super::media::MediaSession;
use super::session::ImsSession;
use super::state::SessionKind;

/// Body of an outgoing INVITE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferBody {
    pub content_type: String,
    pub body: String,
    /// SDP part of `body`, kept as the dialog's local content
    pub sdp: String,
}

impl OfferBody {
    /// Plain SDP body
    pub fn sdp(sdp: String) -> Self {
        Self {
            content_type: crate::sip::SDP_CONTENT_TYPE.to_string(),
            body: sdp.clone(),
            sdp,
        }
    }
}

/// Final response a terminating session sends when it refuses an invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationRejection {
    pub status: u16,
    pub error: ImsServiceError,
}

impl InvitationRejection {
    pub fn new(status: u16, error: ImsServiceError) -> Self {
        Self { status, error }
    }
}

/// What distinguishes one session kind from another
///
/// [`ImsSession`] owns the SIP/MSRP state machine; a behavior only builds
/// bodies, vets invitations and reacts to media events.
#[async_trait]
pub trait SessionBehavior: Send + Sync {
    fn kind(&self) -> SessionKind;

    /// Tags added to our Contact header
    fn feature_tags(&self) -> Vec<String>;

    /// Tags required in the remote's Contact (Accept-Contact)
    fn accept_tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn setup_offer(&self, settings: &dyn SettingsProvider) -> SetupRole {
        create_setup_offer(settings.behind_nat())
    }

    /// Keep incoming MSRP chunks and hand over whole messages
    fn buffer_incoming(&self) -> bool {
        false
    }

    /// Terminating side refuses an offer without `file-selector`
    fn requires_file_selector(&self) -> bool {
        false
    }

    /// Send 180 before the invitation is vetted
    fn early_ringing(&self) -> bool {
        false
    }

    fn build_offer(&self, session: &ImsSession, media: Option<&MediaSession>) -> Result<OfferBody>;

    fn build_answer(
        &self,
        session: &ImsSession,
        media: Option<&MediaSession>,
        remote: Option<&MsrpMediaParams>,
    ) -> Result<String>;

    /// Vet an incoming invitation before anyone is told about it
    fn check_invitation(
        &self,
        _session: &ImsSession,
        _remote: Option<&MsrpMediaParams>,
        _icon: Option<FileIcon>,
    ) -> std::result::Result<(), InvitationRejection> {
        Ok(())
    }

    /// Whether the invitation is accepted without asking the user
    fn auto_accept(&self, _session: &ImsSession) -> bool {
        false
    }

    fn on_auto_accepted(&self, _session: &ImsSession) {}

    /// Media is up and the session is established
    async fn on_established(&self, _session: &Arc<ImsSession>) -> Result<()> {
        Ok(())
    }

    async fn on_media_event(&self, session: &Arc<ImsSession>, event: MsrpEvent) {
        match event {
            MsrpEvent::TransferProgress { current, total } => session.notify_progress(current, total),
            MsrpEvent::TransferError { error, .. } => {
                session.handle_media_error(ImsServiceError::media(&error)).await;
            }
            other => debug!("Session {} ignores MSRP event {:?}", session.id(), other),
        }
    }

    /// The media event loop of the session stopped
    async fn on_media_closed(&self, _session: &Arc<ImsSession>) {}
}
