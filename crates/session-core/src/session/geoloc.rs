//! Geolocation push over MSRP (mobile to mobile content sharing)

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rcs_msrp_core::{ChunkType, MsrpEvent};
use tracing::{debug, info, warn};

use crate::contact::ContactId;
use crate::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use crate::sdp::{create_mobile_to_mobile_setup_offer, FileSelector, MediaDirection, MsrpMediaParams, SetupRole};
use crate::sip::SipRequest;
use crate::config::SettingsProvider;

use super::behavior::{InvitationRejection, OfferBody, SessionBehavior};
use super::content::{FileIcon, Geoloc, MmContent, GEOLOC_CONTENT_TYPE};
use super::listener::{
    GeolocListener, ListenerSet, SessionErrorListener, SessionStateListener, TransferProgressListener,
};
use super::media::MediaSession;
use super::session::{ImsSession, SessionContext};
use super::state::{SessionDirection, SessionId, SessionKind, TerminationReason};

/// IARI of GSMA image/location sharing
pub const GEOLOC_FEATURE_TAG: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.gsma-is\"";

const GEOLOC_FILE_NAME: &str = "geoloc.xml";

pub struct GeolocBehavior {
    direction: SessionDirection,
    geoloc: Mutex<Option<Geoloc>>,
    content: Mutex<Option<MmContent>>,
    listeners: ListenerSet<dyn GeolocListener>,
}

impl GeolocBehavior {
    fn new(direction: SessionDirection, geoloc: Option<Geoloc>, content: Option<MmContent>) -> Self {
        Self {
            direction,
            geoloc: Mutex::new(geoloc),
            content: Mutex::new(content),
            listeners: ListenerSet::new(),
        }
    }

    fn content(&self) -> Result<MmContent> {
        self.content
            .lock()
            .clone()
            .ok_or_else(|| SessionError::invalid_state("geolocation sharing without content"))
    }

    fn notify_transferred(&self, session: &ImsSession, geoloc: &Geoloc) {
        let initiated_by_remote = self.direction == SessionDirection::Terminating;
        self.listeners.for_each(|l| {
            l.on_geoloc_transferred(session.id(), session.contact(), geoloc, initiated_by_remote)
        });
    }
}

#[async_trait]
impl SessionBehavior for GeolocBehavior {
    fn kind(&self) -> SessionKind {
        SessionKind::Geoloc
    }

    fn feature_tags(&self) -> Vec<String> {
        vec![GEOLOC_FEATURE_TAG.to_string()]
    }

    fn accept_tags(&self) -> Vec<String> {
        vec![GEOLOC_FEATURE_TAG.to_string()]
    }

    fn setup_offer(&self, _settings: &dyn SettingsProvider) -> SetupRole {
        create_mobile_to_mobile_setup_offer()
    }

    fn buffer_incoming(&self) -> bool {
        true
    }

    fn early_ringing(&self) -> bool {
        true
    }

    fn build_offer(&self, session: &ImsSession, media: Option<&MediaSession>) -> Result<OfferBody> {
        let media = media.ok_or_else(|| SessionError::invalid_state("geolocation sharing without media"))?;
        let content = self.content()?;
        let selector = FileSelector::new(content.name(), content.mime_type(), content.size());
        let sdp = session
            .msrp_sdp(media)
            .accept_types(GEOLOC_CONTENT_TYPE)
            .file_transfer_id(chrono::Utc::now().timestamp_millis().to_string())
            .file_disposition("render")
            .file_selector(selector.to_string())
            .direction(MediaDirection::SendOnly)
            .build();
        Ok(OfferBody::sdp(sdp))
    }

    fn build_answer(
        &self,
        session: &ImsSession,
        media: Option<&MediaSession>,
        remote: Option<&MsrpMediaParams>,
    ) -> Result<String> {
        let media = media.ok_or_else(|| SessionError::invalid_state("geolocation sharing without media"))?;
        let mut builder = session
            .msrp_sdp(media)
            .accept_types(GEOLOC_CONTENT_TYPE)
            .file_disposition("render")
            .direction(MediaDirection::RecvOnly);
        if let Some(remote) = remote {
            if let Some(id) = &remote.file_transfer_id {
                builder = builder.file_transfer_id(id.clone());
            }
            if let Some(selector) = &remote.file_selector {
                builder = builder.file_selector(selector.to_string());
            }
        }
        Ok(builder.build())
    }

    fn check_invitation(
        &self,
        _session: &ImsSession,
        remote: Option<&MsrpMediaParams>,
        _icon: Option<FileIcon>,
    ) -> std::result::Result<(), InvitationRejection> {
        let supported = remote
            .and_then(|r| r.accept_types.as_deref())
            .is_some_and(|types| {
                types
                    .split_whitespace()
                    .any(|t| t.eq_ignore_ascii_case(GEOLOC_CONTENT_TYPE))
            });
        if !supported {
            return Err(InvitationRejection::new(
                415,
                ImsServiceError::from_code(ErrorCode::UnsupportedMediaType),
            ));
        }
        Ok(())
    }

    async fn on_established(&self, session: &Arc<ImsSession>) -> Result<()> {
        if self.direction == SessionDirection::Terminating {
            return Ok(());
        }
        let media = session
            .media()
            .ok_or_else(|| SessionError::invalid_state("no media to send the geolocation on"))?;
        let content = self.content()?;
        let reader = content.open_reader().await?;
        media.msrp().spawn_send_chunks(
            reader,
            chrono::Utc::now().timestamp_millis().to_string(),
            GEOLOC_CONTENT_TYPE.to_string(),
            content.size(),
            ChunkType::GeoLocation,
        );
        Ok(())
    }

    async fn on_media_event(&self, session: &Arc<ImsSession>, event: MsrpEvent) {
        match event {
            MsrpEvent::TransferProgress { current, total } => session.notify_progress(current, total),
            MsrpEvent::DataTransferred { .. } => {
                if session.complete_transfer().await {
                    if let Some(geoloc) = self.geoloc.lock().clone() {
                        self.notify_transferred(session, &geoloc);
                    }
                }
            }
            MsrpEvent::TransferError { error, .. } => {
                session.handle_media_error(ImsServiceError::media(&error)).await;
            }
            MsrpEvent::DataReceived { data, content_type, .. } => {
                debug!("Geolocation of {:?} received", content_type);
                let document = String::from_utf8_lossy(&data);
                match Geoloc::parse_document(&document) {
                    Ok(geoloc) => {
                        *self.geoloc.lock() = Some(geoloc.clone());
                        if session.complete_reception() {
                            info!("Geolocation of session {} received", session.id());
                            self.notify_transferred(session, &geoloc);
                        }
                    }
                    Err(e) => {
                        warn!("Invalid geolocation document: {}", e);
                        session
                            .handle_media_error(ImsServiceError::new(ErrorCode::MediaTransferFailed, e.to_string()))
                            .await;
                    }
                }
            }
            other => debug!("Geolocation session {} ignores {:?}", session.id(), other),
        }
    }
}

/// A geolocation sharing session
#[derive(Clone)]
pub struct GeolocSharingSession {
    session: Arc<ImsSession>,
    behavior: Arc<GeolocBehavior>,
}

impl GeolocSharingSession {
    /// Share `geoloc` with `contact`
    pub fn outgoing(ctx: Arc<SessionContext>, contact: ContactId, geoloc: Geoloc) -> Self {
        let document = geoloc.to_document(&ctx.settings.local_user());
        let content = MmContent::from_bytes(GEOLOC_FILE_NAME, GEOLOC_CONTENT_TYPE, document.into_bytes());
        let behavior = Arc::new(GeolocBehavior::new(
            SessionDirection::Originating,
            Some(geoloc),
            Some(content),
        ));
        let session = Arc::new(ImsSession::originating(ctx, behavior.clone(), contact));
        Self { session, behavior }
    }

    pub fn incoming(ctx: Arc<SessionContext>, contact: ContactId, invite: &SipRequest) -> Self {
        let behavior = Arc::new(GeolocBehavior::new(SessionDirection::Terminating, None, None));
        let session = Arc::new(ImsSession::terminating(ctx, behavior.clone(), contact, invite));
        Self { session, behavior }
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn core(&self) -> &Arc<ImsSession> {
        &self.session
    }

    /// Shared position; known on the receiving side once transferred
    pub fn geoloc(&self) -> Option<Geoloc> {
        self.behavior.geoloc.lock().clone()
    }

    pub fn add_listener<L>(&self, listener: Arc<L>)
    where
        L: SessionStateListener + TransferProgressListener + SessionErrorListener + GeolocListener + 'static,
    {
        self.session.add_state_listener(listener.clone());
        self.session.add_progress_listener(listener.clone());
        self.session.add_error_listener(listener.clone());
        self.behavior.listeners.add(listener);
    }

    pub fn start(&self) {
        self.session.ctx.registry.add_geoloc_sharing(self.clone());
        self.session.spawn();
    }

    pub fn accept(&self) -> bool {
        self.session.accept_invitation()
    }

    pub fn reject(&self) -> bool {
        self.session.reject_invitation_by_user()
    }

    pub async fn abort(&self, reason: TerminationReason) {
        self.session.terminate_session(reason).await;
    }
}
