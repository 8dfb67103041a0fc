//! File transfer over MSRP
//!
//! The originating side offers `sendonly` with a `file-selector` and streams
//! the file once the dialog is established. The terminating side answers
//! `recvonly`, writes chunks into a file under the configured root directory
//! and reports the file once the last chunk arrived.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rcs_msrp_core::{ChunkType, MsrpEvent};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::contact::ContactId;
use crate::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use crate::sdp::{FileSelector, MediaDirection, MsrpMediaParams};
use crate::sip::factory::MULTIPART_BOUNDARY;
use crate::sip::SipRequest;

use super::behavior::{InvitationRejection, OfferBody, SessionBehavior};
use super::content::{build_multipart_body, FileIcon, MmContent, FILE_ICON_CID};
use super::listener::{
    FileTransferListener, ListenerSet, SessionErrorListener, SessionStateListener, TransferProgressListener,
};
use super::media::MediaSession;
use super::session::{ImsSession, SessionContext};
use super::state::{SessionDirection, SessionId, SessionKind, TerminationReason};

/// IARI of MSRP file transfer
pub const FT_FEATURE_TAG: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.rcse.ft\"";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub struct FileTransferBehavior {
    direction: SessionDirection,
    content: Mutex<Option<MmContent>>,
    icon: Mutex<Option<FileIcon>>,
    transfer_id: Mutex<String>,
    listeners: ListenerSet<dyn FileTransferListener>,
    incoming: tokio::sync::Mutex<Option<tokio::fs::File>>,
    completed: AtomicBool,
}

impl FileTransferBehavior {
    fn new(direction: SessionDirection, content: Option<MmContent>, icon: Option<FileIcon>) -> Self {
        Self {
            direction,
            content: Mutex::new(content),
            icon: Mutex::new(icon),
            transfer_id: Mutex::new(format!("{}", chrono::Utc::now().timestamp_millis())),
            listeners: ListenerSet::new(),
            incoming: tokio::sync::Mutex::new(None),
            completed: AtomicBool::new(false),
        }
    }

    fn content(&self) -> Result<MmContent> {
        self.content
            .lock()
            .clone()
            .ok_or_else(|| SessionError::invalid_state("file transfer without content"))
    }

    fn destination(&self) -> Option<PathBuf> {
        self.content.lock().as_ref().and_then(|c| c.path().map(Path::to_path_buf))
    }

    async fn write_chunk(&self, data: &[u8]) -> Result<()> {
        let mut incoming = self.incoming.lock().await;
        if incoming.is_none() {
            let path = self
                .destination()
                .ok_or_else(|| SessionError::invalid_state("no destination for received file"))?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            debug!("Saving received file into {}", path.display());
            *incoming = Some(tokio::fs::File::create(&path).await?);
        }
        if let Some(file) = incoming.as_mut() {
            file.write_all(data).await?;
        }
        Ok(())
    }

    async fn finish_file(&self) -> Result<()> {
        if let Some(mut file) = self.incoming.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Remove what was written of an incomplete file
    async fn discard_file(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        let opened = self.incoming.lock().await.take().is_some();
        if !opened {
            return;
        }
        if let Some(path) = self.destination() {
            info!("Deleting incomplete file {}", path.display());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Cannot delete {}: {}", path.display(), e);
            }
        }
    }

    fn notify_transferred(&self, session: &ImsSession) {
        let Ok(content) = self.content() else {
            return;
        };
        self.listeners
            .for_each(|l| l.on_file_transferred(session.id(), session.contact(), &content));
    }
}

/// Keep only the last path component of a received file name
fn sanitize_file_name(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        "file".to_string()
    } else {
        name.to_string()
    }
}

#[async_trait]
impl SessionBehavior for FileTransferBehavior {
    fn kind(&self) -> SessionKind {
        SessionKind::FileTransfer
    }

    fn feature_tags(&self) -> Vec<String> {
        vec![FT_FEATURE_TAG.to_string()]
    }

    fn accept_tags(&self) -> Vec<String> {
        vec![FT_FEATURE_TAG.to_string()]
    }

    fn requires_file_selector(&self) -> bool {
        true
    }

    fn build_offer(&self, session: &ImsSession, media: Option<&MediaSession>) -> Result<OfferBody> {
        let media = media.ok_or_else(|| SessionError::invalid_state("file transfer without media"))?;
        let content = self.content()?;
        let selector = FileSelector::new(content.name(), content.mime_type(), content.size());
        let icon = self.icon.lock().clone();

        let mut builder = session
            .msrp_sdp(media)
            .accept_types(content.mime_type())
            .file_transfer_id(self.transfer_id.lock().clone())
            .file_disposition("attachment")
            .file_selector(selector.to_string())
            .direction(MediaDirection::SendOnly)
            .max_size(session.settings().max_file_transfer_size());
        if icon.is_some() {
            builder = builder.file_icon(format!("cid:{}", FILE_ICON_CID));
        }
        let sdp = builder.build();

        Ok(match icon {
            Some(icon) => OfferBody {
                content_type: format!("multipart/mixed;boundary={}", MULTIPART_BOUNDARY),
                body: build_multipart_body(MULTIPART_BOUNDARY, &sdp, &icon),
                sdp,
            },
            None => OfferBody::sdp(sdp),
        })
    }

    fn build_answer(
        &self,
        session: &ImsSession,
        media: Option<&MediaSession>,
        remote: Option<&MsrpMediaParams>,
    ) -> Result<String> {
        let media = media.ok_or_else(|| SessionError::invalid_state("file transfer without media"))?;
        let content = self.content()?;
        let accept_types = remote
            .and_then(|r| r.accept_types.clone())
            .unwrap_or_else(|| content.mime_type().to_string());
        let selector = remote
            .and_then(|r| r.file_selector.clone())
            .unwrap_or_else(|| FileSelector::new(content.name(), content.mime_type(), content.size()));

        Ok(session
            .msrp_sdp(media)
            .accept_types(accept_types)
            .file_transfer_id(self.transfer_id.lock().clone())
            .file_selector(selector.to_string())
            .direction(MediaDirection::RecvOnly)
            .max_size(session.settings().max_file_transfer_size())
            .build())
    }

    fn check_invitation(
        &self,
        session: &ImsSession,
        remote: Option<&MsrpMediaParams>,
        icon: Option<FileIcon>,
    ) -> std::result::Result<(), InvitationRejection> {
        let Some(selector) = remote.and_then(|r| r.file_selector.as_ref()) else {
            return Err(InvitationRejection::new(
                415,
                ImsServiceError::new(ErrorCode::SessionInitiationFailed, "missing file-selector"),
            ));
        };
        let size = selector.size.unwrap_or(0);
        let max = session.settings().max_file_transfer_size();
        if max > 0 && size > max {
            info!("Incoming file of {} bytes exceeds the {} bytes limit", size, max);
            return Err(InvitationRejection::new(
                403,
                ImsServiceError::new(
                    ErrorCode::MediaSizeTooBig,
                    format!("file of {} bytes exceeds {} bytes", size, max),
                ),
            ));
        }

        let name = sanitize_file_name(selector.name.as_deref().unwrap_or("file"));
        let mime_type = selector.mime_type.clone().unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let destination = session.settings().file_root_directory().join(&name);
        *self.content.lock() = Some(MmContent::incoming(name, mime_type, size, destination));
        *self.icon.lock() = icon;
        if let Some(id) = remote.and_then(|r| r.file_transfer_id.clone()) {
            *self.transfer_id.lock() = id;
        }
        Ok(())
    }

    fn auto_accept(&self, session: &ImsSession) -> bool {
        let Ok(content) = self.content() else {
            return false;
        };
        let settings = session.settings();
        let warn_size = settings.warn_file_transfer_size();
        if warn_size > 0 && content.size() > warn_size {
            debug!("File of {} bytes above warn size, no auto accept", content.size());
            return false;
        }
        settings.ft_auto_accept() && (!session.network().is_roaming() || settings.ft_auto_accept_in_roaming())
    }

    fn on_auto_accepted(&self, session: &ImsSession) {
        let Ok(content) = self.content() else {
            return;
        };
        let icon = self.icon.lock().clone();
        self.listeners.for_each(|l| {
            l.on_session_auto_accepted(session.id(), session.contact(), &content, icon.as_ref())
        });
    }

    async fn on_established(&self, session: &Arc<ImsSession>) -> Result<()> {
        if self.direction == SessionDirection::Terminating {
            return Ok(());
        }
        let media = session
            .media()
            .ok_or_else(|| SessionError::invalid_state("no media to send the file on"))?;
        let content = self.content()?;
        let reader = content.open_reader().await?;
        info!("Start sending {} ({} bytes)", content.name(), content.size());
        media.msrp().spawn_send_chunks(
            reader,
            self.transfer_id.lock().clone(),
            content.mime_type().to_string(),
            content.size(),
            ChunkType::FileSharing,
        );
        Ok(())
    }

    async fn on_media_event(&self, session: &Arc<ImsSession>, event: MsrpEvent) {
        match event {
            MsrpEvent::TransferProgress { current, total } => session.notify_progress(current, total),
            MsrpEvent::DataTransferred { message_id } => {
                debug!("File transfer {} acknowledged", message_id);
                if session.complete_transfer().await {
                    self.notify_transferred(session);
                }
            }
            MsrpEvent::TransferError { error, .. } => {
                session.handle_media_error(ImsServiceError::media(&error)).await;
            }
            MsrpEvent::ChunkReceived { data, current, total, .. } => {
                if let Err(e) = self.write_chunk(&data).await {
                    warn!("Cannot save received chunk: {}", e);
                    self.discard_file().await;
                    session
                        .handle_media_error(ImsServiceError::new(ErrorCode::MediaSavingFailed, e.to_string()))
                        .await;
                    return;
                }
                session.notify_progress(current, total);
            }
            MsrpEvent::DataReceived { .. } => {
                if let Err(e) = self.finish_file().await {
                    self.discard_file().await;
                    session
                        .handle_media_error(ImsServiceError::new(ErrorCode::MediaSavingFailed, e.to_string()))
                        .await;
                    return;
                }
                if session.complete_reception() {
                    info!("File of session {} received", session.id());
                    self.notify_transferred(session);
                }
            }
            MsrpEvent::TransferAborted => {
                info!("Incoming file of session {} aborted by remote", session.id());
                self.discard_file().await;
            }
            MsrpEvent::ConnectionClosed => {
                if self.direction == SessionDirection::Terminating
                    && !self.completed.load(Ordering::SeqCst)
                    && !session.is_terminal()
                {
                    self.discard_file().await;
                    session
                        .handle_media_error(ImsServiceError::new(
                            ErrorCode::MediaTransferFailed,
                            "MSRP connection closed before the file was received",
                        ))
                        .await;
                }
            }
        }
    }

    async fn on_media_closed(&self, _session: &Arc<ImsSession>) {
        self.discard_file().await;
    }
}

/// A file transfer session
#[derive(Clone)]
pub struct FileSharingSession {
    session: Arc<ImsSession>,
    behavior: Arc<FileTransferBehavior>,
}

impl FileSharingSession {
    /// Transfer `content` to `contact`
    pub fn outgoing(
        ctx: Arc<SessionContext>,
        contact: ContactId,
        content: MmContent,
        icon: Option<FileIcon>,
    ) -> Self {
        let behavior = Arc::new(FileTransferBehavior::new(SessionDirection::Originating, Some(content), icon));
        let session = Arc::new(ImsSession::originating(ctx, behavior.clone(), contact));
        Self { session, behavior }
    }

    /// Session for a received file transfer INVITE
    pub fn incoming(ctx: Arc<SessionContext>, contact: ContactId, invite: &SipRequest) -> Self {
        let behavior = Arc::new(FileTransferBehavior::new(SessionDirection::Terminating, None, None));
        let session = Arc::new(ImsSession::terminating(ctx, behavior.clone(), contact, invite));
        Self { session, behavior }
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn core(&self) -> &Arc<ImsSession> {
        &self.session
    }

    /// File being sent or received, known once an incoming offer was vetted
    pub fn content(&self) -> Option<MmContent> {
        self.behavior.content.lock().clone()
    }

    pub fn file_icon(&self) -> Option<FileIcon> {
        self.behavior.icon.lock().clone()
    }

    pub fn transfer_id(&self) -> String {
        self.behavior.transfer_id.lock().clone()
    }

    pub fn add_listener<L>(&self, listener: Arc<L>)
    where
        L: SessionStateListener + TransferProgressListener + SessionErrorListener + FileTransferListener + 'static,
    {
        self.session.add_state_listener(listener.clone());
        self.session.add_progress_listener(listener.clone());
        self.session.add_error_listener(listener.clone());
        self.behavior.listeners.add(listener);
    }

    pub fn remove_all_listeners(&self) {
        self.session.remove_all_listeners();
        self.behavior.listeners.clear();
    }

    /// Register the session and start its task
    pub fn start(&self) {
        self.session.ctx.registry.add_file_transfer(self.clone());
        self.session.spawn();
    }

    pub fn accept(&self) -> bool {
        self.session.accept_invitation()
    }

    pub fn reject(&self) -> bool {
        self.session.reject_invitation_by_user()
    }

    pub async fn abort(&self, reason: TerminationReason) {
        if let Some(media) = self.session.media() {
            media.msrp().cancel_transfer();
        }
        self.session.terminate_session(reason).await;
    }

    pub fn is_initiated_by_remote(&self) -> bool {
        self.session.direction() == SessionDirection::Terminating
    }
}
