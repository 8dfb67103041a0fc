//! The IMS session state machine
//!
//! One [`ImsSession`] drives a SIP INVITE dialog and, for MSRP kinds, the
//! media transport negotiated through it. Kind specific work is delegated to
//! a [`SessionBehavior`]. The direction specific `run` flows live in
//! `originating.rs` and `terminating.rs`.
//!
//! Every terminal path goes through [`ImsSession::try_finish`], so exactly one
//! of them wins and exactly one terminal notification is delivered. Winners
//! close the media before removing the session from the registry and notify
//! listeners last.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use rcs_msrp_core::MsrpEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{NetworkInfo, SettingsProvider};
use crate::contact::{ContactId, ContactManager};
use crate::dialog::DialogPath;
use crate::errors::{ErrorCode, ImsServiceError, Result};
use crate::sdp::{MsrpMediaParams, SdpBuilder, SetupRole, MSRPS_PROTOCOL, MSRP_PROTOCOL};
use crate::service::registry::SessionRegistry;
use crate::sip::{SessionAuthenticationAgent, SipMessageFactory, SipRequest, SipTransport};

use super::behavior::SessionBehavior;
use super::invitation::{InvitationAnswer, InvitationGate};
use super::listener::{ListenerSet, SessionErrorListener, SessionStateListener, TransferProgressListener};
use super::media::{self, MediaSession};
use super::state::{SessionDirection, SessionId, SessionKind, SessionState, TerminationReason};

/// Collaborators shared by every session of an IMS module
pub struct SessionContext {
    pub settings: Arc<dyn SettingsProvider>,
    pub network: Arc<dyn NetworkInfo>,
    pub transport: Arc<dyn SipTransport>,
    pub factory: SipMessageFactory,
    pub contacts: Arc<dyn ContactManager>,
    pub registry: Arc<SessionRegistry>,
}

impl SessionContext {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        network: Arc<dyn NetworkInfo>,
        transport: Arc<dyn SipTransport>,
        contacts: Arc<dyn ContactManager>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let contact_uri = format!("<{}>", settings.local_user());
        let factory = SipMessageFactory::new(contact_uri, settings.user_agent());
        Self {
            settings,
            network,
            transport,
            factory,
            contacts,
            registry,
        }
    }
}

pub struct ImsSession {
    id: SessionId,
    direction: SessionDirection,
    contact: ContactId,
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) behavior: Arc<dyn SessionBehavior>,
    pub(crate) dialog: Mutex<DialogPath>,
    state: Mutex<SessionState>,
    pub(crate) auth: Mutex<SessionAuthenticationAgent>,
    pub(crate) gate: InvitationGate,
    media: Mutex<Option<Arc<MediaSession>>>,
    pub(crate) remote_media: Mutex<Option<MsrpMediaParams>>,
    cancel: CancellationToken,
    state_listeners: ListenerSet<dyn SessionStateListener>,
    progress_listeners: ListenerSet<dyn TransferProgressListener>,
    error_listeners: ListenerSet<dyn SessionErrorListener>,
}

impl ImsSession {
    fn with_dialog(
        ctx: Arc<SessionContext>,
        behavior: Arc<dyn SessionBehavior>,
        direction: SessionDirection,
        contact: ContactId,
        dialog: DialogPath,
    ) -> Self {
        let (username, password) = ctx.settings.digest_credentials();
        Self {
            id: SessionId::new(),
            direction,
            contact,
            behavior,
            dialog: Mutex::new(dialog),
            state: Mutex::new(SessionState::Created),
            auth: Mutex::new(SessionAuthenticationAgent::new(username, password)),
            gate: InvitationGate::new(),
            media: Mutex::new(None),
            remote_media: Mutex::new(None),
            cancel: CancellationToken::new(),
            state_listeners: ListenerSet::new(),
            progress_listeners: ListenerSet::new(),
            error_listeners: ListenerSet::new(),
            ctx,
        }
    }

    /// Session we initiate towards `contact`
    pub fn originating(ctx: Arc<SessionContext>, behavior: Arc<dyn SessionBehavior>, contact: ContactId) -> Self {
        let remote_uri = contact.to_tel_uri();
        let host = ctx.network.local_ip().to_string();
        let mut dialog = DialogPath::originating(
            crate::dialog::generate_call_id(&host),
            remote_uri.clone(),
            ctx.settings.local_user(),
            remote_uri,
        );
        dialog.set_session_expire(ctx.settings.session_expire());
        Self::with_dialog(ctx, behavior, SessionDirection::Originating, contact, dialog)
    }

    /// Session created by a received INVITE
    pub fn terminating(
        ctx: Arc<SessionContext>,
        behavior: Arc<dyn SessionBehavior>,
        contact: ContactId,
        invite: &SipRequest,
    ) -> Self {
        let dialog = DialogPath::terminating(invite, ctx.settings.local_user());
        let session = Self::with_dialog(ctx, behavior, SessionDirection::Terminating, contact, dialog);
        *session.state.lock() = SessionState::InviteReceived;
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn direction(&self) -> SessionDirection {
        self.direction
    }

    pub fn kind(&self) -> SessionKind {
        self.behavior.kind()
    }

    pub fn contact(&self) -> &ContactId {
        &self.contact
    }

    pub fn call_id(&self) -> String {
        self.dialog.lock().call_id().to_string()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn settings(&self) -> &dyn SettingsProvider {
        self.ctx.settings.as_ref()
    }

    pub fn network(&self) -> &dyn NetworkInfo {
        self.ctx.network.as_ref()
    }

    pub fn local_sdp(&self) -> Option<String> {
        self.dialog.lock().local_content().map(str::to_string)
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.dialog.lock().remote_content().map(str::to_string)
    }

    pub fn add_state_listener(&self, listener: Arc<dyn SessionStateListener>) {
        self.state_listeners.add(listener);
    }

    pub fn add_progress_listener(&self, listener: Arc<dyn TransferProgressListener>) {
        self.progress_listeners.add(listener);
    }

    pub fn add_error_listener(&self, listener: Arc<dyn SessionErrorListener>) {
        self.error_listeners.add(listener);
    }

    pub fn remove_all_listeners(&self) {
        self.state_listeners.clear();
        self.progress_listeners.clear();
        self.error_listeners.clear();
    }

    /// Move to a non-terminal state. Ignored once the session has finished.
    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        debug!("Session {} state {} -> {}", self.id, *state, next);
        *state = next;
    }

    /// Enter `terminal` unless the session already finished
    ///
    /// Returns true for the single caller that performed the transition.
    pub(crate) fn try_finish(&self, terminal: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            debug!(
                "Session {} already {}, ignoring {}",
                self.id, *state, terminal
            );
            return false;
        }
        debug!("Session {} state {} -> {}", self.id, *state, terminal);
        *state = terminal;
        true
    }

    /// Await `fut` unless the session is interrupted first
    pub(crate) async fn interruptible<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the session's background task
    pub(crate) fn spawn(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let run = AssertUnwindSafe(Arc::clone(&session).run()).catch_unwind();
            if let Err(panic) = run.await {
                let message = panic_message(panic.as_ref());
                error!("Session {} task panicked: {}", session.id, message);
                session.handle_error(ImsServiceError::new(ErrorCode::UnexpectedException, message));
            }
        });
    }

    async fn run(self: Arc<Self>) {
        let result = match self.direction {
            SessionDirection::Originating => self.run_originating().await,
            SessionDirection::Terminating => self.run_terminating().await,
        };
        if let Err(e) = result {
            if self.is_interrupted() {
                debug!("Session {} interrupted: {}", self.id, e);
                return;
            }
            error!("Session {} initiation has failed: {}", self.id, e);
            self.handle_error(ImsServiceError::initiation(&e));
        }
    }

    pub(crate) fn media(&self) -> Option<Arc<MediaSession>> {
        self.media.lock().clone()
    }

    /// Install the session's transport and start delivering its events
    pub(crate) fn install_media(self: &Arc<Self>, media: MediaSession) -> Arc<MediaSession> {
        let media = Arc::new(media);
        if let Some(previous) = self.media.lock().replace(Arc::clone(&media)) {
            previous.close();
        }
        if let Some(mut events) = media.take_events() {
            let session = Arc::clone(self);
            let closed = media.closed_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = closed.cancelled() => break,
                        event = events.recv() => match event {
                            Some(event) => session.dispatch_media_event(event).await,
                            None => break,
                        },
                    }
                }
                session.behavior.on_media_closed(&session).await;
            });
        }
        media
    }

    async fn dispatch_media_event(self: &Arc<Self>, event: MsrpEvent) {
        let behavior = Arc::clone(&self.behavior);
        let handled = AssertUnwindSafe(behavior.on_media_event(self, event)).catch_unwind().await;
        if let Err(panic) = handled {
            let message = panic_message(panic.as_ref());
            error!("Session {} media handler panicked: {}", self.id, message);
            self.handle_media_error(ImsServiceError::new(ErrorCode::UnexpectedException, message))
                .await;
        }
    }

    /// Allocate the local MSRP endpoint for `role` and install it
    pub(crate) async fn allocate_media(self: &Arc<Self>, role: SetupRole, secured: bool) -> Result<Arc<MediaSession>> {
        let ip = self.ctx.network.local_ip();
        let media = MediaSession::allocate(
            role,
            ip,
            secured,
            self.ctx.settings.as_ref(),
            self.behavior.buffer_incoming(),
        )
        .await?;
        if secured {
            media::configure_tls(&media, role != SetupRole::Active, self.ctx.settings.as_ref())?;
        }
        Ok(self.install_media(media))
    }

    /// Secure MSRP is used over Wi-Fi when enabled in settings
    pub(crate) fn wants_secured_msrp(&self) -> bool {
        self.ctx.network.is_wifi() && self.ctx.settings.secure_msrp_over_wifi()
    }

    /// SDP skeleton of an MSRP media line for `media`
    pub fn msrp_sdp(&self, media: &MediaSession) -> SdpBuilder {
        let path = media.local_path();
        let protocol = if path.secure { MSRPS_PROTOCOL } else { MSRP_PROTOCOL };
        let mut builder = SdpBuilder::new(self.ctx.network.local_ip())
            .msrp_media(media.advertised_port(), protocol)
            .path(path.to_string())
            .setup(media.role());
        if path.secure {
            if let Some(fingerprint) = media::local_fingerprint(self.ctx.settings.as_ref()) {
                builder = builder.fingerprint(fingerprint);
            }
        }
        builder
    }

    /// Close the media transport. Safe without one and when called twice.
    pub(crate) fn close_media(&self) {
        if let Some(media) = self.media.lock().take() {
            debug!("Close media session of {}", self.id);
            media.close();
        }
    }

    fn remove_from_registry(&self) {
        self.ctx.registry.remove(&self.id);
    }

    pub(crate) fn notify_progress(&self, current: u64, total: u64) {
        self.progress_listeners
            .for_each(|l| l.on_transfer_progress(&self.id, &self.contact, current, total));
    }

    pub(crate) fn notify_state(&self, mut f: impl FnMut(&dyn SessionStateListener, &SessionId, &ContactId)) {
        self.state_listeners.for_each(|l| f(l, &self.id, &self.contact));
    }

    fn notify_error(&self, error: &ImsServiceError) {
        self.error_listeners
            .for_each(|l| l.on_session_error(&self.id, &self.contact, error));
    }

    /// Send a BYE if the dialog reached the signalling established stage
    pub(crate) async fn send_bye(&self) {
        let bye = {
            let mut dialog = self.dialog.lock();
            if !dialog.is_sig_established() || dialog.is_session_terminated() {
                return;
            }
            dialog.session_terminated();
            self.ctx.factory.create_bye(&mut dialog)
        };
        info!("Send BYE for session {}", self.id);
        let timeout = self.ctx.settings.sip_transaction_timeout();
        match tokio::time::timeout(timeout, self.ctx.transport.send_request_and_wait(bye, timeout)).await {
            Ok(Ok(response)) if response.is_success() => debug!("BYE of session {} acknowledged", self.id),
            Ok(Ok(response)) => warn!("BYE of session {} answered {}", self.id, response.status),
            Ok(Err(e)) => warn!("BYE of session {} failed: {}", self.id, e),
            Err(_) => warn!("BYE of session {} timed out", self.id),
        }
    }

    /// Send a final error response to the received INVITE
    pub(crate) async fn send_error_response(&self, code: u16) {
        let response = self.ctx.factory.create_error_response(&self.dialog.lock(), code);
        let Some(response) = response else {
            warn!("Session {} has no INVITE to answer with {}", self.id, code);
            return;
        };
        info!("Send {} response for session {}", code, self.id);
        if let Err(e) = self.ctx.transport.send_response(response).await {
            warn!("Cannot send {} for session {}: {}", code, self.id, e);
        }
    }

    async fn send_cancel(&self) {
        let cancel = {
            let mut dialog = self.dialog.lock();
            dialog.session_cancelled();
            self.ctx.factory.create_cancel(&dialog)
        };
        info!("Send CANCEL for session {}", self.id);
        if let Err(e) = self.ctx.transport.send_request(cancel).await {
            warn!("Cannot send CANCEL for session {}: {}", self.id, e);
        }
    }

    /// Fail the session with `error`
    ///
    /// No-op once the session finished; a second call delivers nothing.
    pub fn handle_error(&self, error: ImsServiceError) {
        if !self.try_finish(SessionState::Failed) {
            return;
        }
        info!("Session {} error: {}", self.id, error);
        self.cancel.cancel();
        self.gate.resolve(InvitationAnswer::RejectedBySystem);
        self.close_media();
        self.remove_from_registry();
        self.notify_error(&error);
    }

    /// Fail an established session after a media problem, hanging up the dialog
    pub async fn handle_media_error(&self, error: ImsServiceError) {
        if !self.try_finish(SessionState::Failed) {
            return;
        }
        info!("Session {} media error: {}", self.id, error);
        self.cancel.cancel();
        self.close_media();
        self.send_bye().await;
        self.remove_from_registry();
        self.notify_error(&error);
    }

    /// Reject the invitation with a final response and an error notification
    pub(crate) async fn reject_invitation(&self, status: u16, error: ImsServiceError) {
        if !self.try_finish(SessionState::Failed) {
            return;
        }
        info!("Reject invitation {} with {}: {}", self.id, status, error);
        self.cancel.cancel();
        self.close_media();
        self.send_error_response(status).await;
        self.remove_from_registry();
        self.notify_error(&error);
    }

    /// Finish as rejected, optionally answering the INVITE first
    pub(crate) async fn finish_rejected(&self, status: Option<u16>, reason: TerminationReason) {
        if !self.try_finish(SessionState::Rejected) {
            return;
        }
        self.cancel.cancel();
        self.close_media();
        if let Some(status) = status {
            self.send_error_response(status).await;
        }
        self.remove_from_registry();
        self.notify_state(|l, id, contact| l.on_session_rejected(id, contact, reason));
    }

    /// Remove without any notification (system level abort)
    pub(crate) fn finish_silently(&self, terminal: SessionState) {
        if self.try_finish(terminal) {
            debug!("Session {} removed silently", self.id);
            self.cancel.cancel();
            self.close_media();
            self.remove_from_registry();
        }
    }

    /// Mark the transfer done and release the dialog
    ///
    /// Returns true for the caller that completed it; that caller notifies.
    pub(crate) async fn complete_transfer(&self) -> bool {
        if !self.try_finish(SessionState::Transferred) {
            return false;
        }
        self.close_media();
        self.send_bye().await;
        self.remove_from_registry();
        true
    }

    /// Finish a received transfer; the remote hangs up the dialog
    pub(crate) fn complete_reception(&self) -> bool {
        if !self.try_finish(SessionState::Transferred) {
            return false;
        }
        self.close_media();
        self.remove_from_registry();
        true
    }

    /// Abort the session from our side
    ///
    /// Hangs up with BYE once signalling is established; before that the
    /// originating side sends CANCEL and the terminating side 603.
    pub async fn terminate_session(&self, reason: TerminationReason) {
        let established = self.dialog.lock().is_session_established();
        let target = if established {
            SessionState::Aborted
        } else {
            SessionState::Rejected
        };
        if !self.try_finish(target) {
            return;
        }
        info!("Terminate session {} ({:?})", self.id, reason);
        self.cancel.cancel();
        self.gate.resolve(InvitationAnswer::RejectedBySystem);
        self.close_media();

        let sig_established = self.dialog.lock().is_sig_established();
        if sig_established {
            self.send_bye().await;
        } else {
            match self.direction {
                SessionDirection::Originating => {
                    if self.state_was_invited() {
                        self.send_cancel().await;
                    }
                }
                SessionDirection::Terminating => self.send_error_response(603).await,
            }
        }

        self.remove_from_registry();
        if established {
            self.notify_state(|l, id, contact| l.on_session_aborted(id, contact, reason));
        } else {
            self.notify_state(|l, id, contact| l.on_session_rejected(id, contact, reason));
        }
    }

    fn state_was_invited(&self) -> bool {
        self.dialog.lock().invite().is_some()
    }

    /// Handle a BYE from the remote
    pub async fn receive_bye(&self, bye: &SipRequest) {
        info!("Session {} received BYE", self.id);
        let won = self.try_finish(SessionState::Aborted);
        let local_tag = self.dialog.lock().local_tag().to_string();
        let ok = self.ctx.factory.create_response(bye, Some(&local_tag), 200);
        if let Err(e) = self.ctx.transport.send_response(ok).await {
            warn!("Cannot answer BYE of session {}: {}", self.id, e);
        }
        self.dialog.lock().session_terminated();
        self.cancel.cancel();
        self.close_media();
        self.remove_from_registry();
        if won {
            self.notify_state(|l, id, contact| {
                l.on_session_aborted(id, contact, TerminationReason::ByRemote)
            });
        }
    }

    /// Handle a CANCEL of the INVITE that created this session
    pub async fn receive_cancel(&self, cancel: &SipRequest) {
        let ok = self.ctx.factory.create_response(cancel, None, 200);
        if let Err(e) = self.ctx.transport.send_response(ok).await {
            warn!("Cannot answer CANCEL of session {}: {}", self.id, e);
        }
        if self.dialog.lock().is_sig_established() {
            debug!("Session {} already established, CANCEL ignored", self.id);
            return;
        }
        info!("Session {} cancelled by remote", self.id);
        if self.try_finish(SessionState::Rejected) {
            self.cancel.cancel();
            self.dialog.lock().session_cancelled();
            self.close_media();
            self.send_error_response(487).await;
            self.remove_from_registry();
            self.notify_state(|l, id, contact| {
                l.on_session_rejected(id, contact, TerminationReason::ByRemote)
            });
        }
        self.gate.resolve(InvitationAnswer::Canceled);
    }

    /// Drop the session without telling any listener
    pub fn delete(&self) {
        self.gate.resolve(InvitationAnswer::Deleted);
        if self.try_finish(SessionState::Aborted) {
            info!("Delete session {}", self.id);
            self.cancel.cancel();
            self.close_media();
            self.remove_from_registry();
        }
    }

    /// Accept the pending invitation
    pub fn accept_invitation(&self) -> bool {
        self.gate.resolve(InvitationAnswer::Accepted)
    }

    /// Reject the pending invitation with 603
    pub fn reject_invitation_by_user(&self) -> bool {
        self.gate.resolve(InvitationAnswer::Declined)
    }

    /// Reject the pending invitation with 486
    pub fn reject_invitation_busy(&self) -> bool {
        self.gate.resolve(InvitationAnswer::BusyHere)
    }
}

impl std::fmt::Debug for ImsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsSession")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("direction", &self.direction)
            .field("contact", &self.contact)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
