//! The IMS module: owner of the collaborators, registries and services
//!
//! Inbound requests enter through [`ImsModule::receive_request`]. INVITEs
//! are routed on their feature tag, in-dialog BYE and CANCEL on their
//! Call-ID, and out-of-dialog MESSAGEs are answered and delivered on the
//! instant-message queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{NetworkInfo, SettingsProvider};
use crate::contact::{remote_contact, ContactManager};
use crate::dialog::generate_tag;
use crate::errors::{Result, SessionError};
use crate::session::{extension_service_id, SessionContext, TerminationReason, FT_FEATURE_TAG, GEOLOC_FEATURE_TAG};
use crate::sip::{headers, SipMethod, SipRequest, SipTransport};

use super::core_listener::CoreListener;
use super::dispatch::DispatchQueues;
use super::imm_manager::ImmManager;
use super::registry::SessionRegistry;
use super::sharing_service::SharingService;
use super::sip_service::SipService;

pub struct ImsModule {
    ctx: Arc<SessionContext>,
    queues: Arc<DispatchQueues>,
    sip_service: SipService,
    sharing_service: SharingService,
    imm_manager: ImmManager,
    listener: Arc<dyn CoreListener>,
    started: AtomicBool,
}

impl ImsModule {
    /// Build the module and its background tasks. Must run inside a tokio runtime.
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        network: Arc<dyn NetworkInfo>,
        transport: Arc<dyn SipTransport>,
        contacts: Arc<dyn ContactManager>,
        listener: Arc<dyn CoreListener>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let ctx = Arc::new(SessionContext::new(settings, network, transport, contacts, registry));
        let queues = Arc::new(DispatchQueues::new());
        Self {
            sip_service: SipService::new(ctx.clone(), queues.clone()),
            sharing_service: SharingService::new(ctx.clone(), queues.clone()),
            imm_manager: ImmManager::start(ctx.clone()),
            ctx,
            queues,
            listener,
            started: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn sip_service(&self) -> &SipService {
        &self.sip_service
    }

    pub fn sharing_service(&self) -> &SharingService {
        &self.sharing_service
    }

    pub fn imm_manager(&self) -> &ImmManager {
        &self.imm_manager
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start accepting inbound requests
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::AcqRel) {
            info!("IMS module started");
        }
    }

    /// Abort every live session, then stop the message manager and the queues
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let sessions = self.registry().all_sessions();
        info!("Stopping IMS module, aborting {} sessions", sessions.len());
        for session in sessions {
            session.core().terminate_session(TerminationReason::BySystem).await;
        }
        self.imm_manager.terminate().await;
        self.queues.shutdown().await;
        info!("IMS module stopped");
    }

    /// Route an inbound request
    pub async fn receive_request(&self, request: SipRequest) -> Result<()> {
        if !self.is_started() {
            return Err(SessionError::invalid_state("IMS module is not started"));
        }
        debug!("Receive {}", request.method);
        match request.method {
            SipMethod::Invite => self.route_invitation(request).await,
            SipMethod::Bye => {
                match self.find_dialog_session(&request) {
                    Some(session) => session.core().receive_bye(&request).await,
                    None => self.respond(&request, 481).await,
                }
                Ok(())
            }
            SipMethod::Cancel => {
                match self.find_dialog_session(&request) {
                    Some(session) => session.core().receive_cancel(&request).await,
                    None => self.respond(&request, 481).await,
                }
                Ok(())
            }
            SipMethod::Message => self.receive_message(request).await,
            SipMethod::Ack => Ok(()),
            SipMethod::Other(_) => {
                self.respond(&request, 405).await;
                Ok(())
            }
        }
    }

    async fn route_invitation(&self, invite: SipRequest) -> Result<()> {
        let listener = self.listener.clone();
        if invite.has_feature_tag(FT_FEATURE_TAG) {
            self.sharing_service.receive_file_transfer_invitation(invite, listener)
        } else if invite.has_feature_tag(GEOLOC_FEATURE_TAG) {
            self.sharing_service.receive_geoloc_invitation(invite, listener)
        } else if let Some(service_id) = extension_service_id(&invite) {
            self.sip_service.receive_invitation(invite, service_id, listener)
        } else {
            warn!("INVITE for an unsupported service");
            self.respond(&invite, 606).await;
            Ok(())
        }
    }

    async fn receive_message(&self, message: SipRequest) -> Result<()> {
        self.respond(&message, 200).await;
        let Some(contact) = remote_contact(&message) else {
            warn!("MESSAGE without a valid remote identity dropped");
            return Ok(());
        };
        let listener = self.listener.clone();
        self.queues.instant_message.submit(async move {
            let feature_tag = message.headers.get(headers::ACCEPT_CONTACT).map(|v| v.trim_start_matches("*;"));
            let content = message.body.clone().unwrap_or_else(Bytes::new);
            listener.on_instant_message(&contact, feature_tag, message.content_type(), &content);
        })
    }

    fn find_dialog_session(&self, request: &SipRequest) -> Option<super::registry::RegisteredSession> {
        let call_id = request.call_id()?;
        self.registry().find_by_call_id(call_id)
    }

    async fn respond(&self, request: &SipRequest, code: u16) {
        let response = self.ctx.factory.create_response(request, Some(&generate_tag()), code);
        if let Err(e) = self.ctx.transport.send_response(response).await {
            warn!("Failed to send {} for {}: {}", code, request.method, e);
        }
    }
}
