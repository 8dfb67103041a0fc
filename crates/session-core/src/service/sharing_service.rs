//! File transfer and geolocation sharing
//!
//! Outgoing sessions are started right away. Invitations are screened and
//! turned into sessions on the messaging queue.

use std::sync::Arc;

use tracing::{debug, info};

use crate::contact::ContactId;
use crate::errors::{Result, SessionError};
use crate::session::{
    FileIcon, FileSharingSession, Geoloc, GeolocSharingSession, MmContent, SessionContext, SessionId,
};
use crate::sip::SipRequest;

use super::core_listener::CoreListener;
use super::dispatch::DispatchQueues;
use super::sip_service::screen_invitation;

pub struct SharingService {
    ctx: Arc<SessionContext>,
    queues: Arc<DispatchQueues>,
}

impl SharingService {
    pub fn new(ctx: Arc<SessionContext>, queues: Arc<DispatchQueues>) -> Self {
        Self { ctx, queues }
    }

    /// Start sending `content` to `contact`
    ///
    /// Content larger than the maximum transfer size is refused before any
    /// signalling.
    pub fn transfer_file(
        &self,
        contact: ContactId,
        content: MmContent,
        icon: Option<FileIcon>,
    ) -> Result<FileSharingSession> {
        let max = self.ctx.settings.max_file_transfer_size();
        if max > 0 && content.size() > max {
            return Err(SessionError::payload(format!(
                "file {} of {} bytes exceeds the {} bytes limit",
                content.name(),
                content.size(),
                max
            )));
        }
        info!("Initiate file transfer of {} to {}", content.name(), contact);
        let session = FileSharingSession::outgoing(self.ctx.clone(), contact, content, icon);
        session.start();
        Ok(session)
    }

    /// Start sharing `geoloc` with `contact`
    pub fn share_geoloc(&self, contact: ContactId, geoloc: Geoloc) -> GeolocSharingSession {
        info!("Initiate geolocation sharing with {}", contact);
        let session = GeolocSharingSession::outgoing(self.ctx.clone(), contact, geoloc);
        session.start();
        session
    }

    pub fn receive_file_transfer_invitation(&self, invite: SipRequest, listener: Arc<dyn CoreListener>) -> Result<()> {
        let ctx = self.ctx.clone();
        self.queues.messaging.submit(async move {
            let Some(contact) = screen_invitation(&ctx, &invite).await else {
                return;
            };
            debug!("Incoming file transfer from {}", contact);
            let session = FileSharingSession::incoming(ctx, contact, &invite);
            listener.on_file_transfer_invitation(&session);
            session.start();
        })
    }

    pub fn receive_geoloc_invitation(&self, invite: SipRequest, listener: Arc<dyn CoreListener>) -> Result<()> {
        let ctx = self.ctx.clone();
        self.queues.messaging.submit(async move {
            let Some(contact) = screen_invitation(&ctx, &invite).await else {
                return;
            };
            debug!("Incoming geolocation sharing from {}", contact);
            let session = GeolocSharingSession::incoming(ctx, contact, &invite);
            listener.on_geoloc_sharing_invitation(&session);
            session.start();
        })
    }

    pub fn file_transfer(&self, id: &SessionId) -> Option<FileSharingSession> {
        self.ctx.registry.get_file_transfer(id)
    }

    pub fn geoloc_sharing(&self, id: &SessionId) -> Option<GeolocSharingSession> {
        self.ctx.registry.get_geoloc_sharing(id)
    }

    pub fn file_transfers(&self) -> Vec<FileSharingSession> {
        self.ctx.registry.file_transfers()
    }

    /// Ongoing transfers with `contact`
    pub fn file_transfers_with(&self, contact: &ContactId) -> Vec<FileSharingSession> {
        self.file_transfers()
            .into_iter()
            .filter(|s| s.core().contact() == contact)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RcsSettings, StaticNetworkInfo};
    use crate::contact::InMemoryContactManager;
    use crate::service::registry::SessionRegistry;
    use crate::sip::{SipResponse, SipTransport};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl SipTransport for NullTransport {
        async fn send_request_and_wait(&self, _: SipRequest, _: Duration) -> Result<SipResponse> {
            Err(SessionError::timeout("unused"))
        }
        async fn send_request(&self, _: SipRequest) -> Result<()> {
            Ok(())
        }
        async fn send_response(&self, _: SipResponse) -> Result<()> {
            Ok(())
        }
        async fn send_response_and_wait_ack(&self, _: SipResponse, _: Duration) -> Result<SipRequest> {
            Err(SessionError::timeout("unused"))
        }
    }

    #[tokio::test]
    async fn test_oversized_file_is_refused_before_signalling() {
        let settings = RcsSettings {
            max_file_transfer_size: 100,
            ..RcsSettings::default()
        };
        let registry = Arc::new(SessionRegistry::new());
        let ctx = Arc::new(SessionContext::new(
            Arc::new(settings),
            Arc::new(StaticNetworkInfo::default()),
            Arc::new(NullTransport),
            Arc::new(InMemoryContactManager::new()),
            registry.clone(),
        ));
        let service = SharingService::new(ctx, Arc::new(DispatchQueues::new()));
        let contact = ContactId::parse("+33612345678").unwrap();
        let content = MmContent::from_bytes("big.bin", "application/octet-stream", vec![0u8; 101]);

        assert!(service.transfer_file(contact, content, None).is_err());
        assert!(registry.is_empty());
    }
}
