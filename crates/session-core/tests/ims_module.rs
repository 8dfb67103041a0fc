//! Inbound request routing through the IMS module

mod common;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use rcs_session_core::config::StaticNetworkInfo;
use rcs_session_core::contact::{ContactId, InMemoryContactManager};
use rcs_session_core::service::{CoreListener, ImsModule};
use rcs_session_core::session::{
    extension_feature_tag, FileSharingSession, GenericSipSession, MmContent, SessionKind, TerminationReason,
    FT_FEATURE_TAG,
};
use rcs_session_core::sip::{headers, SipMethod, SipRequest};

use common::*;

#[derive(Default)]
struct RecordingCoreListener {
    file_transfers: Mutex<Vec<FileSharingSession>>,
    sip_sessions: Mutex<Vec<GenericSipSession>>,
    messages: Mutex<Vec<(ContactId, Option<String>, Bytes)>>,
}

impl CoreListener for RecordingCoreListener {
    fn on_file_transfer_invitation(&self, session: &FileSharingSession) {
        self.file_transfers.lock().push(session.clone());
    }

    fn on_sip_session_invitation(&self, session: &GenericSipSession) {
        self.sip_sessions.lock().push(session.clone());
    }

    fn on_instant_message(
        &self,
        contact: &ContactId,
        feature_tag: Option<&str>,
        _content_type: Option<&str>,
        content: &Bytes,
    ) {
        self.messages
            .lock()
            .push((contact.clone(), feature_tag.map(str::to_string), content.clone()));
    }
}

struct ModuleFixture {
    transport: Arc<MockSipTransport>,
    contacts: Arc<InMemoryContactManager>,
    listener: Arc<RecordingCoreListener>,
    module: ImsModule,
}

impl ModuleFixture {
    fn started() -> Self {
        let transport = MockSipTransport::new();
        let contacts = Arc::new(InMemoryContactManager::new());
        let listener = Arc::new(RecordingCoreListener::default());
        let module = ImsModule::new(
            Arc::new(settings()),
            Arc::new(StaticNetworkInfo::default()),
            transport.clone(),
            contacts.clone(),
            listener.clone(),
        );
        module.start();
        Self {
            transport,
            contacts,
            listener,
            module,
        }
    }
}

fn ft_invite() -> SipRequest {
    let sdp = remote_msrp_sdp(
        20000,
        "actpass",
        "sendonly",
        &["file-selector:name:\"photo.jpg\" type:image/jpeg size:1000", "accept-types:image/jpeg"],
    );
    incoming_invite(FT_FEATURE_TAG, &sdp)
}

#[tokio::test]
async fn test_requests_refused_before_start() {
    let transport = MockSipTransport::new();
    let module = ImsModule::new(
        Arc::new(settings()),
        Arc::new(StaticNetworkInfo::default()),
        transport.clone(),
        Arc::new(InMemoryContactManager::new()),
        Arc::new(rcs_session_core::service::NoopCoreListener),
    );
    assert!(!module.is_started());
    assert!(module.receive_request(ft_invite()).await.is_err());
    assert!(transport.responses().is_empty());
}

#[tokio::test]
async fn test_blocked_contact_declined_without_session() {
    let fixture = ModuleFixture::started();
    fixture.contacts.block(remote_contact());

    fixture.module.receive_request(ft_invite()).await.unwrap();
    wait_until(|| fixture.transport.response_codes() == vec![603]).await;

    assert!(fixture.module.registry().is_empty());
    assert!(fixture.listener.file_transfers.lock().is_empty());
}

#[tokio::test]
async fn test_file_transfer_invitation_reaches_listener() {
    let fixture = ModuleFixture::started();
    fixture.module.receive_request(ft_invite()).await.unwrap();

    wait_until(|| !fixture.listener.file_transfers.lock().is_empty()).await;
    let session = fixture.listener.file_transfers.lock()[0].clone();
    wait_until(|| fixture.transport.response_codes().contains(&180)).await;
    assert!(fixture.module.sharing_service().file_transfer(session.id()).is_some());
    assert_eq!(fixture.module.sharing_service().file_transfers_with(&remote_contact()).len(), 1);

    assert!(session.reject());
    wait_until(|| fixture.transport.response_codes().contains(&603)).await;
    wait_until(|| fixture.module.registry().is_empty()).await;
}

#[tokio::test]
async fn test_extension_invitation_creates_generic_msrp_session() {
    let fixture = ModuleFixture::started();
    let sdp = remote_msrp_sdp(20000, "actpass", "sendrecv", &["accept-types:application/x-game"]);
    let invite = incoming_invite(&extension_feature_tag("mygame"), &sdp);
    fixture.module.receive_request(invite).await.unwrap();

    wait_until(|| !fixture.listener.sip_sessions.lock().is_empty()).await;
    let session = fixture.listener.sip_sessions.lock()[0].clone();
    assert_eq!(session.kind(), SessionKind::GenericMsrp);
    assert_eq!(session.feature_tag(), extension_feature_tag("mygame"));
    wait_until(|| fixture.module.sip_service().session(session.id()).is_ok()).await;
    assert_eq!(
        fixture.module.sip_service().sessions_with(&remote_contact(), "mygame").len(),
        1
    );

    session.abort(TerminationReason::ByUser).await;
    assert!(fixture.module.sip_service().session(session.id()).is_err());
}

#[tokio::test]
async fn test_unknown_service_answered_not_acceptable() {
    let fixture = ModuleFixture::started();
    let sdp = remote_msrp_sdp(20000, "actpass", "sendrecv", &[]);
    let invite = incoming_invite("+g.oma.sip-im", &sdp);
    fixture.module.receive_request(invite).await.unwrap();
    assert_eq!(fixture.transport.response_codes(), vec![606]);
    assert!(fixture.module.registry().is_empty());
}

#[tokio::test]
async fn test_bye_outside_any_dialog_gets_481() {
    let fixture = ModuleFixture::started();
    let bye = SipRequest::new(SipMethod::Bye, LOCAL_USER)
        .with_header(headers::CALL_ID, "unknown@10.0.0.2")
        .with_header(headers::CSEQ, "2 BYE");
    fixture.module.receive_request(bye).await.unwrap();
    assert_eq!(fixture.transport.response_codes(), vec![481]);
}

#[tokio::test]
async fn test_unsupported_method_gets_405() {
    let fixture = ModuleFixture::started();
    let options = SipRequest::new(SipMethod::Other("OPTIONS".to_string()), LOCAL_USER)
        .with_header(headers::CALL_ID, "options@10.0.0.2")
        .with_header(headers::CSEQ, "1 OPTIONS");
    fixture.module.receive_request(options).await.unwrap();
    assert_eq!(fixture.transport.response_codes(), vec![405]);
}

#[tokio::test]
async fn test_instant_message_delivered_to_listener() {
    let fixture = ModuleFixture::started();
    let tag = extension_feature_tag("mygame");
    let message = SipRequest::new(SipMethod::Message, LOCAL_USER)
        .with_header(headers::CALL_ID, "message@10.0.0.2")
        .with_header(headers::CSEQ, "1 MESSAGE")
        .with_header(headers::FROM, format!("<tel:{}>;tag=remote1", REMOTE_NUMBER))
        .with_header(headers::P_ASSERTED_IDENTITY, format!("<tel:{}>", REMOTE_NUMBER))
        .with_header(headers::ACCEPT_CONTACT, format!("*;{}", tag))
        .with_body("text/plain", "move e2e4");
    fixture.module.receive_request(message).await.unwrap();

    assert_eq!(fixture.transport.response_codes(), vec![200]);
    wait_until(|| !fixture.listener.messages.lock().is_empty()).await;
    let (contact, feature_tag, content) = fixture.listener.messages.lock()[0].clone();
    assert_eq!(contact, remote_contact());
    assert_eq!(feature_tag.as_deref(), Some(tag.as_str()));
    assert_eq!(&content[..], b"move e2e4");
}

#[tokio::test]
async fn test_stop_aborts_pending_sessions() {
    let fixture = ModuleFixture::started();
    let content = MmContent::from_bytes("a.txt", "text/plain", &b"hello"[..]);
    let session = fixture
        .module
        .sharing_service()
        .transfer_file(remote_contact(), content, None)
        .unwrap();
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    wait_until(|| !fixture.transport.requests_of(SipMethod::Invite).is_empty()).await;

    fixture.module.stop().await;
    assert!(!fixture.module.is_started());
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Rejected(TerminationReason::BySystem)]
    );
    assert_eq!(fixture.transport.requests_of(SipMethod::Cancel).len(), 1);
    assert!(fixture.module.registry().is_empty());
}
