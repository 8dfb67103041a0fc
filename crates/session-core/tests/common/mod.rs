//! Shared fixtures: a scripted SIP transport and recording listeners

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rcs_msrp_core::{ConnectionMode, MsrpEvent, MsrpPath, MsrpSession, MsrpSessionConfig};

use rcs_session_core::config::{RcsSettings, StaticNetworkInfo};
use rcs_session_core::contact::{ContactId, InMemoryContactManager};
use rcs_session_core::errors::{ErrorCode, ImsServiceError, Result, SessionError};
use rcs_session_core::sdp::MsrpMediaParams;
use rcs_session_core::service::SessionRegistry;
use rcs_session_core::session::{
    FileIcon, FileTransferListener, Geoloc, GeolocListener, MmContent, SessionContext, SessionErrorListener,
    SessionId, SessionStateListener, SipDataListener, TerminationReason, TransferProgressListener,
};
use rcs_session_core::sip::{headers, SipMethod, SipRequest, SipResponse, SipTransport};

pub const REMOTE_NUMBER: &str = "+33611111111";
pub const LOCAL_USER: &str = "sip:+33600000001@ims.example.com";
pub const WAIT: Duration = Duration::from_secs(10);

/// SIP transport recording everything sent and replaying scripted responses
///
/// Requests without a scripted response get a 200 OK, except INVITE and
/// MESSAGE which stay unanswered until the transaction timeout.
#[derive(Default)]
pub struct MockSipTransport {
    scripted: Mutex<HashMap<String, VecDeque<SipResponse>>>,
    requests: Mutex<Vec<SipRequest>>,
    responses: Mutex<Vec<SipResponse>>,
    withhold_ack: Mutex<bool>,
}

impl MockSipTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the next `method` request with `response`
    pub fn script(&self, method: SipMethod, response: SipResponse) {
        self.scripted
            .lock()
            .entry(method.as_str().to_string())
            .or_default()
            .push_back(response);
    }

    /// Never deliver the ACK of a 200 OK
    pub fn withhold_ack(&self) {
        *self.withhold_ack.lock() = true;
    }

    pub fn requests(&self) -> Vec<SipRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_of(&self, method: SipMethod) -> Vec<SipRequest> {
        self.requests.lock().iter().filter(|r| r.method == method).cloned().collect()
    }

    pub fn responses(&self) -> Vec<SipResponse> {
        self.responses.lock().clone()
    }

    pub fn response_codes(&self) -> Vec<u16> {
        self.responses.lock().iter().map(|r| r.status).collect()
    }

    fn next_scripted(&self, method: &SipMethod) -> Option<SipResponse> {
        self.scripted.lock().get_mut(method.as_str()).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl SipTransport for MockSipTransport {
    async fn send_request_and_wait(&self, request: SipRequest, timeout: Duration) -> Result<SipResponse> {
        let method = request.method.clone();
        self.requests.lock().push(request);
        if let Some(response) = self.next_scripted(&method) {
            return Ok(response);
        }
        match method {
            SipMethod::Invite | SipMethod::Message => {
                tokio::time::sleep(timeout).await;
                Err(SessionError::timeout(format!("no response to {}", method)))
            }
            _ => Ok(SipResponse::new(200, "OK")),
        }
    }

    async fn send_request(&self, request: SipRequest) -> Result<()> {
        self.requests.lock().push(request);
        Ok(())
    }

    async fn send_response(&self, response: SipResponse) -> Result<()> {
        self.responses.lock().push(response);
        Ok(())
    }

    async fn send_response_and_wait_ack(&self, response: SipResponse, timeout: Duration) -> Result<SipRequest> {
        self.responses.lock().push(response);
        if *self.withhold_ack.lock() {
            tokio::time::sleep(timeout).await;
            return Err(SessionError::timeout("no ACK"));
        }
        Ok(SipRequest::new(SipMethod::Ack, LOCAL_USER))
    }
}

/// A notification seen by [`RecordingListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Invited,
    Ringing,
    Accepting,
    Started,
    Aborted(TerminationReason),
    Rejected(TerminationReason),
    Error(ErrorCode),
    Progress(u64, u64),
    AutoAccepted(String),
    FileTransferred(String),
    GeolocTransferred(bool),
    DataReceived(Bytes),
}

impl Recorded {
    /// Whether this notification ends a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Recorded::Aborted(_)
                | Recorded::Rejected(_)
                | Recorded::Error(_)
                | Recorded::FileTransferred(_)
                | Recorded::GeolocTransferred(_)
        )
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn terminal_events(&self) -> Vec<Recorded> {
        self.events.lock().iter().filter(|e| e.is_terminal()).cloned().collect()
    }

    pub fn count(&self, event: &Recorded) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().push(event);
    }

    /// Wait until `predicate` holds on the recorded events
    pub async fn wait_for(&self, predicate: impl Fn(&[Recorded]) -> bool) {
        wait_until(|| predicate(&self.events.lock())).await;
    }
}

impl SessionStateListener for RecordingListener {
    fn on_session_invited(&self, _: &SessionId, _: &ContactId) {
        self.push(Recorded::Invited);
    }

    fn on_session_ringing(&self, _: &SessionId) {
        self.push(Recorded::Ringing);
    }

    fn on_session_accepting(&self, _: &SessionId, _: &ContactId) {
        self.push(Recorded::Accepting);
    }

    fn on_session_started(&self, _: &SessionId, _: &ContactId) {
        self.push(Recorded::Started);
    }

    fn on_session_aborted(&self, _: &SessionId, _: &ContactId, reason: TerminationReason) {
        self.push(Recorded::Aborted(reason));
    }

    fn on_session_rejected(&self, _: &SessionId, _: &ContactId, reason: TerminationReason) {
        self.push(Recorded::Rejected(reason));
    }
}

impl TransferProgressListener for RecordingListener {
    fn on_transfer_progress(&self, _: &SessionId, _: &ContactId, current: u64, total: u64) {
        self.push(Recorded::Progress(current, total));
    }
}

impl SessionErrorListener for RecordingListener {
    fn on_session_error(&self, _: &SessionId, _: &ContactId, error: &ImsServiceError) {
        self.push(Recorded::Error(error.code));
    }
}

impl FileTransferListener for RecordingListener {
    fn on_session_auto_accepted(&self, _: &SessionId, _: &ContactId, content: &MmContent, _: Option<&FileIcon>) {
        self.push(Recorded::AutoAccepted(content.name().to_string()));
    }

    fn on_file_transferred(&self, _: &SessionId, _: &ContactId, content: &MmContent) {
        self.push(Recorded::FileTransferred(content.name().to_string()));
    }
}

impl GeolocListener for RecordingListener {
    fn on_geoloc_transferred(&self, _: &SessionId, _: &ContactId, _: &Geoloc, initiated_by_remote: bool) {
        self.push(Recorded::GeolocTransferred(initiated_by_remote));
    }
}

impl SipDataListener for RecordingListener {
    fn on_data_received(&self, _: &SessionId, _: &ContactId, data: &Bytes, _: Option<&str>) {
        self.push(Recorded::DataReceived(data.clone()));
    }
}

/// Poll `condition` until it holds, panicking after [`WAIT`]
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, polling)
        .await
        .expect("condition not reached in time");
}

/// Run `fut` with a deadline
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}

pub fn settings() -> RcsSettings {
    RcsSettings {
        local_user: LOCAL_USER.to_string(),
        default_msrp_port: 0,
        msrp_port_span: 1,
        ..RcsSettings::default()
    }
}

pub fn remote_contact() -> ContactId {
    ContactId::parse(REMOTE_NUMBER).unwrap()
}

pub struct Fixture {
    pub transport: Arc<MockSipTransport>,
    pub contacts: Arc<InMemoryContactManager>,
    pub registry: Arc<SessionRegistry>,
    pub ctx: Arc<SessionContext>,
}

impl Fixture {
    pub fn new(settings: RcsSettings) -> Self {
        let transport = MockSipTransport::new();
        let contacts = Arc::new(InMemoryContactManager::new());
        let registry = Arc::new(SessionRegistry::new());
        let ctx = Arc::new(SessionContext::new(
            Arc::new(settings),
            Arc::new(StaticNetworkInfo::default()),
            transport.clone(),
            contacts.clone(),
            registry.clone(),
        ));
        Self {
            transport,
            contacts,
            registry,
            ctx,
        }
    }
}

/// SDP of a remote MSRP endpoint at 127.0.0.1:`port`
pub fn remote_msrp_sdp(port: u16, setup: &str, direction: &str, extra: &[&str]) -> String {
    let mut sdp = format!(
        "v=0\r\n\
         o=- 3900000000 3900000000 IN IP4 127.0.0.1\r\n\
         s=-\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m=message {port} TCP/MSRP *\r\n\
         a=path:msrp://127.0.0.1:{port}/remote;tcp\r\n\
         a=setup:{setup}\r\n\
         a={direction}\r\n"
    );
    for line in extra {
        sdp.push_str("a=");
        sdp.push_str(line);
        sdp.push_str("\r\n");
    }
    sdp
}

/// INVITE from the remote contact carrying `feature_tag` and `sdp`
pub fn incoming_invite(feature_tag: &str, sdp: &str) -> SipRequest {
    SipRequest::new(SipMethod::Invite, LOCAL_USER)
        .with_header("Via", "SIP/2.0/TCP 10.0.0.2:5060;branch=z9hG4bKremote")
        .with_header(headers::CALL_ID, format!("{}@10.0.0.2", uuid::Uuid::new_v4().simple()))
        .with_header(headers::CSEQ, "1 INVITE")
        .with_header(headers::FROM, format!("\"Remote\" <tel:{}>;tag=remote1", REMOTE_NUMBER))
        .with_header(headers::TO, format!("<{}>", LOCAL_USER))
        .with_header(headers::P_ASSERTED_IDENTITY, format!("<tel:{}>", REMOTE_NUMBER))
        .with_header(headers::CONTACT, format!("<sip:10.0.0.2:5060>;{}", feature_tag))
        .with_body("application/sdp", sdp.to_string())
}

/// 200 OK to an INVITE carrying `sdp`
pub fn ok_with_sdp(sdp: &str) -> SipResponse {
    SipResponse::new(200, "OK")
        .with_header(headers::TO, format!("<tel:{}>;tag=remote2", REMOTE_NUMBER))
        .with_header(headers::CONTACT, "<sip:10.0.0.2:5060>")
        .with_body("application/sdp", sdp.to_string())
}

/// MSRP endpoint announced in the SDP of the last response sent
pub fn answered_media(transport: &MockSipTransport) -> MsrpMediaParams {
    let answer = transport.responses().pop().unwrap();
    MsrpMediaParams::from_sdp(answer.body_str().unwrap(), false).unwrap()
}

/// MSRP peer connected actively to `media`
pub async fn connect_active_peer(
    media: &MsrpMediaParams,
    config: impl FnOnce(&mut MsrpSessionConfig),
) -> (MsrpSession, mpsc::UnboundedReceiver<MsrpEvent>) {
    let mut peer_config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", 9, false));
    config(&mut peer_config);
    let (peer, events) = MsrpSession::new(peer_config);
    peer.set_remote_path(MsrpPath::parse(&media.path).unwrap());
    within(peer.open(ConnectionMode::Active {
        host: media.host.clone(),
        port: media.port,
    }))
    .await
    .unwrap();
    (peer, events)
}

/// Wait for the next complete message delivered to an MSRP peer
pub async fn next_data(events: &mut mpsc::UnboundedReceiver<MsrpEvent>) -> Bytes {
    loop {
        if let Some(MsrpEvent::DataReceived { data, .. }) = within(events.recv()).await {
            return data;
        }
    }
}
