//! File transfer sessions driven end to end against a scripted SIP transport

mod common;

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use rcs_msrp_core::{bind_with_probe, ConnectionMode, MsrpEvent, MsrpPath, MsrpSession, MsrpSessionConfig};

use rcs_session_core::errors::{ErrorCode, ImsServiceError};
use rcs_session_core::session::{
    FileSharingSession, MmContent, SessionState, TerminationReason, FT_FEATURE_TAG,
};
use rcs_session_core::sip::SipMethod;

use common::*;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Stream `size` bytes from `peer` without waiting for the outcome
fn spawn_send(peer: &MsrpSession, size: usize) {
    let peer = peer.clone();
    tokio::spawn(async move { peer.send_chunks(Cursor::new(vec![9u8; size]), "image/jpeg", size as u64).await });
}

fn settings_with_root(root: &Path) -> rcs_session_core::RcsSettings {
    rcs_session_core::RcsSettings {
        file_root_directory: root.to_path_buf(),
        ..settings()
    }
}

/// Accept an incoming transfer whose remote connects actively
async fn accepted_incoming_transfer(fixture: &Fixture, size: u64) -> (FileSharingSession, Arc<RecordingListener>) {
    let invite = incoming_ft_invite("active", size);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();
    recorder.wait_for(|events| events.contains(&Recorded::Ringing)).await;
    assert!(session.accept());
    wait_until(|| fixture.transport.response_codes().contains(&200)).await;
    (session, recorder)
}

fn incoming_ft_invite(setup: &str, size: u64) -> rcs_session_core::sip::SipRequest {
    let selector = format!("file-selector:name:\"photo.jpg\" type:image/jpeg size:{}", size);
    let sdp = remote_msrp_sdp(
        20000,
        setup,
        "sendonly",
        &[&selector, "file-transfer-id:abc123", "accept-types:image/jpeg"],
    );
    incoming_invite(FT_FEATURE_TAG, &sdp)
}

#[tokio::test]
async fn test_outgoing_transfer_notifies_once_and_unregisters() {
    let fixture = Fixture::new(settings());

    let (listener, port) = bind_with_probe(LOCALHOST, 0, 1).await.unwrap();
    let mut peer_config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", port, false));
    peer_config.buffer_incoming = true;
    let (peer, mut peer_events) = MsrpSession::new(peer_config);
    let accept = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.open(ConnectionMode::Passive { listener }).await })
    };

    let answer = remote_msrp_sdp(port, "passive", "recvonly", &["accept-types:text/plain"]);
    fixture.transport.script(SipMethod::Invite, ok_with_sdp(&answer));

    let content = MmContent::from_bytes("report.txt", "text/plain", vec![7u8; 1000]);
    let session = FileSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), content, None);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();
    assert!(fixture.registry.get_file_transfer(session.id()).is_some());

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    within(accept).await.unwrap().unwrap();

    let received = loop {
        if let Some(MsrpEvent::DataReceived { data, .. }) = within(peer_events.recv()).await {
            break data;
        }
    };
    assert_eq!(received.len(), 1000);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::FileTransferred("report.txt".to_string())]
    );
    assert!(recorder.events().contains(&Recorded::Started));
    assert!(fixture.registry.is_empty());
    assert_eq!(session.core().state(), SessionState::Transferred);

    let methods: Vec<SipMethod> = fixture.transport.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec![SipMethod::Invite, SipMethod::Ack, SipMethod::Bye]);

    let invite = &fixture.transport.requests_of(SipMethod::Invite)[0];
    let offer = invite.body_str().unwrap();
    assert!(offer.contains("a=setup:actpass"));
    assert!(offer.contains("a=sendonly"));
    assert!(offer.contains("a=file-selector:name:\"report.txt\" type:text/plain size:1000"));
    peer.close();
}

#[tokio::test]
async fn test_incoming_transfer_rejected_by_user() {
    let fixture = Fixture::new(settings());
    let invite = incoming_ft_invite("actpass", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.contains(&Recorded::Ringing)).await;
    assert_eq!(session.content().unwrap().name(), "photo.jpg");
    assert_eq!(session.transfer_id(), "abc123");
    assert!(session.reject());

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    wait_until(|| fixture.registry.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Rejected(TerminationReason::ByUser)]
    );
    assert_eq!(fixture.transport.response_codes(), vec![180, 603]);
    assert!(!session.accept());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_transfer_times_out_with_busy() {
    let fixture = Fixture::new(rcs_session_core::RcsSettings {
        ringing_period_secs: 5,
        ..settings()
    });
    let invite = incoming_ft_invite("actpass", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Rejected(TerminationReason::ByTimeout)]
    );
    assert_eq!(fixture.transport.response_codes(), vec![180, 486]);
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn test_abort_racing_remote_cancel_ends_once() {
    let fixture = Fixture::new(settings());
    let invite = incoming_ft_invite("actpass", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();
    recorder.wait_for(|events| events.contains(&Recorded::Ringing)).await;

    let cancel = rcs_session_core::sip::SipRequest::new(SipMethod::Cancel, LOCAL_USER)
        .with_header("Call-ID", invite.call_id().unwrap())
        .with_header("CSeq", "1 CANCEL");
    tokio::join!(
        session.abort(TerminationReason::ByUser),
        session.core().receive_cancel(&cancel),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.terminal_events().len(), 1);
    assert_eq!(session.core().state(), SessionState::Rejected);
    assert!(fixture.registry.is_empty());
    assert!(!session.accept());
}

#[tokio::test]
async fn test_no_auto_accept_above_warn_size() {
    let fixture = Fixture::new(rcs_session_core::RcsSettings {
        ft_auto_accept: true,
        warn_file_transfer_size: 500,
        ..settings()
    });
    let invite = incoming_ft_invite("active", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.contains(&Recorded::Ringing)).await;
    assert!(recorder.events().contains(&Recorded::Invited));
    assert!(!recorder.events().iter().any(|e| matches!(e, Recorded::AutoAccepted(_))));

    session.abort(TerminationReason::ByUser).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Rejected(TerminationReason::ByUser)]
    );
}

#[tokio::test]
async fn test_auto_accept_below_warn_size() {
    let fixture = Fixture::new(rcs_session_core::RcsSettings {
        ft_auto_accept: true,
        warn_file_transfer_size: 5000,
        ..settings()
    });
    let invite = incoming_ft_invite("active", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.contains(&Recorded::Started)).await;
    let events = recorder.events();
    assert_eq!(events[0], Recorded::AutoAccepted("photo.jpg".to_string()));
    assert!(!events.contains(&Recorded::Invited));

    let answer = fixture.transport.responses().pop().unwrap();
    assert_eq!(answer.status, 200);
    let sdp = answer.body_str().unwrap();
    assert!(sdp.contains("a=setup:passive"));
    assert!(sdp.contains("a=recvonly"));
    assert!(sdp.contains("a=file-transfer-id:abc123"));

    session.abort(TerminationReason::ByUser).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Aborted(TerminationReason::ByUser)]
    );
    assert_eq!(fixture.transport.requests_of(SipMethod::Bye).len(), 1);
}

#[tokio::test]
async fn test_oversized_incoming_file_is_refused() {
    let fixture = Fixture::new(rcs_session_core::RcsSettings {
        max_file_transfer_size: 100,
        ..settings()
    });
    let invite = incoming_ft_invite("actpass", 1000);
    let session = FileSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::MediaSizeTooBig)]
    );
    assert_eq!(fixture.transport.response_codes(), vec![403]);
}

#[tokio::test]
async fn test_handle_error_twice_notifies_once() {
    let fixture = Fixture::new(settings());
    let content = MmContent::from_bytes("a.txt", "text/plain", &b"hello"[..]);
    let session = FileSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), content, None);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());

    let error = ImsServiceError::from_code(ErrorCode::SessionInitiationFailed);
    session.core().handle_error(error.clone());
    session.core().handle_error(error);

    assert_eq!(
        recorder.events(),
        vec![Recorded::Error(ErrorCode::SessionInitiationFailed)]
    );
    assert_eq!(session.core().state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_invite_fails_without_media() {
    let fixture = Fixture::new(rcs_session_core::RcsSettings {
        sip_transaction_timeout_secs: 5,
        ..settings()
    });
    let content = MmContent::from_bytes("a.txt", "text/plain", &b"hello"[..]);
    let session = FileSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), content, None);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::SessionInitiationFailed)]
    );
    assert_eq!(session.core().state(), SessionState::Failed);
    assert!(!recorder.events().contains(&Recorded::Started));
    let methods: Vec<SipMethod> = fixture.transport.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec![SipMethod::Invite]);
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn test_declined_invite_is_rejected_by_remote() {
    let fixture = Fixture::new(settings());
    fixture
        .transport
        .script(SipMethod::Invite, rcs_session_core::sip::SipResponse::new(603, "Decline"));
    let content = MmContent::from_bytes("a.txt", "text/plain", &b"hello"[..]);
    let session = FileSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), content, None);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Rejected(TerminationReason::ByRemote)]
    );
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn test_received_file_is_saved_and_unregistered() {
    let root = tempfile::tempdir().unwrap();
    let fixture = Fixture::new(settings_with_root(root.path()));
    let (session, recorder) = accepted_incoming_transfer(&fixture, 1000).await;

    let media = answered_media(&fixture.transport);
    let (peer, _peer_events) = connect_active_peer(&media, |config| config.chunk_size = 400).await;
    spawn_send(&peer, 1000);

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::FileTransferred("photo.jpg".to_string())]
    );
    assert!(recorder.events().contains(&Recorded::Progress(1000, 1000)));
    assert_eq!(std::fs::read(root.path().join("photo.jpg")).unwrap(), vec![9u8; 1000]);
    assert_eq!(session.core().state(), SessionState::Transferred);

    wait_until(|| fixture.registry.is_empty()).await;
    assert!(fixture.transport.requests_of(SipMethod::Bye).is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.terminal_events().len(), 1);
    peer.close();
}

#[tokio::test]
async fn test_unwritable_root_fails_with_saving_error() {
    let not_a_directory = tempfile::NamedTempFile::new().unwrap();
    let fixture = Fixture::new(settings_with_root(not_a_directory.path()));
    let (session, recorder) = accepted_incoming_transfer(&fixture, 1000).await;

    let media = answered_media(&fixture.transport);
    let (peer, _peer_events) = connect_active_peer(&media, |_| {}).await;
    spawn_send(&peer, 1000);

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    wait_until(|| fixture.registry.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::MediaSavingFailed)]
    );
    assert_eq!(session.core().state(), SessionState::Failed);
    assert_eq!(fixture.transport.requests_of(SipMethod::Bye).len(), 1);
    peer.close();
}

#[tokio::test]
async fn test_partial_file_deleted_when_peer_drops() {
    let root = tempfile::tempdir().unwrap();
    let fixture = Fixture::new(settings_with_root(root.path()));
    let (_session, recorder) = accepted_incoming_transfer(&fixture, 1000).await;
    let media = answered_media(&fixture.transport);

    let mut peer = tokio::net::TcpStream::connect((media.host.as_str(), media.port)).await.unwrap();
    let chunk = format!(
        "MSRP t1 SEND\r\nTo-Path: {}\r\nFrom-Path: msrp://127.0.0.1:20000/remote;tcp\r\n\
Message-ID: m1\r\nByte-Range: 1-4/1000\r\nContent-Type: image/jpeg\r\n\r\nabcd\r\n-------t1+\r\n",
        media.path
    );
    peer.write_all(chunk.as_bytes()).await.unwrap();

    let saved = root.path().join("photo.jpg");
    wait_until(|| saved.exists()).await;
    drop(peer);

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    wait_until(|| !saved.exists()).await;
    wait_until(|| fixture.registry.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::MediaTransferFailed)]
    );
    assert!(recorder.events().contains(&Recorded::Progress(4, 1000)));
}

#[tokio::test]
async fn test_unreadable_file_is_not_allowed_to_send() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.txt");
    std::fs::write(&path, b"hello").unwrap();
    let content = MmContent::from_file(&path, "text/plain").unwrap();
    std::fs::remove_file(&path).unwrap();

    let fixture = Fixture::new(settings());
    let (listener, port) = bind_with_probe(LOCALHOST, 0, 1).await.unwrap();
    let (peer, _peer_events) = MsrpSession::new(MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", port, false)));
    let accept = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.open(ConnectionMode::Passive { listener }).await })
    };
    let answer = remote_msrp_sdp(port, "passive", "recvonly", &["accept-types:text/plain"]);
    fixture.transport.script(SipMethod::Invite, ok_with_sdp(&answer));

    let session = FileSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), content, None);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    let _ = within(accept).await;
    wait_until(|| fixture.registry.is_empty()).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::NotAllowedToSend)]
    );
    assert!(recorder.events().contains(&Recorded::Started));
    assert_eq!(fixture.transport.requests_of(SipMethod::Bye).len(), 1);
    peer.close();
}
