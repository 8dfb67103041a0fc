//! Geolocation sharing received from a remote MSRP peer

mod common;

use std::io::Cursor;
use std::time::Duration;

use rcs_msrp_core::{ConnectionMode, MsrpPath, MsrpSession, MsrpSessionConfig};
use rcs_session_core::errors::ErrorCode;
use rcs_session_core::sdp::{MsrpMediaParams, SetupRole};
use rcs_session_core::session::{Geoloc, GeolocSharingSession, GEOLOC_CONTENT_TYPE, GEOLOC_FEATURE_TAG};
use rcs_session_core::sip::{SipMethod, SipRequest};

use common::*;

fn geoloc_invite(accept_types: &str) -> SipRequest {
    let accept = format!("accept-types:{}", accept_types);
    let sdp = remote_msrp_sdp(20000, "active", "sendonly", &[&accept, "file-disposition:render"]);
    incoming_invite(GEOLOC_FEATURE_TAG, &sdp)
}

#[tokio::test]
async fn test_incoming_geoloc_is_delivered() {
    let fixture = Fixture::new(settings());
    let invite = geoloc_invite(GEOLOC_CONTENT_TYPE);
    let session = GeolocSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.contains(&Recorded::Ringing)).await;
    assert_eq!(fixture.transport.response_codes(), vec![180]);
    assert!(session.accept());

    wait_until(|| fixture.transport.response_codes().contains(&200)).await;
    let answer = fixture.transport.responses().pop().unwrap();
    let params = MsrpMediaParams::from_sdp(answer.body_str().unwrap(), false).unwrap();
    assert_eq!(params.setup, Some(SetupRole::Passive));
    assert!(answer.body_str().unwrap().contains("a=recvonly"));

    let (peer, _peer_events) = MsrpSession::new(MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", 9, false)));
    peer.set_remote_path(MsrpPath::parse(&params.path).unwrap());
    within(peer.open(ConnectionMode::Active {
        host: params.host.clone(),
        port: params.port,
    }))
    .await
    .unwrap();

    let geoloc = Geoloc {
        label: Some("Home".to_string()),
        latitude: 48.85,
        longitude: 2.35,
        accuracy: 10.0,
        expiration: 1_800_000_000_000,
    };
    let document = geoloc.to_document(&format!("tel:{}", REMOTE_NUMBER));
    let size = document.len() as u64;
    // The media may close before the last 200 OK reaches the peer
    let _ = within(peer.send_chunks(Cursor::new(document.into_bytes()), GEOLOC_CONTENT_TYPE, size)).await;

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(recorder.terminal_events(), vec![Recorded::GeolocTransferred(true)]);
    let shared = session.geoloc().unwrap();
    assert_eq!(shared.latitude, 48.85);
    assert_eq!(shared.label.as_deref(), Some("Home"));

    wait_until(|| fixture.registry.is_empty()).await;
    assert!(fixture.transport.requests_of(SipMethod::Bye).is_empty());

    // The remote hangs up afterwards
    let bye = SipRequest::new(SipMethod::Bye, LOCAL_USER)
        .with_header("Call-ID", invite.call_id().unwrap())
        .with_header("CSeq", "2 BYE");
    session.core().receive_bye(&bye).await;
    assert_eq!(fixture.transport.response_codes().last(), Some(&200));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.terminal_events().len(), 1);
    peer.close();
}

#[tokio::test]
async fn test_geoloc_without_supported_type_is_refused() {
    let fixture = Fixture::new(settings());
    let invite = geoloc_invite("text/plain");
    let session = GeolocSharingSession::incoming(fixture.ctx.clone(), remote_contact(), &invite);
    let recorder = RecordingListener::new();
    session.add_listener(recorder.clone());
    session.start();

    recorder.wait_for(|events| events.iter().any(Recorded::is_terminal)).await;
    assert_eq!(
        recorder.terminal_events(),
        vec![Recorded::Error(ErrorCode::UnsupportedMediaType)]
    );
    assert_eq!(fixture.transport.response_codes(), vec![180, 415]);
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn test_outgoing_geoloc_offers_active_setup() {
    let fixture = Fixture::new(settings());
    let geoloc = Geoloc {
        label: None,
        latitude: 1.0,
        longitude: 2.0,
        accuracy: 5.0,
        expiration: 1_800_000_000_000,
    };
    let session = GeolocSharingSession::outgoing(fixture.ctx.clone(), remote_contact(), geoloc);
    session.start();

    wait_until(|| !fixture.transport.requests_of(SipMethod::Invite).is_empty()).await;
    let invite = &fixture.transport.requests_of(SipMethod::Invite)[0];
    assert!(invite.has_feature_tag(GEOLOC_FEATURE_TAG));
    let offer = invite.body_str().unwrap();
    assert!(offer.contains("a=setup:active"));
    assert!(offer.contains("m=message 9 TCP/MSRP *"));
    assert!(offer.contains("a=file-disposition:render"));

    session.abort(rcs_session_core::TerminationReason::ByUser).await;
    assert_eq!(fixture.transport.requests_of(SipMethod::Cancel).len(), 1);
    assert!(fixture.registry.is_empty());
}
