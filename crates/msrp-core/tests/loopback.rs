//! MSRP sessions talking to each other over loopback TCP

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rcs_msrp_core::{
    bind_with_probe, ChunkType, ConnectionMode, MsrpError, MsrpEvent, MsrpPath, MsrpSession,
    MsrpSessionConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut UnboundedReceiver<MsrpEvent>) -> MsrpEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for MSRP event")
        .expect("event channel closed")
}

/// Passive receiver and active sender connected to each other
async fn connected_pair(
    receiver_config: impl FnOnce(&mut MsrpSessionConfig),
) -> (
    (MsrpSession, UnboundedReceiver<MsrpEvent>),
    (MsrpSession, UnboundedReceiver<MsrpEvent>),
) {
    let (listener, port) = bind_with_probe(LOCALHOST, 0, 1).await.unwrap();

    let mut passive_config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", port, false));
    receiver_config(&mut passive_config);
    let active_config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", 9, false));

    let (receiver, receiver_events) = MsrpSession::new(passive_config);
    let (sender, sender_events) = MsrpSession::new(active_config);
    receiver.set_remote_path(sender.local_path().clone());
    sender.set_remote_path(receiver.local_path().clone());

    let accept = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.open(ConnectionMode::Passive { listener }).await })
    };
    sender
        .open(ConnectionMode::Active {
            host: "127.0.0.1".to_string(),
            port,
        })
        .await
        .unwrap();
    accept.await.unwrap().unwrap();

    ((receiver, receiver_events), (sender, sender_events))
}

#[tokio::test]
async fn test_file_is_chunked_and_acknowledged() {
    let ((receiver, mut receiver_events), (sender, mut sender_events)) =
        connected_pair(|_| {}).await;

    let content: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
    sender.send_empty_chunk().unwrap();
    sender.spawn_send_chunks(
        std::io::Cursor::new(content.clone()),
        "file-1".to_string(),
        "application/octet-stream".to_string(),
        content.len() as u64,
        ChunkType::FileSharing,
    );

    let mut received = Vec::new();
    let mut chunks = 0;
    loop {
        match next_event(&mut receiver_events).await {
            MsrpEvent::ChunkReceived { data, current, total, .. } => {
                chunks += 1;
                received.extend_from_slice(&data);
                assert_eq!(current, received.len() as u64);
                assert_eq!(total, content.len() as u64);
            }
            MsrpEvent::DataReceived { data, content_type, .. } => {
                assert!(data.is_empty(), "unbuffered session must not accumulate");
                assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
                break;
            }
            other => panic!("unexpected receiver event {:?}", other),
        }
    }
    assert_eq!(chunks, 3);
    assert_eq!(received, content);
    assert!(receiver.is_established());

    let mut last_progress = 0;
    loop {
        match next_event(&mut sender_events).await {
            MsrpEvent::TransferProgress { current, total } => {
                assert!(current > last_progress);
                assert_eq!(total, content.len() as u64);
                last_progress = current;
            }
            MsrpEvent::DataTransferred { message_id } => {
                assert_eq!(message_id, "file-1");
                break;
            }
            other => panic!("unexpected sender event {:?}", other),
        }
    }
    assert_eq!(last_progress, content.len() as u64);

    sender.close();
    receiver.close();
}

#[tokio::test]
async fn test_buffered_session_delivers_whole_message() {
    let ((_receiver, mut receiver_events), (sender, _sender_events)) =
        connected_pair(|config| config.buffer_incoming = true).await;

    let payload = b"<rcsenvelope>geoloc</rcsenvelope>".to_vec();
    sender
        .send_chunks(
            &payload[..],
            "application/vnd.gsma.rcspushlocation+xml",
            payload.len() as u64,
        )
        .await
        .unwrap();

    loop {
        if let MsrpEvent::DataReceived { data, .. } = next_event(&mut receiver_events).await {
            assert_eq!(&data[..], &payload[..]);
            break;
        }
    }
}

#[tokio::test]
async fn test_missing_responses_time_out() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Peer that reads everything and never answers
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut sink = vec![0u8; 4096];
        while socket.read(&mut sink).await.map(|n| n > 0).unwrap_or(false) {}
    });

    let mut config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", 9, false));
    config.response_timeout = Duration::from_millis(200);
    let (sender, mut events) = MsrpSession::new(config);
    sender.set_remote_path(MsrpPath::local("127.0.0.1", port, false));
    sender
        .open(ConnectionMode::Active {
            host: "127.0.0.1".to_string(),
            port,
        })
        .await
        .unwrap();

    sender.spawn_send_chunks(
        &b"hello"[..],
        "msg-1".to_string(),
        "text/plain".to_string(),
        5,
        ChunkType::TextMessage,
    );

    match next_event(&mut events).await {
        MsrpEvent::TransferError { message_id, error, chunk_type } => {
            assert_eq!(message_id.as_deref(), Some("msg-1"));
            assert!(matches!(error, MsrpError::Timeout(_)));
            assert!(error.to_string().contains("response timeout 408"));
            assert_eq!(chunk_type, ChunkType::TextMessage);
        }
        other => panic!("unexpected event {:?}", other),
    }
    sender.close();
}

#[tokio::test]
async fn test_peer_disconnect_mid_message_reports_abort() {
    let (listener, port) = bind_with_probe(LOCALHOST, 0, 1).await.unwrap();
    let mut config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", port, false));
    config.connect_timeout = WAIT;
    let (receiver, mut events) = MsrpSession::new(config);
    receiver.set_remote_path(MsrpPath::local("127.0.0.1", 9, false));

    let accept = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.open(ConnectionMode::Passive { listener }).await })
    };

    let mut peer = tokio::net::TcpStream::connect((LOCALHOST, port)).await.unwrap();
    accept.await.unwrap().unwrap();
    peer.write_all(
        b"MSRP t1 SEND\r\nTo-Path: msrp://127.0.0.1/a;tcp\r\nFrom-Path: msrp://127.0.0.1/b;tcp\r\n\
Message-ID: m1\r\nByte-Range: 1-4/8\r\nContent-Type: text/plain\r\n\r\nabcd\r\n-------t1+\r\n",
    )
    .await
    .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        MsrpEvent::ChunkReceived { current: 4, total: 8, .. }
    ));

    let mut response = vec![0u8; 256];
    let n = timeout(WAIT, peer.read(&mut response)).await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&response[..n]).starts_with("MSRP t1 200 OK\r\n"));

    drop(peer);
    assert!(matches!(next_event(&mut events).await, MsrpEvent::TransferAborted));
    assert!(matches!(next_event(&mut events).await, MsrpEvent::ConnectionClosed));
}

#[tokio::test]
async fn test_passive_open_times_out_without_peer() {
    let (listener, port) = bind_with_probe(LOCALHOST, 0, 1).await.unwrap();
    let mut config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", port, false));
    config.connect_timeout = Duration::from_millis(100);
    let (session, _events) = MsrpSession::new(config);

    let result = session.open(ConnectionMode::Passive { listener }).await;
    assert!(matches!(result, Err(MsrpError::Timeout(_))));
}

#[tokio::test]
async fn test_concurrent_sends_are_acknowledged_separately() {
    use futures::{SinkExt, StreamExt};
    use rcs_msrp_core::{MsrpCodec, MsrpMessage, MsrpMethod};
    use tokio_util::codec::Framed;

    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Peer that ignores the first SEND carrying data and answers the rest
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(socket, MsrpCodec::new());
        let mut seen = 0;
        while let Some(Ok(message)) = framed.next().await {
            if message.method() != Some(&MsrpMethod::Send) || message.body.is_none() {
                continue;
            }
            seen += 1;
            if seen > 1 {
                let ok = MsrpMessage::response_to(&message, 200, "OK");
                if framed.send(ok).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut config = MsrpSessionConfig::new(MsrpPath::local("127.0.0.1", 9, false));
    config.response_timeout = Duration::from_millis(500);
    let (sender, _events) = MsrpSession::new(config);
    sender.set_remote_path(MsrpPath::local("127.0.0.1", port, false));
    sender
        .open(ConnectionMode::Active {
            host: "127.0.0.1".to_string(),
            port,
        })
        .await
        .unwrap();

    let first = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.send_chunks(&b"AAAAA"[..], "text/plain", 5).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.send_chunks(&b"BBBBB"[..], "text/plain", 5).await })
    };

    let first = timeout(WAIT, first).await.unwrap().unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap();
    assert!(matches!(first, Err(MsrpError::Timeout(_))));
    assert!(second.is_ok());
    sender.close();
}
