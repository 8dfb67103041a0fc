//! MSRP transport session
//!
//! One [`MsrpSession`] owns one TCP (optionally TLS) connection to the peer.
//! A reader task decodes incoming messages, answers SEND requests with
//! `200 OK` and turns them into [`MsrpEvent`]s; a writer task serializes every
//! outgoing message so responses and chunks never interleave on the wire.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "tls")]
use rustls::{ClientConfig, ServerConfig, ServerName};
#[cfg(feature = "tls")]
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::chunk::{headers, ByteRange, ContinuationFlag, MsrpCodec, MsrpMessage, MsrpMethod, MsrpStartLine};
use crate::error::{MsrpError, Result};
use crate::events::{ChunkType, MsrpEvent};
use crate::path::{generate_transaction_id, MsrpPath};
use crate::transaction::{TransactionTracker, WaitOutcome};

/// Default data size of one SEND chunk
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

/// Default wait for the transaction responses of a transfer
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for the TCP connection (and TLS handshake) to come up
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings of one MSRP session
#[derive(Debug, Clone)]
pub struct MsrpSessionConfig {
    /// Our `From-Path`
    pub local_path: MsrpPath,
    pub chunk_size: usize,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    /// Ask the peer for a transaction response to each chunk
    pub failure_report: bool,
    /// Ask the peer for a REPORT once the last chunk arrived
    pub success_report: bool,
    /// Keep incoming chunks in memory and hand the full message to `DataReceived`
    pub buffer_incoming: bool,
}

impl MsrpSessionConfig {
    pub fn new(local_path: MsrpPath) -> Self {
        Self {
            local_path,
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            failure_report: true,
            success_report: false,
            buffer_incoming: false,
        }
    }
}

/// How the connection is established
#[derive(Debug)]
pub enum ConnectionMode {
    /// Dial the peer (SDP `a=setup:active`)
    Active { host: String, port: u16 },
    /// Wait for the peer on a bound listener (SDP `a=setup:passive`)
    Passive { listener: TcpListener },
}

/// TLS parameters for `msrps` sessions
#[cfg(feature = "tls")]
#[derive(Clone)]
pub enum TlsMode {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

trait MsrpStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> MsrpStream for T {}

type BoxedStream = Box<dyn MsrpStream>;

/// An MSRP session bound to one connection
#[derive(Clone)]
pub struct MsrpSession {
    inner: Arc<MsrpSessionInner>,
}

struct MsrpSessionInner {
    config: MsrpSessionConfig,
    remote_path: Mutex<Option<MsrpPath>>,
    events_tx: mpsc::UnboundedSender<MsrpEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<MsrpMessage>>>,
    tracker: TransactionTracker,
    /// Held for the whole of an outgoing message; the tracker covers one at a time
    send_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    transfer_cancelled: AtomicBool,
    established: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    tls: Mutex<Option<TlsMode>>,
}

/// Reassembly state of the incoming message
#[derive(Default)]
struct IncomingMessage {
    in_progress: bool,
    received: u64,
    buffer: BytesMut,
}

impl IncomingMessage {
    fn reset(&mut self) {
        self.in_progress = false;
        self.received = 0;
        self.buffer.clear();
    }
}

impl MsrpSession {
    /// Create an unconnected session and the receiver for its events
    pub fn new(config: MsrpSessionConfig) -> (Self, mpsc::UnboundedReceiver<MsrpEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = MsrpSession {
            inner: Arc::new(MsrpSessionInner {
                config,
                remote_path: Mutex::new(None),
                events_tx,
                outbound: Mutex::new(None),
                tracker: TransactionTracker::new(),
                send_lock: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                transfer_cancelled: AtomicBool::new(false),
                established: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                #[cfg(feature = "tls")]
                tls: Mutex::new(None),
            }),
        };
        (session, events_rx)
    }

    pub fn local_path(&self) -> &MsrpPath {
        &self.inner.config.local_path
    }

    pub fn remote_path(&self) -> Option<MsrpPath> {
        self.inner.remote_path.lock().clone()
    }

    /// Set the peer's path, learned from its SDP `a=path` attribute
    pub fn set_remote_path(&self, path: MsrpPath) {
        *self.inner.remote_path.lock() = Some(path);
    }

    #[cfg(feature = "tls")]
    pub fn set_tls(&self, mode: TlsMode) {
        *self.inner.tls.lock() = Some(mode);
    }

    /// True once anything was received from the peer
    pub fn is_established(&self) -> bool {
        self.inner.established.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Establish the connection and start the I/O tasks
    pub async fn open(&self, mode: ConnectionMode) -> Result<()> {
        if self.is_closed() {
            return Err(MsrpError::ConnectionClosed);
        }
        if self.is_connected() {
            return Ok(());
        }

        let stream = match mode {
            ConnectionMode::Active { host, port } => {
                info!("Connecting MSRP session to {}:{}", host, port);
                self.bounded(async {
                    let tcp = TcpStream::connect((host.as_str(), port)).await?;
                    if let Err(e) = tcp.set_nodelay(true) {
                        debug!("Could not disable Nagle on MSRP socket: {}", e);
                    }
                    self.wrap_client(tcp, &host).await
                })
                .await?
            }
            ConnectionMode::Passive { listener } => {
                info!("Waiting for MSRP connection on {}", listener.local_addr()?);
                self.bounded(async {
                    let (tcp, peer) = listener.accept().await?;
                    info!("MSRP connection accepted from {}", peer);
                    self.wrap_server(tcp).await
                })
                .await?
            }
        };

        self.start_io(stream);
        Ok(())
    }

    /// Send the empty SEND that binds the connection to the session
    pub fn send_empty_chunk(&self) -> Result<()> {
        let outbound = self.outbound()?;
        let (to, from) = self.paths()?;
        info!("Send an empty MSRP chunk");
        let request = MsrpMessage::send(
            generate_transaction_id(),
            &to,
            &from,
            &generate_transaction_id(),
        );
        outbound.send(request).map_err(|_| MsrpError::NotConnected)
    }

    /// Send `total_size` bytes read from `source` as one MSRP message.
    ///
    /// With failure reports enabled the call returns once every chunk has been
    /// acknowledged, or fails with [`MsrpError::Timeout`] when a response is
    /// missing after the response timeout. Concurrent calls are queued and
    /// sent one message after the other.
    pub async fn send_chunks<R>(&self, mut source: R, content_type: &str, total_size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let _sending = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Err(MsrpError::ConnectionClosed),
            guard = self.inner.send_lock.lock() => guard,
        };
        let outbound = self.outbound()?;
        let (to, from) = self.paths()?;
        let failure_report = self.inner.config.failure_report;
        let success_report = self.inner.config.success_report;
        let msrp_message_id = generate_transaction_id();

        self.inner.transfer_cancelled.store(false, Ordering::SeqCst);
        self.inner.tracker.reset();

        info!(
            "Sending {} bytes of {} as MSRP message {}",
            total_size, content_type, msrp_message_id
        );

        let mut buf = vec![0u8; self.inner.config.chunk_size.max(1)];
        let mut sent: u64 = 0;
        while sent < total_size {
            if self.inner.transfer_cancelled.load(Ordering::SeqCst) {
                return Err(MsrpError::TransferAborted);
            }

            let want = (total_size - sent).min(buf.len() as u64) as usize;
            let n = read_full(&mut source, &mut buf[..want])
                .await
                .map_err(MsrpError::from_source_error)?;
            if n == 0 {
                return Err(MsrpError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("content ended after {} of {} bytes", sent, total_size),
                )));
            }

            let first = sent + 1;
            let last = sent + n as u64;
            let flag = if last >= total_size {
                ContinuationFlag::Last
            } else {
                ContinuationFlag::More
            };
            let transaction_id = generate_transaction_id();
            if failure_report {
                self.inner.tracker.register(&transaction_id, last, total_size);
            }

            let chunk = MsrpMessage::send(&transaction_id, &to, &from, &msrp_message_id)
                .with_header(headers::BYTE_RANGE, ByteRange::new(first, last, total_size).to_string())
                .with_header(headers::FAILURE_REPORT, if failure_report { "yes" } else { "no" })
                .with_header(headers::SUCCESS_REPORT, if success_report { "yes" } else { "no" })
                .with_header(headers::CONTENT_TYPE, content_type)
                .with_body(Bytes::copy_from_slice(&buf[..n]))
                .with_flag(flag);
            outbound.send(chunk).map_err(|_| MsrpError::NotConnected)?;

            if !failure_report {
                self.emit(MsrpEvent::TransferProgress {
                    current: last,
                    total: total_size,
                });
            }
            sent = last;
        }

        if !failure_report {
            return Ok(());
        }

        let timeout = self.inner.config.response_timeout;
        match self.inner.tracker.wait_all(timeout).await {
            WaitOutcome::AllAcknowledged => Ok(()),
            WaitOutcome::ErrorResponse(status) => Err(MsrpError::ErrorResponse { status }),
            WaitOutcome::TimedOut => Err(MsrpError::Timeout(timeout)),
            WaitOutcome::Terminated if self.is_closed() => Err(MsrpError::TransferAborted),
            WaitOutcome::Terminated => Err(MsrpError::ConnectionClosed),
        }
    }

    /// Run [`send_chunks`](Self::send_chunks) in the background and report the
    /// outcome as `DataTransferred` or `TransferError`.
    pub fn spawn_send_chunks<R>(
        &self,
        source: R,
        message_id: String,
        content_type: String,
        total_size: u64,
        chunk_type: ChunkType,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            match session.send_chunks(source, &content_type, total_size).await {
                Ok(()) => {
                    info!("MSRP message {} transferred", message_id);
                    session.emit(MsrpEvent::DataTransferred { message_id });
                }
                Err(MsrpError::TransferAborted) => {
                    debug!("MSRP transfer of {} cancelled", message_id);
                }
                Err(e) if session.is_closed() => {
                    debug!("MSRP transfer of {} stopped by close: {}", message_id, e);
                }
                Err(e) => {
                    warn!("MSRP transfer of {} failed: {}", message_id, e);
                    session.emit(MsrpEvent::TransferError {
                        message_id: Some(message_id),
                        error: e,
                        chunk_type,
                    });
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    /// Stop the outgoing transfer after the chunk in flight
    pub fn cancel_transfer(&self) {
        self.inner.transfer_cancelled.store(true, Ordering::SeqCst);
    }

    /// Close the connection and stop every task. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing MSRP session {}", self.inner.config.local_path);
        self.inner.transfer_cancelled.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.tracker.terminate();
        self.inner.cancel.cancel();
        self.inner.outbound.lock().take();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn emit(&self, event: MsrpEvent) {
        if self.inner.events_tx.send(event).is_err() {
            debug!("MSRP event dropped, receiver is gone");
        }
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<MsrpMessage>> {
        self.inner
            .outbound
            .lock()
            .clone()
            .ok_or(MsrpError::NotConnected)
    }

    fn paths(&self) -> Result<(String, String)> {
        let remote = self
            .remote_path()
            .ok_or_else(|| MsrpError::config("remote MSRP path is not known"))?;
        Ok((remote.to_string(), self.inner.config.local_path.to_string()))
    }

    fn queue(&self, message: MsrpMessage) {
        if let Some(outbound) = self.inner.outbound.lock().as_ref() {
            if outbound.send(message).is_err() {
                debug!("MSRP writer is gone, message dropped");
            }
        }
    }

    /// Apply the connect timeout and abort when the session is closed meanwhile
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.inner.config.connect_timeout;
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(MsrpError::ConnectionClosed),
            result = tokio::time::timeout(timeout, fut) => {
                result.map_err(|_| MsrpError::Timeout(timeout))?
            }
        }
    }

    #[cfg(feature = "tls")]
    async fn wrap_client(&self, tcp: TcpStream, host: &str) -> Result<BoxedStream> {
        let tls = self.inner.tls.lock().clone();
        match tls {
            Some(TlsMode::Client(config)) => {
                let server_name = ServerName::try_from(host)
                    .map_err(|e| MsrpError::tls(format!("invalid server name '{}': {}", host, e)))?;
                let stream = TlsConnector::from(config)
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| MsrpError::tls(e.to_string()))?;
                debug!("MSRP TLS handshake with {} complete", host);
                Ok(Box::new(stream))
            }
            Some(TlsMode::Server(_)) => Err(MsrpError::config(
                "server TLS parameters given for an active MSRP connection",
            )),
            None => Ok(Box::new(tcp)),
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_client(&self, tcp: TcpStream, _host: &str) -> Result<BoxedStream> {
        Ok(Box::new(tcp))
    }

    #[cfg(feature = "tls")]
    async fn wrap_server(&self, tcp: TcpStream) -> Result<BoxedStream> {
        let tls = self.inner.tls.lock().clone();
        match tls {
            Some(TlsMode::Server(config)) => {
                let stream = TlsAcceptor::from(config)
                    .accept(tcp)
                    .await
                    .map_err(|e| MsrpError::tls(e.to_string()))?;
                Ok(Box::new(stream))
            }
            Some(TlsMode::Client(_)) => Err(MsrpError::config(
                "client TLS parameters given for a passive MSRP connection",
            )),
            None => Ok(Box::new(tcp)),
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_server(&self, tcp: TcpStream) -> Result<BoxedStream> {
        Ok(Box::new(tcp))
    }

    fn start_io(&self, stream: BoxedStream) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.inner.outbound.lock() = Some(out_tx);
        self.inner.connected.store(true, Ordering::SeqCst);

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, MsrpCodec::new()),
            out_rx,
            self.inner.cancel.clone(),
        ));
        let session = self.clone();
        let reader = tokio::spawn(async move {
            session
                .read_loop(FramedRead::new(read_half, MsrpCodec::new()))
                .await
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.push(writer);
        tasks.push(reader);
    }

    async fn read_loop(self, mut stream: FramedRead<ReadHalf<BoxedStream>, MsrpCodec>) {
        let mut incoming = IncomingMessage::default();
        let cancel = self.inner.cancel.clone();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(message)) => {
                    self.inner.established.store(true, Ordering::SeqCst);
                    if message.is_request() {
                        self.handle_request(message, &mut incoming);
                    } else {
                        self.handle_response(&message);
                    }
                }
                Some(Err(e)) => {
                    error!("Unreadable MSRP data, dropping connection: {}", e);
                    break;
                }
                None => {
                    debug!("MSRP connection closed by peer");
                    break;
                }
            }
        }

        if self.is_closed() {
            return;
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.outbound.lock().take();
        self.inner.tracker.terminate();
        if incoming.in_progress {
            self.emit(MsrpEvent::TransferAborted);
        }
        self.emit(MsrpEvent::ConnectionClosed);
    }

    fn handle_request(&self, request: MsrpMessage, incoming: &mut IncomingMessage) {
        match request.method() {
            Some(MsrpMethod::Send) => {}
            Some(MsrpMethod::Report) => {
                debug!(
                    "MSRP REPORT received for message {:?}: {:?}",
                    request.message_id(),
                    request.header(headers::STATUS)
                );
                return;
            }
            _ => {
                warn!("Unsupported MSRP request {:?}", request.start_line);
                self.queue(MsrpMessage::response_to(&request, 501, "Not Implemented"));
                return;
            }
        }

        if request.wants_response() {
            self.queue(MsrpMessage::response_to(&request, 200, "OK"));
        }

        if request.flag == ContinuationFlag::Abort {
            info!("Incoming MSRP transfer aborted by peer");
            incoming.reset();
            self.emit(MsrpEvent::TransferAborted);
            return;
        }

        let Some(data) = request.body.clone() else {
            debug!("Empty MSRP chunk received");
            return;
        };

        let message_id = request.message_id().unwrap_or_default().to_string();
        let range = request.byte_range();
        incoming.in_progress = true;
        incoming.received += data.len() as u64;
        let current = range.and_then(|r| r.end).unwrap_or(incoming.received);
        let total = range.and_then(|r| r.total).unwrap_or(0);

        if self.inner.config.buffer_incoming {
            incoming.buffer.extend_from_slice(&data);
        }
        self.emit(MsrpEvent::ChunkReceived {
            message_id: message_id.clone(),
            data,
            current,
            total,
        });

        if request.flag != ContinuationFlag::Last {
            return;
        }

        info!("MSRP message {} received ({} bytes)", message_id, incoming.received);
        let data = incoming.buffer.split().freeze();
        incoming.reset();
        self.emit(MsrpEvent::DataReceived {
            message_id,
            data,
            content_type: request.content_type().map(str::to_string),
        });

        let success_report = matches!(
            request.header(headers::SUCCESS_REPORT),
            Some(v) if v.eq_ignore_ascii_case("yes")
        );
        if success_report {
            self.queue(success_report_for(&request, current, total));
        }
    }

    fn handle_response(&self, response: &MsrpMessage) {
        let status = response.status().unwrap_or_default();
        if !(200..300).contains(&status) {
            warn!(
                "MSRP error response {} for transaction {}",
                status, response.transaction_id
            );
        } else if let Some((current, total)) = self.inner.tracker.lookup(&response.transaction_id) {
            // Progress goes out before the waiter is woken so it precedes DataTransferred
            if !self.inner.transfer_cancelled.load(Ordering::SeqCst) {
                self.emit(MsrpEvent::TransferProgress { current, total });
            }
        }
        self.inner.tracker.on_response(&response.transaction_id, status);
    }
}

/// REPORT confirming a complete incoming message
fn success_report_for(request: &MsrpMessage, current: u64, total: u64) -> MsrpMessage {
    let to = request.header(headers::FROM_PATH).unwrap_or_default();
    let from = request.header(headers::TO_PATH).unwrap_or_default();
    let mut report = MsrpMessage::send(
        generate_transaction_id(),
        to,
        from,
        request.message_id().unwrap_or_default(),
    )
    .with_header(headers::BYTE_RANGE, format!("1-{}/{}", current, total))
    .with_header(headers::STATUS, "000 200 OK");
    report.start_line = MsrpStartLine::Request(MsrpMethod::Report);
    report
}

async fn write_loop(
    mut sink: FramedWrite<WriteHalf<BoxedStream>, MsrpCodec>,
    mut rx: mpsc::UnboundedReceiver<MsrpMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        if let Err(e) = sink.send(message).await {
            warn!("Failed to write MSRP message: {}", e);
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("MSRP writer shutdown: {}", e);
    }
}

/// Fill `buf` unless the source ends first; returns the bytes read
async fn read_full<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
