//! Connection management and request/response correlation.

use crate::error::ClientError;
use sds_protocol::{
    MessageScanner, ParameterName, SdsRequest, SdsResponse, DEFAULT_PORT, HELLO,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

/// Default timeout for a single request/response cycle.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default timeout for the TCP connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host (IPv4 address or hostname).
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Name this client introduces itself with; shows up in the server's
    /// log files.
    pub client_name: String,
    /// Timeout for the TCP connect attempt.
    pub connect_timeout: Duration,
    /// Timeout for each request/response cycle.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            client_name: client_name.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// The single pending request slot. The sequence number is an in-process
/// correlation token bound at send time; the wire protocol itself carries
/// none, so a response is attributed to whatever request is pending when it
/// arrives, and dropped if none is.
struct Pending {
    seq: u64,
    tx: oneshot::Sender<Result<SdsResponse, ClientError>>,
}

/// A connection to a JANUS server.
///
/// Owns one socket and one pending-request slot. Requests are serialized:
/// the request gate is held for the whole send/receive cycle, so concurrent
/// callers queue in FIFO order and responses are delivered in request order.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream (for sending requests).
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half of the stream (owned by the read loop once it runs).
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Reassembles inbound chunks into messages.
    scanner: Mutex<MessageScanner>,
    /// The in-flight request, if any.
    pending: StdMutex<Option<Pending>>,
    /// Serializes request/response cycles.
    gate: Mutex<()>,
    /// Correlation token source.
    next_seq: AtomicU64,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            scanner: Mutex::new(MessageScanner::new()),
            pending: StdMutex::new(None),
            gate: Mutex::new(()),
            next_seq: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establishes the TCP connection and performs the SDS handshake.
    /// Returns the client id the server assigned.
    pub async fn connect(&self) -> Result<u32, ClientError> {
        let addr = (self.config.host.as_str(), self.config.port);
        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout))?
            .map_err(ClientError::Io)?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.scanner.lock().await.reset();

        // the handshake reads the socket directly; the read loop must not
        // be running yet
        self.write_bytes(HELLO).await?;
        let response = self.read_single_message().await?;
        if response.is_invalid() {
            tracing::debug!("server refused connection");
            return Err(ClientError::Refused);
        }
        if !response.is_ack() {
            return Err(ClientError::Handshake(response.as_bytes().len()));
        }

        // hello ack'ed, no SSL; introduce ourselves. The body is a bare
        // zero-terminated string, not an encoded parameter.
        let mut intro = SdsRequest::with_operation(0u8);
        let description = format!("{} on {}", self.config.client_name, std::env::consts::OS);
        intro.add_raw(description.as_bytes());
        intro.add_raw(&[0]);
        self.write_bytes(&intro.pack()?).await?;

        let response = self.read_single_message().await?;
        let client_id = response.get_int(ParameterName::ClientId)?;
        tracing::debug!(client_id, "connection established");

        self.connected.store(true, Ordering::SeqCst);
        Ok(client_id)
    }

    /// Sends a request and waits for the server's response.
    pub async fn send(&self, request: SdsRequest) -> Result<SdsResponse, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        let packed = request.pack()?;

        // held for the whole cycle; tokio mutexes queue waiters FIFO
        let _gate = self.gate.lock().await;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().expect("pending lock") = Some(Pending { seq, tx });

        tracing::debug!(seq, len = packed.len(), operation = packed[12], "sending request");
        if let Err(err) = self.write_bytes(&packed).await {
            self.clear_pending(seq);
            return Err(err);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                // drop the slot so a late response cannot be mistaken for
                // the answer to a later request
                self.clear_pending(seq);
                tracing::debug!(seq, "request timed out");
                Err(ClientError::Timeout(self.config.request_timeout))
            }
        }
    }

    /// Sends a request without waiting for a response. The server answers
    /// the disconnect message with silence, so waiting would only run into
    /// the timeout.
    pub async fn send_no_response(&self, request: SdsRequest) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        let packed = request.pack()?;
        let _gate = self.gate.lock().await;
        tracing::debug!(len = packed.len(), operation = packed[12], "sending fire-and-forget");
        self.write_bytes(&packed).await
    }

    /// Reads and dispatches responses; run this in a background task after
    /// [`connect`](Connection::connect) succeeds. Returns when the server
    /// closes the connection.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let n = {
                let mut reader_guard = self.reader.lock().await;
                let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await.map_err(ClientError::Io)?
            };

            if n == 0 {
                tracing::debug!("server closed the connection");
                self.connected.store(false, Ordering::SeqCst);
                self.settle(Err(ClientError::ConnectionClosed));
                return Ok(());
            }

            let mut scanner = self.scanner.lock().await;
            scanner.extend(&buf[..n]);
            loop {
                match scanner.next_message() {
                    Ok(Some(message)) => self.settle(Ok(message)),
                    Ok(None) => break,
                    // the scanner consumed the malformed message; state is
                    // clean for the next one
                    Err(err) => self.settle(Err(err.into())),
                }
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Half-closes the connection: shuts the write side down so the server
    /// sees EOF. The read loop keeps draining until the server closes its
    /// side in turn.
    pub async fn shutdown_writer(&self) -> Result<(), ClientError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await.map_err(ClientError::Io)?;
        }
        Ok(())
    }

    /// Tears the connection down and fails any in-flight request.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        self.settle(Err(ClientError::ConnectionClosed));
        tracing::debug!("connection closed");
    }

    /// Delivers a result to the pending request, or drops it if none is
    /// waiting (a late response after a timeout lands here).
    fn settle(&self, result: Result<SdsResponse, ClientError>) {
        let slot = self.pending.lock().expect("pending lock").take();
        match slot {
            Some(pending) => {
                let _ = pending.tx.send(result);
            }
            None => match result {
                Ok(message) => tracing::warn!(
                    len = message.as_bytes().len(),
                    "dropping response with no pending request"
                ),
                Err(err) => tracing::debug!(%err, "discarding error with no pending request"),
            },
        }
    }

    /// Clears the pending slot if it still belongs to `seq`. A newer request
    /// may have claimed the slot by the time a stale timeout fires.
    fn clear_pending(&self, seq: u64) {
        let mut slot = self.pending.lock().expect("pending lock");
        if slot.as_ref().map_or(false, |p| p.seq == seq) {
            *slot = None;
        }
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(bytes).await.map_err(ClientError::Io)?;
        Ok(())
    }

    /// Reads until the scanner yields one message. Only used during the
    /// handshake, before the read loop is running.
    async fn read_single_message(&self) -> Result<SdsResponse, ClientError> {
        let timeout = self.config.request_timeout;
        let mut buf = vec![0u8; self.config.read_buffer_size];

        tokio::time::timeout(timeout, async {
            loop {
                let n = {
                    let mut reader_guard = self.reader.lock().await;
                    let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
                    reader.read(&mut buf).await.map_err(ClientError::Io)?
                };
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }

                let mut scanner = self.scanner.lock().await;
                scanner.extend(&buf[..n]);
                if let Some(message) = scanner.next_message()? {
                    return Ok(message);
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
    }
}
