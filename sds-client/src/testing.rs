//! A mocked JANUS server for connection-level tests.
//!
//! Speaks just enough SDS to exercise the client: it acknowledges the HELLO,
//! assigns a client id to the intro message and hands every later request to
//! a test-supplied handler that decides which bytes to answer with.

use bytes::Bytes;
use sds_protocol::{
    read_u32_be, ParameterName, SdsRequest, SdsResponse, ACK, HELLO, INVALID,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Client id the mock assigns on connect.
pub(crate) const MOCK_CLIENT_ID: u32 = 42;

/// Installs a test subscriber honoring `RUST_LOG`; repeated calls are
/// no-ops.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One buffer to write back, optionally after a delay (to simulate a slow
/// server).
pub(crate) struct MockReply {
    pub delay: Duration,
    pub bytes: Vec<u8>,
}

pub(crate) fn reply(bytes: Vec<u8>) -> MockReply {
    MockReply {
        delay: Duration::ZERO,
        bytes,
    }
}

pub(crate) fn delayed_reply(delay_ms: u64, bytes: Vec<u8>) -> MockReply {
    MockReply {
        delay: Duration::from_millis(delay_ms),
        bytes,
    }
}

/// Builds a parameterized response message (head with operation 0, object id
/// `0:0`).
pub(crate) fn response_with(build: impl FnOnce(&mut SdsRequest)) -> Vec<u8> {
    let mut response = SdsRequest::with_operation(0u8);
    build(&mut response);
    response.pack().expect("mock response").to_vec()
}

/// The bare 13-byte head some operations acknowledge with.
pub(crate) fn empty_response() -> Vec<u8> {
    response_with(|_| {})
}

type Handler = Arc<dyn Fn(&SdsResponse) -> Vec<MockReply> + Send + Sync>;

pub(crate) struct MockJanusServer {
    accept_task: JoinHandle<()>,
}

impl MockJanusServer {
    /// Spawns a server that completes the handshake but answers no requests.
    pub(crate) async fn spawn() -> (SocketAddr, Self) {
        Self::spawn_with(Arc::new(|_| Vec::new())).await
    }

    /// Spawns a server that rejects the HELLO with INVALID.
    pub(crate) async fn spawn_refusing() -> (SocketAddr, Self) {
        Self::spawn_inner(Arc::new(|_| Vec::new()), true).await
    }

    pub(crate) async fn spawn_with(handler: Handler) -> (SocketAddr, Self) {
        Self::spawn_inner(handler, false).await
    }

    async fn spawn_inner(handler: Handler, refuse: bool) -> (SocketAddr, Self) {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("mock bind");
        let addr = listener.local_addr().expect("mock addr");
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(serve(socket, handler, refuse));
            }
        });
        (addr, Self { accept_task })
    }
}

impl Drop for MockJanusServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(mut socket: TcpStream, handler: Handler, refuse: bool) {
    let mut buf = vec![0u8; 8192];
    let mut acc: Vec<u8> = Vec::new();
    let mut hello_done = false;
    let mut intro_done = false;

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        acc.extend_from_slice(&buf[..n]);

        if !hello_done {
            if acc.len() < HELLO.len() {
                continue;
            }
            let rest = acc.split_off(HELLO.len());
            assert_eq!(acc, HELLO, "mock: expected HELLO");
            acc = rest;
            hello_done = true;
            if refuse {
                let _ = socket.write_all(INVALID).await;
                return;
            }
            if socket.write_all(ACK).await.is_err() {
                return;
            }
        }

        while acc.len() >= 4 {
            let declared = read_u32_be(&acc, 0) as usize;
            if acc.len() < declared {
                break;
            }
            let frame: Vec<u8> = acc.drain(..declared).collect();

            if !intro_done {
                // the intro body is a raw string, not parameters
                intro_done = true;
                let assignment = response_with(|response| {
                    response.add_parameter(ParameterName::ClientId, MOCK_CLIENT_ID);
                });
                if socket.write_all(&assignment).await.is_err() {
                    return;
                }
                continue;
            }

            let request = SdsResponse::parse(Bytes::from(frame)).expect("mock: request parse");
            for MockReply { delay, bytes } in handler(&request) {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if socket.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}
