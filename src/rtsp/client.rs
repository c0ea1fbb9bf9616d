//! RTSP client
//!
//! Multi-peer client that connects lazily on the first operation against a
//! `(host, port)` endpoint and reuses the connection afterwards. Requests
//! are paired with responses by CSeq, generated monotonically per
//! connection. Server-initiated requests (RAVENNA ANNOUNCE updates) are
//! handed to registered callbacks and acknowledged.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{NodeError, NodeResult};
use crate::rtsp::connection::RtspConnection;
use crate::rtsp::message::{RtspMessage, RtspRequest, RtspResponse};

/// Response timeout for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type AnnounceCallback = Box<dyn Fn(SocketAddr, &RtspRequest) + Send + Sync>;
type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<RtspResponse>>>>;
type ConnectionMap = Arc<Mutex<HashMap<SocketAddr, Arc<ClientConnection>>>>;

struct ClientConnection {
    connection: RtspConnection,
    cseq: AtomicU32,
    pending: PendingMap,
}

/// A connection-reusing RTSP client.
pub struct RtspClient {
    connections: ConnectionMap,
    announce_callbacks: Arc<Mutex<Vec<AnnounceCallback>>>,
}

impl Default for RtspClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RtspClient {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            announce_callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a callback for server-initiated requests (ANNOUNCE).
    pub fn on_server_request(
        &self,
        callback: impl Fn(SocketAddr, &RtspRequest) + Send + Sync + 'static,
    ) {
        self.announce_callbacks.lock().push(Box::new(callback));
    }

    async fn get_or_connect(&self, peer: SocketAddr) -> NodeResult<Arc<ClientConnection>> {
        if let Some(existing) = self.connections.lock().get(&peer) {
            return Ok(existing.clone());
        }

        let (connection, mut messages) = RtspConnection::connect(peer).await?;
        let client_connection = Arc::new(ClientConnection {
            connection,
            cseq: AtomicU32::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
        });

        // Dispatcher: pairs responses by CSeq, surfaces server requests.
        let pending = client_connection.pending.clone();
        let callbacks = self.announce_callbacks.clone();
        let connections = self.connections.clone();
        let weak_connection = Arc::downgrade(&client_connection);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    RtspMessage::Response(response) => {
                        let cseq = response.headers.cseq();
                        let waiter = cseq.and_then(|cseq| pending.lock().remove(&cseq));
                        match waiter {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => trace!("unmatched response with CSeq {cseq:?}"),
                        }
                    }
                    RtspMessage::Request(request) => {
                        trace!("server request from {peer}: {request}");
                        for callback in callbacks.lock().iter() {
                            callback(peer, &request);
                        }
                        if let Some(connection) = weak_connection.upgrade() {
                            connection
                                .connection
                                .send_response(&RtspResponse::to_request(&request, 200, "OK"));
                        }
                    }
                }
            }
            debug!("RTSP client connection to {peer} ended");
            connections.lock().remove(&peer);
        });

        self.connections
            .lock()
            .insert(peer, client_connection.clone());
        Ok(client_connection)
    }

    /// Sends a request and waits for the matching response.
    ///
    /// The CSeq header is always (re)generated by the client.
    pub async fn send_request(
        &self,
        peer: SocketAddr,
        mut request: RtspRequest,
    ) -> NodeResult<RtspResponse> {
        let connection = self.get_or_connect(peer).await?;

        let cseq = connection.cseq.fetch_add(1, Ordering::Relaxed) + 1;
        request.headers.set("CSeq", cseq.to_string());

        let (tx, rx) = oneshot::channel();
        connection.pending.lock().insert(cseq, tx);
        connection.connection.send_request(&request);

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(NodeError::OperationAborted),
            Err(_) => {
                connection.pending.lock().remove(&cseq);
                warn!("RTSP request to {peer} timed out");
                Err(NodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "rtsp request timed out",
                )))
            }
        }
    }

    pub async fn options(&self, peer: SocketAddr) -> NodeResult<RtspResponse> {
        self.send_request(peer, RtspRequest::new("OPTIONS", "*"))
            .await
    }

    pub async fn describe(&self, peer: SocketAddr, path: &str) -> NodeResult<RtspResponse> {
        let mut request = RtspRequest::new("DESCRIBE", format_uri(peer, path));
        request.headers.set("Accept", "application/sdp");
        self.send_request(peer, request).await
    }

    pub async fn setup(&self, peer: SocketAddr, path: &str, transport: &str) -> NodeResult<RtspResponse> {
        let mut request = RtspRequest::new("SETUP", format_uri(peer, path));
        request.headers.set("Transport", transport);
        self.send_request(peer, request).await
    }

    pub async fn play(&self, peer: SocketAddr, path: &str, session: &str) -> NodeResult<RtspResponse> {
        let mut request = RtspRequest::new("PLAY", format_uri(peer, path));
        request.headers.set("Session", session);
        self.send_request(peer, request).await
    }

    pub async fn teardown(&self, peer: SocketAddr, path: &str, session: &str) -> NodeResult<RtspResponse> {
        let mut request = RtspRequest::new("TEARDOWN", format_uri(peer, path));
        request.headers.set("Session", session);
        self.send_request(peer, request).await
    }

    pub async fn announce(&self, peer: SocketAddr, path: &str, sdp: String) -> NodeResult<RtspResponse> {
        let mut request = RtspRequest::new("ANNOUNCE", format_uri(peer, path));
        request.headers.set("Content-Type", "application/sdp");
        request.body = sdp.into_bytes();
        self.send_request(peer, request).await
    }

    /// Drops the connection to a peer; the next operation reconnects.
    pub fn disconnect(&self, peer: SocketAddr) {
        if let Some(connection) = self.connections.lock().remove(&peer) {
            connection.connection.close();
        }
    }

    pub fn disconnect_all(&self) {
        for (_, connection) in self.connections.lock().drain() {
            connection.connection.close();
        }
    }

    /// Endpoints with a live connection.
    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.connections.lock().keys().copied().collect()
    }
}

fn format_uri(peer: SocketAddr, path: &str) -> String {
    format!("rtsp://{peer}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal scripted peer answering every request with 200 and the
    /// mirrored CSeq.
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut text = String::new();
            loop {
                let read = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                text.push_str(std::str::from_utf8(&buf[..read]).unwrap());
                while let Some(end) = text.find("\r\n\r\n") {
                    let head: String = text.drain(..end + 4).collect();
                    let cseq = head
                        .lines()
                        .find(|l| l.to_ascii_lowercase().starts_with("cseq:"))
                        .map(|l| l[5..].trim().to_string())
                        .unwrap_or_default();
                    let reply = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n");
                    stream.write_all(reply.as_bytes()).await.unwrap();
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_cseq_increments_per_connection() {
        let addr = spawn_echo_server().await;
        let client = RtspClient::new();

        let first = client.options(addr).await.unwrap();
        let second = client.options(addr).await.unwrap();
        assert_eq!(first.headers.cseq(), Some(1));
        assert_eq!(second.headers.cseq(), Some(2));

        // Both requests shared one connection
        assert_eq!(client.connected_peers().len(), 1);
    }

    #[tokio::test]
    async fn test_describe_roundtrip() {
        let addr = spawn_echo_server().await;
        let client = RtspClient::new();
        let response = client.describe(addr, "/by-name/studio").await.unwrap();
        assert!(response.is_success());
    }
}
