//! RTSP server
//!
//! Listens on a TCP endpoint and dispatches requests to handlers
//! registered per path. Connections attach to the paths they request;
//! `send_request` fans a server-initiated request (ANNOUNCE) out to every
//! connection attached to the path. The special `/all` path receives
//! every request that no explicit handler claimed.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::{NodeError, NodeResult};
use crate::rtsp::connection::RtspConnection;
use crate::rtsp::message::{RtspMessage, RtspRequest, RtspResponse};

/// Idle connections are closed after this long without a request.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Path receiving requests no explicit handler claimed.
pub const ALL_PATH: &str = "/all";

/// Handles requests for one registered path.
pub trait RtspHandler: Send + Sync {
    fn handle_request(&self, request: &RtspRequest) -> RtspResponse;
}

impl<F> RtspHandler for F
where
    F: Fn(&RtspRequest) -> RtspResponse + Send + Sync,
{
    fn handle_request(&self, request: &RtspRequest) -> RtspResponse {
        self(request)
    }
}

struct ConnectionEntry {
    connection: Arc<RtspConnection>,
    /// Paths this connection has requested; ANNOUNCE fan-out targets.
    paths: HashSet<String>,
    cseq: AtomicU32,
}

struct ServerInner {
    handlers: RwLock<HashMap<String, Arc<dyn RtspHandler>>>,
    connections: Mutex<HashMap<u64, ConnectionEntry>>,
    next_connection_id: AtomicU64,
    port: u16,
}

/// A route-dispatching, multi-peer RTSP server.
pub struct RtspServer {
    listener: Mutex<Option<TcpListener>>,
    inner: Arc<ServerInner>,
}

impl RtspServer {
    /// Binds the listening socket. Fatal configuration errors surface
    /// here, not in `run`.
    pub async fn bind(addr: SocketAddr) -> NodeResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Config(format!("cannot bind RTSP endpoint {addr}: {e}")))?;
        let port = listener.local_addr()?.port();
        info!("📞 RTSP server listening on port {port}");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            inner: Arc::new(ServerInner {
                handlers: RwLock::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(0),
                port,
            }),
        })
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn register_handler(&self, path: impl Into<String>, handler: Arc<dyn RtspHandler>) {
        let path = path.into();
        debug!("RTSP handler registered for {path}");
        self.inner.handlers.write().insert(path, handler);
    }

    pub fn unregister_handler(&self, path: &str) {
        self.inner.handlers.write().remove(path);
    }

    /// Fans `request` out to every connection attached to `path`.
    pub fn send_request(&self, path: &str, request: &RtspRequest) {
        let connections = self.inner.connections.lock();
        let mut sent = 0;
        for entry in connections.values() {
            if entry.paths.contains(path) {
                let mut request = request.clone();
                let cseq = entry.cseq.fetch_add(1, Ordering::Relaxed) + 1;
                request.headers.set("CSeq", cseq.to_string());
                entry.connection.send_request(&request);
                sent += 1;
            }
        }
        trace!("fanned out {} to {sent} connections on {path}", request.method);
    }

    /// Accepts connections until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> NodeResult<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(NodeError::Config("server already running".into()))?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept_connection(stream, peer),
                        Err(e) => warn!("RTSP accept error: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let mut connections = self.inner.connections.lock();
        for (_, entry) in connections.drain() {
            entry.connection.close();
        }
        info!("RTSP server stopped");
        Ok(())
    }

    fn accept_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        debug!("RTSP connection from {peer}");
        let (connection, mut messages) = RtspConnection::from_stream(stream, peer);
        let connection = Arc::new(connection);
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);

        self.inner.connections.lock().insert(
            id,
            ConnectionEntry {
                connection: connection.clone(),
                paths: HashSet::new(),
                cseq: AtomicU32::new(0),
            },
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                // Idle close applies until the connection attached to a
                // path; attached connections stay open for announcements.
                let attached = inner
                    .connections
                    .lock()
                    .get(&id)
                    .map(|entry| !entry.paths.is_empty())
                    .unwrap_or(false);

                let message = if attached {
                    messages.recv().await
                } else {
                    match tokio::time::timeout(IDLE_TIMEOUT, messages.recv()).await {
                        Ok(message) => message,
                        Err(_) => {
                            debug!("closing idle RTSP connection from {peer}");
                            break;
                        }
                    }
                };

                let Some(message) = message else {
                    break; // disconnected
                };

                match message {
                    RtspMessage::Request(request) => {
                        let response = inner.dispatch(id, &request);
                        connection.send_response(&response);
                    }
                    RtspMessage::Response(response) => {
                        // Reply to a fanned-out request; nothing to pair.
                        trace!("response {} from {peer}", response.status);
                    }
                }
            }

            inner.connections.lock().remove(&id);
            connection.close();
            debug!("RTSP connection from {peer} removed");
        });
    }
}

impl ServerInner {
    fn dispatch(&self, connection_id: u64, request: &RtspRequest) -> RtspResponse {
        let path = request.path().to_string();
        trace!("dispatching {} {path}", request.method);

        if request.method == "OPTIONS" {
            let mut response = RtspResponse::to_request(request, 200, "OK");
            response
                .headers
                .set("Public", "DESCRIBE, SETUP, PLAY, TEARDOWN, ANNOUNCE, OPTIONS");
            return response;
        }

        // Attach the connection to the path for later fan-out
        if let Some(entry) = self.connections.lock().get_mut(&connection_id) {
            entry.paths.insert(path.clone());
        }

        let handler = {
            let handlers = self.handlers.read();
            handlers
                .get(&path)
                .or_else(|| handlers.get(ALL_PATH))
                .cloned()
        };

        match handler {
            Some(handler) => {
                let mut response = handler.handle_request(request);
                // The CSeq always mirrors the request, whatever the
                // handler produced.
                if let Some(cseq) = request.headers.get("CSeq") {
                    response.headers.set("CSeq", cseq);
                }
                response
            }
            None => RtspResponse::to_request(request, 404, "Not Found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtsp::client::RtspClient;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::new([127, 0, 0, 1].into(), port)
    }

    async fn start_server() -> (Arc<RtspServer>, watch::Sender<bool>) {
        let server = Arc::new(RtspServer::bind(local(0)).await.unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(shutdown_rx).await.unwrap();
        });
        (server, shutdown_tx)
    }

    #[tokio::test]
    async fn test_describe_dispatch_and_cseq() {
        let (server, _shutdown) = start_server().await;
        server.register_handler(
            "/by-name/studio",
            Arc::new(|request: &RtspRequest| {
                let mut response = RtspResponse::to_request(request, 200, "OK");
                response.headers.set("Content-Type", "application/sdp");
                response.body = b"v=0\r\n".to_vec();
                response
            }),
        );

        let client = RtspClient::new();
        let peer = local(server.port());
        let response = client.describe(peer, "/by-name/studio").await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.headers.cseq(), Some(1));
        assert_eq!(response.body, b"v=0\r\n");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (server, _shutdown) = start_server().await;
        let client = RtspClient::new();
        let response = client
            .describe(local(server.port()), "/nope")
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_options_lists_methods() {
        let (server, _shutdown) = start_server().await;
        let client = RtspClient::new();
        let response = client.options(local(server.port())).await.unwrap();
        assert!(response.headers.get("Public").unwrap().contains("DESCRIBE"));
    }

    #[tokio::test]
    async fn test_fanout_reaches_attached_connections() {
        let (server, _shutdown) = start_server().await;
        server.register_handler(
            "/by-name/studio",
            Arc::new(|request: &RtspRequest| RtspResponse::to_request(request, 200, "OK")),
        );

        let client = RtspClient::new();
        let (announce_tx, mut announce_rx) = tokio::sync::mpsc::unbounded_channel();
        client.on_server_request(move |_, request| {
            announce_tx.send(request.clone()).unwrap();
        });

        // Attach by describing the path, then fan out an ANNOUNCE
        let peer = local(server.port());
        client.describe(peer, "/by-name/studio").await.unwrap();

        let mut announce = RtspRequest::new("ANNOUNCE", "rtsp://x/by-name/studio");
        announce.headers.set("Content-Type", "application/sdp");
        announce.body = b"v=0\r\n".to_vec();
        server.send_request("/by-name/studio", &announce);

        let received = tokio::time::timeout(Duration::from_secs(2), announce_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.method, "ANNOUNCE");
        assert_eq!(received.body, b"v=0\r\n");
    }
}
