//! RTSP connection
//!
//! Wraps one TCP stream: a reader task feeds the byte-wise parser and
//! delivers complete messages through a channel; writes append to an
//! output buffer and only kick the writer when no write is in flight, so
//! back-to-back messages coalesce into one syscall.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::rtsp::message::{RtspMessage, RtspRequest, RtspResponse};
use crate::rtsp::parser::{ParseStatus, RtspParser};

/// Output side: buffer plus write-in-flight coalescing.
struct OutputQueue {
    buffer: Mutex<BytesMut>,
    kick: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl OutputQueue {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(BytesMut::new()),
            kick: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn push(&self, data: &[u8]) {
        let should_kick = {
            let mut buffer = self.buffer.lock();
            let was_empty = buffer.is_empty();
            buffer.extend_from_slice(data);
            was_empty
        };
        if should_kick {
            self.kick.notify_one();
        }
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.kick.notify_one();
    }
}

/// One established RTSP connection, client- or server-side.
pub struct RtspConnection {
    peer: SocketAddr,
    output: Arc<OutputQueue>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RtspConnection {
    /// Connects to a peer and starts the reader/writer tasks.
    pub async fn connect(
        addr: SocketAddr,
    ) -> std::io::Result<(Self, mpsc::UnboundedReceiver<RtspMessage>)> {
        let stream = TcpStream::connect(addr).await?;
        debug!("RTSP connected to {addr}");
        Ok(Self::from_stream(stream, addr))
    }

    /// Adopts an accepted stream (server side).
    pub fn from_stream(
        stream: TcpStream,
        peer: SocketAddr,
    ) -> (Self, mpsc::UnboundedReceiver<RtspMessage>) {
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut write_half) = stream.into_split();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let output = Arc::new(OutputQueue::new());

        let reader = tokio::spawn(async move {
            let mut parser = RtspParser::new();
            let mut buf = vec![0u8; 2048];
            let mut pending = BytesMut::new();

            loop {
                let read = match read_half.read(&mut buf).await {
                    Ok(0) => break, // EOF
                    Ok(read) => read,
                    Err(e) => {
                        trace!("RTSP read error from {peer}: {e}");
                        break;
                    }
                };
                pending.extend_from_slice(&buf[..read]);

                loop {
                    let (status, consumed) = parser.parse(&pending);
                    let _ = pending.split_to(consumed);
                    match status {
                        Ok(ParseStatus::Complete(message)) => {
                            if message_tx.send(message).is_err() {
                                return;
                            }
                        }
                        Ok(ParseStatus::Incomplete) => break,
                        Err(e) => {
                            warn!("RTSP parse error from {peer}: {e}");
                            return;
                        }
                    }
                }
            }
            debug!("RTSP connection to {peer} closed");
        });

        let writer_output = output.clone();
        let writer = tokio::spawn(async move {
            loop {
                writer_output.kick.notified().await;
                if writer_output
                    .closed
                    .load(std::sync::atomic::Ordering::Acquire)
                {
                    break;
                }
                loop {
                    let chunk = {
                        let mut buffer = writer_output.buffer.lock();
                        if buffer.is_empty() {
                            break;
                        }
                        buffer.split().freeze()
                    };
                    if let Err(e) = write_half.write_all(&chunk).await {
                        trace!("RTSP write error to {peer}: {e}");
                        return;
                    }
                }
            }
            let _ = write_half.shutdown().await;
        });

        (
            Self {
                peer,
                output,
                reader,
                writer,
            },
            message_rx,
        )
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send_request(&self, request: &RtspRequest) {
        trace!("sending request to {}: {request}", self.peer);
        self.output.push(&request.encode());
    }

    pub fn send_response(&self, response: &RtspResponse) {
        trace!("sending response to {}: {}", self.peer, response.status);
        self.output.push(&response.encode());
    }

    pub fn close(&self) {
        self.output.close();
        self.reader.abort();
    }
}

impl Drop for RtspConnection {
    fn drop(&mut self) {
        self.output.close();
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_roundtrip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let (connection, mut messages) = RtspConnection::from_stream(stream, peer);
            let message = messages.recv().await.unwrap();
            match message {
                RtspMessage::Request(request) => {
                    assert_eq!(request.method, "DESCRIBE");
                    let response = RtspResponse::to_request(&request, 200, "OK");
                    connection.send_response(&response);
                }
                other => panic!("unexpected message {other:?}"),
            }
            // Keep the connection alive until the client read the reply
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let (connection, mut messages) = RtspConnection::connect(addr).await.unwrap();
        let mut request = RtspRequest::new("DESCRIBE", "rtsp://x/by-name/s");
        request.headers.set("CSeq", "1");
        connection.send_request(&request);

        let message = messages.recv().await.unwrap();
        match message {
            RtspMessage::Response(response) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.headers.cseq(), Some(1));
            }
            other => panic!("unexpected message {other:?}"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_coalesced_writes_arrive_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let (_connection, mut messages) = RtspConnection::from_stream(stream, peer);
            let mut cseqs = Vec::new();
            for _ in 0..3 {
                if let Some(RtspMessage::Request(request)) = messages.recv().await {
                    cseqs.push(request.headers.cseq().unwrap());
                }
            }
            cseqs
        });

        let (connection, _messages) = RtspConnection::connect(addr).await.unwrap();
        for cseq in 1..=3u32 {
            let mut request = RtspRequest::new("OPTIONS", "*");
            request.headers.set("CSeq", cseq.to_string());
            connection.send_request(&request);
        }

        assert_eq!(server.await.unwrap(), vec![1, 2, 3]);
    }
}
