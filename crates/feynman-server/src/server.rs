use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::channel::EventReceiver;
use crate::error::ServerError;

/// Default viewer endpoint.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5678";

/// Only one viewer is served at a time.
const MAX_VIEWERS: usize = 1;

/// How long shutdown waits for the viewer task to send its close frame.
const VIEWER_SHUTDOWN: Duration = Duration::from_secs(1);

/// `ws://` URL of a bound endpoint.
pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/")
}

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `null` and `file://` (viewer page opened from disk)
/// - `http://localhost:*` or `http://127.0.0.1:*`
/// - Absent origin header (non-browser clients)
fn validate_origin(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if origin_str == "null"
            || origin_str.starts_with("file://")
            || origin_str.starts_with("http://localhost")
            || origin_str.starts_with("http://127.0.0.1")
        {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "viewer: rejected connection from disallowed origin");
        let mut err_resp = ErrorResponse::new(Some("Origin not allowed".into()));
        *err_resp.status_mut() = http::StatusCode::FORBIDDEN;
        return Err(err_resp);
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// BroadcastServer
// ---------------------------------------------------------------------------

/// Pushes every queued event, serialized as one JSON text frame, to the
/// connected viewer.
///
/// At most one viewer is attached; a second concurrent connection is dropped.
/// When the viewer goes away the event that failed to send is lost and the
/// remaining events stay queued for the next viewer.
pub struct BroadcastServer {
    addr: SocketAddr,
    events: Arc<Mutex<EventReceiver>>,
    cancel: CancellationToken,
    viewers: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl BroadcastServer {
    pub fn new(addr: SocketAddr, events: EventReceiver, cancel: CancellationToken) -> Self {
        Self {
            addr,
            events: Arc::new(Mutex::new(events)),
            cancel,
            viewers: Arc::new(Semaphore::new(MAX_VIEWERS)),
            tasks: TaskTracker::new(),
        }
    }

    /// Bind, then run the accept loop until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "viewer endpoint bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.admit(stream, peer),
                        Err(e) => {
                            tracing::error!(error = %e, "viewer: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("broadcast server: cancellation requested, shutting down");
                    break;
                }
            }
        }
        // Let an in-flight frame finish and the close frame go out.
        self.tasks.close();
        if tokio::time::timeout(VIEWER_SHUTDOWN, self.tasks.wait()).await.is_err() {
            tracing::warn!("viewer task did not stop in time, abandoning it");
        }
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match Arc::clone(&self.viewers).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(peer = %peer, "viewer already connected, rejecting");
                drop(stream);
                return;
            }
        };
        tracing::debug!(peer = %peer, "viewer: TCP connection accepted");
        let events = Arc::clone(&self.events);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            match tokio_tungstenite::accept_hdr_async(stream, validate_origin).await {
                Ok(ws_stream) => {
                    tracing::info!(peer = %peer, "viewer connected");
                    match drain_to_viewer(ws_stream, events, cancel).await {
                        Ok(()) => tracing::info!(peer = %peer, "viewer disconnected"),
                        Err(e) => {
                            tracing::info!(peer = %peer, error = %e, "viewer dropped, events queue until the next viewer");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "viewer handshake failed");
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Drain loop
// ---------------------------------------------------------------------------

async fn drain_to_viewer(
    ws_stream: WebSocketStream<TcpStream>,
    events: Arc<Mutex<EventReceiver>>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut events = events.lock().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("event channel closed, closing viewer");
                    let _ = ws_tx.close().await;
                    return Ok(());
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(kind = %event.kind(), id = %event.id, error = %e, "event serialization failed, skipping");
                        continue;
                    }
                };
                ws_tx.send(Message::Text(text)).await?;
            }

            // The protocol is server-to-viewer only; incoming frames are
            // read for liveness and close detection.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            _ = cancel.cancelled() => {
                let _ = ws_tx.close().await;
                return Ok(());
            }
        }
    }
}
