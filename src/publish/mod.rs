//! WebSocket fan-out of telemetry frames.
//!
//! `broadcast` is called on the aggregator thread and never waits. Each
//! subscriber owns a bounded queue drained by its own session task; a full
//! queue drops the frame for that subscriber only, and a closed queue removes
//! the subscriber.

pub mod schema;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::frame::TelemetryFrame;
use crate::config::PublisherConfig;

/// Point-in-time publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherSnapshot {
    /// Frames handed to `broadcast`.
    pub broadcasts: u64,
    /// Frames written to a subscriber socket.
    pub frames_sent: u64,
    /// Frames skipped because a subscriber's queue was full.
    pub frames_dropped: u64,
    /// Currently connected subscribers.
    pub subscribers: usize,
}

struct Subscriber {
    peer: SocketAddr,
    queue: mpsc::Sender<Arc<str>>,
}

/// State shared by the broadcaster and every session task.
struct Hub {
    server_name: String,
    queue_depth: usize,
    send_timeout: Duration,
    subscribers: parking_lot::Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    broadcasts: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Hub {
    fn new(cfg: &PublisherConfig) -> Self {
        Self {
            server_name: cfg.server_name.clone(),
            queue_depth: cfg.subscriber_queue,
            send_timeout: cfg.send_timeout,
            subscribers: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcasts: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    fn register(&self, peer: SocketAddr) -> (u64, mpsc::Receiver<Arc<str>>) {
        let (queue, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, Subscriber { peer, queue });
        (id, rx)
    }

    fn unregister(&self, id: u64) -> Option<SocketAddr> {
        self.subscribers.lock().remove(&id).map(|s| s.peer)
    }

    /// Queues `payload` for every subscriber. Returns how many accepted it.
    fn broadcast(&self, payload: Arc<str>) -> usize {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut queued = 0;
        self.subscribers
            .lock()
            .retain(|_, sub| match sub.queue.try_send(Arc::clone(&payload)) {
                Ok(()) => {
                    queued += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        queued
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    cancel: CancellationToken,
}

/// Telemetry publisher serving WebSocket subscribers.
pub struct Publisher {
    addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    server: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl Publisher {
    pub fn new(cfg: &PublisherConfig) -> Self {
        Self {
            addr: cfg.addr,
            hub: Arc::new(Hub::new(cfg)),
            shutdown: parking_lot::Mutex::new(None),
            server: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listener and starts accepting sessions. A bind failure is
    /// a startup error.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("listening on {}", self.addr))?;
        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        let state = AppState {
            hub: Arc::clone(&self.hub),
            cancel: cancel.clone(),
        };

        let app = Router::new()
            .route("/", get(ws_handler))
            .with_state(state);

        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "telemetry publisher started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "telemetry publisher error");
            }
        });

        *self.shutdown.lock() = Some(cancel);
        *self.server.lock() = Some(server);
        *self.local_addr.lock() = Some(local_addr);

        Ok(local_addr)
    }

    /// Serializes `frame` once and queues it for every subscriber.
    /// Returns how many subscribers accepted it.
    pub fn broadcast(&self, frame: &TelemetryFrame) -> usize {
        match frame.to_json() {
            Ok(json) => self.hub.broadcast(Arc::from(json)),
            Err(e) => {
                tracing::warn!(error = %e, "serializing telemetry frame");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn stats(&self) -> PublisherSnapshot {
        self.hub.snapshot()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Closes every session and shuts the listener down.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        let server = self.server.lock().take();
        if let Some(server) = server {
            server.await.context("joining publisher task")?;
        }

        self.hub.subscribers.lock().clear();
        tracing::info!("telemetry publisher stopped");

        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(state, socket, peer))
}

enum SendError {
    Socket(axum::Error),
    TimedOut,
}

async fn send_text(socket: &mut WebSocket, text: String, timeout: Duration) -> Result<(), SendError> {
    match tokio::time::timeout(timeout, socket.send(Message::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendError::Socket(e)),
        Err(_) => Err(SendError::TimedOut),
    }
}

async fn run_session(state: AppState, mut socket: WebSocket, peer: SocketAddr) {
    let hub = state.hub;
    let (id, mut queue) = hub.register(peer);
    tracing::debug!(
        id,
        peer = %peer,
        subscribers = hub.subscriber_count(),
        "subscriber connected",
    );

    let reason = match schema::hello(&hub.server_name) {
        Ok(hello) => match send_text(&mut socket, hello, hub.send_timeout).await {
            Ok(()) => pump(&hub, &state.cancel, &mut socket, &mut queue).await,
            Err(e) => describe(e),
        },
        Err(e) => format!("serializing hello: {e}"),
    };

    hub.unregister(id);
    tracing::debug!(
        id,
        peer = %peer,
        reason = %reason,
        subscribers = hub.subscriber_count(),
        "subscriber disconnected",
    );
}

/// Moves queued frames to the socket and answers pings until the session
/// ends. Returns why it ended.
async fn pump(
    hub: &Hub,
    cancel: &CancellationToken,
    socket: &mut WebSocket,
    queue: &mut mpsc::Receiver<Arc<str>>,
) -> String {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return "publisher stopping".to_string();
            }
            outbound = queue.recv() => {
                let Some(payload) = outbound else {
                    return "removed from delivery set".to_string();
                };
                if let Err(e) = send_text(socket, payload.to_string(), hub.send_timeout).await {
                    return describe(e);
                }
                hub.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = schema::reply_to(&text) {
                        if let Err(e) = send_text(socket, reply, hub.send_timeout).await {
                            return describe(e);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return "closed by peer".to_string(),
                Some(Err(e)) => return format!("receive failed: {e}"),
                Some(Ok(_)) => {}
            },
        }
    }
}

fn describe(e: SendError) -> String {
    match e {
        SendError::Socket(e) => format!("send failed: {e}"),
        SendError::TimedOut => "send timed out".to_string(),
    }
}
