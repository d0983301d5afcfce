use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    async_trait::async_trait,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, warn},
};

use crate::{
    error::HubError,
    protocol::{ClientMessage, ServerEvent},
};

// ── Session ──────────────────────────────────────────────────────────────────

/// A WebSocket session attached to the hub.
#[derive(Debug)]
pub struct HubSession {
    pub conn_id: String,
    pub remote_addr: Option<SocketAddr>,
    /// Channel for sending serialized frames to this session's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl HubSession {
    pub fn new(
        conn_id: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            remote_addr,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Queue a serialized frame. Returns false once the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Handler ──────────────────────────────────────────────────────────────────

/// Receives session lifecycle and inbound frames from the hub.
#[async_trait]
pub trait HubHandler: Send + Sync {
    async fn on_connect(&self, _conn_id: &str) {}

    async fn on_message(&self, conn_id: &str, message: ClientMessage);

    async fn on_disconnect(&self, _conn_id: &str) {}
}

// ── Hub ──────────────────────────────────────────────────────────────────────

/// Shared session registry both servers attach to.
///
/// The API server feeds upgraded connections in; the dashboard server attaches
/// as the message handler and pushes events out.
#[derive(Default)]
pub struct SocketHub {
    sessions: RwLock<HashMap<String, HubSession>>,
    handler: RwLock<Option<Arc<dyn HubHandler>>>,
    seq: AtomicU64,
}

impl SocketHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach the message handler. Only one handler may ever be attached.
    pub fn try_attach(&self, handler: Arc<dyn HubHandler>) -> Result<(), HubError> {
        // A held lock means another attach is in flight.
        let mut slot = self
            .handler
            .try_write()
            .map_err(|_| HubError::HandlerAlreadyAttached)?;
        if slot.is_some() {
            return Err(HubError::HandlerAlreadyAttached);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub async fn has_handler(&self) -> bool {
        self.handler.read().await.is_some()
    }

    async fn current_handler(&self) -> Option<Arc<dyn HubHandler>> {
        self.handler.read().await.as_ref().map(Arc::clone)
    }

    /// Last sequence number handed out.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a session and notify the handler.
    pub async fn register(&self, session: HubSession) {
        let conn_id = session.conn_id.clone();
        self.sessions.write().await.insert(conn_id.clone(), session);
        debug!(conn_id = %conn_id, "hub: session registered");
        if let Some(handler) = self.current_handler().await {
            handler.on_connect(&conn_id).await;
        }
    }

    /// Remove a session and notify the handler. Returns the removed session.
    pub async fn remove(&self, conn_id: &str) -> Option<HubSession> {
        let removed = self.sessions.write().await.remove(conn_id);
        if let Some(session) = &removed {
            debug!(
                conn_id = %conn_id,
                connected_secs = session.connected_at.elapsed().as_secs(),
                "hub: session removed"
            );
            if let Some(handler) = self.current_handler().await {
                handler.on_disconnect(conn_id).await;
            }
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Parse an inbound text frame and hand it to the handler.
    pub async fn dispatch(&self, conn_id: &str, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "hub: malformed frame");
                self.send_to(conn_id, ServerEvent::error(format!("malformed frame: {e}")))
                    .await;
                return;
            },
        };

        match self.current_handler().await {
            Some(handler) => handler.on_message(conn_id, message).await,
            None => {
                debug!(conn_id = %conn_id, action = %message.action, "hub: no handler attached, frame dropped");
            },
        }
    }

    /// Send an event to one session. Returns false if the session is unknown or closed.
    pub async fn send_to(&self, conn_id: &str, mut event: ServerEvent) -> bool {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(conn_id) else {
            return false;
        };
        event.seq = self.next_seq();
        match serde_json::to_string(&event) {
            Ok(frame) => session.send(&frame),
            Err(e) => {
                warn!(error = %e, "hub: failed to serialize event");
                false
            },
        }
    }

    /// Send an event to every session. Returns how many sessions accepted it.
    pub async fn broadcast(&self, mut event: ServerEvent) -> usize {
        event.seq = self.next_seq();
        let frame = match serde_json::to_string(&event) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "hub: failed to serialize event");
                return 0;
            },
        };

        let sessions = self.sessions.read().await;
        let delivered = sessions.values().filter(|s| s.send(&frame)).count();
        debug!(action = %event.action, seq = event.seq, delivered, "hub: broadcast");
        delivered
    }
}
