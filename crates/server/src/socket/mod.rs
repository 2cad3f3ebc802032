// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: connection lifecycle, event dispatch, and the
//! authenticated-broadcast fan-out.

pub mod conn;
pub mod msg;

pub use conn::{Connection, ANONYMOUS, NO_AUTH_USER, OUTBOUND_QUEUE};
pub use msg::{Args, ClientFrame};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::err_ack;
use crate::state::Core;
use msg::push_frame;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Value> + Send + 'static>>;

/// A registered event handler: `(core, connection, args) → ack result`.
pub type Handler = Arc<dyn Fn(Arc<Core>, Arc<Connection>, Args) -> HandlerFuture + Send + Sync>;

pub struct SocketServer {
    handlers: RwLock<HashMap<&'static str, Handler>>,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    /// Index of connections with a non-anonymous user id; broadcast targets.
    authenticated: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
    no_auth: bool,
}

impl SocketServer {
    pub fn new(no_auth: bool) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            authenticated: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            no_auth,
        }
    }

    pub fn no_auth(&self) -> bool {
        self.no_auth
    }

    /// Register a dispatch target for an event name.
    pub fn handle(&self, event: &'static str, handler: Handler) {
        self.handlers.write().insert(event, handler);
    }

    pub fn lookup(&self, event: &str) -> Option<Handler> {
        self.handlers.read().get(event).cloned()
    }

    /// Invoke the handler for a client frame and ack it when requested.
    pub async fn dispatch(&self, core: Arc<Core>, conn: Arc<Connection>, frame: ClientFrame) {
        match self.lookup(&frame.event) {
            Some(handler) => {
                let result = handler(core, Arc::clone(&conn), frame.args()).await;
                if let Some(id) = frame.id {
                    conn.send_ack(id, &result);
                }
            }
            None => {
                tracing::debug!(event = %frame.event, "unknown event");
                if let Some(id) = frame.id {
                    conn.send_ack(id, &err_ack(format!("Unknown event: {}", frame.event)));
                }
            }
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, conn: &Arc<Connection>) {
        self.connections.lock().insert(conn.id(), Arc::clone(conn));
    }

    fn deregister(&self, conn_id: u64) {
        self.connections.lock().remove(&conn_id);
        self.authenticated.lock().remove(&conn_id);
    }

    /// Add a logged-in connection to the broadcast index.
    pub fn mark_authenticated(&self, conn: &Arc<Connection>) {
        self.authenticated.lock().insert(conn.id(), Arc::clone(conn));
    }

    /// Drop a connection from the broadcast index (logout).
    pub fn unmark_authenticated(&self, conn_id: u64) {
        self.authenticated.lock().remove(&conn_id);
    }

    /// Fast test the broadcast engine uses to skip builder work entirely.
    pub fn has_authenticated_conns(&self) -> bool {
        !self.authenticated.lock().is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Serialize once, deliver to every authenticated connection.
    pub fn broadcast_authenticated(&self, event: &str, data: &Value) {
        self.broadcast_authenticated_bytes(Arc::new(push_frame(event, data)));
    }

    pub fn broadcast_authenticated_bytes(&self, frame: Arc<String>) {
        // Snapshot under the lock; enqueueing never blocks but stays outside
        // the critical section anyway.
        let targets: Vec<_> = self.authenticated.lock().values().cloned().collect();
        for conn in targets {
            conn.send_shared(Arc::clone(&frame));
        }
    }

    /// Close every other connection bound to the same user (after a
    /// password change, for instance).
    pub fn disconnect_others(&self, conn: &Connection) {
        let user_id = conn.user_id();
        let targets: Vec<_> = self.authenticated.lock().values().cloned().collect();
        for other in targets {
            if other.user_id() == user_id && other.id() != conn.id() {
                other.close();
            }
        }
    }
}

/// Build the HTTP router: the WebSocket endpoint plus a liveness probe.
pub fn build_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(core)
}

async fn health_handler(State(core): State<Arc<Core>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "stacksDir": core.config.stacks_dir.display().to_string(),
    }))
}

async fn ws_handler(State(core): State<Arc<Core>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(core, socket))
}

/// Per-connection lifecycle: handshake events, writer task, reader loop,
/// close cascade.
async fn handle_connection(core: Arc<Core>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let closed = CancellationToken::new();

    let conn_id = core.socket.allocate_id();
    let conn = Connection::new(conn_id, out_tx, closed.clone());
    core.socket.register(&conn);

    if core.socket.no_auth() {
        conn.set_user(NO_AUTH_USER);
        core.socket.mark_authenticated(&conn);
    }

    // Handshake pushes: `setup` first when no user exists yet, then `info`.
    if core.store.user_count().await == 0 {
        conn.send_event("setup", &Value::Null);
    }
    conn.send_event(
        "info",
        &json!({
            "version": env!("CARGO_PKG_VERSION"),
            "primaryHostname": core.store.get_setting("primaryHostname").await,
            "needSetup": core.store.user_count().await == 0,
        }),
    );

    // Writer task: drains the outbound queue in enqueue order.
    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_closed.cancelled() => break,
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into_text().into())).await.is_err() {
                        writer_closed.cancel();
                        break;
                    }
                }
            }
        }
    });

    // Reader loop.
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                core.socket.dispatch(Arc::clone(&core), Arc::clone(&conn), frame).await;
                            }
                            Err(e) => {
                                tracing::debug!(conn = conn_id, err = %e, "malformed frame");
                                // Best effort: ack the id if one is readable.
                                if let Some(id) = serde_json::from_str::<Value>(&text)
                                    .ok()
                                    .and_then(|v| v.get("id").and_then(Value::as_u64))
                                {
                                    conn.send_ack(id, &crate::error::AckError::InvalidArguments.to_ack());
                                }
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Close cascade: out of the broadcast index, out of every writer set.
    closed.cancel();
    core.socket.deregister(conn_id);
    core.terminals.remove_writer_everywhere(conn_id);
    writer.abort();
    tracing::debug!(conn = conn_id, "connection closed");
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
