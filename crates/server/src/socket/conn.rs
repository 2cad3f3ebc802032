// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One socket session: identity, user binding, and the bounded outbound
//! queue its writer task drains. Everything that sends to a client goes
//! through [`Connection::enqueue`]; a full queue closes the connection
//! rather than blocking the sender.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::msg::{ack_frame, push_frame};
use crate::term::WriteFn;

/// Outbound queue capacity per connection.
pub const OUTBOUND_QUEUE: usize = 512;

/// User id representing "not logged in".
pub const ANONYMOUS: u64 = 0;
/// Synthetic user id assigned at handshake in no-auth mode.
pub const NO_AUTH_USER: u64 = 1;

/// A frame ready to leave the process: owned for per-connection replies,
/// shared for fan-out so a broadcast serializes once.
#[derive(Debug, Clone)]
pub enum Outbound {
    Owned(String),
    Shared(Arc<String>),
}

impl Outbound {
    pub fn into_text(self) -> String {
        match self {
            Outbound::Owned(s) => s,
            Outbound::Shared(s) => (*s).clone(),
        }
    }
}

pub struct Connection {
    id: u64,
    user_id: AtomicU64,
    /// Username bound at login; empty while anonymous.
    username: parking_lot::Mutex<String>,
    out_tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(id: u64, out_tx: mpsc::Sender<Outbound>, closed: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id,
            user_id: AtomicU64::new(ANONYMOUS),
            username: parking_lot::Mutex::new(String::new()),
            out_tx,
            closed,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id.load(Ordering::Acquire)
    }

    pub fn set_user(&self, user_id: u64) {
        self.user_id.store(user_id, Ordering::Release);
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id() != ANONYMOUS
    }

    pub fn username(&self) -> String {
        self.username.lock().clone()
    }

    pub fn set_username(&self, username: &str) {
        *self.username.lock() = username.to_owned();
    }

    /// Push a server event to this connection.
    pub fn send_event(&self, event: &str, data: &Value) {
        self.enqueue(Outbound::Owned(push_frame(event, data)));
    }

    /// Answer a client request id.
    pub fn send_ack(&self, id: u64, result: &Value) {
        self.enqueue(Outbound::Owned(ack_frame(id, result)));
    }

    /// Enqueue an already-serialized frame (broadcast fan-out path).
    pub fn send_shared(&self, frame: Arc<String>) {
        self.enqueue(Outbound::Shared(frame));
    }

    fn enqueue(&self, frame: Outbound) {
        match self.out_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(conn = self.id, "outbound queue overflow, closing connection");
                self.closed.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Build a terminal writer delivering bytes to this connection as
    /// `terminalWrite` events. Bytes travel as lossy UTF-8 inside the JSON
    /// frame, which is what terminal emulators on the other end expect.
    pub fn terminal_writer(self: &Arc<Self>, terminal_name: &str) -> WriteFn {
        let conn = Arc::clone(self);
        let name = terminal_name.to_owned();
        Arc::new(move |bytes: &[u8]| {
            let data = serde_json::json!({
                "terminal": name,
                "buffer": String::from_utf8_lossy(bytes),
            });
            conn.send_event("terminalWrite", &data);
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .finish()
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
