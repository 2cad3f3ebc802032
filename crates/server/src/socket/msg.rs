// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for the socket protocol.
//!
//! Client frames are `{"id": <n>, "event": "<name>", "args": [...]}` where
//! `id` is optional; its presence means the client expects exactly one ack
//! `{"id": <n>, "result": ...}` back. Server pushes are `{"event", "data"}`.

use serde::Deserialize;
use serde_json::{json, Map, Value};

/// A parsed client → server frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub args: Value,
}

impl ClientFrame {
    pub fn args(&self) -> Args {
        Args::from_value(self.args.clone())
    }
}

/// Handler arguments in either of the two shapes clients send: a positional
/// array or a single named object. A bare scalar is treated as a one-element
/// positional list.
#[derive(Debug, Clone)]
pub enum Args {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Args {
    pub fn from_value(v: Value) -> Self {
        match v {
            Value::Array(a) => Args::Positional(a),
            Value::Object(m) => Args::Named(m),
            Value::Null => Args::Positional(Vec::new()),
            other => Args::Positional(vec![other]),
        }
    }

    pub fn empty() -> Self {
        Args::Positional(Vec::new())
    }

    /// Positional element, if this is the positional shape.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Args::Positional(a) => a.get(index),
            Args::Named(_) => None,
        }
    }

    /// String at `index` (positional) or under `key` (named).
    pub fn str_any(&self, index: usize, key: &str) -> Option<&str> {
        match self {
            Args::Positional(a) => a.get(index).and_then(Value::as_str),
            Args::Named(m) => m.get(key).and_then(Value::as_str),
        }
    }

    pub fn str_at(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn bool_any(&self, index: usize, key: &str) -> Option<bool> {
        match self {
            Args::Positional(a) => a.get(index).and_then(Value::as_bool),
            Args::Named(m) => m.get(key).and_then(Value::as_bool),
        }
    }

    pub fn u64_at(&self, index: usize) -> Option<u64> {
        self.get(index).and_then(Value::as_u64)
    }

    pub fn object_at(&self, index: usize) -> Option<&Map<String, Value>> {
        self.get(index).and_then(Value::as_object)
    }

    /// Remaining positional elements from `index` on.
    pub fn tail(&self, index: usize) -> &[Value] {
        match self {
            Args::Positional(a) if index < a.len() => &a[index..],
            _ => &[],
        }
    }
}

/// Serialize a push frame. `Value`'s `Display` is infallible, so broadcast
/// paths can serialize once and reuse the bytes.
pub fn push_frame(event: &str, data: &Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

/// Serialize an ack frame for a client request id.
pub fn ack_frame(id: u64, result: &Value) -> String {
    json!({ "id": id, "result": result }).to_string()
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
