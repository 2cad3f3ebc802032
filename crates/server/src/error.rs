// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Value};
use std::fmt;

/// Well-known request denials shared across handlers.
///
/// Messages beginning with `auth` are message keys the UI localizes; their
/// acks carry `msgI18n: true` so the frontend knows to translate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    NotLoggedIn,
    InvalidArguments,
    TerminalNotFound,
    StackNotFound,
    IncorrectCredentials,
    InvalidToken,
    RemoteAgentsNotSupported,
}

impl AckError {
    pub fn msg(&self) -> &'static str {
        match self {
            Self::NotLoggedIn => "Not logged in",
            Self::InvalidArguments => "Invalid arguments",
            Self::TerminalNotFound => "Terminal not found",
            Self::StackNotFound => "Stack not found",
            Self::IncorrectCredentials => "authIncorrectCreds",
            Self::InvalidToken => "authInvalidToken",
            Self::RemoteAgentsNotSupported => "Remote agents are not supported",
        }
    }

    fn i18n(&self) -> bool {
        matches!(self, Self::IncorrectCredentials | Self::InvalidToken)
    }

    /// Build the `{ok: false, ...}` ack envelope for this denial.
    pub fn to_ack(self) -> Value {
        if self.i18n() {
            json!({ "ok": false, "msg": self.msg(), "msgI18n": true })
        } else {
            json!({ "ok": false, "msg": self.msg() })
        }
    }
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.msg())
    }
}

/// `{ok: true}`.
pub fn ok_ack() -> Value {
    json!({ "ok": true })
}

/// `{ok: true, msg, msgI18n: true}` — for localizable success messages.
pub fn ok_i18n(msg: &str) -> Value {
    json!({ "ok": true, "msg": msg, "msgI18n": true })
}

/// `{ok: false, msg}` — for freeform failures (error strings from Docker,
/// the filesystem, the store).
pub fn err_ack(msg: impl fmt::Display) -> Value {
    json!({ "ok": false, "msg": msg.to_string() })
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
