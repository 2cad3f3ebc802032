// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    not_logged_in = { AckError::NotLoggedIn, "Not logged in", false },
    invalid_args = { AckError::InvalidArguments, "Invalid arguments", false },
    bad_creds = { AckError::IncorrectCredentials, "authIncorrectCreds", true },
    bad_token = { AckError::InvalidToken, "authInvalidToken", true },
)]
fn ack_envelope(err: AckError, msg: &str, i18n: bool) {
    let ack = err.to_ack();
    assert_eq!(ack["ok"], false);
    assert_eq!(ack["msg"], msg);
    assert_eq!(ack.get("msgI18n").is_some(), i18n);
}

#[test]
fn ok_envelopes() {
    assert_eq!(ok_ack(), serde_json::json!({ "ok": true }));
    let ack = ok_i18n("Started");
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["msg"], "Started");
    assert_eq!(ack["msgI18n"], true);
}

#[test]
fn err_ack_formats_display() {
    let ack = err_ack(anyhow::anyhow!("compose file missing"));
    assert_eq!(ack["ok"], false);
    assert_eq!(ack["msg"], "compose file missing");
}
