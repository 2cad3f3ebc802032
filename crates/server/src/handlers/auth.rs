// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login, token login, setup, and password management.

use std::sync::Arc;

use serde_json::{json, Value};

use super::check_login;
use crate::auth::{
    hash_password, issue_token, password_fingerprint, verify_password, verify_token,
    MIN_PASSWORD_LEN,
};
use crate::broadcast;
use crate::error::{err_ack, ok_i18n, AckError};
use crate::socket::{Args, Connection};
use crate::state::Core;

/// Bind a verified user to the connection and push the initial state.
async fn complete_login(core: &Arc<Core>, conn: &Arc<Connection>, username: &str) {
    let user_id = core.store.user_id(username).await.unwrap_or(1);
    conn.set_user(user_id);
    conn.set_username(username);
    core.socket.mark_authenticated(conn);
    broadcast::send_initial_state(core, conn).await;
}

pub async fn login(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    let (Some(username), Some(password)) =
        (args.str_any(0, "username"), args.str_any(1, "password"))
    else {
        return AckError::InvalidArguments.to_ack();
    };

    let Some(user) = core.store.find_user(username).await else {
        return AckError::IncorrectCredentials.to_ack();
    };

    // Argon2 verification is CPU-bound; keep it off the runtime threads.
    let password = password.to_owned();
    let stored_hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .unwrap_or(false);
    if !verified {
        return AckError::IncorrectCredentials.to_ack();
    }

    let secret = match core.store.jwt_secret().await {
        Ok(secret) => secret,
        Err(e) => return err_ack(e),
    };
    let token = match issue_token(&secret, &user.username, &user.password_hash) {
        Ok(token) => token,
        Err(e) => return err_ack(e),
    };

    complete_login(&core, &conn, &user.username).await;
    json!({ "ok": true, "token": token })
}

pub async fn login_by_token(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    let Some(token) = args.str_any(0, "token") else {
        return AckError::InvalidArguments.to_ack();
    };

    let secret = match core.store.jwt_secret().await {
        Ok(secret) => secret,
        Err(e) => return err_ack(e),
    };
    let Ok(claims) = verify_token(&secret, token) else {
        return AckError::InvalidToken.to_ack();
    };

    // Re-verify the fingerprint against the password hash stored *now*:
    // a password change retires every token minted before it.
    let Some(user) = core.store.find_user(&claims.sub).await else {
        return AckError::InvalidToken.to_ack();
    };
    if claims.fp != password_fingerprint(&user.password_hash) {
        return AckError::InvalidToken.to_ack();
    }

    complete_login(&core, &conn, &user.username).await;
    json!({ "ok": true, "username": user.username })
}

pub async fn logout(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    conn.set_user(crate::socket::ANONYMOUS);
    conn.set_username("");
    core.socket.unmark_authenticated(conn.id());
    json!({ "ok": true })
}

pub async fn setup(core: Arc<Core>, _conn: Arc<Connection>, args: Args) -> Value {
    let (Some(username), Some(password)) =
        (args.str_any(0, "username"), args.str_any(1, "password"))
    else {
        return AckError::InvalidArguments.to_ack();
    };

    if core.store.user_count().await > 0 {
        return err_ack("Stevedore has already been set up");
    }
    if password.len() < MIN_PASSWORD_LEN {
        return err_ack("Password must be at least 6 characters");
    }

    let password = password.to_owned();
    let hashed = match tokio::task::spawn_blocking(move || hash_password(&password)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => return err_ack(e),
        Err(e) => return err_ack(e),
    };
    if let Err(e) = core.store.add_user(username, &hashed).await {
        return err_ack(e);
    }
    ok_i18n("successAdded")
}

pub async fn change_password(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let (Some(current), Some(new_password)) = (
        args.str_any(0, "currentPassword"),
        args.str_any(1, "newPassword"),
    ) else {
        return AckError::InvalidArguments.to_ack();
    };
    if new_password.len() < MIN_PASSWORD_LEN {
        return err_ack("Password must be at least 6 characters");
    }

    let username = conn.username();
    let Some(user) = core.store.find_user(&username).await else {
        return AckError::NotLoggedIn.to_ack();
    };

    let current = current.to_owned();
    let stored_hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&current, &stored_hash))
        .await
        .unwrap_or(false);
    if !verified {
        return AckError::IncorrectCredentials.to_ack();
    }

    let new_password = new_password.to_owned();
    let hashed = match tokio::task::spawn_blocking(move || hash_password(&new_password)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => return err_ack(e),
        Err(e) => return err_ack(e),
    };
    if let Err(e) = core.store.set_password_hash(&username, &hashed).await {
        return err_ack(e);
    }

    // Every session must re-authenticate; old tokens no longer match the
    // fingerprint of the fresh hash.
    core.socket.broadcast_authenticated("refresh", &Value::Null);
    core.socket.disconnect_others(&conn);
    ok_i18n("successAuthChangePassword")
}
