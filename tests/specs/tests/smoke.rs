// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: spawn the real `stevedore` binary with mock
//! compose and drive it over the WebSocket protocol.

use std::time::Duration;

use serde_json::{json, Value};

use stevedore_specs::{ServerProcess, WsClient};

const TIMEOUT: Duration = Duration::from_secs(10);
const COMPOSE: &str = "services:\n  nginx:\n    image: nginx:latest\n";

#[tokio::test]
async fn health_endpoint_responds() -> anyhow::Result<()> {
    let server = ServerProcess::start(true)?;
    server.wait_healthy(TIMEOUT).await?;

    let resp: Value =
        reqwest::get(format!("{}/api/health", server.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert!(resp["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn fresh_install_pushes_setup_then_info() -> anyhow::Result<()> {
    let server = ServerProcess::start(false)?;
    server.wait_healthy(TIMEOUT).await?;

    let mut ws = WsClient::connect(&server.ws_url()).await?;
    // With zero users the very first push must be `setup`.
    ws.next_event("setup").await?;
    let info = ws.next_event("info").await?;
    assert_eq!(info["needSetup"], true);
    Ok(())
}

#[tokio::test]
async fn setup_and_login_over_the_wire() -> anyhow::Result<()> {
    let server = ServerProcess::start(false)?;
    server.wait_healthy(TIMEOUT).await?;

    let mut ws = WsClient::connect(&server.ws_url()).await?;

    // Anonymous requests are denied.
    let result = ws.call("requestStackList", Value::Null).await?;
    assert_eq!(result["msg"], "Not logged in");

    let result = ws.call("setup", json!(["admin", "hunter22"])).await?;
    assert_eq!(result["ok"], true);

    let result = ws.call("login", json!({ "username": "admin", "password": "hunter22" })).await?;
    assert_eq!(result["ok"], true);
    let token = result["token"].as_str().unwrap_or_default().to_owned();
    assert!(!token.is_empty());

    // The login triggered an initial-state push of every channel.
    let stacks = ws.next_event("stacks").await?;
    assert_eq!(stacks, json!([]));
    ws.next_event("updates").await?;

    // Token works on a second connection.
    let mut second = WsClient::connect(&server.ws_url()).await?;
    let result = second.call("loginByToken", json!([token])).await?;
    assert_eq!(result["ok"], true);
    assert_eq!(result["username"], "admin");
    Ok(())
}

#[tokio::test]
async fn stack_lifecycle_with_mock_compose() -> anyhow::Result<()> {
    let server = ServerProcess::start(true)?;
    server.wait_healthy(TIMEOUT).await?;

    let mut ws = WsClient::connect(&server.ws_url()).await?;

    let result = ws.call("saveStack", json!(["web", COMPOSE, "", "", true])).await?;
    assert_eq!(result["ok"], true);
    assert!(server.stacks_dir().join("web/compose.yaml").exists());

    // Saved stack shows up in a fresh list.
    let result = ws.call("requestStackList", Value::Null).await?;
    assert_eq!(result["ok"], true);
    let stacks = ws.next_event("stacks").await?;
    assert_eq!(stacks[0]["name"], "web");
    assert_eq!(stacks[0]["images"]["nginx"], "nginx:latest");

    // Join the action terminal, then start the stack: the ack comes first,
    // the simulated compose run streams in afterwards.
    let result = ws.call("terminalJoin", json!(["compose--web"])).await?;
    assert_eq!(result["ok"], true);

    let result = ws.call("startStack", json!(["web"])).await?;
    assert_eq!(result["ok"], true);
    assert_eq!(result["msg"], "Started");
    assert_eq!(result["msgI18n"], true);

    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !seen.contains("[Done]") {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("compose output never finished: {seen}");
        }
        let data = ws.next_event("terminalWrite").await?;
        if data["terminal"] == "compose--web" {
            seen.push_str(data["buffer"].as_str().unwrap_or_default());
        }
    }
    assert!(seen.contains("$ docker compose up -d --remove-orphans"));
    assert!(seen.contains("Container web-nginx-1  Started"));

    // Round trip the editor view.
    let result = ws.call("getStack", json!(["web"])).await?;
    assert_eq!(result["stack"]["composeYAML"], COMPOSE);
    Ok(())
}

#[tokio::test]
async fn settings_round_trip_over_the_wire() -> anyhow::Result<()> {
    let server = ServerProcess::start(true)?;
    server.wait_healthy(TIMEOUT).await?;

    let mut ws = WsClient::connect(&server.ws_url()).await?;
    let result = ws.call("setSettings", json!([{ "primaryHostname": "lab.local" }])).await?;
    assert_eq!(result["ok"], true);

    let result = ws.call("getSettings", json!([])).await?;
    assert_eq!(result["data"]["primaryHostname"], "lab.local");
    assert!(result["data"].get("jwtSecret").is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_event_is_acked_with_error() -> anyhow::Result<()> {
    let server = ServerProcess::start(true)?;
    server.wait_healthy(TIMEOUT).await?;

    let mut ws = WsClient::connect(&server.ws_url()).await?;
    let result = ws.call("definitelyNotAnEvent", Value::Null).await?;
    assert_eq!(result["ok"], false);
    Ok(())
}
