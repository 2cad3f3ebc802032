// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end smoke tests.
//!
//! Spawns the real `stevedore` binary against temp stacks/data directories
//! and drives it over the WebSocket protocol.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Resolve the path to the compiled `stevedore` binary.
pub fn server_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("stevedore")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `stevedore` process that is killed on drop.
pub struct ServerProcess {
    child: Child,
    port: u16,
    stacks_dir: PathBuf,
    _dirs: tempfile::TempDir,
}

impl ServerProcess {
    /// Spawn with `--mock-compose` and fresh temp directories.
    /// `no_auth` controls whether connections must log in.
    pub fn start(no_auth: bool) -> anyhow::Result<Self> {
        let binary = server_binary();
        anyhow::ensure!(binary.exists(), "stevedore binary not found at {}", binary.display());

        let dirs = tempfile::tempdir()?;
        let stacks_dir = dirs.path().join("stacks");
        let data_dir = dirs.path().join("data");
        let port = free_port()?;

        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--stacks-dir".into(),
            stacks_dir.to_string_lossy().into_owned(),
            "--data-dir".into(),
            data_dir.to_string_lossy().into_owned(),
            "--mock-compose".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if no_auth {
            args.push("--no-auth".into());
        }

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, stacks_dir, _dirs: dirs })
    }

    pub fn stacks_dir(&self) -> &Path {
        &self.stacks_dir
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll the health endpoint until the server is responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("stevedore did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A WebSocket session speaking the `{id, event, args}` protocol.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    next_id: u64,
    /// Pushes that arrived while waiting for an ack.
    pending: std::collections::VecDeque<Value>,
}

impl WsClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Self { stream, next_id: 1, pending: std::collections::VecDeque::new() })
    }

    async fn recv_json(&mut self) -> anyhow::Result<Value> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(10), self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("socket receive timed out"))?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Close(_) => anyhow::bail!("socket closed"),
                _ => continue,
            }
        }
    }

    /// Send an event expecting an ack. Pushes that arrive before the ack
    /// are buffered for [`WsClient::next_event`].
    pub async fn call(&mut self, event: &str, args: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "id": id, "event": event, "args": args });
        self.stream.send(Message::Text(frame.to_string().into())).await?;

        loop {
            let value = self.recv_json().await?;
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(value["result"].clone());
            }
            self.pending.push_back(value);
        }
    }

    /// Wait for the next push of the named event (buffered or live).
    pub async fn next_event(&mut self, name: &str) -> anyhow::Result<Value> {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|v| v.get("event").and_then(Value::as_str) == Some(name))
        {
            let value = self.pending.remove(pos).unwrap_or_default();
            return Ok(value["data"].clone());
        }
        loop {
            let value = self.recv_json().await?;
            if value.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(value["data"].clone());
            }
        }
    }
}
