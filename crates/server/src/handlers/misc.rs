// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker views, settings, the agent registry, and the `agent` envelope.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::check_login;
use crate::broadcast::{self, Channel};
use crate::error::{err_ack, ok_ack, ok_i18n, AckError};
use crate::socket::{Args, Connection};
use crate::stack::{global_env_path, GLOBAL_ENV_FILE, GLOBAL_ENV_PLACEHOLDER};
use crate::state::Core;
use crate::store::AgentRecord;

pub async fn request_container_list(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let data = broadcast::build_containers(&core).await;
    conn.send_event(Channel::Containers.as_str(), &data);
    ok_ack()
}

pub async fn get_docker_network_list(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    match core.docker.list_networks().await {
        Ok(networks) => {
            let mut names: Vec<String> = networks
                .iter()
                .filter_map(|n| n.get("Name").and_then(Value::as_str).map(str::to_owned))
                .collect();
            names.sort();
            json!({ "ok": true, "dockerNetworkList": names })
        }
        Err(e) => err_ack(e),
    }
}

pub async fn docker_stats(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let containers = match core.docker.list_containers(None).await {
        Ok(list) => list,
        Err(e) => return err_ack(e),
    };

    let mut stats = Map::new();
    for container in containers.iter().filter(|c| c.state == "running") {
        match core.docker.container_stats(&container.name).await {
            Ok(sample) => {
                stats.insert(container.name.clone(), sample);
            }
            Err(e) => {
                tracing::debug!(container = %container.name, err = %e, "stats sample failed");
            }
        }
    }
    json!({ "ok": true, "dockerStats": stats })
}

pub async fn container_inspect(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = args.str_any(0, "containerName") else {
        return AckError::InvalidArguments.to_ack();
    };
    match core.docker.inspect_container(name).await {
        Ok(data) => json!({ "ok": true, "inspectData": data }),
        Err(e) => err_ack(e),
    }
}

// -- Settings -----------------------------------------------------------------

pub async fn get_settings(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let mut settings = core.store.settings_snapshot().await;
    // The signing secret never leaves the process.
    settings.remove("jwtSecret");

    let global_env = match global_env_path(&core.config.stacks_dir) {
        Some(path) => tokio::fs::read_to_string(path).await.unwrap_or_default(),
        None => GLOBAL_ENV_PLACEHOLDER.to_owned(),
    };
    settings.insert("globalENV".to_owned(), Value::String(global_env));
    json!({ "ok": true, "data": settings })
}

pub async fn set_settings(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let mut incoming = match args.get(0).and_then(Value::as_object) {
        Some(map) => map.clone(),
        None => match &args {
            Args::Named(map) => map.clone(),
            Args::Positional(_) => return AckError::InvalidArguments.to_ack(),
        },
    };
    // Clients cannot overwrite the signing secret.
    incoming.remove("jwtSecret");

    // The global env file lives on disk next to the stacks, not in the
    // settings document.
    if let Some(global_env) = incoming.remove("globalENV") {
        let content = global_env.as_str().unwrap_or_default();
        let path = core.config.stacks_dir.join(GLOBAL_ENV_FILE);
        let payload =
            if content.trim().is_empty() { GLOBAL_ENV_PLACEHOLDER } else { content };
        if let Err(e) = tokio::fs::write(&path, payload).await {
            return err_ack(e);
        }
    }

    if let Err(e) = core.store.merge_settings(incoming).await {
        return err_ack(e);
    }
    ok_i18n("Saved")
}

// -- Agent registry -----------------------------------------------------------

async fn broadcast_agent_list(core: &Arc<Core>) {
    let agents: Vec<Value> = core
        .store
        .agents()
        .await
        .into_iter()
        .map(|a| {
            json!({
                "url": a.url,
                "username": a.username,
                "endpoint": a.endpoint,
            })
        })
        .collect();
    core.socket.broadcast_authenticated("agentList", &Value::Array(agents));
}

fn parse_agent(args: &Args) -> Option<AgentRecord> {
    let body = args.get(0).and_then(Value::as_object).cloned().or_else(|| match args {
        Args::Named(map) => Some(map.clone()),
        Args::Positional(_) => None,
    })?;
    let url = body.get("url").and_then(Value::as_str)?.to_owned();
    Some(AgentRecord {
        endpoint: url.replace("https://", "").replace("http://", ""),
        url,
        username: body.get("username").and_then(Value::as_str).unwrap_or_default().to_owned(),
        password: body.get("password").and_then(Value::as_str).unwrap_or_default().to_owned(),
    })
}

pub async fn add_agent(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(record) = parse_agent(&args) else {
        return AckError::InvalidArguments.to_ack();
    };
    if let Err(e) = core.store.add_agent(record).await {
        return err_ack(e);
    }
    broadcast_agent_list(&core).await;
    ok_i18n("agentAddedSuccessfully")
}

pub async fn remove_agent(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(url) = args.str_any(0, "url") else {
        return AckError::InvalidArguments.to_ack();
    };
    if let Err(e) = core.store.remove_agent(url).await {
        return err_ack(e);
    }
    broadcast_agent_list(&core).await;
    ok_i18n("agentRemovedSuccessfully")
}

pub async fn update_agent(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(record) = parse_agent(&args) else {
        return AckError::InvalidArguments.to_ack();
    };
    if let Err(e) = core.store.update_agent(record).await {
        return err_ack(e);
    }
    broadcast_agent_list(&core).await;
    ok_i18n("Saved")
}

// -- Envelope -----------------------------------------------------------------

/// `agent` wraps stack/terminal events as `[endpoint, innerEvent, …args]`.
/// Only the local endpoint ("") is dispatchable; one level of unwrapping.
pub async fn agent_envelope(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    let (Some(endpoint), Some(inner_event)) = (args.str_at(0), args.str_at(1)) else {
        return AckError::InvalidArguments.to_ack();
    };
    if !endpoint.is_empty() {
        return AckError::RemoteAgentsNotSupported.to_ack();
    }
    if inner_event == "agent" {
        return err_ack("Nested agent events are not allowed");
    }

    let Some(handler) = core.socket.lookup(inner_event) else {
        return err_ack(format!("Unknown event: {inner_event}"));
    };
    let inner_args = Args::from_value(Value::Array(args.tail(2).to_vec()));
    handler(Arc::clone(&core), conn, inner_args).await
}
