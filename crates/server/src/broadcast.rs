// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live-state fan-out: six named channels, each built on demand, content-
//! hashed, and skipped when nothing changed. Docker events drive refreshes
//! through the trailing-edge debouncer; the filesystem watcher owns the
//! `stacks` channel and the image-update scheduler owns `updates`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::debounce::{Debouncer, DEBOUNCE_DELAY};
use crate::docker::EventKind;
use crate::socket::msg::push_frame;
use crate::stack::{self, Stack};
use crate::state::Core;

/// Reconnect backoff for the daemon event stream.
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Consecutive reconnect attempts before giving up on the daemon.
const MAX_RETRIES: u32 = 5;

/// The closed set of broadcast channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stacks,
    Containers,
    Networks,
    Images,
    Volumes,
    Updates,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Stacks,
        Channel::Containers,
        Channel::Networks,
        Channel::Images,
        Channel::Volumes,
        Channel::Updates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stacks => "stacks",
            Channel::Containers => "containers",
            Channel::Networks => "networks",
            Channel::Images => "images",
            Channel::Volumes => "volumes",
            Channel::Updates => "updates",
        }
    }

    fn for_event(kind: EventKind) -> Channel {
        match kind {
            EventKind::Container => Channel::Containers,
            EventKind::Network => Channel::Networks,
            EventKind::Image => Channel::Images,
            EventKind::Volume => Channel::Volumes,
        }
    }
}

/// 64-bit FNV-1a over the serialized frame. A collision silently suppresses
/// one broadcast; the next distinct payload resynchronizes the channel.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Per-channel content-hash cache plus the shared debouncer.
pub struct Broadcaster {
    hashes: Mutex<HashMap<Channel, u64>>,
    pub debouncer: Debouncer,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            debouncer: Debouncer::new(DEBOUNCE_DELAY),
        }
    }

    /// Compare-and-store: true when the payload differs from the last one
    /// sent on this channel.
    fn should_send(&self, channel: Channel, hash: u64) -> bool {
        let mut hashes = self.hashes.lock();
        if hashes.get(&channel) == Some(&hash) {
            return false;
        }
        hashes.insert(channel, hash);
        true
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// -- Channel builders ---------------------------------------------------------
//
// Builders are pure queries; a transient daemon failure degrades to an empty
// result (logged at warn) and the hash cache keeps the channel from flapping.

async fn build_channel(core: &Arc<Core>, channel: Channel) -> Value {
    match channel {
        Channel::Stacks => build_stacks(core).await,
        Channel::Containers => build_containers(core).await,
        Channel::Networks => build_networks(core).await,
        Channel::Images => build_images(core).await,
        Channel::Volumes => build_volumes(core).await,
        Channel::Updates => build_updates(core).await,
    }
}

/// Filesystem scan only; clients derive live status from `containers`.
pub async fn build_stacks(core: &Arc<Core>) -> Value {
    let mut entries = Vec::new();
    for (name, compose_file_name) in stack::scan(&core.config.stacks_dir).await {
        let Ok(loaded) = Stack::load(&core.config.stacks_dir, &name).await else {
            continue;
        };
        let mut images = Map::new();
        for (service, image) in loaded.images() {
            images.insert(service, Value::String(image));
        }
        let ignored: Vec<String> = loaded
            .services()
            .iter()
            .filter(|s| s.status_ignored())
            .map(|s| s.name.clone())
            .collect();
        entries.push(json!({
            "name": name,
            "composeFileName": compose_file_name,
            "images": images,
            "ignoreStatus": ignored,
            "isManagedByDockge": true,
        }));
    }
    Value::Array(entries)
}

pub async fn build_containers(core: &Arc<Core>) -> Value {
    let mut containers = match core.docker.list_containers(None).await {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(err = %e, "container list failed, broadcasting empty state");
            Vec::new()
        }
    };
    containers.sort_by(|a, b| a.name.cmp(&b.name));

    let entries: Vec<Value> = containers
        .into_iter()
        .map(|c| {
            let display_labels: Map<String, Value> = c
                .labels
                .iter()
                .filter(|(k, _)| k.starts_with("dockge."))
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            json!({
                "name": c.name,
                "project": c.project,
                "service": c.service_name(),
                "state": c.state,
                "status": c.status,
                "health": c.health(),
                "image": c.image,
                "ports": c.ports,
                "labels": display_labels,
            })
        })
        .collect();
    Value::Array(entries)
}

async fn sorted_docker_list(
    result: anyhow::Result<Vec<Value>>,
    sort_key: &str,
    what: &str,
) -> Value {
    let mut list = match result {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(err = %e, "{what} list failed, broadcasting empty state");
            Vec::new()
        }
    };
    list.sort_by(|a, b| {
        let ka = a.get(sort_key).and_then(Value::as_str).unwrap_or_default();
        let kb = b.get(sort_key).and_then(Value::as_str).unwrap_or_default();
        ka.cmp(kb)
    });
    Value::Array(list)
}

pub async fn build_networks(core: &Arc<Core>) -> Value {
    sorted_docker_list(core.docker.list_networks().await, "Name", "network").await
}

pub async fn build_images(core: &Arc<Core>) -> Value {
    sorted_docker_list(core.docker.list_images().await, "Id", "image").await
}

pub async fn build_volumes(core: &Arc<Core>) -> Value {
    sorted_docker_list(core.docker.list_volumes().await, "Name", "volume").await
}

/// Sorted `<stack>/<service>` keys with a stored update.
pub async fn build_updates(core: &Arc<Core>) -> Value {
    let keys: Vec<Value> = core
        .store
        .update_records()
        .await
        .into_iter()
        .filter(|(_, record)| record.has_update)
        .map(|(key, _)| Value::String(key))
        .collect();
    Value::Array(keys)
}

// -- Broadcast steps ----------------------------------------------------------

/// Build and broadcast one channel now, subject to content-hash dedup.
pub async fn broadcast_channel(core: &Arc<Core>, channel: Channel) {
    if !core.socket.has_authenticated_conns() {
        return;
    }
    let data = build_channel(core, channel).await;
    let frame = push_frame(channel.as_str(), &data);
    let hash = fnv1a64(frame.as_bytes());
    if core.broadcast.should_send(channel, hash) {
        core.socket.broadcast_authenticated_bytes(Arc::new(frame));
    }
}

/// Debounced refresh of one channel.
pub fn trigger(core: &Arc<Core>, channel: Channel) {
    let task_core = Arc::clone(core);
    core.broadcast.debouncer.trigger(channel.as_str(), async move {
        broadcast_channel(&task_core, channel).await;
    });
}

/// Debounced refresh of every channel (after an action completes).
pub fn trigger_all(core: &Arc<Core>) {
    for channel in Channel::ALL {
        trigger(core, channel);
    }
}

/// Initial-state push for a freshly authenticated connection: every builder
/// runs once and the result goes to that connection only, bypassing the
/// dedup cache.
pub async fn send_initial_state(core: &Arc<Core>, conn: &Arc<crate::socket::Connection>) {
    for channel in Channel::ALL {
        let data = build_channel(core, channel).await;
        conn.send_event(channel.as_str(), &data);
    }
}

// -- Event loop ---------------------------------------------------------------

/// Drive refreshes from the daemon event stream until shutdown.
///
/// Resubscribes with exponential backoff when the stream fails; after
/// [`MAX_RETRIES`] consecutive failed attempts the error is returned and the
/// process exits non-zero.
pub async fn run_event_loop(core: Arc<Core>) -> anyhow::Result<()> {
    // One initial broadcast so early connections see state without waiting
    // for the first daemon event.
    if core.socket.has_authenticated_conns() {
        for channel in Channel::ALL {
            broadcast_channel(&core, channel).await;
        }
    }

    let mut failures: u32 = 0;
    let mut backoff = BACKOFF_START;

    loop {
        if core.shutdown.is_cancelled() {
            return Ok(());
        }

        let subscribed = match core.docker.ping().await {
            Ok(()) => {
                let mut stream = core.docker.events();
                tracing::debug!("subscribed to daemon events");
                loop {
                    tokio::select! {
                        _ = core.shutdown.cancelled() => return Ok(()),
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                // A live event proves the subscription is
                                // healthy; reconnect attempts start over.
                                failures = 0;
                                backoff = BACKOFF_START;
                                trigger(&core, Channel::for_event(event.kind));
                            }
                            Some(Err(e)) => {
                                tracing::warn!(err = %e, "daemon event stream error");
                                break;
                            }
                            None => {
                                tracing::warn!("daemon event stream closed");
                                break;
                            }
                        }
                    }
                }
                true
            }
            Err(e) => {
                tracing::warn!(err = %e, "daemon unreachable");
                false
            }
        };

        failures += 1;
        if failures > MAX_RETRIES {
            anyhow::bail!(
                "daemon event stream could not be sustained after {MAX_RETRIES} reconnect attempts"
            );
        }
        tracing::info!(
            attempt = failures,
            delay_secs = backoff.as_secs(),
            resubscribe = subscribed,
            "retrying daemon event subscription"
        );
        tokio::select! {
            _ = core.shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
