// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable in-process `DockerApi`.
//!
//! Unit tests script it directly; `--mock-compose` runs the server against
//! an empty instance so no daemon is needed (the event stream stays open
//! and every query returns empty state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{ContainerInfo, DockerApi, DockerEvent};

pub struct MockDocker {
    pub containers: Mutex<Vec<ContainerInfo>>,
    pub networks: Mutex<Vec<Value>>,
    pub images: Mutex<Vec<Value>>,
    pub volumes: Mutex<Vec<Value>>,
    /// Scripted log lines per container id, replayed by `follow_logs`.
    pub logs: Mutex<HashMap<String, Vec<Bytes>>>,
    /// (local, remote) digest pairs per image reference.
    pub digests: Mutex<HashMap<String, (Option<String>, Option<String>)>>,
    pub started: Mutex<HashMap<String, DateTime<Utc>>>,
    /// When set, every query fails — simulates a daemon outage.
    pub fail_queries: AtomicBool,
    pub prune_calls: AtomicUsize,
    event_tx: Mutex<broadcast::Sender<DockerEvent>>,
}

impl Default for MockDocker {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            containers: Mutex::new(Vec::new()),
            networks: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            volumes: Mutex::new(Vec::new()),
            logs: Mutex::new(HashMap::new()),
            digests: Mutex::new(HashMap::new()),
            started: Mutex::new(HashMap::new()),
            fail_queries: AtomicBool::new(false),
            prune_calls: AtomicUsize::new(0),
            event_tx: Mutex::new(event_tx),
        }
    }
}

impl MockDocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a daemon event to every subscribed stream.
    pub fn push_event(&self, event: DockerEvent) {
        let _ = self.event_tx.lock().send(event);
    }

    /// End every live event stream, as a daemon restart would.
    pub fn drop_event_streams(&self) {
        let (new_tx, _) = broadcast::channel(64);
        *self.event_tx.lock() = new_tx;
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_queries.load(Ordering::Relaxed) {
            anyhow::bail!("mock daemon unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl DockerApi for MockDocker {
    async fn list_containers(&self, project: Option<&str>) -> anyhow::Result<Vec<ContainerInfo>> {
        self.check()?;
        let list = self.containers.lock().clone();
        Ok(match project {
            Some(p) => list.into_iter().filter(|c| c.project.as_deref() == Some(p)).collect(),
            None => list,
        })
    }

    async fn inspect_container(&self, name: &str) -> anyhow::Result<Value> {
        self.check()?;
        let list = self.containers.lock();
        let found = list
            .iter()
            .find(|c| c.name == name || c.id == name)
            .ok_or_else(|| anyhow::anyhow!("no such container: {name}"))?;
        Ok(json!({
            "Id": found.id,
            "Name": format!("/{}", found.name),
            "Image": found.image,
            "State": { "Status": found.state },
            "Config": { "Labels": found.labels },
        }))
    }

    async fn container_started_at(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.check()?;
        Ok(self.started.lock().get(id).copied())
    }

    async fn list_networks(&self) -> anyhow::Result<Vec<Value>> {
        self.check()?;
        Ok(self.networks.lock().clone())
    }

    async fn list_images(&self) -> anyhow::Result<Vec<Value>> {
        self.check()?;
        Ok(self.images.lock().clone())
    }

    async fn list_volumes(&self) -> anyhow::Result<Vec<Value>> {
        self.check()?;
        Ok(self.volumes.lock().clone())
    }

    fn follow_logs(
        &self,
        container_id: &str,
        tail: Option<u64>,
    ) -> BoxStream<'static, anyhow::Result<Bytes>> {
        let mut lines = self.logs.lock().get(container_id).cloned().unwrap_or_default();
        if let Some(tail) = tail {
            let keep = (tail as usize).min(lines.len());
            lines = lines.split_off(lines.len() - keep);
        }
        // Replay the scripted history, then stay open like a follow stream.
        futures_util::stream::iter(lines.into_iter().map(Ok))
            .chain(futures_util::stream::pending())
            .boxed()
    }

    fn events(&self) -> BoxStream<'static, anyhow::Result<DockerEvent>> {
        let rx = self.event_tx.lock().subscribe();
        BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok().map(Ok) })
            .boxed()
    }

    async fn local_digest(&self, image: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(self.digests.lock().get(image).and_then(|(local, _)| local.clone()))
    }

    async fn remote_digest(&self, image: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(self.digests.lock().get(image).and_then(|(_, remote)| remote.clone()))
    }

    async fn prune_images(&self) -> anyhow::Result<()> {
        self.check()?;
        self.prune_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn container_stats(&self, name: &str) -> anyhow::Result<Value> {
        self.check()?;
        Ok(json!({ "name": name, "cpu_stats": {}, "memory_stats": {} }))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.check()
    }
}

/// A container summary for tests.
pub fn container(project: &str, service: &str, state: &str) -> ContainerInfo {
    ContainerInfo {
        id: format!("{project}-{service}-id"),
        name: format!("{project}-{service}-1"),
        project: Some(project.to_owned()),
        service: Some(service.to_owned()),
        state: state.to_owned(),
        status: if state == "running" { "Up 2 minutes".to_owned() } else { "Exited (0)".to_owned() },
        image: format!("{service}:latest"),
        ports: Value::Null,
        labels: HashMap::from([
            (super::LABEL_PROJECT.to_owned(), project.to_owned()),
            (super::LABEL_SERVICE.to_owned(), service.to_owned()),
        ]),
    }
}
