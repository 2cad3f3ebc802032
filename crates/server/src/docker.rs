// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contract with the Docker daemon.
//!
//! Everything the server needs from Docker goes through [`DockerApi`] so the
//! broadcast engine, log pipeline, and scheduler can be exercised against an
//! in-process mock. The production implementation wraps a `bollard` client.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bollard::query_parameters::{
    EventsOptions, InspectContainerOptions, ListContainersOptions, ListImagesOptions,
    ListNetworksOptions, ListVolumesOptions, LogsOptions, PruneImagesOptions, StatsOptions,
};
use bollard::secret::{ContainerSummary, EventMessage, EventMessageTypeEnum};
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;

/// Compose identity labels.
pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";

/// Daemon queries (list/inspect) get a short deadline; anything slower is
/// treated as a transient failure and surfaced as an empty result upstream.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Which resource kind a daemon event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Container,
    Network,
    Image,
    Volume,
}

/// A daemon event reduced to the fields the server reacts to.
#[derive(Debug, Clone)]
pub struct DockerEvent {
    pub kind: EventKind,
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

impl DockerEvent {
    /// The compose project this event belongs to, when labeled.
    pub fn project(&self) -> Option<&str> {
        self.attributes.get(LABEL_PROJECT).map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.attributes.get(LABEL_SERVICE).map(String::as_str)
    }
}

/// One container, reduced to what the UI displays.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub project: Option<String>,
    pub service: Option<String>,
    pub state: String,
    pub status: String,
    pub image: String,
    pub ports: Value,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    /// Health fragment from the status text ("Up 3 minutes (healthy)").
    pub fn health(&self) -> Option<&'static str> {
        if self.status.contains("(healthy)") {
            Some("healthy")
        } else if self.status.contains("(unhealthy)") {
            Some("unhealthy")
        } else if self.status.contains("(health: starting)") {
            Some("starting")
        } else {
            None
        }
    }

    /// Compose service name: label first, then a best-effort parse of the
    /// `<project>-<service>-<replica>` naming convention.
    pub fn service_name(&self) -> String {
        if let Some(svc) = &self.service {
            return svc.clone();
        }
        let name = self.name.trim_start_matches('/');
        match name.rsplitn(3, '-').nth(1) {
            Some(middle) => middle.to_owned(),
            None => name.to_owned(),
        }
    }
}

/// Async contract with the daemon. Implemented by [`BollardDocker`] in
/// production and by `mock::MockDocker` in tests.
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// List containers, optionally restricted to one compose project.
    /// Includes stopped containers.
    async fn list_containers(&self, project: Option<&str>) -> anyhow::Result<Vec<ContainerInfo>>;

    /// Raw inspect document for one container (by name or id).
    async fn inspect_container(&self, name: &str) -> anyhow::Result<Value>;

    /// The `StartedAt` timestamp from the container's state, if running.
    async fn container_started_at(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn list_networks(&self) -> anyhow::Result<Vec<Value>>;
    async fn list_images(&self) -> anyhow::Result<Vec<Value>>;
    async fn list_volumes(&self) -> anyhow::Result<Vec<Value>>;

    /// Follow a container's log stream. `tail` limits the history replayed
    /// before live bytes; `None` replays everything.
    fn follow_logs(&self, container_id: &str, tail: Option<u64>)
        -> BoxStream<'static, anyhow::Result<Bytes>>;

    /// Subscribe to daemon events. The stream ends when the daemon goes
    /// away; callers are expected to resubscribe.
    fn events(&self) -> BoxStream<'static, anyhow::Result<DockerEvent>>;

    /// Digest of the locally stored image, from its repo digests.
    async fn local_digest(&self, image: &str) -> anyhow::Result<Option<String>>;

    /// Digest of the registry manifest for the image reference.
    async fn remote_digest(&self, image: &str) -> anyhow::Result<Option<String>>;

    /// Remove dangling images.
    async fn prune_images(&self) -> anyhow::Result<()>;

    /// One-shot stats sample for a container.
    async fn container_stats(&self, name: &str) -> anyhow::Result<Value>;

    async fn ping(&self) -> anyhow::Result<()>;
}

// -- Bollard implementation ---------------------------------------------------

/// Production `DockerApi` over the local daemon socket.
pub struct BollardDocker {
    client: Docker,
}

impl BollardDocker {
    pub fn connect() -> anyhow::Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .context("failed to connect to the Docker daemon")?;
        Ok(Self { client })
    }
}

fn map_container(summary: ContainerSummary) -> ContainerInfo {
    let labels = summary.labels.unwrap_or_default();
    let name = summary
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_owned())
        .unwrap_or_default();
    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name,
        project: labels.get(LABEL_PROJECT).cloned(),
        service: labels.get(LABEL_SERVICE).cloned(),
        state: summary.state.map(|s| s.to_string()).unwrap_or_default(),
        status: summary.status.unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        ports: serde_json::to_value(summary.ports).unwrap_or(Value::Null),
        labels,
    }
}

fn map_event(event: EventMessage) -> Option<DockerEvent> {
    let kind = match event.typ? {
        EventMessageTypeEnum::CONTAINER => EventKind::Container,
        EventMessageTypeEnum::NETWORK => EventKind::Network,
        EventMessageTypeEnum::IMAGE => EventKind::Image,
        EventMessageTypeEnum::VOLUME => EventKind::Volume,
        _ => return None,
    };
    let actor = event.actor?;
    Some(DockerEvent {
        kind,
        action: event.action.unwrap_or_default(),
        actor_id: actor.id.unwrap_or_default(),
        attributes: actor.attributes.unwrap_or_default(),
    })
}

async fn with_query_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, bollard::errors::Error>>,
    what: &str,
) -> anyhow::Result<T> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow::anyhow!("{what} timed out"))?
        .with_context(|| format!("{what} failed"))
}

#[async_trait]
impl DockerApi for BollardDocker {
    async fn list_containers(&self, project: Option<&str>) -> anyhow::Result<Vec<ContainerInfo>> {
        let filters = project.map(|p| {
            HashMap::from([("label".to_owned(), vec![format!("{LABEL_PROJECT}={p}")])])
        });
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let list =
            with_query_timeout(self.client.list_containers(Some(options)), "container list")
                .await?;
        Ok(list.into_iter().map(map_container).collect())
    }

    async fn inspect_container(&self, name: &str) -> anyhow::Result<Value> {
        let inspect = with_query_timeout(
            self.client.inspect_container(name, None::<InspectContainerOptions>),
            "container inspect",
        )
        .await?;
        Ok(serde_json::to_value(inspect)?)
    }

    async fn container_started_at(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let inspect = with_query_timeout(
            self.client.inspect_container(id, None::<InspectContainerOptions>),
            "container inspect",
        )
        .await?;
        let started = inspect.state.and_then(|s| s.started_at);
        Ok(started
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn list_networks(&self) -> anyhow::Result<Vec<Value>> {
        let networks = with_query_timeout(
            self.client.list_networks(None::<ListNetworksOptions>),
            "network list",
        )
        .await?;
        Ok(networks
            .into_iter()
            .map(|n| serde_json::to_value(n).unwrap_or(Value::Null))
            .collect())
    }

    async fn list_images(&self) -> anyhow::Result<Vec<Value>> {
        let images =
            with_query_timeout(self.client.list_images(None::<ListImagesOptions>), "image list")
                .await?;
        Ok(images
            .into_iter()
            .map(|i| serde_json::to_value(i).unwrap_or(Value::Null))
            .collect())
    }

    async fn list_volumes(&self) -> anyhow::Result<Vec<Value>> {
        let response = with_query_timeout(
            self.client.list_volumes(None::<ListVolumesOptions>),
            "volume list",
        )
        .await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
            .collect())
    }

    fn follow_logs(
        &self,
        container_id: &str,
        tail: Option<u64>,
    ) -> BoxStream<'static, anyhow::Result<Bytes>> {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            tail: tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_owned()),
            ..Default::default()
        };
        self.client
            .logs(container_id, Some(options))
            .map(|item| match item {
                Ok(output) => Ok(output.into_bytes()),
                Err(e) => Err(anyhow::anyhow!("log stream error: {e}")),
            })
            .boxed()
    }

    fn events(&self) -> BoxStream<'static, anyhow::Result<DockerEvent>> {
        self.client
            .events(Some(EventsOptions::default()))
            .filter_map(|item| async move {
                match item {
                    Ok(msg) => map_event(msg).map(Ok),
                    Err(e) => Some(Err(anyhow::anyhow!("event stream error: {e}"))),
                }
            })
            .boxed()
    }

    async fn local_digest(&self, image: &str) -> anyhow::Result<Option<String>> {
        let inspect =
            with_query_timeout(self.client.inspect_image(image), "image inspect").await?;
        // RepoDigests entries look like "nginx@sha256:...".
        let digest = inspect
            .repo_digests
            .unwrap_or_default()
            .into_iter()
            .find_map(|d| d.split_once('@').map(|(_, digest)| digest.to_owned()));
        Ok(digest)
    }

    async fn remote_digest(&self, image: &str) -> anyhow::Result<Option<String>> {
        let inspect = with_query_timeout(
            self.client.inspect_registry_image(image, None),
            "registry manifest inspect",
        )
        .await?;
        Ok(inspect.descriptor.digest.filter(|d| !d.is_empty()))
    }

    async fn prune_images(&self) -> anyhow::Result<()> {
        let options = PruneImagesOptions {
            filters: Some(HashMap::from([(
                "dangling".to_owned(),
                vec!["true".to_owned()],
            )])),
        };
        with_query_timeout(self.client.prune_images(Some(options)), "image prune").await?;
        Ok(())
    }

    async fn container_stats(&self, name: &str) -> anyhow::Result<Value> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.client.stats(name, Some(options));
        let sample = tokio::time::timeout(QUERY_TIMEOUT, stream.next())
            .await
            .map_err(|_| anyhow::anyhow!("stats sample timed out"))?
            .ok_or_else(|| anyhow::anyhow!("stats stream ended without a sample"))?
            .context("stats sample failed")?;
        Ok(serde_json::to_value(sample)?)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        with_query_timeout(self.client.ping(), "ping").await?;
        Ok(())
    }
}

#[path = "docker_mock.rs"]
pub mod mock;

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
