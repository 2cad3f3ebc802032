// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service/image/label extraction from Compose YAML.
//!
//! This is deliberately not a Compose implementation: the daemon and the
//! `docker compose` CLI own the semantics. The server only needs the service
//! names, their image references, and the handful of labels it interprets.

use indexmap::IndexMap;
use serde_yaml::Value;

/// Exclude a service from stack-status derivation.
pub const LABEL_STATUS_IGNORE: &str = "dockge.status.ignore";
/// Opt a service out of image-update checks.
pub const LABEL_UPDATES_CHECK: &str = "dockge.imageupdates.check";
/// Changelog URL passed through to the UI.
pub const LABEL_CHANGELOG: &str = "dockge.imageupdates.changelog";
/// Arbitrary UI links: `dockge.urls.<key>=<url>`.
pub const LABEL_URL_PREFIX: &str = "dockge.urls.";

/// One service as extracted from a Compose document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// Image reference, empty for build-only services.
    pub image: String,
    pub labels: IndexMap<String, String>,
}

impl ServiceSpec {
    /// Whether the image-update scheduler should check this service.
    pub fn updates_check_enabled(&self) -> bool {
        self.labels.get(LABEL_UPDATES_CHECK).map(String::as_str) != Some("false")
    }

    pub fn status_ignored(&self) -> bool {
        self.labels.get(LABEL_STATUS_IGNORE).map(String::as_str) == Some("true")
    }

    pub fn changelog_url(&self) -> Option<&str> {
        self.labels.get(LABEL_CHANGELOG).map(String::as_str)
    }

    /// `dockge.urls.*` labels, keyed by the suffix.
    pub fn urls(&self) -> IndexMap<String, String> {
        self.labels
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(LABEL_URL_PREFIX).map(|key| (key.to_owned(), v.clone()))
            })
            .collect()
    }
}

/// Extract the services of a Compose document in declaration order.
///
/// Malformed documents yield an error; a missing or empty `services` key
/// yields an empty list.
pub fn services(yaml: &str) -> anyhow::Result<Vec<ServiceSpec>> {
    let doc: Value = serde_yaml::from_str(yaml)?;
    let Some(services) = doc.get("services").and_then(Value::as_mapping) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for (name, body) in services {
        let Some(name) = name.as_str() else { continue };
        let image = body
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        out.push(ServiceSpec {
            name: name.to_owned(),
            image,
            labels: extract_labels(body.get("labels")),
        });
    }
    Ok(out)
}

/// Service name → image reference map. Build-only services map to "".
pub fn service_images(yaml: &str) -> anyhow::Result<IndexMap<String, String>> {
    Ok(services(yaml)?.into_iter().map(|s| (s.name, s.image)).collect())
}

/// Compose allows labels as a map (`k: v`) or a list (`- k=v`); scalar
/// values of either form are stringified.
fn extract_labels(value: Option<&Value>) -> IndexMap<String, String> {
    let mut labels = IndexMap::new();
    match value {
        Some(Value::Mapping(map)) => {
            for (k, v) in map {
                if let Some(k) = k.as_str() {
                    labels.insert(k.to_owned(), scalar_to_string(v));
                }
            }
        }
        Some(Value::Sequence(seq)) => {
            for entry in seq {
                if let Some(entry) = entry.as_str() {
                    match entry.split_once('=') {
                        Some((k, v)) => labels.insert(k.to_owned(), v.to_owned()),
                        None => labels.insert(entry.to_owned(), String::new()),
                    };
                }
            }
        }
        _ => {}
    }
    labels
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
#[path = "compose_tests.rs"]
mod tests;
