// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent server state: users, settings, registered agents, and image
//! update results. One JSON document per concern under the data directory,
//! loaded at startup and rewritten atomically (tmp + rename) on mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Empty string is the local endpoint.
    #[serde(default)]
    pub endpoint: String,
}

/// Result of one digest check for a (stack, service) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    pub image: String,
    pub local_digest: String,
    pub remote_digest: String,
    pub has_update: bool,
    /// Epoch seconds of the check that produced this record.
    pub last_checked: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateState {
    /// Epoch seconds of the last full sweep.
    last_check: Option<i64>,
    /// Keyed by `<stack>/<service>`; last writer wins.
    records: BTreeMap<String, UpdateRecord>,
}

/// Store key for a (stack, service) update record.
pub fn update_key(stack: &str, service: &str) -> String {
    format!("{stack}/{service}")
}

pub struct Store {
    dir: PathBuf,
    users: RwLock<Vec<UserRecord>>,
    settings: RwLock<Map<String, Value>>,
    agents: RwLock<Vec<AgentRecord>>,
    updates: RwLock<UpdateState>,
}

async fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).with_context(|| format!("corrupt {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn persist<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))
}

impl Store {
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_owned(),
            users: RwLock::new(load_or_default(&dir.join("users.json")).await?),
            settings: RwLock::new(load_or_default(&dir.join("settings.json")).await?),
            agents: RwLock::new(load_or_default(&dir.join("agents.json")).await?),
            updates: RwLock::new(load_or_default(&dir.join("updates.json")).await?),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    // -- Users ----------------------------------------------------------------

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn find_user(&self, username: &str) -> Option<UserRecord> {
        self.users.read().await.iter().find(|u| u.username == username).cloned()
    }

    /// Stable numeric id for a user (1-based position in the user list).
    pub async fn user_id(&self, username: &str) -> Option<u64> {
        self.users
            .read()
            .await
            .iter()
            .position(|u| u.username == username)
            .map(|index| index as u64 + 1)
    }

    pub async fn add_user(&self, username: &str, password_hash: &str) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username == username) {
            anyhow::bail!("user already exists: {username}");
        }
        users.push(UserRecord {
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
        });
        persist(&self.path("users.json"), &*users).await
    }

    pub async fn set_password_hash(
        &self,
        username: &str,
        password_hash: &str,
    ) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| anyhow::anyhow!("no such user: {username}"))?;
        user.password_hash = password_hash.to_owned();
        persist(&self.path("users.json"), &*users).await
    }

    // -- Settings -------------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> Option<Value> {
        self.settings.read().await.get(key).cloned()
    }

    pub async fn set_setting(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut settings = self.settings.write().await;
        settings.insert(key.to_owned(), value);
        persist(&self.path("settings.json"), &*settings).await
    }

    pub async fn settings_snapshot(&self) -> Map<String, Value> {
        self.settings.read().await.clone()
    }

    /// Merge a settings object in; `null` values delete their key.
    pub async fn merge_settings(&self, incoming: Map<String, Value>) -> anyhow::Result<()> {
        let mut settings = self.settings.write().await;
        for (key, value) in incoming {
            if value.is_null() {
                settings.remove(&key);
            } else {
                settings.insert(key, value);
            }
        }
        persist(&self.path("settings.json"), &*settings).await
    }

    /// The token-signing secret, generated on first use.
    pub async fn jwt_secret(&self) -> anyhow::Result<String> {
        if let Some(secret) = self.get_setting("jwtSecret").await.and_then(|v| {
            v.as_str().map(str::to_owned)
        }) {
            return Ok(secret);
        }
        let secret = uuid::Uuid::new_v4().to_string();
        self.set_setting("jwtSecret", Value::String(secret.clone())).await?;
        Ok(secret)
    }

    // -- Agents ---------------------------------------------------------------

    pub async fn agents(&self) -> Vec<AgentRecord> {
        self.agents.read().await.clone()
    }

    pub async fn add_agent(&self, record: AgentRecord) -> anyhow::Result<()> {
        let mut agents = self.agents.write().await;
        if agents.iter().any(|a| a.url == record.url) {
            anyhow::bail!("agent already exists: {}", record.url);
        }
        agents.push(record);
        persist(&self.path("agents.json"), &*agents).await
    }

    pub async fn remove_agent(&self, url: &str) -> anyhow::Result<()> {
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|a| a.url != url);
        if agents.len() == before {
            anyhow::bail!("no such agent: {url}");
        }
        persist(&self.path("agents.json"), &*agents).await
    }

    pub async fn update_agent(&self, record: AgentRecord) -> anyhow::Result<()> {
        let mut agents = self.agents.write().await;
        let slot = agents
            .iter_mut()
            .find(|a| a.url == record.url)
            .ok_or_else(|| anyhow::anyhow!("no such agent: {}", record.url))?;
        *slot = record;
        persist(&self.path("agents.json"), &*agents).await
    }

    // -- Image update records -------------------------------------------------

    pub async fn update_records(&self) -> BTreeMap<String, UpdateRecord> {
        self.updates.read().await.records.clone()
    }

    pub async fn upsert_update(
        &self,
        stack: &str,
        service: &str,
        record: UpdateRecord,
    ) -> anyhow::Result<()> {
        let mut state = self.updates.write().await;
        state.records.insert(update_key(stack, service), record);
        persist(&self.path("updates.json"), &*state).await
    }

    pub async fn remove_update(&self, stack: &str, service: &str) -> anyhow::Result<()> {
        let mut state = self.updates.write().await;
        if state.records.remove(&update_key(stack, service)).is_some() {
            persist(&self.path("updates.json"), &*state).await?;
        }
        Ok(())
    }

    /// Drop every record belonging to a stack (after delete or update).
    pub async fn remove_stack_updates(&self, stack: &str) -> anyhow::Result<()> {
        let prefix = format!("{stack}/");
        let mut state = self.updates.write().await;
        let before = state.records.len();
        state.records.retain(|k, _| !k.starts_with(&prefix));
        if state.records.len() != before {
            persist(&self.path("updates.json"), &*state).await?;
        }
        Ok(())
    }

    pub async fn last_check(&self) -> Option<i64> {
        self.updates.read().await.last_check
    }

    pub async fn set_last_check(&self, epoch_secs: i64) -> anyhow::Result<()> {
        let mut state = self.updates.write().await;
        state.last_check = Some(epoch_secs);
        persist(&self.path("updates.json"), &*state).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
