// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stack model: a directory under the stacks root holding a Compose file and
//! optional env/override files. Everything here is filesystem-only; live
//! container state comes from the daemon via the broadcast builders.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;

use crate::compose;

/// Compose file names probed in order.
pub const COMPOSE_FILE_NAMES: [&str; 2] = ["compose.yaml", "compose.yml"];
pub const OVERRIDE_FILE_NAME: &str = "compose.override.yaml";
pub const ENV_FILE_NAME: &str = ".env";
/// Env file applied to every stack when present at the stacks root.
pub const GLOBAL_ENV_FILE: &str = "global.env";
/// A global env file holding exactly this content is treated as absent.
pub const GLOBAL_ENV_PLACEHOLDER: &str = "# VARIABLE=value #comment";

/// One managed stack, loaded from disk.
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub dir: PathBuf,
    pub compose_file_name: String,
    pub compose_yaml: String,
    pub env: String,
    pub override_yaml: String,
}

/// Stack names are path components; anything else is rejected before any
/// filesystem access.
pub fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("stack name is required");
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !ok || name.starts_with('-') {
        anyhow::bail!("invalid stack name: {name}");
    }
    Ok(())
}

/// Probe a directory for its compose file name.
async fn probe_compose_file(dir: &Path) -> Option<String> {
    for candidate in COMPOSE_FILE_NAMES {
        if tokio::fs::try_exists(dir.join(candidate)).await.unwrap_or(false) {
            return Some(candidate.to_owned());
        }
    }
    None
}

async fn read_optional(path: PathBuf) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

impl Stack {
    /// Construct an unsaved stack from editor contents.
    pub fn from_parts(
        stacks_dir: &Path,
        name: &str,
        compose_yaml: &str,
        env: &str,
        override_yaml: &str,
    ) -> Self {
        Self {
            name: name.to_owned(),
            dir: stacks_dir.join(name),
            compose_file_name: COMPOSE_FILE_NAMES[0].to_owned(),
            compose_yaml: compose_yaml.to_owned(),
            env: env.to_owned(),
            override_yaml: override_yaml.to_owned(),
        }
    }

    /// Load a stack from disk.
    pub async fn load(stacks_dir: &Path, name: &str) -> anyhow::Result<Self> {
        validate_name(name)?;
        let dir = stacks_dir.join(name);
        let compose_file_name = probe_compose_file(&dir)
            .await
            .with_context(|| format!("stack not found: {name}"))?;
        let compose_yaml = tokio::fs::read_to_string(dir.join(&compose_file_name))
            .await
            .with_context(|| format!("failed to read compose file for {name}"))?;
        let env = read_optional(dir.join(ENV_FILE_NAME)).await;
        let override_yaml = read_optional(dir.join(OVERRIDE_FILE_NAME)).await;
        Ok(Self {
            name: name.to_owned(),
            dir,
            compose_file_name,
            compose_yaml,
            env,
            override_yaml,
        })
    }

    /// Write the stack to disk. `is_add` requires the directory to not yet
    /// exist; a plain save requires it to exist.
    pub async fn save(&self, is_add: bool) -> anyhow::Result<()> {
        validate_name(&self.name)?;
        compose::services(&self.compose_yaml).context("compose file is not valid YAML")?;

        let exists = tokio::fs::try_exists(&self.dir).await.unwrap_or(false);
        if is_add && exists {
            anyhow::bail!("stack already exists: {}", self.name);
        }
        if !is_add && !exists {
            anyhow::bail!("stack not found: {}", self.name);
        }
        if is_add {
            tokio::fs::create_dir_all(&self.dir).await?;
        }

        // Keep whichever compose file name the stack already uses.
        let file_name = probe_compose_file(&self.dir)
            .await
            .unwrap_or_else(|| self.compose_file_name.clone());
        tokio::fs::write(self.dir.join(&file_name), &self.compose_yaml).await?;

        write_or_remove(self.dir.join(ENV_FILE_NAME), &self.env).await?;
        write_or_remove(self.dir.join(OVERRIDE_FILE_NAME), &self.override_yaml).await?;
        Ok(())
    }

    /// Remove the stack directory and everything in it.
    pub async fn delete_files(&self) -> anyhow::Result<()> {
        tokio::fs::remove_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to delete stack directory {}", self.dir.display()))
    }

    /// Service name → image reference from the compose file.
    pub fn images(&self) -> IndexMap<String, String> {
        compose::service_images(&self.compose_yaml).unwrap_or_default()
    }

    pub fn services(&self) -> Vec<compose::ServiceSpec> {
        compose::services(&self.compose_yaml).unwrap_or_default()
    }

    /// Build `docker` argv for a compose subcommand against this stack,
    /// splicing in the global env file when one is configured.
    pub fn compose_args(
        &self,
        stacks_dir: &Path,
        command: &str,
        extra: &[&str],
    ) -> Vec<String> {
        let mut args = vec!["compose".to_owned()];
        if let Some(global) = global_env_path(stacks_dir) {
            args.push("--env-file".to_owned());
            args.push(global.to_string_lossy().into_owned());
            // Naming any --env-file suppresses the implicit .env; restore it.
            if self.dir.join(ENV_FILE_NAME).exists() {
                args.push("--env-file".to_owned());
                args.push(ENV_FILE_NAME.to_owned());
            }
        }
        args.push(command.to_owned());
        args.extend(extra.iter().map(|s| (*s).to_owned()));
        args
    }
}

async fn write_or_remove(path: PathBuf, content: &str) -> anyhow::Result<()> {
    if content.is_empty() {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
        }
        return Ok(());
    }
    tokio::fs::write(&path, content).await?;
    Ok(())
}

/// The effective global env file, unless absent or still the placeholder.
pub fn global_env_path(stacks_dir: &Path) -> Option<PathBuf> {
    let path = stacks_dir.join(GLOBAL_ENV_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    if content.trim() == GLOBAL_ENV_PLACEHOLDER {
        return None;
    }
    Some(path)
}

/// Scan the stacks root for stack directories, sorted by name.
pub async fn scan(stacks_dir: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(stacks_dir).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(file_type) = entry.file_type().await else { continue };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(compose_file) = probe_compose_file(&entry.path()).await {
            out.push((name, compose_file));
        }
    }
    out.sort();
    out
}

#[cfg(test)]
#[path = "stack_tests.rs"]
mod tests;
