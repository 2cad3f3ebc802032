// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Self-hosted Docker Compose management server.
#[derive(Debug, Clone, Parser)]
#[command(name = "stevedore", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "STEVEDORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "STEVEDORE_PORT", default_value = "5001")]
    pub port: u16,

    /// Directory holding the managed Compose stacks.
    #[arg(long, env = "STEVEDORE_STACKS_DIR", default_value = "./stacks")]
    pub stacks_dir: PathBuf,

    /// Directory for persistent server state (users, settings, agents).
    #[arg(long, env = "STEVEDORE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Skip authentication entirely; every connection is trusted.
    #[arg(long, env = "STEVEDORE_NO_AUTH", default_value = "false")]
    pub no_auth: bool,

    /// Simulate compose actions in-process instead of spawning `docker`.
    /// Intended for tests and demos on hosts without a Compose install.
    #[arg(long, env = "STEVEDORE_MOCK_COMPOSE", default_value = "false")]
    pub mock_compose: bool,

    /// Ring buffer size per terminal, in bytes.
    #[arg(long, env = "STEVEDORE_RING_SIZE", default_value = "65536")]
    pub ring_size: usize,

    /// Log format (json or text).
    #[arg(long, env = "STEVEDORE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "STEVEDORE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ring_size == 0 {
            anyhow::bail!("--ring-size must be positive");
        }
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("--log-format must be 'json' or 'text'");
        }
        Ok(())
    }

    /// Configuration for tests: temp directories, no auth, mock compose.
    #[cfg(test)]
    pub fn test_config(stacks_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            stacks_dir,
            data_dir,
            no_auth: true,
            mock_compose: true,
            ring_size: 65536,
            log_format: "text".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
