// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::keyword::Properties;
use crate::token::TokenGroupConf;

/// Configuration for the grid agent.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "gridagent", version, about = "Keyword execution agent for a test grid")]
pub struct AgentConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "GRID_AGENT_HOST")]
    pub host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, default_value_t = 8000, env = "GRID_AGENT_PORT")]
    pub port: u16,

    /// URL advertised to the grid. Defaults to `http://{host}:{port}`.
    #[arg(long, env = "GRID_AGENT_URL")]
    pub agent_url: Option<String>,

    /// Base URL of the grid coordinator. If unset, registration is disabled.
    #[arg(long, env = "GRID_AGENT_GRID_HOST")]
    pub grid_host: Option<String>,

    /// Registration heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "GRID_AGENT_REGISTRATION_MS")]
    pub registration_ms: u64,

    /// Timeout for calls to the grid in milliseconds.
    #[arg(long, default_value_t = 3000, env = "GRID_AGENT_GRID_TIMEOUT_MS")]
    pub grid_timeout_ms: u64,

    /// Default keyword call timeout in milliseconds (0 disables).
    #[arg(long, default_value_t = 180_000, env = "GRID_AGENT_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: u64,

    /// Path to the token group configuration JSON file.
    #[arg(long, env = "GRID_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter directive.
    #[arg(long, default_value = "info", env = "GRID_AGENT_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (`text` or `json`).
    #[arg(long, default_value = "text", env = "GRID_AGENT_LOG_FORMAT")]
    pub log_format: String,
}

impl AgentConfig {
    pub fn registration_interval(&self) -> Duration {
        Duration::from_millis(self.registration_ms)
    }

    pub fn grid_timeout(&self) -> Duration {
        Duration::from_millis(self.grid_timeout_ms)
    }

    /// `None` when call timeouts are disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    /// Load the file config, or an empty one when `--config` is not given.
    pub fn file_config(&self) -> anyhow::Result<AgentFileConfig> {
        match self.config {
            Some(ref path) => AgentFileConfig::load(path),
            None => Ok(AgentFileConfig::default()),
        }
    }
}

/// Token groups and agent-wide properties loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFileConfig {
    #[serde(default)]
    pub token_groups: Vec<TokenGroupConf>,
    #[serde(default)]
    pub properties: Properties,
}

impl AgentFileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading agent config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing agent config {}", path.display()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
