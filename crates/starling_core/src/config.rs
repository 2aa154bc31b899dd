/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::delivery_queue::QueueSettings;

/// Loaded from a JSON file handed to the service binary. The public base URL
/// is the only knob core behavior depends on; everything else has a default.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Base URL IRIs are minted under, e.g. `https://social.example`.
    #[serde(alias = "base_url")]
    pub public_base_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub data_dir: PathBuf,
    /// Local actors provisioned at startup when missing.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    #[serde(default)]
    pub delivery_max_attempts: Option<u32>,
    #[serde(default)]
    pub delivery_base_backoff_secs: Option<u64>,
    #[serde(default)]
    pub delivery_max_backoff_secs: Option<u64>,
    #[serde(default)]
    pub delivery_max_parallel: Option<usize>,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: ServerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let defaults = QueueSettings::default();
        QueueSettings {
            max_attempts: self
                .delivery_max_attempts
                .unwrap_or(defaults.max_attempts)
                .clamp(1, 50),
            base_backoff_secs: self
                .delivery_base_backoff_secs
                .unwrap_or(defaults.base_backoff_secs)
                .clamp(1, 600),
            max_backoff_secs: self
                .delivery_max_backoff_secs
                .unwrap_or(defaults.max_backoff_secs)
                .clamp(60, 24 * 3600),
            max_parallel: self
                .delivery_max_parallel
                .unwrap_or(defaults.max_parallel)
                .clamp(1, 64),
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(2 * 1024 * 1024)
    }
}

fn default_bind() -> String {
    "127.0.0.1:8788".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg: ServerConfig = serde_json::from_str(
            r#"{"public_base_url": "https://localhost", "data_dir": "/tmp/starling", "users": ["test"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8788");
        assert_eq!(cfg.users, vec!["test"]);
        assert_eq!(cfg.queue_settings().max_attempts, 10);
        assert_eq!(cfg.max_body_bytes(), 2 * 1024 * 1024);
    }
}
