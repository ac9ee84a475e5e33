//! Configuration module
//!
//! Handles loading and managing configuration.

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Number of workers in the pool
    pub workers: usize,

    /// Assignments per batch dispatch
    pub batch_size: usize,

    /// Enable batch dispatch
    pub batching: bool,

    /// Default output format
    pub default_format: String,

    /// Override for the results storage directory
    pub results_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 8,
            batching: true,
            default_format: "table".to_string(),
            results_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// The coordinator tuning this configuration describes
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            workers: self.workers.max(1),
            batch_size: self.batch_size.max(1),
            batching: self.batching,
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
