//! User defaults: `<config_root>/defaults.toml`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GravitonError, Result};

pub const DEFAULTS_FILE: &str = "defaults.toml";

/// Default seconds to wait for a new cluster to pass its health check.
pub const DEFAULT_WAIT_TIMEOUT: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GravitonConfig {
    /// Plugin used when a command does not name one.
    pub cloud: String,
    /// Seconds to wait for health after creating an instance.
    pub wait_timeout: u64,
    /// Per-plugin option overrides, keyed by plugin name.
    pub plugins: HashMap<String, toml::Value>,
}

impl Default for GravitonConfig {
    fn default() -> Self {
        Self {
            cloud: "aws".to_string(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            plugins: HashMap::new(),
        }
    }
}

impl GravitonConfig {
    /// Load `<config_dir>/defaults.toml`, or built-in defaults when absent.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(DEFAULTS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content).map_err(|e| {
            GravitonError::precondition(format!("invalid defaults file {}: {e}", path.display()))
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The override table for a plugin, if any.
    pub fn plugin_defaults(&self, plugin: &str) -> Option<&toml::Value> {
        self.plugins.get(plugin)
    }
}
