//! Host configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};
use crate::sandbox::SandboxConfig;

/// Configuration for a [`crate::ScriptHost`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding the `global/`, `pages/` and `shared/` scopes.
    pub scripts_root: PathBuf,

    /// Wall-clock budget per hook invocation in milliseconds.
    pub timeout_ms: u64,

    /// Memory ceiling for the script state in MB (0 = unlimited).
    pub max_memory_mb: usize,

    /// Unit ids (root-relative paths) that are never compiled or bound.
    pub disabled_units: HashSet<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let scripts_root = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("optima")
            .join("scripts");

        Self {
            scripts_root,
            timeout_ms: 5000,
            max_memory_mb: 64,
            disabled_units: HashSet::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// absent keys.
    pub fn load(path: &Path) -> ScriptResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ScriptError::Config {
            message: e.to_string(),
        })
    }

    pub fn with_scripts_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scripts_root = root.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn disable_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.disabled_units.insert(unit_id.into());
        self
    }

    pub fn is_disabled(&self, unit_id: &str) -> bool {
        self.disabled_units.contains(unit_id)
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }

    pub(crate) fn sandbox(&self) -> SandboxConfig {
        SandboxConfig {
            timeout_ms: self.timeout_ms,
            max_memory: self.max_memory_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.max_memory_mb, 64);
        assert!(config.disabled_units.is_empty());
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("optima-script.toml");
        std::fs::write(&path, "timeout_ms = 250\nscripts_root = \"/srv/scripts\"\n").unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.scripts_root, PathBuf::from("/srv/scripts"));
        // Unspecified keys keep their defaults.
        assert_eq!(config.max_memory_mb, 64);
    }

    #[test]
    fn test_disable_unit() {
        let config = HostConfig::default().disable_unit("global/default.lua");
        assert!(config.is_disabled("global/default.lua"));
        assert!(!config.is_disabled("shared/default.lua"));
    }
}
