//! Configuration management for scan-compensate

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compensation::DEFAULT_REFERENCE;
use crate::profile::DEFAULT_PREFIX;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Where meshes are stored and which ones are used
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Section storage file holding the mesh profiles
    pub storage: PathBuf,
    /// Section name prefix of stored profiles
    pub section_prefix: String,
    /// Reference profile used when a request names none
    pub default_reference: String,
    /// Profile activated at startup, if it exists
    pub active_profile: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("printer_data.toml"),
            section_prefix: DEFAULT_PREFIX.to_string(),
            default_reference: DEFAULT_REFERENCE.to_string(),
            active_profile: Some("default".to_string()),
        }
    }
}

/// Console history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Messages kept for the console endpoint
    pub capacity: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub mesh: MeshConfig,

    #[serde(default)]
    pub console: ConsoleConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Storage path resolved against the directory of the config file
    pub fn storage_path(&self, config_path: &Path) -> PathBuf {
        match config_path.parent() {
            Some(dir) if self.mesh.storage.is_relative() => dir.join(&self.mesh.storage),
            _ => self.mesh.storage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8092);
        assert_eq!(config.mesh.section_prefix, "bed_mesh");
        assert_eq!(config.mesh.default_reference, "Contact");
        assert_eq!(config.console.capacity, 100);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[server]\nhost = \"127.0.0.1\"\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.mesh.storage, PathBuf::from("printer_data.toml"));
    }

    #[test]
    fn test_load_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded.server.port, created.server.port);
        assert_eq!(loaded.mesh.active_profile, Some("default".to_string()));
        assert_eq!(loaded.storage_path(&path), dir.path().join("printer_data.toml"));
    }
}
