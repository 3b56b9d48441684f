//! Config store for locating and loading droidpush.toml.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{DroidpushConfig, parser};

const CONFIG_FILE: &str = "droidpush.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
    explicit: bool,
}

impl ConfigStore {
    /// Store at `<config_dir>/droidpush/droidpush.toml`; the file is optional.
    pub fn from_default_location() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("droidpush");
        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            explicit: false,
        })
    }

    /// Store for a file the user named; it must exist.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            explicit: true,
        }
    }

    /// Explicit path if given, default location otherwise.
    pub fn resolve(path: Option<PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Ok(Self::from_path(path)),
            None => Self::from_default_location(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<DroidpushConfig> {
        if !self.config_path.exists() {
            if self.explicit {
                anyhow::bail!("Config file not found: {}", self.config_path.display());
            }
            debug!(path = %self.config_path.display(), "no config file; using defaults");
            return Ok(DroidpushConfig::default());
        }
        parser::parse_config(&self.config_path)
    }
}
