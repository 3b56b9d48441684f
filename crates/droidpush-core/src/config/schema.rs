//! Configuration schema for droidpush.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bridge::AdbBridge;
use crate::error::BridgeError;
use crate::reconcile::DEFAULT_MAX_CYCLES;

/// Root configuration structure for droidpush.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DroidpushConfig {
    /// Bridge executable; bare names are looked up on PATH
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,

    /// Reconciliation cycles before giving up on a connection
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    /// Wait bound for every bridge command except install
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Wait bound for `install`
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,

    /// Attempts for devices/connect/disconnect/kill-server/start-server
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_max_cycles() -> u32 {
    DEFAULT_MAX_CYCLES
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_install_timeout_secs() -> u64 {
    300
}

fn default_transient_attempts() -> u32 {
    2
}

impl Default for DroidpushConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            max_cycles: default_max_cycles(),
            command_timeout_secs: default_command_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            transient_attempts: default_transient_attempts(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub adb_path: Option<PathBuf>,
    pub max_cycles: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub install_timeout_secs: Option<u64>,
}

impl DroidpushConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.adb_path.as_os_str().is_empty() {
            anyhow::bail!("adb_path must not be empty");
        }
        if self.max_cycles == 0 {
            anyhow::bail!("max_cycles must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            anyhow::bail!("command_timeout_secs must be at least 1");
        }
        if self.install_timeout_secs == 0 {
            anyhow::bail!("install_timeout_secs must be at least 1");
        }
        if self.transient_attempts == 0 {
            anyhow::bail!("transient_attempts must be at least 1");
        }
        Ok(())
    }

    /// Apply overrides and re-validate.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> anyhow::Result<Self> {
        if let Some(path) = overrides.adb_path {
            self.adb_path = path;
        }
        if let Some(cycles) = overrides.max_cycles {
            self.max_cycles = cycles;
        }
        if let Some(secs) = overrides.command_timeout_secs {
            self.command_timeout_secs = secs;
        }
        if let Some(secs) = overrides.install_timeout_secs {
            self.install_timeout_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    /// Build the subprocess bridge these settings describe.
    pub fn bridge(&self, cancel: CancellationToken) -> Result<AdbBridge, BridgeError> {
        Ok(AdbBridge::new(&self.adb_path)?
            .with_command_timeout(self.command_timeout())
            .with_install_timeout(self.install_timeout())
            .with_transient_attempts(self.transient_attempts)
            .with_cancellation(cancel))
    }
}
