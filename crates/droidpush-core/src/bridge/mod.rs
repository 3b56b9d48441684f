//! Device bridge operations.
//!
//! [`BridgeClient`] is the contract the reconciler and orchestrator consume;
//! every method maps to exactly one bridge invocation. [`AdbBridge`] is the
//! subprocess-backed implementation. It is stateless apart from its settings
//! and spawns a fresh process per call, so one instance can be shared across
//! devices.

mod adb;
mod parse;
mod runner;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::device::{ConnectionState, DeviceAddress};
use crate::error::BridgeError;

pub use adb::{AdbBridge, DEFAULT_COMMAND_TIMEOUT, DEFAULT_INSTALL_TIMEOUT};
pub use parse::{is_unknown_package, parse_device_list, parse_package_list};
pub use runner::{CommandRunner, RunError, TokioCommandRunner};

/// Captured result of one bridge invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl BridgeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `": <text>"` built from stderr, falling back to stdout; empty when both are blank.
    pub fn diagnostic_suffix(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if text.is_empty() {
            String::new()
        } else {
            format!(": {text}")
        }
    }
}

/// One line of the `devices` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub address: String,
    pub state_token: String,
}

impl DeviceEntry {
    pub fn new(address: impl Into<String>, state_token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state_token: state_token.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_token(&self.state_token)
    }
}

/// Discrete bridge operations.
///
/// Implementations apply no retry policy beyond the transient-call budget
/// described on [`AdbBridge`].
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// List attached devices as `(address, state token)` pairs.
    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, BridgeError>;

    async fn connect(&self, address: &DeviceAddress) -> Result<BridgeOutput, BridgeError>;

    /// Disconnect one device, or every device when `address` is `None`.
    async fn disconnect(&self, address: Option<&DeviceAddress>)
    -> Result<BridgeOutput, BridgeError>;

    async fn kill_server(&self) -> Result<BridgeOutput, BridgeError>;

    async fn start_server(&self) -> Result<BridgeOutput, BridgeError>;

    async fn install(
        &self,
        apk_path: &Path,
        device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError>;

    /// Remove a package. Returns `false` when the bridge reports the package
    /// as unknown, which is not an error.
    async fn uninstall(
        &self,
        package_id: &str,
        device: Option<&DeviceAddress>,
    ) -> Result<bool, BridgeError>;

    async fn run_shell(
        &self,
        args: &[String],
        device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError>;

    /// Kill then start the bridge server.
    async fn restart_server(&self) -> Result<(), BridgeError> {
        self.kill_server().await?;
        self.start_server().await?;
        Ok(())
    }

    /// Installed package ids matching `filter`, via `pm list packages`.
    async fn list_packages(
        &self,
        filter: &str,
        device: Option<&DeviceAddress>,
    ) -> Result<Vec<String>, BridgeError> {
        let args = ["pm", "list", "packages", filter].map(str::to_string);
        let output = self.run_shell(&args, device).await?;
        Ok(parse_package_list(&output.stdout))
    }
}
