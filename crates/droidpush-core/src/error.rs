//! Error taxonomy shared by the bridge, reconciler and install orchestrator.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::BridgeOutput;
use crate::device::ConnectionState;
use crate::install::{InstallPhase, InstallTransaction};

/// Coarse failure classification, one process exit code per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidAddress,
    InvalidApk,
    BridgeUnavailable,
    ConnectionTimeout,
    Unauthorized,
    AmbiguousDevice,
    UninstallError,
    InstallError,
    VerificationMismatch,
    UnknownState,
    BridgeCommand,
    Cancelled,
}

impl FailureKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidAddress => 10,
            Self::InvalidApk => 11,
            Self::BridgeUnavailable => 12,
            Self::ConnectionTimeout => 13,
            Self::Unauthorized => 14,
            Self::AmbiguousDevice => 15,
            Self::UninstallError => 16,
            Self::InstallError => 17,
            Self::VerificationMismatch => 18,
            Self::UnknownState => 19,
            Self::BridgeCommand => 20,
            Self::Cancelled => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidAddress => "invalid-address",
            Self::InvalidApk => "invalid-apk",
            Self::BridgeUnavailable => "bridge-unavailable",
            Self::ConnectionTimeout => "connection-timeout",
            Self::Unauthorized => "unauthorized",
            Self::AmbiguousDevice => "ambiguous-device",
            Self::UninstallError => "uninstall-error",
            Self::InstallError => "install-error",
            Self::VerificationMismatch => "verification-mismatch",
            Self::UnknownState => "unknown-state",
            Self::BridgeCommand => "bridge-command",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected device address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid device address '{0}': expected ddd.ddd.ddd.ddd[:port]")]
    Malformed(String),

    #[error("invalid device address '{address}': octet '{octet}' is out of range")]
    OctetOutOfRange { address: String, octet: String },

    #[error("invalid device address '{address}': port must be between 1 and 65535")]
    InvalidPort { address: String },
}

/// Failure of a single bridge operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The executable is missing or cannot be run at all.
    #[error("bridge executable '{}' is unavailable: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },

    #[error("`{command}` exited with status {}{}", .output.exit_code, .output.diagnostic_suffix())]
    CommandFailed {
        command: String,
        output: BridgeOutput,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs_f32())]
    TimedOut { command: String, timeout: Duration },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    #[error("failed to collect output of `{command}`")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl BridgeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } => FailureKind::BridgeUnavailable,
            Self::CommandFailed { .. } | Self::Io { .. } => FailureKind::BridgeCommand,
            Self::TimedOut { .. } => FailureKind::ConnectionTimeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Failures that another attempt of the same command may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::TimedOut { .. } | Self::Io { .. }
        )
    }

    pub fn output(&self) -> Option<&BridgeOutput> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Reconciliation could not bring the device to `Connected`.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("device {address} is unauthorized; accept the debugging prompt on the device")]
    Unauthorized { address: String },

    #[error("device {address} reported unrecognized state '{token}'")]
    UnknownState { address: String, token: String },

    #[error("device {address} matched {} bridge entries: {}", .matches.len(), .matches.join(", "))]
    AmbiguousDevice {
        address: String,
        matches: Vec<String>,
    },

    #[error("device {address} not connected after {cycles} cycle(s); last state: {last_state}")]
    ConnectionTimeout {
        address: String,
        cycles: u32,
        last_state: ConnectionState,
    },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ReconcileError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::UnknownState { .. } => FailureKind::UnknownState,
            Self::AmbiguousDevice { .. } => FailureKind::AmbiguousDevice,
            Self::ConnectionTimeout { .. } => FailureKind::ConnectionTimeout,
            Self::Bridge(err) => err.kind(),
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Bridge(BridgeError::Cancelled { .. }))
    }
}

/// Why an install transaction stopped.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("apk '{}' is not a readable file: {reason}", .path.display())]
    InvalidApk { path: PathBuf, reason: String },

    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(ReconcileError),

    #[error("uninstall of previous version failed: {0}")]
    UninstallError(BridgeError),

    #[error("install failed: {0}")]
    InstallError(BridgeError),

    #[error("could not query installed packages: {0}")]
    VerificationQuery(BridgeError),

    #[error("package '{package_id}' is absent after a reported-successful install")]
    VerificationMismatch { package_id: String },

    #[error("install run was cancelled")]
    Cancelled,
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidApk { .. } => FailureKind::InvalidApk,
            Self::ConnectionUnavailable(err) => err.kind(),
            Self::UninstallError(err) => step_kind(err, FailureKind::UninstallError),
            Self::InstallError(err) => step_kind(err, FailureKind::InstallError),
            Self::VerificationQuery(err) => err.kind(),
            Self::VerificationMismatch { .. } => FailureKind::VerificationMismatch,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Captured process output of the bridge call that failed, if any.
    pub fn output(&self) -> Option<&BridgeOutput> {
        match self {
            Self::ConnectionUnavailable(ReconcileError::Bridge(err))
            | Self::UninstallError(err)
            | Self::InstallError(err)
            | Self::VerificationQuery(err) => err.output(),
            _ => None,
        }
    }

    pub(crate) fn from_connection(err: ReconcileError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::ConnectionUnavailable(err)
        }
    }

    pub(crate) fn from_step(err: BridgeError, wrap: fn(BridgeError) -> Self) -> Self {
        match err {
            BridgeError::Cancelled { .. } => Self::Cancelled,
            other => wrap(other),
        }
    }
}

/// Step failures keep their own kind unless the bridge itself vanished.
fn step_kind(err: &BridgeError, step: FailureKind) -> FailureKind {
    match err {
        BridgeError::Unavailable { .. } => FailureKind::BridgeUnavailable,
        BridgeError::Cancelled { .. } => FailureKind::Cancelled,
        _ => step,
    }
}

/// A failed install, carrying the transaction record as it stood.
#[derive(Debug, Error)]
#[error(
    "install of '{}' on {} failed after phase {}: {reason}",
    .transaction.package_id(),
    .transaction.device().address(),
    .transaction.reached()
)]
pub struct InstallError {
    pub transaction: Box<InstallTransaction>,
    pub reason: FailureReason,
}

impl InstallError {
    pub fn kind(&self) -> FailureKind {
        self.reason.kind()
    }

    /// Last phase the transaction completed before failing.
    pub fn reached(&self) -> InstallPhase {
        self.transaction.reached()
    }
}
