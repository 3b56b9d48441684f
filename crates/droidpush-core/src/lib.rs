//! droidpush core library
//!
//! Installs application packages onto network-attached devices through the
//! `adb` device bridge: reconciles the bridge connection into a known-good
//! state, then runs an uninstall/install/verify transaction.

pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod install;
pub mod reconcile;

/// Re-exports of commonly used types
pub mod prelude {
    // Bridge
    pub use crate::bridge::{AdbBridge, BridgeClient, BridgeOutput, DeviceEntry};

    // Configuration
    pub use crate::config::{ConfigOverrides, ConfigStore, DroidpushConfig};

    // Devices
    pub use crate::device::{ConnectionState, Device, DeviceAddress};

    // Errors
    pub use crate::error::{
        AddressError, BridgeError, FailureKind, FailureReason, InstallError, ReconcileError,
    };

    // Orchestration
    pub use crate::install::{InstallOrchestrator, InstallPhase, InstallTransaction};
    pub use crate::reconcile::{ConnectionReconciler, Escalation, ReconcileReport};
}
