//! Install orchestration.
//!
//! An [`InstallTransaction`] moves forward through
//! `Pending -> ConnectionVerified -> PreviousUninstalled -> Installed -> Verified`
//! and drops to `Failed` on the first error. Steps are not rolled back: a
//! failed install leaves the previous version removed, and the record says so.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::BridgeClient;
use crate::device::Device;
use crate::error::{FailureKind, FailureReason, InstallError};
use crate::reconcile::ConnectionReconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    Pending,
    ConnectionVerified,
    PreviousUninstalled,
    Installed,
    Verified,
    Failed,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::ConnectionVerified => "connection-verified",
            Self::PreviousUninstalled => "previous-uninstalled",
            Self::Installed => "installed",
            Self::Verified => "verified",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Recorded cause of a failed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl FailureRecord {
    fn from_reason(reason: &FailureReason) -> Self {
        let output = reason.output();
        Self {
            kind: reason.kind(),
            message: reason.to_string(),
            exit_code: output.map(|o| o.exit_code),
            stdout: output.map(|o| o.stdout.clone()),
            stderr: output.map(|o| o.stderr.clone()),
        }
    }
}

/// One install of `apk_path` as `package_id` onto a device.
#[derive(Debug, Clone, Serialize)]
pub struct InstallTransaction {
    package_id: String,
    apk_path: PathBuf,
    device: Device,
    phase: InstallPhase,
    reached: InstallPhase,
    previous_removed: Option<bool>,
    reconcile_cycles: u32,
    failure: Option<FailureRecord>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl InstallTransaction {
    pub fn new(
        package_id: impl Into<String>,
        apk_path: impl Into<PathBuf>,
        device: Device,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            apk_path: apk_path.into(),
            device,
            phase: InstallPhase::Pending,
            reached: InstallPhase::Pending,
            previous_removed: None,
            reconcile_cycles: 0,
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn apk_path(&self) -> &Path {
        &self.apk_path
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn phase(&self) -> InstallPhase {
        self.phase
    }

    /// Last phase completed; equals `phase` unless the transaction failed.
    pub fn reached(&self) -> InstallPhase {
        self.reached
    }

    /// Whether a previous version was removed; `None` before that step ran.
    pub fn previous_removed(&self) -> Option<bool> {
        self.previous_removed
    }

    /// Reconciliation cycles spent across both connection checks.
    pub fn reconcile_cycles(&self) -> u32 {
        self.reconcile_cycles
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn advance(&mut self, next: InstallPhase) {
        debug_assert!(next > self.phase && next != InstallPhase::Failed);
        info!(
            package_id = %self.package_id,
            device = %self.device.address(),
            from = %self.phase,
            to = %next,
            "install phase advanced"
        );
        self.phase = next;
        self.reached = next;
    }

    fn fail(&mut self, reason: &FailureReason) {
        self.phase = InstallPhase::Failed;
        self.failure = Some(FailureRecord::from_reason(reason));
    }
}

/// Sequences uninstall-previous, install-new and verification for one device.
#[derive(Clone)]
pub struct InstallOrchestrator {
    bridge: Arc<dyn BridgeClient>,
    reconciler: ConnectionReconciler,
    cancel: CancellationToken,
}

impl fmt::Debug for InstallOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOrchestrator")
            .field("reconciler", &self.reconciler)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl InstallOrchestrator {
    pub fn new(bridge: Arc<dyn BridgeClient>, reconciler: ConnectionReconciler) -> Self {
        Self {
            bridge,
            reconciler,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between steps once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the whole transaction. On failure the returned error carries the
    /// transaction with `phase = Failed` and the last completed phase.
    pub async fn full_install(
        &self,
        mut transaction: InstallTransaction,
    ) -> Result<InstallTransaction, InstallError> {
        transaction.started_at = Some(Utc::now());
        info!(
            package_id = %transaction.package_id,
            device = %transaction.device.address(),
            apk = %transaction.apk_path.display(),
            "starting install"
        );

        let result = self.run_steps(&mut transaction).await;
        transaction.finished_at = Some(Utc::now());

        match result {
            Ok(()) => {
                info!(
                    package_id = %transaction.package_id,
                    device = %transaction.device.address(),
                    "install verified"
                );
                Ok(transaction)
            }
            Err(reason) => {
                transaction.fail(&reason);
                warn!(
                    package_id = %transaction.package_id,
                    device = %transaction.device.address(),
                    reached = %transaction.reached,
                    kind = %reason.kind(),
                    "install failed"
                );
                Err(InstallError {
                    transaction: Box::new(transaction),
                    reason,
                })
            }
        }
    }

    async fn run_steps(&self, tx: &mut InstallTransaction) -> Result<(), FailureReason> {
        validate_apk(&tx.apk_path).await?;

        self.checkpoint()?;
        let report = self
            .reconciler
            .ensure_connected(&mut tx.device)
            .await
            .map_err(FailureReason::from_connection)?;
        tx.reconcile_cycles += report.cycles;
        tx.advance(InstallPhase::ConnectionVerified);

        self.checkpoint()?;
        let address = tx.device.address().clone();
        let removed = self
            .bridge
            .uninstall(&tx.package_id, Some(&address))
            .await
            .map_err(|err| FailureReason::from_step(err, FailureReason::UninstallError))?;
        if !removed {
            info!(package_id = %tx.package_id, "no previous version installed");
        }
        tx.previous_removed = Some(removed);
        tx.advance(InstallPhase::PreviousUninstalled);

        self.checkpoint()?;
        self.bridge
            .install(&tx.apk_path, Some(&address))
            .await
            .map_err(|err| FailureReason::from_step(err, FailureReason::InstallError))?;
        tx.advance(InstallPhase::Installed);

        // Installing can drop the connection; re-establish before querying.
        self.checkpoint()?;
        let report = self
            .reconciler
            .ensure_connected(&mut tx.device)
            .await
            .map_err(FailureReason::from_connection)?;
        tx.reconcile_cycles += report.cycles;

        let packages = self
            .bridge
            .list_packages(&tx.package_id, Some(&address))
            .await
            .map_err(|err| FailureReason::from_step(err, FailureReason::VerificationQuery))?;
        if !packages.iter().any(|id| id == &tx.package_id) {
            return Err(FailureReason::VerificationMismatch {
                package_id: tx.package_id.clone(),
            });
        }
        tx.advance(InstallPhase::Verified);
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), FailureReason> {
        if self.cancel.is_cancelled() {
            Err(FailureReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The apk must be an existing, readable regular file.
async fn validate_apk(path: &Path) -> Result<(), FailureReason> {
    let invalid = |reason: String| FailureReason::InvalidApk {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| invalid(err.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file".to_string()));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|err| invalid(err.to_string()))?;
    Ok(())
}
