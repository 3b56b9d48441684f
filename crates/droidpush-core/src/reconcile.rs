//! Connection reconciliation.
//!
//! [`ConnectionReconciler::ensure_connected`] drives a device toward
//! `Connected`. Each cycle observes the `devices` listing once; a
//! `Disconnected` observation escalates one rung up the ladder
//! (reconnect, restart server, reset server) before the next cycle. The
//! number of cycles is bounded, and `Unauthorized`/unknown states stop the
//! loop immediately because retrying the bridge cannot fix them.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeClient, BridgeOutput};
use crate::device::{ConnectionState, Device, DeviceAddress};
use crate::error::{BridgeError, ReconcileError};

/// Default bound on reconciliation cycles.
pub const DEFAULT_MAX_CYCLES: u32 = 3;

/// Recovery step taken after a `Disconnected` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Disconnect the device, then connect again.
    Reconnect,
    /// Kill and start the bridge server, then connect.
    RestartServer,
    /// Disconnect everything, restart the server, then connect.
    ResetServer,
}

impl Escalation {
    /// Rung for the `n`-th escalation of a run (1-based).
    fn rung(n: usize) -> Self {
        match n {
            0 | 1 => Self::Reconnect,
            2 => Self::RestartServer,
            _ => Self::ResetServer,
        }
    }
}

/// Summary of a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// `devices` observations made, including the successful one.
    pub cycles: u32,
    pub escalations: Vec<Escalation>,
}

/// Result of matching one `devices` listing against a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    State(ConnectionState),
    /// More than one entry shares the device's host.
    Ambiguous(Vec<String>),
}

impl Observation {
    /// Effective state; an ambiguous identity never counts as connected.
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::State(state) => state.clone(),
            Self::Ambiguous(_) => ConnectionState::Disconnected,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionReconciler {
    bridge: Arc<dyn BridgeClient>,
    max_cycles: u32,
}

impl std::fmt::Debug for ConnectionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReconciler")
            .field("max_cycles", &self.max_cycles)
            .finish_non_exhaustive()
    }
}

impl ConnectionReconciler {
    pub fn new(bridge: Arc<dyn BridgeClient>) -> Self {
        Self {
            bridge,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }

    /// Bound the number of cycles; values below one are raised to one.
    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = max_cycles.max(1);
        self
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Reconcile within the configured cycle bound.
    pub async fn ensure_connected(
        &self,
        device: &mut Device,
    ) -> Result<ReconcileReport, ReconcileError> {
        self.ensure_connected_within(device, self.max_cycles).await
    }

    /// Drive `device` to `Connected` within `max_cycles` observations.
    pub async fn ensure_connected_within(
        &self,
        device: &mut Device,
        max_cycles: u32,
    ) -> Result<ReconcileReport, ReconcileError> {
        let max_cycles = max_cycles.max(1);
        let address = device.address().clone();
        let mut report = ReconcileReport::default();

        tolerate(self.bridge.connect(&address).await, "connect")?;

        let mut last = Observation::State(ConnectionState::Disconnected);
        for cycle in 1..=max_cycles {
            report.cycles = cycle;
            let observation = self.observe(&address).await?;
            let state = observation.state();
            device.record_state(state.clone());
            debug!(%address, cycle, %state, "observed device state");

            match state {
                ConnectionState::Connected => {
                    info!(%address, cycles = cycle, "device connected");
                    return Ok(report);
                }
                ConnectionState::Unauthorized => {
                    return Err(ReconcileError::Unauthorized {
                        address: address.to_string(),
                    });
                }
                ConnectionState::Unknown(token) => {
                    return Err(ReconcileError::UnknownState {
                        address: address.to_string(),
                        token,
                    });
                }
                ConnectionState::Disconnected => {}
            }

            if cycle < max_cycles {
                let step = Escalation::rung(report.escalations.len() + 1);
                warn!(%address, cycle, ?step, "device not connected; escalating");
                self.escalate(step, &address).await?;
                report.escalations.push(step);
            }
            last = observation;
        }

        Err(match last {
            Observation::Ambiguous(matches) => ReconcileError::AmbiguousDevice {
                address: address.to_string(),
                matches,
            },
            Observation::State(last_state) => ReconcileError::ConnectionTimeout {
                address: address.to_string(),
                cycles: max_cycles,
                last_state,
            },
        })
    }

    /// Query `devices` once and match entries by host, ignoring ports.
    pub async fn observe(&self, address: &DeviceAddress) -> Result<Observation, BridgeError> {
        let entries = self.bridge.list_devices().await?;
        let matched: Vec<_> = entries
            .iter()
            .filter(|entry| address.matches(&entry.address))
            .collect();

        Ok(match matched.as_slice() {
            [] => Observation::State(ConnectionState::Disconnected),
            [entry] => {
                let state = entry.state();
                if let ConnectionState::Unknown(token) = &state {
                    warn!(%address, token = %token, "bridge reported an unrecognized device state");
                }
                Observation::State(state)
            }
            many => {
                let matches: Vec<String> = many
                    .iter()
                    .map(|entry| format!("{} {}", entry.address, entry.state_token))
                    .collect();
                warn!(%address, ?matches, "ambiguous device identity; treating as disconnected");
                Observation::Ambiguous(matches)
            }
        })
    }

    async fn escalate(&self, step: Escalation, address: &DeviceAddress) -> Result<(), BridgeError> {
        match step {
            Escalation::Reconnect => {
                tolerate(self.bridge.disconnect(Some(address)).await, "disconnect")?;
            }
            Escalation::RestartServer => {
                self.bridge.restart_server().await?;
            }
            Escalation::ResetServer => {
                tolerate(self.bridge.disconnect(None).await, "disconnect")?;
                self.bridge.restart_server().await?;
            }
        }
        tolerate(self.bridge.connect(address).await, "connect")
    }
}

/// Let a failed best-effort call through unless the bridge is gone or the run was cancelled.
fn tolerate(result: Result<BridgeOutput, BridgeError>, operation: &str) -> Result<(), BridgeError> {
    match result {
        Ok(_) => Ok(()),
        Err(err @ (BridgeError::Unavailable { .. } | BridgeError::Cancelled { .. })) => Err(err),
        Err(err) => {
            warn!(operation, error = %err, "bridge call failed; continuing with observation");
            Ok(())
        }
    }
}
