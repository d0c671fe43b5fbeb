//! Device synchronization: pushes install plans through device sessions.
//!
//! Within a plan, steps are written strictly in order and the first failure
//! ends the plan; the remaining steps are never attempted. A failed plan
//! never stops the plans after it. Nothing is rolled back.

use crate::error::SyncError;
use crate::planner::InstallPlan;
use fabric_p4rt::DeviceSession;
use fabric_types::DeviceId;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Open sessions keyed by device.
pub type SessionMap = BTreeMap<DeviceId, Arc<dyn DeviceSession>>;

/// Closes every session, logging failures.
pub async fn close_all(sessions: &SessionMap) {
    for (device, session) in sessions {
        match session.close().await {
            Ok(()) => debug!(device = %device, "Session closed"),
            Err(e) => warn!(device = %device, error = %e, "Failed to close session"),
        }
    }
}

/// How plans are scheduled relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// One plan after another. Later intents overwrite earlier ones on a
    /// shared key.
    #[default]
    Sequential,
    /// All plans at once; steps inside a plan stay ordered. Plans that
    /// share a device interleave, so last-write-wins across intents is not
    /// guaranteed.
    Concurrent,
}

/// Outcome of one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    Installed,
    /// Step `step` (1-based) on `device` failed.
    Failed {
        step: usize,
        device: DeviceId,
        cause: SyncError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanResult {
    /// Index of the intent the plan was built from.
    pub index: usize,
    pub label: String,
    pub status: PlanStatus,
    /// Steps written successfully before the plan finished or failed.
    pub installed: usize,
}

impl PlanResult {
    pub fn is_installed(&self) -> bool {
        self.status == PlanStatus::Installed
    }

    pub fn failed_step(&self) -> Option<usize> {
        match &self.status {
            PlanStatus::Installed => None,
            PlanStatus::Failed { step, .. } => Some(*step),
        }
    }
}

/// Result of a synchronization pass, one entry per plan in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub results: Vec<PlanResult>,
}

impl SyncReport {
    pub fn all_installed(&self) -> bool {
        self.results.iter().all(PlanResult::is_installed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PlanResult> {
        self.results.iter().filter(|r| !r.is_installed())
    }

    /// Total steps written across all plans.
    pub fn installed_steps(&self) -> usize {
        self.results.iter().map(|r| r.installed).sum()
    }

    /// Returns true if any failure left a session unusable.
    pub fn has_fatal_failure(&self) -> bool {
        self.results.iter().any(|r| {
            matches!(&r.status, PlanStatus::Failed { cause, .. } if cause.is_fatal())
        })
    }
}

/// Writes install plans to devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceSynchronizer {
    mode: SyncMode,
}

impl DeviceSynchronizer {
    pub fn new(mode: SyncMode) -> Self {
        Self { mode }
    }

    pub async fn synchronize(&self, plans: &[InstallPlan], sessions: &SessionMap) -> SyncReport {
        info!(plans = plans.len(), mode = ?self.mode, "Installing plans");

        let results = match self.mode {
            SyncMode::Sequential => {
                let mut results = Vec::with_capacity(plans.len());
                for plan in plans {
                    results.push(install_plan(plan, sessions).await);
                }
                results
            }
            SyncMode::Concurrent => join_all(plans.iter().map(|p| install_plan(p, sessions))).await,
        };

        let report = SyncReport { results };
        info!(
            installed = report.results.iter().filter(|r| r.is_installed()).count(),
            failed = report.failures().count(),
            entries = report.installed_steps(),
            "Installation finished"
        );
        report
    }
}

async fn install_plan(plan: &InstallPlan, sessions: &SessionMap) -> PlanResult {
    let mut installed = 0;
    for (i, step) in plan.steps.iter().enumerate() {
        let result = match sessions.get(&step.device) {
            Some(session) => session.write(&step.entry).await.map_err(SyncError::from),
            None => Err(SyncError::NoSession(step.device.clone())),
        };

        match result {
            Ok(()) => {
                installed += 1;
                info!(device = %step.device, table = %step.entry.table, intent = %plan.label, "Installed rule");
            }
            Err(cause) => {
                error!(
                    device = %step.device,
                    intent = %plan.label,
                    step = i + 1,
                    error = %cause,
                    "Install failed, skipping rest of plan"
                );
                return PlanResult {
                    index: plan.index,
                    label: plan.label.clone(),
                    status: PlanStatus::Failed {
                        step: i + 1,
                        device: step.device.clone(),
                        cause,
                    },
                    installed,
                };
            }
        }
    }

    PlanResult {
        index: plan.index,
        label: plan.label.clone(),
        status: PlanStatus::Installed,
        installed,
    }
}
