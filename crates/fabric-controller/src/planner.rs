//! Installation planning: one [`InstallPlan`] per intent, in input order.

use crate::composer::{InstallStep, RuleComposer};
use crate::error::CompositionError;
use crate::intent::{ForwardingIntent, IntentKind, IntentSpec};
use fabric_types::DeviceId;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// The ordered, device-targeted entries realising one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Position of the intent in the planner's input.
    pub index: usize,
    pub kind: IntentKind,
    /// Human-readable summary of the intent.
    pub label: String,
    pub steps: Vec<InstallStep>,
}

impl InstallPlan {
    /// Distinct target devices in first-use order.
    pub fn devices(&self) -> Vec<&DeviceId> {
        let mut devices: Vec<&DeviceId> = Vec::new();
        for step in &self.steps {
            if !devices.contains(&&step.device) {
                devices.push(&step.device);
            }
        }
        devices
    }
}

/// Concatenates the steps of `plans` into the global installation order.
pub fn installation_order(plans: &[InstallPlan]) -> impl Iterator<Item = &InstallStep> {
    plans.iter().flat_map(|p| p.steps.iter())
}

/// Turns intents into install plans.
///
/// Plans are never merged or reordered. Two intents writing the same table
/// key on one device both keep their entries, so the later one wins when
/// installed. Tunnel ids are the exception: a tunnel id already used on a
/// device by an earlier tunnel is rejected.
pub struct InstallationPlanner<'a> {
    composer: RuleComposer<'a>,
}

#[derive(Default)]
struct TunnelIds {
    by_device: HashMap<DeviceId, HashSet<u16>>,
}

impl TunnelIds {
    fn check(&self, intent: &ForwardingIntent) -> Result<(), CompositionError> {
        let ForwardingIntent::Tunnel(t) = intent else {
            return Ok(());
        };
        for device in intent.devices() {
            if self
                .by_device
                .get(device)
                .is_some_and(|ids| ids.contains(&t.tunnel_id))
            {
                return Err(CompositionError::DuplicateTunnelId {
                    tunnel_id: t.tunnel_id,
                    device: device.clone(),
                });
            }
        }
        Ok(())
    }

    fn record(&mut self, intent: &ForwardingIntent) {
        if let ForwardingIntent::Tunnel(t) = intent {
            for device in intent.devices() {
                self.by_device
                    .entry(device.clone())
                    .or_default()
                    .insert(t.tunnel_id);
            }
        }
    }
}

impl<'a> InstallationPlanner<'a> {
    pub fn new(composer: RuleComposer<'a>) -> Self {
        Self { composer }
    }

    /// Plans every intent. The result has one element per intent, in the
    /// same order.
    pub fn plan(&self, intents: &[ForwardingIntent]) -> Vec<Result<InstallPlan, CompositionError>> {
        let mut tunnel_ids = TunnelIds::default();
        intents
            .iter()
            .enumerate()
            .map(|(index, intent)| self.plan_one(index, intent, &mut tunnel_ids))
            .collect()
    }

    /// Validates and plans configuration intents. Specs that fail
    /// validation yield an error in their slot.
    pub fn plan_specs(&self, specs: &[IntentSpec]) -> Vec<Result<InstallPlan, CompositionError>> {
        let mut tunnel_ids = TunnelIds::default();
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let intent = spec.to_intent().inspect_err(|e| {
                    warn!(index, kind = %spec.kind, error = %e, "Invalid intent");
                })?;
                self.plan_one(index, &intent, &mut tunnel_ids)
            })
            .collect()
    }

    fn plan_one(
        &self,
        index: usize,
        intent: &ForwardingIntent,
        tunnel_ids: &mut TunnelIds,
    ) -> Result<InstallPlan, CompositionError> {
        let plan = tunnel_ids
            .check(intent)
            .and_then(|()| self.composer.compose(intent))
            .map(|steps| InstallPlan {
                index,
                kind: intent.kind(),
                label: intent.to_string(),
                steps,
            });

        match &plan {
            Ok(plan) => {
                tunnel_ids.record(intent);
                debug!(index, intent = %plan.label, steps = plan.steps.len(), "Planned intent");
            }
            Err(e) => warn!(index, intent = %intent, error = %e, "Cannot compose intent"),
        }
        plan
    }
}
