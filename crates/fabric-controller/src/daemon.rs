//! End-to-end controller run: plan, install, then observe.

use crate::composer::RuleComposer;
use crate::config::{ControllerConfig, Topology};
use crate::error::{CompositionError, ConfigError, ObservationError};
use crate::observe::{tunnel_counters, CounterProbe, ObservationLoop};
use crate::planner::{InstallPlan, InstallationPlanner};
use crate::render::ObservationSink;
use crate::sync::{close_all, DeviceSynchronizer, SessionMap, SyncReport};
use fabric_p4rt::{DeviceSession, MemorySession, P4InfoResolver, RecordingSession};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// An intent that never reached the devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentFailure {
    pub index: usize,
    pub kind: String,
    pub error: CompositionError,
}

/// How the observation stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationOutcome {
    Completed { cycles: u64 },
    /// Cancelled before observation started.
    Cancelled,
    /// A session became unusable during installation.
    Aborted,
    Failed(ObservationError),
}

/// Per-stage results of [`FabricController::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub composition: Vec<IntentFailure>,
    pub sync: SyncReport,
    pub observation: ObservationOutcome,
}

impl RunReport {
    /// Returns true if every intent composed, installed and observation
    /// ended without error.
    pub fn is_success(&self) -> bool {
        self.composition.is_empty()
            && self.sync.all_installed()
            && matches!(
                self.observation,
                ObservationOutcome::Completed { .. } | ObservationOutcome::Cancelled
            )
    }
}

/// Wires the planner, synchronizer and observation loop to one
/// configuration.
pub struct FabricController {
    config: ControllerConfig,
    topology: Topology,
    schema: P4InfoResolver,
    max_cycles: Option<u64>,
}

impl FabricController {
    pub fn new(config: ControllerConfig, schema: P4InfoResolver) -> Result<Self, ConfigError> {
        config.validate()?;
        let topology = config.topology()?;
        Ok(Self {
            config,
            topology,
            schema,
            max_cycles: None,
        })
    }

    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn schema(&self) -> &P4InfoResolver {
        &self.schema
    }

    /// Composes every configured intent without touching any device.
    pub fn plan(&self) -> Vec<Result<InstallPlan, CompositionError>> {
        let composer = RuleComposer::new(&self.schema, &self.topology);
        InstallationPlanner::new(composer).plan_specs(&self.config.intents)
    }

    /// Installs every valid intent, then observes until `cancel` fires or
    /// the cycle limit is reached. Every session is closed on return.
    pub async fn run(
        &self,
        sessions: &SessionMap,
        sink: &mut dyn ObservationSink,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut plans = Vec::new();
        let mut composition = Vec::new();
        for (index, result) in self.plan().into_iter().enumerate() {
            match result {
                Ok(plan) => plans.push(plan),
                Err(error) => composition.push(IntentFailure {
                    index,
                    kind: self.config.intents[index].kind.clone(),
                    error,
                }),
            }
        }
        info!(
            planned = plans.len(),
            rejected = composition.len(),
            "Composition finished"
        );

        let sync = DeviceSynchronizer::new(self.config.sync.mode)
            .synchronize(&plans, sessions)
            .await;

        let observation = if cancel.is_cancelled() {
            info!("Cancelled, skipping observation");
            close_all(sessions).await;
            ObservationOutcome::Cancelled
        } else if sync.has_fatal_failure() {
            warn!("A session was lost during installation, skipping observation");
            close_all(sessions).await;
            ObservationOutcome::Aborted
        } else {
            let mut observer = ObservationLoop::new(&self.schema, sessions)
                .with_interval(self.config.observe.interval())
                .with_table_dump(self.config.observe.dump_tables)
                .with_probes(self.probes(&plans));
            if let Some(cycles) = self.max_cycles {
                observer = observer.with_max_cycles(cycles);
            }
            match observer.run(sink, cancel).await {
                Ok(summary) => ObservationOutcome::Completed {
                    cycles: summary.cycles,
                },
                Err(e) => ObservationOutcome::Failed(e),
            }
        };

        RunReport {
            composition,
            sync,
            observation,
        }
    }

    /// Tunnel counters of the composed tunnel intents, then the configured
    /// counters.
    fn probes(&self, plans: &[InstallPlan]) -> Vec<CounterProbe> {
        let mut probes = Vec::new();
        if self.config.observe.tunnel_counters {
            let intents: Vec<_> = plans
                .iter()
                .filter_map(|p| self.config.intents[p.index].to_intent().ok())
                .collect();
            probes.extend(tunnel_counters(&intents));
        }
        probes.extend(self.config.observe.counters.iter().map(CounterProbe::from));
        probes
    }
}

/// One in-process session per device, recording requests where the
/// device has a dump file configured.
pub fn simulated_sessions(topology: &Topology) -> SessionMap {
    topology
        .devices()
        .map(|device| {
            let memory = MemorySession::new(device.name.clone());
            let session: Arc<dyn DeviceSession> = match &device.proto_dump {
                Some(path) => Arc::new(RecordingSession::new(memory, path.clone())),
                None => Arc::new(memory),
            };
            (device.name.clone(), session)
        })
        .collect()
}
