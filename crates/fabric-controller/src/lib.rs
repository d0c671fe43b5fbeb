//! P4Runtime fabric controller.
//!
//! Turns forwarding intents into P4 table entries, installs them on a set
//! of switches and then watches the result:
//!
//! - [`composer`]: one intent to an ordered list of device-targeted entries
//! - [`planner`]: one install plan per intent, in input order
//! - [`sync`]: writes plans through device sessions, one plan at a time
//! - [`observe`]: periodic table dumps and tunnel counter reads
//! - [`daemon`]: the end-to-end run used by `fabricctl`

pub mod composer;
pub mod config;
pub mod daemon;
pub mod error;
pub mod intent;
pub mod observe;
pub mod planner;
pub mod render;
pub mod sync;
pub mod tables;

#[cfg(test)]
mod testutil;

pub use composer::{InstallStep, RuleComposer};
pub use config::{ControllerConfig, CounterTarget, Device, ObserveConfig, PortRoles, Topology};
pub use daemon::{simulated_sessions, FabricController, IntentFailure, ObservationOutcome, RunReport};
pub use error::{CompositionError, ConfigError, ObservationError, SyncError};
pub use intent::{
    DirectionClassifyIntent, EcmpGroupIntent, EcmpNextHopIntent, ForwardingIntent, IntentKind,
    IntentSpec, PlainForwardIntent, PortRewriteIntent, SwitchTraceIntent, TrafficDirection,
    TunnelIntent,
};
pub use observe::{tunnel_counters, CounterProbe, CounterSample, ObservationLoop, ObservationSummary};
pub use planner::{installation_order, InstallPlan, InstallationPlanner};
pub use render::{LogSink, ObservationSink, TextSink};
pub use sync::{close_all, DeviceSynchronizer, PlanResult, PlanStatus, SessionMap, SyncMode, SyncReport};
