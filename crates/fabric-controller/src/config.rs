//! Controller configuration.
//!
//! One YAML file describes the devices, their port roles, the intents to
//! install and how to observe the result. The P4Info path is relative to
//! the configuration file unless absolute.

use crate::error::ConfigError;
use crate::intent::IntentSpec;
use crate::sync::SyncMode;
use fabric_types::{DeviceId, PortNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Which ports of a device face hosts and which face other switches.
///
/// These are deployment constants, never discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRoles {
    /// Port towards the locally attached host.
    pub host: PortNumber,

    /// Port towards each neighbouring switch.
    #[serde(default)]
    pub peers: BTreeMap<DeviceId, PortNumber>,
}

impl PortRoles {
    pub fn peer(&self, device: &DeviceId) -> Option<PortNumber> {
        self.peers.get(device).copied()
    }
}

/// A switch under control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: DeviceId,

    /// P4Runtime server address, `host:port`.
    pub address: String,

    /// P4Runtime numeric device id.
    #[serde(default)]
    pub device_id: u64,

    pub ports: PortRoles,

    /// File receiving a copy of every request sent to this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto_dump: Option<PathBuf>,
}

/// The set of devices, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    devices: BTreeMap<DeviceId, Device>,
}

impl Topology {
    /// Builds a topology, rejecting duplicate names and peer entries that
    /// point at undeclared devices.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for device in devices {
            if map.contains_key(&device.name) {
                return Err(ConfigError::DuplicateDevice(device.name));
            }
            map.insert(device.name.clone(), device);
        }

        for device in map.values() {
            if let Some(peer) = device.ports.peers.keys().find(|p| !map.contains_key(*p)) {
                return Err(ConfigError::unknown_device(
                    format!("ports.peers of {}", device.name),
                    peer,
                ));
            }
        }
        Ok(Self { devices: map })
    }

    pub fn device(&self, name: &DeviceId) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &DeviceId) -> bool {
        self.devices.contains_key(name)
    }

    /// Devices in name order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// An explicitly requested counter read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTarget {
    pub device: DeviceId,
    pub counter: String,
    /// Cell to read; every cell when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Observation loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveConfig {
    /// Pause between poll cycles in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Read each device's tables every cycle.
    #[serde(default = "default_dump_tables")]
    pub dump_tables: bool,

    /// Poll the ingress/egress counters of every tunnel intent.
    #[serde(default = "default_tunnel_counters")]
    pub tunnel_counters: bool,

    #[serde(default)]
    pub counters: Vec<CounterTarget>,
}

impl ObserveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            dump_tables: default_dump_tables(),
            tunnel_counters: default_tunnel_counters(),
            counters: Vec::new(),
        }
    }
}

/// Installation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SyncMode,
}

/// Complete controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// JSON P4Info of the pipeline running on every device.
    #[serde(default = "default_p4info")]
    pub p4info: PathBuf,

    pub devices: Vec<Device>,

    #[serde(default)]
    pub intents: Vec<IntentSpec>,

    #[serde(default)]
    pub observe: ObserveConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_p4info() -> PathBuf {
    PathBuf::from("build/pipeline.p4info.json")
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_dump_tables() -> bool {
    true
}

fn default_tunnel_counters() -> bool {
    true
}

impl ControllerConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        if config.p4info.is_relative() {
            if let Some(dir) = path.parent() {
                config.p4info = dir.join(&config.p4info);
            }
        }
        debug!(path = %path.display(), devices = config.devices.len(), intents = config.intents.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that does not need the pipeline schema.
    ///
    /// Intents are validated later, one by one, so that a bad intent does
    /// not prevent the others from being installed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::invalid("devices", "at least one device is required"));
        }
        if self.observe.interval_ms == 0 {
            return Err(ConfigError::invalid(
                "observe.interval_ms",
                "must be greater than zero",
            ));
        }

        let topology = self.topology()?;
        for (i, target) in self.observe.counters.iter().enumerate() {
            if !topology.contains(&target.device) {
                return Err(ConfigError::unknown_device(
                    format!("observe.counters[{i}]"),
                    &target.device,
                ));
            }
            if target.counter.is_empty() {
                return Err(ConfigError::invalid(
                    format!("observe.counters[{i}].counter"),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    pub fn topology(&self) -> Result<Topology, ConfigError> {
        Topology::new(self.devices.iter().cloned())
    }
}
