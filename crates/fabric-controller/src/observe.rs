//! The observation loop: periodic table dumps and counter reads.
//!
//! Each cycle reads every device's tables, then every requested counter,
//! hands the results to an [`ObservationSink`], and sleeps for the
//! configured interval. Nothing is cached between cycles. The loop stops
//! when its cancellation token fires (checked between cycles), after an
//! optional cycle limit, or when a session becomes unusable. Every session
//! is closed before [`ObservationLoop::run`] returns.

use crate::config::CounterTarget;
use crate::error::ObservationError;
use crate::intent::ForwardingIntent;
use crate::render::ObservationSink;
use crate::sync::{close_all, SessionMap};
use crate::tables::{EGRESS_TUNNEL_COUNTER, INGRESS_TUNNEL_COUNTER};
use fabric_p4rt::{ChannelError, SchemaResolver};
use fabric_types::DeviceId;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One counter cell as observed in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub device: DeviceId,
    pub counter: String,
    pub index: u64,
    pub packets: u64,
    pub bytes: u64,
}

impl fmt::Display for CounterSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {} packets ({} bytes)",
            self.device, self.counter, self.index, self.packets, self.bytes
        )
    }
}

/// A counter to read every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterProbe {
    pub device: DeviceId,
    pub counter: String,
    /// `None` reads every cell.
    pub index: Option<u64>,
    /// Groups related samples in the output, e.g. `s1 -> s2`.
    pub label: Option<String>,
}

impl From<&CounterTarget> for CounterProbe {
    fn from(target: &CounterTarget) -> Self {
        Self {
            device: target.device.clone(),
            counter: target.counter.clone(),
            index: target.index,
            label: target.label.clone(),
        }
    }
}

/// The ingress and egress tunnel counters of every tunnel intent.
pub fn tunnel_counters(intents: &[ForwardingIntent]) -> Vec<CounterProbe> {
    intents
        .iter()
        .filter_map(|intent| match intent {
            ForwardingIntent::Tunnel(t) => Some(t),
            _ => None,
        })
        .flat_map(|t| {
            let label = format!("{} -> {}", t.ingress, t.egress);
            let index = Some(u64::from(t.tunnel_id));
            [
                CounterProbe {
                    device: t.ingress.clone(),
                    counter: INGRESS_TUNNEL_COUNTER.to_string(),
                    index,
                    label: Some(label.clone()),
                },
                CounterProbe {
                    device: t.egress.clone(),
                    counter: EGRESS_TUNNEL_COUNTER.to_string(),
                    index,
                    label: Some(label),
                },
            ]
        })
        .collect()
}

/// How an observation run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationSummary {
    pub cycles: u64,
}

pub struct ObservationLoop<'a> {
    schema: &'a dyn SchemaResolver,
    sessions: &'a SessionMap,
    probes: Vec<CounterProbe>,
    interval: Duration,
    dump_tables: bool,
    max_cycles: Option<u64>,
}

impl<'a> ObservationLoop<'a> {
    pub fn new(schema: &'a dyn SchemaResolver, sessions: &'a SessionMap) -> Self {
        Self {
            schema,
            sessions,
            probes: Vec::new(),
            interval: Duration::from_secs(2),
            dump_tables: true,
            max_cycles: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probes(mut self, probes: impl IntoIterator<Item = CounterProbe>) -> Self {
        self.probes.extend(probes);
        self
    }

    pub fn with_table_dump(mut self, enabled: bool) -> Self {
        self.dump_tables = enabled;
        self
    }

    /// Stops after `cycles` cycles even if never cancelled.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Runs until cancelled, then closes every session.
    ///
    /// # Errors
    ///
    /// - `Schema` if a probe names a counter the pipeline does not declare
    /// - `SessionLost` if a read fails with a fatal channel error
    pub async fn run(
        &self,
        sink: &mut dyn ObservationSink,
        cancel: &CancellationToken,
    ) -> Result<ObservationSummary, ObservationError> {
        let result = match self.resolve_probes() {
            Ok(probes) => self.poll(&probes, sink, cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(error = %e, "Observation stopped");
        }
        close_all(self.sessions).await;
        result
    }

    fn resolve_probes(&self) -> Result<Vec<(&CounterProbe, u32)>, ObservationError> {
        self.probes
            .iter()
            .map(|probe| -> Result<_, ObservationError> {
                Ok((probe, self.schema.counter(&probe.counter)?.id()))
            })
            .collect()
    }

    async fn poll(
        &self,
        probes: &[(&CounterProbe, u32)],
        sink: &mut dyn ObservationSink,
        cancel: &CancellationToken,
    ) -> Result<ObservationSummary, ObservationError> {
        info!(
            devices = self.sessions.len(),
            counters = probes.len(),
            interval = ?self.interval,
            "Starting observation"
        );

        let mut cycles = 0;
        while !cancel.is_cancelled() {
            cycles += 1;
            sink.cycle_started(cycles);
            if self.dump_tables {
                self.read_tables(sink).await?;
            }
            self.read_counters(probes, sink).await?;
            sink.cycle_finished(cycles);

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(cycles, "Observation finished");
        Ok(ObservationSummary { cycles })
    }

    async fn read_tables(&self, sink: &mut dyn ObservationSink) -> Result<(), ObservationError> {
        for (device, session) in self.sessions {
            let entries = match session.read_table_entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    report(device, e, sink)?;
                    continue;
                }
            };

            let mut decoded = Vec::with_capacity(entries.len());
            for entry in &entries {
                match self.schema.decode_entry(entry) {
                    Ok(d) => decoded.push(d),
                    Err(e) => sink.read_failed(device, &ObservationError::Schema(e)),
                }
            }
            debug!(device = %device, entries = decoded.len(), "Read table entries");
            sink.table_dump(device, &decoded);
        }
        Ok(())
    }

    async fn read_counters(
        &self,
        probes: &[(&CounterProbe, u32)],
        sink: &mut dyn ObservationSink,
    ) -> Result<(), ObservationError> {
        for (probe, counter_id) in probes {
            let Some(session) = self.sessions.get(&probe.device) else {
                sink.read_failed(
                    &probe.device,
                    &ObservationError::NoSession(probe.device.clone()),
                );
                continue;
            };

            match session.read_counter(*counter_id, probe.index).await {
                Ok(cells) => {
                    for cell in cells {
                        let sample = CounterSample {
                            device: probe.device.clone(),
                            counter: probe.counter.clone(),
                            index: cell.index,
                            packets: cell.data.packets,
                            bytes: cell.data.bytes,
                        };
                        sink.counter_sample(probe.label.as_deref(), &sample);
                    }
                }
                Err(e) => report(&probe.device, e, sink)?,
            }
        }
        Ok(())
    }
}

/// Passes a recoverable read error to the sink; a fatal one ends the loop.
fn report(
    device: &DeviceId,
    err: ChannelError,
    sink: &mut dyn ObservationSink,
) -> Result<(), ObservationError> {
    if err.is_fatal() {
        return Err(ObservationError::SessionLost(err));
    }
    sink.read_failed(device, &ObservationError::Channel(err));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::TunnelIntent;
    use crate::testutil::{device, schema};
    use fabric_p4rt::{CounterData, DecodedEntry, DeviceSession, MemorySession, StatusCode};
    use fabric_types::Ipv4Address;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        cycles: Vec<u64>,
        tables: Vec<(String, usize)>,
        samples: Vec<String>,
        errors: Vec<String>,
    }

    impl ObservationSink for Recorder {
        fn cycle_started(&mut self, cycle: u64) {
            self.cycles.push(cycle);
        }

        fn table_dump(&mut self, device: &DeviceId, entries: &[DecodedEntry]) {
            self.tables.push((device.to_string(), entries.len()));
        }

        fn counter_sample(&mut self, label: Option<&str>, sample: &CounterSample) {
            self.samples
                .push(format!("[{}] {sample}", label.unwrap_or("-")));
        }

        fn read_failed(&mut self, device: &DeviceId, error: &ObservationError) {
            self.errors.push(format!("{device}: {error}"));
        }
    }

    fn sessions(names: &[&str]) -> (SessionMap, BTreeMap<DeviceId, Arc<MemorySession>>) {
        let mut map = SessionMap::new();
        let mut fakes = BTreeMap::new();
        for name in names {
            let session = Arc::new(MemorySession::new(device(name)));
            map.insert(device(name), session.clone() as Arc<dyn DeviceSession>);
            fakes.insert(device(name), session);
        }
        (map, fakes)
    }

    fn s1_to_s2() -> ForwardingIntent {
        ForwardingIntent::Tunnel(TunnelIntent {
            ingress: device("s1"),
            egress: device("s2"),
            tunnel_id: 100,
            dst_ip: Ipv4Address::new(10, 0, 2, 2),
            dst_mac: "08:00:00:00:02:22".parse().unwrap(),
            transit_port: None,
        })
    }

    #[test]
    fn test_counter_sample_display() {
        let sample = CounterSample {
            device: device("s1"),
            counter: INGRESS_TUNNEL_COUNTER.into(),
            index: 100,
            packets: 5,
            bytes: 490,
        };
        assert_eq!(
            sample.to_string(),
            "s1 MyIngress.ingressTunnelCounter 100: 5 packets (490 bytes)"
        );
    }

    #[test]
    fn test_tunnel_counters() {
        let probes = tunnel_counters(&[s1_to_s2()]);
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].device, device("s1"));
        assert_eq!(probes[0].counter, INGRESS_TUNNEL_COUNTER);
        assert_eq!(probes[1].device, device("s2"));
        assert_eq!(probes[1].counter, EGRESS_TUNNEL_COUNTER);
        assert!(probes.iter().all(|p| p.index == Some(100)));
        assert!(probes.iter().all(|p| p.label.as_deref() == Some("s1 -> s2")));
    }

    #[tokio::test]
    async fn test_cycles_read_tables_and_counters() {
        let schema = schema();
        let (map, fakes) = sessions(&["s1", "s2"]);
        fakes[&device("s1")].set_counter(309010261, 100, CounterData { packets: 3, bytes: 294 });

        let mut sink = Recorder::default();
        let summary = ObservationLoop::new(&schema, &map)
            .with_interval(Duration::from_millis(1))
            .with_probes(tunnel_counters(&[s1_to_s2()]))
            .with_max_cycles(2)
            .run(&mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.cycles, 2);
        assert_eq!(sink.cycles, vec![1, 2]);
        assert_eq!(sink.tables.len(), 4);
        assert_eq!(
            sink.samples[..2],
            [
                "[s1 -> s2] s1 MyIngress.ingressTunnelCounter 100: 3 packets (294 bytes)".to_string(),
                "[s1 -> s2] s2 MyIngress.egressTunnelCounter 100: 0 packets (0 bytes)".to_string(),
            ]
        );
        assert!(sink.errors.is_empty());
        assert!(fakes.values().all(|s| s.is_closed()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let schema = schema();
        let (map, fakes) = sessions(&["s1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut sink = Recorder::default();
        let summary = ObservationLoop::new(&schema, &map)
            .run(&mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.cycles, 0);
        assert!(fakes[&device("s1")].is_closed());
    }

    #[tokio::test]
    async fn test_recoverable_errors_are_reported_and_loop_continues() {
        let schema = schema();
        let (map, fakes) = sessions(&["s1"]);
        fakes[&device("s1")].fail_reads(ChannelError::rejected(
            &device("s1"),
            StatusCode::PermissionDenied,
            "not primary",
        ));

        let mut sink = Recorder::default();
        let summary = ObservationLoop::new(&schema, &map)
            .with_interval(Duration::from_millis(1))
            .with_probes(tunnel_counters(&[s1_to_s2()]))
            .with_max_cycles(3)
            .run(&mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.cycles, 3);
        // Per cycle: table read on s1, counter read on s1, no session for s2.
        assert_eq!(sink.errors.len(), 9);
        assert!(sink.errors.iter().any(|e| e == "s2: no session for device s2"));
    }

    #[tokio::test]
    async fn test_fatal_error_tears_down_sessions() {
        let schema = schema();
        let (map, fakes) = sessions(&["s1", "s2"]);
        fakes[&device("s2")].fail_reads(ChannelError::transport(&device("s2"), "broken pipe"));

        let mut sink = Recorder::default();
        let err = ObservationLoop::new(&schema, &map)
            .run(&mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ObservationError::SessionLost(_)));
        assert!(fakes.values().all(|s| s.is_closed()));
    }

    #[tokio::test]
    async fn test_unknown_counter() {
        let schema = schema();
        let (map, _fakes) = sessions(&["s1"]);
        let probe = CounterProbe {
            device: device("s1"),
            counter: "MyIngress.nope".into(),
            index: None,
            label: None,
        };

        let mut sink = Recorder::default();
        let err = ObservationLoop::new(&schema, &map)
            .with_probes([probe])
            .run(&mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ObservationError::Schema(_)));
        assert!(sink.cycles.is_empty());
    }
}
