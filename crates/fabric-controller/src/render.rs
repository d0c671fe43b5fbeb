//! Output collaborators for the observation loop.
//!
//! The loop never formats anything itself; it hands decoded entries,
//! counter samples and read errors to an [`ObservationSink`].

use crate::error::ObservationError;
use crate::observe::CounterSample;
use fabric_p4rt::DecodedEntry;
use fabric_types::DeviceId;
use std::io::Write;
use tracing::{info, warn};

/// Receives everything one observation cycle produces.
pub trait ObservationSink: Send {
    fn cycle_started(&mut self, _cycle: u64) {}

    /// All decodable entries of one device.
    fn table_dump(&mut self, device: &DeviceId, entries: &[DecodedEntry]);

    fn counter_sample(&mut self, label: Option<&str>, sample: &CounterSample);

    /// A read or decode failure that did not stop the loop.
    fn read_failed(&mut self, device: &DeviceId, error: &ObservationError);

    fn cycle_finished(&mut self, _cycle: u64) {}
}

/// Emits observations as structured log events.
#[derive(Debug, Default)]
pub struct LogSink;

impl ObservationSink for LogSink {
    fn table_dump(&mut self, device: &DeviceId, entries: &[DecodedEntry]) {
        info!(device = %device, entries = entries.len(), "Table entries");
        for entry in entries {
            info!(device = %device, "{entry}");
        }
    }

    fn counter_sample(&mut self, label: Option<&str>, sample: &CounterSample) {
        info!(
            device = %sample.device,
            counter = %sample.counter,
            index = sample.index,
            packets = sample.packets,
            bytes = sample.bytes,
            tunnel = label.unwrap_or(""),
            "Counter"
        );
    }

    fn read_failed(&mut self, device: &DeviceId, error: &ObservationError) {
        warn!(device = %device, error = %error, "Read failed");
    }
}

/// Writes observations as plain text, one line per entry or sample.
///
/// ```text
/// ----- s1 tables -----
/// MyIngress.ipv4_lpm: hdr.ipv4.dstAddr 10.0.2.2/32 -> MyIngress.myTunnel_ingress dst_id 100
/// ----- s1 -> s2 -----
/// s1 MyIngress.ingressTunnelCounter 100: 4 packets (392 bytes)
/// ```
pub struct TextSink<W> {
    out: W,
    last_label: Option<String>,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_label: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}") {
            warn!(error = %e, "Failed to write observation output");
        }
    }
}

impl<W: Write + Send> ObservationSink for TextSink<W> {
    fn cycle_started(&mut self, _cycle: u64) {
        self.last_label = None;
    }

    fn table_dump(&mut self, device: &DeviceId, entries: &[DecodedEntry]) {
        self.line(&format!("----- {device} tables -----"));
        for entry in entries {
            self.line(&entry.to_string());
        }
    }

    fn counter_sample(&mut self, label: Option<&str>, sample: &CounterSample) {
        if let Some(label) = label {
            if self.last_label.as_deref() != Some(label) {
                self.line(&format!("----- {label} -----"));
                self.last_label = Some(label.to_string());
            }
        }
        self.line(&sample.to_string());
    }

    fn read_failed(&mut self, device: &DeviceId, error: &ObservationError) {
        self.line(&format!("!! {device}: {error}"));
    }

    fn cycle_finished(&mut self, _cycle: u64) {
        if let Err(e) = self.out.flush() {
            warn!(error = %e, "Failed to flush observation output");
        }
    }
}
