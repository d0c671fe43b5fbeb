//! Rule composition: one intent in, device-targeted table entries out.
//!
//! Composition is pure. Every entry of an intent is built and validated
//! against the schema before any of them is returned, so an invalid intent
//! never yields a partial set of entries.

use crate::config::Topology;
use crate::error::CompositionError;
use crate::intent::{
    DirectionClassifyIntent, EcmpGroupIntent, EcmpNextHopIntent, ForwardingIntent, IntentKind,
    PlainForwardIntent, PortRewriteIntent, SwitchTraceIntent, TunnelIntent,
};
use crate::tables::*;
use fabric_p4rt::{EntryRequest, SchemaResolver, TableEntry};
use fabric_types::DeviceId;
use tracing::trace;

/// A table entry bound to the device it must be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub device: DeviceId,
    pub entry: TableEntry,
}

/// Builds table entries from intents using the pipeline schema and the
/// per-device port roles.
pub struct RuleComposer<'a> {
    schema: &'a dyn SchemaResolver,
    topology: &'a Topology,
}

impl<'a> RuleComposer<'a> {
    pub fn new(schema: &'a dyn SchemaResolver, topology: &'a Topology) -> Self {
        Self { schema, topology }
    }

    pub fn topology(&self) -> &Topology {
        self.topology
    }

    /// Composes `intent` into its ordered install steps.
    ///
    /// A tunnel yields three steps (ingress route, ingress transit, egress
    /// decapsulation); every other kind yields one. A switch trace yields the
    /// default-action entry of a keyless table.
    pub fn compose(&self, intent: &ForwardingIntent) -> Result<Vec<InstallStep>, CompositionError> {
        for device in intent.devices() {
            if !self.topology.contains(device) {
                return Err(CompositionError::UnknownDevice(device.clone()));
            }
        }

        let requests = match intent {
            ForwardingIntent::Tunnel(t) => self.tunnel(t)?,
            ForwardingIntent::PlainForward(i) => vec![plain_forward(i)],
            ForwardingIntent::EcmpGroup(i) => vec![ecmp_group(i)],
            ForwardingIntent::EcmpNextHop(i) => vec![ecmp_next_hop(i)],
            ForwardingIntent::PortRewrite(i) => vec![port_rewrite(i)],
            ForwardingIntent::DirectionClassify(i) => vec![direction_classify(i)],
            ForwardingIntent::SwitchTrace(i) => vec![switch_trace(i)],
        };

        requests
            .into_iter()
            .map(|(device, request)| {
                trace!(device = %device, table = %request.table, action = %request.action, "Composing entry");
                let entry = self.schema.build_entry(&request)?;
                Ok(InstallStep { device, entry })
            })
            .collect()
    }

    fn tunnel(&self, t: &TunnelIntent) -> Result<Vec<(DeviceId, EntryRequest)>, CompositionError> {
        let transit_port = match t.transit_port {
            Some(port) => port,
            None => self
                .topology
                .device(&t.ingress)
                .and_then(|d| d.ports.peer(&t.egress))
                .ok_or_else(|| CompositionError::missing(IntentKind::Tunnel, "transit_port"))?,
        };
        let host_port = self
            .topology
            .device(&t.egress)
            .map(|d| d.ports.host)
            .ok_or_else(|| CompositionError::UnknownDevice(t.egress.clone()))?;
        let tunnel_id = u32::from(t.tunnel_id);

        let encap = EntryRequest::new(IPV4_LPM_TABLE)
            .lpm(IPV4_DST_ADDR, t.dst_ip, 32)
            .action(TUNNEL_INGRESS_ACTION)
            .param(PARAM_DST_ID, tunnel_id);

        let transit = EntryRequest::new(TUNNEL_EXACT_TABLE)
            .exact(TUNNEL_DST_ID, tunnel_id)
            .action(TUNNEL_FORWARD_ACTION)
            .param(PARAM_PORT, transit_port);

        // On a single-switch tunnel this shares its key with `transit` and
        // replaces it.
        let decap = EntryRequest::new(TUNNEL_EXACT_TABLE)
            .exact(TUNNEL_DST_ID, tunnel_id)
            .action(TUNNEL_EGRESS_ACTION)
            .param(PARAM_DST_ADDR, t.dst_mac)
            .param(PARAM_PORT, host_port);

        Ok(vec![
            (t.ingress.clone(), encap),
            (t.ingress.clone(), transit),
            (t.egress.clone(), decap),
        ])
    }
}

fn plain_forward(i: &PlainForwardIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(IPV4_LPM_TABLE)
        .lpm(IPV4_DST_ADDR, i.prefix.address(), i.prefix.prefix_len())
        .action(IPV4_FORWARD_ACTION)
        .param(PARAM_DST_ADDR, i.dst_mac)
        .param(PARAM_PORT, i.port);
    (i.device.clone(), request)
}

fn ecmp_group(i: &EcmpGroupIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(ECMP_GROUP_TABLE)
        .lpm(IPV4_DST_ADDR, i.prefix.address(), i.prefix.prefix_len())
        .action(SET_ECMP_SELECT_ACTION)
        .param(PARAM_ECMP_BASE, u32::from(i.base))
        .param(PARAM_ECMP_COUNT, i.count);
    (i.device.clone(), request)
}

fn ecmp_next_hop(i: &EcmpNextHopIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(ECMP_NHOP_TABLE)
        .exact(ECMP_SELECT, u32::from(i.select))
        .action(SET_NHOP_ACTION)
        .param(PARAM_NHOP_DMAC, i.dst_mac)
        .param(PARAM_NHOP_IPV4, i.dst_ip)
        .param(PARAM_PORT, i.port);
    (i.device.clone(), request)
}

fn port_rewrite(i: &PortRewriteIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(SEND_FRAME_TABLE)
        .exact(EGRESS_PORT, i.port)
        .action(REWRITE_MAC_ACTION)
        .param(PARAM_SMAC, i.src_mac);
    (i.device.clone(), request)
}

fn direction_classify(i: &DirectionClassifyIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(CHECK_PORTS_TABLE)
        .exact(INGRESS_PORT, i.ingress_port)
        .exact(EGRESS_SPEC, i.egress_port)
        .action(SET_DIRECTION_ACTION)
        .param(PARAM_DIR, i.direction.value());
    (i.device.clone(), request)
}

fn switch_trace(i: &SwitchTraceIntent) -> (DeviceId, EntryRequest) {
    let request = EntryRequest::new(SWTRACE_TABLE)
        .action(ADD_SWTRACE_ACTION)
        .param(PARAM_SWID, i.switch_id);
    (i.device.clone(), request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::TrafficDirection;
    use crate::testutil::{device, schema, topology};
    use fabric_p4rt::{MatchValue, SchemaError};
    use fabric_types::{Ipv4Address, PortNumber};
    use pretty_assertions::assert_eq;

    fn tunnel(ingress: &str, egress: &str, tunnel_id: u16) -> ForwardingIntent {
        ForwardingIntent::Tunnel(TunnelIntent {
            ingress: device(ingress),
            egress: device(egress),
            tunnel_id,
            dst_ip: Ipv4Address::new(10, 0, 2, 2),
            dst_mac: "08:00:00:00:02:22".parse().unwrap(),
            transit_port: None,
        })
    }

    #[test]
    fn test_tunnel_composes_three_entries() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let steps = composer.compose(&tunnel("s1", "s2", 100)).unwrap();
        let decoded: Vec<_> = steps
            .iter()
            .map(|s| {
                format!(
                    "{} {}",
                    s.device,
                    schema.decode_entry(&s.entry).unwrap()
                )
            })
            .collect();

        assert_eq!(
            decoded,
            vec![
                "s1 MyIngress.ipv4_lpm: hdr.ipv4.dstAddr 10.0.2.2/32 -> MyIngress.myTunnel_ingress dst_id 100",
                "s1 MyIngress.myTunnel_exact: hdr.myTunnel.dst_id 100 -> MyIngress.myTunnel_forward port 2",
                "s2 MyIngress.myTunnel_exact: hdr.myTunnel.dst_id 100 -> MyIngress.myTunnel_egress dstAddr 08:00:00:00:02:22 port 1",
            ]
        );
    }

    #[test]
    fn test_explicit_transit_port_wins() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let ForwardingIntent::Tunnel(mut t) = tunnel("s1", "s3", 200) else {
            unreachable!()
        };
        t.transit_port = Some(PortNumber::new(4).unwrap());
        let steps = composer.compose(&ForwardingIntent::Tunnel(t)).unwrap();
        let decoded = schema.decode_entry(&steps[1].entry).unwrap();
        assert_eq!(decoded.param("port").unwrap().value, vec![0, 4]);
    }

    #[test]
    fn test_tunnel_without_peer_port_is_missing_parameter() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        // s2 has no peer entry for s3.
        assert_eq!(
            composer.compose(&tunnel("s2", "s3", 300)).unwrap_err(),
            CompositionError::missing(IntentKind::Tunnel, "transit_port")
        );
    }

    #[test]
    fn test_distinct_tunnel_ids_use_distinct_keys() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let a = composer.compose(&tunnel("s1", "s2", 100)).unwrap();
        let b = composer.compose(&tunnel("s1", "s3", 200)).unwrap();
        assert_ne!(a[1].entry.key(), b[1].entry.key());
    }

    #[test]
    fn test_single_hop_tunnel_targets_one_device() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let ForwardingIntent::Tunnel(mut t) = tunnel("s1", "s1", 7) else {
            unreachable!()
        };
        t.transit_port = Some(PortNumber::new(1).unwrap());
        let steps = composer.compose(&ForwardingIntent::Tunnel(t)).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.device == device("s1")));
        assert_eq!(steps[1].entry.key(), steps[2].entry.key());
    }

    #[test]
    fn test_single_entry_kinds() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let intents = vec![
            ForwardingIntent::PlainForward(PlainForwardIntent {
                device: device("s1"),
                prefix: "10.0.1.0/24".parse().unwrap(),
                dst_mac: "08:00:00:00:01:11".parse().unwrap(),
                port: PortNumber::new(1).unwrap(),
            }),
            ForwardingIntent::EcmpGroup(EcmpGroupIntent {
                device: device("s1"),
                prefix: "10.0.0.1/32".parse().unwrap(),
                base: 0,
                count: 2,
            }),
            ForwardingIntent::EcmpNextHop(EcmpNextHopIntent {
                device: device("s1"),
                select: 1,
                dst_mac: "00:00:00:00:01:03".parse().unwrap(),
                dst_ip: Ipv4Address::new(10, 0, 3, 3),
                port: PortNumber::new(3).unwrap(),
            }),
            ForwardingIntent::PortRewrite(PortRewriteIntent {
                device: device("s2"),
                port: PortNumber::new(1).unwrap(),
                src_mac: "00:00:00:02:01:00".parse().unwrap(),
            }),
            ForwardingIntent::DirectionClassify(DirectionClassifyIntent {
                device: device("s1"),
                ingress_port: PortNumber::new(3).unwrap(),
                egress_port: PortNumber::new(1).unwrap(),
                direction: TrafficDirection::Inbound,
            }),
        ];

        for intent in &intents {
            let steps = composer.compose(intent).unwrap();
            assert_eq!(steps.len(), intent.kind().entry_count(), "{intent}");
            assert!(intent.devices().contains(&&steps[0].device), "{intent}");
        }

        let classify = composer.compose(&intents[4]).unwrap();
        let decoded = schema.decode_entry(&classify[0].entry).unwrap();
        assert_eq!(
            decoded.to_string(),
            "MyIngress.check_ports: standard_metadata.ingress_port 3 standard_metadata.egress_spec 1 -> MyIngress.set_direction dir 1"
        );

        let forward = composer.compose(&intents[0]).unwrap();
        assert_eq!(
            forward[0].entry.matches[0].value,
            MatchValue::Lpm {
                value: vec![10, 0, 1, 0],
                prefix_len: 24
            }
        );
    }

    #[test]
    fn test_switch_trace_sets_table_default() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        let steps = composer
            .compose(&ForwardingIntent::SwitchTrace(SwitchTraceIntent {
                device: device("s2"),
                switch_id: 2,
            }))
            .unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].device, device("s2"));
        let entry = &steps[0].entry;
        assert!(entry.is_default_action);
        assert!(entry.matches.is_empty());
        let decoded = schema.decode_entry(entry).unwrap();
        assert_eq!(decoded.table, SWTRACE_TABLE);
        assert_eq!(decoded.action, ADD_SWTRACE_ACTION);
        assert_eq!(decoded.param(PARAM_SWID).unwrap().value, vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_schema_violation_fails_whole_intent() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        // meta.ecmp_select is 14 bits wide.
        let intent = ForwardingIntent::EcmpNextHop(EcmpNextHopIntent {
            device: device("s1"),
            select: 20_000,
            dst_mac: "00:00:00:00:01:03".parse().unwrap(),
            dst_ip: Ipv4Address::new(10, 0, 3, 3),
            port: PortNumber::new(3).unwrap(),
        });
        assert!(matches!(
            composer.compose(&intent),
            Err(CompositionError::Schema(SchemaError::ValueTooWide { bitwidth: 14, .. }))
        ));
    }

    #[test]
    fn test_unknown_device() {
        let schema = schema();
        let topology = topology();
        let composer = RuleComposer::new(&schema, &topology);

        assert_eq!(
            composer.compose(&tunnel("s1", "s9", 100)).unwrap_err(),
            CompositionError::UnknownDevice(device("s9"))
        );
    }
}
