//! Pipeline object names used by the composer and the observation loop.
//!
//! These are the fully-qualified P4Info names. The schema also resolves
//! their aliases (`ipv4_lpm`, `ecmp_nhop`, ...).

// ingress routing
pub const IPV4_LPM_TABLE: &str = "MyIngress.ipv4_lpm";
pub const IPV4_DST_ADDR: &str = "hdr.ipv4.dstAddr";
pub const IPV4_FORWARD_ACTION: &str = "MyIngress.ipv4_forward";

// tunnel
pub const TUNNEL_EXACT_TABLE: &str = "MyIngress.myTunnel_exact";
pub const TUNNEL_DST_ID: &str = "hdr.myTunnel.dst_id";
pub const TUNNEL_INGRESS_ACTION: &str = "MyIngress.myTunnel_ingress";
pub const TUNNEL_FORWARD_ACTION: &str = "MyIngress.myTunnel_forward";
pub const TUNNEL_EGRESS_ACTION: &str = "MyIngress.myTunnel_egress";

// ecmp
pub const ECMP_GROUP_TABLE: &str = "MyIngress.ecmp_group";
pub const SET_ECMP_SELECT_ACTION: &str = "MyIngress.set_ecmp_select";
pub const ECMP_NHOP_TABLE: &str = "MyIngress.ecmp_nhop";
pub const ECMP_SELECT: &str = "meta.ecmp_select";
pub const SET_NHOP_ACTION: &str = "MyIngress.set_nhop";

// egress source MAC rewrite
pub const SEND_FRAME_TABLE: &str = "MyEgress.send_frame";
pub const EGRESS_PORT: &str = "standard_metadata.egress_port";
pub const REWRITE_MAC_ACTION: &str = "MyEgress.rewrite_mac";

// direction classification
pub const CHECK_PORTS_TABLE: &str = "MyIngress.check_ports";
pub const INGRESS_PORT: &str = "standard_metadata.ingress_port";
pub const EGRESS_SPEC: &str = "standard_metadata.egress_spec";
pub const SET_DIRECTION_ACTION: &str = "MyIngress.set_direction";

// switch trace, keyless
pub const SWTRACE_TABLE: &str = "MyEgress.swtrace";
pub const ADD_SWTRACE_ACTION: &str = "MyEgress.add_swtrace";

// action parameters
pub const PARAM_DST_ID: &str = "dst_id";
pub const PARAM_DST_ADDR: &str = "dstAddr";
pub const PARAM_PORT: &str = "port";
pub const PARAM_ECMP_BASE: &str = "ecmp_base";
pub const PARAM_ECMP_COUNT: &str = "ecmp_count";
pub const PARAM_NHOP_DMAC: &str = "nhop_dmac";
pub const PARAM_NHOP_IPV4: &str = "nhop_ipv4";
pub const PARAM_SMAC: &str = "smac";
pub const PARAM_DIR: &str = "dir";
pub const PARAM_SWID: &str = "swid";

// counters, indexed by tunnel id
pub const INGRESS_TUNNEL_COUNTER: &str = "MyIngress.ingressTunnelCounter";
pub const EGRESS_TUNNEL_COUNTER: &str = "MyIngress.egressTunnelCounter";
