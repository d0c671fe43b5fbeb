//! Forwarding intents.
//!
//! [`IntentSpec`] is the loose form read from the configuration file: a
//! `kind` string plus whichever parameters that kind uses. [`IntentSpec::to_intent`]
//! validates it into a [`ForwardingIntent`], which is immutable from then on.

use crate::error::CompositionError;
use fabric_types::{DeviceId, Ipv4Address, Ipv4Prefix, MacAddress, PortNumber};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of forwarding behaviour the controller can install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Tunnel,
    PlainForward,
    EcmpGroup,
    EcmpNextHop,
    PortRewrite,
    DirectionClassify,
    SwitchTrace,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Tunnel => "tunnel",
            IntentKind::PlainForward => "plain-forward",
            IntentKind::EcmpGroup => "ecmp-group",
            IntentKind::EcmpNextHop => "ecmp-next-hop",
            IntentKind::PortRewrite => "port-rewrite",
            IntentKind::DirectionClassify => "direction-classify",
            IntentKind::SwitchTrace => "switch-trace",
        }
    }

    /// Number of entries a valid intent of this kind composes into.
    pub fn entry_count(&self) -> usize {
        match self {
            IntentKind::Tunnel => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentKind {
    type Err = CompositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "tunnel" => Ok(IntentKind::Tunnel),
            "plain-forward" | "forward" => Ok(IntentKind::PlainForward),
            "ecmp-group" => Ok(IntentKind::EcmpGroup),
            "ecmp-next-hop" | "ecmp-nhop" => Ok(IntentKind::EcmpNextHop),
            "port-rewrite" => Ok(IntentKind::PortRewrite),
            "direction-classify" => Ok(IntentKind::DirectionClassify),
            "switch-trace" | "swtrace" => Ok(IntentKind::SwitchTrace),
            _ => Err(CompositionError::UnknownKind(s.to_string())),
        }
    }
}

/// The binary tag written by a direction-classify entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficDirection {
    /// Internal hosts towards external ones.
    Outbound = 0,
    /// External hosts towards internal ones.
    Inbound = 1,
}

impl TrafficDirection {
    pub fn value(&self) -> u32 {
        *self as u32
    }
}

impl FromStr for TrafficDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbound" | "0" => Ok(TrafficDirection::Outbound),
            "inbound" | "1" => Ok(TrafficDirection::Inbound),
            other => Err(format!("expected outbound/inbound or 0/1, got {other:?}")),
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficDirection::Outbound => f.write_str("outbound"),
            TrafficDirection::Inbound => f.write_str("inbound"),
        }
    }
}

/// Encapsulate at `ingress`, carry across the fabric, decapsulate at
/// `egress` towards the destination host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelIntent {
    pub ingress: DeviceId,
    pub egress: DeviceId,
    pub tunnel_id: u16,
    pub dst_ip: Ipv4Address,
    pub dst_mac: MacAddress,
    /// Port on `ingress` towards `egress`. Taken from the ingress device's
    /// peer ports when absent.
    pub transit_port: Option<PortNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainForwardIntent {
    pub device: DeviceId,
    pub prefix: Ipv4Prefix,
    pub dst_mac: MacAddress,
    pub port: PortNumber,
}

/// Spread traffic for `prefix` over `count` next hops starting at `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmpGroupIntent {
    pub device: DeviceId,
    pub prefix: Ipv4Prefix,
    pub base: u16,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmpNextHopIntent {
    pub device: DeviceId,
    pub select: u16,
    pub dst_mac: MacAddress,
    pub dst_ip: Ipv4Address,
    pub port: PortNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRewriteIntent {
    pub device: DeviceId,
    pub port: PortNumber,
    pub src_mac: MacAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionClassifyIntent {
    pub device: DeviceId,
    pub ingress_port: PortNumber,
    pub egress_port: PortNumber,
    pub direction: TrafficDirection,
}

/// Stamp `switch_id` into the trace header of every packet leaving
/// `device`. Installed as the default action of a keyless table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTraceIntent {
    pub device: DeviceId,
    pub switch_id: u32,
}

/// A validated forwarding intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingIntent {
    Tunnel(TunnelIntent),
    PlainForward(PlainForwardIntent),
    EcmpGroup(EcmpGroupIntent),
    EcmpNextHop(EcmpNextHopIntent),
    PortRewrite(PortRewriteIntent),
    DirectionClassify(DirectionClassifyIntent),
    SwitchTrace(SwitchTraceIntent),
}

impl ForwardingIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            ForwardingIntent::Tunnel(_) => IntentKind::Tunnel,
            ForwardingIntent::PlainForward(_) => IntentKind::PlainForward,
            ForwardingIntent::EcmpGroup(_) => IntentKind::EcmpGroup,
            ForwardingIntent::EcmpNextHop(_) => IntentKind::EcmpNextHop,
            ForwardingIntent::PortRewrite(_) => IntentKind::PortRewrite,
            ForwardingIntent::DirectionClassify(_) => IntentKind::DirectionClassify,
            ForwardingIntent::SwitchTrace(_) => IntentKind::SwitchTrace,
        }
    }

    /// The devices this intent may write to.
    pub fn devices(&self) -> Vec<&DeviceId> {
        match self {
            ForwardingIntent::Tunnel(t) if t.ingress == t.egress => vec![&t.ingress],
            ForwardingIntent::Tunnel(t) => vec![&t.ingress, &t.egress],
            ForwardingIntent::PlainForward(i) => vec![&i.device],
            ForwardingIntent::EcmpGroup(i) => vec![&i.device],
            ForwardingIntent::EcmpNextHop(i) => vec![&i.device],
            ForwardingIntent::PortRewrite(i) => vec![&i.device],
            ForwardingIntent::DirectionClassify(i) => vec![&i.device],
            ForwardingIntent::SwitchTrace(i) => vec![&i.device],
        }
    }
}

impl fmt::Display for ForwardingIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingIntent::Tunnel(t) => write!(
                f,
                "tunnel {} {} -> {} dst {}",
                t.tunnel_id, t.ingress, t.egress, t.dst_ip
            ),
            ForwardingIntent::PlainForward(i) => {
                write!(f, "plain-forward {} {} port {}", i.device, i.prefix, i.port)
            }
            ForwardingIntent::EcmpGroup(i) => write!(
                f,
                "ecmp-group {} {} base {} count {}",
                i.device, i.prefix, i.base, i.count
            ),
            ForwardingIntent::EcmpNextHop(i) => write!(
                f,
                "ecmp-next-hop {} select {} via {} port {}",
                i.device, i.select, i.dst_ip, i.port
            ),
            ForwardingIntent::PortRewrite(i) => {
                write!(f, "port-rewrite {} port {} smac {}", i.device, i.port, i.src_mac)
            }
            ForwardingIntent::DirectionClassify(i) => write!(
                f,
                "direction-classify {} {} -> {} {}",
                i.device, i.ingress_port, i.egress_port, i.direction
            ),
            ForwardingIntent::SwitchTrace(i) => {
                write!(f, "switch-trace {} swid {}", i.device, i.switch_id)
            }
        }
    }
}

/// An intent as written in the configuration file.
///
/// ```yaml
/// - kind: tunnel
///   ingress: s1
///   egress: s2
///   tunnel_id: 100
///   dst_ip: 10.0.2.2
///   dst_mac: "08:00:00:00:02:22"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecmp_base: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecmp_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecmp_select: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swid: Option<u64>,
}

/// Typed access to the optional fields of one spec.
struct Fields<'a> {
    kind: IntentKind,
    spec: &'a IntentSpec,
}

impl<'a> Fields<'a> {
    fn required<T: 'a>(
        &self,
        name: &'static str,
        value: &'a Option<T>,
    ) -> Result<&'a T, CompositionError> {
        value
            .as_ref()
            .ok_or_else(|| CompositionError::missing(self.kind, name))
    }

    fn parse<T>(&self, name: &'static str, raw: &str) -> Result<T, CompositionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        raw.parse()
            .map_err(|e| CompositionError::invalid(self.kind, name, e))
    }

    fn device(&self, name: &'static str, value: &'a Option<String>) -> Result<DeviceId, CompositionError> {
        let raw = self.required(name, value)?;
        self.parse(name, raw)
    }

    fn target(&self) -> Result<DeviceId, CompositionError> {
        self.device("device", &self.spec.device)
    }

    fn port(&self, name: &'static str, value: &'a Option<u32>) -> Result<PortNumber, CompositionError> {
        let raw = *self.required(name, value)?;
        PortNumber::new(raw).map_err(|e| CompositionError::invalid(self.kind, name, e))
    }

    fn mac(&self, name: &'static str, value: &'a Option<String>) -> Result<MacAddress, CompositionError> {
        let raw = self.required(name, value)?;
        self.parse(name, raw)
    }

    fn ipv4(&self, name: &'static str, value: &'a Option<String>) -> Result<Ipv4Address, CompositionError> {
        let raw = self.required(name, value)?;
        self.parse(name, raw)
    }

    /// `prefix`, falling back to `dst_ip` as a host route.
    fn prefix(&self) -> Result<Ipv4Prefix, CompositionError> {
        match (&self.spec.prefix, &self.spec.dst_ip) {
            (Some(raw), _) => self.parse("prefix", raw),
            (None, Some(raw)) => self.parse::<Ipv4Address>("dst_ip", raw).map(Ipv4Prefix::host),
            (None, None) => Err(CompositionError::missing(self.kind, "prefix")),
        }
    }

    fn int<T: TryFrom<u64>>(
        &self,
        name: &'static str,
        value: &'a Option<u64>,
    ) -> Result<T, CompositionError> {
        let raw = *self.required(name, value)?;
        T::try_from(raw).map_err(|_| {
            CompositionError::invalid(
                self.kind,
                name,
                format!("{raw} exceeds {} bits", std::mem::size_of::<T>() * 8),
            )
        })
    }
}

impl IntentSpec {
    /// Validates this configuration entry into a [`ForwardingIntent`].
    ///
    /// # Errors
    ///
    /// - `UnknownKind` if `kind` names no intent kind
    /// - `MissingParameter` if a parameter the kind needs is absent
    /// - `InvalidParameter` if a parameter does not parse or is out of range
    pub fn to_intent(&self) -> Result<ForwardingIntent, CompositionError> {
        let kind: IntentKind = self.kind.parse()?;
        let f = Fields { kind, spec: self };

        let intent = match kind {
            IntentKind::Tunnel => ForwardingIntent::Tunnel(TunnelIntent {
                ingress: f.device("ingress", &self.ingress)?,
                egress: f.device("egress", &self.egress)?,
                tunnel_id: f.int("tunnel_id", &self.tunnel_id)?,
                dst_ip: f.ipv4("dst_ip", &self.dst_ip)?,
                dst_mac: f.mac("dst_mac", &self.dst_mac)?,
                transit_port: match self.transit_port {
                    Some(_) => Some(f.port("transit_port", &self.transit_port)?),
                    None => None,
                },
            }),
            IntentKind::PlainForward => ForwardingIntent::PlainForward(PlainForwardIntent {
                device: f.target()?,
                prefix: f.prefix()?,
                dst_mac: f.mac("dst_mac", &self.dst_mac)?,
                port: f.port("port", &self.port)?,
            }),
            IntentKind::EcmpGroup => {
                let count: u32 = f.int("ecmp_count", &self.ecmp_count)?;
                if count == 0 {
                    return Err(CompositionError::invalid(
                        kind,
                        "ecmp_count",
                        "a group needs at least one path",
                    ));
                }
                ForwardingIntent::EcmpGroup(EcmpGroupIntent {
                    device: f.target()?,
                    prefix: f.prefix()?,
                    base: f.int("ecmp_base", &self.ecmp_base)?,
                    count,
                })
            }
            IntentKind::EcmpNextHop => ForwardingIntent::EcmpNextHop(EcmpNextHopIntent {
                device: f.target()?,
                select: f.int("ecmp_select", &self.ecmp_select)?,
                dst_mac: f.mac("dst_mac", &self.dst_mac)?,
                dst_ip: f.ipv4("dst_ip", &self.dst_ip)?,
                port: f.port("port", &self.port)?,
            }),
            IntentKind::PortRewrite => ForwardingIntent::PortRewrite(PortRewriteIntent {
                device: f.target()?,
                port: f.port("port", &self.port)?,
                src_mac: f.mac("src_mac", &self.src_mac)?,
            }),
            IntentKind::DirectionClassify => {
                let raw = f.required("direction", &self.direction)?;
                ForwardingIntent::DirectionClassify(DirectionClassifyIntent {
                    device: f.target()?,
                    ingress_port: f.port("ingress_port", &self.ingress_port)?,
                    egress_port: f.port("egress_port", &self.egress_port)?,
                    direction: f.parse("direction", raw)?,
                })
            }
            IntentKind::SwitchTrace => ForwardingIntent::SwitchTrace(SwitchTraceIntent {
                device: f.target()?,
                switch_id: f.int("swid", &self.swid)?,
            }),
        };
        Ok(intent)
    }
}
