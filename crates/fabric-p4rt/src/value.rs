//! Canonical byte-string encoding of match and parameter values.
//!
//! P4Runtime carries every field value as a big-endian byte string. This
//! module uses the full-width form: `ceil(bitwidth / 8)` bytes, high bits
//! zero.

use fabric_types::{Ipv4Address, MacAddress, PortNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed value destined for a match field or an action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Int(u64),
    Mac(MacAddress),
    Ipv4(Ipv4Address),
}

impl FieldValue {
    fn as_u64(&self) -> u64 {
        match self {
            FieldValue::Int(value) => *value,
            FieldValue::Mac(mac) => mac.to_u64(),
            FieldValue::Ipv4(addr) => u64::from(addr.to_u32()),
        }
    }

    /// Encodes the value for a field of `bitwidth` bits.
    ///
    /// Returns `None` if the value needs more than `bitwidth` bits.
    pub fn encode(&self, bitwidth: u32) -> Option<Vec<u8>> {
        let raw = self.as_u64();
        if bitwidth < u64::BITS && raw >> bitwidth != 0 {
            return None;
        }
        let width = byte_width(bitwidth);
        let be = raw.to_be_bytes();
        let mut out = vec![0u8; width.saturating_sub(be.len())];
        out.extend_from_slice(&be[be.len().saturating_sub(width)..]);
        Some(out)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Mac(mac) => write!(f, "{mac}"),
            FieldValue::Ipv4(addr) => write!(f, "{addr}"),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(u64::from(value))
    }
}

impl From<PortNumber> for FieldValue {
    fn from(port: PortNumber) -> Self {
        FieldValue::Int(u64::from(port))
    }
}

impl From<MacAddress> for FieldValue {
    fn from(mac: MacAddress) -> Self {
        FieldValue::Mac(mac)
    }
}

impl From<Ipv4Address> for FieldValue {
    fn from(addr: Ipv4Address) -> Self {
        FieldValue::Ipv4(addr)
    }
}

/// Number of bytes used for a field of `bitwidth` bits.
pub fn byte_width(bitwidth: u32) -> usize {
    bitwidth.div_ceil(8) as usize
}

/// Interprets a canonical byte string as an unsigned integer.
///
/// Returns `None` for values wider than 64 significant bits.
pub fn bytes_to_u64(bytes: &[u8]) -> Option<u64> {
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return None;
    }
    Some(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Zeroes every bit of `bytes` outside the leading `prefix_len` bits.
pub fn mask_prefix(bytes: &mut [u8], prefix_len: u32) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        let start = i as u32 * 8;
        if prefix_len <= start {
            *byte = 0;
        } else if prefix_len < start + 8 {
            *byte &= 0xffu8 << (start + 8 - prefix_len);
        }
    }
}

/// Renders a decoded value for humans: MAC for 48-bit fields, dotted quad
/// for 32-bit fields, decimal otherwise.
pub fn render_value(bytes: &[u8], bitwidth: u32) -> String {
    match bitwidth {
        MacAddress::BITS => match MacAddress::from_slice(bytes) {
            Some(mac) => mac.to_string(),
            None => render_hex(bytes),
        },
        Ipv4Address::BITS => match <[u8; 4]>::try_from(bytes) {
            Ok([a, b, c, d]) => Ipv4Address::new(a, b, c, d).to_string(),
            Err(_) => render_hex(bytes),
        },
        _ => match bytes_to_u64(bytes) {
            Some(value) => value.to_string(),
            None => render_hex(bytes),
        },
    }
}

fn render_hex(bytes: &[u8]) -> String {
    let mut out = String::from("0x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
