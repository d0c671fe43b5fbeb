//! Switch data-plane port numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A data-plane port number.
///
/// BMv2's `standard_metadata.ingress_port` / `egress_spec` are 9 bits wide,
/// so valid ports are `0..=511`. Port 511 is the BMv2 drop port but is still
/// a representable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PortNumber(u16);

impl PortNumber {
    /// Width of a port field on the wire, in bits.
    pub const BITS: u32 = 9;

    pub const MAX: u16 = (1 << Self::BITS) - 1;

    /// Creates a port number, rejecting values that do not fit in 9 bits.
    pub fn new(port: u32) -> Result<Self, ParseError> {
        if port > u32::from(Self::MAX) {
            return Err(ParseError::InvalidPortNumber(port));
        }
        Ok(PortNumber(port as u16))
    }

    pub const fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::MalformedPortNumber(s.to_string()))?;
        PortNumber::new(raw)
    }
}

impl TryFrom<u32> for PortNumber {
    type Error = ParseError;

    fn try_from(port: u32) -> Result<Self, Self::Error> {
        PortNumber::new(port)
    }
}

impl From<PortNumber> for u32 {
    fn from(port: PortNumber) -> u32 {
        u32::from(port.0)
    }
}

impl From<PortNumber> for u64 {
    fn from(port: PortNumber) -> u64 {
        u64::from(port.0)
    }
}
