//! MAC address type used in rewrite and next-hop action parameters.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// # Examples
///
/// ```
/// use fabric_types::MacAddress;
///
/// let mac: MacAddress = "08:00:00:00:02:22".parse().unwrap();
/// assert_eq!(mac.to_string(), "08:00:00:00:02:22");
/// assert_eq!(mac.to_u64(), 0x0800_0000_0222);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Width of a MAC address on the wire, in bits.
    pub const BITS: u32 = 48;

    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Builds an address from exactly six bytes, as found in a decoded
    /// 48-bit match or parameter value.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(MacAddress)
    }

    /// Returns the address as an integer (upper 16 bits are zero).
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let invalid = || ParseError::InvalidMacAddress(s.to_string());

        let mut bytes = [0u8; 6];
        let mut parts = s.split(separator);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}
