//! IPv4 address and prefix types with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address as carried in `hdr.ipv4.dstAddr` style fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    /// Width of an IPv4 address on the wire, in bits.
    pub const BITS: u32 = 32;

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    pub fn to_u32(&self) -> u32 {
        u32::from(self.0)
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl TryFrom<String> for Ipv4Address {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Address> for String {
    fn from(addr: Ipv4Address) -> String {
        addr.to_string()
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

/// An IPv4 prefix in CIDR notation, e.g. `10.0.2.2/32`.
///
/// A bare address without `/len` parses as a host route (/32), which is
/// how destination hosts are usually written in topology files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    address: Ipv4Address,
    prefix_len: u8,
}

impl Ipv4Prefix {
    /// Creates a new prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length exceeds 32.
    pub fn new(address: Ipv4Address, prefix_len: u8) -> Result<Self, ParseError> {
        if u32::from(prefix_len) > Ipv4Address::BITS {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {}",
                prefix_len,
                Ipv4Address::BITS
            )));
        }

        Ok(Ipv4Prefix {
            address,
            prefix_len,
        })
    }

    /// Creates a /32 host route.
    pub const fn host(address: Ipv4Address) -> Self {
        Ipv4Prefix {
            address,
            prefix_len: 32,
        }
    }

    pub const fn address(&self) -> Ipv4Address {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_host_route(&self) -> bool {
        self.prefix_len == 32
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((addr_str, len_str)) = s.rsplit_once('/') else {
            return s.parse().map(Ipv4Prefix::host);
        };

        let address: Ipv4Address = addr_str.parse()?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        Ipv4Prefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(prefix: Ipv4Prefix) -> String {
        prefix.to_string()
    }
}
