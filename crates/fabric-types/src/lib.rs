//! Common types for programming a fabric of P4 switches.
//!
//! This crate provides type-safe representations of the network primitives
//! that appear in match keys and action parameters:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Ipv4Address`]: IPv4 host addresses
//! - [`Ipv4Prefix`]: IPv4 network prefixes (CIDR notation)
//! - [`PortNumber`]: switch data-plane port numbers
//! - [`DeviceId`]: the operator-facing name of a switch

mod device;
mod ip;
mod mac;
mod port;

pub use device::DeviceId;
pub use ip::{Ipv4Address, Ipv4Prefix};
pub use mac::MacAddress;
pub use port::PortNumber;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid port number: {0} (must be 0-{max})", max = PortNumber::MAX)]
    InvalidPortNumber(u32),

    #[error("malformed port number: {0:?}")]
    MalformedPortNumber(String),

    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),
}
