//! Shared fixtures for unit tests.

use crate::config::{Device, PortRoles, Topology};
use fabric_p4rt::P4InfoResolver;
use fabric_types::{DeviceId, PortNumber};

pub(crate) const P4INFO: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../config/pipeline.p4info.json"
));

pub(crate) fn device(name: &str) -> DeviceId {
    DeviceId::new(name).unwrap()
}

pub(crate) fn schema() -> P4InfoResolver {
    P4InfoResolver::from_json_str(P4INFO).unwrap()
}

fn switch(name: &str, peers: &[(&str, u32)]) -> Device {
    Device {
        name: device(name),
        address: format!("127.0.0.1:5005{}", &name[1..]),
        device_id: 0,
        ports: PortRoles {
            host: PortNumber::new(1).unwrap(),
            peers: peers
                .iter()
                .map(|(peer, port)| (device(peer), PortNumber::new(*port).unwrap()))
                .collect(),
        },
        proto_dump: None,
    }
}

/// s1, s2 and s3, each with its host on port 1. s2 has no port towards s3.
pub(crate) fn topology() -> Topology {
    Topology::new([
        switch("s1", &[("s2", 2), ("s3", 3)]),
        switch("s2", &[("s1", 2)]),
        switch("s3", &[("s1", 2), ("s2", 3)]),
    ])
    .unwrap()
}
