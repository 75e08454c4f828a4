//! IPv4 network helpers used to derive the node's address plan.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::{Error, Result};

/// Prefix length of the cluster-wide network that contains every pod CIDR
pub const GLOBAL_PREFIX: u8 = 16;

/// Parse a CIDR and normalise it to its network address.
pub fn parse(value: &str) -> Result<Ipv4Network> {
    let net: Ipv4Network = value
        .trim()
        .parse()
        .map_err(|e| Error::ConfigError(format!("invalid CIDR {value:?}: {e}")))?;
    canonical(net)
}

/// `10.244.1.7/24` -> `10.244.1.0/24`
pub fn canonical(net: Ipv4Network) -> Result<Ipv4Network> {
    Ipv4Network::new(net.network(), net.prefix()).map_err(|e| Error::ConfigError(e.to_string()))
}

/// The /16 supernet containing `pod`.
pub fn global_of(pod: Ipv4Network) -> Result<Ipv4Network> {
    if pod.prefix() < GLOBAL_PREFIX {
        return Err(Error::ConfigError(format!(
            "pod CIDR {pod} is wider than /{GLOBAL_PREFIX}"
        )));
    }
    let wide = Ipv4Network::new(pod.network(), GLOBAL_PREFIX)
        .map_err(|e| Error::ConfigError(e.to_string()))?;
    canonical(wide)
}

/// First usable host of `pod`, carrying the pod prefix length.
pub fn gateway_of(pod: Ipv4Network) -> Result<Ipv4Network> {
    let pod = canonical(pod)?;
    let first: Ipv4Addr = pod
        .nth(1)
        .ok_or_else(|| Error::ConfigError(format!("pod CIDR {pod} has no usable host")))?;
    Ipv4Network::new(first, pod.prefix()).map_err(|e| Error::ConfigError(e.to_string()))
}
