use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::*;

use crate::config::NodeConfig;
use crate::{Error, Result, cidr};

pub static INTEGRATION_BRIDGE: &str = "kbr-int";
pub static EXTERNAL_BRIDGE: &str = "kbr-ex";
pub static LOCAL_BRIDGE: &str = "kbr-local";
pub static LOCAL_BRIDGE_HWADDR: &str = "fe:00:00:00:00:20";

/// Names of the three OVS bridges on a node and the MAC pinned on the local one
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeLayout {
    pub integration: String,
    pub external: String,
    pub local: String,
    pub local_hwaddr: String,
}

impl Default for BridgeLayout {
    fn default() -> Self {
        Self {
            integration: INTEGRATION_BRIDGE.to_string(),
            external: EXTERNAL_BRIDGE.to_string(),
            local: LOCAL_BRIDGE.to_string(),
            local_hwaddr: LOCAL_BRIDGE_HWADDR.to_string(),
        }
    }
}

/// Fully resolved address plan for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub pod_cidr: Ipv4Network,
    pub global_cidr: Ipv4Network,
    pub transient_cidr: Ipv4Network,
    pub transient_local_cidr: Ipv4Network,
    pub service_cidr: Ipv4Network,
    pub external_interface: Option<String>,
    pub external_gateway_ip: Option<Ipv4Addr>,
}

/// Derive the address plan from the config file and the node's pod CIDR.
///
/// The cluster-assigned pod CIDR wins over the file's `cidr`. The global
/// range is always the /16 around the pod CIDR, except that a file-sourced
/// pod CIDR honours an explicit `global_cidr`.
pub fn compute(config: &NodeConfig, cluster_pod_cidr: Option<&str>) -> Result<NetworkConfig> {
    let (pod_cidr, from_cluster) = match cluster_pod_cidr {
        Some(raw) => (cidr::parse(raw)?, true),
        None => (
            config
                .cidr
                .ok_or_else(|| Error::ConfigError("failure get CIDR: pod CIDR is not assigned".into()))?,
            false,
        ),
    };
    let global_cidr = match config.global_cidr {
        Some(global) if !from_cluster => global,
        _ => cidr::global_of(pod_cidr)?,
    };
    debug!("Pod CIDR {pod_cidr}, global CIDR {global_cidr}");
    Ok(NetworkConfig {
        pod_cidr,
        global_cidr,
        transient_cidr: config.transient_cidr,
        transient_local_cidr: config.transient_local_cidr,
        service_cidr: config.service_cidr,
        external_interface: config.external_interface.clone(),
        external_gateway_ip: config.external_gateway_ip,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRole {
    Integration,
    External,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSpec {
    pub name: String,
    pub role: BridgeRole,
    pub desired_address: Option<Ipv4Network>,
    pub desired_mac: Option<String>,
    pub state: OperState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: Ipv4Network,
    pub bridge: String,
}

/// Everything the gateway path must converge to
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub bridges: Vec<BridgeSpec>,
    pub routes: Vec<RouteEntry>,
}

impl DesiredState {
    pub fn new(net: &NetworkConfig, layout: &BridgeLayout) -> Result<Self> {
        let gateway = cidr::gateway_of(net.pod_cidr)?;
        let bridges = vec![
            BridgeSpec {
                name: layout.integration.clone(),
                role: BridgeRole::Integration,
                desired_address: Some(gateway),
                desired_mac: None,
                state: OperState::Up,
            },
            // Address and MAC are carried over from the uplink at reconcile time
            BridgeSpec {
                name: layout.external.clone(),
                role: BridgeRole::External,
                desired_address: None,
                desired_mac: None,
                state: OperState::Up,
            },
            BridgeSpec {
                name: layout.local.clone(),
                role: BridgeRole::Local,
                desired_address: None,
                desired_mac: Some(layout.local_hwaddr.clone()),
                state: OperState::Up,
            },
        ];
        let via = |destination: Ipv4Network, bridge: &str| RouteEntry {
            destination,
            bridge: bridge.to_string(),
        };
        let routes = vec![
            via(net.pod_cidr, &layout.integration),
            via(net.global_cidr, &layout.integration),
            via(net.transient_cidr, &layout.integration),
            via(net.service_cidr, &layout.integration),
            via(net.transient_local_cidr, &layout.local),
        ];
        Ok(Self { bridges, routes })
    }

    pub fn bridge(&self, role: BridgeRole) -> Result<&BridgeSpec> {
        self.bridges
            .iter()
            .find(|b| b.role == role)
            .ok_or_else(|| Error::OtherError(format!("no {role:?} bridge in desired state")))
    }
}
