//! Live interface, route and OVS state of the node.

use std::collections::BTreeMap;

use ipnetwork::{Ipv4Network, Ipv6Network};
use thiserror::Error;

pub mod netlink;
pub mod ovs;

pub use netlink::Netlink;
pub use ovs::OvsCtl;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Netlink Error: {0}")]
    NetlinkError(#[from] rtnetlink::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("link {0} not found")]
    LinkNotFound(String),

    #[error("{command} exited with {status}: {stderr}")]
    CommandError {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Parse Error: {0}")]
    ParseError(String),
}
pub type HostResult<T, E = HostError> = std::result::Result<T, E>;

/// Snapshot of one link as seen by the kernel
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkState {
    pub index: u32,
    pub up: bool,
    pub mac: Option<String>,
    /// IPv4 addresses in kernel order
    pub addresses: Vec<Ipv4Network>,
    /// Never compared against desired state, only removed by a flush
    pub ipv6_addresses: Vec<Ipv6Network>,
}

/// Queries and mutations the reconciler needs from the host.
///
/// Queries never change state; every other method is a single mutation.
#[allow(async_fn_in_trait)]
pub trait HostNetwork {
    async fn link(&self, name: &str) -> HostResult<Option<LinkState>>;
    async fn route_destinations(&self) -> HostResult<Vec<Ipv4Network>>;
    async fn bridge_hwaddr(&self, bridge: &str) -> HostResult<Option<String>>;
    async fn bridge_ports(&self, bridge: &str) -> HostResult<Vec<String>>;
    async fn port_hwaddr(&self, bridge: &str, port: &str) -> HostResult<Option<String>>;
    async fn interface_external_ids(&self, interface: &str) -> HostResult<BTreeMap<String, String>>;

    /// Remove every address of any family
    async fn flush_addresses(&self, link: &str) -> HostResult<()>;
    async fn add_address(&self, link: &str, address: Ipv4Network) -> HostResult<()>;
    async fn set_link_up(&self, link: &str) -> HostResult<()>;
    async fn add_route(&self, destination: Ipv4Network, link: &str) -> HostResult<()>;
    async fn set_bridge_hwaddr(&self, bridge: &str, mac: &str) -> HostResult<()>;
    async fn add_port(&self, bridge: &str, port: &str) -> HostResult<()>;
    async fn set_interface_external_ids(
        &self,
        interface: &str,
        ids: &BTreeMap<String, String>,
    ) -> HostResult<()>;
}

/// The real node: rtnetlink for links/addresses/routes, OVS tools for bridges
pub struct SystemHost {
    pub netlink: Netlink,
    pub ovs: OvsCtl,
}

impl SystemHost {
    /// Must be called from within a tokio runtime.
    pub fn connect() -> HostResult<Self> {
        Ok(Self {
            netlink: Netlink::connect()?,
            ovs: OvsCtl::default(),
        })
    }
}

impl HostNetwork for SystemHost {
    async fn link(&self, name: &str) -> HostResult<Option<LinkState>> {
        self.netlink.link(name).await
    }

    async fn route_destinations(&self) -> HostResult<Vec<Ipv4Network>> {
        self.netlink.route_destinations().await
    }

    async fn bridge_hwaddr(&self, bridge: &str) -> HostResult<Option<String>> {
        self.ovs.bridge_hwaddr(bridge).await
    }

    async fn bridge_ports(&self, bridge: &str) -> HostResult<Vec<String>> {
        self.ovs.list_ifaces(bridge).await
    }

    async fn port_hwaddr(&self, bridge: &str, port: &str) -> HostResult<Option<String>> {
        self.ovs.port_hwaddr(bridge, port).await
    }

    async fn interface_external_ids(&self, interface: &str) -> HostResult<BTreeMap<String, String>> {
        self.ovs.interface_external_ids(interface).await
    }

    async fn flush_addresses(&self, link: &str) -> HostResult<()> {
        self.netlink.flush_addresses(link).await
    }

    async fn add_address(&self, link: &str, address: Ipv4Network) -> HostResult<()> {
        self.netlink.add_address(link, address).await
    }

    async fn set_link_up(&self, link: &str) -> HostResult<()> {
        self.netlink.set_link_up(link).await
    }

    async fn add_route(&self, destination: Ipv4Network, link: &str) -> HostResult<()> {
        self.netlink.add_route(destination, link).await
    }

    async fn set_bridge_hwaddr(&self, bridge: &str, mac: &str) -> HostResult<()> {
        self.ovs.set_bridge_hwaddr(bridge, mac).await
    }

    async fn add_port(&self, bridge: &str, port: &str) -> HostResult<()> {
        self.ovs.add_port(bridge, port).await
    }

    async fn set_interface_external_ids(
        &self,
        interface: &str,
        ids: &BTreeMap<String, String>,
    ) -> HostResult<()> {
        self.ovs.set_interface_external_ids(interface, ids).await
    }
}
