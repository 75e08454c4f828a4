use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use futures::TryStreamExt;
use ipnetwork::{IpNetwork, Ipv4Network};
use netlink_packet_route::address::nlas::Nla as AddressNla;
use netlink_packet_route::link::nlas::{Nla as LinkNla, State};
use netlink_packet_route::route::nlas::Nla as RouteNla;
use netlink_packet_route::{AddressMessage, LinkMessage};
use rtnetlink::IpVersion;
use tracing::*;

use super::{HostError, HostResult, LinkState};

const MAIN_TABLE: u8 = 254;

/// rtnetlink handle for link, address and route operations.
pub struct Netlink {
    handle: rtnetlink::Handle,
    // Keep the connection task alive
    _conn_task: tokio::task::JoinHandle<()>,
}

impl Netlink {
    pub fn connect() -> HostResult<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            _conn_task: conn_task,
        })
    }

    async fn link_message(&self, name: &str) -> HostResult<Option<LinkMessage>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(msg) => Ok(msg),
            // rtnetlink reports a missing link as an error on most kernels
            Err(e) if e.to_string().contains("No such device") => Ok(None),
            Err(e) => Err(HostError::NetlinkError(e)),
        }
    }

    async fn index_of(&self, name: &str) -> HostResult<u32> {
        self.link_message(name)
            .await?
            .map(|msg| msg.header.index)
            .ok_or_else(|| HostError::LinkNotFound(name.to_string()))
    }

    async fn address_messages(&self, index: u32) -> HostResult<Vec<AddressMessage>> {
        let messages: Vec<AddressMessage> = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute()
            .try_collect()
            .await?;
        Ok(messages)
    }

    pub async fn link(&self, name: &str) -> HostResult<Option<LinkState>> {
        let Some(msg) = self.link_message(name).await? else {
            return Ok(None);
        };
        let index = msg.header.index;
        let mut state = LinkState {
            index,
            up: true,
            ..LinkState::default()
        };
        for nla in &msg.nlas {
            match nla {
                LinkNla::OperState(State::Down) => state.up = false,
                LinkNla::Address(bytes) => state.mac = Some(format_mac(bytes)),
                _ => {}
            }
        }
        for msg in self.address_messages(index).await? {
            match network_of(&msg) {
                Some(IpNetwork::V4(net)) => state.addresses.push(net),
                Some(IpNetwork::V6(net)) => state.ipv6_addresses.push(net),
                None => {}
            }
        }
        debug!("Link {name}: {state:?}");
        Ok(Some(state))
    }

    /// Destinations of every IPv4 route in the main table
    pub async fn route_destinations(&self) -> HostResult<Vec<Ipv4Network>> {
        let mut routes = self.handle.route().get(IpVersion::V4).execute();
        let mut destinations = Vec::new();
        while let Some(msg) = routes.try_next().await? {
            if msg.header.table != MAIN_TABLE {
                continue;
            }
            let prefix = msg.header.destination_prefix_length;
            let addr = msg
                .nlas
                .iter()
                .find_map(|nla| match nla {
                    RouteNla::Destination(bytes) => ipv4_from_bytes(bytes),
                    _ => None,
                })
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            match Ipv4Network::new(addr, prefix) {
                Ok(net) => destinations.push(net),
                Err(e) => warn!("Skipping route {addr}/{prefix}: {e}"),
            }
        }
        Ok(destinations)
    }

    /// Remove every address from `name`, whatever its family
    pub async fn flush_addresses(&self, name: &str) -> HostResult<()> {
        let index = self.index_of(name).await?;
        for msg in self.address_messages(index).await? {
            debug!("Deleting {:?} from {name}", network_of(&msg));
            self.handle.address().del(msg).execute().await?;
        }
        Ok(())
    }

    pub async fn add_address(&self, name: &str, address: Ipv4Network) -> HostResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .address()
            .add(index, IpAddr::V4(address.ip()), address.prefix())
            .execute()
            .await
            .map_err(HostError::NetlinkError)
    }

    pub async fn set_link_up(&self, name: &str) -> HostResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(HostError::NetlinkError)
    }

    pub async fn add_route(&self, destination: Ipv4Network, name: &str) -> HostResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .route()
            .add()
            .v4()
            .destination_prefix(destination.network(), destination.prefix())
            .output_interface(index)
            .execute()
            .await
            .map_err(HostError::NetlinkError)
    }
}

fn network_of(msg: &AddressMessage) -> Option<IpNetwork> {
    // IFA_LOCAL is the interface's own address; IFA_ADDRESS is the peer on p2p links
    let local = msg.nlas.iter().find_map(|nla| match nla {
        AddressNla::Local(bytes) => ip_from_bytes(bytes),
        _ => None,
    });
    let addr = local.or_else(|| {
        msg.nlas.iter().find_map(|nla| match nla {
            AddressNla::Address(bytes) => ip_from_bytes(bytes),
            _ => None,
        })
    })?;
    IpNetwork::new(addr, msg.header.prefix_len).ok()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Some(v4) = ipv4_from_bytes(bytes) {
        return Some(IpAddr::V4(v4));
    }
    let octets: [u8; 16] = bytes.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

fn ipv4_from_bytes(bytes: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = bytes.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
