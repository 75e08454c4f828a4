use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use tracing::*;

use super::{Mutation, apply};
use crate::annotations::ExternalGatewayFacts;
use crate::config::NodeConfig;
use crate::desired::{BridgeLayout, NetworkConfig};
use crate::host::{HostError, HostNetwork, LinkState};
use crate::{Error, Result};

static ACTIVATION_FAILURE: &str = "failure activate external interface";

/// How the uplink is joined to the external bridge.
///
/// The two entry points run at different deployment stages and deliberately
/// keep different behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalMode {
    /// Move the uplink's address and MAC onto the bridge, then enslave it
    Migrate,
    /// Only enslave the uplink and record its facts in OVS external-ids
    Attach,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalObserved {
    pub interface: LinkState,
    pub ports: Vec<String>,
    /// Only observed in [`ExternalMode::Migrate`]
    pub bridge: Option<LinkState>,
    pub bridge_hwaddr: Option<String>,
    /// Only observed in [`ExternalMode::Attach`]
    pub external_ids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalOutcome {
    pub applied: Vec<Mutation>,
    /// `None` when the external path was skipped
    pub facts: Option<ExternalGatewayFacts>,
}

/// Configured uplink name and gateway, if both are set.
fn configured(net: &NetworkConfig) -> Option<(&str, Ipv4Addr)> {
    let interface = net.external_interface.as_deref()?;
    let gateway = net.external_gateway_ip?;
    Some((interface, gateway))
}

pub async fn observe<H: HostNetwork>(
    host: &H,
    layout: &BridgeLayout,
    interface: &str,
    mode: ExternalMode,
) -> Result<Option<ExternalObserved>> {
    let snapshot = async {
        let Some(link) = host.link(interface).await? else {
            return Ok::<_, HostError>(None);
        };
        let ports = host.bridge_ports(&layout.external).await?;
        let mut observed = ExternalObserved {
            interface: link,
            ports,
            bridge: None,
            bridge_hwaddr: None,
            external_ids: BTreeMap::new(),
        };
        match mode {
            ExternalMode::Migrate => {
                let bridge = host
                    .link(&layout.external)
                    .await?
                    .ok_or_else(|| HostError::LinkNotFound(layout.external.clone()))?;
                observed.bridge = Some(bridge);
                observed.bridge_hwaddr = host.bridge_hwaddr(&layout.external).await?;
            }
            ExternalMode::Attach => {
                observed.external_ids = host.interface_external_ids(&layout.external).await?;
            }
        }
        Ok(Some(observed))
    };
    snapshot
        .await
        .map_err(|e| Error::activation(ACTIVATION_FAILURE, e))
}

/// Carry the uplink's first address and MAC over to the external bridge and
/// add the uplink as a bridge port.
///
/// An uplink without an address whose bridge already carries one is the
/// leftover of an interrupted run; the remaining steps are still planned.
pub fn plan_migrate(
    layout: &BridgeLayout,
    interface: &str,
    observed: &ExternalObserved,
) -> Vec<Mutation> {
    let bridge = &layout.external;
    let bridge_link = observed.bridge.clone().unwrap_or_default();
    let mut steps = Vec::new();

    match observed.interface.addresses.first() {
        Some(&captured) => {
            steps.push(Mutation::FlushAddresses {
                link: interface.to_string(),
            });
            if bridge_link.addresses != [captured] {
                if !bridge_link.addresses.is_empty() {
                    steps.push(Mutation::FlushAddresses {
                        link: bridge.clone(),
                    });
                }
                steps.push(Mutation::AddAddress {
                    link: bridge.clone(),
                    address: captured,
                });
            }
        }
        None if !bridge_link.addresses.is_empty() => {
            debug!("Address of {interface} already moved to {bridge}");
        }
        None => {
            warn!("External interface {interface} does not have any IPv4 address");
            return steps;
        }
    }
    if !bridge_link.up {
        steps.push(Mutation::SetLinkUp {
            link: bridge.clone(),
        });
    }
    if let Some(mac) = &observed.interface.mac {
        if observed.bridge_hwaddr.as_ref() != Some(mac) {
            steps.push(Mutation::SetBridgeHwaddr {
                bridge: bridge.clone(),
                mac: mac.clone(),
            });
        }
    }
    if !observed.ports.iter().any(|p| p == interface) {
        steps.push(Mutation::AddPort {
            bridge: bridge.clone(),
            port: interface.to_string(),
        });
    }
    steps
}

/// Add the uplink as a port and tag the bridge interface with its facts.
///
/// Port membership and the tags are judged separately, so either one left
/// behind by an interrupted run is completed on the next.
pub fn plan_attach(
    layout: &BridgeLayout,
    interface: &str,
    gateway: Ipv4Addr,
    observed: &ExternalObserved,
) -> Vec<Mutation> {
    let mut steps = Vec::new();
    let Some(address) = observed.interface.addresses.first() else {
        return steps;
    };
    if !observed.ports.iter().any(|p| p == interface) {
        steps.push(Mutation::AddPort {
            bridge: layout.external.clone(),
            port: interface.to_string(),
        });
    }
    let ids = BTreeMap::from([
        ("ip_address".to_string(), address.ip().to_string()),
        ("ext_interface".to_string(), interface.to_string()),
        ("ext_gw_ip_address".to_string(), gateway.to_string()),
    ]);
    if ids
        .iter()
        .any(|(key, value)| observed.external_ids.get(key) != Some(value))
    {
        steps.push(Mutation::SetExternalIds {
            interface: layout.external.clone(),
            ids,
        });
    }
    steps
}

/// The address the external bridge ends up carrying: the uplink's, or the
/// bridge's own once a previous run already moved it.
fn bridge_ip(observed: &ExternalObserved) -> Option<Ipv4Addr> {
    observed
        .interface
        .addresses
        .first()
        .or_else(|| observed.bridge.as_ref()?.addresses.first())
        .map(|net| net.ip())
}

/// Join the configured uplink to the external bridge.
///
/// A node without a configured uplink, gateway, or the uplink device itself
/// is left untouched.
pub async fn reconcile_external<H: HostNetwork>(
    host: &H,
    net: &NetworkConfig,
    layout: &BridgeLayout,
    mode: ExternalMode,
) -> Result<ExternalOutcome> {
    let Some((interface, gateway)) = configured(net) else {
        info!("External interface or gateway not configured, skipping external bridge");
        return Ok(ExternalOutcome::default());
    };
    let Some(observed) = observe(host, layout, interface, mode).await? else {
        info!("External interface {interface} not present, skipping external bridge");
        return Ok(ExternalOutcome::default());
    };
    debug!("Observed external state: {observed:?}");

    let steps = match mode {
        ExternalMode::Migrate => plan_migrate(layout, interface, &observed),
        ExternalMode::Attach => {
            if observed.interface.addresses.is_empty() {
                info!("External interface {interface} is not up, skipping external bridge");
                return Ok(ExternalOutcome::default());
            }
            plan_attach(layout, interface, gateway, &observed)
        }
    };
    apply(host, &steps)
        .await
        .map_err(|e| Error::activation(ACTIVATION_FAILURE, e))?;

    if mode == ExternalMode::Attach && !steps.is_empty() {
        let mac = host
            .port_hwaddr(&layout.external, interface)
            .await
            .map_err(|e| Error::activation(ACTIVATION_FAILURE, e))?;
        debug!("Port {interface} on {} has MAC {mac:?}", layout.external);
    }
    if steps.is_empty() {
        info!("External path already converged");
    }

    let facts = bridge_ip(&observed).map(|bridge_ip| ExternalGatewayFacts {
        gateway_ip: gateway,
        interface_name: interface.to_string(),
        bridge_ip,
    });
    Ok(ExternalOutcome {
        applied: steps,
        facts,
    })
}

/// Read-only variant used when only the annotations are refreshed.
///
/// Needs nothing but the uplink settings, so a node without a pod CIDR can
/// still be annotated.
pub async fn discover_external_facts<H: HostNetwork>(
    host: &H,
    config: &NodeConfig,
    layout: &BridgeLayout,
) -> Result<ExternalGatewayFacts> {
    let (interface, gateway) = config
        .external_interface
        .as_deref()
        .zip(config.external_gateway_ip)
        .ok_or_else(|| {
            Error::ConfigError("failure get external interface or external gateway IP".into())
        })?;
    let bridge_ip = match first_ipv4(host, interface).await? {
        Some(ip) => ip,
        None => first_ipv4(host, &layout.external).await?.ok_or_else(|| {
            Error::IdentificationError(format!(
                "no IPv4 address on {interface} or {}",
                layout.external
            ))
        })?,
    };
    Ok(ExternalGatewayFacts {
        gateway_ip: gateway,
        interface_name: interface.to_string(),
        bridge_ip,
    })
}

async fn first_ipv4<H: HostNetwork>(host: &H, name: &str) -> Result<Option<Ipv4Addr>> {
    let link = host
        .link(name)
        .await
        .map_err(|e| Error::IdentificationError(format!("failure read {name}: {e}")))?;
    Ok(link.and_then(|l| l.addresses.first().map(|net| net.ip())))
}
