use ipnetwork::Ipv4Network;
use tracing::*;

use super::{Mutation, apply};
use crate::desired::{BridgeRole, BridgeSpec, DesiredState, OperState};
use crate::host::{HostError, HostNetwork, HostResult, LinkState};
use crate::{Error, Result};

static ACTIVATION_FAILURE: &str = "failure activate gateway interface";

/// Live state relevant to the integration and local bridges
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayObserved {
    pub integration: LinkState,
    pub local: LinkState,
    pub local_hwaddr: Option<String>,
    pub routes: Vec<Ipv4Network>,
}

pub async fn observe<H: HostNetwork>(
    host: &H,
    desired: &DesiredState,
) -> Result<GatewayObserved> {
    let integration = desired.bridge(BridgeRole::Integration)?;
    let local = desired.bridge(BridgeRole::Local)?;
    let snapshot = async {
        Ok::<_, HostError>(GatewayObserved {
            integration: required_link(host, &integration.name).await?,
            local: required_link(host, &local.name).await?,
            local_hwaddr: host.bridge_hwaddr(&local.name).await?,
            routes: host.route_destinations().await?,
        })
    };
    snapshot
        .await
        .map_err(|e| Error::activation(ACTIVATION_FAILURE, e))
}

async fn required_link<H: HostNetwork>(host: &H, name: &str) -> HostResult<LinkState> {
    host.link(name)
        .await?
        .ok_or_else(|| HostError::LinkNotFound(name.to_string()))
}

/// Steps that bring the integration and local bridges and the overlay routes
/// to the desired state.
///
/// Routes are matched on destination alone: an existing route to the same
/// network through another device counts as present.
pub fn plan(desired: &DesiredState, observed: &GatewayObserved) -> Result<Vec<Mutation>> {
    let integration = desired.bridge(BridgeRole::Integration)?;
    let local = desired.bridge(BridgeRole::Local)?;
    let mut steps = Vec::new();

    let int_addresses = plan_bridge(integration, &observed.integration, &mut steps);
    let local_addresses = plan_bridge(local, &observed.local, &mut steps);
    if let Some(mac) = &local.desired_mac {
        if observed.local_hwaddr.as_ref() != Some(mac) {
            steps.push(Mutation::SetBridgeHwaddr {
                bridge: local.name.clone(),
                mac: mac.clone(),
            });
        }
    }

    // The kernel installs a connected route for every address on an up link
    let mut present = observed.routes.clone();
    present.extend(int_addresses.iter().chain(&local_addresses).filter_map(connected));

    for route in &desired.routes {
        if present.contains(&route.destination) {
            continue;
        }
        steps.push(Mutation::AddRoute {
            destination: route.destination,
            link: route.bridge.clone(),
        });
        present.push(route.destination);
    }
    Ok(steps)
}

/// Push address and link-state steps for one bridge, returning the addresses
/// it will carry once they are applied.
fn plan_bridge(spec: &BridgeSpec, link: &LinkState, steps: &mut Vec<Mutation>) -> Vec<Ipv4Network> {
    let mut addresses = link.addresses.clone();
    if let Some(address) = spec.desired_address {
        // Full replace so stale addresses never linger
        if link.addresses != [address] {
            steps.push(Mutation::FlushAddresses {
                link: spec.name.clone(),
            });
            steps.push(Mutation::AddAddress {
                link: spec.name.clone(),
                address,
            });
            addresses = vec![address];
        }
    }
    if spec.state == OperState::Up && !link.up {
        steps.push(Mutation::SetLinkUp {
            link: spec.name.clone(),
        });
    }
    addresses
}

fn connected(address: &Ipv4Network) -> Option<Ipv4Network> {
    Ipv4Network::new(address.network(), address.prefix()).ok()
}

/// Converge the integration and local bridges and install the overlay routes.
///
/// Returns the applied steps; empty when nothing had to change.
pub async fn reconcile_gateway<H: HostNetwork>(
    host: &H,
    desired: &DesiredState,
) -> Result<Vec<Mutation>> {
    let observed = observe(host, desired).await?;
    debug!("Observed gateway state: {observed:?}");
    let steps = plan(desired, &observed)?;
    if steps.is_empty() {
        info!("Gateway path already converged");
        return Ok(steps);
    }
    apply(host, &steps)
        .await
        .map_err(|e| Error::activation(ACTIVATION_FAILURE, e))?;
    info!("Gateway path converged with {} step(s)", steps.len());
    Ok(steps)
}
