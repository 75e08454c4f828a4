//! Observe, plan and apply.
//!
//! Each path first snapshots the live state it cares about, then computes the
//! list of [`Mutation`]s that separates it from the desired state, and finally
//! applies that list in order. Planning is pure, so running a path against an
//! already converged node yields an empty list.

use std::collections::BTreeMap;
use std::fmt;

use ipnetwork::Ipv4Network;
use thiserror::Error;
use tracing::*;

use crate::host::{HostError, HostNetwork};

pub mod external;
pub mod gateway;

pub use external::{ExternalMode, ExternalOutcome, discover_external_facts, reconcile_external};
pub use gateway::reconcile_gateway;

/// A single change to host or OVS state
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    FlushAddresses { link: String },
    AddAddress { link: String, address: Ipv4Network },
    SetLinkUp { link: String },
    SetBridgeHwaddr { bridge: String, mac: String },
    AddPort { bridge: String, port: String },
    SetExternalIds {
        interface: String,
        ids: BTreeMap<String, String>,
    },
    AddRoute { destination: Ipv4Network, link: String },
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::FlushAddresses { link } => write!(f, "flush addresses of {link}"),
            Mutation::AddAddress { link, address } => write!(f, "add {address} to {link}"),
            Mutation::SetLinkUp { link } => write!(f, "set {link} up"),
            Mutation::SetBridgeHwaddr { bridge, mac } => {
                write!(f, "set other-config:hwaddr={mac} on bridge {bridge}")
            }
            Mutation::AddPort { bridge, port } => write!(f, "add port {port} to {bridge}"),
            Mutation::SetExternalIds { interface, ids } => {
                write!(f, "set external-ids {ids:?} on interface {interface}")
            }
            Mutation::AddRoute { destination, link } => {
                write!(f, "add route {destination} dev {link}")
            }
        }
    }
}

/// The step that stopped [`apply`]; earlier steps stay applied.
#[derive(Error, Debug)]
#[error("{step} failed after {applied} applied step(s): {source}")]
pub struct StepFailure {
    pub applied: usize,
    pub step: Mutation,
    #[source]
    pub source: HostError,
}

/// Apply `steps` in order, stopping at the first failure.
pub async fn apply<H: HostNetwork>(host: &H, steps: &[Mutation]) -> Result<(), StepFailure> {
    for (applied, step) in steps.iter().enumerate() {
        info!("Applying: {step}");
        let res = match step {
            Mutation::FlushAddresses { link } => host.flush_addresses(link).await,
            Mutation::AddAddress { link, address } => host.add_address(link, *address).await,
            Mutation::SetLinkUp { link } => host.set_link_up(link).await,
            Mutation::SetBridgeHwaddr { bridge, mac } => host.set_bridge_hwaddr(bridge, mac).await,
            Mutation::AddPort { bridge, port } => host.add_port(bridge, port).await,
            Mutation::SetExternalIds { interface, ids } => {
                host.set_interface_external_ids(interface, ids).await
            }
            Mutation::AddRoute { destination, link } => host.add_route(*destination, link).await,
        };
        res.map_err(|source| StepFailure {
            applied,
            step: step.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod fake;
