//! Cluster descriptor consumed by the SDN controller.
//!
//! The input carries `name`, `storage` and `node.port`; the output points the
//! controller's node entry at the control-plane address.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Deserialize, Debug)]
struct InputNode {
    port: Value,
}

#[derive(Deserialize, Debug)]
struct InputDescriptor {
    name: Value,
    storage: Value,
    node: InputNode,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct DescriptorNode {
    pub ip: Option<String>,
    pub id: Option<String>,
    pub port: Value,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ClusterDescriptor {
    pub node: DescriptorNode,
    pub storage: Value,
    pub name: Value,
}

/// Rebuild the descriptor around `master_ip`, dropping any other fields.
pub fn rewrite(input: &str, master_ip: Option<String>) -> Result<ClusterDescriptor> {
    let raw: InputDescriptor = serde_json::from_str(input).map_err(Error::SerializationError)?;
    Ok(ClusterDescriptor {
        node: DescriptorNode {
            ip: master_ip.clone(),
            id: master_ip,
            port: raw.node.port,
        },
        storage: raw.storage,
        name: raw.name,
    })
}
