use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::*;

use crate::{Error, Result};

pub static MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";
pub static CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

pub fn nodes_api(client: Client) -> Api<Node> {
    Api::all(client)
}

/// `spec.podCIDR` assigned to `node_name`, if any.
pub async fn pod_cidr(api: &Api<Node>, node_name: &str) -> Result<Option<String>> {
    let node = api.get(node_name).await.map_err(Error::KubeError)?;
    let cidr = node.spec.and_then(|spec| spec.pod_cidr);
    debug!("Node {node_name} pod CIDR: {cidr:?}");
    Ok(cidr)
}

/// InternalIP of the first control-plane node in the cluster.
pub async fn master_ip(api: &Api<Node>) -> Result<Option<String>> {
    let nodes = api
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    Ok(control_plane_address(&nodes.items))
}

pub fn control_plane_address(nodes: &[Node]) -> Option<String> {
    nodes
        .iter()
        .find(|node| is_control_plane(node))
        .and_then(internal_ip)
}

fn is_control_plane(node: &Node) -> bool {
    node.metadata.labels.as_ref().is_some_and(|labels| {
        labels
            .keys()
            .any(|k| k.contains(MASTER_ROLE_LABEL) || k.contains(CONTROL_PLANE_ROLE_LABEL))
    })
}

fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use std::collections::BTreeMap;

    fn node(name: &str, labels: &[&str], addresses: &[(&str, &str)]) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.into());
        node.metadata.labels = Some(
            labels
                .iter()
                .map(|l| (l.to_string(), String::new()))
                .collect::<BTreeMap<_, _>>(),
        );
        node.status = Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(t, a)| NodeAddress {
                        type_: t.to_string(),
                        address: a.to_string(),
                    })
                    .collect(),
            ),
            ..NodeStatus::default()
        });
        node
    }

    #[test]
    fn finds_master_internal_ip() {
        let nodes = vec![
            node("worker", &["kubernetes.io/os"], &[("InternalIP", "10.0.0.2")]),
            node(
                "master",
                &["node-role.kubernetes.io/master"],
                &[("Hostname", "master"), ("InternalIP", "10.0.0.1")],
            ),
        ];
        assert_eq!(control_plane_address(&nodes).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn accepts_control_plane_label() {
        let nodes = vec![node(
            "cp",
            &["node-role.kubernetes.io/control-plane"],
            &[("InternalIP", "10.0.0.5")],
        )];
        assert_eq!(control_plane_address(&nodes).as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn none_without_control_plane_or_internal_ip() {
        let nodes = vec![node("worker", &[], &[("InternalIP", "10.0.0.2")])];
        assert_eq!(control_plane_address(&nodes), None);
        let nodes = vec![node(
            "master",
            &["node-role.kubernetes.io/master"],
            &[("ExternalIP", "1.2.3.4")],
        )];
        assert_eq!(control_plane_address(&nodes), None);
    }
}
