use std::net::Ipv4Addr;

use json_patch::{AddOperation, Patch as JsonPatch, PatchOperation, jsonptr::PointerBuf};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tracing::*;

use crate::{Error, Result};

pub static EXTERNAL_GW_IP: &str = "external.gateway.ip";
pub static EXTERNAL_INTF_NAME: &str = "external.interface.name";
pub static EXTERNAL_BR_IP: &str = "external.bridge.ip";

pub static ANNOTATION_MANAGER_NAME: &str = "kbr-bootstrap";

/// What other nodes and the SDN controller need to reach this node's uplink
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalGatewayFacts {
    pub gateway_ip: Ipv4Addr,
    pub interface_name: String,
    pub bridge_ip: Ipv4Addr,
}

impl ExternalGatewayFacts {
    pub fn annotations(&self) -> [(&'static str, String); 3] {
        [
            (EXTERNAL_GW_IP, self.gateway_ip.to_string()),
            (EXTERNAL_INTF_NAME, self.interface_name.clone()),
            (EXTERNAL_BR_IP, self.bridge_ip.to_string()),
        ]
    }
}

/// JSON patch setting the three fact annotations on `node`.
///
/// No `test` operation is emitted, so a concurrent writer is simply
/// overwritten.
pub fn annotation_patch(node: &Node, facts: &ExternalGatewayFacts) -> JsonPatch {
    let mut ops = Vec::new();
    if node.metadata.annotations.is_none() {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: json!({}),
        }));
    }
    for (key, value) in facts.annotations() {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations", key]),
            value: json!(value),
        }));
    }
    JsonPatch(ops)
}

/// Read `node_name`, set the fact annotations and write it back.
pub async fn publish(api: &Api<Node>, node_name: &str, facts: &ExternalGatewayFacts) -> Result<Node> {
    let node = api.get(node_name).await.map_err(Error::KubeError)?;
    let patch = annotation_patch(&node, facts);
    debug!("Annotation patch for {node_name}: {patch:?}");
    let params = PatchParams {
        field_manager: Some(ANNOTATION_MANAGER_NAME.to_string()),
        ..PatchParams::default()
    };
    let node = api
        .patch(node_name, &params, &Patch::Json::<()>(patch))
        .await
        .map_err(Error::KubeError)?;
    info!(
        "Annotated node {node_name}: gateway {}, interface {}, bridge {}",
        facts.gateway_ip, facts.interface_name, facts.bridge_ip
    );
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn facts() -> ExternalGatewayFacts {
        ExternalGatewayFacts {
            gateway_ip: Ipv4Addr::new(192, 168, 0, 1),
            interface_name: "eth1".into(),
            bridge_ip: Ipv4Addr::new(192, 168, 0, 21),
        }
    }

    fn patched(node: &Node) -> serde_json::Value {
        let mut doc = serde_json::to_value(node).unwrap();
        json_patch::patch(&mut doc, &annotation_patch(node, &facts()).0).unwrap();
        doc
    }

    #[test]
    fn creates_annotation_map_when_absent() {
        let node = Node::default();
        let doc = patched(&node);
        let annotations = &doc["metadata"]["annotations"];
        assert_eq!(annotations["external.gateway.ip"], "192.168.0.1");
        assert_eq!(annotations["external.interface.name"], "eth1");
        assert_eq!(annotations["external.bridge.ip"], "192.168.0.21");
    }

    #[test]
    fn keeps_unrelated_annotations_and_overwrites_stale_facts() {
        let mut node = Node::default();
        node.metadata.annotations = Some(BTreeMap::from([
            ("keep.me".to_string(), "yes".to_string()),
            ("external.bridge.ip".to_string(), "10.0.0.9".to_string()),
        ]));
        let doc = patched(&node);
        let annotations = &doc["metadata"]["annotations"];
        assert_eq!(annotations["keep.me"], "yes");
        assert_eq!(annotations["external.bridge.ip"], "192.168.0.21");
    }

    #[test]
    fn annotation_keys_are_dotted_not_escaped() {
        let patch = annotation_patch(&Node::default(), &facts());
        let paths: Vec<String> = patch
            .0
            .iter()
            .map(|op| match op {
                PatchOperation::Add(add) => add.path.to_string(),
                other => panic!("unexpected op {other:?}"),
            })
            .collect();
        assert_eq!(paths[0], "/metadata/annotations");
        assert!(paths.contains(&"/metadata/annotations/external.gateway.ip".to_string()));
    }
}
