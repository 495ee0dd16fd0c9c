//! [`NodeStore`] backed by the Kubernetes API server.
//!
//! Updates are JSON merge patches that carry `metadata.resourceVersion`; the
//! API server refuses them with `409 Conflict` when the node changed since it
//! was read, which is the optimistic-concurrency check the reconciler relies
//! on.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tracing::{debug, info};

use super::{NodeRecord, NodeStore};
use crate::error::StoreError;

/// Node records served by a Kubernetes cluster.
#[derive(Clone)]
pub struct KubeNodeStore {
    nodes: Api<Node>,
}

impl KubeNodeStore {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }

    /// Build a client from `kubeconfig`, or from the in-cluster service
    /// account when no path is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, StoreError> {
        let config = match kubeconfig {
            Some(path) => {
                info!(path = %path.display(), "loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    StoreError::Api(format!("read kubeconfig {}: {e}", path.display()))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        StoreError::Api(format!("load kubeconfig {}: {e}", path.display()))
                    })?
            }
            None => {
                info!("using in-cluster configuration");
                Config::incluster().map_err(|e| StoreError::Api(format!("in-cluster config: {e}")))?
            }
        };
        let client = Client::try_from(config).map_err(StoreError::api)?;
        Ok(Self::new(client))
    }
}

fn record_from_node(node: Node) -> NodeRecord {
    NodeRecord {
        name: node.metadata.name.unwrap_or_default(),
        annotations: node.metadata.annotations,
        resource_version: node.metadata.resource_version,
    }
}

fn classify(name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            node: name.to_owned(),
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(name.to_owned()),
        other => StoreError::api(other),
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get(&self, name: &str) -> Result<NodeRecord, StoreError> {
        let node = self.nodes.get(name).await.map_err(|e| classify(name, e))?;
        Ok(record_from_node(node))
    }

    async fn update(&self, record: &NodeRecord) -> Result<NodeRecord, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": record.resource_version,
                "annotations": record.annotations,
            }
        });
        debug!(node = %record.name, version = ?record.resource_version, "patching node annotations");
        let node = self
            .nodes
            .patch(&record.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(&record.name, e))?;
        Ok(record_from_node(node))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::error::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code,
        })
    }

    #[test]
    fn conflict_and_not_found_are_classified() {
        assert!(classify("node-1", api_error(409)).is_conflict());
        assert_eq!(
            classify("node-1", api_error(404)),
            StoreError::NotFound("node-1".into())
        );
        assert!(matches!(
            classify("node-1", api_error(403)),
            StoreError::Api(_)
        ));
    }

    #[test]
    fn record_keeps_annotations_and_version() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-1".into()),
                resource_version: Some("42".into()),
                annotations: Some(BTreeMap::from([("a".to_owned(), "b".to_owned())])),
                ..Default::default()
            },
            ..Default::default()
        };
        let record = record_from_node(node);
        assert_eq!(record.name, "node-1");
        assert_eq!(record.resource_version.as_deref(), Some("42"));
        assert_eq!(record.annotation("a"), Some("b"));
    }
}
