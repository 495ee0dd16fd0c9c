//! Access to the cluster's per-node records.
//!
//! The registrar never owns a node. It reads a [`NodeRecord`], edits a copy,
//! and writes it back conditionally on the version it read. Backends must
//! reject stale writes with [`StoreError::Conflict`] so the reconciler can
//! retry from fresh state.

pub mod cluster;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::cluster::KubeNodeStore;
pub use self::memory::MemoryNodeStore;

/// The parts of a node object the registrar reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node name.
    pub name: String,
    /// Node annotations; `None` when the object carries no annotation map.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Opaque version token captured when the record was read.
    pub resource_version: Option<String>,
}

impl NodeRecord {
    /// Value of the annotation `key`, if present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }
}

/// Read/conditional-write access to node records.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch the current record for `name`.
    async fn get(&self, name: &str) -> Result<NodeRecord, StoreError>;

    /// Write `record.annotations` back, on the condition that the node is
    /// still at `record.resource_version`. Returns the stored record.
    async fn update(&self, record: &NodeRecord) -> Result<NodeRecord, StoreError>;
}

#[async_trait]
impl<S: NodeStore + ?Sized> NodeStore for std::sync::Arc<S> {
    async fn get(&self, name: &str) -> Result<NodeRecord, StoreError> {
        (**self).get(name).await
    }

    async fn update(&self, record: &NodeRecord) -> Result<NodeRecord, StoreError> {
        (**self).update(record).await
    }
}
