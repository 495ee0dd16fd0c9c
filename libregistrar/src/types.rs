//! Core registrar types: driver identity, the driver map, and the handshake
//! payloads exchanged with the kubelet plugin watcher.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proto::pluginregistration as pb;

/// Node annotation holding the JSON map of CSI driver names to driver node ids.
pub const ANNOTATION_KEY: &str = "csi.volume.kubernetes.io/nodeid";

/// Plugin watcher API versions this registrar speaks, oldest first.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["0.2.0", "0.3.0"];

// ---------------------------------------------------------------------------
// Driver identity
// ---------------------------------------------------------------------------

/// The `(name, node id)` pair a CSI driver reports about itself.
///
/// Fetched once at startup and never re-queried; the node id is assumed to be
/// immutable for the lifetime of the driver on this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverIdentity {
    /// Driver name, e.g. `"hostpath.csi.k8s.io"`.
    pub name: String,
    /// Node id as known to the driver.
    pub node_id: String,
}

impl DriverIdentity {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for DriverIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.node_id)
    }
}

// ---------------------------------------------------------------------------
// Driver map
// ---------------------------------------------------------------------------

/// Decoded value of [`ANNOTATION_KEY`]: driver name to driver node id.
///
/// Ordering carries no meaning; a `BTreeMap` keeps the encoded form stable,
/// which keeps diffs of the node object readable.
pub type DriverMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Handshake payloads
// ---------------------------------------------------------------------------

/// Answer to the plugin watcher's `GetInfo` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    /// Always [`pb::CSI_PLUGIN`].
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Driver name.
    pub name: String,
    /// Path of the driver socket as seen from the host.
    pub endpoint: String,
    /// Supported plugin watcher API versions, in order.
    pub supported_versions: Vec<String>,
}

impl RegistrationInfo {
    /// Build the info advertised for a CSI driver.
    pub fn for_csi_driver(name: &str, endpoint: &str, supported_versions: &[String]) -> Self {
        Self {
            plugin_type: pb::CSI_PLUGIN.to_owned(),
            name: name.to_owned(),
            endpoint: endpoint.to_owned(),
            supported_versions: supported_versions.to_vec(),
        }
    }
}

impl From<RegistrationInfo> for pb::PluginInfo {
    fn from(info: RegistrationInfo) -> Self {
        Self {
            r#type: info.plugin_type,
            name: info.name,
            endpoint: info.endpoint,
            supported_versions: info.supported_versions,
        }
    }
}

/// Registration outcome reported by the plugin watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub registered: bool,
    pub error: Option<String>,
}

impl From<pb::RegistrationStatus> for RegistrationStatus {
    fn from(status: pb::RegistrationStatus) -> Self {
        Self {
            registered: status.plugin_registered,
            error: (!status.error.is_empty()).then_some(status.error),
        }
    }
}

/// Default supported versions as owned strings.
pub fn default_supported_versions() -> Vec<String> {
    SUPPORTED_VERSIONS.iter().map(|v| (*v).to_owned()).collect()
}
