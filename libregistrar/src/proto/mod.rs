//! gRPC messages and services, generated at build time from the `.proto`
//! files under `libregistrar/proto/`.

/// Kubelet plugin watcher registration API.
pub mod pluginregistration {
    tonic::include_proto!("pluginregistration");

    /// Plugin type reported for CSI drivers.
    pub const CSI_PLUGIN: &str = "CSIPlugin";
}

/// The CSI v0 calls used to discover the driver identity.
pub mod csi {
    tonic::include_proto!("csi.v0");
}
