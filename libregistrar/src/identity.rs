//! Learning the driver's identity from the CSI driver itself.
//!
//! The registrar asks the driver for its name (`Identity.GetPluginInfo`) and
//! for the node id it uses on this node (`Node.NodeGetId`), once, at startup.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout};
use tonic::transport::Channel;
use tracing::{info, instrument, warn};

use crate::error::IdentityError;
use crate::proto::csi::identity_client::IdentityClient;
use crate::proto::csi::node_client::NodeClient;
use crate::proto::csi::{GetPluginInfoRequest, NodeGetIdRequest};
use crate::socket;
use crate::types::DriverIdentity;

/// Deadline for each identity call.
pub const CSI_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between connection attempts while the driver socket is not up yet.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Where a driver identity comes from.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// The driver's name.
    async fn driver_name(&self) -> Result<String, IdentityError>;

    /// The driver's id for the current node.
    async fn node_id(&self) -> Result<String, IdentityError>;
}

/// Query `source` for the driver name and node id, each under `call_timeout`.
///
/// Empty answers are rejected.
pub async fn fetch_identity<S>(source: &S, call_timeout: Duration) -> Result<DriverIdentity, IdentityError>
where
    S: IdentitySource + ?Sized,
{
    let name = timeout(call_timeout, source.driver_name())
        .await
        .map_err(|_| IdentityError::Timeout {
            call: "GetPluginInfo",
            timeout: call_timeout,
        })??;
    if name.is_empty() {
        return Err(IdentityError::Empty("GetPluginInfo"));
    }
    info!(driver = %name, "CSI driver name");

    let node_id = timeout(call_timeout, source.node_id())
        .await
        .map_err(|_| IdentityError::Timeout {
            call: "NodeGetId",
            timeout: call_timeout,
        })??;
    if node_id.is_empty() {
        return Err(IdentityError::Empty("NodeGetId"));
    }
    info!(driver = %name, %node_id, "CSI driver node id");

    Ok(DriverIdentity { name, node_id })
}

/// A gRPC connection to the CSI driver's unix socket.
#[derive(Debug, Clone)]
pub struct CsiConnection {
    channel: Channel,
}

impl CsiConnection {
    /// Connect to `address` (a path, optionally prefixed with `unix://`),
    /// retrying every second until `connection_timeout` has elapsed.
    #[instrument(skip(connection_timeout))]
    pub async fn connect(address: &str, connection_timeout: Duration) -> Result<Self, IdentityError> {
        let path: PathBuf = socket::socket_path(address).to_owned();
        let deadline = Instant::now() + connection_timeout;
        loop {
            match socket::connect(path.clone()).await {
                Ok(channel) => {
                    info!("connected to CSI driver");
                    return Ok(Self { channel });
                }
                Err(e) if Instant::now() + CONNECT_RETRY_INTERVAL < deadline => {
                    warn!(error = %e, "CSI driver not reachable yet, still trying");
                    sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(IdentityError::Connect {
                        address: address.to_owned(),
                        timeout: connection_timeout,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl IdentitySource for CsiConnection {
    async fn driver_name(&self) -> Result<String, IdentityError> {
        let response = IdentityClient::new(self.channel.clone())
            .get_plugin_info(GetPluginInfoRequest {})
            .await
            .map_err(|status| IdentityError::Rpc {
                call: "GetPluginInfo",
                status,
            })?;
        Ok(response.into_inner().name)
    }

    async fn node_id(&self) -> Result<String, IdentityError> {
        let response = NodeClient::new(self.channel.clone())
            .node_get_id(NodeGetIdRequest {})
            .await
            .map_err(|status| IdentityError::Rpc {
                call: "NodeGetId",
                status,
            })?;
        Ok(response.into_inner().node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        name: &'static str,
        node_id: &'static str,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl IdentitySource for FakeDriver {
        async fn driver_name(&self) -> Result<String, IdentityError> {
            if let Some(stall) = self.stall {
                sleep(stall).await;
            }
            Ok(self.name.to_owned())
        }

        async fn node_id(&self) -> Result<String, IdentityError> {
            Ok(self.node_id.to_owned())
        }
    }

    #[tokio::test]
    async fn identity_is_assembled() {
        let driver = FakeDriver {
            name: "hostpath.csi.k8s.io",
            node_id: "node-1",
            stall: None,
        };
        let identity = fetch_identity(&driver, CSI_CALL_TIMEOUT).await.unwrap();
        assert_eq!(identity, DriverIdentity::new("hostpath.csi.k8s.io", "node-1"));
    }

    #[tokio::test]
    async fn empty_answers_are_rejected() {
        let nameless = FakeDriver {
            name: "",
            node_id: "node-1",
            stall: None,
        };
        assert!(matches!(
            fetch_identity(&nameless, CSI_CALL_TIMEOUT).await,
            Err(IdentityError::Empty("GetPluginInfo"))
        ));

        let idless = FakeDriver {
            name: "driverA",
            node_id: "",
            stall: None,
        };
        assert!(matches!(
            fetch_identity(&idless, CSI_CALL_TIMEOUT).await,
            Err(IdentityError::Empty("NodeGetId"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_driver_times_out() {
        let driver = FakeDriver {
            name: "driverA",
            node_id: "node-1",
            stall: Some(Duration::from_secs(5)),
        };
        let err = fetch_identity(&driver, CSI_CALL_TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Timeout {
                call: "GetPluginInfo",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connect_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let address = format!("unix://{}", dir.path().join("missing.sock").display());
        let err = CsiConnection::connect(&address, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Connect { .. }));
    }
}
