//! Registrar runtime configuration.
//!
//! The binary builds a [`RegistrarConfig`] from its command line once; the
//! operating [`Mode`] is fixed from then on.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RegistrarError;
use crate::retry::RetryPolicy;
use crate::types::default_supported_versions;

/// How the registrar announces the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Serve the plugin registration handshake for the kubelet plugin watcher.
    Handshake {
        /// Driver socket path as seen from the host, advertised in `GetInfo`.
        endpoint: String,
        /// Directory the plugin watcher scans for registration sockets.
        registration_dir: PathBuf,
    },
    /// Maintain the node annotation directly.
    Reconcile {
        /// Kubeconfig path; in-cluster configuration when `None`.
        kubeconfig: Option<PathBuf>,
        /// Period of the upsert loop.
        sync_interval: Duration,
    },
}

impl Mode {
    /// Pick the mode: a non-empty kubelet registration path selects the
    /// handshake.
    pub fn select(
        kubelet_registration_path: Option<&str>,
        registration_dir: PathBuf,
        kubeconfig: Option<PathBuf>,
        sync_interval: Duration,
    ) -> Self {
        match kubelet_registration_path {
            Some(endpoint) if !endpoint.is_empty() => Mode::Handshake {
                endpoint: endpoint.to_owned(),
                registration_dir,
            },
            _ => Mode::Reconcile {
                kubeconfig,
                sync_interval,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrarConfig {
    /// Name of the node this registrar runs on.
    pub node_name: String,
    /// Address of the CSI driver socket.
    pub csi_address: String,
    /// How long to keep trying to reach the CSI driver at startup.
    pub connection_timeout: Duration,
    /// Conflict retry budget for node updates.
    pub retry: RetryPolicy,
    /// Plugin watcher API versions advertised in `GetInfo`.
    pub supported_versions: Vec<String>,
    pub mode: Mode,
}

impl RegistrarConfig {
    pub fn new(node_name: impl Into<String>, csi_address: impl Into<String>, mode: Mode) -> Self {
        Self {
            node_name: node_name.into(),
            csi_address: csi_address.into(),
            connection_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            supported_versions: default_supported_versions(),
            mode,
        }
    }

    /// Reject configurations the registrar cannot run with.
    pub fn validate(&self) -> Result<(), RegistrarError> {
        if self.node_name.is_empty() {
            return Err(RegistrarError::Config("node name must not be empty".into()));
        }
        if self.csi_address.is_empty() {
            return Err(RegistrarError::Config("CSI address must not be empty".into()));
        }
        match &self.mode {
            Mode::Handshake { registration_dir, .. } if registration_dir.as_os_str().is_empty() => {
                Err(RegistrarError::Config("registration directory must not be empty".into()))
            }
            Mode::Reconcile { sync_interval, .. } if sync_interval.is_zero() => {
                Err(RegistrarError::Config("sync interval must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Parse a duration such as `500ms`, `10s`, `2m` or `1h`. A bare number is
/// read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
    };
    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration {raw:?} out of range"))
}
