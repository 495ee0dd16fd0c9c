use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use libregistrar::config::parse_duration;
use libregistrar::{Mode, RegistrarConfig, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "csi-registrar", version)]
#[command(about = "Registers a CSI driver with the kubelet or the node object")]
pub struct Cli {
    /// Kubeconfig for out-of-cluster use; in-cluster configuration otherwise.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// How long to keep trying to reach the CSI driver at startup.
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    pub connection_timeout: Duration,

    /// Address of the CSI driver socket.
    #[arg(long, default_value = "/run/csi/socket")]
    pub csi_address: String,

    /// Driver socket path on the host, returned as the endpoint in
    /// `GetInfo`. An empty value maintains the node annotation instead of
    /// serving the kubelet plugin registration handshake.
    #[arg(long, default_value = "/var/lib/kubelet/plugins/csi-hostpath/csi.sock")]
    pub kubelet_registration_path: String,

    /// Directory watched by the kubelet plugin watcher.
    #[arg(long, default_value = "/registration")]
    pub registration_dir: PathBuf,

    /// Name of the node this registrar runs on.
    #[arg(long, env = "KUBE_NODE_NAME")]
    pub node_name: String,

    /// Period of the node annotation sync loop.
    #[arg(long, default_value = "2m", value_parser = parse_duration)]
    pub sync_interval: Duration,

    /// Attempts per node update before giving up on conflicts.
    #[arg(long, default_value_t = 5)]
    pub retry_attempts: u32,

    #[arg(long, default_value = "10ms", value_parser = parse_duration)]
    pub retry_initial_backoff: Duration,

    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub retry_max_backoff: Duration,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Verbosity level (0-4).
    #[arg(short, default_value_t = 0)]
    pub v: u8,
}

impl Cli {
    pub fn into_config(self) -> RegistrarConfig {
        let mode = Mode::select(
            Some(self.kubelet_registration_path.as_str()),
            self.registration_dir,
            self.kubeconfig,
            self.sync_interval,
        );
        let mut config = RegistrarConfig::new(self.node_name, self.csi_address, mode);
        config.connection_timeout = self.connection_timeout;
        config.retry = RetryPolicy {
            attempts: self.retry_attempts,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
            ..RetryPolicy::default()
        };
        config
    }

    /// Default log filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.v {
            0 => "info",
            1 => "csi_registrar=debug,libregistrar=debug,info",
            2 => "csi_registrar=trace,libregistrar=trace,info",
            _ => "trace",
        }
    }
}
