//! csi-registrar: announces a CSI driver to the kubelet or the node object.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use libregistrar::error::ReconcileError;
use libregistrar::identity::CSI_CALL_TIMEOUT;
use libregistrar::socket::{prepare_registration_socket, registration_socket_path};
use libregistrar::store::KubeNodeStore;
use libregistrar::{
    CsiConnection, EditOutcome, HandshakeServer, Mode, NodeAnnotationReconciler, RegistrarConfig,
    RegistrarError, RegistrationInfo, fetch_identity,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.log_filter());
    info!(version = env!("CARGO_PKG_VERSION"), "starting csi-registrar");

    match run(cli.into_config()).await {
        Ok(finished) => {
            if let Finished::Handshake(Err(e)) = &finished {
                error!(error = %e, "registration server stopped");
            }
            ExitCode::from(finished.exit_status())
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// How a run that got past startup ended.
#[derive(Debug)]
enum Finished {
    /// The handshake server returned.
    Handshake(Result<(), RegistrarError>),
    /// The shutdown removal of reconcile mode ran. Its outcome is already
    /// logged by the reconciler.
    Reconcile(Result<EditOutcome, ReconcileError>),
}

impl Finished {
    /// Process exit status. Only a graceful handshake shutdown exits 0; an
    /// interrupted reconciler exits 1 even when the removal succeeded.
    fn exit_status(&self) -> u8 {
        match self {
            Finished::Handshake(Ok(())) => 0,
            Finished::Handshake(Err(_)) | Finished::Reconcile(_) => 1,
        }
    }
}

fn init_tracing(format: LogFormat, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: RegistrarConfig) -> anyhow::Result<Finished> {
    config.validate()?;
    info!(
        node = %config.node_name,
        csi_address = %config.csi_address,
        timeout = ?config.connection_timeout,
        "connecting to CSI driver"
    );

    let connection = CsiConnection::connect(&config.csi_address, config.connection_timeout).await?;
    let identity = fetch_identity(&connection, CSI_CALL_TIMEOUT)
        .await
        .context("failed to learn CSI driver identity")?;
    drop(connection);

    match config.mode {
        Mode::Handshake {
            endpoint,
            registration_dir,
        } => {
            let info =
                RegistrationInfo::for_csi_driver(&identity.name, &endpoint, &config.supported_versions);
            let path = registration_socket_path(&registration_dir, &identity.name);
            let listener = prepare_registration_socket(&path)
                .with_context(|| format!("failed to prepare registration socket {}", path.display()))?;
            let served = HandshakeServer::new(info)
                .serve(listener, shutdown_signal())
                .await;
            Ok(Finished::Handshake(served))
        }
        Mode::Reconcile {
            kubeconfig,
            sync_interval,
        } => {
            let store = KubeNodeStore::connect(kubeconfig.as_deref())
                .await
                .context("failed to build Kubernetes client")?;
            let reconciler =
                Arc::new(NodeAnnotationReconciler::new(store).with_retry(config.retry));
            let removed = reconciler
                .run_until(config.node_name, identity, sync_interval, shutdown_signal())
                .await;
            Ok(Finished::Reconcile(removed))
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
}
