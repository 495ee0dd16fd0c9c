//! Plugin registration handshake with the kubelet plugin watcher.
//!
//! The registrar serves `pluginregistration.Registration` on a unix socket in
//! the watcher's directory. The watcher calls `GetInfo` to learn who we are,
//! registers the driver, and reports the outcome through
//! `NotifyRegistrationStatus`. A failed registration stops the server with
//! [`RegistrarError::RegistrationFailed`]; the supervisor restarts us.

use std::future::Future;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument};

use crate::error::RegistrarError;
use crate::proto::pluginregistration as pb;
use crate::proto::pluginregistration::registration_server::{Registration, RegistrationServer};
use crate::types::{RegistrationInfo, RegistrationStatus};

/// Handler for the two handshake calls.
#[derive(Debug, Clone)]
pub struct RegistrationService {
    info: RegistrationInfo,
    failures: mpsc::Sender<String>,
}

impl RegistrationService {
    pub fn new(info: RegistrationInfo, failures: mpsc::Sender<String>) -> Self {
        Self { info, failures }
    }

    /// Record the watcher's verdict. Returns `false` when registration failed.
    pub fn observe(&self, status: &RegistrationStatus) -> bool {
        if status.registered {
            info!(driver = %self.info.name, "plugin watcher registered the driver");
            return true;
        }

        let reason = status.error.clone().unwrap_or_default();
        error!(driver = %self.info.name, error = %reason, "registration process failed");
        // Only the first failure matters; the server is already stopping.
        let _ = self.failures.try_send(reason);
        false
    }
}

#[tonic::async_trait]
impl Registration for RegistrationService {
    #[instrument(skip_all)]
    async fn get_info(
        &self,
        _request: Request<pb::InfoRequest>,
    ) -> Result<Response<pb::PluginInfo>, Status> {
        info!(driver = %self.info.name, endpoint = %self.info.endpoint, "received GetInfo call");
        Ok(Response::new(self.info.clone().into()))
    }

    #[instrument(skip_all)]
    async fn notify_registration_status(
        &self,
        request: Request<pb::RegistrationStatus>,
    ) -> Result<Response<pb::RegistrationStatusResponse>, Status> {
        let status = RegistrationStatus::from(request.into_inner());
        info!(registered = status.registered, "received NotifyRegistrationStatus call");
        self.observe(&status);
        Ok(Response::new(pb::RegistrationStatusResponse {}))
    }
}

/// Serves the handshake until shutdown or until registration fails.
#[derive(Debug, Clone)]
pub struct HandshakeServer {
    info: RegistrationInfo,
}

impl HandshakeServer {
    pub fn new(info: RegistrationInfo) -> Self {
        Self { info }
    }

    /// Serve on `listener`.
    ///
    /// Returns `Ok(())` once `shutdown` resolves and in-flight calls finish,
    /// and [`RegistrarError::RegistrationFailed`] as soon as the watcher
    /// reports a failed registration.
    pub async fn serve<F>(self, listener: UnixListener, shutdown: F) -> Result<(), RegistrarError>
    where
        F: Future<Output = ()> + Send,
    {
        let (failures_tx, mut failures_rx) = mpsc::channel(1);
        let service = RegistrationService::new(self.info, failures_tx);

        let server = Server::builder()
            .add_service(RegistrationServer::new(service))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown);

        tokio::select! {
            served = server => {
                served?;
                info!("registration server stopped");
                Ok(())
            }
            Some(error) = failures_rx.recv() => {
                Err(RegistrarError::RegistrationFailed { error })
            }
        }
    }
}
