//! The registration handshake as the kubelet plugin watcher drives it.

use std::path::Path;
use std::time::Duration;

use libregistrar::proto::pluginregistration::registration_client::RegistrationClient;
use libregistrar::proto::pluginregistration::{InfoRequest, RegistrationStatus};
use libregistrar::socket::{self, prepare_registration_socket, registration_socket_path};
use libregistrar::{HandshakeServer, RegistrarError, RegistrationInfo, default_supported_versions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

const DRIVER: &str = "hostpath.csi.k8s.io";
const ENDPOINT: &str = "/var/lib/kubelet/plugins/csi-hostpath/csi.sock";

fn start(dir: &Path) -> (JoinHandle<Result<(), RegistrarError>>, oneshot::Sender<()>, std::path::PathBuf) {
    let path = registration_socket_path(dir, DRIVER);
    let listener = prepare_registration_socket(&path).unwrap();
    let info = RegistrationInfo::for_csi_driver(DRIVER, ENDPOINT, &default_supported_versions());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(HandshakeServer::new(info).serve(listener, async move {
        let _ = stop_rx.await;
    }));
    (server, stop_tx, path)
}

async fn client(path: &Path) -> RegistrationClient<Channel> {
    RegistrationClient::new(socket::connect(path).await.unwrap())
}

#[tokio::test]
async fn get_info_then_successful_registration() {
    let dir = tempfile::tempdir().unwrap();
    let (server, stop, path) = start(dir.path());
    let mut watcher = client(&path).await;

    let info = watcher.get_info(InfoRequest {}).await.unwrap().into_inner();
    assert_eq!(info.r#type, "CSIPlugin");
    assert_eq!(info.name, DRIVER);
    assert_eq!(info.endpoint, ENDPOINT);
    assert_eq!(info.supported_versions, vec!["0.2.0", "0.3.0"]);

    watcher
        .notify_registration_status(RegistrationStatus {
            plugin_registered: true,
            error: String::new(),
        })
        .await
        .unwrap();

    // Still serving after a successful registration.
    watcher.get_info(InfoRequest {}).await.unwrap();
    assert!(!server.is_finished());

    drop(watcher);
    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn failed_registration_stops_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _stop, path) = start(dir.path());
    let mut watcher = client(&path).await;

    // The ack may or may not make it out before the server stops.
    let _ = watcher
        .notify_registration_status(RegistrationStatus {
            plugin_registered: false,
            error: "plugin already registered".into(),
        })
        .await;

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(RegistrarError::RegistrationFailed { error }) => {
            assert_eq!(error, "plugin already registered");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn restart_replaces_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (first, stop, path) = start(dir.path());
    stop.send(()).unwrap();
    first.await.unwrap().unwrap();

    let (second, stop, _) = start(dir.path());
    let mut watcher = client(&path).await;
    assert_eq!(watcher.get_info(InfoRequest {}).await.unwrap().into_inner().name, DRIVER);

    drop(watcher);
    stop.send(()).unwrap();
    second.await.unwrap().unwrap();
}
