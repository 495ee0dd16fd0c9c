//! Unix socket plumbing: the registration socket the plugin watcher discovers,
//! and gRPC channels over unix sockets.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, umask};
use tokio::net::{UnixListener, UnixStream};
use tonic::codegen::http::Uri;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::error::SocketError;

/// Path of the registration socket for `driver_name` inside `dir`.
pub fn registration_socket_path(dir: impl AsRef<Path>, driver_name: &str) -> PathBuf {
    dir.as_ref().join(format!("{driver_name}-reg.sock"))
}

/// Remove a socket left behind by a previous run.
///
/// A missing path is fine. Anything at the path that is not a socket is left
/// alone and reported as an error.
pub fn remove_stale_socket(path: &Path) -> Result<(), SocketError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(SocketError::Stat {
                path: path.to_owned(),
                source,
            });
        }
    };

    if !metadata.file_type().is_socket() {
        return Err(SocketError::NotASocket {
            path: path.to_owned(),
        });
    }

    std::fs::remove_file(path).map_err(|source| SocketError::Remove {
        path: path.to_owned(),
        source,
    })?;
    debug!(path = %path.display(), "removed stale socket");
    Ok(())
}

/// Listen on `path` with owner-only permissions.
///
/// The process umask is narrowed to `0077` for the duration of the bind and
/// restored afterwards.
pub fn bind_owner_only(path: &Path) -> Result<UnixListener, SocketError> {
    let previous = umask(Mode::from_bits_truncate(0o077));
    let bound = UnixListener::bind(path);
    umask(previous);

    let listener = bound.map_err(|source| SocketError::Bind {
        path: path.to_owned(),
        source,
    })?;
    info!(path = %path.display(), "listening on registration socket");
    Ok(listener)
}

/// Remove any stale socket at `path`, then bind a fresh one.
pub fn prepare_registration_socket(path: &Path) -> Result<UnixListener, SocketError> {
    remove_stale_socket(path)?;
    bind_owner_only(path)
}

/// Strip an optional `unix://` scheme from a socket address.
pub fn socket_path(address: &str) -> &Path {
    Path::new(address.strip_prefix("unix://").unwrap_or(address))
}

/// Open a gRPC channel to the unix socket at `path`.
///
/// The endpoint URI is a placeholder required by the transport; every
/// connection goes to `path`.
pub async fn connect(path: impl Into<PathBuf>) -> Result<Channel, tonic::transport::Error> {
    let path = path.into();
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = UnixStream::connect(path).await?;
                Ok::<_, io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
}
