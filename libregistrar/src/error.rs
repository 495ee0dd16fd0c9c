//! Registrar error types.
//!
//! Each layer has its own [`thiserror`] enum so callers can tell a version
//! conflict from a network failure, and a corrupt annotation from either.
//! [`RegistrarError`] is the top-level type returned to the binary, which
//! maps every variant to a non-zero exit code.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the annotation codec.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// The annotation is present but is not a flat JSON object of strings.
    ///
    /// Never treated as empty: doing so would drop other drivers' entries.
    #[error("annotation value {raw:?} is not a JSON map of driver names to node ids: {source}")]
    Corrupt {
        /// The offending annotation value, verbatim.
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory map could not be serialized.
    #[error("failed to encode driver map: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failures reported by a [`NodeStore`](crate::store::NodeStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write presented a stale version token.
    #[error("conflicting update to node {node}: {message}")]
    Conflict { node: String, message: String },

    /// The node record does not exist.
    #[error("node {0} not found")]
    NotFound(String),

    /// Any other API, network or permission failure.
    #[error("node store error: {0}")]
    Api(String),
}

impl StoreError {
    /// Whether the failure is a version conflict that may succeed when
    /// retried against fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Create a [`StoreError::Api`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn api<E: std::fmt::Display>(e: E) -> Self {
        Self::Api(e.to_string())
    }
}

/// Failures of one `apply_edit` call.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the node failed. Not retried at this layer.
    #[error("failed to get node {node}: {source}")]
    Fetch {
        node: String,
        #[source]
        source: StoreError,
    },

    /// Writing the node failed with something other than a conflict.
    #[error("failed to update node {node}: {source}")]
    Write {
        node: String,
        #[source]
        source: StoreError,
    },

    /// The annotation on the node could not be decoded or re-encoded.
    #[error("node {node} annotation {key}: {source}")]
    Annotation {
        node: String,
        key: String,
        #[source]
        source: AnnotationError,
    },

    /// Every attempt within the retry budget hit a version conflict.
    #[error("giving up on node {node} after {attempts} conflicting updates")]
    ConflictExhausted { node: String, attempts: u32 },
}

impl ReconcileError {
    /// Whether the error came from exhausting the conflict retry budget.
    pub fn is_conflict_exhausted(&self) -> bool {
        matches!(self, Self::ConflictExhausted { .. })
    }
}

/// Failures while learning the driver identity from the CSI driver.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The driver socket never became reachable.
    #[error("failed to connect to CSI driver at {address} within {timeout:?}: {reason}")]
    Connect {
        address: String,
        timeout: Duration,
        reason: String,
    },

    /// An identity call did not finish in time.
    #[error("{call} timed out after {timeout:?}")]
    Timeout {
        call: &'static str,
        timeout: Duration,
    },

    /// The driver answered an identity call with an error.
    #[error("{call} failed: {status}")]
    Rpc {
        call: &'static str,
        status: tonic::Status,
    },

    /// The driver answered with an empty value.
    #[error("{0} returned an empty value")]
    Empty(&'static str),
}

/// Failures while preparing or binding the registration socket.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to stat socket {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Something other than a socket occupies the path.
    #[error("{} exists and is not a socket", .path.display())]
    NotASocket { path: PathBuf },

    #[error("failed to remove stale socket {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on socket {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error: every variant ends the process with a non-zero status.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The registration server stopped serving.
    #[error("registration server stopped serving: {0}")]
    Serve(#[from] tonic::transport::Error),

    /// The plugin watcher reported that registration failed. The process is
    /// expected to exit and be restarted by its supervisor.
    #[error("registration process failed with error: {error}")]
    RegistrationFailed { error: String },

    /// Invalid or missing configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
