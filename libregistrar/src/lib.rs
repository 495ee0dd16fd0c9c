//! # libregistrar: CSI node driver registrar
//!
//! `libregistrar` announces a CSI driver running on a node to the rest of the
//! cluster. It learns the driver's identity over the driver's own gRPC socket
//! and then does one of two things:
//!
//! * serves the kubelet plugin registration handshake on a unix socket, or
//! * keeps the driver's entry in the node's driver map annotation up to date,
//!   removing it again when the process is told to stop.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Driver identity, the driver map, handshake payloads. |
//! | [`error`] | Error enums for every layer, plus the top-level [`RegistrarError`]. |
//! | [`annotation`] | Codec and pure edits for the driver map annotation. |
//! | [`retry`] | Backoff policy for conflicting node updates. |
//! | [`store`] | [`NodeStore`] trait with Kubernetes and in-memory backends. |
//! | [`reconciler`] | Optimistic-concurrency read-modify-write of the annotation. |
//! | [`identity`] | Driver name and node id from the CSI driver. |
//! | [`socket`] | Registration socket lifecycle and unix-socket gRPC channels. |
//! | [`registration`] | The plugin registration gRPC service and server. |
//! | [`config`] | Runtime configuration and mode selection. |
//! | [`proto`] | gRPC message and service definitions. |

pub mod annotation;
pub mod config;
pub mod error;
pub mod identity;
pub mod proto;
pub mod reconciler;
pub mod registration;
pub mod retry;
pub mod socket;
pub mod store;
pub mod types;

pub use config::{Mode, RegistrarConfig};
pub use error::RegistrarError;
pub use identity::{CsiConnection, IdentitySource, fetch_identity};
pub use reconciler::{EditOutcome, NodeAnnotationReconciler};
pub use registration::HandshakeServer;
pub use retry::RetryPolicy;
pub use store::{NodeRecord, NodeStore};
pub use types::*;
