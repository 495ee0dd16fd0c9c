//! Read-modify-write of the driver map on a node record.
//!
//! Every edit is a full cycle: fetch the node, decode the annotation, apply
//! the edit, encode, and write back conditionally on the version that was
//! fetched. A version conflict restarts the cycle from a fresh read, up to
//! the [`RetryPolicy`] budget. There is no local lock: other registrars on
//! other nodes and control-plane actors edit the same object, and the store's
//! version check is the only arbiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::annotation::{self, DriverEdit};
use crate::error::ReconcileError;
use crate::retry::RetryPolicy;
use crate::store::{NodeRecord, NodeStore};
use crate::types::{ANNOTATION_KEY, DriverIdentity};

/// Default period of the upsert loop.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(120);

/// Result of a successful [`NodeAnnotationReconciler::apply_edit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The node already reflected the edit; nothing was written.
    Unchanged,
    /// The node was written. `attempts` counts cycles, including ones lost
    /// to conflicts.
    Updated { attempts: u32 },
}

/// Applies [`DriverEdit`]s to the driver map annotation of node records.
pub struct NodeAnnotationReconciler<S> {
    store: S,
    key: String,
    retry: RetryPolicy,
}

impl<S: NodeStore> NodeAnnotationReconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            key: ANNOTATION_KEY.to_owned(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the annotation key holding the driver map.
    #[must_use]
    pub fn with_annotation_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Make sure `identity` is recorded on `node_name`.
    pub async fn register(
        &self,
        node_name: &str,
        identity: &DriverIdentity,
    ) -> Result<EditOutcome, ReconcileError> {
        self.apply_edit(node_name, &DriverEdit::upsert(&identity.name, &identity.node_id))
            .await
    }

    /// Make sure `driver_name` is no longer recorded on `node_name`.
    pub async fn unregister(
        &self,
        node_name: &str,
        driver_name: &str,
    ) -> Result<EditOutcome, ReconcileError> {
        self.apply_edit(node_name, &DriverEdit::remove(driver_name))
            .await
    }

    /// Apply `edit` to the node's driver map, retrying on version conflicts.
    ///
    /// Fetch failures, corrupt annotations and non-conflict write failures
    /// are returned immediately. Running out of attempts while conflicting
    /// yields [`ReconcileError::ConflictExhausted`].
    #[instrument(skip_all, fields(node = node_name, driver = edit.driver()))]
    pub async fn apply_edit(
        &self,
        node_name: &str,
        edit: &DriverEdit,
    ) -> Result<EditOutcome, ReconcileError> {
        let budget = self.retry.budget();
        for attempt in 1..=budget {
            match self.cycle(node_name, edit).await {
                Ok(false) => return Ok(EditOutcome::Unchanged),
                Ok(true) => return Ok(EditOutcome::Updated { attempts: attempt }),
                Err(ReconcileError::Write { source, .. }) if source.is_conflict() => {
                    if attempt == budget {
                        break;
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(attempt, ?delay, error = %source, "node changed underneath us, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }

        error!(attempts = budget, "retry budget exhausted by conflicting updates");
        Err(ReconcileError::ConflictExhausted {
            node: node_name.to_owned(),
            attempts: budget,
        })
    }

    /// One fetch/decode/edit/encode/write pass. Returns whether a write
    /// happened.
    async fn cycle(&self, node_name: &str, edit: &DriverEdit) -> Result<bool, ReconcileError> {
        let node = self
            .store
            .get(node_name)
            .await
            .map_err(|source| {
                error!(error = %source, "failed to get latest version of node");
                ReconcileError::Fetch {
                    node: node_name.to_owned(),
                    source,
                }
            })?;

        let previous = node.annotation(&self.key);
        debug!(previous = ?previous, "current driver map");

        let mut drivers = annotation::decode(previous).map_err(|source| {
            error!(key = %self.key, value = ?previous, error = %source, "failed to parse node annotation");
            self.annotation_error(node_name, source)
        })?;

        if !edit.apply(&mut drivers) {
            debug!(key = %self.key, value = ?previous, "node annotation already up to date");
            return Ok(false);
        }

        let encoded = annotation::encode(&drivers)
            .map_err(|source| self.annotation_error(node_name, source))?;

        let updated = NodeRecord {
            name: node.name.clone(),
            annotations: Some(annotation::clone_with_annotation(
                node.annotations.as_ref(),
                &self.key,
                &encoded,
            )),
            resource_version: node.resource_version.clone(),
        };

        self.store
            .update(&updated)
            .await
            .map_err(|source| ReconcileError::Write {
                node: node_name.to_owned(),
                source,
            })?;

        match edit {
            DriverEdit::Upsert { name, node_id } => {
                info!(driver = %name, %node_id, "updated node annotation");
            }
            DriverEdit::Remove { name } => {
                info!(driver = %name, "removed driver from node annotation");
            }
        }
        Ok(true)
    }

    fn annotation_error(
        &self,
        node_name: &str,
        source: crate::error::AnnotationError,
    ) -> ReconcileError {
        ReconcileError::Annotation {
            node: node_name.to_owned(),
            key: self.key.clone(),
            source,
        }
    }

    /// Re-assert `identity` on `node_name` every `interval`, forever.
    ///
    /// Failures are logged and retried on the next tick; the identity is
    /// never re-fetched.
    pub async fn sync_loop(&self, node_name: &str, identity: &DriverIdentity, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.register(node_name, identity).await {
                error!(node = node_name, driver = %identity.name, error = %e, "failed to sync node annotation");
            }
        }
    }
}

impl<S: NodeStore + 'static> NodeAnnotationReconciler<S> {
    /// Run [`sync_loop`](Self::sync_loop) until `shutdown` resolves, then
    /// remove the driver from the node exactly once.
    ///
    /// The removal runs while any in-flight sync cycle is still going; the
    /// store's version check orders the two writers.
    pub async fn run_until<F>(
        self: Arc<Self>,
        node_name: String,
        identity: DriverIdentity,
        interval: Duration,
        shutdown: F,
    ) -> Result<EditOutcome, ReconcileError>
    where
        F: Future<Output = ()>,
    {
        let periodic = tokio::spawn({
            let this = Arc::clone(&self);
            let node_name = node_name.clone();
            let identity = identity.clone();
            async move { this.sync_loop(&node_name, &identity, interval).await }
        });

        shutdown.await;
        info!(node = %node_name, driver = %identity.name, "shutting down, removing driver from node");
        let removed = self.unregister(&node_name, &identity.name).await;
        periodic.abort();

        if let Err(e) = &removed {
            error!(node = %node_name, driver = %identity.name, error = %e, "failed to remove driver from node");
        }
        removed
    }
}
