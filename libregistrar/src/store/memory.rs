//! In-process [`NodeStore`] with the same optimistic-concurrency contract as
//! the API server: every successful write bumps the version, and a write that
//! presents an older version is rejected with [`StoreError::Conflict`].
//!
//! It also lets tests interleave foreign writers and inject failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{NodeRecord, NodeStore};
use crate::error::StoreError;

type Interleaved = Box<dyn FnOnce(&mut BTreeMap<String, String>) + Send>;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, (NodeRecord, u64)>,
    /// Writes applied by "another writer" just before the next update lands.
    interleaved: VecDeque<Interleaved>,
    /// Errors returned by upcoming updates, in order.
    failures: VecDeque<StoreError>,
}

/// Node records held in memory.
#[derive(Default)]
pub struct MemoryNodeStore {
    inner: Mutex<Inner>,
    gets: AtomicUsize,
    update_attempts: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace node `name` with the given annotations.
    pub fn insert_node(&self, name: &str, annotations: Option<BTreeMap<String, String>>) {
        let mut inner = self.lock();
        let version = inner.nodes.get(name).map_or(1, |(_, v)| v + 1);
        let record = NodeRecord {
            name: name.to_owned(),
            annotations,
            resource_version: Some(version.to_string()),
        };
        inner.nodes.insert(name.to_owned(), (record, version));
    }

    /// Current record for `name`, without counting as a read.
    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.lock().nodes.get(name).map(|(record, _)| record.clone())
    }

    /// Current value of annotation `key` on `name`.
    pub fn annotation(&self, name: &str, key: &str) -> Option<String> {
        self.node(name)
            .and_then(|record| record.annotation(key).map(str::to_owned))
    }

    /// Have another writer modify the node's annotations right before the
    /// next update is checked, so that update sees a stale version.
    pub fn interleave_write<F>(&self, write: F)
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send + 'static,
    {
        self.lock().interleaved.push_back(Box::new(write));
    }

    /// Make the next `count` updates fail with a version conflict caused by
    /// a foreign writer that leaves the annotations untouched.
    pub fn inject_conflicts(&self, count: usize) {
        for _ in 0..count {
            self.interleave_write(|_| {});
        }
    }

    /// Make the next update fail with `err` without touching the node.
    pub fn fail_next_update(&self, err: StoreError) {
        self.lock().failures.push_back(err);
    }

    /// Number of `get` calls served.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `update` calls received, successful or not.
    pub fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    /// Number of updates that were applied.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, name: &str) -> Result<NodeRecord, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.node(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    async fn update(&self, record: &NodeRecord) -> Result<NodeRecord, StoreError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();

        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }

        if let Some(write) = inner.interleaved.pop_front()
            && let Some((stored, version)) = inner.nodes.get_mut(&record.name)
        {
            let mut annotations = stored.annotations.take().unwrap_or_default();
            write(&mut annotations);
            stored.annotations = Some(annotations);
            *version += 1;
            stored.resource_version = Some(version.to_string());
        }

        let Some((stored, version)) = inner.nodes.get_mut(&record.name) else {
            return Err(StoreError::NotFound(record.name.clone()));
        };
        if record.resource_version != stored.resource_version {
            return Err(StoreError::Conflict {
                node: record.name.clone(),
                message: format!(
                    "version {:?} is stale, node is at {:?}",
                    record.resource_version, stored.resource_version
                ),
            });
        }

        *version += 1;
        stored.annotations = record.annotations.clone();
        stored.resource_version = Some(version.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}
