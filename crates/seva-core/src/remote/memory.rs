//! In-process remote store used by tests and local demos.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::{RemoteDocument, RemoteStore};

/// HashMap-backed [`RemoteStore`] with fault-injection hooks for retry and
/// reachability tests.
#[derive(Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<HashMap<String, BTreeMap<String, RemoteDocument>>>,
    offline: AtomicBool,
    fail_next: AtomicUsize,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming (un)reachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` data operations with a transport error, then
    /// recover. Pings are unaffected, so the store can look reachable while
    /// its data plane is flaky.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of documents currently stored in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Whether a collection holds no documents.
    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }

    /// Insert a document directly, bypassing fault injection (test setup).
    pub async fn seed(&self, collection: &str, doc: RemoteDocument) {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc);
    }

    fn check_offline(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }

    fn check_faults(&self) -> Result<()> {
        self.check_offline()?;
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if remaining > 0 {
            return Err(Error::Transport("injected transport failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn ping(&self) -> Result<()> {
        self.check_offline()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>> {
        self.check_faults()?;
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn upsert(&self, collection: &str, doc: &RemoteDocument) -> Result<()> {
        self.check_faults()?;
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<RemoteDocument>> {
        self.check_faults()?;
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .and_then(|docs| {
                docs.values()
                    .find(|doc| doc.field_str(field) == Some(value))
                    .cloned()
            }))
    }

    async fn list_since(
        &self,
        collection: &str,
        updated_since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>> {
        self.check_faults()?;
        let mut docs: Vec<RemoteDocument> = self
            .collections
            .lock()
            .await
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.updated_at > updated_since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        docs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        docs.truncate(limit);
        Ok(docs)
    }
}
