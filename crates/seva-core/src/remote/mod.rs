//! Remote document store seam.
//!
//! The engine talks to the canonical store through [`RemoteStore`]; the HTTP
//! client is the production implementation and [`MemoryRemoteStore`] backs
//! tests and local demos.

mod http;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Wire-level document envelope exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Document identity within its collection
    pub id: String,
    /// Last mutation timestamp (unix ms)
    pub updated_at: i64,
    /// Writer's version counter
    pub version: i64,
    /// Device that authored the last write; used to skip re-importing
    /// documents this device just pushed
    pub origin_device: Option<String>,
    /// Full document body, including its sync metadata
    pub payload: Value,
}

impl RemoteDocument {
    /// Build an envelope from a serializable document.
    pub fn from_payload<T: Serialize>(
        id: impl Into<String>,
        updated_at: i64,
        version: i64,
        origin_device: Option<String>,
        body: &T,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            updated_at,
            version,
            origin_device,
            payload: serde_json::to_value(body)?,
        })
    }

    /// String value of a payload field, when present.
    #[must_use]
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Deserialize the payload into a typed document.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(Error::from)
    }
}

/// Canonical store reachable over a network: create/query/update by identity
/// and by arbitrary field filter, plus a reachability probe.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lightweight reachability check
    async fn ping(&self) -> Result<()>;

    /// Fetch a document by identity
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>>;

    /// Create or update a document by identity
    async fn upsert(&self, collection: &str, doc: &RemoteDocument) -> Result<()>;

    /// First document whose payload field equals the given value
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<RemoteDocument>>;

    /// Documents mutated strictly after `updated_since`, oldest first
    async fn list_since(
        &self,
        collection: &str,
        updated_since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>>;
}
