//! Document Store
//!
//! Path-keyed JSON blob storage with last-write-wins overwrite semantics.
//! The rest of the server only talks to storage through [`DocumentStore`].

pub mod memory;
pub mod paths;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Options for [`DocumentStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Replace an existing document instead of failing
    pub overwrite: bool,
}

impl PutOptions {
    pub const OVERWRITE: PutOptions = PutOptions { overwrite: true };
    pub const CREATE: PutOptions = PutOptions { overwrite: false };
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `StoreError::NotFound` if absent
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write a document and return its location
    async fn put(&self, path: &str, body: Vec<u8>, options: PutOptions) -> Result<String, StoreError>;

    /// Paths starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove a document; removing a missing path succeeds
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// Fetch and decode a JSON document
pub async fn get_json<T: DeserializeOwned>(store: &dyn DocumentStore, path: &str) -> Result<T, StoreError> {
    let bytes = store.get(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Like [`get_json`] but maps a missing document to `None`
pub async fn get_json_opt<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match get_json(store, path).await {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Encode and write a JSON document
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    path: &str,
    value: &T,
    options: PutOptions,
) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(path, bytes, options).await
}
