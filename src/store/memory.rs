use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreError;

use super::{DocumentStore, PutOptions};

/// Process-local store, used for tests and throwaway servers
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.documents
            .get(path)
            .map(|doc| doc.value().clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, body: Vec<u8>, options: PutOptions) -> Result<String, StoreError> {
        match self.documents.entry(path.to_string()) {
            Entry::Occupied(_) if !options.overwrite => {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
            Entry::Occupied(mut entry) => {
                entry.insert(body);
            }
            Entry::Vacant(entry) => {
                entry.insert(body);
            }
        }
        Ok(format!("memory://{}", path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut paths: Vec<String> = self
            .documents
            .iter()
            .filter(|doc| doc.key().starts_with(prefix))
            .map(|doc| doc.key().clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.documents.remove(path);
        Ok(())
    }
}
