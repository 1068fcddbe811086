//! Services
//!
//! Async wrappers that load documents from the store, run the pure quest
//! engine and write the results back. Mutations of one user are serialized
//! through [`UserLocks`].

pub mod admin;
pub mod backup;
pub mod quest;
pub mod users;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use admin::AdminService;
pub use backup::BackupService;
pub use quest::QuestService;
pub use users::{AssignmentAction, UserService};

/// Per-user write locks shared by every service touching user documents.
/// An entry lives only while someone holds or waits for it.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one user's documents
    pub async fn lock(&self, user_id: &str) -> UserGuard<'_> {
        let mutex = self.locks.entry(user_id.to_string()).or_default().clone();
        UserGuard {
            guard: Some(mutex.lock_owned().await),
            locks: self,
            user_id: user_id.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one user; drops the map entry once nobody else needs it
pub struct UserGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a UserLocks,
    user_id: String,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own reference is the last one
        self.locks
            .locks
            .remove_if(&self.user_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
