use super::{DocumentId, RepoError, SnapshotRepo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-process repo, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryRepo {
    blobs: Mutex<HashMap<DocumentId, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored blob for `id`, if any
    pub fn blob(&self, id: &DocumentId) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(id).cloned()
    }

    pub fn insert(&self, id: DocumentId, blob: Vec<u8>) -> Result<(), RepoError> {
        self.lock()?.insert(id, blob);
        Ok(())
    }

    /// Make every following `set` fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<DocumentId, Vec<u8>>>, RepoError> {
        self.blobs
            .lock()
            .map_err(|_| RepoError::Unavailable("memory repo lock poisoned".to_string()))
    }
}

#[async_trait]
impl SnapshotRepo for MemoryRepo {
    async fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, RepoError> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn set(&self, id: &DocumentId, blob: Vec<u8>) -> Result<(), RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("writes disabled".to_string()));
        }
        self.lock()?.insert(id.clone(), blob);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
