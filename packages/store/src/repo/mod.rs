//! # Snapshot Persistence
//!
//! The store only needs "get/set blob by document id" from its backend.
//! Blobs are opaque here; see [`crate::snapshot`] for the format.

mod file;
mod memory;

pub use file::FileRepo;
pub use memory::MemoryRepo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque document identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document id for this backend: {0}")]
    InvalidId(DocumentId),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Backend holding the latest snapshot of each document
#[async_trait]
pub trait SnapshotRepo: Send + Sync {
    /// Latest blob for `id`, or None if nothing was ever saved
    async fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, RepoError>;

    /// Replace the blob for `id`
    async fn set(&self, id: &DocumentId, blob: Vec<u8>) -> Result<(), RepoError>;
}
