//! # Store
//!
//! The authoritative in-memory replica of one document.
//!
//! ## Concurrency
//!
//! A single mutex guards the document state. [`Store::update`] and
//! [`Store::to_snapshot`] run entirely under it; nothing does I/O while
//! holding it. [`Store::save`] only takes it to capture the snapshot, so
//! updates keep flowing while a write is in flight.
//!
//! Saves are serialized by a separate async lock. Dirtiness compares the
//! document revision with the last revision written: a save marks clean
//! only the revision it actually captured, so an update racing a save is
//! never lost.
//!
//! ## Lifecycle
//!
//! ```text
//! load → update* → save → … → close → save (final) → drop
//! ```
//!
//! A closed store refuses updates, so the final save captures everything
//! that was acknowledged.

use crate::doc::Doc;
use crate::errors::StoreError;
use crate::repo::{DocumentId, SnapshotRepo};
use crate::snapshot;
use flate2::Compression;
use mapsync_schema::{Changeset, Feature, Layer};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub struct Store {
    id: DocumentId,
    repo: Arc<dyn SnapshotRepo>,
    compression: Compression,
    state: Mutex<State>,
    save_lock: tokio::sync::Mutex<()>,
}

struct State {
    doc: Doc,

    /// Latest document revision known to be persisted
    saved_revision: u64,

    closed: bool,
}

impl Store {
    /// Load the document from its last snapshot
    ///
    /// A missing snapshot yields an empty document. A snapshot that can't
    /// be decoded, or that would need fixes to apply, is fatal.
    pub async fn load(
        id: DocumentId,
        repo: Arc<dyn SnapshotRepo>,
        cancel: &CancellationToken,
    ) -> Result<Self, StoreError> {
        let blob = tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            blob = repo.get(&id) => blob?,
        };

        let snapshot = match blob {
            Some(blob) => snapshot::decode(&blob)?,
            None => Changeset::new(),
        };

        let mut doc = Doc::new();
        match doc.update(&snapshot) {
            Ok(None) => {}
            Ok(Some(_)) => return Err(StoreError::FixesOnLoad),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Err(StoreError::RejectedSnapshot(Box::new(e))),
        }

        Ok(Self {
            id,
            repo,
            compression: Compression::default(),
            state: Mutex::new(State {
                saved_revision: doc.revision(),
                doc,
                closed: false,
            }),
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Set the gzip level used by [`Store::save`]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Apply a changeset
    ///
    /// Returns the corrective changeset when incoming data had to be
    /// altered (order key collisions, cycles, under-reported deletes).
    /// `Ok(None)` means the changeset was applied exactly as sent.
    pub fn update(&self, change: &Changeset) -> Result<Option<Changeset>, StoreError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(StoreError::Closed(self.id.to_string()));
        }
        state.doc.update(change)
    }

    /// Stop accepting updates ahead of a final save
    pub fn close(&self) -> Result<(), StoreError> {
        self.lock()?.closed = true;
        Ok(())
    }

    /// Accept updates again after a final save failed
    pub fn reopen(&self) -> Result<(), StoreError> {
        self.lock()?.closed = false;
        Ok(())
    }

    /// Full state as a changeset
    pub fn to_snapshot(&self) -> Result<Changeset, StoreError> {
        self.lock()?.doc.to_snapshot()
    }

    /// True if there are updates not yet persisted
    pub fn is_dirty(&self) -> Result<bool, StoreError> {
        let state = self.lock()?;
        Ok(state.doc.revision() != state.saved_revision)
    }

    /// Persist a snapshot if anything changed since the last save
    ///
    /// Returns whether a snapshot was written. On failure the store stays
    /// dirty so a retry writes the full state again.
    pub async fn save(&self, cancel: &CancellationToken) -> Result<bool, StoreError> {
        let _saving = self.save_lock.lock().await;

        let (snapshot, revision) = {
            let state = self.lock()?;
            if state.doc.revision() == state.saved_revision {
                return Ok(false);
            }
            (state.doc.to_snapshot()?, state.doc.revision())
        };

        let blob = snapshot::encode(&snapshot, self.compression)?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            written = self.repo.set(&self.id, blob) => written?,
        }

        let mut state = self.lock()?;
        state.saved_revision = state.saved_revision.max(revision);
        Ok(true)
    }

    /// Current value of a feature (the root is `""`)
    pub fn feature(&self, id: &str) -> Result<Option<Feature>, StoreError> {
        Ok(self.lock()?.doc.tree().get(id).cloned())
    }

    /// Ids of a feature's children, in order
    pub fn children(&self, id: &str) -> Result<Option<Vec<String>>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .doc
            .tree()
            .children(id)
            .map(|ids| ids.into_iter().map(str::to_string).collect()))
    }

    pub fn is_deleted(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.doc.tree().is_deleted(id))
    }

    /// Number of live features, root included
    pub fn feature_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.doc.tree().len())
    }

    pub fn layer(&self, id: &str) -> Result<Option<Layer>, StoreError> {
        Ok(self.lock()?.doc.layers().get(id).cloned())
    }

    /// Active layer ids in order
    pub fn layer_order(&self) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        Ok(state.doc.layers().ordered().into_iter().map(str::to_string).collect())
    }

    pub fn layer_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.doc.layers().len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("id", &self.id).finish_non_exhaustive()
    }
}
