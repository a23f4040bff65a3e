//! # Document Registry
//!
//! Holds exactly one [`Store`] per open document and owns the persistence
//! schedule around them.
//!
//! ```text
//! update(id) ──► slot(id) ──► load from repo on first use (outside the map lock)
//!                   │
//!                   ▼
//!              Arc<Store> ──► update ──► fixes / error (logged)
//!
//! saver task: every save_interval ──► save_all ──► failures stay dirty
//! ```
//!
//! ## Eviction
//!
//! Updates go through a per-document gate held shared; eviction holds it
//! exclusively across the final save. An update that arrives meanwhile
//! waits, finds the slot evicted, and retries against a fresh load, which
//! already contains everything the final save wrote.
//!
//! A store that hits a fatal error is dropped without saving, so the next
//! request reloads it from the last good snapshot.

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::repo::{DocumentId, FileRepo, SnapshotRepo};
use crate::store::Store;
use mapsync_schema::Changeset;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Registry entry for one document
#[derive(Default)]
struct Slot {
    store: OnceCell<Arc<Store>>,

    /// Shared by updates, exclusive during an eviction's final save
    gate: RwLock<()>,

    /// Set once the slot has left the map; holders must start over
    evicted: AtomicBool,
}

impl Slot {
    fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }
}

pub struct DocumentRegistry {
    repo: Arc<dyn SnapshotRepo>,
    config: StoreConfig,
    slots: Mutex<HashMap<DocumentId, Arc<Slot>>>,
}

impl DocumentRegistry {
    pub fn new(repo: Arc<dyn SnapshotRepo>, config: StoreConfig) -> Self {
        Self {
            repo,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by snapshot files under the configured data dir
    pub fn with_file_repo(config: StoreConfig, cwd: &str) -> Self {
        let repo = FileRepo::new(config.get_data_dir(cwd));
        Self::new(Arc::new(repo), config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The store for `id`, loading it on first use
    pub async fn open(
        &self,
        id: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<Arc<Store>, StoreError> {
        let (_, store) = self.open_slot(id, cancel).await?;
        Ok(store)
    }

    /// The store for `id` if it's already loaded
    pub async fn get(&self, id: &DocumentId) -> Option<Arc<Store>> {
        let slot = self.slots.lock().await.get(id).cloned()?;
        slot.store.get().cloned()
    }

    /// Apply a client changeset to a document
    pub async fn update(
        &self,
        id: &DocumentId,
        change: &Changeset,
        cancel: &CancellationToken,
    ) -> Result<Option<Changeset>, StoreError> {
        loop {
            let (slot, store) = self.open_slot(id, cancel).await?;
            let _updating = slot.gate.read().await;
            if slot.is_evicted() {
                continue;
            }

            return match store.update(change) {
                Ok(Some(fixes)) => {
                    tracing::debug!(
                        "Changeset to {} needed fixes for {} features, {} layers, {} deletions",
                        id,
                        fixes.features.len(),
                        fixes.layers.len(),
                        fixes.deletions.len()
                    );
                    Ok(Some(fixes))
                }
                Ok(None) => Ok(None),
                Err(e) if e.is_fatal() => {
                    tracing::error!("Dropping document {} without saving: {}", id, e);
                    self.remove(id, &slot).await;
                    Err(e)
                }
                Err(e) => {
                    tracing::warn!("Rejected changeset to {}: {}", id, e);
                    Err(e)
                }
            };
        }
    }

    /// Save every dirty store, returning the ones that failed
    pub async fn save_all(&self, cancel: &CancellationToken) -> Vec<(DocumentId, StoreError)> {
        let stores: Vec<Arc<Store>> = self
            .slots
            .lock()
            .await
            .values()
            .filter_map(|slot| slot.store.get().cloned())
            .collect();

        let mut failures = Vec::new();
        for store in stores {
            match store.save(cancel).await {
                Ok(true) => tracing::debug!("Saved document {}", store.id()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to save document {}: {}", store.id(), e);
                    failures.push((store.id().clone(), e));
                }
            }
        }
        failures
    }

    /// Save and close a document
    ///
    /// Returns false if it wasn't open. Updates arriving during the final
    /// save wait for it and then land on a fresh load. If the final save
    /// fails the store stays open and dirty.
    pub async fn evict(
        &self,
        id: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let Some(slot) = self.slots.lock().await.get(id).cloned() else {
            return Ok(false);
        };

        let _evicting = slot.gate.write().await;
        if slot.is_evicted() {
            return Ok(false);
        }
        // A load still in flight finishes before the document can be closed
        let store = match slot.store.get_or_try_init(|| self.load(id, cancel)).await {
            Ok(store) => store.clone(),
            Err(e) => {
                self.remove(id, &slot).await;
                return Err(e);
            }
        };

        store.close()?;
        if let Err(e) = store.save(cancel).await {
            tracing::warn!("Keeping document {} open, final save failed: {}", id, e);
            store.reopen()?;
            return Err(e);
        }

        self.remove(id, &slot).await;
        tracing::info!("Evicted document {}", id);
        Ok(true)
    }

    /// Periodically save dirty stores until `cancel` fires
    ///
    /// Cancellation stops the loop without a final flush; call
    /// [`DocumentRegistry::save_all`] with a live token on shutdown.
    pub fn spawn_saver(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.save_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let failures = registry.save_all(&cancel).await;
                        if !failures.is_empty() {
                            tracing::warn!("Periodic save left {} documents dirty", failures.len());
                        }
                    }
                }
            }

            tracing::debug!("Saver stopped");
        })
    }

    /// Number of loaded documents
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| slot.store.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live slot and loaded store for `id`
    ///
    /// The map lock only covers finding or inserting the slot; loading
    /// happens through the slot's cell so other documents aren't held up.
    async fn open_slot(
        &self,
        id: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<(Arc<Slot>, Arc<Store>), StoreError> {
        loop {
            let slot = self
                .slots
                .lock()
                .await
                .entry(id.clone())
                .or_default()
                .clone();

            let store = match slot.store.get_or_try_init(|| self.load(id, cancel)).await {
                Ok(store) => store.clone(),
                Err(e) => {
                    self.remove(id, &slot).await;
                    return Err(e);
                }
            };

            if !slot.is_evicted() {
                return Ok((slot, store));
            }
        }
    }

    async fn load(
        &self,
        id: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<Arc<Store>, StoreError> {
        let store = match Store::load(id.clone(), self.repo.clone(), cancel).await {
            Ok(store) => store.with_compression(self.config.compression()),
            Err(e) => {
                tracing::error!("Failed to load document {}: {}", id, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Loaded document {} ({} features)",
            id,
            store.feature_count()?
        );
        Ok(Arc::new(store))
    }

    /// Take `slot` out of the map unless it has already been replaced
    async fn remove(&self, id: &DocumentId, slot: &Arc<Slot>) {
        slot.evicted.store(true, Ordering::SeqCst);
        let mut slots = self.slots.lock().await;
        if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(id);
        }
    }
}
