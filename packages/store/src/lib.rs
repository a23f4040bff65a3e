//! # Mapsync Store
//!
//! Authoritative per-document state for collaborative map editing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ registry: one Store per open document       │
//! │  - Load on first use, periodic saves        │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ store: locked document + dirty tracking     │
//! │  - update / to_snapshot / save / load       │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ doc: feature tree + layers + tombstones     │
//! │  - Validate, apply, emit fixes              │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ repo: gzipped JSON snapshot per document    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Server authority**: clients apply the returned fixes over their own state
//! 2. **No renumbering**: order keys are fractional, collisions get a fresh key
//! 3. **Deletes win**: a deleted id is never reused
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mapsync_store::{Changeset, DocumentRegistry, Feature, StoreConfig};
//!
//! let registry = DocumentRegistry::with_file_repo(StoreConfig::load(".")?, ".");
//! let change = Changeset::new().with_addition(Feature::placed("f1", "", "O"));
//!
//! if let Some(fixes) = registry.update(&"doc-1".into(), &change, &cancel).await? {
//!     // broadcast fixes along with the change
//! }
//! ```

mod config;
mod doc;
mod errors;
mod layers;
mod registry;
pub mod repo;
mod snapshot;
mod store;
mod tree;

pub use config::{StoreConfig, DEFAULT_CONFIG_NAME};
pub use errors::StoreError;
pub use registry::DocumentRegistry;
pub use repo::{DocumentId, FileRepo, MemoryRepo, RepoError, SnapshotRepo};
pub use snapshot::{decode as decode_snapshot, encode as encode_snapshot, SnapshotError};
pub use store::Store;

pub use mapsync_schema::{Changeset, Feature, Field, Layer, ROOT_ID};
