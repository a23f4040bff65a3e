//! # Mapsync Schema
//!
//! Data model shared by map editors and the authoritative document store.
//!
//! ## Overview
//!
//! ```text
//! Field<T>   tri-state value: Unspecified | Set(v) | Unset
//!    ↓
//! Feature / Layer   entities made of fields, merged field by field
//!    ↓
//! Changeset  deletions + additions + feature/layer patches
//! ```
//!
//! Order keys are fractional indices (see [`frac_idx`]), so a new key can
//! always be placed between two neighbors without renumbering.

mod changeset;
mod feature;
mod field;
pub mod frac_idx;
mod layer;

pub use changeset::{merge_fixes, Changeset};
pub use feature::{Feature, ROOT_ID};
pub use field::Field;
pub use frac_idx::IdxError;
pub use layer::Layer;
