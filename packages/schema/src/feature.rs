//! # Features
//!
//! A feature is a node in the document's feature tree. The same type is
//! used for full stored values and for partial patches: a patch is simply
//! a feature whose unmentioned fields are [`Field::Unspecified`].

use crate::Field;
use serde::{Deserialize, Serialize};

/// Id of the implicit, permanent root feature
pub const ROOT_ID: &str = "";

/// A feature value or patch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,

    /// Id of the parent feature
    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub parent: Field<String>,

    /// Order key among siblings
    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub idx: Field<String>,

    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub name: Field<String>,

    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub color: Field<String>,

    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub hidden: Field<bool>,

    /// GeoJSON geometry, opaque to the store
    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub geometry: Field<serde_json::Value>,
}

impl Feature {
    /// Empty patch for `id` (every field unspecified)
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Patch placing `id` under `parent` at `idx`, as required for additions
    pub fn placed(id: impl Into<String>, parent: impl Into<String>, idx: impl Into<String>) -> Self {
        Self::new(id).with_parent(parent).with_idx(idx)
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Field::Set(parent.into());
        self
    }

    pub fn with_idx(mut self, idx: impl Into<String>) -> Self {
        self.idx = Field::Set(idx.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Field::Set(name.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Field::Set(color.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Field::Set(hidden);
        self
    }

    pub fn with_geometry(mut self, geometry: serde_json::Value) -> Self {
        self.geometry = Field::Set(geometry);
        self
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// True if the patch would not change anything
    pub fn is_noop(&self) -> bool {
        self.parent.is_unspecified()
            && self.idx.is_unspecified()
            && self.name.is_unspecified()
            && self.color.is_unspecified()
            && self.hidden.is_unspecified()
            && self.geometry.is_unspecified()
    }

    /// Merge an incoming patch field by field
    ///
    /// The id is left untouched; callers check ids match before merging.
    pub fn merge(&mut self, incoming: &Feature) {
        self.parent.merge(&incoming.parent);
        self.idx.merge(&incoming.idx);
        self.name.merge(&incoming.name);
        self.color.merge(&incoming.color);
        self.hidden.merge(&incoming.hidden);
        self.geometry.merge(&incoming.geometry);
    }
}
