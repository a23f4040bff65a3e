//! Display layers. Layers are flat: no parent, just a global order key.

use crate::Field;
use serde::{Deserialize, Serialize};

/// A layer value or patch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,

    /// Order key among all layers; a layer without one is inactive
    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub idx: Field<String>,

    #[serde(default, skip_serializing_if = "Field::is_unspecified")]
    pub opacity: Field<f64>,
}

impl Layer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_idx(mut self, idx: impl Into<String>) -> Self {
        self.idx = Field::Set(idx.into());
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Field::Set(opacity);
        self
    }

    pub fn is_active(&self) -> bool {
        self.idx.is_set()
    }

    /// True if the patch would not change anything
    pub fn is_noop(&self) -> bool {
        self.idx.is_unspecified() && self.opacity.is_unspecified()
    }

    pub fn merge(&mut self, incoming: &Layer) {
        self.idx.merge(&incoming.idx);
        self.opacity.merge(&incoming.opacity);
    }
}
