//! # Changesets
//!
//! A changeset is one logical transaction against a document: feature
//! deletions, feature additions, and field patches for features and
//! layers. The same shape doubles as a full-state snapshot and as the
//! store's corrective "fixes".
//!
//! ## Ordering
//!
//! Additions are ordered. When a batch creates a subtree, parents must be
//! listed before their children; recording adds in the order they happened
//! is enough. Duplicate additions are ignored.

use crate::{Feature, Layer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Changeset {
    /// Features to delete (with their subtrees)
    #[serde(rename = "fdelete", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deletions: BTreeSet<String>,

    /// Features to create, in creation order
    #[serde(
        rename = "fadd",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_unique"
    )]
    pub additions: Vec<String>,

    /// Feature patches by id (full values for additions)
    #[serde(rename = "fset", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, Feature>,

    /// Layer patches by id
    #[serde(rename = "lset", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layers: BTreeMap<String, Layer>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.additions.is_empty()
            && self.features.is_empty()
            && self.layers.is_empty()
    }

    pub fn with_deletion(mut self, id: impl Into<String>) -> Self {
        self.deletions.insert(id.into());
        self
    }

    /// Record a new feature; `feature` must carry its parent and idx
    pub fn with_addition(mut self, feature: Feature) -> Self {
        self.push_addition(feature.id.clone());
        self.merge_feature(feature);
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.merge_feature(feature);
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.merge_layer(layer);
        self
    }

    /// Additions with duplicates removed, first occurrence wins
    pub fn unique_additions(&self) -> impl Iterator<Item = &str> {
        let mut seen = HashSet::new();
        self.additions
            .iter()
            .map(String::as_str)
            .filter(move |id| seen.insert(*id))
    }

    fn push_addition(&mut self, id: String) {
        if !self.additions.contains(&id) {
            self.additions.push(id);
        }
    }

    fn merge_feature(&mut self, feature: Feature) {
        match self.features.get_mut(&feature.id) {
            Some(existing) => existing.merge(&feature),
            None => {
                self.features.insert(feature.id.clone(), feature);
            }
        }
    }

    fn merge_layer(&mut self, layer: Layer) {
        match self.layers.get_mut(&layer.id) {
            Some(existing) => existing.merge(&layer),
            None => {
                self.layers.insert(layer.id.clone(), layer);
            }
        }
    }

    /// Fold `incoming` into this changeset
    ///
    /// Deletions and additions are unioned; patches for the same id are
    /// merged field by field with `incoming` taking precedence.
    pub fn merge(&mut self, incoming: Changeset) {
        self.deletions.extend(incoming.deletions);
        for id in incoming.additions {
            self.push_addition(id);
        }
        for (id, feature) in incoming.features {
            match self.features.get_mut(&id) {
                Some(existing) => existing.merge(&feature),
                None => {
                    self.features.insert(id, feature);
                }
            }
        }
        for (id, layer) in incoming.layers {
            match self.layers.get_mut(&id) {
                Some(existing) => existing.merge(&layer),
                None => {
                    self.layers.insert(id, layer);
                }
            }
        }
    }
}

/// Merge an optional correction into an optional accumulator
pub fn merge_fixes(acc: &mut Option<Changeset>, fix: Option<Changeset>) {
    if let Some(fix) = fix {
        match acc {
            Some(existing) => existing.merge(fix),
            None => *acc = Some(fix),
        }
    }
}

fn serialize_unique<S: Serializer>(additions: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seen = HashSet::new();
    serializer.collect_seq(additions.iter().filter(|id| seen.insert(id.as_str())))
}
