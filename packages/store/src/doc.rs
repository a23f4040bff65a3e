//! # Document State
//!
//! The unlocked state machine behind [`crate::Store`]: feature tree,
//! layers and tombstones, plus the changeset application algorithm.
//!
//! ## Update order
//!
//! ```text
//! deletions → additions (in given order) → remaining feature patches → layer patches
//! ```
//!
//! The unit of atomicity is a single feature or layer. If a changeset
//! fails partway, entities processed before the failure stay applied.
//!
//! An internal consistency fault marks the document faulted; every later
//! call is refused rather than working on a broken tree.
//!
//! The revision counter moves whenever an entity may have changed, including
//! entities applied before a failure. Rejected entities and no-op patches
//! leave it alone.

use crate::errors::StoreError;
use crate::layers::LayerSet;
use crate::tree::FeatureTree;
use mapsync_schema::{merge_fixes, Changeset, Feature, Layer, ROOT_ID};
use std::collections::HashSet;

#[derive(Debug)]
pub(crate) struct Doc {
    tree: FeatureTree,
    layers: LayerSet,
    fault: Option<String>,
    revision: u64,
}

impl Doc {
    /// Empty document holding only the root feature
    pub fn new() -> Self {
        Self {
            tree: FeatureTree::new(),
            layers: LayerSet::new(),
            fault: None,
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn tree(&self) -> &FeatureTree {
        &self.tree
    }

    pub fn layers(&self) -> &LayerSet {
        &self.layers
    }

    /// Apply a changeset, returning fixes for anything that had to change
    pub fn update(&mut self, change: &Changeset) -> Result<Option<Changeset>, StoreError> {
        self.check_fault()?;
        let result = self.apply(change);
        if let Err(StoreError::Internal(what)) = &result {
            self.fault = Some(what.clone());
        }
        result
    }

    fn apply(&mut self, change: &Changeset) -> Result<Option<Changeset>, StoreError> {
        if change.features.contains_key(ROOT_ID) {
            return Err(StoreError::RootMutation);
        }

        let mut fixes = self.tree.delete(&change.deletions)?;
        if !change.deletions.is_empty() {
            self.revision += 1;
        }

        let mut added = HashSet::new();
        for id in change.unique_additions() {
            let incoming = change
                .features
                .get(id)
                .ok_or_else(|| StoreError::MissingPatch(id.to_string()))?;
            check_feature_key(id, incoming)?;
            merge_fixes(&mut fixes, self.tree.upsert(true, incoming)?);
            self.revision += 1;
            added.insert(id);
        }

        for (id, incoming) in &change.features {
            if added.contains(id.as_str()) {
                continue;
            }
            check_feature_key(id, incoming)?;
            merge_fixes(&mut fixes, self.tree.upsert(false, incoming)?);
            if !incoming.is_noop() {
                self.revision += 1;
            }
        }

        for (id, incoming) in &change.layers {
            check_layer_key(id, incoming)?;
            let created = self.layers.get(id).is_none();
            merge_fixes(&mut fixes, self.layers.upsert(incoming)?);
            if created || !incoming.is_noop() {
                self.revision += 1;
            }
        }

        Ok(fixes)
    }

    /// Full-state changeset
    pub fn to_snapshot(&self) -> Result<Changeset, StoreError> {
        self.check_fault()?;
        let additions = self.tree.preorder()?;
        Ok(Changeset {
            deletions: self.tree.tombstones().clone(),
            additions,
            features: self
                .tree
                .features()
                .map(|feature| (feature.id.clone(), feature.clone()))
                .collect(),
            layers: self
                .layers
                .iter()
                .map(|layer| (layer.id.clone(), layer.clone()))
                .collect(),
        })
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        match &self.fault {
            Some(what) => Err(StoreError::Faulted(what.clone())),
            None => Ok(()),
        }
    }
}

fn check_feature_key(key: &str, incoming: &Feature) -> Result<(), StoreError> {
    if incoming.id != key {
        return Err(StoreError::IdMismatch {
            key: key.to_string(),
            id: incoming.id.clone(),
        });
    }
    Ok(())
}

fn check_layer_key(key: &str, incoming: &Layer) -> Result<(), StoreError> {
    if incoming.id != key {
        return Err(StoreError::IdMismatch {
            key: key.to_string(),
            id: incoming.id.clone(),
        });
    }
    Ok(())
}
