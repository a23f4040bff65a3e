//! Layer collection: every layer by id, plus the global order of the
//! active ones (those with a Set idx).

use crate::errors::{internal, StoreError};
use crate::tree::collision_fix;
use mapsync_schema::{frac_idx, Changeset, Field, Layer};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub(crate) struct LayerSet {
    layers: HashMap<String, Layer>,

    /// Order key → layer id
    order: BTreeMap<String, String>,
}

impl LayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Active layer ids in order
    pub fn ordered(&self) -> Vec<&str> {
        self.order.values().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Create or merge a layer, repairing order key collisions
    pub fn upsert(&mut self, incoming: &Layer) -> Result<Option<Changeset>, StoreError> {
        let id = incoming.id.as_str();
        if let Field::Set(idx) = &incoming.idx {
            frac_idx::validate(idx).map_err(|source| StoreError::InvalidIdx {
                id: id.to_string(),
                source,
            })?;
        }

        let prev_idx = match self.layers.get_mut(id) {
            Some(layer) => {
                let prev = layer.idx.as_set().cloned();
                layer.merge(incoming);
                prev
            }
            None => {
                self.layers.insert(id.to_string(), incoming.clone());
                None
            }
        };

        let layer = self
            .layers
            .get_mut(id)
            .ok_or_else(|| internal(format!("layer {id:?} vanished during upsert")))?;
        let next_idx = layer.idx.as_set().cloned();
        if prev_idx == next_idx {
            return Ok(None);
        }

        if let Some(prev) = &prev_idx {
            match self.order.remove(prev) {
                Some(owner) if owner == id => {}
                _ => return Err(internal(format!("layer {id:?} missing from order at {prev:?}"))),
            }
        }

        let Some(mut idx) = next_idx else {
            return Ok(None);
        };

        let mut fixes = None;
        if self.order.contains_key(&idx) {
            idx = collision_fix(&self.order, &idx)?;
            layer.idx = Field::Set(idx.clone());
            fixes = Some(Changeset::new().with_layer(Layer::new(id).with_idx(idx.clone())));
        }
        self.order.insert(idx, id.to_string());
        Ok(fixes)
    }
}
