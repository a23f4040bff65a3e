//! # Feature Tree
//!
//! Arena of feature nodes keyed by id. Each node remembers the slot it
//! occupies (parent id + order key) and maps its children's order keys to
//! their ids, so traversal and re-parenting are table lookups.
//!
//! ## Invariants
//!
//! - The root (`""`) always exists and never occupies a slot
//! - Every other node's slot parent exists, and the parent's child map
//!   points back at it under the same key
//! - Sibling keys are unique; collisions are repaired on insert
//! - A tombstoned id is never live again

use crate::errors::{internal, StoreError};
use mapsync_schema::{frac_idx, Changeset, Feature, Field, ROOT_ID};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

#[derive(Debug)]
struct Node {
    /// (parent id, order key) this node is filed under; None for the root
    slot: Option<(String, String)>,

    /// Order key → child id
    children: BTreeMap<String, String>,

    value: Feature,
}

#[derive(Debug)]
pub(crate) struct FeatureTree {
    nodes: HashMap<String, Node>,
    tombstones: BTreeSet<String>,
}

impl FeatureTree {
    pub fn new() -> Self {
        let root = Node {
            slot: None,
            children: BTreeMap::new(),
            value: Feature::new(ROOT_ID),
        };
        Self {
            nodes: HashMap::from([(ROOT_ID.to_string(), root)]),
            tombstones: BTreeSet::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.nodes.get(id).map(|node| &node.value)
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    /// Number of live features, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Child ids of `id` in order
    pub fn children(&self, id: &str) -> Option<Vec<&str>> {
        self.nodes
            .get(id)
            .map(|node| node.children.values().map(String::as_str).collect())
    }

    pub fn tombstones(&self) -> &BTreeSet<String> {
        &self.tombstones
    }

    /// Non-root ids in pre-order, children by key
    ///
    /// Parents always come before their children, so the result is a
    /// valid addition order.
    pub fn preorder(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| internal(format!("child {id:?} missing from tree")))?;
            if id != ROOT_ID {
                out.push(id.to_string());
            }
            stack.extend(node.children.values().rev().map(String::as_str));
        }
        if out.len() + 1 != self.nodes.len() {
            return Err(internal("tree has nodes unreachable from the root"));
        }
        Ok(out)
    }

    /// Non-root feature values
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.nodes
            .iter()
            .filter(|(id, _)| id.as_str() != ROOT_ID)
            .map(|(_, node)| &node.value)
    }

    /// Delete each requested feature with its subtree
    ///
    /// Returns a fix listing every deleted descendant the request didn't
    /// name. Unknown ids are only tombstoned.
    pub fn delete(&mut self, requested: &BTreeSet<String>) -> Result<Option<Changeset>, StoreError> {
        if requested.contains(ROOT_ID) {
            return Err(StoreError::RootMutation);
        }

        let mut unreported = BTreeSet::new();
        for id in requested {
            if !self.nodes.contains_key(id) {
                self.tombstones.insert(id.clone());
                continue;
            }

            self.detach(id)?;

            // Explicit stack: trees can be arbitrarily deep
            let mut stack = vec![id.clone()];
            while let Some(current) = stack.pop() {
                let node = self
                    .nodes
                    .remove(&current)
                    .ok_or_else(|| internal(format!("descendant {current:?} missing from tree")))?;
                stack.extend(node.children.into_values());
                if !requested.contains(&current) {
                    unreported.insert(current.clone());
                }
                self.tombstones.insert(current);
            }
        }

        if unreported.is_empty() {
            return Ok(None);
        }
        Ok(Some(Changeset {
            deletions: unreported,
            ..Default::default()
        }))
    }

    /// Add a new feature or merge a patch into an existing one
    ///
    /// Everything that can reject the patch is checked before the first
    /// mutation, so a failed patch leaves the feature untouched.
    pub fn upsert(&mut self, is_add: bool, incoming: &Feature) -> Result<Option<Changeset>, StoreError> {
        let id = incoming.id.as_str();
        self.validate(is_add, incoming)?;

        let mut fixes = Changeset::new();
        match self.nodes.get_mut(id) {
            Some(node) => node.value.merge(incoming),
            None => {
                self.nodes.insert(
                    id.to_string(),
                    Node {
                        slot: None,
                        children: BTreeMap::new(),
                        value: incoming.clone(),
                    },
                );
            }
        }

        let (mut parent, mut idx) = self.target(id)?;

        if self.node(id)?.value.idx.is_unset() {
            // Unset idx means "move to the front"
            idx = frac_idx::before_first(self.peer_keys(&parent, id)?).map_err(|e| internal(e.to_string()))?;
            self.node_mut(id)?.value.idx = Field::Set(idx.clone());
            fixes = fixes.with_feature(Feature::new(id).with_idx(idx.clone()));
        }

        if self.node(id)?.slot.as_ref() == Some(&(parent.clone(), idx.clone())) {
            return Ok(non_empty(fixes));
        }

        self.detach(id)?;

        if self.would_cycle(id, &parent)? {
            parent = ROOT_ID.to_string();
            idx = frac_idx::before_first(self.peer_keys(ROOT_ID, id)?).map_err(|e| internal(e.to_string()))?;
            let value = &mut self.node_mut(id)?.value;
            value.parent = Field::Set(parent.clone());
            value.idx = Field::Set(idx.clone());
            fixes = fixes.with_feature(Feature::placed(id, ROOT_ID, idx.clone()));
        }

        let siblings = &self.node(&parent)?.children;
        if siblings.contains_key(&idx) {
            idx = collision_fix(siblings, &idx)?;
            self.node_mut(id)?.value.idx = Field::Set(idx.clone());
            fixes = fixes.with_feature(Feature::new(id).with_idx(idx.clone()));
        }

        self.node_mut(&parent)?.children.insert(idx.clone(), id.to_string());
        self.node_mut(id)?.slot = Some((parent, idx));
        Ok(non_empty(fixes))
    }

    fn validate(&self, is_add: bool, incoming: &Feature) -> Result<(), StoreError> {
        let id = incoming.id.as_str();
        if incoming.is_root() {
            return Err(StoreError::RootMutation);
        }
        if incoming.parent.is_unset() {
            return Err(StoreError::UnsetStructural { id: id.to_string(), field: "parent" });
        }
        if let Field::Set(idx) = &incoming.idx {
            frac_idx::validate(idx).map_err(|source| StoreError::InvalidIdx {
                id: id.to_string(),
                source,
            })?;
        }
        if let Field::Set(parent) = &incoming.parent {
            if !self.nodes.contains_key(parent) {
                return Err(StoreError::DanglingParent {
                    id: id.to_string(),
                    parent: parent.clone(),
                });
            }
        }

        if !self.nodes.contains_key(id) {
            if self.is_deleted(id) {
                return Err(StoreError::DeletedFeature(id.to_string()));
            }
            if !is_add {
                return Err(StoreError::UnknownFeature(id.to_string()));
            }
            if !incoming.parent.is_set() || !incoming.idx.is_set() {
                return Err(StoreError::IncompleteFeature(id.to_string()));
            }
        }
        Ok(())
    }

    /// Parent and key the feature's value asks for
    fn target(&self, id: &str) -> Result<(String, String), StoreError> {
        let value = &self.node(id)?.value;
        let parent = value
            .parent
            .as_set()
            .ok_or_else(|| internal(format!("feature {id:?} has no parent")))?;
        let idx = value.idx.as_set().cloned().unwrap_or_default();
        Ok((parent.clone(), idx))
    }

    /// Keys of `parent`'s children other than `id`, in order
    fn peer_keys<'a>(&'a self, parent: &str, id: &'a str) -> Result<impl Iterator<Item = &'a str>, StoreError> {
        let children = &self.node(parent)?.children;
        Ok(children
            .iter()
            .filter(move |(_, child)| child.as_str() != id)
            .map(|(key, _)| key.as_str()))
    }

    /// Remove `id` from the child map of the parent it's filed under
    fn detach(&mut self, id: &str) -> Result<(), StoreError> {
        let Some((parent, idx)) = self.node_mut(id)?.slot.take() else {
            return Ok(());
        };
        let children = &mut self.node_mut(&parent)?.children;
        match children.remove(&idx) {
            Some(child) if child == id => Ok(()),
            _ => Err(internal(format!("feature {id:?} missing from parent {parent:?} at {idx:?}"))),
        }
    }

    fn would_cycle(&self, id: &str, parent: &str) -> Result<bool, StoreError> {
        if parent == id {
            return Ok(true);
        }
        if self.node(id)?.children.is_empty() {
            return Ok(false);
        }

        let mut current = parent;
        for _ in 0..self.nodes.len() {
            if current == id {
                return Ok(true);
            }
            match &self.node(current)?.slot {
                Some((next, _)) => current = next.as_str(),
                None => return Ok(false),
            }
        }
        Err(internal("parent chain does not reach the root"))
    }

    fn node(&self, id: &str) -> Result<&Node, StoreError> {
        self.nodes
            .get(id)
            .ok_or_else(|| internal(format!("feature {id:?} missing from tree")))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, StoreError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| internal(format!("feature {id:?} missing from tree")))
    }
}

/// Allocate a replacement for `colliding` just after it among `peers`
pub(crate) fn collision_fix<V>(peers: &BTreeMap<String, V>, colliding: &str) -> Result<String, StoreError> {
    let next = peers
        .range::<str, _>((Bound::Excluded(colliding), Bound::Unbounded))
        .next()
        .map(|(key, _)| key.as_str());
    frac_idx::between(Some(colliding), next).map_err(|e| internal(e.to_string()))
}

fn non_empty(fixes: Changeset) -> Option<Changeset> {
    if fixes.is_empty() {
        None
    } else {
        Some(fixes)
    }
}
