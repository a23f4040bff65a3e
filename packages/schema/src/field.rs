//! # Tri-state Fields
//!
//! Every mutable attribute of a feature or layer is a [`Field`]. A patch
//! only carries the fields it wants to touch, so "not mentioned" and
//! "explicitly cleared" have to be distinguishable on the wire.
//!
//! ## Wire encoding
//!
//! ```text
//! Set(v)       → {"set": v}
//! Unset        → "unset"
//! Unspecified  → omitted by the owning entity ("unspecified" also accepted)
//! ```

use serde::{Deserialize, Serialize};

/// A field value that is either unspecified, set, or explicitly unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field<T> {
    /// No change requested (or never specified)
    Unspecified,

    /// Explicitly set to a value
    Set(T),

    /// Explicitly cleared back to the field default
    Unset,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unspecified
    }
}

impl<T> Field<T> {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Field::Unspecified)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Field::Set(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Field::Unset)
    }

    /// The value, if the field is in the Set state
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Field::Set(value) => Some(value),
            _ => None,
        }
    }

    /// Apply an incoming patch value onto this one
    ///
    /// Unspecified leaves `self` alone, Set replaces the value and Unset
    /// clears it.
    pub fn merge(&mut self, incoming: &Field<T>)
    where
        T: Clone,
    {
        match incoming {
            Field::Unspecified => {}
            Field::Set(value) => *self = Field::Set(value.clone()),
            Field::Unset => *self = Field::Unset,
        }
    }

    /// Effective value, with Unspecified/Unset reading as the default
    pub fn value_or_default(&self) -> T
    where
        T: Clone + Default,
    {
        self.as_set().cloned().unwrap_or_default()
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Set(value),
            None => Field::Unset,
        }
    }
}
