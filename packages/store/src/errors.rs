//! Error types for the store

use mapsync_schema::IdxError;
use thiserror::Error;

use crate::repo::RepoError;
use crate::snapshot::SnapshotError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Addition {0:?} has no feature patch")]
    MissingPatch(String),

    #[error("Patch id {id:?} doesn't match its key {key:?}")]
    IdMismatch { key: String, id: String },

    #[error("Cannot change the root feature")]
    RootMutation,

    #[error("New feature {0:?} must have a parent and idx")]
    IncompleteFeature(String),

    #[error("Cannot unset {field} of feature {id:?}")]
    UnsetStructural { id: String, field: &'static str },

    #[error("Parent {parent:?} of feature {id:?} is not in the store")]
    DanglingParent { id: String, parent: String },

    #[error("Unrecognized feature {0:?} is not an addition")]
    UnknownFeature(String),

    #[error("Feature {0:?} has been deleted")]
    DeletedFeature(String),

    #[error("Invalid idx for {id:?}: {source}")]
    InvalidIdx {
        id: String,
        #[source]
        source: IdxError,
    },

    #[error("Internal consistency fault: {0}")]
    Internal(String),

    #[error("Store is faulted after an earlier consistency fault: {0}")]
    Faulted(String),

    #[error("Stored snapshot required fixes")]
    FixesOnLoad,

    #[error("Stored snapshot was rejected: {0}")]
    RejectedSnapshot(#[source] Box<StoreError>),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Document {0} is closed")]
    Closed(String),

    #[error("Persistence error: {0}")]
    Repo(#[from] RepoError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl StoreError {
    /// True for errors caused by the request rather than the store
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            StoreError::MissingPatch(_)
                | StoreError::IdMismatch { .. }
                | StoreError::RootMutation
                | StoreError::IncompleteFeature(_)
                | StoreError::UnsetStructural { .. }
                | StoreError::DanglingParent { .. }
                | StoreError::UnknownFeature(_)
                | StoreError::DeletedFeature(_)
                | StoreError::InvalidIdx { .. }
        )
    }

    /// True for errors after which the document can't be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Internal(_)
                | StoreError::Faulted(_)
                | StoreError::FixesOnLoad
                | StoreError::RejectedSnapshot(_)
                | StoreError::Poisoned
                | StoreError::Snapshot(_)
        )
    }
}

pub(crate) fn internal(what: impl Into<String>) -> StoreError {
    StoreError::Internal(what.into())
}
