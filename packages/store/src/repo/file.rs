//! One gzipped snapshot file per document under a data directory.
//!
//! Writes go to a temp file first and are renamed into place, so a crash
//! mid-write leaves the previous snapshot intact.

use super::{DocumentId, RepoError, SnapshotRepo};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileRepo {
    dir: PathBuf,
}

impl FileRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &DocumentId) -> Result<PathBuf, RepoError> {
        let valid = !id.as_str().is_empty()
            && id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RepoError::InvalidId(id.clone()));
        }
        Ok(self.dir.join(format!("{id}.json.gz")))
    }
}

#[async_trait]
impl SnapshotRepo for FileRepo {
    async fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, RepoError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(blob) => {
                tracing::debug!("Read snapshot {} ({} bytes)", path.display(), blob.len());
                Ok(Some(blob))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, id: &DocumentId, blob: Vec<u8>) -> Result<(), RepoError> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("gz.tmp");

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Wrote snapshot {} ({} bytes)", path.display(), blob.len());
        Ok(())
    }
}
