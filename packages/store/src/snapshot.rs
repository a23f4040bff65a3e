//! # Snapshot Codec
//!
//! A snapshot is a full-state [`Changeset`], JSON-encoded and gzipped.
//! The blob is opaque to the persistence layer.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mapsync_schema::Changeset;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(snapshot: &Changeset, level: Compression) -> Result<Vec<u8>, SnapshotError> {
    let json = serde_json::to_vec(snapshot)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), level);
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode(blob: &[u8]) -> Result<Changeset, SnapshotError> {
    let mut json = Vec::new();
    GzDecoder::new(blob).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}
