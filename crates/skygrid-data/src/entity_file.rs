//! Entity snapshot sidecar files (gzip-compressed JSON).
//!
//! Blocks go through the schematic capability; entities are captured
//! separately so named and typed state (professions, trades) survives.

use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use skygrid_api::EntitySnapshot;

use crate::error::DataError;

pub fn write_entities(path: &Path, entities: &[EntitySnapshot]) -> Result<(), DataError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec(entities)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    std::fs::write(path, encoder.finish()?)?;
    Ok(())
}

/// `Ok(None)` when no snapshot was ever written for this slot.
pub fn read_entities(path: &Path) -> Result<Option<Vec<EntitySnapshot>>, DataError> {
    let compressed = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
    Ok(Some(serde_json::from_slice(&json)?))
}
