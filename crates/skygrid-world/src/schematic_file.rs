//! Schematic file format: gzip-compressed JSON with a block palette.
//!
//! Block positions are stored relative to the paste origin so a file can
//! be pasted at any island centre.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use skygrid_api::EntitySnapshot;
use thiserror::Error;

/// Current file format version.
pub const SCHEMATIC_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SchematicFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed schematic: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported schematic version {0}")]
    UnsupportedVersion(u32),

    #[error("palette index {index} out of range ({len} entries)")]
    BadPalette { index: u32, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchematicFile {
    pub version: u32,
    pub palette: Vec<String>,
    /// `[dx, dy, dz, palette index]`
    pub blocks: Vec<[i32; 4]>,
    #[serde(default)]
    pub entities: Vec<EntitySnapshot>,
}

impl SchematicFile {
    pub fn new() -> Self {
        Self {
            version: SCHEMATIC_VERSION,
            ..Default::default()
        }
    }

    /// Build from `(offset, block name)` pairs.
    pub fn from_blocks<'a, I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = ((i32, i32, i32), &'a str)>,
    {
        let mut file = Self::new();
        let mut index: HashMap<&str, u32> = HashMap::new();
        for ((dx, dy, dz), name) in blocks {
            let id = *index.entry(name).or_insert_with(|| {
                file.palette.push(name.to_string());
                (file.palette.len() - 1) as u32
            });
            file.blocks.push([dx, dy, dz, id as i32]);
        }
        file.blocks.sort_unstable();
        file
    }

    /// Resolve palette indices back to `(offset, block name)`.
    pub fn resolved(&self) -> Result<Vec<((i32, i32, i32), &str)>, SchematicFileError> {
        self.blocks
            .iter()
            .map(|[dx, dy, dz, id]| {
                self.palette
                    .get(*id as usize)
                    .map(|name| ((*dx, *dy, *dz), name.as_str()))
                    .ok_or(SchematicFileError::BadPalette {
                        index: *id as u32,
                        len: self.palette.len(),
                    })
            })
            .collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn save(&self, path: &Path) -> Result<(), SchematicFileError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let tmp = path.with_extension("schem.tmp");
        std::fs::write(&tmp, encoder.finish()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SchematicFileError> {
        let compressed = std::fs::read(path)?;
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
        let file: Self = serde_json::from_slice(&json)?;
        if file.version != SCHEMATIC_VERSION {
            return Err(SchematicFileError::UnsupportedVersion(file.version));
        }
        // Catch bad palette references at load time rather than mid-paste.
        file.resolved()?;
        Ok(file)
    }
}
