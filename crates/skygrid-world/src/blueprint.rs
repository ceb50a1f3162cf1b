//! Built-in island blueprints.

use crate::schematic_file::SchematicFile;

/// Platform radius of the built-in blueprints.
const RADIUS: i32 = 3;

/// Home offset (relative to the island centre) a fresh blueprint gets.
pub const DEFAULT_HOME_OFFSET: (f64, f64, f64) = (0.5, 1.0, 0.5);

pub const NAMES: &[&str] = &["default", "desert"];

pub fn blueprint(name: &str) -> Option<SchematicFile> {
    let (top, under, feature) = match name {
        "default" => ("grass_block", "dirt", "oak_log"),
        "desert" => ("sand", "sandstone", "cactus"),
        _ => return None,
    };
    let mut blocks = Vec::new();
    for dx in -RADIUS..=RADIUS {
        for dz in -RADIUS..=RADIUS {
            blocks.push(((dx, 0, dz), top));
            blocks.push(((dx, -1, dz), under));
        }
    }
    blocks.push(((0, -2, 0), "bedrock"));
    blocks.push(((2, 1, 2), feature));
    blocks.push(((2, 2, 2), feature));
    Some(SchematicFile::from_blocks(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_blueprint_resolves() {
        for name in NAMES {
            let file = blueprint(name).unwrap();
            assert_eq!(file.block_count(), 7 * 7 * 2 + 3);
            file.resolved().unwrap();
        }
        assert!(blueprint("castle").is_none());
    }
}
