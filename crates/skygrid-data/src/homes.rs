//! Home points stored relative to the island centre.
//!
//! Homes are captured as offsets so they survive relocation: capturing
//! against centre C1 and restoring at C2 yields `C2 + (home - C1)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skygrid_api::Position;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeOffset {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl HomeOffset {
    pub fn capture(home: &Position, center: &Position) -> Self {
        Self {
            dx: home.x - center.x,
            dy: home.y - center.y,
            dz: home.z - center.z,
            yaw: home.yaw,
            pitch: home.pitch,
        }
    }

    pub fn apply(&self, center: &Position) -> Position {
        Position::new(center.x + self.dx, center.y + self.dy, center.z + self.dz)
            .with_rotation(self.yaw, self.pitch)
    }
}

/// Named homes of one slot, keyed by home name ("" is the default home).
pub type HomeSnapshot = BTreeMap<String, HomeOffset>;

pub fn capture_homes(homes: &BTreeMap<String, Position>, center: &Position) -> HomeSnapshot {
    homes
        .iter()
        .map(|(name, pos)| (name.clone(), HomeOffset::capture(pos, center)))
        .collect()
}

pub fn restore_homes(snapshot: &HomeSnapshot, center: &Position) -> BTreeMap<String, Position> {
    snapshot
        .iter()
        .map(|(name, offset)| (name.clone(), offset.apply(center)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_relative() {
        let c1 = Position::new(0.0, 120.0, 0.0);
        let c2 = Position::new(2400.0, 120.0, -1600.0);

        let mut homes = BTreeMap::new();
        homes.insert(String::new(), Position::new(3.5, 121.0, -2.5).with_rotation(90.0, 10.0));
        homes.insert("farm".to_string(), Position::new(-20.0, 64.0, 40.0));

        let snapshot = capture_homes(&homes, &c1);
        let restored = restore_homes(&snapshot, &c2);

        assert_eq!(restored.len(), 2);
        for (name, original) in &homes {
            let got = restored[name];
            assert_eq!(got.x, c2.x + (original.x - c1.x));
            assert_eq!(got.y, c2.y + (original.y - c1.y));
            assert_eq!(got.z, c2.z + (original.z - c1.z));
            assert_eq!(got.yaw, original.yaw);
            assert_eq!(got.pitch, original.pitch);
        }
    }

    #[test]
    fn same_centre_restores_absolute() {
        let center = Position::new(800.0, 120.0, 800.0);
        let home = Position::new(805.0, 125.0, 790.0);
        let offset = HomeOffset::capture(&home, &center);
        assert_eq!(offset.apply(&center), home);
    }

    #[test]
    fn empty_snapshot_restores_nothing() {
        let restored = restore_homes(&HomeSnapshot::new(), &Position::default());
        assert!(restored.is_empty());
    }
}
