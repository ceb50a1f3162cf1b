//! Grid coordinates and grid bounds.
//!
//! A grid coordinate names one island cell. Its world centre is
//! `coord * spacing * 2` on both axes, so neighbouring islands sit
//! `2 * spacing` blocks apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GridCoord {
    pub x: i32,
    pub z: i32,
}

impl GridCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// World block coordinates of this cell's island centre.
    pub fn world_center(&self, spacing: i32) -> (i32, i32) {
        (self.x * spacing * 2, self.z * spacing * 2)
    }

    /// Grid cell containing the given world block coordinates.
    pub fn from_world(x: i32, z: i32, spacing: i32) -> Self {
        let step = (spacing * 2).max(1);
        // Round to the nearest centre: a cell spans [centre - spacing, centre + spacing).
        Self {
            x: (x + spacing).div_euclid(step),
            z: (z + spacing).div_euclid(step),
        }
    }

    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

impl FromStr for GridCoord {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidCoordinate(s.to_string());
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);
        let (x, z) = inner.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse().map_err(|_| invalid())?;
        let z = z.trim().parse().map_err(|_| invalid())?;
        Ok(Self { x, z })
    }
}

impl TryFrom<String> for GridCoord {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GridCoord> for String {
    fn from(coord: GridCoord) -> Self {
        coord.to_string()
    }
}

/// Inclusive bounds of the usable grid. Anything outside is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl GridBounds {
    pub fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    pub fn contains(&self, coord: GridCoord) -> bool {
        (self.min_x..=self.max_x).contains(&coord.x) && (self.min_z..=self.max_z).contains(&coord.z)
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x + 1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max_z - self.min_z + 1).max(0) as u32
    }
}

impl Default for GridBounds {
    fn default() -> Self {
        Self::new(-10, 10, -10, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_parenthesised() {
        assert_eq!("3,-2".parse::<GridCoord>().unwrap(), GridCoord::new(3, -2));
        assert_eq!("(3,-2)".parse::<GridCoord>().unwrap(), GridCoord::new(3, -2));
        assert_eq!(" ( -1 , 7 ) ".parse::<GridCoord>().unwrap(), GridCoord::new(-1, 7));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("3".parse::<GridCoord>().is_err());
        assert!("a,b".parse::<GridCoord>().is_err());
        assert!("(1,2".parse::<GridCoord>().is_err());
    }

    #[test]
    fn display_is_storage_key() {
        assert_eq!(GridCoord::new(-4, 9).to_string(), "-4,9");
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&GridCoord::new(1, -1)).unwrap();
        assert_eq!(json, "\"1,-1\"");
        let back: GridCoord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GridCoord::new(1, -1));
    }

    #[test]
    fn world_center_and_back() {
        let spacing = 400;
        let coord = GridCoord::new(3, -2);
        assert_eq!(coord.world_center(spacing), (2400, -1600));
        assert_eq!(GridCoord::from_world(2400, -1600, spacing), coord);
        // Edges of the cell.
        assert_eq!(GridCoord::from_world(2000, -1999, spacing), coord);
        assert_eq!(GridCoord::from_world(2799, -1201, spacing), coord);
        assert_eq!(GridCoord::from_world(-1, -1, spacing), GridCoord::new(0, 0));
        assert_eq!(GridCoord::from_world(-401, 0, spacing), GridCoord::new(-1, 0));
    }

    #[test]
    fn bounds_are_inclusive() {
        let bounds = GridBounds::default();
        assert!(bounds.contains(GridCoord::new(10, -10)));
        assert!(!bounds.contains(GridCoord::new(11, 0)));
        assert_eq!(bounds.width(), 21);
        assert_eq!(bounds.height(), 21);
    }
}
