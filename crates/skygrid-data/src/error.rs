//! Bookkeeping error types.

use std::path::PathBuf;

use skygrid_api::PlayerId;
use thiserror::Error;

use crate::coord::GridCoord;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid grid coordinate: {0:?}")]
    InvalidCoordinate(String),

    #[error("coordinate {0} is outside the grid")]
    OutOfBounds(GridCoord),

    #[error("coordinate {0} is already occupied")]
    CellOccupied(GridCoord),

    #[error("coordinate {0} is reserved")]
    CellReserved(GridCoord),

    #[error("player {player} already occupies {coord}")]
    AlreadyPlaced { player: PlayerId, coord: GridCoord },

    #[error("shrinking the grid would lock occupied coordinate {0}")]
    ShrinkWouldLock(GridCoord),

    #[error("slot {slot} not found for {player}")]
    SlotNotFound { player: PlayerId, slot: u32 },

    #[error("slot {slot} is outside 1..={max}")]
    SlotLimit { slot: u32, max: u32 },

    #[error("slot {0} is the active slot")]
    SlotActive(u32),

    #[error("failed to delete {path}: {source}")]
    FileDelete {
        path: PathBuf,
        source: std::io::Error,
    },
}
