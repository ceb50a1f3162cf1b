//! Persistent bookkeeping: the island grid, player slots, relocation history,
//! relative home offsets and entity snapshot files.
//!
//! Everything here is plain data owned by a single authority. Stores mark
//! themselves dirty on mutation and hand out a [`repository::PendingFlush`]
//! so the caller decides where the write runs.

pub mod clock;
pub mod coord;
pub mod entity_file;
pub mod error;
pub mod grid;
pub mod homes;
pub mod relocation;
pub mod repository;
pub mod slot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coord::{GridBounds, GridCoord};
pub use error::DataError;
pub use grid::{CellStatus, GridCell, GridIndex, Reservation};
pub use homes::{capture_homes, restore_homes, HomeOffset, HomeSnapshot};
pub use relocation::{format_cooldown, RelocationLog, RelocationRecord};
pub use repository::{JsonFileRepository, MemoryRepository, PendingFlush, Repository};
pub use slot::{Slot, SlotDefaults, SlotFiles, SlotStore};
