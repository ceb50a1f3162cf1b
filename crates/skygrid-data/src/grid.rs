//! Grid Index: which player owns which cell, and which cells are reserved.
//!
//! Cell status is never stored. It is derived from bounds and fields every
//! time it is asked for, so it cannot drift from the data behind it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skygrid_api::{IslandId, PlayerId};
use tracing::{info, warn};

use crate::coord::{GridBounds, GridCoord};
use crate::error::DataError;
use crate::repository::{PendingFlush, Repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Available,
    Occupied,
    Reserved,
    Locked,
}

impl CellStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CellStatus::Available => "available",
            CellStatus::Occupied => "occupied",
            CellStatus::Reserved => "reserved",
            CellStatus::Locked => "locked",
        }
    }
}

/// A reserved cell is either blocked outright or purchasable at a price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub blocked: bool,
    #[serde(default)]
    pub price: Option<f64>,
}

impl Reservation {
    pub fn purchase_price(&self) -> Option<f64> {
        if self.blocked {
            None
        } else {
            self.price
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub coord: GridCoord,
    #[serde(default)]
    pub owner: Option<PlayerId>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub island: Option<IslandId>,
    #[serde(default)]
    pub reservation: Option<Reservation>,
}

impl GridCell {
    fn empty(coord: GridCoord) -> Self {
        Self {
            coord,
            owner: None,
            owner_name: None,
            island: None,
            reservation: None,
        }
    }

    fn is_blank(&self) -> bool {
        self.owner.is_none() && self.island.is_none() && self.reservation.is_none()
    }

    pub fn status(&self, bounds: &GridBounds) -> CellStatus {
        if !bounds.contains(self.coord) {
            CellStatus::Locked
        } else if self.owner.is_some() {
            CellStatus::Occupied
        } else if self.reservation.is_some() {
            CellStatus::Reserved
        } else {
            CellStatus::Available
        }
    }
}

pub struct GridIndex {
    bounds: GridBounds,
    cells: HashMap<GridCoord, GridCell>,
    by_owner: HashMap<PlayerId, GridCoord>,
    by_island: HashMap<IslandId, GridCoord>,
    repo: Arc<dyn Repository<Vec<GridCell>>>,
    dirty: bool,
}

impl GridIndex {
    pub fn new(bounds: GridBounds, repo: Arc<dyn Repository<Vec<GridCell>>>) -> Self {
        Self {
            bounds,
            cells: HashMap::new(),
            by_owner: HashMap::new(),
            by_island: HashMap::new(),
            repo,
            dirty: false,
        }
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn status(&self, coord: GridCoord) -> CellStatus {
        match self.cells.get(&coord) {
            Some(cell) => cell.status(&self.bounds),
            None if self.bounds.contains(coord) => CellStatus::Available,
            None => CellStatus::Locked,
        }
    }

    pub fn cell(&self, coord: GridCoord) -> Option<&GridCell> {
        self.cells.get(&coord)
    }

    fn cell_mut(&mut self, coord: GridCoord) -> &mut GridCell {
        self.cells
            .entry(coord)
            .or_insert_with(|| GridCell::empty(coord))
    }

    /// Put `owner`'s island on `coord`. Clears any purchasable reservation.
    pub fn occupy(
        &mut self,
        coord: GridCoord,
        owner: PlayerId,
        owner_name: &str,
        island: IslandId,
    ) -> Result<(), DataError> {
        if !self.bounds.contains(coord) {
            return Err(DataError::OutOfBounds(coord));
        }
        if let Some(existing) = self.by_owner.get(&owner) {
            if *existing != coord {
                return Err(DataError::AlreadyPlaced {
                    player: owner,
                    coord: *existing,
                });
            }
        }
        if let Some(cell) = self.cells.get(&coord) {
            if cell.owner.is_some_and(|o| o != owner) {
                return Err(DataError::CellOccupied(coord));
            }
            if cell.reservation.is_some_and(|r| r.blocked) {
                return Err(DataError::CellReserved(coord));
            }
        }

        let cell = self.cell_mut(coord);
        let previous_island = cell.island.replace(island.clone());
        cell.owner = Some(owner);
        cell.owner_name = Some(owner_name.to_string());
        cell.reservation = None;

        if let Some(previous) = previous_island {
            self.by_island.remove(&previous);
        }
        self.by_owner.insert(owner, coord);
        self.by_island.insert(island, coord);
        self.dirty = true;
        Ok(())
    }

    /// Reset a cell to Available. Reservations survive. Returns the previous owner.
    pub fn clear(&mut self, coord: GridCoord) -> Option<PlayerId> {
        let cell = self.cells.get_mut(&coord)?;
        let owner = cell.owner.take();
        cell.owner_name = None;
        if let Some(island) = cell.island.take() {
            self.by_island.remove(&island);
        }
        if let Some(owner) = owner {
            self.by_owner.remove(&owner);
        }
        self.dirty = true;
        owner
    }

    pub fn reserve(&mut self, coord: GridCoord, blocked: bool, price: Option<f64>) -> Result<(), DataError> {
        if self.status(coord) == CellStatus::Occupied {
            return Err(DataError::CellOccupied(coord));
        }
        self.cell_mut(coord).reservation = Some(Reservation { blocked, price });
        self.dirty = true;
        Ok(())
    }

    pub fn unreserve(&mut self, coord: GridCoord) -> bool {
        let removed = self
            .cells
            .get_mut(&coord)
            .and_then(|cell| cell.reservation.take())
            .is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Make a cell purchasable at `price`.
    pub fn set_price(&mut self, coord: GridCoord, price: f64) -> Result<(), DataError> {
        self.reserve(coord, false, Some(price))
    }

    /// Drop the price. A reservation left with neither price nor block is removed.
    pub fn clear_price(&mut self, coord: GridCoord) -> bool {
        let Some(cell) = self.cells.get_mut(&coord) else {
            return false;
        };
        let Some(reservation) = cell.reservation.as_mut() else {
            return false;
        };
        if reservation.price.take().is_none() {
            return false;
        }
        if !reservation.blocked {
            cell.reservation = None;
        }
        self.dirty = true;
        true
    }

    pub fn coord_of_owner(&self, owner: PlayerId) -> Option<GridCoord> {
        self.by_owner.get(&owner).copied()
    }

    pub fn coord_of_island(&self, island: &IslandId) -> Option<GridCoord> {
        self.by_island.get(island).copied()
    }

    pub fn occupied_count(&self) -> usize {
        self.by_owner.len()
    }

    pub fn reserved(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.values().filter(|c| c.reservation.is_some())
    }

    /// Change the grid bounds. Refuses if an occupied cell would become locked.
    pub fn resize(&mut self, bounds: GridBounds) -> Result<(), DataError> {
        if let Some(coord) = self
            .by_owner
            .values()
            .filter(|c| !bounds.contains(**c))
            .min()
        {
            return Err(DataError::ShrinkWouldLock(*coord));
        }
        info!(
            "Grid resized from x {}..{} z {}..{} to x {}..{} z {}..{}",
            self.bounds.min_x,
            self.bounds.max_x,
            self.bounds.min_z,
            self.bounds.max_z,
            bounds.min_x,
            bounds.max_x,
            bounds.min_z,
            bounds.max_z
        );
        self.bounds = bounds;
        Ok(())
    }

    /// Statuses of the 3x3 block around `center`, north row first.
    pub fn neighborhood(&self, center: GridCoord) -> Vec<Vec<(GridCoord, CellStatus)>> {
        (-1..=1)
            .map(|dz| {
                (-1..=1)
                    .map(|dx| {
                        let coord = center.offset(dx, dz);
                        (coord, self.status(coord))
                    })
                    .collect()
            })
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Snapshot the non-blank cells if anything changed since the last flush.
    pub fn take_flush(&mut self) -> Option<PendingFlush<Vec<GridCell>>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let mut cells: Vec<GridCell> = self
            .cells
            .values()
            .filter(|c| !c.is_blank())
            .cloned()
            .collect();
        cells.sort_by_key(|c| c.coord);
        Some(PendingFlush::new(self.repo.clone(), cells))
    }

    /// Replace the in-memory cells with the stored document.
    pub fn reload(&mut self) -> Result<usize, DataError> {
        let cells = self.repo.load()?.unwrap_or_default();
        self.cells.clear();
        self.by_owner.clear();
        self.by_island.clear();
        for cell in cells {
            if let Some(owner) = cell.owner {
                if let Some(previous) = self.by_owner.insert(owner, cell.coord) {
                    warn!(
                        "Player {owner} recorded at both {previous} and {}, keeping the latter",
                        cell.coord
                    );
                }
            }
            if let Some(island) = &cell.island {
                self.by_island.insert(island.clone(), cell.coord);
            }
            self.cells.insert(cell.coord, cell);
        }
        self.dirty = false;
        Ok(self.cells.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use uuid::Uuid;

    fn grid() -> GridIndex {
        GridIndex::new(GridBounds::default(), Arc::new(MemoryRepository::new()))
    }

    fn player(n: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(n))
    }

    fn island(name: &str) -> IslandId {
        IslandId(name.to_string())
    }

    #[test]
    fn occupy_then_clear() {
        let mut grid = grid();
        let coord = GridCoord::new(2, 3);
        assert_eq!(grid.status(coord), CellStatus::Available);

        grid.occupy(coord, player(1), "Alex", island("a")).unwrap();
        assert_eq!(grid.status(coord), CellStatus::Occupied);
        assert_eq!(grid.coord_of_owner(player(1)), Some(coord));
        assert_eq!(grid.coord_of_island(&island("a")), Some(coord));

        assert_eq!(grid.clear(coord), Some(player(1)));
        assert_eq!(grid.status(coord), CellStatus::Available);
        assert_eq!(grid.coord_of_owner(player(1)), None);
        assert_eq!(grid.coord_of_island(&island("a")), None);
    }

    #[test]
    fn every_in_bounds_cell_transitions() {
        let mut grid = GridIndex::new(GridBounds::new(-2, 2, -2, 2), Arc::new(MemoryRepository::new()));
        for x in -2..=2 {
            for z in -2..=2 {
                let coord = GridCoord::new(x, z);
                let owner = player(((x + 10) * 100 + z + 10) as u128);
                grid.occupy(coord, owner, "p", island(&coord.to_string())).unwrap();
                assert_eq!(grid.status(coord), CellStatus::Occupied);
                grid.clear(coord);
                assert_eq!(grid.status(coord), CellStatus::Available);
            }
        }
    }

    #[test]
    fn out_of_bounds_is_locked_regardless_of_data() {
        let mut grid = grid();
        let far = GridCoord::new(11, 0);
        assert_eq!(grid.status(far), CellStatus::Locked);
        assert!(matches!(
            grid.occupy(far, player(1), "Alex", island("a")),
            Err(DataError::OutOfBounds(_))
        ));

        // A stored cell that falls outside after a resize also reads as locked.
        let edge = GridCoord::new(10, 0);
        grid.reserve(edge, true, None).unwrap();
        grid.resize(GridBounds::new(-5, 5, -5, 5)).unwrap();
        assert_eq!(grid.status(edge), CellStatus::Locked);
    }

    #[test]
    fn occupied_cell_rejects_second_owner() {
        let mut grid = grid();
        let coord = GridCoord::new(0, 0);
        grid.occupy(coord, player(1), "Alex", island("a")).unwrap();
        assert!(matches!(
            grid.occupy(coord, player(2), "Sam", island("b")),
            Err(DataError::CellOccupied(_))
        ));
    }

    #[test]
    fn owner_cannot_hold_two_cells() {
        let mut grid = grid();
        grid.occupy(GridCoord::new(0, 0), player(1), "Alex", island("a")).unwrap();
        assert!(matches!(
            grid.occupy(GridCoord::new(1, 0), player(1), "Alex", island("a")),
            Err(DataError::AlreadyPlaced { .. })
        ));
    }

    #[test]
    fn blocked_reservation_refuses_occupy() {
        let mut grid = grid();
        let coord = GridCoord::new(1, 1);
        grid.reserve(coord, true, None).unwrap();
        assert_eq!(grid.status(coord), CellStatus::Reserved);
        assert!(matches!(
            grid.occupy(coord, player(1), "Alex", island("a")),
            Err(DataError::CellReserved(_))
        ));
        assert!(grid.unreserve(coord));
        assert_eq!(grid.status(coord), CellStatus::Available);
    }

    #[test]
    fn purchasable_cell_clears_reservation_on_occupy() {
        let mut grid = grid();
        let coord = GridCoord::new(-3, 4);
        grid.set_price(coord, 250.0).unwrap();
        assert_eq!(grid.status(coord), CellStatus::Reserved);
        assert_eq!(grid.cell(coord).unwrap().reservation.unwrap().purchase_price(), Some(250.0));

        grid.occupy(coord, player(1), "Alex", island("a")).unwrap();
        assert!(grid.cell(coord).unwrap().reservation.is_none());
    }

    #[test]
    fn clear_price_drops_unblocked_reservation() {
        let mut grid = grid();
        let coord = GridCoord::new(5, 5);
        grid.set_price(coord, 10.0).unwrap();
        assert!(grid.clear_price(coord));
        assert_eq!(grid.status(coord), CellStatus::Available);
        assert!(!grid.clear_price(coord));
    }

    #[test]
    fn resize_refuses_to_lock_occupied() {
        let mut grid = grid();
        grid.occupy(GridCoord::new(8, 0), player(1), "Alex", island("a")).unwrap();
        assert!(matches!(
            grid.resize(GridBounds::new(-5, 5, -5, 5)),
            Err(DataError::ShrinkWouldLock(c)) if c == GridCoord::new(8, 0)
        ));
        assert_eq!(grid.bounds(), GridBounds::default());
        grid.resize(GridBounds::new(-20, 20, -20, 20)).unwrap();
        assert_eq!(grid.status(GridCoord::new(15, 0)), CellStatus::Available);
    }

    #[test]
    fn neighborhood_is_three_by_three() {
        let mut grid = grid();
        grid.occupy(GridCoord::new(0, -1), player(1), "Alex", island("a")).unwrap();
        let rows = grid.neighborhood(GridCoord::new(0, 0));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 3));
        assert_eq!(rows[0][1], (GridCoord::new(0, -1), CellStatus::Occupied));
        assert_eq!(rows[1][1], (GridCoord::new(0, 0), CellStatus::Available));

        let corner = grid.neighborhood(GridCoord::new(10, 10));
        assert_eq!(corner[2][2].1, CellStatus::Locked);
    }

    #[test]
    fn flush_and_reload() {
        let repo: Arc<dyn Repository<Vec<GridCell>>> = Arc::new(MemoryRepository::new());
        let mut grid = GridIndex::new(GridBounds::default(), repo.clone());
        assert!(grid.take_flush().is_none());

        grid.occupy(GridCoord::new(1, 2), player(1), "Alex", island("a")).unwrap();
        grid.reserve(GridCoord::new(0, 0), true, None).unwrap();
        // Blank cells are not written.
        grid.occupy(GridCoord::new(3, 3), player(2), "Sam", island("b")).unwrap();
        grid.clear(GridCoord::new(3, 3));

        let flush = grid.take_flush().unwrap();
        assert_eq!(flush.document().len(), 2);
        flush.write().unwrap();
        assert!(!grid.is_dirty());

        let mut reloaded = GridIndex::new(GridBounds::default(), repo);
        assert_eq!(reloaded.reload().unwrap(), 2);
        assert_eq!(reloaded.coord_of_owner(player(1)), Some(GridCoord::new(1, 2)));
        assert_eq!(reloaded.status(GridCoord::new(0, 0)), CellStatus::Reserved);
        assert_eq!(reloaded.occupied_count(), 1);
    }
}
