//! Slot Store: each player's alternate islands at one grid coordinate.
//!
//! At most one slot per player is active at any time. Every mutation that
//! touches the active flag goes through a single `&mut self` call, so the
//! invariant holds between calls.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skygrid_api::{IslandId, PlayerId};
use tracing::{error, info};

use crate::coord::GridCoord;
use crate::error::DataError;
use crate::homes::HomeSnapshot;
use crate::repository::{PendingFlush, Repository};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub player: PlayerId,
    pub number: u32,
    pub name: String,
    pub icon: String,
    #[serde(default)]
    pub active: bool,
    /// The slot holds island content, either live or in its schematic file.
    #[serde(default)]
    pub has_island: bool,
    #[serde(default)]
    pub island: Option<IslandId>,
    #[serde(default)]
    pub coord: Option<GridCoord>,
    #[serde(default)]
    pub blueprint: Option<String>,
    /// Milliseconds since the epoch of the last switch into this slot.
    #[serde(default)]
    pub last_switch_ms: Option<u64>,
    #[serde(default)]
    pub homes: HomeSnapshot,
}

/// Defaults applied to newly created slots.
#[derive(Debug, Clone)]
pub struct SlotDefaults {
    pub default_slots: u32,
    pub max_slots: u32,
    /// Display name template; `{number}` is replaced by the slot number.
    pub name_template: String,
    pub icon: String,
}

impl SlotDefaults {
    pub fn name_for(&self, number: u32) -> String {
        self.name_template.replace("{number}", &number.to_string())
    }
}

impl Default for SlotDefaults {
    fn default() -> Self {
        Self {
            default_slots: 2,
            max_slots: 5,
            name_template: "Island {number}".into(),
            icon: "GRASS_BLOCK".into(),
        }
    }
}

pub struct SlotStore {
    slots: HashMap<PlayerId, BTreeMap<u32, Slot>>,
    defaults: SlotDefaults,
    repo: Arc<dyn Repository<Vec<Slot>>>,
    dirty: bool,
}

impl SlotStore {
    pub fn new(defaults: SlotDefaults, repo: Arc<dyn Repository<Vec<Slot>>>) -> Self {
        Self {
            slots: HashMap::new(),
            defaults,
            repo,
            dirty: false,
        }
    }

    pub fn defaults(&self) -> &SlotDefaults {
        &self.defaults
    }

    pub fn get(&self, player: PlayerId, number: u32) -> Option<&Slot> {
        self.slots.get(&player)?.get(&number)
    }

    fn get_mut(&mut self, player: PlayerId, number: u32) -> Result<&mut Slot, DataError> {
        self.slots
            .get_mut(&player)
            .and_then(|slots| slots.get_mut(&number))
            .ok_or(DataError::SlotNotFound {
                player,
                slot: number,
            })
    }

    pub fn active(&self, player: PlayerId) -> Option<&Slot> {
        self.slots.get(&player)?.values().find(|s| s.active)
    }

    pub fn player_slots(&self, player: PlayerId) -> Vec<&Slot> {
        self.slots
            .get(&player)
            .map(|slots| slots.values().collect())
            .unwrap_or_default()
    }

    pub fn has_slots(&self, player: PlayerId) -> bool {
        self.slots.get(&player).is_some_and(|s| !s.is_empty())
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.slots.keys().copied()
    }

    /// The coordinate shared by all of a player's slots.
    pub fn player_coordinate(&self, player: PlayerId) -> Option<GridCoord> {
        self.slots.get(&player)?.values().find_map(|s| s.coord)
    }

    fn blank(&self, player: PlayerId, number: u32) -> Slot {
        Slot {
            player,
            number,
            name: self.defaults.name_for(number),
            icon: self.defaults.icon.clone(),
            active: false,
            has_island: false,
            island: None,
            coord: None,
            blueprint: None,
            last_switch_ms: None,
            homes: HomeSnapshot::new(),
        }
    }

    /// Return the slot, creating an empty inactive one if needed. The new
    /// slot inherits the player's island and coordinate.
    pub fn create_or_get(&mut self, player: PlayerId, number: u32) -> Result<&Slot, DataError> {
        if number == 0 || number > self.defaults.max_slots {
            return Err(DataError::SlotLimit {
                slot: number,
                max: self.defaults.max_slots,
            });
        }
        if self.get(player, number).is_none() {
            let mut slot = self.blank(player, number);
            if let Some(active) = self.active(player) {
                slot.island = active.island.clone();
                slot.coord = active.coord;
            }
            self.slots.entry(player).or_default().insert(number, slot);
            self.dirty = true;
        }
        self.get_mut(player, number).map(|s| &*s)
    }

    /// First claim: slot 1 holds the new island and is active; the other
    /// default slots are created empty.
    pub fn initialize_player(
        &mut self,
        player: PlayerId,
        island: IslandId,
        coord: GridCoord,
        blueprint: &str,
    ) {
        let mut slots = BTreeMap::new();
        for number in 1..=self.defaults.default_slots.max(1) {
            let mut slot = self.blank(player, number);
            slot.island = Some(island.clone());
            slot.coord = Some(coord);
            if number == 1 {
                slot.active = true;
                slot.has_island = true;
                slot.blueprint = Some(blueprint.to_string());
            }
            slots.insert(number, slot);
        }
        info!("Initialized {} slots for {player} at {coord}", slots.len());
        self.slots.insert(player, slots);
        self.dirty = true;
    }

    /// Mark a slot as holding island content created from `blueprint`.
    pub fn initialize_slot(&mut self, player: PlayerId, number: u32, blueprint: &str) -> Result<(), DataError> {
        let slot = self.get_mut(player, number)?;
        slot.has_island = true;
        slot.blueprint = Some(blueprint.to_string());
        self.dirty = true;
        Ok(())
    }

    /// Atomically deactivate the current slot and activate `target`.
    pub fn switch_active(&mut self, player: PlayerId, target: u32, now_ms: u64) -> Result<(), DataError> {
        let slots = self
            .slots
            .get_mut(&player)
            .ok_or(DataError::SlotNotFound { player, slot: target })?;
        match slots.get(&target) {
            None => return Err(DataError::SlotNotFound { player, slot: target }),
            Some(slot) if slot.active => return Err(DataError::SlotActive(target)),
            Some(_) => {}
        }
        for slot in slots.values_mut() {
            slot.active = slot.number == target;
            if slot.active {
                slot.last_switch_ms = Some(now_ms);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// `max(0, window - (now - last switch))`, zero when bypassed.
    pub fn remaining_cooldown(&self, player: PlayerId, now_ms: u64, window: Duration, bypass: bool) -> Duration {
        if bypass {
            return Duration::ZERO;
        }
        let Some(last) = self
            .slots
            .get(&player)
            .and_then(|slots| slots.values().filter_map(|s| s.last_switch_ms).max())
        else {
            return Duration::ZERO;
        };
        let elapsed = Duration::from_millis(now_ms.saturating_sub(last));
        window.saturating_sub(elapsed)
    }

    pub fn reset_cooldown(&mut self, player: PlayerId) -> bool {
        let Some(slots) = self.slots.get_mut(&player) else {
            return false;
        };
        for slot in slots.values_mut() {
            slot.last_switch_ms = None;
        }
        self.dirty = true;
        true
    }

    pub fn set_name(&mut self, player: PlayerId, number: u32, name: &str) -> Result<(), DataError> {
        self.get_mut(player, number)?.name = name.to_string();
        self.dirty = true;
        Ok(())
    }

    pub fn set_icon(&mut self, player: PlayerId, number: u32, icon: &str) -> Result<(), DataError> {
        self.get_mut(player, number)?.icon = icon.to_string();
        self.dirty = true;
        Ok(())
    }

    pub fn set_blueprint(&mut self, player: PlayerId, number: u32, blueprint: &str) -> Result<(), DataError> {
        self.get_mut(player, number)?.blueprint = Some(blueprint.to_string());
        self.dirty = true;
        Ok(())
    }

    pub fn set_homes(&mut self, player: PlayerId, number: u32, homes: HomeSnapshot) -> Result<(), DataError> {
        self.get_mut(player, number)?.homes = homes;
        self.dirty = true;
        Ok(())
    }

    /// Every slot of a player shares one physical location.
    pub fn set_coordinate_for_all(&mut self, player: PlayerId, coord: GridCoord) -> usize {
        let Some(slots) = self.slots.get_mut(&player) else {
            return 0;
        };
        for slot in slots.values_mut() {
            slot.coord = Some(coord);
        }
        self.dirty = true;
        slots.len()
    }

    pub fn set_island_for_all(&mut self, player: PlayerId, island: &IslandId) {
        if let Some(slots) = self.slots.get_mut(&player) {
            for slot in slots.values_mut() {
                slot.island = Some(island.clone());
            }
            self.dirty = true;
        }
    }

    /// The island was removed from the world. Slot content is kept so it
    /// can be restored at a new coordinate later.
    pub fn mark_homeless(&mut self, player: PlayerId) -> usize {
        let Some(slots) = self.slots.get_mut(&player) else {
            return 0;
        };
        for slot in slots.values_mut() {
            slot.island = None;
            slot.coord = None;
            slot.active = false;
        }
        self.dirty = true;
        slots.len()
    }

    pub fn is_homeless(&self, player: PlayerId) -> bool {
        self.has_slots(player) && self.player_coordinate(player).is_none()
    }

    /// A homeless player's slot was pasted at a new location and becomes active.
    pub fn restore_slot(
        &mut self,
        player: PlayerId,
        number: u32,
        island: IslandId,
        coord: GridCoord,
    ) -> Result<(), DataError> {
        self.get_mut(player, number)?;
        self.set_coordinate_for_all(player, coord);
        self.set_island_for_all(player, &island);
        if let Some(slots) = self.slots.get_mut(&player) {
            for slot in slots.values_mut() {
                slot.active = slot.number == number;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove an inactive slot's record. Backing files are the caller's job
    /// and must be deleted first.
    pub fn remove_record(&mut self, player: PlayerId, number: u32) -> Result<Slot, DataError> {
        if self.get_mut(player, number)?.active {
            return Err(DataError::SlotActive(number));
        }
        let slots = self
            .slots
            .get_mut(&player)
            .ok_or(DataError::SlotNotFound { player, slot: number })?;
        let removed = slots
            .remove(&number)
            .ok_or(DataError::SlotNotFound { player, slot: number })?;
        if slots.is_empty() {
            self.slots.remove(&player);
        }
        self.dirty = true;
        Ok(removed)
    }

    /// Delete a slot: backing files first, then the record. If a file cannot
    /// be deleted the record stays and the error is returned.
    pub fn delete(&mut self, player: PlayerId, number: u32, files: &SlotFiles) -> Result<Slot, DataError> {
        if self.get_mut(player, number)?.active {
            return Err(DataError::SlotActive(number));
        }
        files.delete_slot(player, number)?;
        self.remove_record(player, number)
    }

    /// Forget a player entirely. Returns how many records were dropped.
    pub fn purge_player(&mut self, player: PlayerId) -> usize {
        let removed = self.slots.remove(&player).map(|s| s.len()).unwrap_or(0);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn take_flush(&mut self) -> Option<PendingFlush<Vec<Slot>>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let mut all: Vec<Slot> = self
            .slots
            .values()
            .flat_map(|slots| slots.values().cloned())
            .collect();
        all.sort_by(|a, b| (a.player, a.number).cmp(&(b.player, b.number)));
        Some(PendingFlush::new(self.repo.clone(), all))
    }

    pub fn reload(&mut self) -> Result<usize, DataError> {
        let records = self.repo.load()?.unwrap_or_default();
        self.slots.clear();
        let count = records.len();
        for slot in records {
            self.slots
                .entry(slot.player)
                .or_default()
                .insert(slot.number, slot);
        }
        // Repair records written before the active invariant was enforced.
        for slots in self.slots.values_mut() {
            let mut seen_active = false;
            for slot in slots.values_mut() {
                if slot.active && seen_active {
                    slot.active = false;
                }
                seen_active |= slot.active;
            }
        }
        self.dirty = false;
        Ok(count)
    }
}

/// On-disk layout of per-player, per-slot files under the data directory.
#[derive(Debug, Clone)]
pub struct SlotFiles {
    root: PathBuf,
}

impl SlotFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn player_dir(&self, player: PlayerId) -> PathBuf {
        self.root.join("slots").join(player.to_string())
    }

    pub fn schematic(&self, player: PlayerId, number: u32) -> PathBuf {
        self.player_dir(player).join(format!("slot-{number}.schem"))
    }

    pub fn entities(&self, player: PlayerId, number: u32) -> PathBuf {
        self.player_dir(player).join(format!("slot-{number}.entities"))
    }

    pub fn backup_dir(&self, player: PlayerId) -> PathBuf {
        self.root.join("backups").join(player.to_string())
    }

    /// Scratch schematic used while an island moves between coordinates.
    pub fn relocation_scratch(&self, player: PlayerId) -> PathBuf {
        self.root.join("relocations").join(format!("{player}.schem"))
    }

    /// Delete a slot's schematic and entity files. Missing files are fine;
    /// any other failure is logged and returned.
    pub fn delete_slot(&self, player: PlayerId, number: u32) -> Result<(), DataError> {
        for path in [self.schematic(player, number), self.entities(player, number)] {
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    /// Delete every slot file of a player.
    pub fn purge(&self, player: PlayerId) -> Result<(), DataError> {
        let dir = self.player_dir(player);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to delete slot directory {}: {e}", dir.display());
                Err(DataError::FileDelete { path: dir, source: e })
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), DataError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed to delete {}: {e}", path.display());
            Err(DataError::FileDelete {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }
}
