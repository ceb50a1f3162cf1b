//! Sandbox host: an in-memory world that implements every capability.
//!
//! Blocks live in a sparse map, entities in a flat list, islands and
//! players in registries. Schematic files are real files on disk in the
//! [`SchematicFile`] format, written and read on the blocking pool.
//!
//! Tests drive failure paths with [`SandboxWorld::fail_next`] and
//! [`SandboxWorld::fail_always`], and pause an operation mid-workflow with
//! [`SandboxWorld::hold`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use skygrid_api::{
    BlockPos, BlueprintGrants, CapabilityError, ChallengeProgress, EconomyCapability,
    EntitySnapshot, HostCapability, IslandCapability, IslandId, IslandInfo, OnlinePlayer, PlayerId,
    Position, Region, SchematicCapability,
};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::blueprint::{self, DEFAULT_HOME_OFFSET};
use crate::schematic_file::{SchematicFile, SchematicFileError};

// ─── Fault injection ─────────────────────────────────────────────────────────

/// Capability operations that can be failed or held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Save,
    Verify,
    Paste,
    Clear,
    CaptureEntities,
    RemoveEntities,
    SpawnEntities,
    CreateIsland,
    PasteBlueprint,
    SetCenter,
    SetHomes,
    Withdraw,
    Teleport,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Next(u32),
    Always,
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SandboxEntity {
    kind: String,
    custom_name: Option<String>,
    position: Position,
    attributes: BTreeMap<String, String>,
}

impl SandboxEntity {
    fn snapshot(&self, center: BlockPos) -> EntitySnapshot {
        EntitySnapshot {
            kind: self.kind.clone(),
            custom_name: self.custom_name.clone(),
            offset: [
                self.position.x - center.x as f64,
                self.position.y - center.y as f64,
                self.position.z - center.z as f64,
            ],
            yaw: self.position.yaw,
            pitch: self.position.pitch,
            attributes: self.attributes.clone(),
        }
    }

    fn from_snapshot(snapshot: &EntitySnapshot, center: BlockPos) -> Self {
        let [dx, dy, dz] = snapshot.offset;
        Self {
            kind: snapshot.kind.clone(),
            custom_name: snapshot.custom_name.clone(),
            position: center
                .to_position()
                .offset(dx, dy, dz)
                .with_rotation(snapshot.yaw, snapshot.pitch),
            attributes: snapshot.attributes.clone(),
        }
    }
}

struct SandboxPlayer {
    name: String,
    position: Position,
    online: bool,
    permissions: HashSet<String>,
    messages: Vec<String>,
}

#[derive(Default)]
struct State {
    blocks: HashMap<BlockPos, String>,
    entities: Vec<SandboxEntity>,
    islands: BTreeMap<IslandId, IslandInfo>,
    players: HashMap<PlayerId, SandboxPlayer>,
    balances: HashMap<PlayerId, f64>,
    commands: Vec<String>,
    addon_log: Vec<String>,
    grants: HashSet<(PlayerId, String)>,
    next_island: u64,
}

impl State {
    fn place(&mut self, schematic: &SchematicFile, center: BlockPos) -> Result<usize, SchematicFileError> {
        let blocks = schematic.resolved()?;
        let count = blocks.len();
        for ((dx, dy, dz), name) in blocks {
            self.blocks.insert(center.offset(dx, dy, dz), name.to_string());
        }
        self.entities.extend(
            schematic
                .entities
                .iter()
                .map(|e| SandboxEntity::from_snapshot(e, center)),
        );
        Ok(count)
    }
}

pub struct SandboxWorld {
    state: Mutex<State>,
    faults: Mutex<HashMap<Op, Fault>>,
    holds: Mutex<HashMap<Op, Arc<Notify>>>,
    spawn: Position,
    protection_range: i32,
}

impl SandboxWorld {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
            spawn: Position::new(0.5, 100.0, 0.5),
            protection_range: 50,
        }
    }

    pub fn with_spawn(mut self, spawn: Position) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn with_protection_range(mut self, range: i32) -> Self {
        self.protection_range = range;
        self
    }

    // ─── Fault control ───────────────────────────────────────────────────

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: Op, times: u32) {
        if times > 0 {
            self.faults.lock().insert(op, Fault::Next(times));
        }
    }

    pub fn fail_always(&self, op: Op) {
        self.faults.lock().insert(op, Fault::Always);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Pause the next call of `op` until the returned handle is notified.
    pub fn hold(&self, op: Op) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds.lock().insert(op, notify.clone());
        notify
    }

    async fn checkpoint(&self, op: Op) -> Result<(), CapabilityError> {
        let held = self.holds.lock().remove(&op);
        if let Some(notify) = held {
            debug!("Sandbox holding {op:?}");
            notify.notified().await;
        }
        let mut faults = self.faults.lock();
        let fault = faults.get(&op).copied();
        match fault {
            None => Ok(()),
            Some(Fault::Always) => Err(injected(op)),
            Some(Fault::Next(n)) => {
                if n <= 1 {
                    faults.remove(&op);
                } else {
                    faults.insert(op, Fault::Next(n - 1));
                }
                Err(injected(op))
            }
        }
    }

    // ─── Players ─────────────────────────────────────────────────────────

    pub fn join(&self, id: PlayerId, name: &str, position: Position) {
        let mut state = self.state.lock();
        let player = state.players.entry(id).or_insert_with(|| SandboxPlayer {
            name: name.to_string(),
            position,
            online: true,
            permissions: HashSet::new(),
            messages: Vec::new(),
        });
        player.online = true;
        player.position = position;
        info!("{name} joined the sandbox at {}", position.block());
    }

    pub fn quit(&self, id: PlayerId) {
        if let Some(player) = self.state.lock().players.get_mut(&id) {
            player.online = false;
            info!("{} left the sandbox", player.name);
        }
    }

    pub fn set_position(&self, id: PlayerId, position: Position) {
        if let Some(player) = self.state.lock().players.get_mut(&id) {
            player.position = position;
        }
    }

    pub fn position_of(&self, id: PlayerId) -> Option<Position> {
        self.state.lock().players.get(&id).map(|p| p.position)
    }

    pub fn grant_permission(&self, id: PlayerId, permission: &str) {
        if let Some(player) = self.state.lock().players.get_mut(&id) {
            player.permissions.insert(permission.to_string());
        }
    }

    pub fn messages_for(&self, id: PlayerId) -> Vec<String> {
        self.state
            .lock()
            .players
            .get(&id)
            .map(|p| p.messages.clone())
            .unwrap_or_default()
    }

    pub fn set_balance(&self, id: PlayerId, amount: f64) {
        self.state.lock().balances.insert(id, amount);
    }

    pub fn balance_of(&self, id: PlayerId) -> f64 {
        self.state.lock().balances.get(&id).copied().unwrap_or(0.0)
    }

    // ─── World ───────────────────────────────────────────────────────────

    pub fn place_block(&self, pos: BlockPos, name: &str) {
        self.state.lock().blocks.insert(pos, name.to_string());
    }

    pub fn block_at(&self, pos: BlockPos) -> Option<String> {
        self.state.lock().blocks.get(&pos).cloned()
    }

    pub fn block_count_in(&self, region: &Region) -> usize {
        self.state
            .lock()
            .blocks
            .keys()
            .filter(|p| region.contains(**p))
            .count()
    }

    pub fn spawn_entity(
        &self,
        kind: &str,
        position: Position,
        custom_name: Option<&str>,
        attributes: BTreeMap<String, String>,
    ) {
        self.state.lock().entities.push(SandboxEntity {
            kind: kind.to_string(),
            custom_name: custom_name.map(str::to_string),
            position,
            attributes,
        });
    }

    /// Entities in `region`, offsets relative to its centre.
    pub fn entities_in(&self, region: &Region) -> Vec<EntitySnapshot> {
        self.state
            .lock()
            .entities
            .iter()
            .filter(|e| region.contains_position(&e.position))
            .map(|e| e.snapshot(region.center))
            .collect()
    }

    pub fn add_member(&self, island: &IslandId, member: PlayerId) {
        if let Some(info) = self.state.lock().islands.get_mut(island) {
            if !info.members.contains(&member) {
                info.members.push(member);
            }
        }
    }

    pub fn island_count(&self) -> usize {
        self.state.lock().islands.len()
    }

    /// Register an island without pasting anything, as if it existed
    /// before skygrid was installed.
    pub fn register_island(&self, owner: PlayerId, center: Position) -> IslandId {
        let mut state = self.state.lock();
        let id = next_island_id(&mut state);
        let home = center.offset(DEFAULT_HOME_OFFSET.0, DEFAULT_HOME_OFFSET.1, DEFAULT_HOME_OFFSET.2);
        state.islands.insert(
            id.clone(),
            IslandInfo {
                id: id.clone(),
                owner: Some(owner),
                members: Vec::new(),
                center,
                protection_range: self.protection_range,
                homes: BTreeMap::from([(String::new(), home)]),
                spawn_point: Some(home),
            },
        );
        id
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn addon_log(&self) -> Vec<String> {
        self.state.lock().addon_log.clone()
    }

    pub fn has_grant(&self, id: PlayerId, blueprint: &str) -> bool {
        self.state
            .lock()
            .grants
            .contains(&(id, blueprint.to_string()))
    }
}

impl Default for SandboxWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn injected(op: Op) -> CapabilityError {
    CapabilityError::Host(format!("injected failure: {op:?}"))
}

fn next_island_id(state: &mut State) -> IslandId {
    state.next_island += 1;
    IslandId(format!("island-{}", state.next_island))
}

fn file_error(path: &Path, err: SchematicFileError) -> CapabilityError {
    match err {
        SchematicFileError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CapabilityError::SchematicNotFound(path.display().to_string())
        }
        SchematicFileError::Io(e) => CapabilityError::Io(e),
        other => CapabilityError::CorruptSchematic {
            path: path.display().to_string(),
            reason: other.to_string(),
        },
    }
}

async fn load_file(path: &Path) -> Result<SchematicFile, CapabilityError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || SchematicFile::load(&owned))
        .await
        .map_err(|e| CapabilityError::Host(format!("schematic loader panicked: {e}")))?
        .map_err(|e| file_error(path, e))
}

// ─── Capabilities ────────────────────────────────────────────────────────────

#[async_trait]
impl SchematicCapability for SandboxWorld {
    async fn save(&self, region: &Region, include_entities: bool, file: &Path) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Save).await?;
        let schematic = {
            let state = self.state.lock();
            let c = region.center;
            let mut schematic = SchematicFile::from_blocks(
                state
                    .blocks
                    .iter()
                    .filter(|(pos, _)| region.contains(**pos))
                    .map(|(pos, name)| ((pos.x - c.x, pos.y - c.y, pos.z - c.z), name.as_str())),
            );
            if include_entities {
                schematic.entities = state
                    .entities
                    .iter()
                    .filter(|e| region.contains_position(&e.position))
                    .map(|e| e.snapshot(c))
                    .collect();
            }
            schematic
        };
        let blocks = schematic.block_count();
        let owned = file.to_path_buf();
        tokio::task::spawn_blocking(move || schematic.save(&owned))
            .await
            .map_err(|e| CapabilityError::Host(format!("schematic writer panicked: {e}")))?
            .map_err(|e| file_error(file, e))?;
        debug!("Saved {blocks} blocks to {}", file.display());
        Ok(())
    }

    async fn verify(&self, file: &Path) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Verify).await?;
        load_file(file).await.map(|_| ())
    }

    async fn paste(&self, file: &Path, center: BlockPos) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Paste).await?;
        let schematic = load_file(file).await?;
        let placed = self
            .state
            .lock()
            .place(&schematic, center)
            .map_err(|e| file_error(file, e))?;
        debug!("Pasted {placed} blocks from {} at {center}", file.display());
        Ok(())
    }

    async fn clear_region(&self, region: &Region) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Clear).await?;
        let mut state = self.state.lock();
        let before = state.blocks.len();
        state.blocks.retain(|pos, _| !region.contains(*pos));
        debug!("Cleared {} blocks around {}", before - state.blocks.len(), region.center);
        Ok(())
    }

    async fn capture_entities(&self, region: &Region) -> Result<Vec<EntitySnapshot>, CapabilityError> {
        self.checkpoint(Op::CaptureEntities).await?;
        Ok(self.entities_in(region))
    }

    async fn remove_entities(&self, region: &Region) -> Result<usize, CapabilityError> {
        self.checkpoint(Op::RemoveEntities).await?;
        let mut state = self.state.lock();
        let before = state.entities.len();
        state
            .entities
            .retain(|e| !region.contains_position(&e.position));
        Ok(before - state.entities.len())
    }

    async fn spawn_entities(&self, center: BlockPos, entities: &[EntitySnapshot]) -> Result<usize, CapabilityError> {
        self.checkpoint(Op::SpawnEntities).await?;
        let mut state = self.state.lock();
        state
            .entities
            .extend(entities.iter().map(|e| SandboxEntity::from_snapshot(e, center)));
        Ok(entities.len())
    }
}

#[async_trait]
impl IslandCapability for SandboxWorld {
    async fn island(&self, id: &IslandId) -> Result<Option<IslandInfo>, CapabilityError> {
        Ok(self.state.lock().islands.get(id).cloned())
    }

    async fn island_of(&self, owner: PlayerId) -> Result<Option<IslandInfo>, CapabilityError> {
        Ok(self
            .state
            .lock()
            .islands
            .values()
            .find(|i| i.owner == Some(owner))
            .cloned())
    }

    async fn islands(&self) -> Result<Vec<IslandInfo>, CapabilityError> {
        Ok(self.state.lock().islands.values().cloned().collect())
    }

    async fn create_island(&self, owner: PlayerId, center: Position, blueprint: &str) -> Result<IslandId, CapabilityError> {
        self.checkpoint(Op::CreateIsland).await?;
        let schematic = blueprint::blueprint(blueprint)
            .ok_or_else(|| CapabilityError::UnknownBlueprint(blueprint.to_string()))?;
        let id = self.register_island(owner, center);
        self.state
            .lock()
            .place(&schematic, center.block())
            .map_err(|e| CapabilityError::Host(e.to_string()))?;
        info!("Created island {id} for {owner} at {} from {blueprint}", center.block());
        Ok(id)
    }

    async fn paste_blueprint(&self, id: &IslandId, blueprint: &str) -> Result<(), CapabilityError> {
        self.checkpoint(Op::PasteBlueprint).await?;
        let schematic = blueprint::blueprint(blueprint)
            .ok_or_else(|| CapabilityError::UnknownBlueprint(blueprint.to_string()))?;
        let mut state = self.state.lock();
        let center = state
            .islands
            .get(id)
            .map(|i| i.center)
            .ok_or_else(|| CapabilityError::IslandNotFound(id.clone()))?;
        state
            .place(&schematic, center.block())
            .map_err(|e| CapabilityError::Host(e.to_string()))?;
        let home = center.offset(DEFAULT_HOME_OFFSET.0, DEFAULT_HOME_OFFSET.1, DEFAULT_HOME_OFFSET.2);
        if let Some(island) = state.islands.get_mut(id) {
            island.homes = BTreeMap::from([(String::new(), home)]);
            island.spawn_point = Some(home);
        }
        Ok(())
    }

    async fn set_center(&self, id: &IslandId, center: Position) -> Result<(), CapabilityError> {
        self.checkpoint(Op::SetCenter).await?;
        let mut state = self.state.lock();
        let island = state
            .islands
            .get_mut(id)
            .ok_or_else(|| CapabilityError::IslandNotFound(id.clone()))?;
        let (dx, dy, dz) = (
            center.x - island.center.x,
            center.y - island.center.y,
            center.z - island.center.z,
        );
        island.center = center;
        island.spawn_point = island.spawn_point.map(|s| s.offset(dx, dy, dz));
        Ok(())
    }

    async fn set_homes(&self, id: &IslandId, homes: BTreeMap<String, Position>) -> Result<(), CapabilityError> {
        self.checkpoint(Op::SetHomes).await?;
        let mut state = self.state.lock();
        let island = state
            .islands
            .get_mut(id)
            .ok_or_else(|| CapabilityError::IslandNotFound(id.clone()))?;
        island.homes = homes;
        Ok(())
    }

    async fn delete_island(&self, id: &IslandId) -> Result<(), CapabilityError> {
        match self.state.lock().islands.remove(id) {
            Some(_) => {
                info!("Deleted island {id}");
                Ok(())
            }
            None => Err(CapabilityError::IslandNotFound(id.clone())),
        }
    }
}

#[async_trait]
impl EconomyCapability for SandboxWorld {
    async fn balance(&self, player: PlayerId) -> Result<f64, CapabilityError> {
        Ok(self.balance_of(player))
    }

    async fn withdraw(&self, player: PlayerId, amount: f64) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Withdraw).await?;
        let mut state = self.state.lock();
        let balance = state.balances.entry(player).or_insert(0.0);
        if *balance < amount {
            return Err(CapabilityError::InsufficientFunds {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    async fn deposit(&self, player: PlayerId, amount: f64) -> Result<(), CapabilityError> {
        *self.state.lock().balances.entry(player).or_insert(0.0) += amount;
        Ok(())
    }
}

#[async_trait]
impl HostCapability for SandboxWorld {
    fn online_players(&self) -> Vec<OnlinePlayer> {
        let state = self.state.lock();
        let mut players: Vec<OnlinePlayer> = state
            .players
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(id, p)| OnlinePlayer {
                id: *id,
                name: p.name.clone(),
                position: p.position,
            })
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        players
    }

    fn has_permission(&self, id: PlayerId, permission: &str) -> bool {
        self.state
            .lock()
            .players
            .get(&id)
            .is_some_and(|p| p.permissions.contains(permission) || p.permissions.contains("*"))
    }

    fn send_message(&self, id: PlayerId, message: &str) {
        let mut state = self.state.lock();
        match state.players.get_mut(&id) {
            Some(player) if player.online => {
                info!("[to {}] {message}", player.name);
                player.messages.push(message.to_string());
            }
            _ => debug!("Dropped message to offline player {id}: {message}"),
        }
    }

    async fn teleport(&self, id: PlayerId, to: Position) -> Result<(), CapabilityError> {
        self.checkpoint(Op::Teleport).await?;
        let mut state = self.state.lock();
        match state.players.get_mut(&id) {
            Some(player) if player.online => {
                player.position = to;
                Ok(())
            }
            _ => Err(CapabilityError::PlayerOffline(id)),
        }
    }

    fn spawn_location(&self) -> Position {
        self.spawn
    }

    fn dispatch_command(&self, command: &str) {
        info!("Console command: {command}");
        self.state.lock().commands.push(command.to_string());
    }
}

#[async_trait]
impl ChallengeProgress for SandboxWorld {
    async fn save_progress(&self, player: PlayerId, slot: u32) -> Result<(), CapabilityError> {
        self.state
            .lock()
            .addon_log
            .push(format!("challenges save {player} {slot}"));
        Ok(())
    }

    async fn restore_progress(&self, player: PlayerId, slot: u32) -> Result<(), CapabilityError> {
        self.state
            .lock()
            .addon_log
            .push(format!("challenges restore {player} {slot}"));
        Ok(())
    }
}

#[async_trait]
impl BlueprintGrants for SandboxWorld {
    async fn grant(&self, player: PlayerId, blueprint: &str) -> Result<(), CapabilityError> {
        let mut state = self.state.lock();
        state.grants.insert((player, blueprint.to_string()));
        state.addon_log.push(format!("grant {player} {blueprint}"));
        Ok(())
    }

    async fn revoke(&self, player: PlayerId, blueprint: &str) -> Result<(), CapabilityError> {
        let mut state = self.state.lock();
        state.grants.remove(&(player, blueprint.to_string()));
        state.addon_log.push(format!("revoke {player} {blueprint}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("skygrid_sandbox_{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn player(n: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(n))
    }

    fn region_at(x: i32, z: i32) -> Region {
        Region::around(BlockPos::new(x, 120, z), 20, -64, 319)
    }

    #[tokio::test]
    async fn create_island_pastes_blueprint() {
        let world = SandboxWorld::new();
        let id = world
            .create_island(player(1), Position::new(800.0, 120.0, 0.0), "default")
            .await
            .unwrap();
        assert_eq!(world.block_at(BlockPos::new(800, 120, 0)).as_deref(), Some("grass_block"));
        let island = world.island(&id).await.unwrap().unwrap();
        assert_eq!(island.default_home(), Position::new(800.5, 121.0, 0.5));
        assert!(matches!(
            world.create_island(player(2), Position::default(), "castle").await,
            Err(CapabilityError::UnknownBlueprint(_))
        ));
    }

    #[tokio::test]
    async fn save_clear_paste_elsewhere() {
        let dir = temp_dir();
        let file = dir.join("slot-1.schem");
        let world = SandboxWorld::new();
        world
            .create_island(player(1), Position::new(0.0, 120.0, 0.0), "desert")
            .await
            .unwrap();
        world.spawn_entity("villager", Position::new(1.0, 121.0, 1.0), Some("Bob"), BTreeMap::new());

        let a = region_at(0, 0);
        world.save(&a, true, &file).await.unwrap();
        world.remove_entities(&a).await.unwrap();
        world.clear_region(&a).await.unwrap();
        assert_eq!(world.block_count_in(&a), 0);
        assert!(world.entities_in(&a).is_empty());

        world.verify(&file).await.unwrap();
        world.paste(&file, BlockPos::new(800, 120, 0)).await.unwrap();
        assert_eq!(world.block_at(BlockPos::new(800, 120, 0)).as_deref(), Some("sand"));
        let moved = world.entities_in(&region_at(800, 0));
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].offset, [1.0, 1.0, 1.0]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn verify_reports_missing_and_corrupt() {
        let dir = temp_dir();
        let world = SandboxWorld::new();
        assert!(matches!(
            world.verify(&dir.join("none.schem")).await,
            Err(CapabilityError::SchematicNotFound(_))
        ));
        let bad = dir.join("bad.schem");
        std::fs::write(&bad, b"junk").unwrap();
        assert!(world.verify(&bad).await.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn fault_injection_counts_down() {
        let world = SandboxWorld::new();
        world.fail_next(Op::Clear, 2);
        let region = region_at(0, 0);
        assert!(world.clear_region(&region).await.is_err());
        assert!(world.clear_region(&region).await.is_err());
        assert!(world.clear_region(&region).await.is_ok());

        world.fail_always(Op::Clear);
        assert!(world.clear_region(&region).await.is_err());
        world.clear_faults();
        assert!(world.clear_region(&region).await.is_ok());
    }

    #[tokio::test]
    async fn hold_pauses_until_notified() {
        let world = Arc::new(SandboxWorld::new());
        let release = world.hold(Op::Clear);
        let task = {
            let world = world.clone();
            tokio::spawn(async move { world.clear_region(&region_at(0, 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        release.notify_one();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn economy_and_messages() {
        let world = SandboxWorld::new();
        let p = player(1);
        world.set_balance(p, 150.0);
        world.withdraw(p, 100.0).await.unwrap();
        assert_eq!(world.balance(p).await.unwrap(), 50.0);
        assert!(matches!(
            world.withdraw(p, 100.0).await,
            Err(CapabilityError::InsufficientFunds { .. })
        ));

        world.join(p, "Alex", Position::default());
        world.send_message(p, "hello");
        world.quit(p);
        world.send_message(p, "dropped");
        assert_eq!(world.messages_for(p), vec!["hello".to_string()]);
        assert!(matches!(
            world.teleport(p, Position::default()).await,
            Err(CapabilityError::PlayerOffline(_))
        ));
    }

    #[tokio::test]
    async fn set_center_moves_spawn_point() {
        let world = SandboxWorld::new();
        let id = world.register_island(player(1), Position::new(0.0, 120.0, 0.0));
        world
            .set_center(&id, Position::new(2400.0, 120.0, -1600.0))
            .await
            .unwrap();
        let island = world.island(&id).await.unwrap().unwrap();
        assert_eq!(island.spawn_point, Some(Position::new(2400.5, 121.0, -1599.5)));
    }
}
