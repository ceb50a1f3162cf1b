//! Host API: the capabilities skygrid consumes from the game host and the
//! veto events it dispatches before a workflow starts.
//!
//! This crate defines interfaces only. It performs no I/O and has no
//! dependency on skygrid-data or skygrid-server.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─── Identities ──────────────────────────────────────────────────────────────

/// Stable identity of a player, independent of any live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Host-assigned island identifier (e.g. `BSkyBlock6d68f389-...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IslandId(pub String);

impl fmt::Display for IslandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity captured when a request is made. Workflows carry this instead of
/// a session handle so they keep running after the player disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSnapshot {
    pub id: PlayerId,
    pub name: String,
}

impl ActorSnapshot {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ─── Geometry ────────────────────────────────────────────────────────────────

/// Absolute world position with look direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
            yaw: self.yaw,
            pitch: self.pitch,
        }
    }

    pub fn block(&self) -> BlockPos {
        BlockPos {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn to_position(self) -> Position {
        Position::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Inclusive cuboid around an island centre. `center` is the paste origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub min: BlockPos,
    pub max: BlockPos,
    pub center: BlockPos,
}

impl Region {
    /// Full-height column of `range` blocks on each side of `center`.
    pub fn around(center: BlockPos, range: i32, min_y: i32, max_y: i32) -> Self {
        Self {
            min: BlockPos::new(center.x - range, min_y, center.z - range),
            max: BlockPos::new(center.x + range, max_y, center.z + range),
            center,
        }
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }

    pub fn contains_position(&self, pos: &Position) -> bool {
        self.contains(pos.block())
    }
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// An entity captured with enough state to respawn it with its behaviour
/// intact: custom name, profession, trades and so on live in `attributes`.
/// The offset is relative to the paste origin, not absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub kind: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    pub offset: [f64; 3],
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

// ─── Islands and players ─────────────────────────────────────────────────────

/// Host view of a registered island.
#[derive(Debug, Clone, PartialEq)]
pub struct IslandInfo {
    pub id: IslandId,
    pub owner: Option<PlayerId>,
    pub members: Vec<PlayerId>,
    pub center: Position,
    pub protection_range: i32,
    /// Named homes in absolute coordinates. The default home has an empty name.
    pub homes: BTreeMap<String, Position>,
    pub spawn_point: Option<Position>,
}

impl IslandInfo {
    /// Where a player lands when sent "home": default home, spawn point, then centre.
    pub fn default_home(&self) -> Position {
        self.homes
            .get("")
            .copied()
            .or(self.spawn_point)
            .unwrap_or(self.center)
    }

    pub fn is_team_member(&self, player: PlayerId) -> bool {
        self.owner == Some(player) || self.members.contains(&player)
    }
}

/// A connected player as seen by the host at the time of the query.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlinePlayer {
    pub id: PlayerId,
    pub name: String,
    pub position: Position,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("island not found: {0}")]
    IslandNotFound(IslandId),

    #[error("schematic not found: {0}")]
    SchematicNotFound(String),

    #[error("corrupt schematic {path}: {reason}")]
    CorruptSchematic { path: String, reason: String },

    #[error("unknown blueprint: {0}")]
    UnknownBlueprint(String),

    #[error("insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("player is offline: {0}")]
    PlayerOffline(PlayerId),

    #[error("host error: {0}")]
    Host(String),
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Region copy/paste engine. Operations may be slow and may fail; callers
/// treat every call as a suspension point.
#[async_trait]
pub trait SchematicCapability: Send + Sync {
    /// Copy the blocks of `region` (and its entities when asked) into `file`.
    async fn save(
        &self,
        region: &Region,
        include_entities: bool,
        file: &Path,
    ) -> Result<(), CapabilityError>;

    /// Check that `file` exists and decodes, without touching the world.
    async fn verify(&self, file: &Path) -> Result<(), CapabilityError>;

    /// Paste `file` with its origin at `center`.
    async fn paste(&self, file: &Path, center: BlockPos) -> Result<(), CapabilityError>;

    /// Void every block in `region`.
    async fn clear_region(&self, region: &Region) -> Result<(), CapabilityError>;

    /// Snapshot the entities in `region`, offsets relative to `region.center`.
    async fn capture_entities(&self, region: &Region)
        -> Result<Vec<EntitySnapshot>, CapabilityError>;

    /// Remove every entity in `region`. Returns how many were removed.
    async fn remove_entities(&self, region: &Region) -> Result<usize, CapabilityError>;

    /// Respawn `entities` around `center`. Returns how many were spawned.
    async fn spawn_entities(
        &self,
        center: BlockPos,
        entities: &[EntitySnapshot],
    ) -> Result<usize, CapabilityError>;
}

/// Island registry. Only the centre, homes and registration are touched;
/// protection and team logic stay with the host.
#[async_trait]
pub trait IslandCapability: Send + Sync {
    async fn island(&self, id: &IslandId) -> Result<Option<IslandInfo>, CapabilityError>;

    async fn island_of(&self, owner: PlayerId) -> Result<Option<IslandInfo>, CapabilityError>;

    async fn islands(&self) -> Result<Vec<IslandInfo>, CapabilityError>;

    /// Register a new island at `center` and paste `blueprint` there.
    async fn create_island(
        &self,
        owner: PlayerId,
        center: Position,
        blueprint: &str,
    ) -> Result<IslandId, CapabilityError>;

    /// Paste `blueprint` at an existing island's centre and reset its homes
    /// to the blueprint defaults.
    async fn paste_blueprint(&self, id: &IslandId, blueprint: &str)
        -> Result<(), CapabilityError>;

    /// Move the registered centre (and spawn point) of an island.
    async fn set_center(&self, id: &IslandId, center: Position) -> Result<(), CapabilityError>;

    /// Replace every home of an island.
    async fn set_homes(
        &self,
        id: &IslandId,
        homes: BTreeMap<String, Position>,
    ) -> Result<(), CapabilityError>;

    /// Unregister an island. Blocks are not touched.
    async fn delete_island(&self, id: &IslandId) -> Result<(), CapabilityError>;
}

#[async_trait]
pub trait EconomyCapability: Send + Sync {
    async fn balance(&self, player: PlayerId) -> Result<f64, CapabilityError>;
    async fn withdraw(&self, player: PlayerId, amount: f64) -> Result<(), CapabilityError>;
    async fn deposit(&self, player: PlayerId, amount: f64) -> Result<(), CapabilityError>;
}

/// Player sessions and server-wide services.
#[async_trait]
pub trait HostCapability: Send + Sync {
    fn online_players(&self) -> Vec<OnlinePlayer>;

    fn player(&self, id: PlayerId) -> Option<OnlinePlayer> {
        self.online_players().into_iter().find(|p| p.id == id)
    }

    fn player_by_name(&self, name: &str) -> Option<OnlinePlayer> {
        self.online_players()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn has_permission(&self, id: PlayerId, permission: &str) -> bool;

    /// Deliver a chat message. Messages to offline players are dropped.
    fn send_message(&self, id: PlayerId, message: &str);

    async fn teleport(&self, id: PlayerId, to: Position) -> Result<(), CapabilityError>;

    fn spawn_location(&self) -> Position;

    /// Run a command as the console.
    fn dispatch_command(&self, command: &str);
}

// ─── Optional addons ─────────────────────────────────────────────────────────

/// Per-slot challenge/quest progress kept by a separate addon.
#[async_trait]
pub trait ChallengeProgress: Send + Sync {
    async fn save_progress(&self, player: PlayerId, slot: u32) -> Result<(), CapabilityError>;
    async fn restore_progress(&self, player: PlayerId, slot: u32) -> Result<(), CapabilityError>;
}

/// External permission grants tied to the blueprint a slot was created from.
#[async_trait]
pub trait BlueprintGrants: Send + Sync {
    async fn grant(&self, player: PlayerId, blueprint: &str) -> Result<(), CapabilityError>;
    async fn revoke(&self, player: PlayerId, blueprint: &str) -> Result<(), CapabilityError>;
}

/// A soft dependency, resolved once at startup.
pub enum Addon<T: ?Sized> {
    Available(Arc<T>),
    NotAvailable,
}

impl<T: ?Sized> Addon<T> {
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Addon::Available(inner) => Some(inner),
            Addon::NotAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Addon::Available(_))
    }
}

impl<T: ?Sized> Clone for Addon<T> {
    fn clone(&self) -> Self {
        match self {
            Addon::Available(inner) => Addon::Available(Arc::clone(inner)),
            Addon::NotAvailable => Addon::NotAvailable,
        }
    }
}

impl<T: ?Sized> Default for Addon<T> {
    fn default() -> Self {
        Addon::NotAvailable
    }
}

/// Every optional addon the workflows know how to use.
#[derive(Clone, Default)]
pub struct AddonRegistry {
    pub economy: Addon<dyn EconomyCapability>,
    pub challenges: Addon<dyn ChallengeProgress>,
    pub grants: Addon<dyn BlueprintGrants>,
}

impl AddonRegistry {
    /// Names of the addons that resolved, for the startup log.
    pub fn available(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.economy.is_available() {
            names.push("economy");
        }
        if self.challenges.is_available() {
            names.push("challenges");
        }
        if self.grants.is_available() {
            names.push("blueprint-grants");
        }
        names
    }
}

/// The full set of host services handed to the orchestrators.
#[derive(Clone)]
pub struct Capabilities {
    pub schematics: Arc<dyn SchematicCapability>,
    pub islands: Arc<dyn IslandCapability>,
    pub host: Arc<dyn HostCapability>,
    pub addons: AddonRegistry,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Requests that listeners may veto before any world mutation happens.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Claim {
        player: ActorSnapshot,
        coord: String,
    },
    SlotSwitch {
        player: ActorSnapshot,
        from_slot: u32,
        to_slot: u32,
    },
    Relocate {
        player: ActorSnapshot,
        from: String,
        to: String,
        from_world: (i32, i32),
        to_world: (i32, i32),
        cost: f64,
    },
}

impl WorkflowEvent {
    pub fn player(&self) -> &ActorSnapshot {
        match self {
            WorkflowEvent::Claim { player, .. }
            | WorkflowEvent::SlotSwitch { player, .. }
            | WorkflowEvent::Relocate { player, .. } => player,
        }
    }
}

/// Result of dispatching an event to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResult {
    Continue,
    /// Vetoed, with an optional reason shown to the player.
    Cancelled(Option<String>),
}

pub trait WorkflowListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &WorkflowEvent) -> EventResult;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
