//! Test harness: a sandbox world, an authority over in-memory stores and
//! the gate, wired the way `main` wires them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use skygrid_api::{ActorSnapshot, HostCapability, IslandId, PlayerId, Position};
use skygrid_data::{GridCell, ManualClock, MemoryRepository, RelocationRecord, Slot};
use skygrid_world::SandboxWorld;
use tokio::sync::watch;

use crate::authority::{Authority, GameState, TickServices};
use crate::config::ServerConfig;
use crate::events::ListenerRegistry;
use crate::gate::{Gate, GateError};
use crate::workflow::context::WorkflowReport;
use crate::workflow::error::WorkflowError;
use crate::workflow::Orchestrator;

/// Players join here, far away from every grid cell used in tests.
const TEST_SPAWN: Position = Position::new(0.5, 64.0, 100_000.5);
const START_MS: u64 = 1_700_000_000_000;

pub struct Harness {
    pub world: Arc<SandboxWorld>,
    pub orch: Orchestrator,
    pub gate: Gate,
    pub clock: Arc<ManualClock>,
    pub dir: PathBuf,
    names: Mutex<HashMap<PlayerId, String>>,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(mut config: ServerConfig) -> Self {
        let dir = std::env::temp_dir().join(format!("skygrid_test_{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        config.server.data_dir = dir.clone();

        let world = Arc::new(
            SandboxWorld::new()
                .with_spawn(TEST_SPAWN)
                .with_protection_range(config.grid.protection_range),
        );
        let clock = Arc::new(ManualClock::new(START_MS));
        let state = GameState::from_config(
            &config,
            Arc::new(MemoryRepository::<Vec<GridCell>>::new()),
            Arc::new(MemoryRepository::<Vec<Slot>>::new()),
            Arc::new(MemoryRepository::<Vec<RelocationRecord>>::new()),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (authority, _task) = Authority::spawn(
            state,
            TickServices {
                clock: clock.clone(),
                host: world.clone(),
                flush_every: 0,
            },
            shutdown_rx,
        );
        let caps = crate::sandbox_capabilities(world.clone());
        let orch = Orchestrator::new(authority, caps, &config, clock.clone());
        let gate = Gate::new(orch.clone(), Arc::new(ListenerRegistry::new()));

        Self {
            world,
            orch,
            gate,
            clock,
            dir,
            names: Mutex::new(HashMap::new()),
            _shutdown: shutdown_tx,
        }
    }

    /// Connect a new player at spawn.
    pub fn join(&self, name: &str) -> ActorSnapshot {
        let id = PlayerId::random();
        self.world.join(id, name, TEST_SPAWN);
        self.names.lock().insert(id, name.to_string());
        ActorSnapshot::new(id, name)
    }

    pub fn actor(&self, id: PlayerId) -> ActorSnapshot {
        let name = self.names.lock().get(&id).cloned().unwrap_or_else(|| id.to_string());
        ActorSnapshot::new(id, name)
    }

    pub fn spawn(&self) -> Position {
        self.world.spawn_location()
    }

    pub async fn claim(&self, name: &str, coord: &str) -> PlayerId {
        self.claim_with(name, coord, "default").await
    }

    /// Join `name` and claim `coord` through the gate. Panics on failure.
    pub async fn claim_with(&self, name: &str, coord: &str, blueprint: &str) -> PlayerId {
        let actor = self.join(name);
        self.gate
            .request_claim(&actor, coord.parse().unwrap(), Some(blueprint.to_string()))
            .await
            .unwrap();
        self.gate
            .confirm(&actor)
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        actor.id
    }

    pub async fn switch(&self, player: PlayerId, to: u32) -> Result<WorkflowReport, WorkflowError> {
        let actor = self.actor(player);
        self.gate.request_switch(&actor, to).await.map_err(workflow_error)?;
        self.confirm(&actor).await
    }

    pub async fn relocate(&self, player: PlayerId, to: &str) -> Result<WorkflowReport, WorkflowError> {
        let actor = self.actor(player);
        self.gate
            .request_relocate(&actor, to.parse().unwrap())
            .await
            .map_err(workflow_error)?;
        self.confirm(&actor).await
    }

    async fn confirm(&self, actor: &ActorSnapshot) -> Result<WorkflowReport, WorkflowError> {
        let handle = self.gate.confirm(actor).await.map_err(workflow_error)?;
        handle.await.unwrap()
    }

    pub async fn slots(&self, player: PlayerId) -> Vec<Slot> {
        self.orch
            .authority
            .call(move |state| state.slots.player_slots(player).into_iter().cloned().collect())
            .await
            .unwrap()
    }

    pub async fn island_of(&self, player: PlayerId) -> IslandId {
        self.orch
            .authority
            .call(move |state| state.slots.active(player).and_then(|s| s.island.clone()))
            .await
            .unwrap()
            .unwrap()
    }
}

fn workflow_error(err: GateError) -> WorkflowError {
    match err {
        GateError::Rejected(reason) => WorkflowError::Rejected(reason),
        GateError::Authority(closed) => WorkflowError::Authority(closed),
        other => panic!("unexpected gate error: {other:?}"),
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
