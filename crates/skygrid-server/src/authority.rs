//! The authority: one task that owns all shared game state.
//!
//! Workflows never touch [`GameState`] directly. They send a closure with
//! [`Authority::call`] and await the reply, so every mutation happens on
//! one task in arrival order and no locks are needed. The authority also
//! runs a 50 ms tick for selection expiry and periodic store flushes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use skygrid_api::{HostCapability, PlayerId};
use skygrid_data::{
    Clock, DataError, GridCell, GridCoord, GridIndex, PendingFlush, RelocationLog, RelocationRecord,
    Repository, Slot, SlotStore,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::gate::PendingSelection;
use crate::workflow::error::Rejection;

/// Authority tick length (20 ticks per second).
pub const TICK: Duration = Duration::from_millis(50);

type Job = Box<dyn FnOnce(&mut GameState) + Send>;

#[derive(Debug, Error)]
#[error("the authority task has stopped")]
pub struct AuthorityClosed;

// ─── Game state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Claim,
    Switch,
    Relocate,
    Removal,
    RestoreSlot,
    RestoreBackup,
    Backup,
    DeleteSlot,
}

impl WorkflowKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowKind::Claim => "claim",
            WorkflowKind::Switch => "slot switch",
            WorkflowKind::Relocate => "relocation",
            WorkflowKind::Removal => "island removal",
            WorkflowKind::RestoreSlot => "slot restore",
            WorkflowKind::RestoreBackup => "backup restore",
            WorkflowKind::Backup => "backup",
            WorkflowKind::DeleteSlot => "slot deletion",
        }
    }
}

/// Marker for a player's running workflow.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub kind: WorkflowKind,
    pub started_ms: u64,
    /// Grid cells this workflow writes to.
    pub cells: Vec<GridCoord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Grid,
    Slots,
    Relocations,
}

pub struct GameState {
    pub grid: GridIndex,
    pub slots: SlotStore,
    pub relocations: RelocationLog,
    pub in_flight: HashMap<PlayerId, InFlight>,
    /// Cells written by in-flight workflows.
    pub targeted: HashSet<GridCoord>,
    pub pending: HashMap<PlayerId, PendingSelection>,
    /// Set once shutdown begins. Only backups may start after that.
    pub closing: bool,
    pub tick: u64,
}

impl GameState {
    pub fn new(grid: GridIndex, slots: SlotStore, relocations: RelocationLog) -> Self {
        Self {
            grid,
            slots,
            relocations,
            in_flight: HashMap::new(),
            targeted: HashSet::new(),
            pending: HashMap::new(),
            closing: false,
            tick: 0,
        }
    }

    /// Empty stores shaped by `config`, backed by the given repositories.
    pub fn from_config(
        config: &ServerConfig,
        grid: Arc<dyn Repository<Vec<GridCell>>>,
        slots: Arc<dyn Repository<Vec<Slot>>>,
        relocations: Arc<dyn Repository<Vec<RelocationRecord>>>,
    ) -> Self {
        Self::new(
            GridIndex::new(config.grid.bounds(), grid),
            SlotStore::new(config.slots.defaults(), slots),
            RelocationLog::new(relocations),
        )
    }

    /// Load every store from its repository.
    pub fn reload(&mut self) -> Result<(), DataError> {
        let cells = self.grid.reload()?;
        let slots = self.slots.reload()?;
        let relocations = self.relocations.reload()?;
        info!("Loaded {cells} grid cells, {slots} slots, {relocations} relocation records");
        Ok(())
    }

    pub fn is_busy(&self, player: PlayerId) -> bool {
        self.in_flight.contains_key(&player)
    }

    /// Claim the single in-flight slot for `player` and mark `cells` as
    /// targeted. Fails without changing anything if either is taken.
    pub fn begin_workflow(
        &mut self,
        player: PlayerId,
        kind: WorkflowKind,
        cells: Vec<GridCoord>,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        if self.closing && kind != WorkflowKind::Backup {
            return Err(Rejection::ShuttingDown);
        }
        if let Some(existing) = self.in_flight.get(&player) {
            return Err(Rejection::AlreadyInFlight(existing.kind));
        }
        if let Some(busy) = cells.iter().find(|c| self.targeted.contains(c)) {
            return Err(Rejection::CellBusy(*busy));
        }
        self.targeted.extend(cells.iter().copied());
        self.in_flight.insert(
            player,
            InFlight {
                kind,
                started_ms: now_ms,
                cells,
            },
        );
        Ok(())
    }

    pub fn finish_workflow(&mut self, player: PlayerId) -> Option<InFlight> {
        let done = self.in_flight.remove(&player)?;
        for cell in &done.cells {
            self.targeted.remove(cell);
        }
        Some(done)
    }

    /// Drop selections whose confirmation window has passed.
    pub fn expire_pending(&mut self, now_ms: u64) -> Vec<PlayerId> {
        let expired: Vec<PlayerId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.expires_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    pub fn mark_dirty(&mut self, store: Store) {
        match store {
            Store::Grid => self.grid.mark_dirty(),
            Store::Slots => self.slots.mark_dirty(),
            Store::Relocations => self.relocations.mark_dirty(),
        }
    }

    pub fn take_flushes(&mut self) -> Flushes {
        Flushes {
            grid: self.grid.take_flush(),
            slots: self.slots.take_flush(),
            relocations: self.relocations.take_flush(),
        }
    }
}

/// Snapshots of every dirty store.
pub struct Flushes {
    grid: Option<PendingFlush<Vec<GridCell>>>,
    slots: Option<PendingFlush<Vec<Slot>>>,
    relocations: Option<PendingFlush<Vec<RelocationRecord>>>,
}

impl Flushes {
    pub fn is_empty(&self) -> bool {
        self.grid.is_none() && self.slots.is_none() && self.relocations.is_none()
    }

    /// Write every snapshot. Blocking. Returns the stores that failed.
    pub fn write(self) -> Vec<Store> {
        let mut failed = Vec::new();
        if let Some(flush) = self.grid {
            if let Err(e) = flush.write() {
                error!("Failed to write grid store: {e}");
                failed.push(Store::Grid);
            }
        }
        if let Some(flush) = self.slots {
            if let Err(e) = flush.write() {
                error!("Failed to write slot store: {e}");
                failed.push(Store::Slots);
            }
        }
        if let Some(flush) = self.relocations {
            if let Err(e) = flush.write() {
                error!("Failed to write relocation store: {e}");
                failed.push(Store::Relocations);
            }
        }
        failed
    }
}

// ─── Authority handle ────────────────────────────────────────────────────────

/// What the tick needs besides the state itself.
pub struct TickServices {
    pub clock: Arc<dyn Clock>,
    pub host: Arc<dyn HostCapability>,
    /// Flush dirty stores every this many ticks. 0 disables periodic flushes.
    pub flush_every: u64,
}

#[derive(Clone)]
pub struct Authority {
    tx: mpsc::Sender<Job>,
    /// Held from taking a snapshot until it is written, so flushes never
    /// overlap and an older snapshot never lands after a newer one.
    flush_lock: Arc<Mutex<()>>,
}

impl Authority {
    /// Start the authority task. It stops when `shutdown` flips to true
    /// (or every handle is dropped) and hands the state back.
    pub fn spawn(
        state: GameState,
        services: TickServices,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<GameState>) {
        let (tx, rx) = mpsc::channel::<Job>(256);
        let weak = tx.downgrade();
        let flush_lock = Arc::new(Mutex::new(()));
        let handle = tokio::spawn(run(state, rx, weak, flush_lock.clone(), services, shutdown));
        (Self { tx, flush_lock }, handle)
    }

    /// Run `job` on the authority and return its result.
    pub async fn call<R, F>(&self, job: F) -> Result<R, AuthorityClosed>
    where
        R: Send + 'static,
        F: FnOnce(&mut GameState) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job = Box::new(move |state| {
            let _ = reply_tx.send(job(state));
        });
        self.tx.send(boxed).await.map_err(|_| AuthorityClosed)?;
        reply_rx.await.map_err(|_| AuthorityClosed)
    }

    /// Refuse new workflows and wait up to `limit` for running ones to
    /// finish. Returns how many are still in flight.
    pub async fn drain(&self, limit: Duration) -> Result<usize, AuthorityClosed> {
        let deadline = tokio::time::Instant::now() + limit;
        self.call(|state| state.closing = true).await?;
        loop {
            let running = self.call(|state| state.in_flight.len()).await?;
            if running == 0 || tokio::time::Instant::now() >= deadline {
                return Ok(running);
            }
            tokio::time::sleep(TICK).await;
        }
    }

    /// Write every dirty store now. Stores that fail to write stay dirty
    /// and are returned.
    pub async fn flush(&self) -> Result<Vec<Store>, AuthorityClosed> {
        let _writing = self.lock_flushes().await;
        let flushes = self.call(|state| state.take_flushes()).await?;
        if flushes.is_empty() {
            return Ok(Vec::new());
        }
        let failed = match tokio::task::spawn_blocking(move || flushes.write()).await {
            Ok(failed) => failed,
            Err(e) => {
                error!("Store flush panicked: {e}");
                vec![Store::Grid, Store::Slots, Store::Relocations]
            }
        };
        if !failed.is_empty() {
            let retry = failed.clone();
            self.call(move |state| {
                for store in retry {
                    state.mark_dirty(store);
                }
            })
            .await?;
        }
        Ok(failed)
    }

    /// Wait for any running flush and keep others out while the guard lives.
    pub async fn lock_flushes(&self) -> OwnedMutexGuard<()> {
        self.flush_lock.clone().lock_owned().await
    }
}

async fn run(
    mut state: GameState,
    mut rx: mpsc::Receiver<Job>,
    weak: mpsc::WeakSender<Job>,
    flush_lock: Arc<Mutex<()>>,
    services: TickServices,
    mut shutdown: watch::Receiver<bool>,
) -> GameState {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Authority started");

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job(&mut state),
                None => break,
            },
            _ = ticker.tick() => on_tick(&mut state, &services, &weak, &flush_lock),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Finish anything already queued so no caller is left hanging.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        job(&mut state);
    }
    if !state.in_flight.is_empty() {
        warn!(
            "Authority stopping with {} workflow(s) still in flight",
            state.in_flight.len()
        );
    }
    info!("Authority stopped after {} ticks", state.tick);
    state
}

fn on_tick(
    state: &mut GameState,
    services: &TickServices,
    weak: &mpsc::WeakSender<Job>,
    flush_lock: &Arc<Mutex<()>>,
) {
    state.tick += 1;

    for player in state.expire_pending(services.clock.now_ms()) {
        debug!("Pending selection for {player} expired");
        services
            .host
            .send_message(player, "Your selection expired. Nothing was changed.");
    }

    if services.flush_every > 0 && state.tick % services.flush_every == 0 {
        // Another flush is writing; the stores stay dirty for the next round.
        let Ok(writing) = flush_lock.clone().try_lock_owned() else {
            return;
        };
        let flushes = state.take_flushes();
        if flushes.is_empty() {
            return;
        }
        let weak = weak.clone();
        tokio::spawn(async move {
            let _writing = writing;
            let failed = match tokio::task::spawn_blocking(move || flushes.write()).await {
                Ok(failed) => failed,
                Err(e) => {
                    error!("Store flush panicked: {e}");
                    vec![Store::Grid, Store::Slots, Store::Relocations]
                }
            };
            if failed.is_empty() {
                return;
            }
            // Retry on the next flush.
            if let Some(tx) = weak.upgrade() {
                let _ = tx
                    .send(Box::new(move |state: &mut GameState| {
                        for store in failed {
                            state.mark_dirty(store);
                        }
                    }))
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygrid_api::IslandId;
    use skygrid_data::{GridBounds, ManualClock, MemoryRepository, SlotDefaults};
    use skygrid_world::SandboxWorld;
    use uuid::Uuid;

    use crate::gate::{PendingAction, PendingSelection};

    fn memory_state() -> GameState {
        GameState::new(
            GridIndex::new(GridBounds::default(), Arc::new(MemoryRepository::<Vec<GridCell>>::new())),
            SlotStore::new(SlotDefaults::default(), Arc::new(MemoryRepository::<Vec<Slot>>::new())),
            RelocationLog::new(Arc::new(MemoryRepository::<Vec<RelocationRecord>>::new())),
        )
    }

    fn services(clock: Arc<ManualClock>, flush_every: u64) -> TickServices {
        TickServices {
            clock,
            host: Arc::new(SandboxWorld::new()),
            flush_every,
        }
    }

    fn player(n: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(n))
    }

    #[test]
    fn one_workflow_per_player() {
        let mut state = memory_state();
        let p = player(1);
        state
            .begin_workflow(p, WorkflowKind::Switch, vec![GridCoord::new(0, 0)], 0)
            .unwrap();
        assert!(matches!(
            state.begin_workflow(p, WorkflowKind::Relocate, vec![], 0),
            Err(Rejection::AlreadyInFlight(WorkflowKind::Switch))
        ));
        assert!(state.finish_workflow(p).is_some());
        assert!(state.targeted.is_empty());
        assert!(state.begin_workflow(p, WorkflowKind::Relocate, vec![], 0).is_ok());
    }

    #[test]
    fn targeted_cells_are_exclusive() {
        let mut state = memory_state();
        let cell = GridCoord::new(3, -2);
        state
            .begin_workflow(player(1), WorkflowKind::Relocate, vec![GridCoord::new(0, 0), cell], 0)
            .unwrap();
        assert!(matches!(
            state.begin_workflow(player(2), WorkflowKind::Claim, vec![cell], 0),
            Err(Rejection::CellBusy(c)) if c == cell
        ));
        // The rejected attempt left nothing behind.
        assert!(!state.is_busy(player(2)));
        assert_eq!(state.targeted.len(), 2);
    }

    #[test]
    fn closing_admits_only_backups() {
        let mut state = memory_state();
        state.closing = true;
        assert!(matches!(
            state.begin_workflow(player(1), WorkflowKind::Switch, vec![], 0),
            Err(Rejection::ShuttingDown)
        ));
        assert!(state.begin_workflow(player(1), WorkflowKind::Backup, vec![], 0).is_ok());
    }

    #[tokio::test]
    async fn drain_waits_for_running_workflows() {
        let (_tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(0));
        let (authority, _handle) = Authority::spawn(memory_state(), services(clock, 0), rx);
        authority
            .call(|state| state.begin_workflow(player(1), WorkflowKind::Switch, vec![], 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(authority.drain(TICK * 2).await.unwrap(), 1);

        let finisher = authority.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TICK * 2).await;
            finisher.call(|state| state.finish_workflow(player(1))).await.unwrap();
        });
        assert_eq!(authority.drain(Duration::from_secs(5)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn call_runs_on_state() {
        let (_tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(0));
        let (authority, _handle) = Authority::spawn(memory_state(), services(clock, 0), rx);
        let status = authority
            .call(|state| {
                state
                    .grid
                    .occupy(GridCoord::new(1, 1), player(1), "Alex", IslandId("i".into()))
                    .map(|_| state.grid.occupied_count())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, 1);
    }

    #[tokio::test]
    async fn shutdown_returns_state() {
        let (tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(0));
        let (authority, handle) = Authority::spawn(memory_state(), services(clock, 0), rx);
        authority.call(|state| state.tick = 1_000).await.unwrap();
        tx.send(true).unwrap();
        let state = handle.await.unwrap();
        assert!(state.tick >= 1_000);
        assert!(authority.call(|_| ()).await.is_err());
    }

    #[tokio::test]
    async fn tick_expires_pending_selections() {
        let (_tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(10_000));
        let (authority, _handle) = Authority::spawn(memory_state(), services(clock.clone(), 0), rx);
        authority
            .call(|state| {
                state.pending.insert(
                    player(1),
                    PendingSelection {
                        action: PendingAction::Switch { from: 1, to: 2 },
                        expires_ms: 15_000,
                    },
                );
            })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(TICK * 3).await;
        let left = authority.call(|state| state.pending.len()).await.unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn tick_flushes_dirty_stores() {
        let (_tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(0));
        let (authority, _handle) = Authority::spawn(memory_state(), services(clock, 1), rx);
        authority
            .call(|state| {
                state
                    .grid
                    .occupy(GridCoord::new(0, 0), player(1), "Alex", IslandId("i".into()))
                    .unwrap();
            })
            .await
            .unwrap();
        tokio::time::sleep(TICK * 4).await;
        let dirty = authority.call(|state| state.grid.is_dirty()).await.unwrap();
        assert!(!dirty);
    }

    #[tokio::test]
    async fn tick_skips_flush_while_another_is_writing() {
        let (_tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::new(0));
        let (authority, _handle) = Authority::spawn(memory_state(), services(clock, 1), rx);
        let writing = authority.lock_flushes().await;
        authority
            .call(|state| state.grid.reserve(GridCoord::new(1, 1), true, None))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(TICK * 4).await;
        assert!(authority.call(|state| state.grid.is_dirty()).await.unwrap());

        drop(writing);
        tokio::time::sleep(TICK * 4).await;
        assert!(!authority.call(|state| state.grid.is_dirty()).await.unwrap());
    }

    #[tokio::test]
    async fn flush_writes_on_demand() {
        let (_tx, rx) = watch::channel(false);
        let grid_repo = Arc::new(MemoryRepository::<Vec<GridCell>>::new());
        let state = GameState::new(
            GridIndex::new(GridBounds::default(), grid_repo.clone()),
            SlotStore::new(SlotDefaults::default(), Arc::new(MemoryRepository::<Vec<Slot>>::new())),
            RelocationLog::new(Arc::new(MemoryRepository::<Vec<RelocationRecord>>::new())),
        );
        let clock = Arc::new(ManualClock::new(0));
        let (authority, _handle) = Authority::spawn(state, services(clock, 0), rx);
        authority
            .call(|state| state.grid.reserve(GridCoord::new(2, 2), true, None))
            .await
            .unwrap()
            .unwrap();

        assert!(authority.flush().await.unwrap().is_empty());
        assert!(!grid_repo.is_empty());
        assert!(!authority.call(|state| state.grid.is_dirty()).await.unwrap());
        assert!(authority.flush().await.unwrap().is_empty());
    }
}
