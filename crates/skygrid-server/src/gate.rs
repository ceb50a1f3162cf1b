//! Confirmation and admin gate.
//!
//! Player requests are validated (permissions, cooldowns, funds, cell
//! availability) and parked as a pending selection until the player
//! confirms. Confirmation validates again, asks the veto listeners, claims
//! the per-player in-flight marker and spawns the workflow. Admin commands
//! and the small slot-management operations run directly.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use skygrid_api::{
    ActorSnapshot, CapabilityError, EventResult, IslandId, PlayerId, WorkflowEvent,
};
use skygrid_data::{
    format_cooldown, CellStatus, DataError, GridBounds, GridCoord, RelocationRecord, Reservation,
    Slot,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authority::{AuthorityClosed, GameState, WorkflowKind};
use crate::backup::BackupEntry;
use crate::events::ListenerRegistry;
use crate::workflow::claim::{plan_claim, plan_slot_restore};
use crate::workflow::context::WorkflowReport;
use crate::workflow::error::{FailureCause, Rejection, WorkflowError};
use crate::workflow::relocation::plan_relocation;
use crate::workflow::{blocking, Orchestrator};

pub const PERM_BYPASS_SWITCH_COOLDOWN: &str = "skygrid.bypass.cooldown.switch";
pub const PERM_BYPASS_RELOCATION_COOLDOWN: &str = "skygrid.bypass.cooldown.relocation";
pub const PERM_BYPASS_RELOCATION_COST: &str = "skygrid.bypass.cost.relocation";
pub const PERM_ADMIN: &str = "skygrid.admin";

pub type WorkflowHandle = JoinHandle<Result<WorkflowReport, WorkflowError>>;

// ─── Pending selections ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    Claim {
        coord: GridCoord,
        price: f64,
        blueprint: String,
    },
    Switch {
        from: u32,
        to: u32,
    },
    Relocate {
        from: GridCoord,
        to: GridCoord,
        cost: f64,
    },
    RestoreSlot {
        slot: u32,
        coord: GridCoord,
    },
}

/// A validated request waiting for `confirm`.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    pub action: PendingAction,
    pub expires_ms: u64,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("nothing is waiting for confirmation")]
    NothingPending,

    #[error("{0}")]
    Failed(#[from] FailureCause),

    #[error(transparent)]
    Authority(#[from] AuthorityClosed),
}

impl GateError {
    pub fn user_message(&self) -> String {
        match self {
            GateError::Rejected(reason) => format!("Cannot do that: {reason}."),
            GateError::NothingPending => "You have nothing to confirm.".into(),
            GateError::Failed(e) => format!("That did not work: {e}."),
            GateError::Authority(_) => "The server is shutting down.".into(),
        }
    }
}

impl From<CapabilityError> for GateError {
    fn from(err: CapabilityError) -> Self {
        GateError::Failed(err.into())
    }
}

impl From<DataError> for GateError {
    fn from(err: DataError) -> Self {
        GateError::Rejected(err.into())
    }
}

/// Who issued a command.
#[derive(Debug, Clone)]
pub enum Caller {
    Console,
    Player(ActorSnapshot),
}

impl Caller {
    /// Progress messages for console callers go nowhere.
    pub fn actor(&self) -> ActorSnapshot {
        match self {
            Caller::Console => ActorSnapshot::new(PlayerId(Uuid::nil()), "Console"),
            Caller::Player(actor) => actor.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Switch,
    Relocation,
    All,
}

/// Everything a player sees about their slots.
#[derive(Debug, Clone)]
pub struct SlotsOverview {
    pub slots: Vec<Slot>,
    pub coord: Option<GridCoord>,
    pub switch_cooldown: Duration,
    pub relocation_cooldown: Duration,
}

/// Admin view of one cell.
#[derive(Debug, Clone)]
pub struct CellInfo {
    pub coord: GridCoord,
    pub status: CellStatus,
    pub world_center: (i32, i32),
    pub owner: Option<PlayerId>,
    pub owner_name: Option<String>,
    pub island: Option<IslandId>,
    pub reservation: Option<Reservation>,
    pub relocation: Option<RelocationRecord>,
}

// ─── Checks ──────────────────────────────────────────────────────────────────

fn reject_busy(state: &GameState, player: PlayerId) -> Result<(), Rejection> {
    match state.in_flight.get(&player) {
        Some(running) => Err(Rejection::AlreadyInFlight(running.kind)),
        None => Ok(()),
    }
}

fn reject_targeted(state: &GameState, coord: GridCoord) -> Result<(), Rejection> {
    if state.targeted.contains(&coord) {
        return Err(Rejection::CellBusy(coord));
    }
    Ok(())
}

/// Validate a switch to `to` and return the current active slot.
pub fn check_switch(
    state: &GameState,
    player: PlayerId,
    to: u32,
    now_ms: u64,
    window: Duration,
    bypass: bool,
) -> Result<u32, Rejection> {
    reject_busy(state, player)?;
    let max = state.slots.defaults().max_slots;
    if to == 0 || to > max {
        return Err(Rejection::SlotLimit { slot: to, max });
    }
    let active = state.slots.active(player).ok_or_else(|| {
        if state.slots.is_homeless(player) {
            Rejection::Homeless
        } else {
            Rejection::NoIsland
        }
    })?;
    if active.number == to {
        return Err(Rejection::SlotActive(to));
    }
    let remaining = state.slots.remaining_cooldown(player, now_ms, window, bypass);
    if !remaining.is_zero() {
        return Err(Rejection::Cooldown(remaining));
    }
    Ok(active.number)
}

/// Validate a relocation to `to` and return the current coordinate.
pub fn check_relocation(
    state: &GameState,
    player: PlayerId,
    to: GridCoord,
    now_ms: u64,
    window: Duration,
    bypass: bool,
) -> Result<GridCoord, Rejection> {
    reject_busy(state, player)?;
    let plan = plan_relocation(state, player, to)?;
    reject_targeted(state, to)?;
    let remaining = state
        .relocations
        .remaining_cooldown(player, now_ms, window, bypass);
    if !remaining.is_zero() {
        return Err(Rejection::Cooldown(remaining));
    }
    Ok(plan.from)
}

fn check_claim(state: &GameState, player: PlayerId, coord: GridCoord) -> Result<f64, Rejection> {
    reject_busy(state, player)?;
    reject_targeted(state, coord)?;
    plan_claim(state, player, coord)
}

fn check_slot_restore(state: &GameState, player: PlayerId, slot: u32, coord: GridCoord) -> Result<(), Rejection> {
    reject_busy(state, player)?;
    reject_targeted(state, coord)?;
    plan_slot_restore(state, player, slot, coord).map(|_| ())
}

// ─── Gate ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Gate {
    orch: Orchestrator,
    listeners: Arc<ListenerRegistry>,
}

impl Gate {
    pub fn new(orch: Orchestrator, listeners: Arc<ListenerRegistry>) -> Self {
        Self { orch, listeners }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orch
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    fn has(&self, player: PlayerId, permission: &str) -> bool {
        self.orch.caps.host.has_permission(player, permission)
    }

    fn require_admin(&self, caller: &Caller) -> Result<(), Rejection> {
        match caller {
            Caller::Console => Ok(()),
            Caller::Player(actor) if self.has(actor.id, PERM_ADMIN) => Ok(()),
            Caller::Player(_) => Err(Rejection::NoPermission(PERM_ADMIN)),
        }
    }

    fn timeout_secs(&self) -> u64 {
        self.orch.settings.confirmation_timeout.as_secs()
    }

    /// Check the player can pay `amount`. Without an economy addon
    /// everything is free.
    async fn check_funds(&self, player: PlayerId, amount: f64) -> Result<(), GateError> {
        if amount <= 0.0 {
            return Ok(());
        }
        let Some(economy) = self.orch.caps.addons.economy.get() else {
            return Ok(());
        };
        let available = economy.balance(player).await?;
        if available < amount {
            return Err(Rejection::InsufficientFunds {
                needed: amount,
                available,
                currency: self.orch.settings.currency_name.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn park(&self, player: PlayerId, action: PendingAction) -> Result<(), GateError> {
        let expires_ms = self.orch.now_ms() + self.orch.settings.confirmation_timeout.as_millis() as u64;
        self.orch
            .authority
            .call(move |state| {
                state
                    .pending
                    .insert(player, PendingSelection { action, expires_ms });
            })
            .await?;
        Ok(())
    }

    fn veto(&self, event: &WorkflowEvent) -> Result<(), Rejection> {
        match self.listeners.dispatch(event) {
            EventResult::Continue => Ok(()),
            EventResult::Cancelled(reason) => {
                info!("{:?} for {} was vetoed", event, event.player().name);
                Err(Rejection::Vetoed(reason))
            }
        }
    }

    /// Run `prepare` and claim the in-flight marker in one authority job.
    async fn begin<F>(
        &self,
        player: PlayerId,
        kind: WorkflowKind,
        cells: Vec<GridCoord>,
        prepare: F,
    ) -> Result<(), GateError>
    where
        F: FnOnce(&mut GameState) -> Result<(), Rejection> + Send + 'static,
    {
        let now = self.orch.now_ms();
        self.orch
            .authority
            .call(move |state| {
                prepare(state)?;
                state.begin_workflow(player, kind, cells, now)
            })
            .await??;
        Ok(())
    }

    /// Spawn a workflow. Rejections are reported to the actor; the
    /// in-flight marker of `owner` is released when the workflow ends.
    fn launch<F>(&self, actor: ActorSnapshot, owner: PlayerId, workflow: F) -> WorkflowHandle
    where
        F: Future<Output = Result<WorkflowReport, WorkflowError>> + Send + 'static,
    {
        let authority = self.orch.authority.clone();
        let host = self.orch.caps.host.clone();
        tokio::spawn(async move {
            let result = workflow.await;
            if let Err(e) = &result {
                if matches!(e, WorkflowError::Rejected(_) | WorkflowError::Authority(_)) {
                    host.send_message(actor.id, &e.user_message());
                }
            }
            if authority
                .call(move |state| state.finish_workflow(owner))
                .await
                .is_err()
            {
                warn!("Could not release workflow marker of {owner}: authority stopped");
            }
            result
        })
    }

    // ─── Requests ────────────────────────────────────────────────────────

    pub async fn request_claim(
        &self,
        actor: &ActorSnapshot,
        coord: GridCoord,
        blueprint: Option<String>,
    ) -> Result<String, GateError> {
        let id = actor.id;
        let price = self
            .orch
            .authority
            .call(move |state| check_claim(state, id, coord))
            .await??;
        self.check_funds(id, price).await?;
        let blueprint = blueprint.unwrap_or_else(|| self.orch.settings.default_blueprint.clone());
        let cost = if price > 0.0 {
            format!(" for {price:.2} {}", self.orch.settings.currency_name)
        } else {
            String::new()
        };
        let prompt = format!(
            "Claim {coord} with the {blueprint} island{cost}? Type 'confirm' within {}s or 'cancel'.",
            self.timeout_secs()
        );
        self.park(id, PendingAction::Claim { coord, price, blueprint }).await?;
        Ok(prompt)
    }

    pub async fn request_switch(&self, actor: &ActorSnapshot, to: u32) -> Result<String, GateError> {
        let id = actor.id;
        let (now, window) = (self.orch.now_ms(), self.orch.settings.switch_cooldown);
        let bypass = self.has(id, PERM_BYPASS_SWITCH_COOLDOWN);
        let from = self
            .orch
            .authority
            .call(move |state| check_switch(state, id, to, now, window, bypass))
            .await??;
        self.park(id, PendingAction::Switch { from, to }).await?;
        Ok(format!(
            "Switch from slot {from} to slot {to}? Your current island is saved first. \
             Type 'confirm' within {}s or 'cancel'.",
            self.timeout_secs()
        ))
    }

    pub async fn request_relocate(&self, actor: &ActorSnapshot, to: GridCoord) -> Result<String, GateError> {
        let id = actor.id;
        let (now, window) = (self.orch.now_ms(), self.orch.settings.relocation_cooldown);
        let bypass = self.has(id, PERM_BYPASS_RELOCATION_COOLDOWN);
        let from = self
            .orch
            .authority
            .call(move |state| check_relocation(state, id, to, now, window, bypass))
            .await??;
        let cost = if self.has(id, PERM_BYPASS_RELOCATION_COST) {
            0.0
        } else {
            self.orch.settings.relocation_cost
        };
        self.check_funds(id, cost).await?;
        let fee = if cost > 0.0 {
            format!(" for {cost:.2} {}", self.orch.settings.currency_name)
        } else {
            String::new()
        };
        self.park(id, PendingAction::Relocate { from, to, cost }).await?;
        Ok(format!(
            "Move your island from {from} to {to}{fee}? Type 'confirm' within {}s or 'cancel'.",
            self.timeout_secs()
        ))
    }

    pub async fn request_slot_restore(&self, actor: &ActorSnapshot, slot: u32, coord: GridCoord) -> Result<String, GateError> {
        let id = actor.id;
        self.orch
            .authority
            .call(move |state| check_slot_restore(state, id, slot, coord))
            .await??;
        self.park(id, PendingAction::RestoreSlot { slot, coord }).await?;
        Ok(format!(
            "Restore slot {slot} at {coord}? Type 'confirm' within {}s or 'cancel'.",
            self.timeout_secs()
        ))
    }

    /// Start the actor's pending selection.
    pub async fn confirm(&self, actor: &ActorSnapshot) -> Result<WorkflowHandle, GateError> {
        let id = actor.id;
        let now = self.orch.now_ms();
        let pending = self
            .orch
            .authority
            .call(move |state| state.pending.remove(&id))
            .await?
            .filter(|p| p.expires_ms > now)
            .ok_or(GateError::NothingPending)?;

        let orch = self.orch.clone();
        let who = actor.clone();
        match pending.action {
            PendingAction::Claim { coord, price, blueprint } => {
                self.veto(&WorkflowEvent::Claim {
                    player: actor.clone(),
                    coord: coord.to_string(),
                })?;
                self.check_funds(id, price).await?;
                self.begin(id, WorkflowKind::Claim, vec![coord], move |state| {
                    plan_claim(state, id, coord).map(|_| ())
                })
                .await?;
                Ok(self.launch(actor.clone(), id, async move {
                    orch.claim(who, coord, blueprint).await
                }))
            }
            PendingAction::Switch { from, to } => {
                self.veto(&WorkflowEvent::SlotSwitch {
                    player: actor.clone(),
                    from_slot: from,
                    to_slot: to,
                })?;
                let window = self.orch.settings.switch_cooldown;
                let bypass = self.has(id, PERM_BYPASS_SWITCH_COOLDOWN);
                self.begin(id, WorkflowKind::Switch, Vec::new(), move |state| {
                    check_switch(state, id, to, now, window, bypass)?;
                    state.slots.create_or_get(id, to)?;
                    Ok(())
                })
                .await?;
                Ok(self.launch(actor.clone(), id, async move {
                    orch.switch_slot(who, to).await
                }))
            }
            PendingAction::Relocate { from, to, cost } => {
                let spacing = self.orch.settings.spacing;
                self.veto(&WorkflowEvent::Relocate {
                    player: actor.clone(),
                    from: from.to_string(),
                    to: to.to_string(),
                    from_world: from.world_center(spacing),
                    to_world: to.world_center(spacing),
                    cost,
                })?;
                self.check_funds(id, cost).await?;
                let window = self.orch.settings.relocation_cooldown;
                let bypass = self.has(id, PERM_BYPASS_RELOCATION_COOLDOWN);
                self.begin(id, WorkflowKind::Relocate, vec![from, to], move |state| {
                    check_relocation(state, id, to, now, window, bypass).map(|_| ())
                })
                .await?;
                Ok(self.launch(actor.clone(), id, async move {
                    orch.relocate(who, to, cost).await
                }))
            }
            PendingAction::RestoreSlot { slot, coord } => {
                self.veto(&WorkflowEvent::Claim {
                    player: actor.clone(),
                    coord: coord.to_string(),
                })?;
                self.begin(id, WorkflowKind::RestoreSlot, vec![coord], move |state| {
                    plan_slot_restore(state, id, slot, coord).map(|_| ())
                })
                .await?;
                Ok(self.launch(actor.clone(), id, async move {
                    orch.restore_slot(who, slot, coord).await
                }))
            }
        }
    }

    /// Drop the actor's pending selection. Returns whether there was one.
    pub async fn cancel(&self, actor: &ActorSnapshot) -> Result<bool, GateError> {
        let id = actor.id;
        Ok(self
            .orch
            .authority
            .call(move |state| state.pending.remove(&id).is_some())
            .await?)
    }

    // ─── Slot management ─────────────────────────────────────────────────

    pub async fn slots(&self, player: PlayerId) -> Result<SlotsOverview, GateError> {
        let now = self.orch.now_ms();
        let switch_window = self.orch.settings.switch_cooldown;
        let relocation_window = self.orch.settings.relocation_cooldown;
        let bypass_switch = self.has(player, PERM_BYPASS_SWITCH_COOLDOWN);
        let bypass_relocation = self.has(player, PERM_BYPASS_RELOCATION_COOLDOWN);
        Ok(self
            .orch
            .authority
            .call(move |state| SlotsOverview {
                slots: state.slots.player_slots(player).into_iter().cloned().collect(),
                coord: state.slots.player_coordinate(player),
                switch_cooldown: state
                    .slots
                    .remaining_cooldown(player, now, switch_window, bypass_switch),
                relocation_cooldown: state
                    .relocations
                    .remaining_cooldown(player, now, relocation_window, bypass_relocation),
            })
            .await?)
    }

    /// Delete an inactive slot: its files first, then its record.
    pub async fn delete_slot(&self, actor: &ActorSnapshot, slot: u32) -> Result<(), GateError> {
        let id = actor.id;
        self.begin(id, WorkflowKind::DeleteSlot, Vec::new(), move |state| {
            match state.slots.get(id, slot) {
                None => Err(Rejection::SlotNotFound(slot)),
                Some(s) if s.active => Err(Rejection::SlotActive(slot)),
                Some(_) => Ok(()),
            }
        })
        .await?;

        let files = self.orch.files.clone();
        let result = match blocking(move || files.delete_slot(id, slot)).await {
            Ok(()) => self
                .orch
                .authority
                .call(move |state| state.slots.remove_record(id, slot))
                .await
                .map_err(GateError::from)
                .and_then(|r| r.map(|_| ()).map_err(GateError::from)),
            Err(e) => Err(e.into()),
        };
        self.orch
            .authority
            .call(move |state| state.finish_workflow(id))
            .await?;
        if result.is_ok() {
            info!("{} deleted slot {slot}", actor.name);
        }
        result
    }

    pub async fn rename_slot(&self, actor: &ActorSnapshot, slot: u32, name: String) -> Result<(), GateError> {
        let id = actor.id;
        self.orch
            .authority
            .call(move |state| state.slots.set_name(id, slot, &name))
            .await??;
        Ok(())
    }

    pub async fn set_slot_icon(&self, actor: &ActorSnapshot, slot: u32, icon: String) -> Result<(), GateError> {
        let id = actor.id;
        self.orch
            .authority
            .call(move |state| state.slots.set_icon(id, slot, &icon))
            .await??;
        Ok(())
    }

    /// Take a manual backup of the actor's active slot now.
    pub async fn backup(&self, actor: &ActorSnapshot) -> Result<PathBuf, GateError> {
        let id = actor.id;
        let now = self.orch.now_ms();
        let (slot, coord) = self
            .orch
            .authority
            .call(move |state| {
                reject_busy(state, id)?;
                let active = state.slots.active(id).ok_or(Rejection::NoIsland)?;
                let target = (active.number, active.coord.ok_or(Rejection::NoIsland)?);
                state.begin_workflow(id, WorkflowKind::Backup, Vec::new(), now)?;
                Ok::<_, Rejection>(target)
            })
            .await??;
        let result = self
            .orch
            .backups
            .create(id, slot, &self.orch.region_of(coord))
            .await;
        self.orch
            .authority
            .call(move |state| state.finish_workflow(id))
            .await?;
        Ok(result?)
    }

    /// Backups of the player's active slot.
    pub async fn backups(&self, player: PlayerId) -> Result<Vec<BackupEntry>, GateError> {
        let slot = self
            .orch
            .authority
            .call(move |state| state.slots.active(player).map(|s| s.number))
            .await?
            .ok_or(Rejection::NoIsland)?;
        Ok(self.orch.backups.list(player, slot).await?)
    }

    /// Restore one of the actor's own backups.
    pub async fn restore_backup(&self, actor: &ActorSnapshot, name: String) -> Result<WorkflowHandle, GateError> {
        self.start_backup_restore(actor.clone(), actor.id, name).await
    }

    async fn start_backup_restore(
        &self,
        actor: ActorSnapshot,
        owner: PlayerId,
        name: String,
    ) -> Result<WorkflowHandle, GateError> {
        let coord = self
            .orch
            .authority
            .call(move |state| state.slots.player_coordinate(owner))
            .await?
            .ok_or(Rejection::NoIsland)?;
        self.begin(owner, WorkflowKind::RestoreBackup, vec![coord], |_| Ok(()))
            .await?;
        let orch = self.orch.clone();
        let who = actor.clone();
        Ok(self.launch(actor, owner, async move {
            orch.restore_backup(who, owner, name).await
        }))
    }

    pub async fn locate(&self, player: PlayerId) -> Result<Option<GridCoord>, GateError> {
        Ok(self
            .orch
            .authority
            .call(move |state| state.grid.coord_of_owner(player))
            .await?)
    }

    pub async fn neighbors(&self, center: GridCoord) -> Result<Vec<Vec<(GridCoord, CellStatus)>>, GateError> {
        Ok(self
            .orch
            .authority
            .call(move |state| state.grid.neighborhood(center))
            .await?)
    }

    pub async fn cell_info(&self, coord: GridCoord) -> Result<CellInfo, GateError> {
        let world_center = coord.world_center(self.orch.settings.spacing);
        Ok(self
            .orch
            .authority
            .call(move |state| {
                let cell = state.grid.cell(coord).cloned();
                let owner = cell.as_ref().and_then(|c| c.owner);
                CellInfo {
                    coord,
                    status: state.grid.status(coord),
                    world_center,
                    owner,
                    owner_name: cell.as_ref().and_then(|c| c.owner_name.clone()),
                    island: cell.as_ref().and_then(|c| c.island.clone()),
                    reservation: cell.as_ref().and_then(|c| c.reservation),
                    relocation: owner.and_then(|o| state.relocations.get(o).cloned()),
                }
            })
            .await?)
    }

    // ─── Admin ───────────────────────────────────────────────────────────

    pub async fn admin_reserve(
        &self,
        caller: &Caller,
        coord: GridCoord,
        blocked: bool,
        price: Option<f64>,
    ) -> Result<(), GateError> {
        self.require_admin(caller)?;
        self.orch
            .authority
            .call(move |state| {
                reject_targeted(state, coord)?;
                state.grid.reserve(coord, blocked, price).map_err(Rejection::from)
            })
            .await??;
        info!("Reserved {coord} (blocked: {blocked}, price: {price:?})");
        Ok(())
    }

    pub async fn admin_unreserve(&self, caller: &Caller, coord: GridCoord) -> Result<bool, GateError> {
        self.require_admin(caller)?;
        Ok(self
            .orch
            .authority
            .call(move |state| state.grid.unreserve(coord))
            .await?)
    }

    pub async fn admin_set_price(&self, caller: &Caller, coord: GridCoord, price: f64) -> Result<(), GateError> {
        self.require_admin(caller)?;
        self.orch
            .authority
            .call(move |state| state.grid.set_price(coord, price))
            .await??;
        Ok(())
    }

    pub async fn admin_clear_price(&self, caller: &Caller, coord: GridCoord) -> Result<bool, GateError> {
        self.require_admin(caller)?;
        Ok(self
            .orch
            .authority
            .call(move |state| state.grid.clear_price(coord))
            .await?)
    }

    pub async fn admin_resize(&self, caller: &Caller, bounds: GridBounds) -> Result<(), GateError> {
        self.require_admin(caller)?;
        self.orch
            .authority
            .call(move |state| state.grid.resize(bounds))
            .await??;
        Ok(())
    }

    pub async fn admin_reset_cooldown(
        &self,
        caller: &Caller,
        target: PlayerId,
        which: CooldownKind,
    ) -> Result<bool, GateError> {
        self.require_admin(caller)?;
        Ok(self
            .orch
            .authority
            .call(move |state| {
                let mut reset = false;
                if matches!(which, CooldownKind::Switch | CooldownKind::All) {
                    reset |= state.slots.reset_cooldown(target);
                }
                if matches!(which, CooldownKind::Relocation | CooldownKind::All) {
                    reset |= state.relocations.reset_cooldown(target);
                }
                reset
            })
            .await?)
    }

    /// Remove `target`'s island, keeping their slots for a later restore.
    pub async fn admin_remove(&self, caller: &Caller, target: PlayerId) -> Result<WorkflowHandle, GateError> {
        self.require_admin(caller)?;
        let coord = self
            .orch
            .authority
            .call(move |state| state.slots.player_coordinate(target))
            .await?
            .ok_or(Rejection::NoIsland)?;
        self.begin(target, WorkflowKind::Removal, vec![coord], |_| Ok(()))
            .await?;
        let orch = self.orch.clone();
        let admin = caller.actor();
        Ok(self.launch(admin.clone(), target, async move {
            orch.remove_island(admin, target).await
        }))
    }

    pub async fn admin_restore_backup(
        &self,
        caller: &Caller,
        target: PlayerId,
        name: String,
    ) -> Result<WorkflowHandle, GateError> {
        self.require_admin(caller)?;
        self.start_backup_restore(caller.actor(), target, name).await
    }

    /// Forget a player without a placed island: every slot record, slot
    /// file and relocation record.
    pub async fn admin_purge(&self, caller: &Caller, target: PlayerId) -> Result<usize, GateError> {
        self.require_admin(caller)?;
        self.begin(target, WorkflowKind::DeleteSlot, Vec::new(), move |state| {
            match state.slots.player_coordinate(target) {
                Some(coord) => Err(Rejection::AlreadyPlaced(coord)),
                None => Ok(()),
            }
        })
        .await?;
        let files = self.orch.files.clone();
        let deleted = blocking(move || files.purge(target)).await;
        let purge = deleted.is_ok();
        let removed = self
            .orch
            .authority
            .call(move |state| {
                state.finish_workflow(target);
                if !purge {
                    return 0;
                }
                state.relocations.purge_player(target);
                state.slots.purge_player(target)
            })
            .await?;
        deleted?;
        info!("Purged {removed} slot record(s) of {target}");
        Ok(removed)
    }

    /// Put islands that exist on the host but not in the grid into the
    /// grid and into slot 1 of their owner. Returns how many were added.
    pub async fn sync_islands(&self, caller: &Caller) -> Result<usize, GateError> {
        self.require_admin(caller)?;
        let islands = self.orch.caps.islands.islands().await?;
        let spacing = self.orch.settings.spacing;
        let blueprint = self.orch.settings.default_blueprint.clone();
        let found: Vec<(PlayerId, String, IslandId, GridCoord)> = islands
            .into_iter()
            .filter_map(|island| {
                let owner = island.owner?;
                let name = self
                    .orch
                    .caps
                    .host
                    .player(owner)
                    .map(|p| p.name)
                    .unwrap_or_else(|| owner.to_string());
                let coord = GridCoord::from_world(
                    island.center.x.floor() as i32,
                    island.center.z.floor() as i32,
                    spacing,
                );
                Some((owner, name, island.id, coord))
            })
            .collect();
        let added = self
            .orch
            .authority
            .call(move |state| {
                let mut added = 0;
                for (owner, name, island, coord) in found {
                    if state.grid.coord_of_island(&island).is_some() {
                        continue;
                    }
                    if let Err(e) = state.grid.occupy(coord, owner, &name, island.clone()) {
                        warn!("Skipping island {island} of {name} at {coord}: {e}");
                        continue;
                    }
                    if !state.slots.has_slots(owner) {
                        state.slots.initialize_player(owner, island, coord, &blueprint);
                    }
                    added += 1;
                }
                added
            })
            .await?;
        info!("Synced {added} existing island(s) into the grid");
        Ok(added)
    }
}

/// Text for a remaining cooldown.
pub fn cooldown_text(remaining: Duration) -> String {
    format_cooldown(remaining)
}
