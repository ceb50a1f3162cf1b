//! Claiming a cell: a first island for a new player, or a saved slot
//! restored at a new cell for a player whose island was removed.

use skygrid_api::{ActorSnapshot, CapabilityError, IslandId, PlayerId, Region};
use skygrid_data::{restore_homes, CellStatus, DataError, GridCoord, HomeSnapshot};
use tracing::{debug, info, warn};

use super::context::{Step, WorkflowContext, WorkflowReport};
use super::error::{FailureCause, Rejection, WorkflowError};
use super::Orchestrator;
use crate::authority::{GameState, WorkflowKind};

/// Price of claiming `coord`, or why it cannot be claimed.
pub fn plan_claim(state: &GameState, player: PlayerId, coord: GridCoord) -> Result<f64, Rejection> {
    if state.slots.is_homeless(player) {
        return Err(Rejection::Homeless);
    }
    if let Some(existing) = state
        .grid
        .coord_of_owner(player)
        .or_else(|| state.slots.player_coordinate(player))
    {
        return Err(Rejection::AlreadyPlaced(existing));
    }
    match state.grid.status(coord) {
        CellStatus::Available => Ok(0.0),
        CellStatus::Reserved => state
            .grid
            .cell(coord)
            .and_then(|c| c.reservation)
            .and_then(|r| r.purchase_price())
            .ok_or(Rejection::Unavailable(coord, CellStatus::Reserved)),
        other => Err(Rejection::Unavailable(coord, other)),
    }
}

#[derive(Debug, Clone)]
pub struct SlotRestorePlan {
    pub slot: u32,
    pub homes: HomeSnapshot,
    pub blueprint: Option<String>,
}

pub fn plan_slot_restore(
    state: &GameState,
    player: PlayerId,
    slot: u32,
    coord: GridCoord,
) -> Result<SlotRestorePlan, Rejection> {
    if !state.slots.is_homeless(player) {
        return Err(match state.slots.player_coordinate(player) {
            Some(existing) => Rejection::AlreadyPlaced(existing),
            None => Rejection::NothingToRestore,
        });
    }
    let record = state.slots.get(player, slot).ok_or(Rejection::SlotNotFound(slot))?;
    if !record.has_island {
        return Err(Rejection::SlotEmpty(slot));
    }
    match state.grid.status(coord) {
        CellStatus::Available => Ok(SlotRestorePlan {
            slot,
            homes: record.homes.clone(),
            blueprint: record.blueprint.clone(),
        }),
        other => Err(Rejection::Unavailable(coord, other)),
    }
}

impl Orchestrator {
    /// First island for `actor` at `coord`, built from `blueprint`.
    pub async fn claim(&self, actor: ActorSnapshot, coord: GridCoord, blueprint: String) -> Result<WorkflowReport, WorkflowError> {
        let player = actor.id;
        let price = self
            .authority
            .call(move |state| plan_claim(state, player, coord))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::Claim, actor, self.caps.host.clone());

        let mut charged = 0.0;
        if price > 0.0 {
            match self.caps.addons.economy.get() {
                Some(economy) => {
                    ctx.enter(Step::Charging);
                    match economy.withdraw(player, price).await {
                        Ok(()) => charged = price,
                        Err(CapabilityError::InsufficientFunds { needed, available }) => {
                            ctx.fail();
                            return Err(Rejection::InsufficientFunds {
                                needed,
                                available,
                                currency: self.settings.currency_name.clone(),
                            }
                            .into());
                        }
                        Err(e) => return Err(self.fatal(&mut ctx, e, true)),
                    }
                }
                None => warn!("No economy addon; price {price:.2} of {coord} waived"),
            }
        }

        ctx.enter(Step::PastingAtTarget);
        let center = self.center_of(coord);
        let island = match self.caps.islands.create_island(player, center, &blueprint).await {
            Ok(island) => island,
            Err(e) => {
                self.refund(&mut ctx, charged).await;
                return Err(self.fatal(&mut ctx, e, true));
            }
        };

        ctx.enter(Step::UpdatingGrid);
        let name = ctx.actor().name.clone();
        let (bp, id) = (blueprint.clone(), island.clone());
        let booked = self
            .authority
            .call(move |state| {
                state.grid.occupy(coord, player, &name, id.clone())?;
                state.slots.initialize_player(player, id, coord, &bp);
                Ok::<_, DataError>(())
            })
            .await;
        let failure: Option<FailureCause> = match booked {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.into()),
            Err(e) => Some(e.into()),
        };
        if let Some(cause) = failure {
            let whole = self
                .discard_island(&mut ctx, &island, &self.region_of(coord))
                .await;
            self.refund(&mut ctx, charged).await;
            return Err(self.fatal(&mut ctx, cause, whole));
        }
        if let Some(grants) = self.caps.addons.grants.get() {
            if let Err(e) = grants.grant(player, &blueprint).await {
                ctx.soft_fail("blueprint grant", e);
            }
        }

        ctx.enter(Step::Teleporting);
        self.teleport_home(&mut ctx, &island).await;
        info!("{} claimed {coord} with blueprint {blueprint}", ctx.actor().name);
        Ok(ctx.finish(&format!("Welcome to your new island at {coord}!")))
    }

    /// Paste a homeless player's saved `slot` at `coord` as a new island.
    pub async fn restore_slot(&self, actor: ActorSnapshot, slot: u32, coord: GridCoord) -> Result<WorkflowReport, WorkflowError> {
        let player = actor.id;
        let plan = self
            .authority
            .call(move |state| plan_slot_restore(state, player, slot, coord))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::RestoreSlot, actor, self.caps.host.clone());
        let schematic = self.files.schematic(player, slot);
        let entities = self.files.entities(player, slot);

        if let Err(e) = self.caps.schematics.verify(&schematic).await {
            ctx.fail();
            return Err(Rejection::CorruptSchematic(e.to_string()).into());
        }

        ctx.enter(Step::PastingAtTarget);
        let center = self.center_of(coord);
        let region = self.region_of(coord);
        let blueprint = plan
            .blueprint
            .clone()
            .unwrap_or_else(|| self.settings.default_blueprint.clone());
        let island = match self.caps.islands.create_island(player, center, &blueprint).await {
            Ok(island) => island,
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        // The blueprint only registers the island; the slot replaces it.
        let placed = async {
            self.clear_area(&region).await?;
            self.caps.schematics.paste(&schematic, region.center).await?;
            Ok::<_, FailureCause>(())
        }
        .await;
        if let Err(e) = placed {
            let whole = self.discard_island(&mut ctx, &island, &region).await;
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::RestoringAuxState);
        match self.restore_entities(entities, region.center).await {
            Ok(count) => debug!("Respawned {count} entities for slot {slot}"),
            Err(e) => ctx.soft_fail("entity restore", e),
        }
        if !plan.homes.is_empty() {
            let homes = restore_homes(&plan.homes, &center);
            if let Err(e) = self.caps.islands.set_homes(&island, homes).await {
                ctx.soft_fail("home restore", e);
            }
        }

        ctx.enter(Step::UpdatingGrid);
        let name = ctx.actor().name.clone();
        let id = island.clone();
        let booked = self
            .authority
            .call(move |state| {
                state.grid.occupy(coord, player, &name, id.clone())?;
                if let Err(e) = state.slots.restore_slot(player, slot, id, coord) {
                    state.grid.clear(coord);
                    return Err(e);
                }
                Ok::<_, DataError>(())
            })
            .await;
        let failure: Option<FailureCause> = match booked {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.into()),
            Err(e) => Some(e.into()),
        };
        if let Some(cause) = failure {
            let whole = self.discard_island(&mut ctx, &island, &region).await;
            return Err(self.fatal(&mut ctx, cause, whole));
        }

        ctx.enter(Step::Teleporting);
        self.teleport_home(&mut ctx, &island).await;
        Ok(ctx.finish(&format!("Slot {slot} was restored at {coord}.")))
    }

    /// Remove a half-built island again. Returns whether the cell is clean.
    async fn discard_island(&self, ctx: &mut WorkflowContext, island: &IslandId, region: &Region) -> bool {
        let cleared = match self.clear_area(region).await {
            Ok(_) => true,
            Err(e) => {
                ctx.soft_fail("cleanup", e);
                false
            }
        };
        match self.caps.islands.delete_island(island).await {
            Ok(()) => cleared,
            Err(e) => {
                ctx.soft_fail("island delete", e);
                false
            }
        }
    }

    async fn teleport_home(&self, ctx: &mut WorkflowContext, island: &IslandId) {
        match self.island_info(island).await {
            Ok(info) => {
                if let Err(e) = self.caps.host.teleport(ctx.actor().id, info.default_home()).await {
                    ctx.soft_fail("teleport", e);
                }
            }
            Err(e) => ctx.soft_fail("island lookup", e),
        }
    }
}
