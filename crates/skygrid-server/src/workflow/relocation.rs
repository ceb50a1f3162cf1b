//! Relocation: move a player's island from one grid cell to another.
//!
//! Idle -> Charging -> SavingSource -> ClearingSource -> PastingAtTarget ->
//! RestoringAuxState -> UpdatingGrid -> UpdatingSlots -> Teleporting -> Done.
//!
//! Any fatal failure after the fee was taken refunds it. Failures after the
//! source was cleared paste it back at the old cell first.

use skygrid_api::{ActorSnapshot, CapabilityError, IslandId, PlayerId};
use skygrid_data::{capture_homes, restore_homes, CellStatus, GridCoord};
use tracing::{debug, error, info, warn};

use super::blocking;
use super::context::{Step, WorkflowContext, WorkflowReport};
use super::error::{FailureCause, Rejection, WorkflowError};
use super::Orchestrator;
use crate::authority::{GameState, WorkflowKind};

#[derive(Debug, Clone)]
pub struct RelocationPlan {
    pub from: GridCoord,
    pub to: GridCoord,
    pub island: IslandId,
}

pub fn plan_relocation(state: &GameState, player: PlayerId, to: GridCoord) -> Result<RelocationPlan, Rejection> {
    let active = state.slots.active(player).ok_or_else(|| {
        if state.slots.is_homeless(player) {
            Rejection::Homeless
        } else {
            Rejection::NoIsland
        }
    })?;
    let island = active.island.clone().ok_or(Rejection::NoIsland)?;
    let from = active.coord.ok_or(Rejection::Homeless)?;
    if from == to {
        return Err(Rejection::SameLocation);
    }
    match state.grid.status(to) {
        CellStatus::Available => Ok(RelocationPlan { from, to, island }),
        other => Err(Rejection::Unavailable(to, other)),
    }
}

impl Orchestrator {
    /// Move the actor's island to `to`, charging `cost` first.
    pub async fn relocate(&self, actor: ActorSnapshot, to: GridCoord, cost: f64) -> Result<WorkflowReport, WorkflowError> {
        let player = actor.id;
        let plan = self
            .authority
            .call(move |state| plan_relocation(state, player, to))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::Relocate, actor, self.caps.host.clone());

        let info = match self.island_info(&plan.island).await {
            Ok(info) => info,
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        let region_a = self.region_of(plan.from);
        let region_b = self.region_of(plan.to);
        let team = Self::team_of(&info);
        let scratch = self.files.relocation_scratch(player);
        let scratch_entities = scratch.with_extension("entities");

        let mut charged = 0.0;
        if cost > 0.0 {
            match self.caps.addons.economy.get() {
                Some(economy) => {
                    ctx.enter(Step::Charging);
                    match economy.withdraw(player, cost).await {
                        Ok(()) => charged = cost,
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
                None => warn!("No economy addon; relocation fee of {cost:.2} waived"),
            }
        }

        self.warn_visitors(&region_a, &team);

        ctx.enter(Step::SavingSource);
        let source_homes = capture_homes(&info.homes, &info.center);
        let saved = async {
            self.save_entities(&region_a, scratch_entities.clone()).await?;
            self.caps.schematics.save(&region_a, false, &scratch).await?;
            Ok::<_, FailureCause>(())
        }
        .await;
        if let Err(e) = saved {
            self.refund(&mut ctx, charged).await;
            return Err(self.abort(&mut ctx, e, true).await);
        }

        ctx.enter(Step::ClearingSource);
        if let Err(e) = self.clear_area(&region_a).await {
            let whole = self
                .put_back(&mut ctx, scratch.clone(), scratch_entities.clone(), &region_a)
                .await;
            self.refund(&mut ctx, charged).await;
            return Err(self.abort(&mut ctx, e, whole).await);
        }

        ctx.enter(Step::PastingAtTarget);
        if let Err(e) = self.caps.schematics.paste(&scratch, region_b.center).await {
            error!(
                "[{}] Island {} could not be pasted at {}",
                ctx.actor().name,
                plan.island,
                plan.to
            );
            let whole = self.undo_move(&mut ctx, &plan, &info, charged, false).await;
            return Err(self.abort(&mut ctx, e, whole).await);
        }
        match self.restore_entities(scratch_entities.clone(), region_b.center).await {
            Ok(count) => debug!("Moved {count} entities to {}", plan.to),
            Err(e) => ctx.soft_fail("entity restore", e),
        }

        ctx.enter(Step::RestoringAuxState);
        let new_center = self.center_of(plan.to);
        if let Err(e) = self.caps.islands.set_center(&plan.island, new_center).await {
            let whole = self.undo_move(&mut ctx, &plan, &info, charged, false).await;
            return Err(self.abort(&mut ctx, e, whole).await);
        }
        let homes = restore_homes(&source_homes, &new_center);
        if let Err(e) = self.caps.islands.set_homes(&plan.island, homes).await {
            ctx.soft_fail("home restore", e);
        }

        ctx.enter(Step::UpdatingGrid);
        let (from, name, island) = (plan.from, ctx.actor().name.clone(), plan.island.clone());
        let moved = self
            .authority
            .call(move |state| {
                state.grid.clear(from);
                if let Err(e) = state.grid.occupy(to, player, &name, island.clone()) {
                    if let Err(back) = state.grid.occupy(from, player, &name, island) {
                        error!("Could not restore grid cell {from} for {player}: {back}");
                    }
                    return Err(e);
                }
                Ok(())
            })
            .await;
        match moved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let whole = self.undo_move(&mut ctx, &plan, &info, charged, true).await;
                return Err(self.abort(&mut ctx, e, whole).await);
            }
            Err(e) => return Err(self.abort(&mut ctx, e, false).await),
        }

        ctx.enter(Step::UpdatingSlots);
        let now = self.now_ms();
        let updated = self
            .authority
            .call(move |state| {
                let slots = state.slots.set_coordinate_for_all(player, to);
                state.relocations.record(player, from, to, now);
                slots
            })
            .await;
        match updated {
            Ok(slots) => debug!("Moved {slots} slot record(s) of {player} to {to}"),
            Err(e) => return Err(self.abort(&mut ctx, e, false).await),
        }

        ctx.enter(Step::Teleporting);
        let landed = match self.island_info(&plan.island).await {
            Ok(current) => current,
            Err(e) => {
                ctx.soft_fail("island lookup", e);
                info
            }
        };
        self.send_team_home(&mut ctx, &landed, &region_a).await;
        self.evacuate(&mut ctx, &region_a, &team).await;

        self.discard_scratch(&mut ctx).await;

        let name = ctx.actor().name.clone();
        self.run_hooks(
            &self.settings.relocate_hooks,
            &name,
            &plan.from.to_string(),
            &plan.to.to_string(),
        );
        info!("{name} relocated from {} to {}", plan.from, plan.to);
        Ok(ctx.finish(&format!("Your island now lives at {}.", plan.to)))
    }

    /// Fail the relocation. The scratch copy of the island is deleted when
    /// the source is whole again and kept for manual recovery otherwise.
    async fn abort(
        &self,
        ctx: &mut WorkflowContext,
        source: impl Into<FailureCause>,
        whole: bool,
    ) -> WorkflowError {
        if whole {
            self.discard_scratch(ctx).await;
        } else {
            error!(
                "[{}] Keeping {} for manual recovery",
                ctx.actor().name,
                self.files.relocation_scratch(ctx.actor().id).display()
            );
        }
        self.fatal(ctx, source, whole)
    }

    async fn discard_scratch(&self, ctx: &mut WorkflowContext) {
        let scratch = self.files.relocation_scratch(ctx.actor().id);
        let entities = scratch.with_extension("entities");
        let removed = blocking(move || {
            for path in [scratch, entities] {
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => return Err(skygrid_data::DataError::FileDelete { path, source }),
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = removed {
            ctx.soft_fail("scratch cleanup", e);
        }
    }

    /// Clear the target, put the island back at the source and refund.
    /// Returns whether the source is whole again.
    async fn undo_move(
        &self,
        ctx: &mut WorkflowContext,
        plan: &RelocationPlan,
        info: &skygrid_api::IslandInfo,
        charged: f64,
        center_moved: bool,
    ) -> bool {
        let player = ctx.actor().id;
        let scratch = self.files.relocation_scratch(player);
        let region_b = self.region_of(plan.to);
        if let Err(e) = self.clear_area(&region_b).await {
            ctx.soft_fail("target cleanup", e);
        }
        if center_moved {
            if let Err(e) = self.caps.islands.set_center(&plan.island, info.center).await {
                ctx.soft_fail("centre rollback", e);
            }
            if let Err(e) = self.caps.islands.set_homes(&plan.island, info.homes.clone()).await {
                ctx.soft_fail("home rollback", e);
            }
        }
        let whole = self
            .put_back(
                ctx,
                scratch.clone(),
                scratch.with_extension("entities"),
                &self.region_of(plan.from),
            )
            .await;
        self.refund(ctx, charged).await;
        whole
    }

    pub(crate) async fn refund(&self, ctx: &mut WorkflowContext, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let Some(economy) = self.caps.addons.economy.get() else {
            return;
        };
        match economy.deposit(ctx.actor().id, amount).await {
            Ok(()) => ctx.tell(&format!(
                "Refunded {amount:.2} {}.",
                self.settings.currency_name
            )),
            Err(e) => {
                error!(
                    "[{}] Refund of {amount:.2} failed: {e}",
                    ctx.actor().name
                );
                ctx.soft_fail("refund", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::testkit::Harness;
    use skygrid_api::{BlockPos, IslandCapability, Position};
    use skygrid_world::Op;
    use std::collections::BTreeMap;

    fn paid() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.relocation.cost = 100.0;
        config
    }

    fn coord(s: &str) -> GridCoord {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn relocation_moves_island_and_charges() {
        let h = Harness::with_config(paid()).await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.switch(p, 2).await.unwrap();
        h.world.set_balance(p, 150.0);

        let report = h.relocate(p, "3,-2").await.unwrap();

        assert!(report.visited(Step::Charging));
        assert_eq!(h.world.balance_of(p), 50.0);
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)), None);
        assert_eq!(
            h.world.block_at(BlockPos::new(2400, 120, -1600)).as_deref(),
            Some("grass_block")
        );
        let (a, b, slots) = h
            .orch
            .authority
            .call(move |s| {
                (
                    s.grid.status(coord("0,0")),
                    s.grid.cell(coord("3,-2")).and_then(|c| c.owner),
                    s.slots.player_slots(p).iter().map(|s| s.coord).collect::<Vec<_>>(),
                )
            })
            .await
            .unwrap();
        assert_eq!(a, CellStatus::Available);
        assert_eq!(b, Some(p));
        assert!(slots.iter().all(|c| *c == Some(coord("3,-2"))));
        assert_eq!(h.world.position_of(p), Some(Position::new(2400.5, 121.0, -1599.5)));
        assert!(!h.orch.files.relocation_scratch(p).exists());
    }

    #[tokio::test]
    async fn homes_keep_their_offsets() {
        let h = Harness::new().await;
        let p = h.claim("Alex", "0,0").await;
        let island = h.island_of(p).await;
        h.world
            .set_homes(
                &island,
                BTreeMap::from([
                    (String::new(), Position::new(0.5, 121.0, 0.5)),
                    ("mine".to_string(), Position::new(-20.0, 40.0, 7.5).with_rotation(90.0, 0.0)),
                ]),
            )
            .await
            .unwrap();

        h.relocate(p, "1,1").await.unwrap();

        let moved = h.world.island(&island).await.unwrap().unwrap();
        assert_eq!(moved.center, Position::new(800.0, 120.0, 800.0));
        assert_eq!(
            moved.homes["mine"],
            Position::new(780.0, 40.0, 807.5).with_rotation(90.0, 0.0)
        );
    }

    #[tokio::test]
    async fn paste_failure_refunds_and_restores() {
        let h = Harness::with_config(paid()).await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.set_balance(p, 150.0);
        h.world.fail_next(Op::Paste, 1);

        let err = h.relocate(p, "3,-2").await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Fatal { step: Step::PastingAtTarget, recoverable: true, .. }
        ));
        assert_eq!(h.world.balance_of(p), 150.0);
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)).as_deref(), Some("sand"));
        let owner = h
            .orch
            .authority
            .call(|s| s.grid.cell(coord("0,0")).and_then(|c| c.owner))
            .await
            .unwrap();
        assert_eq!(owner, Some(p));
        let record = h.orch.authority.call(move |s| s.relocations.get(p).cloned()).await.unwrap();
        assert!(record.is_none());
        let scratch = h.orch.files.relocation_scratch(p);
        assert!(!scratch.exists());
        assert!(!scratch.with_extension("entities").exists());
    }

    #[tokio::test]
    async fn unrecoverable_failure_keeps_scratch_copy() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        // Target paste and the paste back both fail.
        h.world.fail_next(Op::Paste, 2);

        let err = h.relocate(p, "3,-2").await.unwrap_err();

        assert!(!err.is_recoverable());
        assert!(h.orch.files.relocation_scratch(p).exists());
    }

    #[tokio::test]
    async fn set_center_failure_rolls_back() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.fail_next(Op::SetCenter, 1);

        let err = h.relocate(p, "2,0").await.unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(h.world.block_at(BlockPos::new(1600, 120, 0)), None);
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)).as_deref(), Some("sand"));
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected() {
        let h = Harness::with_config(paid()).await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.set_balance(p, 20.0);

        let err = h.relocate(p, "1,0").await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Rejected(Rejection::InsufficientFunds { .. })
        ));
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)).as_deref(), Some("sand"));
        assert_eq!(h.world.balance_of(p), 20.0);
    }

    #[tokio::test]
    async fn occupied_target_is_rejected() {
        let h = Harness::new().await;
        let p = h.claim("Alex", "0,0").await;
        h.claim("Sam", "1,0").await;

        let err = h.relocate(p, "1,0").await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Rejected(Rejection::Unavailable(_, CellStatus::Occupied))
        ));
        let err = h.relocate(p, "0,0").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Rejected(Rejection::SameLocation)));
    }

    #[tokio::test]
    async fn visitors_and_team_move_with_island() {
        let mut config = ServerConfig::default();
        config.hooks.on_relocate = vec!["broadcast {player} {from} {to}".into()];
        let h = Harness::with_config(config).await;
        let p = h.claim("Alex", "0,0").await;
        let mate = h.join("Mia");
        h.world.add_member(&h.island_of(p).await, mate.id);
        h.world.set_position(mate.id, Position::new(5.0, 121.0, 5.0));
        let visitor = h.join("Vic");
        h.world.set_position(visitor.id, Position::new(-5.0, 121.0, 5.0));

        let report = h.relocate(p, "0,1").await.unwrap();

        assert!(!report.visited(Step::Charging));
        assert_eq!(h.world.position_of(mate.id), Some(Position::new(0.5, 121.0, 800.5)));
        assert_eq!(h.world.position_of(visitor.id), Some(h.spawn()));
        assert!(h.world.commands().contains(&"broadcast Alex 0,0 0,1".to_string()));
    }
}
