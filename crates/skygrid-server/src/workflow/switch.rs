//! Slot switch: swap the island at a player's coordinate for another slot.
//!
//! Idle -> BackingUp -> SavingSource -> ClearingSource -> LoadingTarget ->
//! RestoringAuxState -> UpdatingBookkeeping -> Teleporting -> Done.
//!
//! The target schematic is verified before the source is touched. If the
//! target fails to load after the area was cleared, the source schematic
//! that was just saved is pasted back. Bookkeeping only changes once the
//! world holds the target.

use skygrid_api::{ActorSnapshot, IslandId};
use skygrid_data::{capture_homes, restore_homes, GridCoord, HomeSnapshot};
use tracing::{debug, error};

use super::context::{Step, WorkflowContext, WorkflowReport};
use super::error::{Rejection, WorkflowError};
use super::{home_names, Orchestrator};
use crate::authority::{GameState, WorkflowKind};

/// Everything the switch needs from bookkeeping, read in one authority call.
#[derive(Debug, Clone)]
pub struct SwitchPlan {
    pub from: u32,
    pub to: u32,
    pub coord: GridCoord,
    pub island: IslandId,
    pub target_name: String,
    pub target_has_island: bool,
    pub target_homes: HomeSnapshot,
    pub source_blueprint: Option<String>,
    pub target_blueprint: Option<String>,
}

pub fn plan_switch(state: &GameState, player: skygrid_api::PlayerId, to: u32) -> Result<SwitchPlan, Rejection> {
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
    let coord = active.coord.ok_or(Rejection::Homeless)?;
    let island = active.island.clone().ok_or(Rejection::NoIsland)?;
    let target = state.slots.get(player, to).ok_or(Rejection::SlotNotFound(to))?;
    Ok(SwitchPlan {
        from: active.number,
        to,
        coord,
        island,
        target_name: target.name.clone(),
        target_has_island: target.has_island,
        target_homes: target.homes.clone(),
        source_blueprint: active.blueprint.clone(),
        target_blueprint: target.blueprint.clone(),
    })
}

impl Orchestrator {
    pub async fn switch_slot(&self, actor: ActorSnapshot, to: u32) -> Result<WorkflowReport, WorkflowError> {
        let player = actor.id;
        let plan = self
            .authority
            .call(move |state| plan_switch(state, player, to))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::Switch, actor, self.caps.host.clone());

        let info = match self.island_info(&plan.island).await {
            Ok(info) => info,
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        let region = self.region_of(plan.coord);
        let team = Self::team_of(&info);
        let source_schem = self.files.schematic(player, plan.from);
        let source_entities = self.files.entities(player, plan.from);
        let target_schem = self.files.schematic(player, plan.to);
        let target_entities = self.files.entities(player, plan.to);

        // Pre-flight: never clear the source for a target that cannot load.
        if plan.target_has_island {
            if let Err(e) = self.caps.schematics.verify(&target_schem).await {
                ctx.fail();
                return Err(Rejection::CorruptSchematic(e.to_string()).into());
            }
        }

        self.warn_visitors(&region, &team);

        if self.settings.backup_on_switch && self.backups.enabled() {
            ctx.enter(Step::BackingUp);
            if let Err(e) = self.backups.create(player, plan.from, &region).await {
                ctx.soft_fail("backup", e);
            }
        }

        ctx.enter(Step::SavingSource);
        debug!("Capturing homes [{}] of {}", home_names(&info.homes), plan.island);
        let source_homes = capture_homes(&info.homes, &info.center);
        if let Err(e) = self.save_entities(&region, source_entities.clone()).await {
            return Err(self.fatal(&mut ctx, e, true));
        }
        if let Err(e) = self.caps.schematics.save(&region, false, &source_schem).await {
            return Err(self.fatal(&mut ctx, e, true));
        }
        if let Some(challenges) = self.caps.addons.challenges.get() {
            if let Err(e) = challenges.save_progress(player, plan.from).await {
                ctx.soft_fail("challenge progress save", e);
            }
        }

        ctx.enter(Step::ClearingSource);
        if let Err(e) = self.clear_area(&region).await {
            let whole = self
                .put_back(&mut ctx, source_schem.clone(), source_entities.clone(), &region)
                .await;
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::LoadingTarget);
        let loaded = if plan.target_has_island {
            self.caps.schematics.paste(&target_schem, region.center).await
        } else {
            self.caps
                .islands
                .paste_blueprint(&plan.island, &self.settings.default_blueprint)
                .await
        };
        if let Err(e) = loaded {
            error!(
                "[{}] Slot {} failed to load into a cleared area at {}",
                ctx.actor().name,
                plan.to,
                plan.coord
            );
            let whole = self
                .put_back(&mut ctx, source_schem, source_entities, &region)
                .await;
            if whole {
                if let Err(e) = self.caps.islands.set_homes(&plan.island, info.homes.clone()).await {
                    ctx.soft_fail("rollback homes", e);
                }
            }
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::RestoringAuxState);
        if plan.target_has_island {
            match self.restore_entities(target_entities, region.center).await {
                Ok(count) => debug!("Respawned {count} entities for slot {}", plan.to),
                Err(e) => ctx.soft_fail("entity restore", e),
            }
            if !plan.target_homes.is_empty() {
                let homes = restore_homes(&plan.target_homes, &info.center);
                if let Err(e) = self.caps.islands.set_homes(&plan.island, homes).await {
                    ctx.soft_fail("home restore", e);
                }
            }
        }
        if let Some(challenges) = self.caps.addons.challenges.get() {
            if let Err(e) = challenges.restore_progress(player, plan.to).await {
                ctx.soft_fail("challenge progress restore", e);
            }
        }

        ctx.enter(Step::UpdatingBookkeeping);
        let now = self.now_ms();
        let default_blueprint = self.settings.default_blueprint.clone();
        let (from, to, fresh) = (plan.from, plan.to, !plan.target_has_island);
        let booked = self
            .authority
            .call(move |state| {
                state.slots.switch_active(player, to, now)?;
                state.slots.set_homes(player, from, source_homes)?;
                if fresh {
                    state.slots.initialize_slot(player, to, &default_blueprint)?;
                }
                Ok::<_, skygrid_data::DataError>(())
            })
            .await;
        match booked {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fatal(&mut ctx, e, false)),
            Err(e) => return Err(self.fatal(&mut ctx, e, false)),
        }
        if let Some(grants) = self.caps.addons.grants.get() {
            let new_blueprint = plan
                .target_blueprint
                .clone()
                .unwrap_or_else(|| self.settings.default_blueprint.clone());
            if plan.source_blueprint.as_deref() != Some(new_blueprint.as_str()) {
                if let Some(old) = &plan.source_blueprint {
                    if let Err(e) = grants.revoke(player, old).await {
                        ctx.soft_fail("blueprint revoke", e);
                    }
                }
                if let Err(e) = grants.grant(player, &new_blueprint).await {
                    ctx.soft_fail("blueprint grant", e);
                }
            }
        }

        ctx.enter(Step::Teleporting);
        let landed = match self.island_info(&plan.island).await {
            Ok(current) => current,
            Err(e) => {
                ctx.soft_fail("island lookup", e);
                info
            }
        };
        self.send_team_home(&mut ctx, &landed, &region).await;
        self.evacuate(&mut ctx, &region, &team).await;

        let name = ctx.actor().name.clone();
        self.run_hooks(
            &self.settings.switch_hooks,
            &name,
            &plan.from.to_string(),
            &plan.to.to_string(),
        );
        Ok(ctx.finish(&format!("Switched to {}.", plan.target_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use skygrid_api::{BlockPos, HostCapability, IslandCapability, Position};
    use skygrid_world::Op;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn center() -> BlockPos {
        BlockPos::new(0, 120, 0)
    }

    #[tokio::test]
    async fn switch_to_empty_slot_pastes_default_blueprint() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        assert_eq!(h.world.block_at(center()).as_deref(), Some("sand"));

        let report = h.switch(p, 2).await.unwrap();

        assert!(report.visited(Step::LoadingTarget));
        assert_eq!(h.world.block_at(center()).as_deref(), Some("grass_block"));
        let slots = h.slots(p).await;
        assert!(!slots[0].active);
        assert!(slots[1].active);
        assert!(slots[1].has_island);
        assert_eq!(slots[1].blueprint.as_deref(), Some("default"));
        assert!(h.orch.files.schematic(p, 1).exists());
        assert_eq!(h.world.position_of(p), Some(Position::new(0.5, 121.0, 0.5)));
    }

    #[tokio::test]
    async fn switching_back_restores_blocks_entities_and_homes() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        let island = h.island_of(p).await;
        let farm = Position::new(10.0, 125.0, -4.0);
        h.world
            .set_homes(&island, BTreeMap::from([(String::new(), Position::new(0.5, 121.0, 0.5)), ("farm".into(), farm)]))
            .await
            .unwrap();
        let trades = BTreeMap::from([("profession".to_string(), "librarian".to_string())]);
        h.world
            .spawn_entity("villager", Position::new(2.0, 121.0, 2.0), Some("Bob"), trades.clone());

        h.switch(p, 2).await.unwrap();
        assert!(h.world.entities_in(&h.orch.region_of(GridCoord::new(0, 0))).is_empty());
        h.world.place_block(BlockPos::new(1, 121, 1), "crafting_table");

        h.clock.advance(Duration::from_secs(3600));
        let report = h.switch(p, 1).await.unwrap();
        assert!(report.soft_failures.is_empty(), "{:?}", report.soft_failures);

        assert_eq!(h.world.block_at(center()).as_deref(), Some("sand"));
        assert_eq!(h.world.block_at(BlockPos::new(1, 121, 1)), None);
        let entities = h.world.entities_in(&h.orch.region_of(GridCoord::new(0, 0)));
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].custom_name.as_deref(), Some("Bob"));
        assert_eq!(entities[0].attributes, trades);
        let homes = h.world.island(&island).await.unwrap().unwrap().homes;
        assert_eq!(homes["farm"], farm);

        // Slot 2 was saved on the way out.
        assert!(h.orch.files.schematic(p, 2).exists());
        assert!(h.slots(p).await[1].has_island);
    }

    #[tokio::test]
    async fn load_failure_keeps_bookkeeping_and_rolls_back() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.switch(p, 2).await.unwrap();
        h.clock.advance(Duration::from_secs(3600));
        let before = h.slots(p).await;

        h.world.fail_next(Op::Paste, 1);
        let err = h.switch(p, 1).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Fatal { step: Step::LoadingTarget, recoverable: true, .. }
        ));
        let after = h.slots(p).await;
        assert_eq!(after[1].active, before[1].active);
        assert_eq!(after[0].active, before[0].active);
        assert_eq!(after[1].last_switch_ms, before[1].last_switch_ms);
        // Slot 2's island was pasted back.
        assert_eq!(h.world.block_at(center()).as_deref(), Some("grass_block"));
        assert!(h
            .world
            .messages_for(p)
            .iter()
            .any(|m| m.contains("failed while loading the target slot")));
    }

    #[tokio::test]
    async fn failed_entity_removal_does_not_duplicate_entities() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world
            .spawn_entity("villager", Position::new(2.0, 121.0, 2.0), Some("Bob"), BTreeMap::new());
        h.world.fail_next(Op::RemoveEntities, 1);

        let err = h.switch(p, 2).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Fatal { step: Step::ClearingSource, recoverable: true, .. }
        ));
        let entities = h.world.entities_in(&h.orch.region_of(GridCoord::new(0, 0)));
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].custom_name.as_deref(), Some("Bob"));
        assert_eq!(h.world.block_at(center()).as_deref(), Some("sand"));
        assert!(h.slots(p).await[0].active);
    }

    #[tokio::test]
    async fn failed_rollback_is_unrecoverable() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.switch(p, 2).await.unwrap();
        h.clock.advance(Duration::from_secs(3600));

        h.world.fail_next(Op::Paste, 2);
        let err = h.switch(p, 1).await.unwrap_err();

        assert!(!err.is_recoverable());
        assert!(h.slots(p).await[1].active);
        assert!(h
            .world
            .messages_for(p)
            .iter()
            .any(|m| m.contains("contact an administrator")));
    }

    #[tokio::test]
    async fn blueprint_failure_on_fresh_slot_rolls_back() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.fail_next(Op::PasteBlueprint, 1);

        let err = h.switch(p, 2).await.unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(h.world.block_at(center()).as_deref(), Some("sand"));
        let slots = h.slots(p).await;
        assert!(slots[0].active);
        assert!(!slots[1].has_island);
    }

    #[tokio::test]
    async fn save_failure_touches_nothing() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.fail_next(Op::Save, 2);

        let err = h.switch(p, 2).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Fatal { step: Step::SavingSource, .. }));
        assert_eq!(h.world.block_at(center()).as_deref(), Some("sand"));
        assert!(h.slots(p).await[0].active);
    }

    #[tokio::test]
    async fn corrupt_target_is_rejected_before_any_change() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.switch(p, 2).await.unwrap();
        h.clock.advance(Duration::from_secs(3600));
        std::fs::write(h.orch.files.schematic(p, 1), b"garbage").unwrap();
        let backups_before = h.orch.backups.list(p, 2).await.unwrap().len();

        let err = h.switch(p, 1).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Rejected(Rejection::CorruptSchematic(_))));
        assert_eq!(h.world.block_at(center()).as_deref(), Some("grass_block"));
        assert_eq!(h.orch.backups.list(p, 2).await.unwrap().len(), backups_before);
    }

    #[tokio::test]
    async fn visitors_are_warned_and_moved_out() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "default").await;
        let visitor = h.join("Vic");
        h.world.set_position(visitor.id, Position::new(3.0, 121.0, 3.0));

        h.switch(p, 2).await.unwrap();

        assert_eq!(h.world.position_of(visitor.id), Some(h.world.spawn_location()));
        assert!(h
            .world
            .messages_for(visitor.id)
            .iter()
            .any(|m| m.contains("being changed")));
    }

    #[tokio::test]
    async fn team_member_on_island_comes_along() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "default").await;
        let mate = h.join("Mia");
        h.world.add_member(&h.island_of(p).await, mate.id);
        h.world.set_position(mate.id, Position::new(-4.0, 121.0, 2.0));

        h.switch(p, 2).await.unwrap();

        assert_eq!(h.world.position_of(mate.id), Some(Position::new(0.5, 121.0, 0.5)));
        assert!(h.world.messages_for(mate.id).iter().all(|m| !m.contains("being changed")));
    }

    #[tokio::test]
    async fn disconnected_player_still_completes() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.quit(p);

        let report = h.switch(p, 2).await.unwrap();

        assert!(report.soft_failures.iter().any(|f| f.starts_with("teleport")));
        assert!(h.slots(p).await[1].active);
    }

    #[tokio::test]
    async fn addons_follow_the_slot() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;

        h.switch(p, 2).await.unwrap();

        let log = h.world.addon_log();
        assert!(log.contains(&format!("challenges save {p} 1")));
        assert!(log.contains(&format!("challenges restore {p} 2")));
        assert!(log.contains(&format!("revoke {p} desert")));
        assert!(h.world.has_grant(p, "default"));
        assert!(!h.world.has_grant(p, "desert"));
    }

    #[tokio::test]
    async fn hooks_run_with_placeholders() {
        let mut config = crate::config::ServerConfig::default();
        config.hooks.on_switch = vec!["say {player} went {from}->{to}".into()];
        let h = Harness::with_config(config).await;
        let p = h.claim_with("Alex", "0,0", "default").await;

        h.switch(p, 2).await.unwrap();

        assert!(h.world.commands().contains(&"say Alex went 1->2".to_string()));
    }
}
