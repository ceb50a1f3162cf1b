//! Admin removal: take a player's island out of the world while keeping
//! every slot so it can be restored somewhere else later.

use skygrid_api::{ActorSnapshot, IslandId, PlayerId};
use skygrid_data::{capture_homes, GridCoord};
use tracing::info;

use super::context::{Step, WorkflowContext, WorkflowReport};
use super::error::{Rejection, WorkflowError};
use super::Orchestrator;
use crate::authority::{GameState, WorkflowKind};

#[derive(Debug, Clone)]
pub struct RemovalPlan {
    pub slot: u32,
    pub coord: GridCoord,
    pub island: IslandId,
}

pub fn plan_removal(state: &GameState, target: PlayerId) -> Result<RemovalPlan, Rejection> {
    let active = state.slots.active(target).ok_or(Rejection::NoIsland)?;
    Ok(RemovalPlan {
        slot: active.number,
        coord: active.coord.ok_or(Rejection::NoIsland)?,
        island: active.island.clone().ok_or(Rejection::NoIsland)?,
    })
}

impl Orchestrator {
    /// Save the target's active slot, clear its area, delete the island and
    /// free the cell. Progress goes to `admin`.
    pub async fn remove_island(&self, admin: ActorSnapshot, target: PlayerId) -> Result<WorkflowReport, WorkflowError> {
        let plan = self
            .authority
            .call(move |state| plan_removal(state, target))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::Removal, admin, self.caps.host.clone());

        let info = match self.island_info(&plan.island).await {
            Ok(info) => info,
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        let region = self.region_of(plan.coord);
        let schematic = self.files.schematic(target, plan.slot);
        let entities = self.files.entities(target, plan.slot);

        if self.backups.enabled() {
            ctx.enter(Step::BackingUp);
            if let Err(e) = self.backups.create(target, plan.slot, &region).await {
                ctx.soft_fail("backup", e);
            }
        }

        ctx.enter(Step::SavingSource);
        let homes = capture_homes(&info.homes, &info.center);
        if let Err(e) = self.save_entities(&region, entities.clone()).await {
            return Err(self.fatal(&mut ctx, e, true));
        }
        if let Err(e) = self.caps.schematics.save(&region, false, &schematic).await {
            return Err(self.fatal(&mut ctx, e, true));
        }

        ctx.enter(Step::ClearingSource);
        if let Err(e) = self.clear_area(&region).await {
            let whole = self.put_back(&mut ctx, schematic, entities, &region).await;
            return Err(self.fatal(&mut ctx, e, whole));
        }
        if let Err(e) = self.caps.islands.delete_island(&plan.island).await {
            let whole = self.put_back(&mut ctx, schematic, entities, &region).await;
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::UpdatingGrid);
        let (slot, coord) = (plan.slot, plan.coord);
        let booked = self
            .authority
            .call(move |state| {
                state.grid.clear(coord);
                state.slots.set_homes(target, slot, homes)?;
                Ok::<_, skygrid_data::DataError>(state.slots.mark_homeless(target))
            })
            .await;
        match booked {
            Ok(Ok(kept)) => info!("Removed island of {target} at {coord}; {kept} slot(s) kept"),
            Ok(Err(e)) => return Err(self.fatal(&mut ctx, e, false)),
            Err(e) => return Err(self.fatal(&mut ctx, e, false)),
        }

        ctx.enter(Step::Teleporting);
        self.evacuate(&mut ctx, &region, &[]).await;
        self.caps.host.send_message(
            target,
            "Your island was removed by an administrator. Your slots were kept; \
             use 'restore <slot> <x,z>' to place one again.",
        );

        Ok(ctx.finish(&format!("Removed the island at {coord}.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use skygrid_api::{BlockPos, Position};
    use skygrid_data::CellStatus;
    use skygrid_world::Op;

    #[tokio::test]
    async fn removal_keeps_slots_and_frees_cell() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        h.world.set_position(p, Position::new(1.0, 121.0, 1.0));
        let admin = h.join("Op");

        let report = h.orch.remove_island(admin.clone(), p).await.unwrap();

        assert!(report.visited(Step::ClearingSource));
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)), None);
        assert_eq!(h.world.island_count(), 0);
        assert!(h.orch.files.schematic(p, 1).exists());
        let (status, homeless) = h
            .orch
            .authority
            .call(move |s| (s.grid.status(GridCoord::new(0, 0)), s.slots.is_homeless(p)))
            .await
            .unwrap();
        assert_eq!(status, CellStatus::Available);
        assert!(homeless);
        assert_eq!(h.world.position_of(p), Some(h.spawn()));
        assert!(h.world.messages_for(p).iter().any(|m| m.contains("removed by an administrator")));
        assert!(h.world.messages_for(admin.id).iter().any(|m| m.contains("Removed the island")));
    }

    #[tokio::test]
    async fn clear_failure_puts_island_back() {
        let h = Harness::new().await;
        let p = h.claim_with("Alex", "0,0", "desert").await;
        let admin = h.join("Op");
        h.world.fail_next(Op::Clear, 1);

        let err = h.orch.remove_island(admin, p).await.unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(h.world.block_at(BlockPos::new(0, 120, 0)).as_deref(), Some("sand"));
        assert!(!h.orch.authority.call(move |s| s.slots.is_homeless(p)).await.unwrap());
    }

    #[tokio::test]
    async fn no_island_is_rejected() {
        let h = Harness::new().await;
        let nobody = h.join("Nobody");
        let admin = h.join("Op");
        let err = h.orch.remove_island(admin, nobody.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Rejected(Rejection::NoIsland)));
    }
}
