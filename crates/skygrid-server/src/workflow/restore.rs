//! Backup restore: replace a player's active island with one of its
//! backups. The current island is saved first so a failed paste can be
//! undone.

use skygrid_api::{ActorSnapshot, IslandId, PlayerId};
use skygrid_data::GridCoord;
use tracing::info;

use super::context::{Step, WorkflowContext, WorkflowReport};
use super::error::{Rejection, WorkflowError};
use super::{blocking, Orchestrator};
use crate::authority::{GameState, WorkflowKind};

const SAFETY_FILE: &str = "restore-safety.schem";

#[derive(Debug, Clone)]
pub struct BackupRestorePlan {
    pub slot: u32,
    pub coord: GridCoord,
    pub island: IslandId,
}

pub fn plan_backup_restore(state: &GameState, owner: PlayerId) -> Result<BackupRestorePlan, Rejection> {
    let active = state.slots.active(owner).ok_or(Rejection::NoIsland)?;
    Ok(BackupRestorePlan {
        slot: active.number,
        coord: active.coord.ok_or(Rejection::NoIsland)?,
        island: active.island.clone().ok_or(Rejection::NoIsland)?,
    })
}

impl Orchestrator {
    /// Restore backup `name` of `owner`'s active slot. `actor` is who asked
    /// (the owner or an admin) and receives progress.
    pub async fn restore_backup(
        &self,
        actor: ActorSnapshot,
        owner: PlayerId,
        name: String,
    ) -> Result<WorkflowReport, WorkflowError> {
        let plan = self
            .authority
            .call(move |state| plan_backup_restore(state, owner))
            .await??;
        let mut ctx = WorkflowContext::new(WorkflowKind::RestoreBackup, actor, self.caps.host.clone());

        let entry = match self.backups.find(owner, plan.slot, &name).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                ctx.fail();
                return Err(Rejection::BackupNotFound(name).into());
            }
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        if let Err(e) = self.caps.schematics.verify(&entry.path).await {
            ctx.fail();
            return Err(Rejection::CorruptSchematic(e.to_string()).into());
        }
        let info = match self.island_info(&plan.island).await {
            Ok(info) => info,
            Err(e) => return Err(self.fatal(&mut ctx, e, true)),
        };
        let region = self.region_of(plan.coord);
        let team = Self::team_of(&info);
        let safety = self.files.backup_dir(owner).join(SAFETY_FILE);
        // Entities travel inside both schematics.
        let no_entities = safety.with_extension("none");

        self.warn_visitors(&region, &team);

        ctx.enter(Step::BackingUp);
        if let Err(e) = self.caps.schematics.save(&region, true, &safety).await {
            return Err(self.fatal(&mut ctx, e, true));
        }

        ctx.enter(Step::ClearingSource);
        if let Err(e) = self.clear_area(&region).await {
            let whole = self
                .put_back(&mut ctx, safety.clone(), no_entities.clone(), &region)
                .await;
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::LoadingTarget);
        if let Err(e) = self.caps.schematics.paste(&entry.path, region.center).await {
            let whole = self.put_back(&mut ctx, safety, no_entities, &region).await;
            return Err(self.fatal(&mut ctx, e, whole));
        }

        ctx.enter(Step::Teleporting);
        self.send_team_home(&mut ctx, &info, &region).await;
        self.evacuate(&mut ctx, &region, &team).await;
        if ctx.actor().id != owner {
            self.caps.host.send_message(
                owner,
                &format!("Your island was restored from backup {}.", entry.name),
            );
        }

        let removed = blocking(move || match std::fs::remove_file(&safety) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(skygrid_data::DataError::FileDelete { path: safety, source }),
        })
        .await;
        if let Err(e) = removed {
            ctx.soft_fail("safety copy cleanup", e);
        }
        info!("Restored {} for {owner}", entry.name);
        Ok(ctx.finish(&format!("Restored backup {}.", entry.name)))
    }
}
