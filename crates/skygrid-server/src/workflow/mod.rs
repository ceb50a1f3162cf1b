//! Multi-step island workflows: claim, slot switch, relocation, admin
//! removal, and restores.
//!
//! Each workflow is an `async fn` on [`Orchestrator`] that runs on its own
//! task. Every step boundary is an await: capability calls go to the host,
//! file I/O goes to the blocking pool, and bookkeeping goes to the
//! authority. A failing step returns through `?` to a single error path.

pub mod claim;
pub mod context;
pub mod error;
pub mod relocation;
pub mod removal;
pub mod restore;
pub mod switch;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use skygrid_api::{
    BlockPos, Capabilities, IslandInfo, PlayerId, Position, Region,
};
use skygrid_data::{entity_file, Clock, DataError, GridCoord, SlotFiles};
use tracing::{error, info};

use crate::authority::Authority;
use crate::backup::BackupManager;
use crate::config::ServerConfig;
use context::WorkflowContext;
use error::{FailureCause, WorkflowError};

/// Workflow-relevant settings, resolved from the config once.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub spacing: i32,
    pub protection_range: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub island_height: i32,
    pub switch_cooldown: Duration,
    pub relocation_cooldown: Duration,
    pub relocation_cost: f64,
    pub currency_name: String,
    pub default_blueprint: String,
    pub backup_on_switch: bool,
    pub visitor_warning: String,
    pub confirmation_timeout: Duration,
    pub switch_hooks: Vec<String>,
    pub relocate_hooks: Vec<String>,
}

impl WorkflowSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            spacing: config.grid.spacing,
            protection_range: config.grid.protection_range,
            min_y: config.world.min_y,
            max_y: config.world.max_y,
            island_height: config.world.island_height,
            switch_cooldown: config.slots.cooldown(),
            relocation_cooldown: config.relocation.cooldown(),
            relocation_cost: config.relocation.cost,
            currency_name: config.relocation.currency_name.clone(),
            default_blueprint: config.slots.default_blueprint.clone(),
            backup_on_switch: config.backups.enabled && config.backups.on_switch,
            visitor_warning: config.visitors.warning_message.clone(),
            confirmation_timeout: Duration::from_secs(config.gate.confirmation_timeout),
            switch_hooks: config.hooks.on_switch.clone(),
            relocate_hooks: config.hooks.on_relocate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pub authority: Authority,
    pub caps: Capabilities,
    pub settings: Arc<WorkflowSettings>,
    pub clock: Arc<dyn Clock>,
    pub files: SlotFiles,
    pub backups: BackupManager,
}

impl Orchestrator {
    pub fn new(authority: Authority, caps: Capabilities, config: &ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let files = SlotFiles::new(config.server.data_dir.clone());
        let backups = BackupManager::new(
            caps.schematics.clone(),
            files.clone(),
            config.backups.enabled,
            config.backups.max_per_slot,
        );
        Self {
            authority,
            caps,
            settings: Arc::new(WorkflowSettings::from_config(config)),
            clock,
            files,
            backups,
        }
    }

    /// World position of the island centre of `coord`.
    pub fn center_of(&self, coord: GridCoord) -> Position {
        let (x, z) = coord.world_center(self.settings.spacing);
        Position::new(x as f64, self.settings.island_height as f64, z as f64)
    }

    /// The column saved and cleared for an island. Never reaches into a
    /// neighbouring cell.
    pub fn region_of(&self, coord: GridCoord) -> Region {
        let range = self.settings.protection_range.min(self.settings.spacing - 1).max(0);
        Region::around(
            self.center_of(coord).block(),
            range,
            self.settings.min_y,
            self.settings.max_y,
        )
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Log a fatal failure, mark the context failed and tell the actor.
    pub(crate) fn fatal(
        &self,
        ctx: &mut WorkflowContext,
        source: impl Into<FailureCause>,
        recoverable: bool,
    ) -> WorkflowError {
        let step = ctx.fail();
        let err = WorkflowError::Fatal {
            kind: ctx.kind(),
            step,
            recoverable,
            source: source.into(),
        };
        if recoverable {
            error!("[{}] {err}", ctx.actor().name);
        } else {
            error!(
                "[{}] {err}. THE ISLAND AREA NEEDS MANUAL ATTENTION.",
                ctx.actor().name
            );
        }
        ctx.tell(&err.user_message());
        err
    }

    /// Capture the entities in `region` and write them to `path`.
    pub(crate) async fn save_entities(&self, region: &Region, path: PathBuf) -> Result<usize, FailureCause> {
        let entities = self.caps.schematics.capture_entities(region).await?;
        let count = entities.len();
        blocking(move || entity_file::write_entities(&path, &entities)).await?;
        Ok(count)
    }

    /// Respawn the entities stored at `path` around `center`.
    pub(crate) async fn restore_entities(&self, path: PathBuf, center: BlockPos) -> Result<usize, FailureCause> {
        let Some(entities) = blocking(move || entity_file::read_entities(&path)).await? else {
            return Ok(0);
        };
        Ok(self.caps.schematics.spawn_entities(center, &entities).await?)
    }

    /// Remove entities first so nothing falls when the blocks go.
    pub(crate) async fn clear_area(&self, region: &Region) -> Result<usize, FailureCause> {
        let removed = self.caps.schematics.remove_entities(region).await?;
        self.caps.schematics.clear_region(region).await?;
        Ok(removed)
    }

    /// Put a saved area back after a failed step. Returns whether the
    /// area is whole again.
    ///
    /// Entities still standing in the area are removed before the saved
    /// ones are respawned. If they cannot be removed the saved ones are not
    /// respawned, so nothing is duplicated.
    pub(crate) async fn put_back(
        &self,
        ctx: &mut WorkflowContext,
        schematic: PathBuf,
        entities: PathBuf,
        region: &Region,
    ) -> bool {
        info!("[{}] Rolling back {}", ctx.actor().name, region.center);
        let respawn = match self.caps.schematics.remove_entities(region).await {
            Ok(_) => true,
            Err(e) => {
                ctx.soft_fail("rollback entity removal", e);
                false
            }
        };
        if let Err(e) = self.caps.schematics.clear_region(region).await {
            ctx.soft_fail("rollback clear", e);
        }
        if let Err(e) = self.caps.schematics.paste(&schematic, region.center).await {
            error!("[{}] Rollback paste failed: {e}", ctx.actor().name);
            return false;
        }
        if respawn {
            if let Err(e) = self.restore_entities(entities, region.center).await {
                ctx.soft_fail("rollback entities", e);
            }
        }
        true
    }

    /// Warn everyone standing in `region` who is not on the team.
    pub(crate) fn warn_visitors(&self, region: &Region, team: &[PlayerId]) {
        for player in self.caps.host.online_players() {
            if !team.contains(&player.id) && region.contains_position(&player.position) {
                self.caps
                    .host
                    .send_message(player.id, &self.settings.visitor_warning);
            }
        }
    }

    /// Move non-team players out of `region`: to their own island's home if
    /// they have one, otherwise to spawn.
    pub(crate) async fn evacuate(&self, ctx: &mut WorkflowContext, region: &Region, team: &[PlayerId]) {
        for player in self.caps.host.online_players() {
            if team.contains(&player.id) || !region.contains_position(&player.position) {
                continue;
            }
            let destination = match self.caps.islands.island_of(player.id).await {
                Ok(Some(own)) if !region.contains_position(&own.center) => own.default_home(),
                _ => self.caps.host.spawn_location(),
            };
            if let Err(e) = self.caps.host.teleport(player.id, destination).await {
                ctx.soft_fail("visitor teleport", e);
            }
        }
    }

    /// Send the actor home and bring along online team members standing
    /// in `region`.
    pub(crate) async fn send_team_home(&self, ctx: &mut WorkflowContext, island: &IslandInfo, region: &Region) {
        let home = island.default_home();
        let actor = ctx.actor().id;
        let mut targets = vec![actor];
        for player in self.caps.host.online_players() {
            if player.id != actor && island.is_team_member(player.id) && region.contains_position(&player.position) {
                targets.push(player.id);
            }
        }
        for id in targets {
            if let Err(e) = self.caps.host.teleport(id, home).await {
                ctx.soft_fail("teleport", e);
            }
        }
    }

    /// Team of an island: owner plus members.
    pub(crate) fn team_of(island: &IslandInfo) -> Vec<PlayerId> {
        island.owner.iter().chain(island.members.iter()).copied().collect()
    }

    pub(crate) fn run_hooks(&self, templates: &[String], player: &str, from: &str, to: &str) {
        for template in templates {
            let command = template
                .replace("{player}", player)
                .replace("{from}", from)
                .replace("{to}", to);
            self.caps.host.dispatch_command(&command);
        }
    }

    pub(crate) async fn island_info(&self, island: &skygrid_api::IslandId) -> Result<IslandInfo, FailureCause> {
        self.caps
            .islands
            .island(island)
            .await?
            .ok_or_else(|| skygrid_api::CapabilityError::IslandNotFound(island.clone()).into())
    }
}

/// Run blocking file work off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, FailureCause>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DataError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FailureCause::Task(e.to_string()))?
        .map_err(FailureCause::from)
}

/// Homes of an island keyed by name, for logging.
pub(crate) fn home_names(homes: &BTreeMap<String, Position>) -> String {
    homes
        .keys()
        .map(|k| if k.is_empty() { "default" } else { k.as_str() })
        .collect::<Vec<_>>()
        .join(", ")
}
