//! Slot backups: timestamped manual copies pruned to a limit, plus one
//! rolling auto backup per slot that is overwritten on every interval.
//!
//! Layout: `backups/<player>/slot-<n>-<yyyyMMdd-HHmmss>.schem` and
//! `backups/<player>/slot-<n>-auto.schem`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use skygrid_api::{PlayerId, Region, SchematicCapability};
use skygrid_data::{DataError, SlotFiles};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authority::WorkflowKind;
use crate::workflow::error::FailureCause;
use crate::workflow::{blocking, Orchestrator};

const AUTO_SUFFIX: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub auto: bool,
}

#[derive(Clone)]
pub struct BackupManager {
    schematics: Arc<dyn SchematicCapability>,
    files: SlotFiles,
    enabled: bool,
    max_per_slot: usize,
}

impl BackupManager {
    pub fn new(schematics: Arc<dyn SchematicCapability>, files: SlotFiles, enabled: bool, max_per_slot: usize) -> Self {
        Self {
            schematics,
            files,
            enabled,
            max_per_slot,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Save a timestamped backup of `region` for `slot`, then prune.
    pub async fn create(&self, player: PlayerId, slot: u32, region: &Region) -> Result<PathBuf, FailureCause> {
        let dir = self.files.backup_dir(player);
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let path = {
            let dir = dir.clone();
            blocking(move || {
                let mut candidate = dir.join(format!("slot-{slot}-{stamp}.schem"));
                let mut n = 1;
                while candidate.exists() {
                    candidate = dir.join(format!("slot-{slot}-{stamp}-{n}.schem"));
                    n += 1;
                }
                Ok(candidate)
            })
            .await?
        };
        self.schematics.save(region, true, &path).await?;
        info!("Backed up slot {slot} of {player} to {}", path.display());
        let pruned = self.prune(player, slot).await?;
        if pruned > 0 {
            debug!("Pruned {pruned} old backup(s) of slot {slot} for {player}");
        }
        Ok(path)
    }

    /// Overwrite the rolling auto backup of `slot`.
    pub async fn create_auto(&self, player: PlayerId, slot: u32, region: &Region) -> Result<PathBuf, FailureCause> {
        let path = self
            .files
            .backup_dir(player)
            .join(format!("slot-{slot}-{AUTO_SUFFIX}.schem"));
        self.schematics.save(region, true, &path).await?;
        Ok(path)
    }

    /// Backups of `slot`, oldest first. The auto backup sorts last.
    pub async fn list(&self, player: PlayerId, slot: u32) -> Result<Vec<BackupEntry>, FailureCause> {
        let dir = self.files.backup_dir(player);
        blocking(move || list_dir(&dir, slot)).await
    }

    /// Delete the oldest manual backups beyond the limit.
    pub async fn prune(&self, player: PlayerId, slot: u32) -> Result<usize, FailureCause> {
        let dir = self.files.backup_dir(player);
        let keep = self.max_per_slot;
        blocking(move || {
            let manual: Vec<BackupEntry> = list_dir(&dir, slot)?.into_iter().filter(|b| !b.auto).collect();
            let excess = manual.len().saturating_sub(keep);
            for entry in &manual[..excess] {
                std::fs::remove_file(&entry.path).map_err(|source| DataError::FileDelete {
                    path: entry.path.clone(),
                    source,
                })?;
            }
            Ok(excess)
        })
        .await
    }

    /// Find a backup by file name (with or without extension).
    pub async fn find(&self, player: PlayerId, slot: u32, name: &str) -> Result<Option<BackupEntry>, FailureCause> {
        let wanted = name.trim_end_matches(".schem").to_string();
        Ok(self
            .list(player, slot)
            .await?
            .into_iter()
            .find(|b| b.name == wanted))
    }
}

fn list_dir(dir: &std::path::Path, slot: u32) -> Result<Vec<BackupEntry>, DataError> {
    let prefix = format!("slot-{slot}-");
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for entry in read {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("schem") {
            continue;
        }
        let Some(rest) = stem.strip_prefix(&prefix) else {
            continue;
        };
        entries.push(BackupEntry {
            auto: rest == AUTO_SUFFIX,
            name: stem.to_string(),
            path: path.clone(),
        });
    }
    entries.sort_by(|a, b| a.auto.cmp(&b.auto).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

/// Every `interval`, refresh the auto backup of each online player's active
/// slot. Players with a workflow in flight are skipped for that round.
pub fn spawn_auto_backups(
    orch: Orchestrator,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_auto_round(&orch).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

pub async fn run_auto_round(orch: &Orchestrator) -> usize {
    let mut saved = 0;
    for player in orch.caps.host.online_players() {
        let id = player.id;
        let now = orch.now_ms();
        let target = orch
            .authority
            .call(move |state| {
                let slot = state.slots.active(id).filter(|s| s.has_island)?;
                let (number, coord) = (slot.number, slot.coord?);
                state
                    .begin_workflow(id, WorkflowKind::Backup, Vec::new(), now)
                    .ok()?;
                Some((number, coord))
            })
            .await;
        let (slot, coord) = match target {
            Ok(Some(target)) => target,
            Ok(None) => continue,
            Err(_) => return saved,
        };
        match orch
            .backups
            .create_auto(id, slot, &orch.region_of(coord))
            .await
        {
            Ok(_) => saved += 1,
            Err(e) => warn!("Auto backup of slot {slot} for {} failed: {e}", player.name),
        }
        let _ = orch.authority.call(move |state| state.finish_workflow(id)).await;
    }
    if saved > 0 {
        info!("Auto backup saved {saved} island(s)");
    }
    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use skygrid_world::Op;

    #[tokio::test]
    async fn prune_keeps_newest() {
        let h = Harness::new().await;
        let p = h.claim("Alex", "0,0").await;
        let region = h.orch.region_of("0,0".parse().unwrap());
        let dir = h.orch.files.backup_dir(p);
        std::fs::create_dir_all(&dir).unwrap();
        for stamp in ["20240101-000000", "20240102-000000", "20240103-000000"] {
            std::fs::write(dir.join(format!("slot-1-{stamp}.schem")), b"x").unwrap();
        }
        std::fs::write(dir.join("slot-1-auto.schem"), b"x").unwrap();
        std::fs::write(dir.join("slot-2-20240101-000000.schem"), b"x").unwrap();

        let newest = h.orch.backups.create(p, 1, &region).await.unwrap();

        let left = h.orch.backups.list(p, 1).await.unwrap();
        let names: Vec<&str> = left.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(left.len(), 4);
        assert!(!names.contains(&"slot-1-20240101-000000"));
        assert!(names.contains(&"slot-1-20240102-000000"));
        assert!(left.last().unwrap().auto);
        assert!(left.iter().any(|b| b.path == newest));
        // Other slots are untouched.
        assert_eq!(h.orch.backups.list(p, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_accepts_extension() {
        let h = Harness::new().await;
        let p = h.claim("Alex", "0,0").await;
        let region = h.orch.region_of("0,0".parse().unwrap());
        let path = h.orch.backups.create(p, 1, &region).await.unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();
        assert!(h.orch.backups.find(p, 1, &format!("{stem}.schem")).await.unwrap().is_some());
        assert!(h.orch.backups.find(p, 1, "slot-1-nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_round_skips_busy_players() {
        let h = Harness::new().await;
        let alex = h.claim("Alex", "0,0").await;
        let sam = h.claim("Sam", "1,0").await;
        h.orch
            .authority
            .call(move |state| state.begin_workflow(sam, WorkflowKind::Switch, Vec::new(), 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(run_auto_round(&h.orch).await, 1);
        let alex_backups = h.orch.backups.list(alex, 1).await.unwrap();
        assert_eq!(alex_backups.len(), 1);
        assert!(alex_backups[0].auto);
        assert!(h.orch.backups.list(sam, 1).await.unwrap().is_empty());
        // Alex's in-flight marker was released.
        assert!(!h.orch.authority.call(move |s| s.is_busy(alex)).await.unwrap());
    }

    #[tokio::test]
    async fn failed_auto_backup_is_logged_only() {
        let h = Harness::new().await;
        let alex = h.claim("Alex", "0,0").await;
        h.world.fail_next(Op::Save, 1);
        assert_eq!(run_auto_round(&h.orch).await, 0);
        assert!(!h.orch.authority.call(move |s| s.is_busy(alex)).await.unwrap());
    }
}
