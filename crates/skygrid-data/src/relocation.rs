//! Relocation history and cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skygrid_api::PlayerId;

use crate::coord::GridCoord;
use crate::error::DataError;
use crate::repository::{PendingFlush, Repository};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelocationRecord {
    pub player: PlayerId,
    /// Milliseconds since the epoch; `None` after an admin cooldown reset.
    #[serde(default)]
    pub last_relocation_ms: Option<u64>,
    #[serde(default)]
    pub from: Option<GridCoord>,
    pub to: GridCoord,
    #[serde(default)]
    pub count: u32,
}

pub struct RelocationLog {
    records: HashMap<PlayerId, RelocationRecord>,
    repo: Arc<dyn Repository<Vec<RelocationRecord>>>,
    dirty: bool,
}

impl RelocationLog {
    pub fn new(repo: Arc<dyn Repository<Vec<RelocationRecord>>>) -> Self {
        Self {
            records: HashMap::new(),
            repo,
            dirty: false,
        }
    }

    pub fn get(&self, player: PlayerId) -> Option<&RelocationRecord> {
        self.records.get(&player)
    }

    pub fn record(&mut self, player: PlayerId, from: GridCoord, to: GridCoord, now_ms: u64) {
        let entry = self.records.entry(player).or_insert(RelocationRecord {
            player,
            last_relocation_ms: None,
            from: None,
            to,
            count: 0,
        });
        entry.last_relocation_ms = Some(now_ms);
        entry.from = Some(from);
        entry.to = to;
        entry.count += 1;
        self.dirty = true;
    }

    pub fn remaining_cooldown(&self, player: PlayerId, now_ms: u64, window: Duration, bypass: bool) -> Duration {
        if bypass {
            return Duration::ZERO;
        }
        match self.records.get(&player).and_then(|r| r.last_relocation_ms) {
            Some(last) => window.saturating_sub(Duration::from_millis(now_ms.saturating_sub(last))),
            None => Duration::ZERO,
        }
    }

    pub fn reset_cooldown(&mut self, player: PlayerId) -> bool {
        match self.records.get_mut(&player) {
            Some(record) => {
                record.last_relocation_ms = None;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn purge_player(&mut self, player: PlayerId) -> bool {
        let removed = self.records.remove(&player).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn take_flush(&mut self) -> Option<PendingFlush<Vec<RelocationRecord>>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.player);
        Some(PendingFlush::new(self.repo.clone(), records))
    }

    pub fn reload(&mut self) -> Result<usize, DataError> {
        let records = self.repo.load()?.unwrap_or_default();
        self.records = records.into_iter().map(|r| (r.player, r)).collect();
        self.dirty = false;
        Ok(self.records.len())
    }
}

/// "1d 2h 3m 4s", dropping leading zero units; "Ready" for zero.
pub fn format_cooldown(remaining: Duration) -> String {
    let total = remaining.as_secs();
    if total == 0 {
        return "Ready".into();
    }
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}
