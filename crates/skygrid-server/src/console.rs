//! Operator console. Player commands name the acting player first, so a
//! single console can drive any number of sandbox players.

use std::collections::HashMap;
use std::sync::Arc;

use skygrid_api::{ActorSnapshot, HostCapability, PlayerId};
use skygrid_data::{CellStatus, GridBounds, GridCoord};
use skygrid_world::SandboxWorld;
use tracing::{error, info, warn};

use crate::gate::{cooldown_text, Caller, CooldownKind, Gate, GateError, WorkflowHandle};

/// Result of one console command.
pub struct CommandResult {
    pub success: bool,
    pub messages: Vec<String>,
    pub broadcast: Option<String>,
    pub should_stop: bool,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            messages: vec![message.into()],
            broadcast: None,
            should_stop: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            messages: vec![message.into()],
            broadcast: None,
            should_stop: false,
        }
    }

    fn lines(messages: Vec<String>) -> Self {
        Self {
            success: true,
            messages,
            broadcast: None,
            should_stop: false,
        }
    }
}

impl From<GateError> for CommandResult {
    fn from(err: GateError) -> Self {
        CommandResult::err(err.user_message())
    }
}

const HELP: &[(&str, &str)] = &[
    ("join <name>", "Connect a sandbox player"),
    ("quit <name>", "Disconnect a sandbox player"),
    ("perm <name> <permission>", "Grant a permission"),
    ("balance <name> <amount>", "Set a player's balance"),
    ("claim <name> <x,z> [blueprint]", "Request an island at a grid cell"),
    ("switch <name> <slot>", "Request a slot switch"),
    ("relocate <name> <x,z>", "Request moving the island"),
    ("restoreslot <name> <slot> <x,z>", "Request restoring a slot after removal"),
    ("confirm <name>", "Confirm the pending request"),
    ("cancel <name>", "Drop the pending request"),
    ("slots <name>", "List slots and cooldowns"),
    ("delete <name> <slot>", "Delete an inactive slot"),
    ("rename <name> <slot> <text>", "Rename a slot"),
    ("icon <name> <slot> <icon>", "Set a slot icon"),
    ("backup <name>", "Back up the active slot"),
    ("backups <name>", "List backups of the active slot"),
    ("restore <name> <backup>", "Restore a backup of the active slot"),
    ("locate <name>", "Show a player's grid cell"),
    ("neighbors <x,z>", "Show the cells around a cell"),
    ("cell <x,z>", "Show details of a cell"),
    ("admin <subcommand>", "reserve, block, unreserve, price, clearprice, info, remove, resetcooldown, resize, restore, purge, sync"),
    ("save", "Write dirty stores now"),
    ("stop", "Stop the server"),
];

pub struct Console {
    gate: Gate,
    world: Arc<SandboxWorld>,
    /// Every player that joined this session, online or not.
    known: HashMap<String, PlayerId>,
}

impl Console {
    pub fn new(gate: Gate, world: Arc<SandboxWorld>) -> Self {
        Self {
            gate,
            world,
            known: HashMap::new(),
        }
    }

    pub async fn execute(&mut self, line: &str) -> CommandResult {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return CommandResult::err("Empty command");
        };
        let args: Vec<String> = parts.map(str::to_string).collect();
        match name.to_lowercase().as_str() {
            "help" => cmd_help(),
            "join" => self.cmd_join(&args),
            "quit" => self.cmd_quit(&args),
            "perm" => self.cmd_perm(&args),
            "balance" => self.cmd_balance(&args),
            "claim" => self.cmd_claim(&args).await,
            "switch" => self.cmd_switch(&args).await,
            "relocate" => self.cmd_relocate(&args).await,
            "restoreslot" => self.cmd_restore_slot(&args).await,
            "confirm" => self.cmd_confirm(&args).await,
            "cancel" => self.cmd_cancel(&args).await,
            "slots" => self.cmd_slots(&args).await,
            "delete" | "deleteslot" => self.cmd_delete_slot(&args).await,
            "rename" => self.cmd_rename(&args).await,
            "icon" => self.cmd_icon(&args).await,
            "backup" => self.cmd_backup(&args).await,
            "backups" => self.cmd_backups(&args).await,
            "restore" => self.cmd_restore(&args).await,
            "locate" => self.cmd_locate(&args).await,
            "neighbors" => self.cmd_neighbors(&args).await,
            "cell" => self.cmd_cell(&args).await,
            "admin" => self.cmd_admin(&args).await,
            "save" => self.cmd_save().await,
            "stop" => CommandResult {
                success: true,
                messages: vec!["Stopping the server...".into()],
                broadcast: Some("Server closing".into()),
                should_stop: true,
            },
            other => CommandResult::err(format!(
                "Unknown command: {other}. Type help for a list of commands."
            )),
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn player(&self, name: &str) -> Result<PlayerId, CommandResult> {
        self.known
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
            .ok_or_else(|| CommandResult::err(format!("Player not found: {name}")))
    }

    /// The acting player: must be online.
    fn actor(&self, name: &str) -> Result<ActorSnapshot, CommandResult> {
        let id = self.player(name)?;
        match self.world.player(id) {
            Some(online) => Ok(ActorSnapshot::new(online.id, online.name)),
            None => Err(CommandResult::err(format!("{name} is not online"))),
        }
    }

    /// Log the outcome of a workflow once it ends.
    fn watch(&self, label: String, handle: WorkflowHandle) {
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(report)) => info!(
                    "{label}: {} finished with {} soft failure(s)",
                    report.kind.label(),
                    report.soft_failures.len()
                ),
                Ok(Err(e)) if e.is_recoverable() => warn!("{label}: {e}"),
                Ok(Err(e)) => error!("{label}: {e}"),
                Err(e) => error!("{label}: workflow task failed: {e}"),
            }
        });
    }

    // ─── Players ─────────────────────────────────────────────────────────

    fn cmd_join(&mut self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: join <name>");
        };
        let id = match self.player(name) {
            Ok(id) => id,
            Err(_) => PlayerId::random(),
        };
        self.known.insert(name.clone(), id);
        self.world.join(id, name, self.world.spawn_location());
        CommandResult {
            success: true,
            messages: vec![format!("{name} joined as {id}")],
            broadcast: Some(format!("{name} joined the game")),
            should_stop: false,
        }
    }

    fn cmd_quit(&mut self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: quit <name>");
        };
        match self.player(name) {
            Ok(id) => {
                self.world.quit(id);
                CommandResult::ok(format!("{name} left"))
            }
            Err(e) => e,
        }
    }

    fn cmd_perm(&self, args: &[String]) -> CommandResult {
        let [name, permission] = args else {
            return CommandResult::err("Usage: perm <name> <permission>");
        };
        match self.player(name) {
            Ok(id) => {
                self.world.grant_permission(id, permission);
                CommandResult::ok(format!("Granted {permission} to {name}"))
            }
            Err(e) => e,
        }
    }

    fn cmd_balance(&self, args: &[String]) -> CommandResult {
        let [name, amount] = args else {
            return CommandResult::err("Usage: balance <name> <amount>");
        };
        let Ok(amount) = amount.parse::<f64>() else {
            return CommandResult::err(format!("Invalid amount: {amount}"));
        };
        match self.player(name) {
            Ok(id) => {
                self.world.set_balance(id, amount);
                CommandResult::ok(format!("{name} now has {amount:.2}"))
            }
            Err(e) => e,
        }
    }

    // ─── Requests ────────────────────────────────────────────────────────

    async fn cmd_claim(&self, args: &[String]) -> CommandResult {
        if args.len() < 2 || args.len() > 3 {
            return CommandResult::err("Usage: claim <name> <x,z> [blueprint]");
        }
        let actor = match self.actor(&args[0]) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let coord = match parse_coord(&args[1]) {
            Ok(c) => c,
            Err(e) => return e,
        };
        match self.gate.request_claim(&actor, coord, args.get(2).cloned()).await {
            Ok(prompt) => CommandResult::ok(prompt),
            Err(e) => e.into(),
        }
    }

    async fn cmd_switch(&self, args: &[String]) -> CommandResult {
        let [name, slot] = args else {
            return CommandResult::err("Usage: switch <name> <slot>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let slot = match parse_slot(slot) {
            Ok(s) => s,
            Err(e) => return e,
        };
        match self.gate.request_switch(&actor, slot).await {
            Ok(prompt) => CommandResult::ok(prompt),
            Err(e) => e.into(),
        }
    }

    async fn cmd_relocate(&self, args: &[String]) -> CommandResult {
        let [name, coord] = args else {
            return CommandResult::err("Usage: relocate <name> <x,z>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let coord = match parse_coord(coord) {
            Ok(c) => c,
            Err(e) => return e,
        };
        match self.gate.request_relocate(&actor, coord).await {
            Ok(prompt) => CommandResult::ok(prompt),
            Err(e) => e.into(),
        }
    }

    async fn cmd_restore_slot(&self, args: &[String]) -> CommandResult {
        let [name, slot, coord] = args else {
            return CommandResult::err("Usage: restoreslot <name> <slot> <x,z>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let (slot, coord) = match (parse_slot(slot), parse_coord(coord)) {
            (Ok(s), Ok(c)) => (s, c),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        match self.gate.request_slot_restore(&actor, slot, coord).await {
            Ok(prompt) => CommandResult::ok(prompt),
            Err(e) => e.into(),
        }
    }

    async fn cmd_confirm(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: confirm <name>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        match self.gate.confirm(&actor).await {
            Ok(handle) => {
                self.watch(actor.name.clone(), handle);
                CommandResult::ok(format!("Started for {}", actor.name))
            }
            Err(e) => e.into(),
        }
    }

    async fn cmd_cancel(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: cancel <name>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        match self.gate.cancel(&actor).await {
            Ok(true) => CommandResult::ok("Cancelled."),
            Ok(false) => CommandResult::err("Nothing to cancel."),
            Err(e) => e.into(),
        }
    }

    // ─── Slots ───────────────────────────────────────────────────────────

    async fn cmd_slots(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: slots <name>");
        };
        let id = match self.player(name) {
            Ok(id) => id,
            Err(e) => return e,
        };
        let overview = match self.gate.slots(id).await {
            Ok(o) => o,
            Err(e) => return e.into(),
        };
        if overview.slots.is_empty() {
            return CommandResult::ok(format!("{name} has no slots"));
        }
        let mut messages = vec![match overview.coord {
            Some(coord) => format!("{name}'s island is at {coord}"),
            None => format!("{name} has no placed island"),
        }];
        for slot in &overview.slots {
            messages.push(format!(
                "  {}{} [{}] {} {}",
                if slot.active { "*" } else { " " },
                slot.number,
                slot.icon,
                slot.name,
                match (&slot.blueprint, slot.has_island) {
                    (Some(bp), true) => format!("({bp})"),
                    _ => "(empty)".into(),
                }
            ));
        }
        for (what, left) in [
            ("Switch", overview.switch_cooldown),
            ("Relocation", overview.relocation_cooldown),
        ] {
            if !left.is_zero() {
                messages.push(format!("{what} available in {}", cooldown_text(left)));
            }
        }
        CommandResult::lines(messages)
    }

    async fn cmd_delete_slot(&self, args: &[String]) -> CommandResult {
        let [name, slot] = args else {
            return CommandResult::err("Usage: delete <name> <slot>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let slot = match parse_slot(slot) {
            Ok(s) => s,
            Err(e) => return e,
        };
        match self.gate.delete_slot(&actor, slot).await {
            Ok(()) => CommandResult::ok(format!("Deleted slot {slot}")),
            Err(e) => e.into(),
        }
    }

    async fn cmd_rename(&self, args: &[String]) -> CommandResult {
        if args.len() < 3 {
            return CommandResult::err("Usage: rename <name> <slot> <text>");
        }
        let actor = match self.actor(&args[0]) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let slot = match parse_slot(&args[1]) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let text = args[2..].join(" ");
        match self.gate.rename_slot(&actor, slot, text.clone()).await {
            Ok(()) => CommandResult::ok(format!("Slot {slot} is now called {text}")),
            Err(e) => e.into(),
        }
    }

    async fn cmd_icon(&self, args: &[String]) -> CommandResult {
        let [name, slot, icon] = args else {
            return CommandResult::err("Usage: icon <name> <slot> <icon>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let slot = match parse_slot(slot) {
            Ok(s) => s,
            Err(e) => return e,
        };
        match self.gate.set_slot_icon(&actor, slot, icon.to_uppercase()).await {
            Ok(()) => CommandResult::ok(format!("Slot {slot} icon set")),
            Err(e) => e.into(),
        }
    }

    // ─── Backups ─────────────────────────────────────────────────────────

    async fn cmd_backup(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: backup <name>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        match self.gate.backup(&actor).await {
            Ok(path) => CommandResult::ok(format!("Saved {}", path.display())),
            Err(e) => e.into(),
        }
    }

    async fn cmd_backups(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: backups <name>");
        };
        let id = match self.player(name) {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.gate.backups(id).await {
            Ok(list) if list.is_empty() => CommandResult::ok("No backups"),
            Ok(list) => CommandResult::lines(
                list.into_iter()
                    .map(|b| format!("  {}{}", b.name, if b.auto { " (auto)" } else { "" }))
                    .collect(),
            ),
            Err(e) => e.into(),
        }
    }

    async fn cmd_restore(&self, args: &[String]) -> CommandResult {
        let [name, backup] = args else {
            return CommandResult::err("Usage: restore <name> <backup>");
        };
        let actor = match self.actor(name) {
            Ok(a) => a,
            Err(e) => return e,
        };
        match self.gate.restore_backup(&actor, backup.clone()).await {
            Ok(handle) => {
                self.watch(actor.name.clone(), handle);
                CommandResult::ok(format!("Restoring {backup} for {name}"))
            }
            Err(e) => e.into(),
        }
    }

    // ─── Grid ────────────────────────────────────────────────────────────

    async fn cmd_locate(&self, args: &[String]) -> CommandResult {
        let [name] = args else {
            return CommandResult::err("Usage: locate <name>");
        };
        let id = match self.player(name) {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.gate.locate(id).await {
            Ok(Some(coord)) => CommandResult::ok(format!("{name}'s island is at {coord}")),
            Ok(None) => CommandResult::ok(format!("{name} has no island on the grid")),
            Err(e) => e.into(),
        }
    }

    async fn cmd_neighbors(&self, args: &[String]) -> CommandResult {
        let [coord] = args else {
            return CommandResult::err("Usage: neighbors <x,z>");
        };
        let center = match parse_coord(coord) {
            Ok(c) => c,
            Err(e) => return e,
        };
        match self.gate.neighbors(center).await {
            Ok(rows) => CommandResult::lines(
                rows.iter()
                    .map(|row| {
                        row.iter()
                            .map(|(_, status)| status_symbol(*status))
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .collect(),
            ),
            Err(e) => e.into(),
        }
    }

    async fn cmd_cell(&self, args: &[String]) -> CommandResult {
        let [coord] = args else {
            return CommandResult::err("Usage: cell <x,z>");
        };
        let coord = match parse_coord(coord) {
            Ok(c) => c,
            Err(e) => return e,
        };
        let info = match self.gate.cell_info(coord).await {
            Ok(info) => info,
            Err(e) => return e.into(),
        };
        let mut messages = vec![format!(
            "{} is {} (world {}, {})",
            info.coord,
            info.status.label(),
            info.world_center.0,
            info.world_center.1
        )];
        if let Some(owner) = &info.owner_name {
            messages.push(format!("  Owner: {owner}"));
        }
        if let Some(island) = &info.island {
            messages.push(format!("  Island: {island}"));
        }
        if let Some(reservation) = info.reservation {
            messages.push(match reservation.purchase_price() {
                Some(price) => format!("  For sale at {price:.2}"),
                None => "  Blocked".to_string(),
            });
        }
        if let Some(record) = &info.relocation {
            let from = record.from.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
            messages.push(format!("  Relocated {} time(s), last from {from}", record.count));
        }
        CommandResult::lines(messages)
    }

    // ─── Admin ───────────────────────────────────────────────────────────

    async fn cmd_admin(&self, args: &[String]) -> CommandResult {
        let Some((sub, rest)) = args.split_first() else {
            return CommandResult::err("Usage: admin <subcommand> ...");
        };
        let caller = Caller::Console;
        match (sub.to_lowercase().as_str(), rest) {
            ("reserve", [coord, rest @ ..]) => {
                let coord = match parse_coord(coord) {
                    Ok(c) => c,
                    Err(e) => return e,
                };
                let price = match rest.first().map(|p| p.parse::<f64>()) {
                    None => None,
                    Some(Ok(p)) => Some(p),
                    Some(Err(_)) => return CommandResult::err("Invalid price"),
                };
                match self.gate.admin_reserve(&caller, coord, false, price).await {
                    Ok(()) => CommandResult::ok(format!("Reserved {coord}")),
                    Err(e) => e.into(),
                }
            }
            ("block", [coord]) => {
                let coord = match parse_coord(coord) {
                    Ok(c) => c,
                    Err(e) => return e,
                };
                match self.gate.admin_reserve(&caller, coord, true, None).await {
                    Ok(()) => CommandResult::ok(format!("Blocked {coord}")),
                    Err(e) => e.into(),
                }
            }
            ("unreserve", [coord]) => {
                let coord = match parse_coord(coord) {
                    Ok(c) => c,
                    Err(e) => return e,
                };
                match self.gate.admin_unreserve(&caller, coord).await {
                    Ok(true) => CommandResult::ok(format!("{coord} is no longer reserved")),
                    Ok(false) => CommandResult::err(format!("{coord} was not reserved")),
                    Err(e) => e.into(),
                }
            }
            ("price", [coord, price]) => {
                let coord = match parse_coord(coord) {
                    Ok(c) => c,
                    Err(e) => return e,
                };
                let Ok(price) = price.parse::<f64>() else {
                    return CommandResult::err("Invalid price");
                };
                match self.gate.admin_set_price(&caller, coord, price).await {
                    Ok(()) => CommandResult::ok(format!("{coord} now costs {price:.2}")),
                    Err(e) => e.into(),
                }
            }
            ("clearprice", [coord]) => {
                let coord = match parse_coord(coord) {
                    Ok(c) => c,
                    Err(e) => return e,
                };
                match self.gate.admin_clear_price(&caller, coord).await {
                    Ok(true) => CommandResult::ok(format!("{coord} has no price")),
                    Ok(false) => CommandResult::err(format!("{coord} had no price")),
                    Err(e) => e.into(),
                }
            }
            ("remove", [name]) => {
                let target = match self.player(name) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match self.gate.admin_remove(&caller, target).await {
                    Ok(handle) => {
                        self.watch(format!("removal of {name}"), handle);
                        CommandResult::ok(format!("Removing {name}'s island"))
                    }
                    Err(e) => e.into(),
                }
            }
            ("resetcooldown", [name, rest @ ..]) => {
                let target = match self.player(name) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                let which = match rest.first().map(|s| s.to_lowercase()).as_deref() {
                    None | Some("all") => CooldownKind::All,
                    Some("switch") => CooldownKind::Switch,
                    Some("relocation") => CooldownKind::Relocation,
                    Some(other) => return CommandResult::err(format!("Unknown cooldown: {other}")),
                };
                match self.gate.admin_reset_cooldown(&caller, target, which).await {
                    Ok(true) => CommandResult::ok(format!("Reset {name}'s cooldowns")),
                    Ok(false) => CommandResult::ok(format!("{name} had no cooldown running")),
                    Err(e) => e.into(),
                }
            }
            ("resize", [min_x, max_x, min_z, max_z]) => {
                let parsed: Result<Vec<i32>, _> =
                    [min_x, max_x, min_z, max_z].iter().map(|v| v.parse::<i32>()).collect();
                let Ok(&[min_x, max_x, min_z, max_z]) = parsed.as_deref() else {
                    return CommandResult::err("Usage: admin resize <min_x> <max_x> <min_z> <max_z>");
                };
                if min_x > max_x || min_z > max_z {
                    return CommandResult::err("min must not exceed max");
                }
                let bounds = GridBounds::new(min_x, max_x, min_z, max_z);
                match self.gate.admin_resize(&caller, bounds).await {
                    Ok(()) => CommandResult::ok(format!(
                        "Grid is now x {min_x}..{max_x} z {min_z}..{max_z}"
                    )),
                    Err(e) => e.into(),
                }
            }
            ("restore", [name, backup]) => {
                let target = match self.player(name) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match self.gate.admin_restore_backup(&caller, target, backup.clone()).await {
                    Ok(handle) => {
                        self.watch(format!("restore for {name}"), handle);
                        CommandResult::ok(format!("Restoring {backup} for {name}"))
                    }
                    Err(e) => e.into(),
                }
            }
            ("purge", [name]) => {
                let target = match self.player(name) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match self.gate.admin_purge(&caller, target).await {
                    Ok(n) => CommandResult::ok(format!("Purged {n} slot(s) of {name}")),
                    Err(e) => e.into(),
                }
            }
            ("info", [coord]) => self.cmd_cell(std::slice::from_ref(coord)).await,
            ("sync", []) => match self.gate.sync_islands(&caller).await {
                Ok(n) => CommandResult::ok(format!("Added {n} island(s) to the grid")),
                Err(e) => e.into(),
            },
            (other, _) => CommandResult::err(format!("Unknown or malformed admin command: {other}")),
        }
    }

    async fn cmd_save(&self) -> CommandResult {
        match self.gate.orchestrator().authority.flush().await {
            Ok(failed) if failed.is_empty() => CommandResult::ok("Saved."),
            Ok(failed) => CommandResult::err(format!("Could not save {failed:?}, will retry")),
            Err(e) => CommandResult::err(e.to_string()),
        }
    }
}

fn cmd_help() -> CommandResult {
    CommandResult::lines(
        HELP.iter()
            .map(|(usage, description)| format!("{usage} - {description}"))
            .collect(),
    )
}

fn parse_coord(s: &str) -> Result<GridCoord, CommandResult> {
    s.parse()
        .map_err(|_| CommandResult::err(format!("Invalid coordinate: {s} (expected x,z)")))
}

fn parse_slot(s: &str) -> Result<u32, CommandResult> {
    s.parse()
        .map_err(|_| CommandResult::err(format!("Invalid slot number: {s}")))
}

fn status_symbol(status: CellStatus) -> &'static str {
    match status {
        CellStatus::Available => ".",
        CellStatus::Occupied => "#",
        CellStatus::Reserved => "$",
        CellStatus::Locked => "x",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use std::time::Duration;

    async fn run(console: &mut Console, line: &str) -> CommandResult {
        console.execute(line).await
    }

    async fn settle(h: &Harness, name: &str) {
        // Workflows started from the console run in the background.
        for _ in 0..100 {
            let id = h.world.player_by_name(name).map(|p| p.id);
            let busy = match id {
                Some(id) => h.orch.authority.call(move |s| s.is_busy(id)).await.unwrap(),
                None => false,
            };
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow for {name} did not finish");
    }

    #[tokio::test]
    async fn claim_and_switch_from_console() {
        let h = Harness::new().await;
        let mut console = Console::new(h.gate.clone(), h.world.clone());

        assert!(run(&mut console, "join Alex").await.success);
        let prompt = run(&mut console, "claim Alex 2,1 desert").await;
        assert!(prompt.success, "{:?}", prompt.messages);
        assert!(prompt.messages[0].contains("confirm"));
        assert!(run(&mut console, "confirm Alex").await.success);
        settle(&h, "Alex").await;

        let located = run(&mut console, "locate Alex").await;
        assert_eq!(located.messages, vec!["Alex's island is at 2,1".to_string()]);

        assert!(run(&mut console, "switch Alex 2").await.success);
        assert!(run(&mut console, "confirm Alex").await.success);
        settle(&h, "Alex").await;

        let slots = run(&mut console, "slots Alex").await;
        assert!(slots.messages.iter().any(|m| m.starts_with("  *2")));
        assert!(slots.messages.iter().any(|m| m.starts_with("Switch available in")));
    }

    #[tokio::test]
    async fn rejections_become_error_results() {
        let h = Harness::new().await;
        let mut console = Console::new(h.gate.clone(), h.world.clone());
        run(&mut console, "join Alex").await;

        let result = run(&mut console, "switch Alex 2").await;
        assert!(!result.success);
        assert!(result.messages[0].contains("do not have an island"));
        assert!(!run(&mut console, "confirm Alex").await.success);
        assert!(!run(&mut console, "claim Alex nowhere").await.success);
        assert!(!run(&mut console, "claim Nobody 0,0").await.success);
        assert!(!run(&mut console, "frobnicate").await.success);
    }

    #[tokio::test]
    async fn admin_commands_run_as_console() {
        let h = Harness::new().await;
        let mut console = Console::new(h.gate.clone(), h.world.clone());

        assert!(run(&mut console, "admin reserve 1,1 250").await.success);
        assert!(run(&mut console, "admin block 2,2").await.success);
        let cell = run(&mut console, "cell 1,1").await;
        assert!(cell.messages.iter().any(|m| m.contains("For sale at 250.00")));

        let around = run(&mut console, "neighbors 1,1").await;
        assert_eq!(around.messages, vec![". . .", ". $ .", ". . $"]);

        assert!(!run(&mut console, "admin resize 5 1 0 0").await.success);
        assert!(run(&mut console, "admin resize -3 3 -3 3").await.success);
        assert!(run(&mut console, "admin unreserve 1,1").await.success);
        assert!(!run(&mut console, "admin unreserve 1,1").await.success);
    }

    #[tokio::test]
    async fn cell_info_shows_relocation_history() {
        let h = Harness::new().await;
        let mut console = Console::new(h.gate.clone(), h.world.clone());
        run(&mut console, "join Alex").await;
        run(&mut console, "claim Alex 0,0").await;
        assert!(run(&mut console, "confirm Alex").await.success);
        settle(&h, "Alex").await;

        assert!(run(&mut console, "relocate Alex 3,-2").await.success);
        assert!(run(&mut console, "confirm Alex").await.success);
        settle(&h, "Alex").await;

        let info = run(&mut console, "admin info 3,-2").await;
        assert!(
            info.messages.iter().any(|m| m == "  Relocated 1 time(s), last from 0,0"),
            "{:?}",
            info.messages
        );
    }

    #[tokio::test]
    async fn stop_requests_shutdown() {
        let h = Harness::new().await;
        let mut console = Console::new(h.gate.clone(), h.world.clone());
        let result = run(&mut console, "stop").await;
        assert!(result.should_stop);
        assert!(run(&mut console, "help").await.messages.len() > 10);
    }
}
