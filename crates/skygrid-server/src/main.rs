mod authority;
mod backup;
mod config;
mod console;
mod events;
mod gate;
#[cfg(test)]
mod testkit;
mod workflow;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use authority::{Authority, GameState, TickServices, TICK};
use config::ServerConfig;
use console::Console;
use events::ListenerRegistry;
use gate::Gate;
use skygrid_api::{Addon, AddonRegistry, Capabilities, Position};
use skygrid_data::{Clock, GridCell, JsonFileRepository, RelocationRecord, Slot, SystemClock};
use skygrid_world::SandboxWorld;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};
use workflow::Orchestrator;

const CONFIG_FILE: &str = "skygrid.toml";
/// How long shutdown waits for running workflows to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Every capability and addon served by the sandbox world.
pub(crate) fn sandbox_capabilities(world: Arc<SandboxWorld>) -> Capabilities {
    Capabilities {
        schematics: world.clone(),
        islands: world.clone(),
        host: world.clone(),
        addons: AddonRegistry {
            economy: Addon::Available(world.clone()),
            challenges: Addon::Available(world.clone()),
            grants: Addon::Available(world),
        },
    }
}

/// Empty stores backed by JSON files in the data directory.
fn file_backed_state(config: &ServerConfig) -> GameState {
    let dir = &config.server.data_dir;
    GameState::from_config(
        config,
        Arc::new(JsonFileRepository::<Vec<GridCell>>::new(dir.join("grid.json"))),
        Arc::new(JsonFileRepository::<Vec<Slot>>::new(dir.join("slots.json"))),
        Arc::new(JsonFileRepository::<Vec<RelocationRecord>>::new(dir.join("relocations.json"))),
    )
}

#[tokio::main]
async fn main() {
    let config_found = Path::new(CONFIG_FILE).exists();
    let config = if config_found {
        match ServerConfig::load(CONFIG_FILE) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load {CONFIG_FILE}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        ServerConfig::default()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("SkyGrid v{} starting", env!("CARGO_PKG_VERSION"));
    if !config_found {
        info!("No {CONFIG_FILE} found, using defaults");
    }
    let bounds = config.grid.bounds();
    info!(
        "Grid: x {}..{} z {}..{}, spacing {}, protection range {}",
        bounds.min_x,
        bounds.max_x,
        bounds.min_z,
        bounds.max_z,
        config.grid.spacing,
        config.grid.protection_range
    );
    info!(
        "Slots: {} of max {}, switch cooldown {}s, relocation cooldown {}s",
        config.slots.default_slots,
        config.slots.max_slots,
        config.slots.cooldown().as_secs(),
        config.relocation.cooldown().as_secs()
    );

    if let Err(e) = std::fs::create_dir_all(&config.server.data_dir) {
        error!(
            "Cannot create data directory {}: {e}",
            config.server.data_dir.display()
        );
        std::process::exit(1);
    }

    let mut state = file_backed_state(&config);
    if let Err(e) = state.reload() {
        error!("Failed to load stored data: {e}");
        std::process::exit(1);
    }
    info!(
        "Loaded {} island(s), {} reserved cell(s)",
        state.grid.occupied_count(),
        state.grid.reserved().count()
    );

    let [x, y, z] = config.world.spawn;
    let world = Arc::new(
        SandboxWorld::new()
            .with_spawn(Position::new(x, y, z))
            .with_protection_range(config.grid.protection_range),
    );
    let caps = sandbox_capabilities(world.clone());
    info!("Addons: {}", caps.addons.available().join(", "));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    // The authority outlives the shutdown signal so shutdown backups can
    // still reach it.
    let (authority_stop_tx, authority_stop_rx) = tokio::sync::watch::channel(false);

    let flush_every = config.persistence.flush_interval * 1000 / TICK.as_millis() as u64;
    let (authority, authority_task) = Authority::spawn(
        state,
        TickServices {
            clock: clock.clone(),
            host: caps.host.clone(),
            flush_every,
        },
        authority_stop_rx,
    );
    let orch = Orchestrator::new(authority, caps, &config, clock);
    let gate = Gate::new(orch.clone(), Arc::new(ListenerRegistry::new()));

    let auto_backups = (config.backups.enabled && config.backups.auto_enabled).then(|| {
        info!("Auto backups every {} minute(s)", config.backups.auto_interval);
        backup::spawn_auto_backups(
            orch.clone(),
            Duration::from_secs(config.backups.auto_interval.max(1) * 60),
            shutdown_rx.clone(),
        )
    });

    // Handle Ctrl+C
    let shutdown_tx_ctrlc = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx_ctrlc.send(true);
    });

    // Console REPL: read lines from stdin
    let (console_tx, mut console_rx) = tokio::sync::mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut console = Console::new(gate, world);
    info!("Ready. Type 'help' for a list of commands.");
    loop {
        tokio::select! {
            Some(line) = console_rx.recv() => {
                let result = console.execute(&line).await;
                for message in &result.messages {
                    if result.success {
                        info!("{message}");
                    } else {
                        warn!("{message}");
                    }
                }
                if let Some(broadcast) = &result.broadcast {
                    info!("[broadcast] {broadcast}");
                }
                if result.should_stop {
                    let _ = shutdown_tx.send(true);
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    if let Some(task) = auto_backups {
        let _ = task.await;
    }
    info!("Waiting for running workflows to finish...");
    match orch.authority.drain(SHUTDOWN_GRACE).await {
        Ok(0) => {}
        Ok(n) => error!(
            "{n} workflow(s) still running after {}s; their islands may need manual attention",
            SHUTDOWN_GRACE.as_secs()
        ),
        Err(e) => error!("Could not wait for workflows: {e}"),
    }
    if config.backups.enabled && config.backups.on_shutdown {
        info!("Backing up online islands before shutdown...");
        backup::run_auto_round(&orch).await;
    }

    let writing = orch.authority.lock_flushes().await;
    let _ = authority_stop_tx.send(true);
    let mut state = match authority_task.await {
        Ok(state) => state,
        Err(e) => {
            error!("Authority task failed: {e}");
            std::process::exit(1);
        }
    };
    info!("Saving stores before shutdown...");
    let flushes = state.take_flushes();
    match tokio::task::spawn_blocking(move || flushes.write()).await {
        Ok(failed) if failed.is_empty() => {}
        Ok(failed) => error!("Could not save {failed:?}; changes since the last flush are lost"),
        Err(e) => error!("Final store flush failed: {e}"),
    }
    drop(writing);
    info!("Server shut down.");
}
