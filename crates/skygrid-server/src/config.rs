use serde::Deserialize;
use skygrid_data::{GridBounds, SlotDefaults};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub grid: GridSection,
    #[serde(default)]
    pub world: WorldSection,
    #[serde(default)]
    pub slots: SlotsSection,
    #[serde(default)]
    pub relocation: RelocationSection,
    #[serde(default)]
    pub backups: BackupsSection,
    #[serde(default)]
    pub visitors: VisitorsSection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub hooks: HooksSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Root for slot schematics, backups and JSON stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("skygrid-data")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GridSection {
    #[serde(default = "default_grid_min")]
    pub min_x: i32,
    #[serde(default = "default_grid_max")]
    pub max_x: i32,
    #[serde(default = "default_grid_min")]
    pub min_z: i32,
    #[serde(default = "default_grid_max")]
    pub max_z: i32,
    /// Half the distance between neighbouring island centres, in blocks.
    #[serde(default = "default_spacing")]
    pub spacing: i32,
    #[serde(default = "default_protection_range")]
    pub protection_range: i32,
}

fn default_grid_min() -> i32 {
    -10
}

fn default_grid_max() -> i32 {
    10
}

fn default_spacing() -> i32 {
    400
}

fn default_protection_range() -> i32 {
    100
}

impl GridSection {
    pub fn bounds(&self) -> GridBounds {
        GridBounds::new(self.min_x, self.max_x, self.min_z, self.max_z)
    }
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            min_x: default_grid_min(),
            max_x: default_grid_max(),
            min_z: default_grid_min(),
            max_z: default_grid_max(),
            spacing: default_spacing(),
            protection_range: default_protection_range(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorldSection {
    #[serde(default = "default_min_y")]
    pub min_y: i32,
    #[serde(default = "default_max_y")]
    pub max_y: i32,
    /// Y of every island centre.
    #[serde(default = "default_island_height")]
    pub island_height: i32,
    /// Where players without an island are sent.
    #[serde(default = "default_spawn")]
    pub spawn: [f64; 3],
}

fn default_min_y() -> i32 {
    -64
}

fn default_max_y() -> i32 {
    319
}

fn default_island_height() -> i32 {
    120
}

fn default_spawn() -> [f64; 3] {
    [0.5, 100.0, 0.5]
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            min_y: default_min_y(),
            max_y: default_max_y(),
            island_height: default_island_height(),
            spawn: default_spawn(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotsSection {
    #[serde(default = "default_slots")]
    pub default_slots: u32,
    #[serde(default = "default_max_slots")]
    pub max_slots: u32,
    /// Seconds between switches. 0 disables the cooldown.
    #[serde(default = "default_switch_cooldown")]
    pub switch_cooldown: u64,
    #[serde(default = "default_slot_name")]
    pub default_slot_name: String,
    #[serde(default = "default_slot_icon")]
    pub default_slot_icon: String,
    #[serde(default = "default_blueprint")]
    pub default_blueprint: String,
}

fn default_slots() -> u32 {
    2
}

fn default_max_slots() -> u32 {
    5
}

fn default_switch_cooldown() -> u64 {
    3600
}

fn default_slot_name() -> String {
    "Island {number}".into()
}

fn default_slot_icon() -> String {
    "GRASS_BLOCK".into()
}

fn default_blueprint() -> String {
    "default".into()
}

impl SlotsSection {
    pub fn defaults(&self) -> SlotDefaults {
        SlotDefaults {
            default_slots: self.default_slots,
            max_slots: self.max_slots,
            name_template: self.default_slot_name.clone(),
            icon: self.default_slot_icon.clone(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.switch_cooldown)
    }
}

impl Default for SlotsSection {
    fn default() -> Self {
        Self {
            default_slots: default_slots(),
            max_slots: default_max_slots(),
            switch_cooldown: default_switch_cooldown(),
            default_slot_name: default_slot_name(),
            default_slot_icon: default_slot_icon(),
            default_blueprint: default_blueprint(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelocationSection {
    /// Seconds between relocations. Default: one week.
    #[serde(default = "default_relocation_cooldown")]
    pub cooldown: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default = "default_currency_name")]
    pub currency_name: String,
}

fn default_relocation_cooldown() -> u64 {
    604_800
}

fn default_currency_name() -> String {
    "coins".into()
}

impl RelocationSection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }
}

impl Default for RelocationSection {
    fn default() -> Self {
        Self {
            cooldown: default_relocation_cooldown(),
            cost: 0.0,
            currency_name: default_currency_name(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackupsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Back up the source slot before every switch.
    #[serde(default = "default_true")]
    pub on_switch: bool,
    #[serde(default = "default_max_per_slot")]
    pub max_per_slot: usize,
    #[serde(default)]
    pub auto_enabled: bool,
    /// Minutes between rolling auto backups.
    #[serde(default = "default_auto_interval")]
    pub auto_interval: u64,
    #[serde(default = "default_true")]
    pub on_shutdown: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_per_slot() -> usize {
    3
}

fn default_auto_interval() -> u64 {
    60
}

impl Default for BackupsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            on_switch: true,
            max_per_slot: default_max_per_slot(),
            auto_enabled: false,
            auto_interval: default_auto_interval(),
            on_shutdown: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VisitorsSection {
    #[serde(default = "default_warning_message")]
    pub warning_message: String,
}

fn default_warning_message() -> String {
    "The island you are visiting is being changed. You will be moved shortly.".into()
}

impl Default for VisitorsSection {
    fn default() -> Self {
        Self {
            warning_message: default_warning_message(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GateSection {
    /// Seconds a pending selection waits for confirmation.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout: u64,
}

fn default_confirmation_timeout() -> u64 {
    30
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            confirmation_timeout: default_confirmation_timeout(),
        }
    }
}

/// Commands run as the console after a successful workflow.
/// Placeholders: `{player}`, `{from}`, `{to}`.
#[derive(Debug, Default, Deserialize)]
pub struct HooksSection {
    #[serde(default)]
    pub on_switch: Vec<String>,
    #[serde(default)]
    pub on_relocate: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PersistenceSection {
    /// Seconds between store flushes. 0 flushes only on shutdown.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
}

fn default_flush_interval() -> u64 {
    30
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.grid.min_x > self.grid.max_x || self.grid.min_z > self.grid.max_z {
            return Err("grid min must not exceed max".into());
        }
        if self.grid.spacing <= 0 {
            return Err("grid spacing must be positive".into());
        }
        if self.slots.max_slots == 0 || self.slots.default_slots > self.slots.max_slots {
            return Err("slots.default_slots must be within 1..=max_slots".into());
        }
        if self.world.min_y > self.world.max_y {
            return Err("world min_y must not exceed max_y".into());
        }
        Ok(())
    }
}
