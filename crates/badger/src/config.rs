//! Configuration management for the orchestrator binary.
//!
//! Settings are read from a TOML file. A missing file is created with the
//! defaults so a first run leaves behind something to edit. The
//! `[inventory]` section seeds the in-memory store with hosts, games, plans
//! and users.

use badger_core::{Game, GameId, MemoryStore, Plan, PlanId, User, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Errors raised while loading or checking the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to write default config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_pending_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_trial_hours() -> u64 {
    12
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub trial: TrialSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub inventory: InventorySettings,
}

/// How often queued orders are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between pending-order cycles
    #[serde(default = "default_pending_interval")]
    pub pending_interval_secs: u64,
    /// Run the first cycle at startup instead of after one interval
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pending_interval_secs: default_pending_interval(),
            run_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSettings {
    /// Length of a free trial in hours
    #[serde(default = "default_trial_hours")]
    pub duration_hours: u64,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            duration_hours: default_trial_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Reference data loaded into the in-memory store at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySettings {
    /// Hosts in allocation order
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub games: Vec<GameEntry>,
    #[serde(default)]
    pub plans: Vec<PlanEntry>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    pub ip_address: String,
    /// RAM in GB
    pub capacity_total: u64,
    #[serde(default)]
    pub capacity_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: i64,
    pub game_id: i64,
    pub name: String,
    #[serde(default)]
    pub ram_gb: Option<u64>,
    pub cpu_cores: u32,
    /// Monthly price in cents
    #[serde(default)]
    pub price_monthly: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: i64,
    pub email: String,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            hosts: vec![HostEntry {
                ip_address: "127.0.0.1".to_string(),
                capacity_total: 32,
                capacity_used: 0,
            }],
            games: vec![GameEntry {
                id: 1,
                name: "valheim".to_string(),
            }],
            plans: vec![PlanEntry {
                id: 1,
                game_id: 1,
                name: "Valheim 4 GB".to_string(),
                ram_gb: Some(4),
                cpu_cores: 2,
                price_monthly: 999,
            }],
            users: vec![],
        }
    }
}

impl InventorySettings {
    /// Loads every entry into `store`, hosts in file order.
    pub async fn seed(&self, store: &MemoryStore) {
        for game in &self.games {
            store
                .seed_game(Game {
                    id: GameId(game.id),
                    name: game.name.clone(),
                })
                .await;
        }
        for plan in &self.plans {
            store
                .seed_plan(Plan {
                    id: PlanId(plan.id),
                    game_id: GameId(plan.game_id),
                    name: plan.name.clone(),
                    ram_gb: plan.ram_gb,
                    cpu_cores: plan.cpu_cores,
                    price_monthly: plan.price_monthly,
                })
                .await;
        }
        for user in &self.users {
            store
                .seed_user(User {
                    id: UserId(user.id),
                    email: user.email.clone(),
                    exhausted_free: false,
                })
                .await;
        }
        for host in &self.hosts {
            store
                .add_host(&host.ip_address, host.capacity_total, host.capacity_used)
                .await;
        }
        info!(
            "Seeded inventory: {} host(s), {} game(s), {} plan(s), {} user(s)",
            self.hosts.len(),
            self.games.len(),
            self.plans.len(),
            self.users.len()
        );
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults there
    /// first if the file does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn pending_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.pending_interval_secs)
    }

    /// The trial window; `None` if the configured hours do not fit a duration.
    pub fn trial_duration(&self) -> Option<chrono::Duration> {
        i64::try_from(self.trial.duration_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.scheduler.pending_interval_secs == 0 {
            return invalid("scheduler.pending_interval_secs must be greater than 0".into());
        }

        if self.trial.duration_hours == 0 {
            return invalid("trial.duration_hours must be greater than 0".into());
        }
        if self.trial_duration().is_none() {
            return invalid(format!(
                "trial.duration_hours is too large: {}",
                self.trial.duration_hours
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            ));
        }

        let mut ips = HashSet::new();
        for host in &self.inventory.hosts {
            if host.ip_address.trim().is_empty() {
                return invalid("Host ip_address cannot be empty".into());
            }
            if !ips.insert(host.ip_address.as_str()) {
                return invalid(format!("Duplicate host ip_address: {}", host.ip_address));
            }
            if host.capacity_used > host.capacity_total {
                return invalid(format!(
                    "Host {} uses {} GB of {} GB",
                    host.ip_address, host.capacity_used, host.capacity_total
                ));
            }
        }

        let mut game_ids = HashSet::new();
        for game in &self.inventory.games {
            if !game_ids.insert(game.id) {
                return invalid(format!("Duplicate game id: {}", game.id));
            }
        }

        let mut plan_ids = HashSet::new();
        for plan in &self.inventory.plans {
            if !plan_ids.insert(plan.id) {
                return invalid(format!("Duplicate plan id: {}", plan.id));
            }
            if !game_ids.contains(&plan.game_id) {
                return invalid(format!(
                    "Plan {} references unknown game {}",
                    plan.id, plan.game_id
                ));
            }
        }

        let mut user_ids = HashSet::new();
        for user in &self.inventory.users {
            if !user_ids.insert(user.id) {
                return invalid(format!("Duplicate user id: {}", user.id));
            }
        }

        Ok(())
    }
}
