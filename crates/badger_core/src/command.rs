//! Text commands consumed by the per-host agent.
//!
//! The agent pops one line at a time from its host's channel and hands it to
//! `setup_server.py`. The format below is what that script parses; keep it
//! byte-for-byte stable.
//!
//! ```text
//! python3 setup_server.py -u <sub> -g <game> -m <ram>g -c <cpu> start
//! python3 setup_server.py -u <sub> -g <game> restart|stop|backup
//! python setup_server.py -u <sub> -g <game> --cfg-json <base64> updateConfig
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::fmt;

use crate::ids::SubscriptionId;

const CHANNEL_PREFIX: &str = "badger:pending:";

/// Name of the dispatch channel read by the agent on `host_ip`.
pub fn channel_key(host_ip: &str) -> String {
    format!("{CHANNEL_PREFIX}{host_ip}")
}

/// User-triggered lifecycle verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Restart,
    Stop,
    Backup,
}

impl LifecycleAction {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Backup => "backup",
        }
    }
}

/// One agent command line.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    Start {
        subscription_id: SubscriptionId,
        game_name: String,
        ram_gb: u64,
        cpu_cores: u32,
    },
    Lifecycle {
        subscription_id: SubscriptionId,
        game_name: String,
        action: LifecycleAction,
    },
    UpdateConfig {
        subscription_id: SubscriptionId,
        game_name: String,
        config: Value,
    },
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start {
                subscription_id,
                game_name,
                ram_gb,
                cpu_cores,
            } => write!(
                f,
                "python3 setup_server.py -u {subscription_id} -g {game_name} -m {ram_gb}g -c {cpu_cores} start"
            ),
            Self::Lifecycle {
                subscription_id,
                game_name,
                action,
            } => write!(
                f,
                "python3 setup_server.py -u {subscription_id} -g {game_name} {}",
                action.verb()
            ),
            Self::UpdateConfig {
                subscription_id,
                game_name,
                config,
            } => {
                // Value's Display is compact JSON
                let encoded = STANDARD.encode(config.to_string());
                write!(
                    f,
                    "python setup_server.py -u {subscription_id} -g {game_name} --cfg-json {encoded} updateConfig"
                )
            }
        }
    }
}
