//! The capability set every game-specific provisioner implements.
//!
//! A provisioner knows one game: its configuration schema, the ports its
//! server binds and how a live configuration change is handed to the agent.
//! Callers reach provisioners only through the
//! [`ProvisionerRegistry`](crate::registry::ProvisionerRegistry) and only
//! through this trait.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ProvisionError;
use crate::ids::SubscriptionId;
use crate::queue::DispatchQueue;

/// What happened to a requested live configuration update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdateOutcome {
    /// The update command was appended to the host's channel
    Dispatched,
    /// The configuration failed validation; nothing was sent
    Rejected,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Registry key of the game this provisioner serves.
    fn name(&self) -> &str;

    /// A ready-to-use configuration, serialized as JSON.
    ///
    /// Fresh secrets (such as a server password) are generated on every call.
    /// The result always passes [`validate_config`](Self::validate_config).
    fn default_config(&self) -> Result<String, ProvisionError>;

    /// Ports the game server binds, in the order the agent expects them.
    fn required_ports(&self) -> Vec<u16>;

    /// Checks `values` against the game's schema. Never mutates anything.
    fn validate_config(&self, values: &Value) -> bool;

    /// The game's schema with defaults and `saved` values merged in, for
    /// rendering a configuration form.
    fn generate_config_view_schema(&self, saved: &Map<String, Value>) -> Value;

    /// Validates `values` and, if they pass, appends an update command to
    /// the channel of `host_ip`. Invalid values are logged and skipped.
    async fn dispatch_config_update(
        &self,
        dispatch: &dyn DispatchQueue,
        host_ip: &str,
        game_name: &str,
        subscription_id: SubscriptionId,
        values: &Value,
    ) -> Result<ConfigUpdateOutcome, ProvisionError>;

    /// Turns raw form fields into typed config values. Games with checkbox
    /// fields override this; the default passes values through.
    fn normalize_form(&self, values: Map<String, Value>) -> Map<String, Value> {
        values
    }
}
