//! User-triggered operations on an existing server.
//!
//! Every action resolves subscription → server → plan → game first. A
//! missing record is reported as [`ProvisionError::NotFound`] before any
//! state is touched.

use badger_core::{
    channel_key, AgentCommand, ConfigUpdateOutcome, LifecycleAction, ProvisionError, Provisioner,
    Server, ServerStatus, SubscriptionId,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::ProvisioningContext;

/// Turns raw form fields into config values.
///
/// A key written as `top[sub]` becomes `{"top": {"sub": value}}`; one level
/// of nesting is supported. Values that parse as integers become numbers.
pub fn parse_config_form(fields: &[(String, String)]) -> Map<String, Value> {
    let mut values = Map::new();
    for (key, raw) in fields {
        let value = match raw.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(raw.clone()),
        };

        match split_nested_key(key) {
            Some((top, sub)) => {
                let entry = values
                    .entry(top.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(inner) = entry {
                    inner.insert(sub.to_string(), value);
                }
            }
            None => {
                values.insert(key.clone(), value);
            }
        }
    }
    values
}

fn split_nested_key(key: &str) -> Option<(&str, &str)> {
    let (top, rest) = key.split_once('[')?;
    let (sub, _) = rest.split_once(']')?;
    Some((top, sub))
}

/// The server a subscription owns and the game it runs.
struct ServerTarget {
    server: Server,
    game_name: String,
}

pub struct ServerActions {
    ctx: Arc<ProvisioningContext>,
}

impl ServerActions {
    pub fn new(ctx: Arc<ProvisioningContext>) -> Self {
        Self { ctx }
    }

    pub async fn restart(&self, subscription_id: SubscriptionId) -> Result<(), ProvisionError> {
        self.lifecycle(subscription_id, LifecycleAction::Restart).await
    }

    pub async fn stop(&self, subscription_id: SubscriptionId) -> Result<(), ProvisionError> {
        self.lifecycle(subscription_id, LifecycleAction::Stop).await
    }

    pub async fn backup(&self, subscription_id: SubscriptionId) -> Result<(), ProvisionError> {
        self.lifecycle(subscription_id, LifecycleAction::Backup).await
    }

    /// Records the status the action leads to and queues the command for
    /// the server's host.
    pub async fn lifecycle(
        &self,
        subscription_id: SubscriptionId,
        action: LifecycleAction,
    ) -> Result<(), ProvisionError> {
        let target = self.resolve(subscription_id).await?;
        let status = match action {
            LifecycleAction::Restart => ServerStatus::Restarting,
            LifecycleAction::Stop => ServerStatus::Stopping,
            // The server keeps running while the agent copies the world.
            LifecycleAction::Backup => ServerStatus::Running,
        };

        self.ctx
            .store
            .update_server_status(target.server.id, status)
            .await?;
        let command = AgentCommand::Lifecycle {
            subscription_id,
            game_name: target.game_name,
            action,
        };
        self.ctx
            .dispatch
            .append(&channel_key(&target.server.ip_address), command.to_string())
            .await?;

        info!(
            subscription_id = %subscription_id,
            host = %target.server.ip_address,
            "Server {} requested",
            action.verb()
        );
        Ok(())
    }

    /// Saves a configuration submitted from the config form and pushes it
    /// to the running server.
    ///
    /// Invalid values are rejected before anything is written.
    pub async fn save_config(
        &self,
        subscription_id: SubscriptionId,
        form: &[(String, String)],
    ) -> Result<ConfigUpdateOutcome, ProvisionError> {
        let target = self.resolve(subscription_id).await?;
        let provisioner = self.provisioner_for(&target.game_name)?;

        let values = Value::Object(provisioner.normalize_form(parse_config_form(form)));
        if !provisioner.validate_config(&values) {
            warn!(subscription_id = %subscription_id, "Rejected invalid config form");
            return Ok(ConfigUpdateOutcome::Rejected);
        }

        self.ctx
            .store
            .update_server_config(target.server.id, &serde_json::to_string(&values)?)
            .await?;
        provisioner
            .dispatch_config_update(
                self.ctx.dispatch.as_ref(),
                &target.server.ip_address,
                &target.game_name,
                subscription_id,
                &values,
            )
            .await
    }

    /// The game's config schema with the server's saved values merged in.
    pub async fn config_view(&self, subscription_id: SubscriptionId) -> Result<Value, ProvisionError> {
        let target = self.resolve(subscription_id).await?;
        let provisioner = self.provisioner_for(&target.game_name)?;

        let saved = match serde_json::from_str::<Value>(&target.server.config) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(
                    subscription_id = %subscription_id,
                    "Stored config is not a JSON object, showing defaults"
                );
                Map::new()
            }
        };
        Ok(provisioner.generate_config_view_schema(&saved))
    }

    fn provisioner_for(&self, game_name: &str) -> Result<Box<dyn Provisioner>, ProvisionError> {
        self.ctx
            .registry
            .get(game_name)
            .ok_or_else(|| ProvisionError::UnknownGame(game_name.to_string()))
    }

    async fn resolve(&self, subscription_id: SubscriptionId) -> Result<ServerTarget, ProvisionError> {
        let store = &self.ctx.store;
        let server = store
            .select_server_by_subscription(subscription_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("server", subscription_id))?;
        let subscription = store
            .select_subscription_by_id(subscription_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("subscription", subscription_id))?;
        let plan = store
            .select_plan_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("plan", subscription.plan_id))?;
        let game = store
            .select_game_by_id(plan.game_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("game", plan.game_id))?;

        Ok(ServerTarget {
            server,
            game_name: game.name,
        })
    }
}
