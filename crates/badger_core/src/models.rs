//! Domain records shared by the orchestrator and the provisioners.
//!
//! The shapes mirror the relational tables behind the [`Store`](crate::store::Store)
//! trait. Status enums serialize to the lowercase strings stored in the
//! database and shown in the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::{GameId, HostId, PlanId, ServerId, SubscriptionId, UserId};

// ============================================================================
// Status Enums
// ============================================================================

/// Payment/lifecycle status of a subscription, owned by the billing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Paused,
    Expired,
}

/// Provisioning progress of a subscription, owned by the orchestrator.
///
/// `Unavailable` is rendered to users as "resources full", not as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalStatus {
    Provisioning,
    On,
    Unavailable,
    Failed,
}

/// Lifecycle status of a game server as last reported or requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Provisioning,
    Restarting,
    Running,
    Stopping,
    Stopped,
    Configured,
    Failed,
    NotFound,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
            Self::Expired => "expired",
        }
    }
}

impl InternalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::On => "on",
            Self::Unavailable => "unavailable",
            Self::Failed => "failed",
        }
    }
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Restarting => "restarting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Configured => "configured",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A registered platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Set once the user has consumed their free trial or started paying.
    #[serde(default)]
    pub exhausted_free: bool,
}

/// A user's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub internal_status: InternalStatus,
    pub is_trial: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}

/// Fields needed to insert a subscription; the store assigns id and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub internal_status: InternalStatus,
    pub is_trial: bool,
    pub expires_at: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}

/// Resource requirements and price for one offering of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub game_id: GameId,
    pub name: String,
    /// RAM in GB. A plan without it can never be matched to a host.
    #[serde(default)]
    pub ram_gb: Option<u64>,
    pub cpu_cores: u32,
    /// Monthly price in cents.
    #[serde(default)]
    pub price_monthly: u64,
}

/// A game offered on the platform. `name` selects the provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub name: String,
}

/// A bare-metal host; capacities are in GB of RAM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub ip_address: String,
    pub capacity_total: u64,
    pub capacity_used: u64,
}

impl Host {
    /// RAM still unclaimed on this host according to the inventory.
    pub fn free_capacity(&self) -> u64 {
        self.capacity_total.saturating_sub(self.capacity_used)
    }
}

/// A game server bound 1:1 to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub subscription_id: SubscriptionId,
    pub status: ServerStatus,
    pub ip_address: String,
    pub ports: Vec<u16>,
    pub container_id: String,
    /// Serialized JSON configuration blob.
    pub config: String,
    /// RAM in GB this server holds on its host.
    pub ram_gb: u64,
    /// Whether `ram_gb` has been added to the host's `capacity_used`.
    #[serde(default)]
    pub capacity_committed: bool,
}

/// Fields needed to insert a server row. New rows start with their
/// capacity uncommitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewServer {
    pub subscription_id: SubscriptionId,
    pub status: ServerStatus,
    pub ip_address: String,
    pub ports: Vec<u16>,
    pub container_id: String,
    pub config: String,
    pub ram_gb: u64,
}

// ============================================================================
// Pending Orders
// ============================================================================

/// A provisioning request parked until some host has room for it.
///
/// The queue stores raw JSON so that entries written by other services (or
/// older versions) can be inspected and discarded when malformed instead of
/// wedging the queue. Use [`PendingOrder::from_value`] to read one back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub subscription_id: SubscriptionId,
    pub plan_id: PlanId,
    pub game_name: String,
    /// RAM in GB; `None` when the entry carried no usable number.
    pub ram_needed: Option<u64>,
    pub enqueued_at: DateTime<Utc>,
}

/// A queue entry that lacks one of the fields needed to act on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pending order is missing `{0}`")]
pub struct MalformedOrder(pub &'static str);

impl PendingOrder {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "subscription_id": self.subscription_id,
            "plan_id": self.plan_id,
            "game_name": self.game_name,
            "ram_needed": self.ram_needed,
            "enqueued_at": self.enqueued_at.to_rfc3339(),
        })
    }

    /// Reads a queue entry, tolerating ids and RAM written as strings.
    pub fn from_value(value: &Value) -> Result<Self, MalformedOrder> {
        let subscription_id = field_i64(value, "subscription_id")
            .map(SubscriptionId)
            .ok_or(MalformedOrder("subscription_id"))?;
        let plan_id = field_i64(value, "plan_id")
            .map(PlanId)
            .ok_or(MalformedOrder("plan_id"))?;
        let game_name = value
            .get("game_name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or(MalformedOrder("game_name"))?
            .to_string();
        let ram_needed = field_i64(value, "ram_needed").and_then(|ram| u64::try_from(ram).ok());
        let enqueued_at = value
            .get("enqueued_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(crate::now_utc);

        Ok(Self {
            subscription_id,
            plan_id,
            game_name,
            ram_needed,
            enqueued_at,
        })
    }
}

fn field_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
