//! The persistence interface consumed by the orchestrator.
//!
//! Implementations wrap the relational database. Every lookup returns
//! `Ok(None)` for a missing row; `Err` is reserved for backend failures.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::ids::{GameId, HostId, PlanId, ServerId, SubscriptionId, UserId};
use crate::models::{
    Game, Host, InternalStatus, NewServer, NewSubscription, Plan, Server, ServerStatus,
    Subscription, User,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn select_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn select_user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;
    /// Sets the user's `exhausted_free` flag. Setting it again is a no-op.
    async fn mark_user_trial_exhausted(&self, id: UserId) -> StoreResult<Option<User>>;

    // Subscriptions
    async fn insert_subscription(&self, new: NewSubscription) -> StoreResult<Subscription>;
    async fn select_subscription_by_id(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Subscription>>;
    async fn update_subscription_internal_status(
        &self,
        id: SubscriptionId,
        status: InternalStatus,
    ) -> StoreResult<Option<Subscription>>;
    async fn update_subscription_trial_flag(
        &self,
        id: SubscriptionId,
        is_trial: bool,
    ) -> StoreResult<Option<Subscription>>;

    // Reference data
    async fn select_plan_by_id(&self, id: PlanId) -> StoreResult<Option<Plan>>;
    async fn select_game_by_id(&self, id: GameId) -> StoreResult<Option<Game>>;

    // Inventory
    /// All hosts in listing (insertion) order.
    async fn list_hosts(&self) -> StoreResult<Vec<Host>>;
    /// Adds the server's `ram_gb` to the host's `capacity_used` and marks the
    /// server committed, in one transaction. A server that is already
    /// committed leaves the host untouched. `None` if either row is missing.
    async fn commit_server_capacity(
        &self,
        server: ServerId,
        host: HostId,
    ) -> StoreResult<Option<Host>>;

    // Servers
    /// Fails with [`StoreError::Constraint`] if the subscription does not
    /// exist or already owns a server.
    async fn insert_server(&self, new: NewServer) -> StoreResult<Server>;
    async fn select_server_by_subscription(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Server>>;
    async fn update_server_status(
        &self,
        id: ServerId,
        status: ServerStatus,
    ) -> StoreResult<Option<Server>>;
    async fn update_server_config(&self, id: ServerId, config: &str)
        -> StoreResult<Option<Server>>;
}
