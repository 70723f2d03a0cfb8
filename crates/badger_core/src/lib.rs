//! # Badger Core
//!
//! Shared building blocks for the Badger game-server hosting platform. The
//! orchestrator, the per-game provisioners and the `badger` binary all speak
//! in the types defined here.
//!
//! ## What lives here
//!
//! * [`models`] - subscriptions, plans, games, hosts, servers and pending orders
//! * [`store`] - the persistence interface consumed by the orchestrator
//! * [`queue`] - per-host dispatch channels and the shared pending-order list
//! * [`memory`] - in-process implementations of both, used by the binary and tests
//! * [`provisioner`] / [`registry`] - the game plugin capability set and its lookup table
//! * [`schema`] - the small JSON-schema subset the provisioners validate against
//! * [`command`] - the text wire format read by the per-host agent
//!
//! ## Error model
//!
//! Lookups never fail on absence. Every store call returns
//! `Result<Option<T>, StoreError>`, where `Ok(None)` is "not found" and
//! `Err(_)` is a backend failure. Registry lookups return `Option`.

pub mod command;
pub mod error;
pub mod ids;
pub mod memory;
pub mod models;
pub mod provisioner;
pub mod queue;
pub mod registry;
pub mod schema;
pub mod store;

pub use command::{channel_key, AgentCommand, LifecycleAction};
pub use error::{ProvisionError, StoreError};
pub use ids::{GameId, HostId, PlanId, ServerId, SubscriptionId, UserId};
pub use memory::{MemoryDispatch, MemoryPendingQueue, MemoryStore};
pub use models::{
    Game, Host, InternalStatus, NewServer, NewSubscription, PendingOrder, Plan, Server,
    ServerStatus, Subscription, SubscriptionStatus, User,
};
pub use provisioner::{ConfigUpdateOutcome, Provisioner};
pub use queue::{DispatchQueue, PendingQueue};
pub use registry::{ProvisionerFactory, ProvisionerRegistry};
pub use store::Store;

/// Current UTC time, the single clock used for subscription windows and
/// queue timestamps.
pub fn now_utc() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
