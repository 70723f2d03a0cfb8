//! # Orchestrator - Matching Subscriptions to Hardware
//!
//! Turns a subscription into a running game server. The crate owns the
//! decisions; storage, queues and per-game behavior are reached through the
//! traits in `badger_core`.
//!
//! ## Components
//!
//! * [`Allocator`] - first-fit host selection with in-process reservations
//! * [`Orchestrator`] - trial and paid order placement
//! * [`PendingOrderProcessor`] - retries queued orders in submission order
//! * [`ServerActions`] - restart/stop/backup and configuration changes
//! * [`PendingScheduler`] - runs the processor on a fixed interval
//! * [`ProvisioningContext`] - the process-wide bundle of collaborators
//!
//! ## Order Flow
//!
//! 1. The plan is looked up; an unknown plan fails the order before any
//!    subscription exists
//! 2. A subscription is created in `provisioning`; game and provisioner are
//!    resolved and any miss fails the order
//! 3. The allocator reserves the first host with enough free RAM
//! 4. With a host: a server row is written, capacity is committed and a
//!    `start` command is appended to the host's dispatch channel
//! 5. Without one: the subscription becomes `unavailable` and the order is
//!    parked on the pending queue until the processor can place it
//!
//! ## Guarantees
//!
//! Commands for one host are consumed in the order they were appended.
//! Dispatch is at-least-once: an order whose server row was written but
//! whose `start` could not be sent goes back on the pending queue, and the
//! processor re-sends `start` to the host on that row without reserving new
//! capacity for it.

pub mod actions;
pub mod allocator;
pub mod builtin;
pub mod context;
pub mod orchestrator;
pub mod pending;
pub mod provision;
pub mod scheduler;

pub use actions::{parse_config_form, ServerActions};
pub use allocator::{first_fit, Allocator, HostReservation};
pub use builtin::builtin_registry;
pub use context::{ProvisioningContext, ProvisioningSettings};
pub use orchestrator::{OrderFailure, OrderOutcome, Orchestrator, PaidOrder, TrialRequest};
pub use pending::{CycleReport, PendingOrderProcessor, StopReason};
pub use scheduler::PendingScheduler;
