//! Retrying orders that were parked for lack of capacity.
//!
//! One cycle walks the queue from the head, at most as many steps as the
//! queue had entries when the cycle began. Orders are placed strictly in
//! submission order: the cycle stops at the first order that cannot be
//! placed yet instead of skipping past it, so a large order at the head
//! holds back smaller ones behind it.
//!
//! Entries that can never be placed are popped and dropped:
//!
//! * missing `subscription_id`, `plan_id` or `game_name`
//! * a plan that no longer exists
//! * a subscription that no longer exists or is no longer `unavailable`
//! * a provisioner whose default configuration cannot be produced
//!
//! Anything else that goes wrong (no host, no provisioner, a backend error)
//! leaves the entry at the head for the next cycle.
//!
//! An order may already have a server row from an attempt that failed after
//! writing it. Such an order needs no new host: its RAM is committed on the
//! host named by the row if that never happened, and `start` is sent there
//! again.

use badger_core::models::MalformedOrder;
use badger_core::{InternalStatus, PendingOrder, ProvisionError, Server};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::ProvisioningContext;
use crate::allocator::HostReservation;
use crate::provision::{commit_existing, dispatch_start, record_server, ProvisionRequest};

/// Why a cycle ended before walking every entry it started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The queue ran out of entries.
    Drained,
    /// The head order does not fit on any host.
    NoCapacity,
    /// No provisioner is registered for the head order's game.
    NoProvisioner(String),
    /// A backend call failed; the head order is retried next cycle.
    Backend(String),
    /// Another cycle was already running in this process.
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries looked at, including discarded ones.
    pub examined: usize,
    pub provisioned: usize,
    pub discarded: usize,
    /// `None` when the cycle walked every entry it started with.
    pub stopped: Option<StopReason>,
}

enum Step {
    Provisioned,
    Discarded,
    Stop(StopReason),
}

/// Where the head order's server will live.
enum Placement {
    /// No server row yet; RAM reserved on a freshly chosen host.
    Fresh(HostReservation),
    /// A row from an earlier attempt, with a reservation on its host when
    /// its capacity still has to be committed.
    Recorded(Server, Option<HostReservation>),
}

pub struct PendingOrderProcessor {
    ctx: Arc<ProvisioningContext>,
    running: Mutex<()>,
}

impl PendingOrderProcessor {
    pub fn new(ctx: Arc<ProvisioningContext>) -> Self {
        Self {
            ctx,
            running: Mutex::new(()),
        }
    }

    /// Runs one pass over the pending queue. Never returns an error: backend
    /// failures end the cycle and are reported in [`CycleReport::stopped`].
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let Ok(_running) = self.running.try_lock() else {
            warn!("Pending order cycle already in progress, skipping");
            report.stopped = Some(StopReason::AlreadyRunning);
            return report;
        };

        let pending = match self.ctx.pending.len().await {
            Ok(n) => n,
            Err(e) => {
                error!("Could not read pending queue length: {}", e);
                report.stopped = Some(StopReason::Backend(e.to_string()));
                return report;
            }
        };
        if pending > 0 {
            debug!("Processing {} pending order(s)", pending);
        }

        for _ in 0..pending {
            let step = match self.ctx.pending.peek(0).await {
                Ok(Some(entry)) => {
                    report.examined += 1;
                    self.process_head(entry).await
                }
                Ok(None) => Step::Stop(StopReason::Drained),
                Err(e) => {
                    error!("Could not read pending queue head: {}", e);
                    Step::Stop(StopReason::Backend(e.to_string()))
                }
            };
            match step {
                Step::Provisioned => report.provisioned += 1,
                Step::Discarded => report.discarded += 1,
                Step::Stop(reason) => {
                    report.stopped = Some(reason);
                    break;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                provisioned = report.provisioned,
                discarded = report.discarded,
                stopped = ?report.stopped,
                "Pending order cycle finished"
            );
        }
        report
    }

    async fn process_head(&self, entry: Value) -> Step {
        let order = match PendingOrder::from_value(&entry) {
            Ok(order) => order,
            Err(MalformedOrder(field)) => {
                warn!("Discarding malformed pending order without `{}`: {}", field, entry);
                return self.discard_head().await;
            }
        };

        match self.try_place(&order).await {
            Ok(step) => step,
            Err(e) => {
                error!(
                    subscription_id = %order.subscription_id,
                    "Pending order left at head after error: {}",
                    e
                );
                Step::Stop(StopReason::Backend(e.to_string()))
            }
        }
    }

    async fn try_place(&self, order: &PendingOrder) -> Result<Step, ProvisionError> {
        let ctx = &self.ctx;
        let Some(placement) = self.placement(order).await? else {
            debug!(
                subscription_id = %order.subscription_id,
                ram_gb = ?order.ram_needed,
                "Head order still does not fit"
            );
            return Ok(Step::Stop(StopReason::NoCapacity));
        };

        let Some(plan) = ctx.store.select_plan_by_id(order.plan_id).await? else {
            warn!(
                subscription_id = %order.subscription_id,
                plan_id = %order.plan_id,
                "Discarding pending order for unknown plan"
            );
            return Ok(self.discard_head().await);
        };

        let subscription = ctx
            .store
            .select_subscription_by_id(order.subscription_id)
            .await?;
        match subscription.map(|s| s.internal_status) {
            Some(InternalStatus::Unavailable) => {}
            other => {
                warn!(
                    subscription_id = %order.subscription_id,
                    status = ?other,
                    "Discarding pending order for subscription no longer waiting"
                );
                return Ok(self.discard_head().await);
            }
        }

        let Some(provisioner) = ctx.registry.get(&order.game_name) else {
            warn!(
                subscription_id = %order.subscription_id,
                game = %order.game_name,
                "No provisioner for pending order, retrying later"
            );
            return Ok(Step::Stop(StopReason::NoProvisioner(order.game_name.clone())));
        };

        let server = match placement {
            Placement::Recorded(mut server, reservation) => {
                warn!(
                    subscription_id = %order.subscription_id,
                    host = %server.ip_address,
                    "Server already recorded, re-sending start"
                );
                if let Some(reservation) = reservation {
                    commit_existing(ctx, reservation, &mut server).await?;
                }
                server
            }
            Placement::Fresh(reservation) => {
                let config = match provisioner.default_config() {
                    Ok(config) => config,
                    Err(e) => {
                        error!(
                            subscription_id = %order.subscription_id,
                            "Discarding pending order, default config failed: {}",
                            e
                        );
                        ctx.store
                            .update_subscription_internal_status(
                                order.subscription_id,
                                InternalStatus::Failed,
                            )
                            .await?;
                        return Ok(self.discard_head().await);
                    }
                };
                record_server(
                    ctx,
                    reservation,
                    ProvisionRequest {
                        subscription_id: order.subscription_id,
                        cpu_cores: plan.cpu_cores,
                        game_name: &order.game_name,
                        provisioner: provisioner.as_ref(),
                        config,
                    },
                )
                .await?
            }
        };

        dispatch_start(ctx, &server, &order.game_name, plan.cpu_cores).await?;
        ctx.store
            .update_subscription_internal_status(order.subscription_id, InternalStatus::On)
            .await?;
        ctx.pending.pop(0).await?;

        info!(subscription_id = %order.subscription_id, "Pending order provisioned");
        Ok(Step::Provisioned)
    }

    /// Decides where the head order goes. `None` means no room yet: no host
    /// fits a fresh order, or the host named by an uncommitted row is full.
    async fn placement(&self, order: &PendingOrder) -> Result<Option<Placement>, ProvisionError> {
        let ctx = &self.ctx;
        let existing = ctx
            .store
            .select_server_by_subscription(order.subscription_id)
            .await?;

        let placement = match existing {
            Some(server) if server.capacity_committed => Some(Placement::Recorded(server, None)),
            Some(server) => {
                let reservation = ctx
                    .allocator
                    .reserve_on(&server.ip_address, server.ram_gb)
                    .await?;
                reservation.map(|reservation| Placement::Recorded(server, Some(reservation)))
            }
            None => ctx
                .allocator
                .reserve_host(order.ram_needed)
                .await?
                .map(Placement::Fresh),
        };
        Ok(placement)
    }

    async fn discard_head(&self) -> Step {
        match self.ctx.pending.pop(0).await {
            Ok(_) => Step::Discarded,
            Err(e) => {
                error!("Could not discard pending order: {}", e);
                Step::Stop(StopReason::Backend(e.to_string()))
            }
        }
    }
}
