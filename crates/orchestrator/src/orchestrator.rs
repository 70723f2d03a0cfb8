//! Trial and paid order placement.
//!
//! Every order walks the same state machine on the subscription's
//! `internal_status`:
//!
//! ```text
//!                    ┌──────────► on           (host found, start dispatched)
//! provisioning ──────┼──────────► unavailable  (no host, or start not sent;
//!                    │                          order queued)
//!                    └──────────► failed       (game/provisioner missing,
//!                                               or no server row written)
//! ```
//!
//! An unknown plan fails the order before a subscription is created.
//! Missing records are outcomes, not errors: they come back as
//! [`OrderOutcome::Failed`]. Only backend failures are returned as `Err`.

use badger_core::{
    GameId, InternalStatus, NewSubscription, PendingOrder, Plan, PlanId, ProvisionError,
    Provisioner, SubscriptionId, SubscriptionStatus, User, UserId,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::ProvisioningContext;
use crate::provision::{provision_server, ProvisionRequest};

// ============================================================================
// Requests and Outcomes
// ============================================================================

/// A free trial requested at registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRequest {
    pub email: String,
    pub plan_id: PlanId,
}

/// A subscription the payment provider has confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidOrder {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub next_billing_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// A host was found and `start` was dispatched to it.
    Provisioned {
        subscription_id: SubscriptionId,
        server_id: badger_core::ServerId,
        host_ip: String,
    },
    /// No host had room; the order waits on the pending queue.
    Queued { subscription_id: SubscriptionId },
    /// The order could not be placed. `subscription_id` is `None` when the
    /// order stopped before a subscription was created.
    Failed {
        subscription_id: Option<SubscriptionId>,
        reason: OrderFailure,
    },
}

impl OrderOutcome {
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        match self {
            Self::Provisioned { subscription_id, .. } | Self::Queued { subscription_id } => {
                Some(*subscription_id)
            }
            Self::Failed { subscription_id, .. } => *subscription_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderFailure {
    UserNotFound,
    PlanNotFound(PlanId),
    GameNotFound(GameId),
    NoProvisioner(String),
    InvalidDefaultConfig(String),
}

impl fmt::Display for OrderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserNotFound => write!(f, "user not found"),
            Self::PlanNotFound(id) => write!(f, "plan {id} not found"),
            Self::GameNotFound(id) => write!(f, "game {id} not found"),
            Self::NoProvisioner(game) => write!(f, "no provisioner for game {game}"),
            Self::InvalidDefaultConfig(reason) => write!(f, "default config unusable: {reason}"),
        }
    }
}

/// Plan, game and provisioner for one subscription.
struct Resolved {
    plan: Plan,
    game_name: String,
    provisioner: Box<dyn Provisioner>,
}

/// Follows plan → game → provisioner. A miss is returned as the matching
/// [`OrderFailure`].
async fn resolve_game(
    ctx: &ProvisioningContext,
    plan: Plan,
) -> Result<Result<Resolved, OrderFailure>, ProvisionError> {
    let Some(game) = ctx.store.select_game_by_id(plan.game_id).await? else {
        return Ok(Err(OrderFailure::GameNotFound(plan.game_id)));
    };
    let Some(provisioner) = ctx.registry.get(&game.name) else {
        return Ok(Err(OrderFailure::NoProvisioner(game.name)));
    };
    Ok(Ok(Resolved {
        plan,
        game_name: game.name,
        provisioner,
    }))
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    ctx: Arc<ProvisioningContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<ProvisioningContext>) -> Self {
        Self { ctx }
    }

    /// Creates a trial subscription for the user registered under
    /// `request.email` and tries to place its server.
    ///
    /// The user's free-trial allowance is spent once the order is either
    /// provisioned or queued.
    pub async fn order_trial_server(
        &self,
        request: &TrialRequest,
    ) -> Result<OrderOutcome, ProvisionError> {
        let Some(user) = self.ctx.store.select_user_by_email(&request.email).await? else {
            warn!(email = %request.email, "User not found for trial order");
            return Ok(OrderOutcome::Failed {
                subscription_id: None,
                reason: OrderFailure::UserNotFound,
            });
        };

        let now = badger_core::now_utc();
        let window_end = now + self.ctx.settings.trial_duration;
        let outcome = self
            .place_order(&user, request.plan_id, true, window_end, window_end)
            .await?;

        if matches!(outcome, OrderOutcome::Provisioned { .. } | OrderOutcome::Queued { .. }) {
            self.mark_trial_exhausted(user.id).await?;
        }
        Ok(outcome)
    }

    /// Creates a paid subscription and tries to place its server. A paying
    /// user can no longer start a trial, so the allowance is spent as soon as
    /// the subscription exists.
    pub async fn order_paid_server(&self, order: &PaidOrder) -> Result<OrderOutcome, ProvisionError> {
        let Some(user) = self.ctx.store.select_user_by_id(order.user_id).await? else {
            warn!(user_id = %order.user_id, "User not found for paid order");
            return Ok(OrderOutcome::Failed {
                subscription_id: None,
                reason: OrderFailure::UserNotFound,
            });
        };

        let outcome = self
            .place_order(
                &user,
                order.plan_id,
                false,
                order.next_billing_date,
                order.next_billing_date,
            )
            .await?;

        if outcome.subscription_id().is_some() {
            self.mark_trial_exhausted(user.id).await?;
        }
        Ok(outcome)
    }

    /// Sets the user's `exhausted_free` flag. Calling it again is harmless.
    pub async fn mark_trial_exhausted(&self, user_id: UserId) -> Result<(), ProvisionError> {
        match self.ctx.store.mark_user_trial_exhausted(user_id).await? {
            Some(_) => {
                info!(user_id = %user_id, "Free trial marked as used");
                Ok(())
            }
            None => Err(ProvisionError::not_found("user", user_id)),
        }
    }

    /// Whether the user can still start a free trial.
    pub async fn trial_available(&self, user_id: UserId) -> Result<bool, ProvisionError> {
        match self.ctx.store.select_user_by_id(user_id).await? {
            Some(user) => Ok(!user.exhausted_free),
            None => Err(ProvisionError::not_found("user", user_id)),
        }
    }

    async fn place_order(
        &self,
        user: &User,
        plan_id: PlanId,
        is_trial: bool,
        expires_at: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Result<OrderOutcome, ProvisionError> {
        let Some(plan) = self.ctx.store.select_plan_by_id(plan_id).await? else {
            warn!(user_id = %user.id, plan_id = %plan_id, "Plan not found for order");
            return Ok(OrderOutcome::Failed {
                subscription_id: None,
                reason: OrderFailure::PlanNotFound(plan_id),
            });
        };

        let subscription = self
            .ctx
            .store
            .insert_subscription(NewSubscription {
                user_id: user.id,
                plan_id,
                status: SubscriptionStatus::Active,
                internal_status: InternalStatus::Provisioning,
                is_trial,
                expires_at,
                next_billing_date,
            })
            .await?;
        let subscription_id = subscription.id;
        info!(
            subscription_id = %subscription_id,
            user_id = %user.id,
            plan_id = %plan_id,
            is_trial,
            "Subscription created"
        );

        match self.match_and_place(subscription_id, plan).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(reason)) => {
                error!(subscription_id = %subscription_id, "Order failed: {}", reason);
                self.set_status(subscription_id, InternalStatus::Failed).await?;
                Ok(OrderOutcome::Failed {
                    subscription_id: Some(subscription_id),
                    reason,
                })
            }
            Err(e) => {
                error!(subscription_id = %subscription_id, "Provisioning error: {}", e);
                if let Err(status_err) = self.set_status(subscription_id, InternalStatus::Failed).await {
                    error!(
                        subscription_id = %subscription_id,
                        "Could not mark subscription failed: {}",
                        status_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn match_and_place(
        &self,
        subscription_id: SubscriptionId,
        plan: Plan,
    ) -> Result<Result<OrderOutcome, OrderFailure>, ProvisionError> {
        let resolved = match resolve_game(&self.ctx, plan).await? {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(Err(reason)),
        };
        let config = match resolved.provisioner.default_config() {
            Ok(config) => config,
            Err(e) => return Ok(Err(OrderFailure::InvalidDefaultConfig(e.to_string()))),
        };

        let Some(reservation) = self.ctx.allocator.reserve_host(resolved.plan.ram_gb).await? else {
            warn!(
                subscription_id = %subscription_id,
                ram_gb = ?resolved.plan.ram_gb,
                "No host with enough capacity, queueing order"
            );
            self.queue_order(subscription_id, &resolved).await?;
            return Ok(Ok(OrderOutcome::Queued { subscription_id }));
        };

        let request = ProvisionRequest {
            subscription_id,
            cpu_cores: resolved.plan.cpu_cores,
            game_name: &resolved.game_name,
            provisioner: resolved.provisioner.as_ref(),
            config,
        };
        let server = match provision_server(&self.ctx, reservation, request).await {
            Ok(server) => server,
            Err(e) => return self.requeue_recorded(subscription_id, &resolved, e).await,
        };
        self.set_status(subscription_id, InternalStatus::On).await?;

        Ok(Ok(OrderOutcome::Provisioned {
            subscription_id,
            server_id: server.id,
            host_ip: server.ip_address,
        }))
    }

    /// After a provisioning error: if the server row made it into the store,
    /// the order goes to the pending queue so the processor finishes it.
    /// Otherwise nothing was placed and the error is returned.
    async fn requeue_recorded(
        &self,
        subscription_id: SubscriptionId,
        resolved: &Resolved,
        cause: ProvisionError,
    ) -> Result<Result<OrderOutcome, OrderFailure>, ProvisionError> {
        match self.ctx.store.select_server_by_subscription(subscription_id).await {
            Ok(Some(server)) => {
                warn!(
                    subscription_id = %subscription_id,
                    host = %server.ip_address,
                    "Server recorded but not started ({}), queueing for retry",
                    cause
                );
                self.queue_order(subscription_id, resolved).await?;
                Ok(Ok(OrderOutcome::Queued { subscription_id }))
            }
            Ok(None) => Err(cause),
            Err(lookup) => {
                error!(
                    subscription_id = %subscription_id,
                    "Could not check for a recorded server: {}",
                    lookup
                );
                Err(cause)
            }
        }
    }

    /// Marks the subscription `unavailable` and parks the order.
    async fn queue_order(
        &self,
        subscription_id: SubscriptionId,
        resolved: &Resolved,
    ) -> Result<(), ProvisionError> {
        self.set_status(subscription_id, InternalStatus::Unavailable).await?;
        let order = PendingOrder {
            subscription_id,
            plan_id: resolved.plan.id,
            game_name: resolved.game_name.clone(),
            ram_needed: resolved.plan.ram_gb,
            enqueued_at: badger_core::now_utc(),
        };
        self.ctx.pending.append(order.to_value()).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        subscription_id: SubscriptionId,
        status: InternalStatus,
    ) -> Result<(), ProvisionError> {
        self.ctx
            .store
            .update_subscription_internal_status(subscription_id, status)
            .await?;
        Ok(())
    }
}
