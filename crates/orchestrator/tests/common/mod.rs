//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use badger_core::store::StoreResult;
use badger_core::{
    Game, GameId, Host, HostId, InternalStatus, MemoryDispatch, MemoryPendingQueue, MemoryStore,
    NewServer, NewSubscription, PendingOrder, PendingQueue, Plan, PlanId, ProvisionerRegistry,
    Server, ServerId, ServerStatus, Store, StoreError, Subscription, SubscriptionId,
    SubscriptionStatus, User, UserId,
};
use orchestrator::{
    builtin_registry, Orchestrator, OrderOutcome, PendingOrderProcessor, ProvisioningContext,
    ProvisioningSettings, ServerActions, TrialRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub dispatch: Arc<MemoryDispatch>,
    pub pending: Arc<MemoryPendingQueue>,
    pub ctx: Arc<ProvisioningContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(builtin_registry().expect("builtin registry"))
    }

    pub fn with_registry(registry: ProvisionerRegistry) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store, registry)
    }

    /// A harness whose context reaches the store through [`CapacityFaults`].
    pub fn with_capacity_faults() -> (Self, Arc<CapacityFaults>) {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(CapacityFaults::new(store.clone()));
        let registry = builtin_registry().expect("builtin registry");
        (Self::build(store, faults.clone(), registry), faults)
    }

    fn build(store: Arc<MemoryStore>, backend: Arc<dyn Store>, registry: ProvisionerRegistry) -> Self {
        let dispatch = Arc::new(MemoryDispatch::new());
        let pending = Arc::new(MemoryPendingQueue::new());
        let ctx = ProvisioningContext::new(
            backend,
            dispatch.clone(),
            pending.clone(),
            registry,
            ProvisioningSettings::default(),
        );
        Self {
            store,
            dispatch,
            pending,
            ctx,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.ctx.clone())
    }

    pub fn processor(&self) -> PendingOrderProcessor {
        PendingOrderProcessor::new(self.ctx.clone())
    }

    pub fn actions(&self) -> ServerActions {
        ServerActions::new(self.ctx.clone())
    }

    /// A plan for a game registered under `game_name`.
    pub async fn plan_for(&self, game_name: &str, ram_gb: Option<u64>, cpu_cores: u32) -> Plan {
        let game = self.store.add_game(game_name).await;
        self.store.add_plan(game.id, ram_gb, cpu_cores).await
    }

    pub async fn valheim_plan(&self, ram_gb: u64) -> Plan {
        self.plan_for("valheim", Some(ram_gb), 2).await
    }

    /// Registers a user and places a trial order for `plan`.
    pub async fn trial(&self, email: &str, plan: &Plan) -> (User, OrderOutcome) {
        let user = self.store.add_user(email).await;
        let outcome = self
            .orchestrator()
            .order_trial_server(&TrialRequest {
                email: email.to_string(),
                plan_id: plan.id,
            })
            .await
            .expect("trial order");
        (user, outcome)
    }

    /// A subscription already waiting for capacity, with its queue entry.
    pub async fn waiting_subscription(&self, plan: &Plan, game_name: &str) -> Subscription {
        let user = self
            .store
            .add_user(&format!("waiting-{}@example.com", plan.id))
            .await;
        let now = badger_core::now_utc();
        let subscription = self
            .store
            .insert_subscription(NewSubscription {
                user_id: user.id,
                plan_id: plan.id,
                status: SubscriptionStatus::Active,
                internal_status: InternalStatus::Unavailable,
                is_trial: true,
                expires_at: now,
                next_billing_date: now,
            })
            .await
            .expect("insert subscription");
        let order = PendingOrder {
            subscription_id: subscription.id,
            plan_id: plan.id,
            game_name: game_name.to_string(),
            ram_needed: plan.ram_gb,
            enqueued_at: now,
        };
        self.pending.append(order.to_value()).await.expect("enqueue");
        subscription
    }

    pub async fn subscription(&self, outcome: &OrderOutcome) -> Subscription {
        let id = outcome.subscription_id().expect("order created a subscription");
        self.store
            .subscriptions()
            .await
            .into_iter()
            .find(|s| s.id == id)
            .expect("subscription stored")
    }

    pub async fn queued_subscription_ids(&self) -> Vec<i64> {
        self.pending
            .snapshot()
            .await
            .iter()
            .filter_map(|entry| entry.get("subscription_id").and_then(|v| v.as_i64()))
            .collect()
    }
}

/// A [`MemoryStore`] whose capacity commits can be made to fail while every
/// other call goes through.
pub struct CapacityFaults {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

impl CapacityFaults {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for CapacityFaults {
    async fn select_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.select_user_by_email(email).await
    }

    async fn select_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.select_user_by_id(id).await
    }

    async fn mark_user_trial_exhausted(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.mark_user_trial_exhausted(id).await
    }

    async fn insert_subscription(&self, new: NewSubscription) -> StoreResult<Subscription> {
        self.inner.insert_subscription(new).await
    }

    async fn select_subscription_by_id(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Subscription>> {
        self.inner.select_subscription_by_id(id).await
    }

    async fn update_subscription_internal_status(
        &self,
        id: SubscriptionId,
        status: InternalStatus,
    ) -> StoreResult<Option<Subscription>> {
        self.inner.update_subscription_internal_status(id, status).await
    }

    async fn update_subscription_trial_flag(
        &self,
        id: SubscriptionId,
        is_trial: bool,
    ) -> StoreResult<Option<Subscription>> {
        self.inner.update_subscription_trial_flag(id, is_trial).await
    }

    async fn select_plan_by_id(&self, id: PlanId) -> StoreResult<Option<Plan>> {
        self.inner.select_plan_by_id(id).await
    }

    async fn select_game_by_id(&self, id: GameId) -> StoreResult<Option<Game>> {
        self.inner.select_game_by_id(id).await
    }

    async fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        self.inner.list_hosts().await
    }

    async fn commit_server_capacity(
        &self,
        server: ServerId,
        host: HostId,
    ) -> StoreResult<Option<Host>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("capacity commit refused"));
        }
        self.inner.commit_server_capacity(server, host).await
    }

    async fn insert_server(&self, new: NewServer) -> StoreResult<Server> {
        self.inner.insert_server(new).await
    }

    async fn select_server_by_subscription(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Server>> {
        self.inner.select_server_by_subscription(id).await
    }

    async fn update_server_status(
        &self,
        id: ServerId,
        status: ServerStatus,
    ) -> StoreResult<Option<Server>> {
        self.inner.update_server_status(id, status).await
    }

    async fn update_server_config(
        &self,
        id: ServerId,
        config: &str,
    ) -> StoreResult<Option<Server>> {
        self.inner.update_server_config(id, config).await
    }
}
