//! In-process backends for the store and both queues.
//!
//! These back the `badger` binary when it runs without external services
//! and serve as fixtures in tests. They are not durable.
//!
//! Each backend can be switched "offline" to simulate an unreachable
//! database or queue server; every call then fails with
//! [`StoreError::Unavailable`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::ids::{GameId, HostId, PlanId, ServerId, SubscriptionId, UserId};
use crate::models::{
    Game, Host, InternalStatus, NewServer, NewSubscription, Plan, Server, ServerStatus,
    Subscription, User,
};
use crate::queue::{DispatchQueue, PendingQueue};
use crate::store::{Store, StoreResult};

// ============================================================================
// Memory Store
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    sequence: i64,
    users: BTreeMap<UserId, User>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    plans: BTreeMap<PlanId, Plan>,
    games: BTreeMap<GameId, Game>,
    /// Kept in insertion order; the allocator depends on it.
    hosts: Vec<Host>,
    servers: BTreeMap<ServerId, Server>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    /// Keeps generated ids clear of explicitly seeded ones.
    fn observe_id(&mut self, id: i64) {
        self.sequence = self.sequence.max(id);
    }
}

/// A [`Store`] holding every table in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store is offline"));
        }
        Ok(())
    }

    pub async fn seed_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.observe_id(user.id.get());
        state.users.insert(user.id, user);
    }

    pub async fn seed_game(&self, game: Game) {
        let mut state = self.state.write().await;
        state.observe_id(game.id.get());
        state.games.insert(game.id, game);
    }

    pub async fn seed_plan(&self, plan: Plan) {
        let mut state = self.state.write().await;
        state.observe_id(plan.id.get());
        state.plans.insert(plan.id, plan);
    }

    /// Appends a host to the end of the listing order.
    pub async fn seed_host(&self, host: Host) {
        let mut state = self.state.write().await;
        state.observe_id(host.id.get());
        state.hosts.retain(|existing| existing.id != host.id);
        state.hosts.push(host);
    }

    pub async fn add_user(&self, email: &str) -> User {
        let mut state = self.state.write().await;
        let user = User {
            id: UserId(state.next_id()),
            email: email.to_string(),
            exhausted_free: false,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_game(&self, name: &str) -> Game {
        let mut state = self.state.write().await;
        let game = Game {
            id: GameId(state.next_id()),
            name: name.to_string(),
        };
        state.games.insert(game.id, game.clone());
        game
    }

    pub async fn add_plan(&self, game_id: GameId, ram_gb: Option<u64>, cpu_cores: u32) -> Plan {
        let mut state = self.state.write().await;
        let id = PlanId(state.next_id());
        let plan = Plan {
            id,
            game_id,
            name: format!("plan-{id}"),
            ram_gb,
            cpu_cores,
            price_monthly: 0,
        };
        state.plans.insert(plan.id, plan.clone());
        plan
    }

    pub async fn add_host(&self, ip_address: &str, capacity_total: u64, capacity_used: u64) -> Host {
        let mut state = self.state.write().await;
        let host = Host {
            id: HostId(state.next_id()),
            ip_address: ip_address.to_string(),
            capacity_total,
            capacity_used,
        };
        state.hosts.push(host.clone());
        host
    }

    /// Snapshot of all subscriptions, ordered by id.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.read().await.subscriptions.values().cloned().collect()
    }

    /// Snapshot of all servers, ordered by id.
    pub async fn servers(&self) -> Vec<Server> {
        self.state.read().await.servers.values().cloned().collect()
    }

    /// Snapshot of the host inventory in listing order.
    pub async fn hosts(&self) -> Vec<Host> {
        self.state.read().await.hosts.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn select_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn select_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.check()?;
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn mark_user_trial_exhausted(&self, id: UserId) -> StoreResult<Option<User>> {
        self.check()?;
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.exhausted_free = true;
            user.clone()
        }))
    }

    async fn insert_subscription(&self, new: NewSubscription) -> StoreResult<Subscription> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&new.user_id) {
            return Err(StoreError::constraint(format!(
                "user {} does not exist",
                new.user_id
            )));
        }
        if !state.plans.contains_key(&new.plan_id) {
            return Err(StoreError::constraint(format!(
                "plan {} does not exist",
                new.plan_id
            )));
        }
        let subscription = Subscription {
            id: SubscriptionId(state.next_id()),
            user_id: new.user_id,
            plan_id: new.plan_id,
            status: new.status,
            internal_status: new.internal_status,
            is_trial: new.is_trial,
            created_at: crate::now_utc(),
            expires_at: new.expires_at,
            next_billing_date: new.next_billing_date,
        };
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn select_subscription_by_id(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Subscription>> {
        self.check()?;
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn update_subscription_internal_status(
        &self,
        id: SubscriptionId,
        status: InternalStatus,
    ) -> StoreResult<Option<Subscription>> {
        self.check()?;
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(&id).map(|sub| {
            sub.internal_status = status;
            sub.clone()
        }))
    }

    async fn update_subscription_trial_flag(
        &self,
        id: SubscriptionId,
        is_trial: bool,
    ) -> StoreResult<Option<Subscription>> {
        self.check()?;
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(&id).map(|sub| {
            sub.is_trial = is_trial;
            sub.clone()
        }))
    }

    async fn select_plan_by_id(&self, id: PlanId) -> StoreResult<Option<Plan>> {
        self.check()?;
        Ok(self.state.read().await.plans.get(&id).cloned())
    }

    async fn select_game_by_id(&self, id: GameId) -> StoreResult<Option<Game>> {
        self.check()?;
        Ok(self.state.read().await.games.get(&id).cloned())
    }

    async fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        self.check()?;
        Ok(self.state.read().await.hosts.clone())
    }

    async fn commit_server_capacity(
        &self,
        server: ServerId,
        host: HostId,
    ) -> StoreResult<Option<Host>> {
        self.check()?;
        let mut state = self.state.write().await;
        let StoreState { servers, hosts, .. } = &mut *state;
        let (Some(server), Some(host)) = (
            servers.get_mut(&server),
            hosts.iter_mut().find(|h| h.id == host),
        ) else {
            return Ok(None);
        };
        if !server.capacity_committed {
            host.capacity_used = host.capacity_used.saturating_add(server.ram_gb);
            server.capacity_committed = true;
        }
        Ok(Some(host.clone()))
    }

    async fn insert_server(&self, new: NewServer) -> StoreResult<Server> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.subscriptions.contains_key(&new.subscription_id) {
            return Err(StoreError::constraint(format!(
                "subscription {} does not exist",
                new.subscription_id
            )));
        }
        if state
            .servers
            .values()
            .any(|server| server.subscription_id == new.subscription_id)
        {
            return Err(StoreError::constraint(format!(
                "subscription {} already has a server",
                new.subscription_id
            )));
        }
        let server = Server {
            id: ServerId(state.next_id()),
            subscription_id: new.subscription_id,
            status: new.status,
            ip_address: new.ip_address,
            ports: new.ports,
            container_id: new.container_id,
            config: new.config,
            ram_gb: new.ram_gb,
            capacity_committed: false,
        };
        state.servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn select_server_by_subscription(
        &self,
        id: SubscriptionId,
    ) -> StoreResult<Option<Server>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .servers
            .values()
            .find(|server| server.subscription_id == id)
            .cloned())
    }

    async fn update_server_status(
        &self,
        id: ServerId,
        status: ServerStatus,
    ) -> StoreResult<Option<Server>> {
        self.check()?;
        let mut state = self.state.write().await;
        Ok(state.servers.get_mut(&id).map(|server| {
            server.status = status;
            server.clone()
        }))
    }

    async fn update_server_config(
        &self,
        id: ServerId,
        config: &str,
    ) -> StoreResult<Option<Server>> {
        self.check()?;
        let mut state = self.state.write().await;
        Ok(state.servers.get_mut(&id).map(|server| {
            server.config = config.to_string();
            server.clone()
        }))
    }
}

// ============================================================================
// Memory Dispatch Channels
// ============================================================================

/// Per-host command channels held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryDispatch {
    channels: DashMap<String, VecDeque<String>>,
    offline: AtomicBool,
}

impl MemoryDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("dispatch queue is offline"));
        }
        Ok(())
    }

    /// All commands on `channel`, head first.
    pub fn snapshot(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of all channels that have ever received a command.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DispatchQueue for MemoryDispatch {
    async fn append(&self, channel: &str, command: String) -> Result<(), StoreError> {
        self.check()?;
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push_back(command);
        Ok(())
    }

    async fn peek_head(&self, channel: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .channels
            .get(channel)
            .and_then(|queue| queue.front().cloned()))
    }

    async fn pop_head(&self, channel: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .channels
            .get_mut(channel)
            .and_then(|mut queue| queue.pop_front()))
    }

    async fn len(&self, channel: &str) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self.channels.get(channel).map(|queue| queue.len()).unwrap_or(0))
    }
}

// ============================================================================
// Memory Pending Queue
// ============================================================================

/// The shared pending-order list as an in-memory JSON array.
#[derive(Debug, Default)]
pub struct MemoryPendingQueue {
    entries: Mutex<Vec<Value>>,
    offline: AtomicBool,
}

impl MemoryPendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("pending queue is offline"));
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<Value> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn append(&self, entry: Value) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self.entries.lock().await.len())
    }

    async fn peek(&self, index: usize) -> Result<Option<Value>, StoreError> {
        self.check()?;
        Ok(self.entries.lock().await.get(index).cloned())
    }

    async fn pop(&self, index: usize) -> Result<Option<Value>, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if index < entries.len() {
            Ok(Some(entries.remove(index)))
        } else {
            Ok(None)
        }
    }
}
