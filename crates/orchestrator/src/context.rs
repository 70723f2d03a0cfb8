//! Process-scoped collaborators shared by every orchestrator component.
//!
//! Built once at startup and handed to the orchestrator, the pending-order
//! processor and the server actions. There are no module-level globals; two
//! contexts in one process (as in tests) never share state.

use badger_core::{DispatchQueue, PendingQueue, ProvisionerRegistry, Store};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::allocator::Allocator;

/// Tunables for order placement.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    /// How long a trial subscription runs before billing starts.
    pub trial_duration: chrono::Duration,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            trial_duration: chrono::Duration::hours(12),
        }
    }
}

pub struct ProvisioningContext {
    pub store: Arc<dyn Store>,
    pub dispatch: Arc<dyn DispatchQueue>,
    pub pending: Arc<dyn PendingQueue>,
    pub registry: Arc<ProvisionerRegistry>,
    pub allocator: Allocator,
    pub settings: ProvisioningSettings,
    shutdown: watch::Sender<bool>,
}

impl ProvisioningContext {
    pub fn new(
        store: Arc<dyn Store>,
        dispatch: Arc<dyn DispatchQueue>,
        pending: Arc<dyn PendingQueue>,
        registry: ProvisionerRegistry,
        settings: ProvisioningSettings,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        info!(
            "Provisioning context ready with {} provisioner(s): {:?}",
            registry.len(),
            registry.games()
        );
        Arc::new(Self {
            allocator: Allocator::new(store.clone()),
            store,
            dispatch,
            pending,
            registry: Arc::new(registry),
            settings,
            shutdown,
        })
    }

    /// A receiver that flips to `true` once [`shutdown`](Self::shutdown) is called.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Asks every background task bound to this context to stop.
    pub fn shutdown(&self) {
        info!("Provisioning context shutting down");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
