//! Periodic driver for the pending-order processor.
//!
//! Exactly one scheduler should run per deployment; the processor's own
//! guard only protects against overlapping cycles inside one process.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::context::ProvisioningContext;
use crate::pending::PendingOrderProcessor;

pub struct PendingScheduler {
    processor: Arc<PendingOrderProcessor>,
    ctx: Arc<ProvisioningContext>,
    interval: Duration,
    run_on_startup: bool,
}

impl PendingScheduler {
    pub fn new(ctx: Arc<ProvisioningContext>, interval: Duration) -> Self {
        Self {
            processor: Arc::new(PendingOrderProcessor::new(ctx.clone())),
            ctx,
            interval,
            run_on_startup: true,
        }
    }

    /// Whether the first cycle runs immediately or after one interval.
    pub fn run_on_startup(mut self, enabled: bool) -> Self {
        self.run_on_startup = enabled;
        self
    }

    pub fn processor(&self) -> Arc<PendingOrderProcessor> {
        self.processor.clone()
    }

    /// Spawns the loop. It exits once the context is shut down; a cycle in
    /// progress is allowed to finish first.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut shutdown = self.ctx.subscribe_shutdown();
        tokio::spawn(async move {
            info!(
                "⏱️  Pending order scheduler started (every {:?})",
                self.interval
            );
            let start = if self.run_on_startup {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + self.interval
            };
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.processor.run_cycle().await;
                        debug!(?report, "Pending order cycle");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Pending order scheduler stopped");
        })
    }
}
