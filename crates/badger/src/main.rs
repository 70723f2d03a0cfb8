//! Badger provisioning orchestrator.
//!
//! Loads the configuration, seeds the in-memory inventory, builds the
//! provisioning context and then either runs a single pending-order cycle
//! (`--once`) or keeps the scheduler running until SIGINT/SIGTERM.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{bail, Context, Result};
use badger_core::{MemoryDispatch, MemoryPendingQueue, MemoryStore, PlanId};
use orchestrator::{
    builtin_registry, Orchestrator, OrderOutcome, PendingOrderProcessor, PendingScheduler,
    ProvisioningContext, ProvisioningSettings, TrialRequest,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use cli::CliArgs;
use config::AppConfig;

// ============================================================================
// Application
// ============================================================================

pub struct Application {
    config: AppConfig,
    args: CliArgs,
    ctx: Arc<ProvisioningContext>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("loading {}", args.config_path.display()))?;

        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(secs) = args.interval_secs {
            config.scheduler.pending_interval_secs = secs;
        }

        config.validate().context("Configuration validation failed")?;
        logging::setup_logging(&config.logging)?;

        let trial_duration = config
            .trial_duration()
            .context("trial duration out of range")?;

        let store = Arc::new(MemoryStore::new());
        config.inventory.seed(&store).await;

        let registry = builtin_registry().context("building provisioner registry")?;
        let ctx = ProvisioningContext::new(
            store,
            Arc::new(MemoryDispatch::new()),
            Arc::new(MemoryPendingQueue::new()),
            registry,
            ProvisioningSettings { trial_duration },
        );

        info!(
            "🚀 Badger orchestrator v{} | config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );
        Ok(Self { config, args, ctx })
    }

    pub async fn run(self) -> Result<()> {
        if let Some(email) = &self.args.trial_email {
            self.place_trial(email).await;
        }

        if self.args.once {
            let report = PendingOrderProcessor::new(self.ctx.clone()).run_cycle().await;
            info!(
                "Single pending-order cycle: {} examined, {} provisioned, {} discarded, stopped: {:?}",
                report.examined, report.provisioned, report.discarded, report.stopped
            );
            self.ctx.shutdown();
            return Ok(());
        }

        let mut scheduler = PendingScheduler::new(self.ctx.clone(), self.config.pending_interval())
            .run_on_startup(self.config.scheduler.run_on_startup)
            .spawn();

        info!("✅ Orchestrator running, press Ctrl+C to stop");
        tokio::select! {
            received = signals::shutdown_signal() => {
                info!("🛑 {} received, shutting down", received?);
            }
            joined = &mut scheduler => {
                self.ctx.shutdown();
                bail!("pending scheduler ended before shutdown: {:?}", joined);
            }
        }

        self.ctx.shutdown();
        if let Err(e) = scheduler.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
        info!("👋 Orchestrator stopped");
        Ok(())
    }

    async fn place_trial(&self, email: &str) {
        let request = TrialRequest {
            email: email.to_string(),
            plan_id: PlanId(self.args.plan_id),
        };
        match Orchestrator::new(self.ctx.clone()).order_trial_server(&request).await {
            Ok(OrderOutcome::Provisioned {
                subscription_id,
                host_ip,
                ..
            }) => info!(
                subscription_id = %subscription_id,
                "Trial server provisioned on {}",
                host_ip
            ),
            Ok(OrderOutcome::Queued { subscription_id }) => info!(
                subscription_id = %subscription_id,
                "Trial order queued, resources full"
            ),
            Ok(OrderOutcome::Failed { reason, .. }) => {
                warn!(email = %email, "Trial order failed: {}", reason)
            }
            Err(e) => error!(email = %email, "Trial order errored: {}", e),
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
