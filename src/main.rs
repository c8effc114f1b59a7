//! Credential Issuance Service
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐  trigger  ┌─────────────┐    ┌─────────┐
//! │  Config  │───▶│  Issuance   │──────────▶│  Anchoring  │───▶│ XRP/ALGO│
//! │  (YAML)  │    │ Coordinator │           │ Coordinator │    │ clients │
//! └──────────┘    └─────────────┘           └─────────────┘    └─────────┘
//!                        ▲                         ▲
//!                        └──── Reconciliation ─────┘
//!                                Sweeper
//! ```

use std::sync::Arc;

use anyhow::Context;

use credential_issuance::config::AppConfig;
use credential_issuance::issuance::{
    AnchorClient, AnchoringCoordinator, IssuanceCoordinator, LedgerClient, MemoryTransactionStore,
    PaymentGateway, PgTransactionStore, ReconciliationSweeper, TransactionStore, anchor_channel,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

type Collaborators = (
    Arc<dyn PaymentGateway>,
    Arc<dyn LedgerClient>,
    Vec<Arc<dyn AnchorClient>>,
);

#[cfg(feature = "simulated-clients")]
fn build_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    use credential_issuance::issuance::ChainId;
    use credential_issuance::issuance::adapters::simulated::{
        SimulatedAnchorClient, SimulatedLedger, SimulatedPaymentGateway,
    };

    tracing::warn!("Using simulated payment, ledger and anchor clients");
    let anchors = config
        .issuance
        .chains
        .iter()
        .map(|c| {
            Arc::new(SimulatedAnchorClient::new(ChainId::new(&c.id), c.network.clone()))
                as Arc<dyn AnchorClient>
        })
        .collect();
    Ok((
        Arc::new(SimulatedPaymentGateway::new()),
        Arc::new(SimulatedLedger::new(config.issuance.collection.clone())),
        anchors,
    ))
}

#[cfg(not(feature = "simulated-clients"))]
fn build_collaborators(_config: &AppConfig) -> anyhow::Result<Collaborators> {
    anyhow::bail!("no ledger clients available: build with the `simulated-clients` feature")
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TransactionStore>> {
    match &config.postgres_url {
        Some(url) => {
            let store = PgTransactionStore::connect(url, config.issuance.timeouts.store_timeout())
                .await
                .context("Failed to connect transaction store")?;
            store.health_check().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No postgres_url configured; transactions are kept in memory only");
            Ok(Arc::new(MemoryTransactionStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)
        .with_context(|| format!("Failed to load config for env {}", env))?;
    let _log_guard = credential_issuance::logging::init_logging(&app_config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        mint_fee = app_config.issuance.mint_fee,
        "Starting credential issuance service in {} mode",
        env
    );

    let store = build_store(&app_config).await?;
    let (payment, ledger, anchors) = build_collaborators(&app_config)?;
    let timeouts = app_config.issuance.timeouts.to_call_timeouts();

    let (trigger, receiver) = anchor_channel(app_config.issuance.trigger_buffer);
    let coordinator = Arc::new(
        IssuanceCoordinator::new(store.clone(), payment, ledger)
            .with_timeouts(timeouts)
            .with_mint_fee(app_config.issuance.mint_fee)
            .with_anchor_trigger(trigger),
    );
    let anchoring = Arc::new(AnchoringCoordinator::new(store, anchors, timeouts.anchor));
    let sweeper = ReconciliationSweeper::new(
        coordinator.clone(),
        anchoring.clone(),
        app_config.issuance.sweeper.to_sweeper_config(),
    );

    let anchoring_worker = tokio::spawn(anchoring.clone().run(receiver));
    let sweeper_task: tokio::task::JoinHandle<()> = tokio::spawn(async move { sweeper.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    sweeper_task.abort();
    let _ = sweeper_task.await;
    // Dropping the last trigger closes the channel and lets the worker drain
    drop(coordinator);
    if let Err(e) = anchoring_worker.await {
        tracing::error!(error = %e, "Anchoring worker ended abnormally");
    }

    tracing::info!("Credential issuance service stopped");
    Ok(())
}
