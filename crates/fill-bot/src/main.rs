//! Fill bot preflight.
//!
//! Validates the configuration, operator key and endpoints the service
//! runs against. The service itself is embedded through `fill_bot::FillBot`
//! together with a protocol client.

use anyhow::Result;
use clap::Parser;
use fill_core::{lamports_to_sol, OrderKind};
use fill_discovery::{IndexerClient, OrderIndex};
use fill_executor::KeyManager;
use fill_ledger::{JsonRpcLedger, LedgerRpc};
use tracing::{info, warn};

/// Vault order filler
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FILL_BOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = fill_bot::resolve_config_path(
        args.config,
        std::env::var(fill_bot::CONFIG_ENV_VAR).ok(),
    );
    let config = fill_bot::AppConfig::from_file(&config_path)?;

    fill_telemetry::init_logging(config.telemetry.log_filter.as_deref())?;
    info!("Starting fill bot preflight v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %config_path, rpc_url = %config.ledger.rpc_url, "Configuration loaded");

    let program_id = config.program_id()?;
    let keys = KeyManager::load(&config.wallet.key_source(), config.wallet.expected_address()?)?;
    let operator = keys.address();
    info!(%operator, program = %program_id, "Operator key loaded");

    let ledger = JsonRpcLedger::with_timeout(config.ledger.rpc_url.clone(), config.request_timeout())?;
    let slot = ledger.get_slot().await?;
    let balance = ledger.get_balance(operator).await?;
    let floor = config.balance.min_balance_lamports()?;
    info!(
        slot,
        balance_sol = lamports_to_sol(balance),
        floor_sol = lamports_to_sol(floor),
        "Ledger reachable"
    );
    if balance < floor {
        warn!(%operator, "Operator balance is below the floor");
    }

    if config.indexer.base_url.trim().is_empty() {
        warn!("indexer.base_url is not set");
    } else {
        let index = IndexerClient::with_timeout(config.indexer.base_url.clone(), config.indexer_timeout())?;
        let orders = index.open_orders().await?;
        let count = |kind: OrderKind| orders.iter().filter(|o| o.kind() == kind).count();
        let released = orders
            .iter()
            .filter(|o| o.release_slot() < slot)
            .count();
        info!(
            withdraw = count(OrderKind::Withdraw),
            spend_limit = count(OrderKind::SpendLimitUpdate),
            released,
            "Indexer reachable"
        );
    }

    info!("Preflight complete");
    Ok(())
}
