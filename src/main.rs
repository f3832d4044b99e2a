//! crossdesk batch runner
//!
//! Loads configuration, connects to PostgreSQL, refreshes the market view
//! and runs the periodic sweep: total-balance recompute plus an outbox
//! queue-depth report. Request dispatch and exchange feedback run in their
//! own deployments against the same database.

use std::time::Duration;

use crossdesk::balance::{BalanceDb, TotalBalance};
use crossdesk::config::AppConfig;
use crossdesk::db::Database;
use crossdesk::market::MarketManager;
use crossdesk::outbox::OutboxDb;

fn get_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "config.yaml".to_string()
}

fn run_once() -> bool {
    std::env::args().any(|a| a == "--once")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = get_config_path();
    let config = AppConfig::load(&config_path)?;
    let _log_guard = crossdesk::logging::init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        config = %config_path,
        "Starting crossdesk"
    );

    let db = Database::connect(&config.postgres_url).await?;
    db.health_check().await?;

    // Fails fast when the config tables are unreadable.
    let _market = MarketManager::load(db.pool()).await?;
    tracing::info!(
        usd_currency_id = config.usd_currency_id,
        "Market view ready"
    );

    let totals = TotalBalance::new(BalanceDb::new(db.pool().clone()));
    let outbox = OutboxDb::new(db.pool().clone());

    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;

        match totals.recompute_all().await {
            Ok(changed) => tracing::info!(changed, "Total balance sweep finished"),
            Err(err) => tracing::error!(%err, "Total balance sweep failed"),
        }

        match outbox.count_pending().await {
            Ok(pending) => tracing::info!(pending, "Outbox queue depth"),
            Err(err) => tracing::error!(%err, "Outbox depth query failed"),
        }

        if run_once() {
            break;
        }
    }

    Ok(())
}
