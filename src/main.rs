//! AGENTMARKET — Prediction Market Trading & Resolution Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite store (running migrations), and serves the API
//! with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use agentmarket::api::{self, ApiState};
use agentmarket::config;
use agentmarket::store::{MarketStore, SqliteStore};

const BANNER: &str = r#"
    _    ____ _____ _   _ _____ __  __    _    ____  _  _______ _____
   / \  / ___| ____| \ | |_   _|  \/  |  / \  |  _ \| |/ / ____|_   _|
  / _ \| |  _|  _| |  \| | | | | |\/| | / _ \ | |_) | ' /|  _|   | |
 / ___ \ |_| | |___| |\  | | | | |  | |/ ___ \|  _ <| . \| |___  | |
/_/   \_\____|_____|_| \_| |_| |_|  |_/_/   \_\_| \_\_|\_\_____| |_|

  Prediction Market Trading & Resolution Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load_or_default("config.toml")?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        database_url = %cfg.database_url(),
        absolute_max_stake = cfg.trading.absolute_max_stake,
        on_chain_stake_scale = cfg.onchain_stake_scale(),
        "AGENTMARKET starting up"
    );

    let store: Arc<dyn MarketStore> = Arc::new(SqliteStore::connect(&cfg.database_url()).await?);

    let state = Arc::new(ApiState::new(store, &cfg));
    api::serve(state, cfg.server.port).await?;

    info!("AGENTMARKET shut down cleanly");
    Ok(())
}

fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentmarket=info"));

    let json_logging = std::env::var("AGENTMARKET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
