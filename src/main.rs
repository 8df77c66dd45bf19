//! Tether - staff/client relationship API server

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether::{config::ServerArgs, logging, server, store, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = ServerArgs::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Tether - staff/client relationships");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Store: {:?} ({})", args.store.store, args.store.mongodb_db);
    info!("Collections: {} / {}", args.store.staff_collection, args.store.client_collection);
    info!("Timeouts: fast {} ms, slow {} ms", args.fast_timeout_ms, args.slow_timeout_ms);
    info!("======================================");

    let store = match store::open(&args.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Store connection failed: {}", e);
            std::process::exit(1);
        }
    };

    if args.store.use_transactions && !store.supports_transactions() {
        warn!("USE_TRANSACTIONS is set but the store cannot run transactions; using ordered writes");
    }

    let state = Arc::new(AppState::new(args, store));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            signal.cancel();
        }
    });

    server::run(state, shutdown).await?;
    info!("Tether stopped");
    Ok(())
}
