// On-chain marketplace relayer: matching and execution core

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use match_relayer::{
    api::handlers::{
        cancel_order, get_execution_status, get_order_status, health_check, submit_order,
    },
    chain::broadcaster::{Broadcaster, DirectBroadcaster, RelayBroadcaster},
    chain::txn::TxnSigner,
    chain::{ChainApi, EvmRpcClient},
    config::{Config, Mode},
    execution::{match_channel, ExecutionEngine},
    matching::MatchingEngine,
    nonce::NonceProvider,
    storage::{InMemoryNonceStore, KvStore, OrderbookStorage},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    std::fs::create_dir_all("logs").ok();
    let file_appender = tracing_appender::rolling::daily("logs", "relayer.log");
    let (non_blocking_file, _guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if std::env::var("DEBUG").map(|v| v == "1").unwrap_or(false) {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    std::mem::forget(_guard);

    let config = Arc::new(Config::from_env()?);
    info!(
        "Starting match relayer for chain {} ({:?} mode, forking {})",
        config.chain_id, config.mode, config.enable_forking
    );
    if let Some(redis_url) = &config.redis_url {
        info!("Configured kv endpoint {} (using in-process store)", redis_url);
    }

    let kv = Arc::new(KvStore::new());
    let storage = Arc::new(OrderbookStorage::new(kv.clone(), config.chain_id));
    let chain: Arc<dyn ChainApi> = Arc::new(EvmRpcClient::new(config.http_url.clone()));

    let registry = Arc::new(match_relayer::execution::builders::default_registry(
        config.exchange_address,
    ));
    registry.verify()?;

    let signer = Arc::new(TxnSigner::from_key(&config.initiator_key, config.chain_id)?);

    // Relay bundles are the production path; direct RPC serves dev and
    // fork runs.
    let broadcaster: Arc<dyn Broadcaster> = match &config.flashbots_auth_key {
        Some(auth_key) if config.use_relay() => {
            info!("Broadcasting through private relay {}", config.relay_url);
            Arc::new(RelayBroadcaster::new(
                config.relay_url.clone(),
                TxnSigner::from_key(auth_key, config.chain_id)?,
            ))
        }
        _ => {
            if config.mode == Mode::Prod {
                info!("Broadcasting through direct rpc (no relay auth key configured)");
            } else {
                info!("Broadcasting through direct rpc");
            }
            Arc::new(DirectBroadcaster::new(chain.clone()))
        }
    };

    let nonce_store = Arc::new(InMemoryNonceStore::new());
    let nonce_provider = Arc::new(NonceProvider::new(
        kv.clone(),
        nonce_store,
        chain.clone(),
        config.chain_id,
        config.match_executor_address,
        config.exchange_address,
    ));
    nonce_provider.run().await?;

    let matching = Arc::new(MatchingEngine::new(storage.clone()));
    let (match_tx, match_rx) = match_channel();
    let execution = Arc::new(ExecutionEngine::new(
        storage.clone(),
        chain.clone(),
        broadcaster,
        registry.clone(),
        nonce_provider.clone(),
        signer,
    ));

    let execution_worker = execution.clone();
    tokio::spawn(async move {
        if let Err(e) = execution_worker.run(match_rx).await {
            error!("Execution engine error: {}", e);
        }
    });

    let app_state = AppState {
        config: config.clone(),
        storage: storage.clone(),
        matching,
        registry,
        match_tx,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(submit_order))
        .route("/orders/:order_id/status", get(get_order_status))
        .route("/orders/:order_id/execution", get(get_execution_status))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("Relayer control surface listening on http://0.0.0.0:8080");
    axum::serve(listener, app).await?;

    Ok(())
}
