mod availability;
mod config;
mod coordinator;
mod intake;
mod metrics;
mod server;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use config::Config;
use coordinator::Coordinator;
use wayfare_core::storage;
use wayfare_payment::PaymentEngine;
use wayfare_relay::RelayClient;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("starting wayfare-driver");

    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    let db = storage::create_pool(&config.database.url).await?;
    storage::run_migrations(&db).await?;
    tracing::info!("local database ready");

    let seed = hex::decode(&config.identity.secret_key_hex)?;
    let identity_secret = secp256k1::SecretKey::from_slice(&seed)?;
    let identity_pubkey = wayfare_core::event::pubkey_of(&identity_secret);
    let mut seed64 = [0u8; 64];
    seed64[..seed.len().min(64)].copy_from_slice(&seed[..seed.len().min(64)]);
    let payment = Arc::new(PaymentEngine::new(&config.wallet.wallet_db_path, seed64, db.clone()).await?);

    let relay_urls: Vec<url::Url> = config
        .relay
        .urls
        .iter()
        .filter_map(|u| url::Url::parse(u).ok())
        .collect();
    let relay = Arc::new(RelayClient::connect(relay_urls));

    let coordinator = Coordinator::spawn(db.clone(), relay.clone(), payment.clone(), identity_secret, identity_pubkey);

    let relay_connected = Arc::new(AtomicBool::new(true));
    let server_state = server::ServerState {
        db: db.clone(),
        relay_connected: relay_connected.clone(),
    };

    let bind_addr = config.server.bind_addr.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(&bind_addr, server_state).await {
            tracing::error!(error = %e, "http server error");
        }
    });

    wait_for_shutdown_signal().await;
    coordinator.send(coordinator::Command::Shutdown).await;
    relay.close_all().await;
    server_handle.abort();

    tracing::info!("wayfare-driver stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,wayfare_driver=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}
