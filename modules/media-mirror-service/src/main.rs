//! Media Mirror Service: keeps fresh download links for media posted in
//! registered Telegram chats.
//!
//! Hosts the Telegram webhook, the cron trigger and an RPC API on one port.
//! Default: http://127.0.0.1:9103/

mod config;
mod dispatcher;
mod error;
mod event;
mod routes;
mod store;
mod telegram;
mod worker;

use config::{Config, RuntimeMode};
use dispatcher::Capabilities;
use routes::AppState;
use std::sync::Arc;
use std::time::Instant;
use telegram::{FileResolver, TelegramResolver};
use tokio::sync::Mutex;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("Media Mirror Service failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = Config::from_env()?;

    let store = store::open_store(&config.database).await?;
    let telegram = TelegramResolver::new(&config.bot_token, &config.telegram_api_url)?;
    let bot = telegram.bot().clone();
    let resolver: Arc<dyn FileResolver> = Arc::new(telegram);

    let caps = Arc::new(Capabilities {
        store: store.clone(),
        resolver: resolver.clone(),
        chat_id_prefix_len: config.chat_id_prefix_len,
        chat_action_marker: config.chat_action_marker.clone(),
    });

    match config.mode {
        RuntimeMode::Production => match config.webhook_url.as_deref() {
            Some(url) => {
                telegram::register_webhook(&bot, url, config.webhook_secret.as_deref()).await?
            }
            None => log::warn!("WEBHOOK_URL not set, assuming the webhook is managed externally"),
        },
        RuntimeMode::Development => {
            telegram::delete_webhook(&bot).await?;
            let poller =
                telegram::poller::UpdatePoller::new(&config.telegram_api_url, &config.bot_token)?;
            let poller_caps = caps.clone();
            tokio::spawn(async move {
                poller.run(poller_caps).await;
            });
        }
    }

    let last_reconcile = Arc::new(Mutex::new(None));

    // Spawn background worker if an interval is configured
    if let Some(interval_secs) = config.reconcile_interval_secs {
        let worker_store = store.clone();
        let worker_resolver = resolver.clone();
        let worker_last = last_reconcile.clone();
        let expiry_minutes = config.expiry_minutes;
        let concurrency = config.reconcile_concurrency;
        tokio::spawn(async move {
            worker::run_worker(
                worker_store,
                worker_resolver,
                interval_secs,
                expiry_minutes,
                concurrency,
                worker_last,
            )
            .await;
        });
    } else {
        log::info!("RECONCILE_INTERVAL_SECS not set, reconciliation runs only via /cron");
    }

    let state = Arc::new(AppState {
        caps,
        start_time: Instant::now(),
        mode: config.mode.as_str().to_string(),
        expiry_minutes: config.expiry_minutes,
        reconcile_concurrency: config.reconcile_concurrency,
        reconcile_interval_secs: config.reconcile_interval_secs,
        last_reconcile,
        webhook_secret: config.webhook_secret.clone(),
        cron_secret: config.cron_secret.clone(),
    });

    let app = routes::build_router(state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    log::info!(
        "Media Mirror Service ({}, {} store) listening on http://{}",
        config.mode.as_str(),
        config.store_backend(),
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Media Mirror Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}
