//! Queue Worker Service
//!
//! Hosts the message handlers in [`processors`] and drains their queues
//! whenever the broker signals a push.
//!
//! ## Architecture
//!
//! ```text
//! Producer ──LPUSH──▶ {Type}.priorityq / {Type}.inq
//!                         │  PUBLISH mq:topic:in
//!                         ▼
//!                  MessagingHost::run
//!                         │  start() per wake-up
//!                         ▼
//!              Handler<Type, Processor> ──▶ {Type}.outq / {Type}.dlq
//! ```
//!
//! ## Configuration
//!
//! - `MQ_BROKER`: `redis` (default) or `memory`
//! - `REDIS_URL` / `REDIS_HOST`, `REDIS_DATABASE`: broker connection
//! - `MQ_RETRY_LIMIT`, `MQ_REQUEST_TIMEOUT_MS`, `MQ_MAX_SUCCESS_QUEUE_SIZE`,
//!   `MQ_POLL_INTERVAL_MS`, `MQ_IDLE_WAKE_INTERVAL_MS`, `MQ_PUBLISH_TO_OUTQ`
//! - `MQ_WORKER_HEALTH_PORT` / `HEALTH_PORT`: health server (default 8083)
//! - `APP_ENV`, `RUST_LOG`: log format and filter

pub mod config;
pub mod health;
pub mod metrics;
pub mod processors;

use crate::config::{BrokerKind, WorkerConfig};
use crate::health::{HealthState, health_router};
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use messaging::{Broker, MemoryBroker, MessagingHost, MqConfig, QueueClient, RedisBroker};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Start the health and admin HTTP server
async fn start_health_server(state: HealthState, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, health_router(state))
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

async fn connect_broker(kind: BrokerKind) -> Result<Arc<dyn Broker>> {
    match kind {
        BrokerKind::Redis => {
            let redis_config =
                RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
            info!("Connecting to Redis...");
            let broker = RedisBroker::connect(&redis_config.connection_url())
                .await
                .wrap_err("Failed to connect to Redis")?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            info!("Using in-memory broker, queues are lost on exit");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

/// Run the queue worker
///
/// 1. Sets up error reports, logging and the Prometheus recorder
/// 2. Connects the configured broker
/// 3. Registers the processors and starts the health server
/// 4. Drains queues on every wake-up until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, the broker cannot be
/// reached, or the host loses its wake-up subscription.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics()?;

    info!(name = %APP_NAME, version = %APP_VERSION, environment = ?environment, "Starting queue worker");

    let worker_config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let mq_config = MqConfig::from_env().wrap_err("Failed to load queue configuration")?;
    info!(
        broker = %worker_config.broker,
        retry_limit = mq_config.retry_limit,
        max_success_queue_size = mq_config.max_success_queue_size,
        publish_to_outq = mq_config.publish_to_outq,
        "Worker configuration loaded"
    );

    let broker = connect_broker(worker_config.broker).await?;
    let mut host = MessagingHost::new(QueueClient::new(broker, mq_config));
    processors::register_all(&mut host).wrap_err("Failed to register handlers")?;
    let host = Arc::new(host);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(host.clone(), APP_NAME, APP_VERSION);
    let health_port = worker_config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    host.clone()
        .run(shutdown_rx)
        .await
        .wrap_err("Messaging host failed")?;

    info!(stats = %host.stats_description().await.unwrap_or_default(), "Queue worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
