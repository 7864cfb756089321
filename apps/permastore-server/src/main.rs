//! Permastore Server
//!
//! HTTP gateway that packages files into BagIt archives, stores them on a
//! permanent ledger and validates them on the way back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use permastore_server::config::Config;
use permastore_server::ledger::{HttpLedgerClient, LedgerClient};
use permastore_server::usage::{HttpSink, LogSink, UsageReporter, UsageSink};
use permastore_server::{create_router, AppState};

const USAGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "permastore_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Permastore Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Ledger API: {}", config.ledger.api_url);
    tracing::info!(
        "Archives are {} after upload",
        if config.packaging.retain_archives {
            "retained"
        } else {
            "deleted"
        }
    );

    let ledger: Arc<dyn LedgerClient> = Arc::new(
        HttpLedgerClient::new(&config.ledger.api_url, config.ledger.timeout())
            .context("Failed to initialize ledger client")?,
    );

    // Usage events are forwarded off the request path
    let sink: Arc<dyn UsageSink> = match &config.usage.sink_url {
        Some(url) => {
            tracing::info!("Usage events posted to {}", url);
            Arc::new(
                HttpSink::new(url.clone(), config.ledger.timeout())
                    .context("Failed to initialize usage sink")?,
            )
        }
        None => Arc::new(LogSink),
    };
    let (usage, usage_task) = UsageReporter::spawn(sink, config.usage.queue_capacity);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app = create_router(AppState::new(config, ledger, usage));

    // Start server with graceful shutdown
    tracing::info!("Permastore Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router owned the last reporter, so the forwarder drains and stops
    match tokio::time::timeout(USAGE_DRAIN_TIMEOUT, usage_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Usage forwarder ended abnormally: {}", e),
        Err(_) => tracing::warn!("Usage forwarder did not drain in time"),
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
