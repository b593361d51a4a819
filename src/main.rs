//! Titan-AAS server entry point.
//!
//! Wires the configured backends (PostgreSQL + Redis, or the embedded
//! standalone mode), starts the background machinery, and serves the HTTP
//! API until interrupted.

use titan_aas::api::Core;
use titan_aas::config::TitanConfig;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("TITAN_LOG_JSON").is_ok() {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = TitanConfig::from_env();
    tracing::info!(version = titan_aas::VERSION, "starting Titan-AAS");

    // Replica mode needs both backends; anything less runs embedded
    let standalone = std::env::var("TITAN_DATABASE_URL").is_err();
    let core = if standalone {
        tracing::warn!("no TITAN_DATABASE_URL set, running with embedded store and cache");
        Core::standalone(config.clone())
    } else {
        Core::connect(config.clone()).await?
    };

    core.start().await;

    let router = titan_aas::build_router(core.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(bind_address = %config.bind_address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    core.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
