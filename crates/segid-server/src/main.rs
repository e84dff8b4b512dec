#![doc = include_str!("../README.md")]

mod config;
mod error;
mod handler;
mod store;
mod telemetry;

use clap::Parser;
use config::{CliArgs, ServerConfig};
use core::time::Duration;
use handler::{AppState, Generator, router};
use segid::SegmentIdGenerator;
use store::ServerStore;
use telemetry::init_telemetry;
use tokio::{net::TcpListener, signal, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let store = ServerStore::open(config.store_path.as_deref())?;
    for record in &config.seed_tags {
        if store.ensure_tag(record.clone())? {
            tracing::info!(tag = %record.tag, step = record.step, "seeded business tag");
        }
    }

    let generator = SegmentIdGenerator::new(store, config.generator.clone())?;
    let generator = tokio::task::spawn_blocking(move || generator.init().map(|_| generator)).await??;

    let shutdown = CancellationToken::new();
    let refresher = tokio::spawn(refresh_tags(
        generator.clone(),
        config.refresh_interval,
        shutdown.clone(),
    ));

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config, &generator);

    axum::serve(listener, router(AppState::new(generator)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    refresher.await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig, generator: &Generator) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ID service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting ID service on {} with a {} store and {} tags",
            config.server_addr,
            generator.store().kind(),
            generator.registry().len()
        );
    }
}

/// Periodically mirrors the store's tag list into the registry until
/// `shutdown` fires.
async fn refresh_tags(generator: Generator, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and startup already synced.
    interval.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let refresher = generator.clone();
        match tokio::task::spawn_blocking(move || refresher.refresh_tags()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to refresh business tags"),
            Err(e) => tracing::error!(error = %e, "tag refresh task failed"),
        }
    }

    tracing::debug!("tag refresh stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
