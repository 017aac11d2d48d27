#![doc = include_str!("../README.md")]

mod config;
mod index;
mod load;
mod telemetry;

use clap::Parser;
use config::{BenchConfig, CliArgs};
use index::MemoryIndex;
use pinpool::{PoolConfig, ThreadPool, ThreadedReader};
use std::{sync::Arc, time::Instant};
use telemetry::init_telemetry;
use tokio::signal;
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
    let config = BenchConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    let pool = ThreadPool::with_parent_token(
        PoolConfig::new(config.num_threads).with_thread_name(config.thread_name.clone()),
        providers.pool_metrics(),
        &shutdown,
    )?;
    let reader = ThreadedReader::new(
        Arc::new(pool),
        MemoryIndex::new(config.num_labels, config.lookup_delay),
    );

    let _version = reader.index_version().await?;
    #[cfg(feature = "tracing")]
    tracing::info!("Opened synthetic index (version {})", _version);

    let started = Instant::now();
    let load_stop = shutdown.child_token();
    let (mut loops, stats) = load::spawn(&reader, config.concurrency, config.num_labels, &load_stop);

    tokio::select! {
        () = shutdown_signal() => {},
        () = run_for(config.duration) => {
            #[cfg(feature = "tracing")]
            tracing::info!("Load duration elapsed");
        },
    }

    // Callers go first so the close below is the last task the pool runs.
    load_stop.cancel();
    while let Some(res) = loops.join_next().await {
        res?;
    }
    reader.close().await?;
    shutdown.cancel();
    reader.pool().stop_and_wait().await;

    let elapsed = started.elapsed();
    let completed = stats.completed();
    #[cfg(feature = "tracing")]
    tracing::info!(
        "Completed {} lookups in {:.2?} ({:.0}/s), {} index errors, {} rejected at shutdown",
        completed,
        elapsed,
        completed as f64 / elapsed.as_secs_f64(),
        stats.failed(),
        stats.rejected()
    );
    #[cfg(not(feature = "tracing"))]
    println!(
        "completed={completed} failed={} rejected={} elapsed={elapsed:.2?}",
        stats.failed(),
        stats.rejected()
    );

    providers.shutdown();
    Ok(())
}

fn log_startup_info(_config: &BenchConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting load driver with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting load driver: {} pinned threads, {} callers",
            _config.num_threads,
            _config.concurrency
        );
    }
}

async fn run_for(duration: Option<core::time::Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
