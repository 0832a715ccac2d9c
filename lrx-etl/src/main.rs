//! lrx-etl - Streaming ETL normalization service
//!
//! Startup sequence: tracing, root folder resolution, database init,
//! parameter load, event bus, worker pool, reconciler, status server.
//! Shutdown on ctrl-c cancels the workers and the reconciler; in-flight
//! leases expire back to the queue and redeliver safely.

use anyhow::Result;
use clap::Parser;
use lrx_common::config::{FileConfig, RootFolderInitializer, RootFolderResolver};
use lrx_common::db::init::init_database;
use lrx_common::db::settings::EtlParams;
use lrx_common::events::EventBus;
use lrx_etl::reconciler::Reconciler;
use lrx_etl::worker::spawn_workers;
use lrx_etl::AppState;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lrx-etl", about = "LRX streaming ETL normalization service")]
struct Args {
    /// Root folder holding the LRX database (overrides LRX_ROOT and config file)
    #[arg(long)]
    root_folder: Option<String>,

    /// Port for the read-only status API
    #[arg(long, default_value_t = 5740)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting lrx-etl v{}", env!("CARGO_PKG_VERSION"));

    let resolver = RootFolderResolver::new(args.root_folder.clone());
    let file_config: FileConfig = resolver.file_config().clone();
    let root_folder = resolver.resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = init_database(
        &db_path,
        file_config.pool_max_connections,
        file_config.pool_min_connections,
    )
    .await?;
    info!("Database connection established");

    let params = EtlParams::load(&db_pool).await?;
    info!(
        workers = params.worker_count,
        batch_size = params.queue_batch_size,
        reconcile_interval_secs = params.reconcile_interval_secs,
        "Parameters loaded"
    );

    let event_bus = EventBus::new(1000);
    let cancel_token = CancellationToken::new();

    let worker_handles = spawn_workers(db_pool.clone(), &params, &event_bus, &cancel_token);

    let reconciler = Reconciler::new(db_pool.clone(), params.clone(), event_bus.clone());
    let reconciler_handle = tokio::spawn(reconciler.run(cancel_token.clone()));

    let state = AppState::new(db_pool, event_bus);
    let app = lrx_etl::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("Status API listening on http://127.0.0.1:{}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    cancel_token.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = reconciler_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
