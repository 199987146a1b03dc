//! encodeq API server
//!
//! Recovers the job store, starts the dispatcher and serves the ingress API
//! until Ctrl-C or SIGTERM.

use anyhow::Context;
use clap::Parser;
use encodeq_api::{AppState, routes};
use encodeq_config::ServiceConfig;
use encodeq_core::NameGenerator;
use encodeq_executor::ScriptExecutor;
use encodeq_scheduler::{DispatchSettings, Dispatcher};
use encodeq_store::{FileJobStore, JobStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "encodeq-server")]
#[command(about = "Durable encoding job queue server", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the service configuration
    #[arg(short, long, env = "ENCODEQ_CONFIG", default_value = "encodeq.kdl")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Seconds to wait for running jobs on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config
        .paths
        .create_all()
        .context("failed to create data directories")?;

    // Any recovery error, corruption included, stops startup here.
    let store = Arc::new(FileJobStore::new(
        &config.paths.queue_dir,
        Arc::new(NameGenerator::new()),
    ));
    let report = store.recover().await.context("failed to recover job store")?;
    info!(
        queued = report.queued,
        requeued = report.requeued.len(),
        completed = report.completed,
        failed = report.failed,
        next_id = %report.next_id,
        "Job store recovered"
    );
    let store: Arc<dyn JobStore> = store;

    let executor = Arc::new(ScriptExecutor::new(
        &config.execution.interpreter,
        &config.execution.script,
    ));
    let dispatcher = Dispatcher::start(
        store.clone(),
        executor,
        DispatchSettings::from(&config),
    );

    let state = AppState::new(store.clone()).with_dispatch(dispatcher.handle());

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher
        .shutdown(Duration::from_secs(args.shutdown_grace_secs))
        .await;
    store.close().await.context("failed to close job store")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
