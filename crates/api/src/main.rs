use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datalabel_api::config::ServerConfig;
use datalabel_api::router::build_app_router;
use datalabel_api::state::AppState;
use datalabel_db::store::{MemoryStore, PgStore, Store};
use datalabel_pipeline::health_monitor;
use datalabel_pipeline::render::ComfyRenderer;
use datalabel_pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "datalabel_api=debug,datalabel_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Store ---
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = datalabel_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            datalabel_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            datalabel_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database ready, migrations applied");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on exit)");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Pipeline ---
    let renderer = Arc::new(ComfyRenderer::new(config.pipeline.render_timeout));
    let pipeline = Pipeline::new(Arc::clone(&store), renderer, config.pipeline.clone());

    let loaded = pipeline.workers.load().await?;
    let resumed = pipeline.tasks.resume_all().await?;
    tracing::info!(workers = loaded, tasks = resumed, "Pipeline started");

    let monitor_cancel = CancellationToken::new();
    let monitor_handle = tokio::spawn(health_monitor::run(
        Arc::clone(&pipeline.workers),
        config.pipeline.health_check_interval,
        monitor_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        store,
        config: Arc::new(config.clone()),
        pipeline: pipeline.clone(),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    monitor_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    tracing::info!("Health monitor stopped");

    if tokio::time::timeout(drain, pipeline.tasks.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = drain.as_secs(),
            "Renders still in flight at shutdown; their tasks resume on next start",
        );
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
