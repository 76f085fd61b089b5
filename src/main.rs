//! bleepstore -- S3-compatible object storage gateway.
//!
//! Crash-only design: every startup is a recovery. There is no separate
//! recovery mode. SIGTERM/SIGINT handlers only stop accepting connections
//! and wait with a timeout before exiting -- no cleanup.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

/// Command-line arguments for the bleepstore server.
#[derive(Parser, Debug)]
#[command(
    name = "bleepstore",
    version,
    about = "S3-compatible object storage server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bleepstore.example.yaml")]
    config: String,

    /// Override the data-plane bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("loading configuration from {}", cli.config);
    let config = bleepstore::config::load_config(&cli.config)?;

    let data_plane_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let admin_addr = format!("{}:{}", config.admin.host, config.admin.port);
    let monitor_flush_interval = Duration::from_secs(config.admin.monitor_flush_seconds.max(1));

    // Crash-only startup: every startup IS recovery.
    info!("crash-only startup: performing recovery checks");

    bleepstore::metrics::init_metrics();
    bleepstore::metrics::describe_metrics();
    info!("prometheus metrics initialized");

    let auth = config.auth.clone();
    let state = Arc::new(bleepstore::AppState::new(config)?);

    // Seed the bootstrap credential from config (crash-only: idempotent on
    // every startup -- a record that already exists is left untouched).
    let bootstrap_user = state
        .store
        .seed_user(&auth.access_key, &auth.secret_key, &auth.display_name)
        .await?;
    info!(
        access_key = %bootstrap_user.access_key,
        "bootstrap credential seeded"
    );

    let monitor_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(monitor_flush_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = monitor_state.monitor.flush(&monitor_state.store).await {
                tracing::warn!(error = %e, "monitor flush failed");
            }
        }
    });

    let data_plane_listener = tokio::net::TcpListener::bind(&data_plane_addr).await?;
    info!("data plane listening on {}", data_plane_addr);
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr).await?;
    info!("admin surface listening on {}", admin_addr);

    let data_plane_app = bleepstore::server::data_plane_app(state.clone());
    let admin_app = bleepstore::server::admin_app(state);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections,
    // wait for in-flight requests to complete, then exit. No cleanup --
    // crash-only design means the next startup handles recovery.
    let data_plane_server = axum::serve(data_plane_listener, data_plane_app)
        .with_graceful_shutdown(shutdown_signal());
    let admin_server = axum::serve(admin_listener, admin_app).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { data_plane_server.await.map_err(anyhow::Error::from) },
        async { admin_server.await.map_err(anyhow::Error::from) },
    )?;

    info!("bleepstore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        },
    }
}
