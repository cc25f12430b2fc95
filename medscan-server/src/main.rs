//! medscan-server - Scan workflow orchestration service
//!
//! Serves the classification, feedback and annotation API over HTTP and the
//! stored artifacts under `/files`.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medscan_common::config::{self, RootLayout, TomlConfig};
use medscan_common::events::EventBus;
use medscan_common::StoragePathResolver;
use medscan_server::{AppState, EVENT_BUS_CAPACITY};

/// Command-line arguments for medscan-server
#[derive(Parser, Debug)]
#[command(name = "medscan-server")]
#[command(about = "Scan classification and annotation service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MEDSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database and artifact storage
    #[arg(short, long, env = "MEDSCAN_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "MEDSCAN_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long, env = "MEDSCAN_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!(
        "medscan-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    let layout = RootLayout::new(root_folder);
    layout
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", layout.root_folder.display());

    let paths = StoragePathResolver::new(layout.storage_root());
    paths
        .ensure_layout()
        .context("Failed to initialize artifact storage")?;
    info!("Artifact storage: {}", paths.root().display());

    let db_path = layout.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = medscan_server::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    info!(
        "Classifier: {} {:?} (timeout {}s, {} attempt(s))",
        config.classifier.program,
        config.classifier.args,
        config.classifier.timeout_secs,
        config.classifier.max_attempts
    );
    info!(
        "Compositor: {} {:?} (timeout {}s)",
        config.compositor.program, config.compositor.args, config.compositor.timeout_secs
    );

    let state = AppState::new(db_pool, paths, &config, event_bus);
    let app = medscan_server::build_router(state);

    let port = args.port.unwrap_or(config.port);
    let bind = args.bind.unwrap_or_else(|| config.bind_address.clone());
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("medscan-server stopped");
    Ok(())
}

/// Initialize tracing from `[logging]`; `RUST_LOG` takes precedence
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "medscan_server={level},medscan_common={level},tower_http=info",
            level = config.logging.level
        )
        .into()
    });

    match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
