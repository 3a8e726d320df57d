use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use warden_core::config::{BackendKind, WardenConfig};
use warden_core::WardenError;
use warden_scheduler::{
    ExecutionBackend, LiveScheduler, MemoryExecutionBackend, MemoryLiveScheduler,
    RedisLiveScheduler, RedisQueueBackend,
};

mod app;
mod auth;
mod http;


#[derive(Debug, Parser)]
#[command(name = "warden-gateway", version, about = "Task schedule management API")]
struct Args {
    /// Path to warden.toml (defaults to ~/.warden/warden.toml).
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_gateway=info,warden_scheduler=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = WardenConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        WardenConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // single SQLite file for catalog, schedules and request audit
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let db = open_db(&db_path)?;
    warden_catalog::db::init_db(&db)?;
    warden_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    let live = build_live(&config).await?;
    let backend = build_backend(&config).await?;

    let conns = app::Connections {
        catalog: open_db(&db_path)?,
        schedules: open_db(&db_path)?,
        requests: open_db(&db_path)?,
    };
    let state = Arc::new(app::AppState::new(config, conns, live, backend));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Warden gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Warden gateway stopped");
    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

async fn build_live(config: &WardenConfig) -> anyhow::Result<Arc<dyn LiveScheduler>> {
    let live = &config.live;
    match live.backend {
        BackendKind::Memory => {
            warn!("live scheduler is in-memory; schedules will not fire and are lost on restart");
            Ok(Arc::new(MemoryLiveScheduler::new(live.key_prefix.clone())))
        }
        BackendKind::Redis => {
            let url = live.redis_url.as_deref().ok_or_else(|| {
                WardenError::Config("live.redis_url is required for the redis backend".into())
            })?;
            Ok(Arc::new(
                RedisLiveScheduler::connect(url, live.key_prefix.clone()).await?,
            ))
        }
    }
}

async fn build_backend(config: &WardenConfig) -> anyhow::Result<Arc<dyn ExecutionBackend>> {
    let exec = &config.execution;
    match exec.backend {
        BackendKind::Memory => {
            warn!("execution backend is in-memory; ad-hoc jobs are recorded, not run");
            Ok(Arc::new(MemoryExecutionBackend::new()))
        }
        BackendKind::Redis => {
            let url = exec.redis_url.as_deref().ok_or_else(|| {
                WardenError::Config("execution.redis_url is required for the redis backend".into())
            })?;
            Ok(Arc::new(
                RedisQueueBackend::connect(url, exec.queue_prefix.clone(), exec.revoked_key.clone())
                    .await?,
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) -> warden_core::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
