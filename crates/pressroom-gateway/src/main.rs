use std::sync::Arc;

use clap::Parser;
use pressroom_core::config::PressroomConfig;
use pressroom_core::types::format_timestamp;
use pressroom_scheduler::{Scheduler, SchedulerEngine, SqliteStore};
use tracing::info;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pressroom_gateway=info,pressroom_scheduler=info,pressroom_channels=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > PRESSROOM_CONFIG env > ~/.pressroom/pressroom.toml
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("PRESSROOM_CONFIG").ok());
    let config = PressroomConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        PressroomConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(db_path)?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(store, &config).await,
        Command::Tick => tick(store, &config).await,
        Command::Upcoming { limit } => upcoming(&store, limit),
    }
}

fn build_engine(store: Arc<SqliteStore>, config: &PressroomConfig) -> anyhow::Result<SchedulerEngine> {
    let transport = pressroom_channels::build_transport(&config.transport)?;
    Ok(SchedulerEngine::new(store, transport, &config.dispatch))
}

async fn run(store: Arc<SqliteStore>, config: &PressroomConfig) -> anyhow::Result<()> {
    let engine = build_engine(store, config)?;
    let mut scheduler = Scheduler::new(engine, &config.scheduler);

    scheduler.start();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("PRESSROOM_GIT_SHA"),
        "pressroomd running"
    );

    shutdown_signal().await?;
    info!("shutdown requested; waiting for in-flight work");
    scheduler.stop().await;
    Ok(())
}

async fn tick(store: Arc<SqliteStore>, config: &PressroomConfig) -> anyhow::Result<()> {
    let engine = build_engine(store, config)?;
    let report = engine.run_tick(None).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn upcoming(store: &SqliteStore, limit: usize) -> anyhow::Result<()> {
    let items = store.upcoming_content(chrono::Utc::now(), limit)?;
    if items.is_empty() {
        println!("no upcoming content");
        return Ok(());
    }
    for item in items {
        println!(
            "{}  {}  {}",
            format_timestamp(item.scheduled_at),
            item.slug,
            item.title
        );
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
