pub mod auth;
pub mod db;
pub mod metrics;
pub mod mirror;
pub mod service;
pub mod settings;
pub mod store;
pub mod timer;
mod utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use auth::AuthState;
use db::Database;
use mirror::FileMirror;
use service::MetricsService;
use settings::{debug_mode_from_env, SettingsStore};
use store::SqliteMetricsStore;
use timer::{
    commands::{execute, HostCommand},
    FlushOutcome, TimerController,
};

pub const DATA_DIR_ENV: &str = "STUDYTIMER_DATA_DIR";
const DEFAULT_DATA_DIR: &str = ".studytimer";

pub struct AppState {
    pub auth: AuthState,
    pub timer: TimerController,
    pub metrics: MetricsService,
    pub settings: SettingsStore,
}

impl AppState {
    /// Opens the stores under `data_dir` and wires the timer to them.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let database = Database::new(data_dir.join("studytimer.sqlite3"))?;
        let store = Arc::new(SqliteMetricsStore::new(database));
        let mirror = Arc::new(FileMirror::new(data_dir.join("mirror"))?);

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let mut timer_settings = settings.timer();
        if debug_mode_from_env() {
            timer_settings = timer_settings.debug();
        }

        Ok(Self {
            auth: AuthState::new(),
            timer: TimerController::new(store.clone(), mirror, timer_settings),
            metrics: MetricsService::new(store),
            settings,
        })
    }
}

fn data_dir_from_env() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("studytimer starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(data_dir_from_env()))
}

async fn serve(data_dir: PathBuf) -> Result<()> {
    let app = AppState::open(&data_dir)?;
    info!("Using data directory {}", data_dir.display());
    app.timer.start(app.auth.subscribe()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<HostCommand>() {
                    Ok(HostCommand::Quit) => break,
                    Ok(command) => match execute(&app, command).await {
                        Ok(reply) => println!("{reply}"),
                        Err(err) => eprintln!("error: {err:#}"),
                    },
                    Err(err) => eprintln!("error: {err:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }
        }
    }

    if let FlushOutcome::Failed = app.timer.stop().await {
        warn!("Final flush failed; unflushed time stays in the local mirror");
    }
    Ok(())
}
