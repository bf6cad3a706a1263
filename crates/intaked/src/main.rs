//! Intake Daemon - ingestion health monitor
//!
//! Loads the CV repository, wires the metadata store, holiday calendar and
//! reasoning oracle, and serves analyses over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use intake_common::config::OracleBackend;
use intake_common::{CvRepository, IntakeConfig, JsonDirStore, StaticCalendar};
use intaked::orchestrator::{Analyzer, ChatOracle};
use intaked::server::{self, AppState};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "intaked", version, about = "Ingestion health monitor daemon")]
struct Args {
    /// Config file (defaults to $INTAKE_CONFIG, then /etc/intake/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    let args = Args::parse();
    let mut config = IntakeConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    info!("Intake Daemon v{} starting", intake_common::VERSION);

    let repo = CvRepository::load_dir(&config.data.cv_dir, &config.detection)
        .with_context(|| format!("loading CVs from {}", config.data.cv_dir.display()))?;
    info!("  Loaded {} CV(s) from {}", repo.len(), config.data.cv_dir.display());
    let repo = Arc::new(repo);

    let store = Arc::new(JsonDirStore::new(config.data.data_dir.clone()));
    let calendar = Arc::new(StaticCalendar::from_config(&config.calendar));

    let mut analyzer = Analyzer::new(Arc::clone(&repo), store, calendar).with_agent(config.agent.clone());
    if config.oracle.backend == OracleBackend::Disabled {
        info!("  Oracle disabled; every run uses pipeline mode");
    } else {
        match ChatOracle::from_config(&config.oracle) {
            Ok(oracle) => {
                info!("  Oracle: {} at {}", config.oracle.model, config.oracle.url);
                analyzer = analyzer.with_oracle(Arc::new(oracle), config.oracle.clone());
            }
            Err(e) => warn!("[!]  Oracle unavailable ({}); every run uses pipeline mode", e),
        }
    }

    server::run(AppState::new(analyzer, repo, config)).await
}
