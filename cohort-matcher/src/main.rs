//! cohort-matcher - periodic match scoring and weekly group formation
//!
//! Intended to be invoked by a scheduler. Every run is safe to repeat: the
//! exit status is zero whenever the run completes, even if individual pairs or
//! members failed (they are retried by the next run).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cohort_common::config::{self, TomlConfig};
use cohort_common::db::init_database;
use cohort_matcher::scorer::{CompatibilityScorer, HttpScorer};
use cohort_matcher::store::SqliteStore;
use cohort_matcher::{MatchingPipeline, Phases, PipelineParams};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cohort-matcher", version, about = "Score member pairs and form weekly cohort groups")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "COHORT_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database (overrides COHORT_ROOT_FOLDER and TOML)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Database file (overrides the root folder default)
    #[arg(long, env = "COHORT_DATABASE")]
    database: Option<PathBuf>,

    /// Compatibility scorer endpoint (overrides TOML)
    #[arg(long, env = "COHORT_SCORER_ENDPOINT")]
    scorer_endpoint: Option<String>,

    /// Seed for the allocation shuffle, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Log level when RUST_LOG is not set (overrides TOML)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Score, promote, then form groups (default)
    Run,
    /// Score unmatched pairs only
    Score,
    /// Promote top pending matches only
    Promote,
    /// Form groups for the current week only
    Group,
}

impl Command {
    fn phases(self) -> Phases {
        match self {
            Command::Run => Phases::ALL,
            Command::Score => Phases::SCORE,
            Command::Promote => Phases::PROMOTE,
            Command::Group => Phases::GROUP,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = match cli.config.clone().or_else(config::default_config_path) {
        Some(path) => TomlConfig::load(&path)?,
        None => TomlConfig::default(),
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!(
        "Starting cohort-matcher v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = config::resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    let db_path = config::resolve_database_path(cli.database.as_deref(), &toml_config, &root_folder);
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let params = PipelineParams::load(&pool).await?;

    let phases = cli.command.unwrap_or(Command::Run).phases();

    let endpoint = cli.scorer_endpoint.clone().or_else(|| toml_config.scorer.endpoint.clone());
    let scorer: Option<Arc<dyn CompatibilityScorer>> = match endpoint {
        Some(endpoint) => {
            let scorer = HttpScorer::new(
                endpoint,
                toml_config.scorer.api_token.clone(),
                Duration::from_millis(params.scorer_timeout_ms),
            )?;
            info!("Compatibility scorer: {}", scorer.endpoint());
            Some(Arc::new(scorer) as Arc<dyn CompatibilityScorer>)
        }
        None if phases.score => {
            bail!("No scorer endpoint configured (use --scorer-endpoint, COHORT_SCORER_ENDPOINT or [scorer] endpoint)")
        }
        None => None,
    };

    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let mut pipeline = MatchingPipeline::from_store(store, scorer, &params, rng);
    let summary = pipeline.run(phases).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    pool.close().await;
    Ok(())
}
