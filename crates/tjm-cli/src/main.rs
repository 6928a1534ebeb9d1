use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tjm_etl::{reports, EtlConfig, EtlPipeline, StandardTransformer};
use tjm_storage::{InMemoryOfferStore, OfferStore, PgOfferStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "tjm_cli=info,tjm_etl=info,tjm_storage=info,tjm_adapters=info,tjm_web=info";

#[derive(Debug, Parser)]
#[command(name = "tjm-cli")]
#[command(about = "Freelance daily-rate offer ETL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one batch over the source directory and load accepted offers.
    Run {
        #[arg(long)]
        source_dir: Option<PathBuf>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        min_quality: Option<f64>,
        /// Load into an in-memory store instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    /// Transform and score one file, print the quality report, load nothing.
    Score {
        file: PathBuf,
        #[arg(long)]
        min_quality: Option<f64>,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the read API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn connect_store(config: &EtlConfig) -> Result<PgOfferStore> {
    PgOfferStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to Postgres")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = EtlConfig::from_env();

    match cli.command.unwrap_or(Commands::Run {
        source_dir: None,
        pattern: None,
        min_quality: None,
        dry_run: false,
    }) {
        Commands::Run {
            source_dir,
            pattern,
            min_quality,
            dry_run,
        } => {
            if let Some(dir) = source_dir {
                config.source_dir = dir;
            }
            if let Some(pattern) = pattern {
                config.file_pattern = pattern;
            }
            if let Some(min) = min_quality {
                config.min_quality = min.clamp(0.0, 1.0);
            }

            let store: Arc<dyn OfferStore> = if dry_run {
                Arc::new(InMemoryOfferStore::new())
            } else {
                let store = connect_store(&config).await?;
                store.migrate().await.context("applying migrations")?;
                Arc::new(store)
            };

            let summary = EtlPipeline::new(config, store)?.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Score { file, min_quality } => {
            let min_quality = min_quality.unwrap_or(config.min_quality).clamp(0.0, 1.0);
            let transformer = StandardTransformer::builtin()?;
            let (extracted, scored) = tjm_etl::score_source_file(&transformer, &file)?;
            let header = vec![
                format!("File: `{}`", file.display()),
                format!("Extractor: {}", extracted.extractor),
                format!(
                    "Lines read: {}, records: {}, rejected lines: {}",
                    extracted.lines_read,
                    extracted.records.len(),
                    extracted.rejected.len()
                ),
                format!("Transform failures: {}", scored.failures.len()),
            ];
            let markdown =
                reports::render_quality_report("TJM Quality Report", &header, &scored.offers, min_quality);
            println!("{markdown}");
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Serve { port } => {
            let store = connect_store(&config).await?;
            let state = tjm_web::AppState::with_builtin_catalog(Arc::new(store))?;
            tjm_web::serve(port.unwrap_or_else(tjm_web::port_from_env), state).await?;
        }
    }

    Ok(())
}
