//! retail-etl - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retail_common::logging::{init_logging, LogConfig, LogLevel};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use retail_etl::{
    config::EtlConfig,
    db::{self, DbConfig},
    pipeline::{FileOutcome, Pipeline},
    store::PgSalesStore,
    vocabulary, FileId, LoadOutcome, Loader, Reconciler, Transformer,
};

/// Incremental retail sales ingestion
#[derive(Parser, Debug)]
#[command(name = "retail-etl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List raw files that have not been loaded yet
    Pending,

    /// Transform one raw file into cleaned staging
    Transform {
        /// File identifier (name without `.csv`)
        id: FileId,
    },

    /// Load one cleaned file into the destination table
    Load {
        /// File identifier (name without `.csv`)
        id: FileId,
    },

    /// Reconcile, transform and load every pending file
    Run {
        /// Files processed in parallel (overrides RETAIL_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Create the destination and registry tables
    Migrate,

    /// Manage the category vocabulary
    #[command(subcommand)]
    Vocabulary(VocabularyCommand),
}

#[derive(Subcommand, Debug)]
enum VocabularyCommand {
    /// Append categorical values found in raw staging and save the vocabulary file
    Build,

    /// Print the vocabulary in effect
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("retail-etl")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    match execute_command(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

async fn connect_store() -> Result<Arc<PgSalesStore>> {
    let db_config = DbConfig::from_env()?;
    let pool = db::create_pool(&db_config)
        .await
        .context("Failed to connect to the destination database")?;
    db::health_check(&pool).await?;
    Ok(Arc::new(PgSalesStore::new(pool)))
}

async fn execute_command(command: Commands) -> Result<ExitCode> {
    let config = EtlConfig::load()?;

    match command {
        Commands::Pending => {
            let (raw, _) = config.staging().await?;
            let reconciler = Reconciler::new(raw, connect_store().await?);
            for id in reconciler.pending_files().await? {
                println!("{}", id);
            }
        },

        Commands::Transform { id } => {
            let (raw, cleaned) = config.staging().await?;
            let transformer = Transformer::new(raw, cleaned, config.transform_settings().await?);
            let report = transformer.transform(&id).await?;
            println!(
                "{}: {} rows read, {} dropped, {} written",
                report.file, report.rows_read, report.rows_dropped, report.rows_written
            );
        },

        Commands::Load { id } => {
            let (_, cleaned) = config.staging().await?;
            let loader = Loader::new(cleaned, connect_store().await?);
            match loader.load(&id).await? {
                LoadOutcome::Loaded { file, rows } => println!("{}: loaded {} rows", file, rows),
                LoadOutcome::AlreadyLoaded { file } => println!("{}: already loaded", file),
            }
        },

        Commands::Run { concurrency } => {
            let (raw, cleaned) = config.staging().await?;
            let settings = config.transform_settings().await?;
            let pipeline = Pipeline::new(raw, cleaned, connect_store().await?, settings)
                .with_concurrency(concurrency.unwrap_or(config.concurrency));

            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing files in flight");
                    signal_token.cancel();
                }
            });

            let report = pipeline.run(&cancel).await?;
            for outcome in &report.outcomes {
                match outcome {
                    FileOutcome::Loaded { file, rows, rows_dropped } => {
                        println!("loaded   {} ({} rows, {} dropped)", file, rows, rows_dropped)
                    },
                    FileOutcome::AlreadyLoaded { file } => println!("skipped  {} (already loaded)", file),
                    FileOutcome::Failed { file, stage, error } => {
                        println!("failed   {} at {}: {}", file, stage, error)
                    },
                }
            }
            for file in &report.not_scheduled {
                println!("pending  {} (not started)", file);
            }
            println!(
                "{} files loaded, {} rows in {:.1}s",
                report.loaded().count(),
                report.rows_loaded(),
                report.duration_secs()
            );

            if !report.is_clean() {
                return Ok(ExitCode::from(2));
            }
        },

        Commands::Migrate => {
            let db_config = DbConfig::from_env()?;
            let pool = db::create_pool(&db_config).await?;
            db::run_migrations(&pool).await?;
            println!("Migrations applied");
        },

        Commands::Vocabulary(VocabularyCommand::Build) => {
            let (raw, _) = config.staging().await?;
            let settings = config.transform_settings().await?;
            let mut vocab = settings.vocabulary.as_ref().clone();

            let build = vocabulary::build_from_staging(raw.as_ref(), &settings, &mut vocab).await?;
            vocab.save(&config.vocabulary_path).await?;

            info!(
                files = build.files_scanned,
                skipped = build.files_skipped.len(),
                added = build.total_added(),
                "Vocabulary build finished"
            );
            for (column, added) in &build.added {
                println!("{}: {} new values", column, added);
            }
            println!(
                "Saved {} ({} files scanned, {} skipped)",
                config.vocabulary_path.display(),
                build.files_scanned,
                build.files_skipped.len()
            );
        },

        Commands::Vocabulary(VocabularyCommand::Show) => {
            print!("{}", config.vocabulary().await?.to_toml_string()?);
        },
    }

    Ok(ExitCode::SUCCESS)
}
