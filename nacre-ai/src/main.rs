//! nacre-ai - NACRE row classification
//!
//! Classifies free-text purchase labels from a delimited file into NACRE
//! codes, records the conversion in the root folder database and manages the
//! catalog embedding index.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use nacre_ai::config::ClassifierSettings;
use nacre_ai::db::ConversionStore;
use nacre_ai::models::{CandidateSource, ConversionParameters, SchedulerKind};
use nacre_ai::orchestrator::{ProgressCallback, ProgressUpdate};
use nacre_ai::services::CsvRowSource;
use nacre_ai::AppState;
use nacre_common::config::{default_config_path, load_toml_config, resolve_root_folder, RootFolderInitializer};

/// Command-line arguments for nacre-ai
#[derive(Parser, Debug)]
#[command(name = "nacre-ai")]
#[command(about = "Classify purchase labels into NACRE codes")]
#[command(version)]
struct Args {
    /// Root folder holding the database and the embedding index
    #[arg(short, long, env = "NACRE_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config dir>/nacre/nacre-ai.toml)
    #[arg(short, long, env = "NACRE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify every row of a delimited file
    Classify {
        /// CSV file (`,`, `;` or tab separated)
        input: PathBuf,

        /// Column holding the label
        #[arg(short, long, default_value = "libelle")]
        label_column: String,

        /// Context columns (comma separated), e.g. fournisseur,compte,montant
        #[arg(long, value_delimiter = ',')]
        context: Vec<String>,

        /// Stop after this many source rows
        #[arg(long)]
        max_rows: Option<usize>,

        /// Rows per provider call (default from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Throughput preset: 1, 2 or 4
        #[arg(long, default_value_t = 1)]
        speed: u8,

        #[arg(long, value_enum, default_value_t = SchedulerKind::Bounded)]
        scheduler: SchedulerKind,

        #[arg(long, value_enum, default_value_t = CandidateSource::Fuzzy)]
        candidates: CandidateSource,

        /// Upload identifier recorded on the conversion (default: file name)
        #[arg(long)]
        upload_id: Option<String>,

        /// Write the final conversion with its rows as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Embedding index maintenance
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },

    /// Print one conversion as JSON
    Show {
        conversion_id: Uuid,

        /// Include row results
        #[arg(long)]
        rows: bool,
    },

    /// List conversions, newest first
    List,
}

#[derive(Subcommand, Debug)]
enum IndexCommand {
    /// Build the index, reusing a fresh persisted one unless forced
    Build {
        #[arg(long)]
        force: bool,
    },
    /// Print the index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path("nacre-ai")?,
    };
    let toml_config = load_toml_config(&config_path)?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nacre_ai={}", toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting nacre-ai {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    info!("Root folder: {}", root_folder.display());
    let initializer = RootFolderInitializer::new(root_folder);
    let settings = ClassifierSettings::resolve(&toml_config, &initializer.data_dir());

    let state = AppState::initialize(&initializer, settings).await?;
    info!(
        catalog = %state.catalog.path().display(),
        entries = state.catalog.current().len(),
        provider = state.engine.has_provider(),
        "Services initialized"
    );

    match args.command {
        Command::Classify {
            input,
            label_column,
            context,
            max_rows,
            batch_size,
            speed,
            scheduler,
            candidates,
            upload_id,
            output,
        } => {
            let mut params = ConversionParameters::new(label_column);
            params.context_columns = context;
            params.max_rows = max_rows;
            params.batch_size = batch_size.unwrap_or(state.settings.batch_size);
            params.speed = speed;
            params.scheduler = scheduler;
            params.candidate_source = candidates;
            params.max_candidates = state.settings.max_candidates;
            classify(&state, input, params, upload_id, output).await
        }
        Command::Index { command } => {
            let status = match command {
                IndexCommand::Build { force } => state.embeddings.build_or_load(force).await,
                IndexCommand::Status => state.embeddings.load_existing().await,
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Show { conversion_id, rows } => {
            let mut conversion = state
                .store
                .get(conversion_id)
                .await?
                .with_context(|| format!("Conversion {} not found", conversion_id))?;
            if !rows {
                conversion.rows.clear();
            }
            println!("{}", serde_json::to_string_pretty(&conversion)?);
            Ok(())
        }
        Command::List => {
            for conversion in state.store.list().await? {
                println!(
                    "{}  {:<10} {:>6}/{:<6} {}  {}",
                    conversion.id,
                    conversion.status.as_str(),
                    conversion.processed_rows,
                    conversion.total_rows,
                    conversion.created_at.format("%Y-%m-%d %H:%M:%S"),
                    conversion.upload_id
                );
            }
            Ok(())
        }
    }
}

async fn classify(
    state: &AppState,
    input: PathBuf,
    params: ConversionParameters,
    upload_id: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    if params.candidate_source == CandidateSource::Embedding {
        let status = state.embeddings.build_or_load(false).await;
        info!(state = status.state.as_str(), "Embedding index prepared");
    }

    let upload_id = upload_id.unwrap_or_else(|| {
        input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string())
    });

    let mut meta = Map::new();
    meta.insert("parameters".to_string(), serde_json::to_value(&params)?);
    meta.insert("source".to_string(), json!(input.display().to_string()));
    let conversion = state.store.create(&upload_id, meta).await?;
    let cancel = state.register_cancellation(conversion.id).await;

    let interrupt_state = state.clone();
    let conversion_id = conversion.id;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(conversion_id = %conversion_id, "Interrupted, cancelling conversion");
            interrupt_state.cancel(conversion_id).await;
        }
    });

    let progress: ProgressCallback = Arc::new(|update: ProgressUpdate| {
        info!(
            processed = update.items_processed,
            total = update.total_items,
            percentage = %format!("{:.1}", update.percentage()),
            rate = %format!("{:.2}", update.rate()),
            "Progress"
        );
    });

    let source = CsvRowSource::new(&input);
    let status = state
        .runner()
        .run(conversion.id, &upload_id, &source, &params, Some(progress), cancel)
        .await?;
    state.cancellation_tokens.write().await.remove(&conversion.id);

    let conversion = state
        .store
        .get(conversion.id)
        .await?
        .with_context(|| format!("Conversion {} disappeared", conversion.id))?;

    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_vec_pretty(&conversion)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "id": conversion.id,
            "status": status,
            "total_rows": conversion.total_rows,
            "processed_rows": conversion.processed_rows,
            "stats": conversion.stats,
        }))?
    );
    Ok(())
}
