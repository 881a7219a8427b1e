//! canvas-anki: Sync Obsidian canvas nodes into Anki through AnkiConnect.
//!
//! Uses the platform-independent canvas-sync engine with the native
//! AnkiConnect transport and file-backed sync history.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use anki_connect::{
    AnkiConnect, Config, JsonFileHistoryStore, RpcClient, default_history_path, load_canvas,
    resolve_source,
};
use canvas_sync::{
    CancellationToken, CanvasColor, RemoteStore, SchemaManager, SyncOrchestrator, SyncStatus,
    analyze,
};

#[derive(Parser, Debug)]
#[command(name = "canvas-anki")]
#[command(about = "Sync Obsidian canvas nodes into Anki flashcards")]
struct Args {
    /// Config file (default: ~/.config/canvas-anki/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// AnkiConnect URL, overriding config and ANKI_CONNECT_URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push canvas nodes into Anki
    Sync {
        /// Path to the .canvas file
        canvas: PathBuf,

        /// Only sync these node ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Only sync nodes of these colors, "1".."6" or "#rrggbb" (comma separated)
        #[arg(long, value_delimiter = ',')]
        colors: Vec<CanvasColor>,

        /// Push every node even if unchanged since the last sync
        #[arg(long)]
        force: bool,

        /// Target deck, overriding config and CANVAS_ANKI_DECK
        #[arg(long)]
        deck: Option<String>,

        /// Sync history file (default: next to the canvas in .canvas-anki/)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Vault root directory (default: nearest parent containing .obsidian)
        #[arg(long)]
        vault: Option<PathBuf>,
    },

    /// Print group membership of a canvas as JSON
    Analyze {
        /// Path to the .canvas file
        canvas: PathBuf,
    },

    /// Check that AnkiConnect is reachable and the note type is ready
    Check,
}

fn anki_client(config: &Config) -> Result<Arc<AnkiConnect>> {
    let rpc = RpcClient::new(&config.connection).context("Failed to create AnkiConnect client")?;
    Ok(Arc::new(AnkiConnect::new(rpc)))
}

async fn run_sync(
    config: Config,
    canvas_path: &Path,
    ids: Vec<String>,
    colors: Vec<CanvasColor>,
    force: bool,
    history: Option<PathBuf>,
    vault: Option<PathBuf>,
) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let (canvas_path, source) = resolve_source(canvas_path, vault.as_deref(), &cwd).await?;
    let canvas = load_canvas(&canvas_path).await?;
    let history_path = history.unwrap_or_else(|| default_history_path(&canvas_path));

    info!("Canvas: {:?} ({} nodes)", canvas_path, canvas.nodes.len());
    info!("History: {:?}", history_path);

    let mut settings = config.sync.clone();
    if force {
        settings.force_sync = true;
    }

    let orchestrator = SyncOrchestrator::new(
        anki_client(&config)?,
        Arc::new(JsonFileHistoryStore::new(history_path)),
        settings,
    );

    let _progress = orchestrator.events().subscribe(|progress| {
        if progress.status == SyncStatus::Syncing && progress.total > 0 {
            info!(
                "[{}/{}] {}",
                progress.current, progress.total, progress.message
            );
        }
    });

    // Ctrl-C finishes the current batch, then stops
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let result = if !ids.is_empty() {
        orchestrator
            .sync_by_ids(&canvas, &source, &ids, &cancel)
            .await?
    } else if !colors.is_empty() {
        orchestrator
            .sync_by_colors(&canvas, &source, &colors, &cancel)
            .await?
    } else {
        orchestrator
            .sync_incremental(&canvas, &source, &cancel)
            .await?
    };

    for message in &result.errors {
        warn!("{}", message);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_check(config: Config) -> Result<ExitCode> {
    let anki = anki_client(&config)?;
    let endpoint = config.connection.endpoint.as_str();

    let Some(version) = anki.version().await else {
        error!("AnkiConnect not reachable at {}", endpoint);
        return Ok(ExitCode::FAILURE);
    };
    info!("AnkiConnect v{} at {}", version, endpoint);

    let model = config.sync.model_name.as_str();
    if !SchemaManager::new(anki.as_ref(), model)
        .ensure_schema_ready()
        .await
    {
        error!("Note type '{}' could not be prepared", model);
        return Ok(ExitCode::FAILURE);
    }
    info!("Note type '{}' ready", model);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,canvas_sync=debug,anki_connect=debug"
    } else {
        "info,canvas_sync=info,anki_connect=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_file_and_env(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        config.connection.endpoint = endpoint;
    }

    match args.command {
        Command::Sync {
            canvas,
            ids,
            colors,
            force,
            deck,
            history,
            vault,
        } => {
            if let Some(deck) = deck {
                config.sync.deck_name = deck;
            }
            config.validate()?;
            run_sync(config, &canvas, ids, colors, force, history, vault).await
        }
        Command::Analyze { canvas } => {
            let canvas = load_canvas(&canvas).await?;
            println!("{}", serde_json::to_string_pretty(&analyze(&canvas.nodes))?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            config.validate()?;
            run_check(config).await
        }
    }
}
