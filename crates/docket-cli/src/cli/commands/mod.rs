//! CLI parser and dispatch to command modules.

mod doc;
mod gate;
mod ingest;
mod init;
mod runs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docket::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Resumable document ingestion with OCR remediation")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config file and DOCKET_DATA_DIR)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and run database migrations
    Init,

    /// Ingest one file and print the run result as JSON
    Ingest {
        /// File to ingest
        file: PathBuf,
        /// Run id (default: a fresh `run-<uuid>`); reuse one to resume a run
        #[arg(long)]
        run_id: Option<String>,
        /// PDF to render for OCR (implies --ocr)
        #[arg(long)]
        pdf: Option<PathBuf>,
        /// Run the OCR lane on hard pages
        #[arg(long)]
        ocr: bool,
        /// Skip the workflow journal; such a run cannot be resumed
        #[arg(long)]
        inline: bool,
    },

    /// Score the pages of a parser structure JSON and print the gate report
    Gate {
        /// Structure JSON file (parser `marker.json`)
        structure: PathBuf,
        /// Score at or above which a page is hard
        #[arg(long)]
        threshold: Option<f64>,
        /// Maximum number of hard pages
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Inspect documents
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },

    /// Inspect runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
}

#[derive(Subcommand)]
enum DocCommands {
    /// Show a document and its versions
    Show {
        /// Document id (`doc-<hex>`)
        doc_id: String,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    /// List the artifacts recorded for a run
    Artifacts {
        run_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Ingest {
            file,
            run_id,
            pdf,
            ocr,
            inline,
        } => {
            ingest::cmd_ingest(
                &settings,
                ingest::IngestArgs {
                    file,
                    run_id,
                    pdf,
                    ocr,
                    inline,
                },
            )
            .await
        }
        Commands::Gate {
            structure,
            threshold,
            max_pages,
        } => gate::cmd_gate(&settings, &structure, threshold, max_pages).await,
        Commands::Doc { command } => match command {
            DocCommands::Show { doc_id } => doc::cmd_doc_show(&settings, &doc_id).await,
        },
        Commands::Run { command } => match command {
            RunCommands::Artifacts { run_id, json } => {
                runs::cmd_run_artifacts(&settings, &run_id, json).await
            }
        },
    }
}
