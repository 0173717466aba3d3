//! # RAG Harness CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag ingest [<dir>]` | Extract, chunk, embed and store every PDF under a directory |
//! | `rag ask "<question>"` | Answer a question from the indexed documents |
//! | `rag status` | Show collections and configured services |
//! | `rag selftest` | Check store, collection, completion and a full query; rate overall health |
//!
//! Diagnostics go to stderr through `tracing` (`RUST_LOG` to filter);
//! stdout carries only command output.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_harness::progress::ProgressMode;
use rag_harness::{ask, config, db, ingest, migrate, status};

/// RAG Harness CLI: question answering over a private PDF corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness — question answering over a private PDF corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest every PDF under a directory into a collection.
    ///
    /// Runs a vector store self-test first. Files, pages and batches that
    /// fail are skipped and counted in the final report.
    Ingest {
        /// Corpus directory. Defaults to `[corpus].root`.
        dir: Option<PathBuf>,

        /// Collection name. Defaults to `[collection].name`.
        #[arg(long)]
        collection: Option<String>,

        /// Delete the collection before ingesting.
        #[arg(long)]
        rebuild: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        #[arg(long)]
        collection: Option<String>,

        /// Chunks to retrieve. Defaults to `[retrieval].top_k_retrieve`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Chunks kept after reranking. Defaults to `[retrieval].top_k_final`.
        #[arg(long)]
        final_k: Option<usize>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show collections and configured services.
    Status,

    /// Check the vector store, collection, completion model and a full query.
    Selftest {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            dir,
            collection,
            rebuild,
            progress,
        } => {
            ingest::run_ingest(
                &cfg,
                dir.as_deref(),
                collection.as_deref(),
                rebuild,
                progress.into(),
            )
            .await?;
        }
        Commands::Ask {
            question,
            collection,
            top_k,
            final_k,
            json,
        } => {
            ask::run_ask(&cfg, &question, collection.as_deref(), top_k, final_k, json).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Selftest { json } => {
            status::run_selftest(&cfg, json).await?;
        }
    }

    Ok(())
}
