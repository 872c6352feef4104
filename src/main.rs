//! # Concierge CLI (`concierge`)
//!
//! ```bash
//! concierge --config ./config/concierge.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `concierge init` | Create the vector index (and conversation log) |
//! | `concierge ingest <path>` | Extract, chunk and index a file or directory |
//! | `concierge search "<query>"` | Retrieve and rerank documents |
//! | `concierge remember "<fact>" --user <id>` | Store a memory fact for a user |
//! | `concierge recall --user <id>` | Show a user's memory facts |
//! | `concierge ask "<question>"` | Route a question to an expert and print the answer |
//! | `concierge handlers` | List registered handlers |
//! | `concierge history --session <id>` | Show the conversation log of a session |
//! | `concierge stats` | Index and log counts |
//!
//! Logs go to stderr. Set `CONCIERGE_LOG` (e.g. `concierge=debug`) to
//! change the filter.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use concierge::commands;
use concierge::config::{self, Config};
use concierge::progress::ProgressMode;

/// Concierge: route questions to domain experts backed by a local
/// knowledge index.
#[derive(Parser)]
#[command(name = "concierge", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, offline defaults are used (flat index
    /// in `./data/index`, hashing embedder, lexical reranker, no model).
    #[arg(long, global = true, default_value = "./config/concierge.toml")]
    config: PathBuf,

    /// Log at debug level unless `CONCIERGE_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index files. Idempotent.
    Init,

    /// Ingest a file or a directory (recursively).
    Ingest {
        path: PathBuf,

        /// Category stored on every chunk; experts filter on it.
        #[arg(long)]
        category: Option<String>,

        /// Progress output: `off`, `human` or `json` (stderr).
        /// Defaults to `human` on a terminal, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search the index with reranking.
    Search {
        query: String,

        #[arg(long)]
        category: Option<String>,

        /// Number of results requested (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Remember a fact about a user.
    Remember {
        info: String,

        #[arg(long)]
        user: String,

        /// `preference`, `profile` or `general`.
        #[arg(long, default_value = "general")]
        info_type: String,
    },

    /// Show what is remembered about a user.
    Recall {
        #[arg(long)]
        user: String,
    },

    /// Ask a question.
    Ask {
        query: String,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        session: Option<String>,
    },

    /// List registered handlers.
    Handlers,

    /// Show the logged conversation of a session, newest first.
    History {
        #[arg(long)]
        session: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show index statistics.
    Stats,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "concierge=debug,concierge_core=debug"
    } else {
        "concierge=info,concierge_core=info"
    };
    let filter = EnvFilter::try_from_env("CONCIERGE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        Config::minimal()
    };

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Ingest {
            path,
            category,
            progress,
        } => {
            let mode = ProgressMode::from_flag(progress.as_deref())?;
            commands::run_ingest(&cfg, &path, category.as_deref(), mode).await?;
        }
        Commands::Search {
            query,
            category,
            top_k,
        } => commands::run_search(&cfg, &query, category, top_k).await?,
        Commands::Remember {
            info,
            user,
            info_type,
        } => commands::run_remember(&cfg, &info, &user, &info_type).await?,
        Commands::Recall { user } => commands::run_recall(&cfg, &user).await?,
        Commands::Ask {
            query,
            user,
            session,
        } => commands::run_ask(&cfg, &query, user.as_deref(), session.as_deref()).await?,
        Commands::Handlers => commands::run_handlers(&cfg).await?,
        Commands::History { session, limit } => commands::run_history(&cfg, &session, limit).await?,
        Commands::Stats => commands::run_stats(&cfg).await?,
    }

    Ok(())
}
