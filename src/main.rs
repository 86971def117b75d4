//! # docs-index CLI (`docidx`)
//!
//! ## Usage
//!
//! ```bash
//! docidx --config ./config/docidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docidx init` | Create the SQLite database and run schema migrations |
//! | `docidx sources` | List configured sources and their health |
//! | `docidx sync <all\|name>` | Run one ingestion pass |
//! | `docidx retrieve "<query>"` | Top-k passages for a query |
//! | `docidx watch` | Re-ingest each source on its refresh interval |
//! | `docidx serve` | Start the HTTP retrieval server |
//! | `docidx stats` | Index and run-history summary |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docs_index::{
    config, db, ingest, logging, migrate, retrieve, schedule, server, sources, stats,
};

/// docs-index: documentation ingestion and retrieval for chat agents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docidx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docidx",
    about = "Documentation ingestion and retrieval for chat agents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources and whether they are reachable.
    Sources,

    /// Run one ingestion pass.
    ///
    /// Lists, fetches, chunks, embeds, and stores documents. Documents
    /// whose listing marker is already indexed are skipped unless
    /// `--force` is given.
    Sync {
        /// `all` or a configured source name.
        #[arg(default_value = "all")]
        source: String,

        /// Count documents and chunks without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents per source.
        #[arg(long)]
        limit: Option<usize>,

        /// Re-fetch documents even when their marker is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Retrieve the top-k passages for a query.
    Retrieve {
        query: String,

        /// Number of passages (defaults to `[retrieval].top_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Only passages from this source.
        #[arg(long)]
        source: Option<String>,

        /// Only passages written on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Re-ingest sources on their refresh intervals until ctrl-c.
    Watch {
        /// Seconds between schedule checks.
        #[arg(long, default_value_t = 30)]
        tick_secs: u64,
    },

    /// Start the HTTP retrieval server on `[server].bind`.
    Serve,

    /// Show index statistics and the last run per source.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync {
            source,
            dry_run,
            limit,
            force,
        } => {
            ingest::run_sync(&cfg, &source, dry_run, limit, force).await?;
        }
        Commands::Retrieve {
            query,
            k,
            source,
            since,
            json,
        } => {
            retrieve::run_retrieve(&cfg, &query, k, source, since, json).await?;
        }
        Commands::Watch { tick_secs } => {
            schedule::run_watch(&cfg, tick_secs).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
