//! # docmerge CLI
//!
//! ## Usage
//!
//! ```bash
//! docmerge --config ./config/docmerge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docmerge init` | Create the SQLite database and schema |
//! | `docmerge ingest <file\|->` | Reconcile a JSONL snapshot stream |
//! | `docmerge reconcile --url ...` | Reconcile a single snapshot |
//! | `docmerge get <url>` | Print the canonical record for a URL |
//! | `docmerge list` | List canonical records |
//! | `docmerge stats` | Record counts and database size |
//! | `docmerge serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use docmerge::config;
use docmerge::progress::ProgressMode;
use docmerge::publish;
use docmerge::sqlite_store::SqliteStore;
use docmerge::{db, get, ingest, migrate, server, stats, Reconciler, Snapshot};

/// docmerge: reconcile out-of-order crawl snapshots into one canonical
/// record per URL.
#[derive(Parser)]
#[command(name = "docmerge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docmerge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Reconcile a newline-delimited JSON stream of snapshots.
    ///
    /// Each line is `{"url": ..., "pub_date": ..., "fetch_time": ..., "text": ...}`.
    Ingest {
        /// Input file, or `-` for stdin.
        input: String,

        /// Decode and validate only; do not touch stored records.
        #[arg(long)]
        dry_run: bool,

        /// Override `[ingest].concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Reconcile a single snapshot given on the command line.
    Reconcile {
        #[arg(long)]
        url: String,
        #[arg(long)]
        pub_date: i64,
        #[arg(long)]
        fetch_time: i64,
        #[arg(long, default_value = "")]
        text: String,
    },

    /// Print the canonical record for a URL.
    Get {
        url: String,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List canonical records ordered by URL.
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Show record counts and database size.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            input,
            dry_run,
            concurrency,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &input, dry_run, concurrency, progress).await?;
        }
        Commands::Reconcile {
            url,
            pub_date,
            fetch_time,
            text,
        } => {
            run_reconcile(
                &cfg,
                Snapshot {
                    url,
                    pub_date,
                    fetch_time,
                    text,
                },
            )
            .await?;
        }
        Commands::Get { url, json } => {
            get::run_get(&cfg, &url, json).await?;
        }
        Commands::List { limit, json } => {
            get::run_list(&cfg, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_reconcile(cfg: &config::Config, snapshot: Snapshot) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    let reconciler = Reconciler::new(Arc::new(SqliteStore::new(pool.clone())));
    let publisher = publish::from_config(cfg).await?;

    let reconciled = reconciler.reconcile(snapshot).await?;
    if let Err(e) = publisher.publish(&reconciled.record).await {
        tracing::warn!(url = %reconciled.record.url, error = %e, "publish failed");
    }

    println!("{}", serde_json::to_string_pretty(&reconciled)?);
    pool.close().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
