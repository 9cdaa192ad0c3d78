//! colorstat CLI - operator command line interface
//!
//! Every invocation opens the statistics store (restoring its snapshot),
//! runs one command and shuts the store down again (saving the snapshot).

mod registry;
mod replay;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colorstat_common::{Color, Config, DbId, QueryId, UserId};
use colorstat_store::StatsService;
use registry::JsonFileRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "colorstat")]
#[command(about = "colorstat usage statistics CLI")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/colorstat/colorstat.toml")]
    config: PathBuf,

    /// Snapshot file (overrides store.snapshot_path)
    #[arg(long, env = "COLORSTAT_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Maximum number of entries (overrides store.capacity)
    #[arg(long)]
    capacity: Option<usize>,

    /// Log level (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record completed executions of a query
    Record {
        #[command(flatten)]
        query: QueryArgs,
        /// Number of executions to record
        #[arg(long, default_value_t = 1)]
        times: u64,
    },
    /// Allocate an entry for a query without counting a call
    Reserve {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// List entries visible to a user
    List {
        /// Requesting user
        #[arg(long)]
        user: u32,
        /// See every user's entries
        #[arg(long)]
        privileged: bool,
        /// JSON file listing live queries; entries missing from it are pruned
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry
    Reset,
    /// Print store statistics as JSON
    Stats,
    /// Record a JSON-lines workload concurrently
    Replay {
        /// Workload file
        #[arg(long)]
        file: PathBuf,
        /// Worker threads
        #[arg(long, default_value_t = 4)]
        threads: usize,
    },
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
    /// User that ran the query
    #[arg(long)]
    user: u32,
    /// Database the query ran in
    #[arg(long)]
    db: u32,
    /// Query fingerprint
    #[arg(long)]
    query: u64,
    /// Raw tag text
    #[arg(long, conflicts_with = "color")]
    tag: Option<String>,
    /// Filter color in "(r,g,b)" form, canonicalized into the tag
    #[arg(long)]
    color: Option<String>,
}

impl QueryArgs {
    fn tag(&self) -> Result<Option<String>> {
        match (&self.tag, &self.color) {
            (_, Some(color)) => {
                let color: Color = color.parse().context("invalid --color")?;
                Ok(Some(color.to_string()))
            }
            (tag, None) => Ok(tag.clone()),
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file, CLI takes precedence
    let mut config = load_config(&args.config)?;
    if let Some(snapshot) = args.snapshot {
        config.store.snapshot_path = snapshot;
    }
    if let Some(capacity) = args.capacity {
        config.store.capacity = capacity;
    }
    let log_level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("Config file: {:?}", args.config);
    config.validate()?;

    let mut service = StatsService::open(config.store)?;

    match args.command {
        Commands::Record { query, times } => {
            let tag = query.tag()?;
            let (user, db, id) = ids(&query);
            for _ in 0..times {
                service.record_usage(user, db, id, tag.as_deref());
            }
            println!("Recorded {times} call(s) of query {id}");
        }
        Commands::Reserve { query } => {
            let tag = query.tag()?;
            let (user, db, id) = ids(&query);
            service.reserve(user, db, id, tag.as_deref());
            println!("Reserved entry for query {id}");
        }
        Commands::List {
            user,
            privileged,
            registry,
            json,
        } => {
            if let Some(path) = registry {
                service = service.with_registry(Arc::new(JsonFileRegistry::new(path)));
            }
            let rows = service.list_entries(UserId::new(user), privileged)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!(
                    "{:<20} {:>10} {:>10} {:<24} {:>12}",
                    "QUERY", "USER", "DB", "TAG", "CALLS"
                );
                for row in &rows {
                    println!(
                        "{:<20} {:>10} {:>10} {:<24} {:>12}",
                        row.query_id.get(),
                        row.user_id.get(),
                        row.db_id.get(),
                        row.tag.as_deref().unwrap_or("-"),
                        row.calls
                    );
                }
            }
        }
        Commands::Reset => {
            service.reset()?;
            println!("Statistics reset");
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&service.stats())?);
        }
        Commands::Replay { file, threads } => {
            let reader = std::io::BufReader::new(
                std::fs::File::open(&file)
                    .with_context(|| format!("failed to open workload {}", file.display()))?,
            );
            let events = replay::parse_events(reader)?;
            info!("Replaying {} events on {} threads", events.len(), threads);
            replay::replay(&service, &events, threads);
            println!("Replayed {} events, {} entries", events.len(), service.count());
        }
    }

    service.shutdown()?;
    Ok(())
}

fn ids(query: &QueryArgs) -> (UserId, DbId, QueryId) {
    (
        UserId::new(query.user),
        DbId::new(query.db),
        QueryId::new(query.query),
    )
}
