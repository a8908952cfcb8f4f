//! Binary entry point for dupreq.
//!
//! Reads connection settings from flags, environment and an optional config
//! file, builds the Redis pool once, and runs a single dedup operation.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stdout in main binary for CLI output
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dupreq::config::DedupConfig;
use dupreq::observability::{self, LogFormat, LoggingConfig};
use dupreq::{DedupService, RedisStore, RequestSnapshot};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Exit code for the dedup signals (already exists, not found).
const EXIT_SIGNAL: u8 = 2;

/// dupreq - Redis-backed request deduplication.
#[derive(Parser)]
#[command(name = "dupreq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, env = "DUPREQ_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Redis host.
    #[arg(long, global = true, env = "REDIS_HOST")]
    host: Option<String>,

    /// Redis port.
    #[arg(long, global = true, env = "REDIS_PORT")]
    port: Option<u16>,

    /// Redis password.
    #[arg(long, global = true, env = "REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Redis database index.
    #[arg(long, global = true, env = "REDIS_DB")]
    db: Option<i64>,

    /// Retention window for completed records, in seconds.
    #[arg(long, global = true, env = "DUPREQ_RETENTION_SECS")]
    retention_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one request record.
#[derive(Args)]
struct Target {
    /// The request identifier.
    request_id: String,

    /// Sub-prefix namespacing the identifier (e.g. "in" or "out").
    #[arg(short, long)]
    sub_prefix: Option<String>,
}

impl Target {
    fn sub_prefix(&self) -> Option<&str> {
        self.sub_prefix.as_deref()
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Register an incoming request; fails if it was already seen.
    Register {
        #[command(flatten)]
        target: Target,

        /// Status code to record.
        #[arg(long, default_value = "0")]
        status: i32,

        /// Body to record.
        #[arg(long)]
        body: Option<String>,
    },

    /// Record a request's outcome with the retention window.
    Complete {
        #[command(flatten)]
        target: Target,

        /// Status code to record.
        #[arg(long)]
        status: i32,

        /// Body to record.
        #[arg(long)]
        body: Option<String>,

        /// Start time (RFC 3339); defaults to the registered start time.
        #[arg(long)]
        begin: Option<DateTime<Utc>>,
    },

    /// Print the stored snapshot as JSON.
    Fetch {
        #[command(flatten)]
        target: Target,
    },

    /// Delete a stored record.
    Delete {
        #[command(flatten)]
        target: Target,
    },

    /// Check connectivity to Redis.
    Ping,
}

/// JSON view of a snapshot.
#[derive(Serialize)]
struct SnapshotView {
    key: String,
    begin: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    status_code: i32,
    body: String,
    body_len: usize,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format);
    }
    if let Err(e) = observability::init(logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            match e.downcast_ref::<dupreq::Error>() {
                Some(err) if err.is_duplicate() || err.is_not_found() => {
                    ExitCode::from(EXIT_SIGNAL)
                },
                _ => ExitCode::FAILURE,
            }
        },
    }
}

/// Layers config file, environment and flags.
fn build_config(cli: &Cli) -> anyhow::Result<DedupConfig> {
    let mut config = match &cli.config {
        Some(path) => DedupConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DedupConfig::default(),
    }
    .apply_env()?;

    if let Some(host) = &cli.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(password) = &cli.password {
        config = config.with_password(password.clone());
    }
    if let Some(db) = cli.db {
        config.redis.db = db;
    }
    if let Some(secs) = cli.retention_secs {
        config = config.with_retention(Duration::from_secs(secs));
    }

    Ok(config)
}

fn run_command(command: Commands, config: &DedupConfig) -> anyhow::Result<()> {
    tracing::debug!(url = %config.redis.redacted_url(), "Connecting to Redis");
    let store = Arc::new(RedisStore::from_config(config)?);

    if matches!(command, Commands::Ping) {
        store.pool().ping()?;
        println!("PONG");
        return Ok(());
    }

    let service = DedupService::new(store).with_retention(config.retention);

    match command {
        Commands::Register {
            target,
            status,
            body,
        } => {
            let snapshot = RequestSnapshot::begin_now()
                .with_status(status)
                .with_body(body.unwrap_or_default());
            service.register_incoming(target.sub_prefix(), &target.request_id, &snapshot)?;
            println!("registered {}", target.request_id);
        },
        Commands::Complete {
            target,
            status,
            body,
            begin,
        } => {
            let begin = match begin {
                Some(begin) => Some(begin),
                None => registered_begin(&service, &target)?,
            };
            let mut snapshot = RequestSnapshot::new().complete(status, body.unwrap_or_default());
            snapshot.begin = begin;
            service.complete_outgoing(target.sub_prefix(), &target.request_id, &snapshot)?;
            println!(
                "completed {} (expires in {}s)",
                target.request_id,
                service.retention().as_secs()
            );
        },
        Commands::Fetch { target } => {
            let snapshot = service.fetch(target.sub_prefix(), &target.request_id)?;
            let key = dupreq::StorageKey::new(target.sub_prefix(), &target.request_id)?;
            let view = SnapshotView {
                key: key.into(),
                begin: snapshot.begin,
                end: snapshot.end,
                status_code: snapshot.status_code,
                body: String::from_utf8_lossy(&snapshot.body).into_owned(),
                body_len: snapshot.body.len(),
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        },
        Commands::Delete { target } => {
            let removed = service.remove(target.sub_prefix(), &target.request_id)?;
            println!(
                "{} {}",
                if removed { "deleted" } else { "absent" },
                target.request_id
            );
        },
        Commands::Ping => {},
    }

    Ok(())
}

/// Returns the start time of an existing record, if any.
fn registered_begin(
    service: &DedupService,
    target: &Target,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    match service.fetch(target.sub_prefix(), &target.request_id) {
        Ok(snapshot) => Ok(snapshot.begin),
        Err(e) if e.is_not_found() => Ok(None),
        Err(dupreq::Error::Decode(reason)) => {
            tracing::warn!(%reason, "Existing record is corrupt, completing without start time");
            Ok(None)
        },
        Err(e) => Err(e.into()),
    }
}
