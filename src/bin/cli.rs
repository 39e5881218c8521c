use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use musivault as lib;
use lib::api::spotify::SpotifyClient;
use lib::config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "musivault", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (login flow, proxy and vault routes)
    Serve,
    /// Pull the whole library into the vault once, using the stored token
    Sync,
    /// Authorize interactively by pasting the redirect URL; stores tokens in the DB
    Auth,
    /// Create the schema; --reset drops every table first
    InitDb {
        #[arg(long)]
        reset: bool,
    },
    /// Print row counts per table
    Stats,
    /// Write one CSV per non-empty table
    Export {
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
    /// Snapshot the database and upload it to the configured backup URL
    Backup,
    /// Validate config file and exit
    ConfigValidate,
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    // explicit --config wins; otherwise ./musivault.toml when present, else environment only
    match explicit {
        Some(p) => Config::from_path(p).with_context(|| format!("loading config from {}", p.display())),
        None => {
            let local = Path::new("musivault.toml");
            if local.exists() {
                Config::from_path(local).with_context(|| format!("loading config from {}", local.display()))
            } else {
                Ok(Config::from_env())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&cfg.log_dir, "musivault.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    tracing_subscriber_global::set_global_default(subscriber).context("installing tracing subscriber")?;

    match cli.command {
        Commands::Serve => {
            lib::server::serve(cfg).await.context("running server")?;
        }
        Commands::Sync => {
            let client = SpotifyClient::new(&cfg);
            let report = lib::collector::run_full_sync(&cfg, Arc::new(client)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Auth => {
            lib::api::spotify_auth::run_interactive_auth(&cfg).await?;
        }
        Commands::InitDb { reset } => {
            let mut conn = lib::db::open_or_create(&cfg.db_path)?;
            if reset {
                lib::db::drop_all(&mut conn)?;
                lib::db::run_migrations(&conn)?;
                println!("Dropped and recreated all tables in {}", cfg.db_path.display());
            } else {
                println!("Database ready at {}", cfg.db_path.display());
            }
        }
        Commands::Stats => {
            let conn = lib::db::open_or_create(&cfg.db_path)?;
            let stats = lib::store::database_stats(&conn)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if let Some(run) = lib::db::latest_sync_run(&conn)? {
                println!("Last sync: {} ({})", run.status, run.id);
            }
        }
        Commands::Export { out } => {
            let conn = lib::db::open_or_create(&cfg.db_path)?;
            let files = lib::export::export_all(&conn, &out)?;
            if files.is_empty() {
                println!("Nothing to export; the vault is empty.");
            }
            for f in files {
                println!("{}", f.display());
            }
        }
        Commands::Backup => {
            if !lib::backup::run_configured(&cfg).await? {
                eprintln!("No [backup] section in config; nothing to do.");
                std::process::exit(2);
            }
        }
        Commands::ConfigValidate => match cfg.validate_required() {
            Ok(()) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        },
    }

    Ok(())
}
