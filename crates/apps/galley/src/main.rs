//! Galley - offline-first kitchen data sync
//!
//! Operator entry point: runs sync rounds against the configured remote and
//! manages the remote login session.

use anyhow::{Result, anyhow};
use chrono::Local;
use clap::{Parser, Subcommand};
use kitchen::{
    CursorStore, RemoteSession, RestClient, SqliteLocalStore, SyncEvent, SyncMode,
    SyncOrchestrator, SyncSettings, SyncStatus, TenantId, cooldown_elapsed,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "galley", version, about = "Sync kitchen data between this device and the cloud")]
struct Cli {
    /// Settings file (defaults to sync-settings.json in the config directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Location to sync, overriding the configured one
    #[arg(short, long, global = true, value_name = "ID")]
    location: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull remote changes, upload assets, push local changes
    Sync {
        /// Only run if the last sync is older than the configured cooldown
        #[arg(long)]
        auto: bool,
    },
    /// Pull remote changes only
    Pull,
    /// Upload assets and push local changes only
    Push,
    /// Push every local record regardless of the last sync time
    ForceUpload,
    /// Show the last sync time and pending work
    Status,
    /// Forget the sync cursor so the next sync compares every record
    ResetCursor,
    /// Sign in to the remote
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored remote session
    Logout,
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            if let Some(path) = SyncSettings::default_settings_path() {
                warn!("Sync settings are read from {}", path.display());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let mut settings = match &cli.settings {
        Some(path) => SyncSettings::from_file(path)?,
        None => SyncSettings::load()?,
    };
    if let Some(location) = cli.location {
        settings.tenant_id = Some(location);
    }

    let client = Arc::new(RestClient::connect(&settings, RemoteSession::load()?)?);

    match cli.command {
        Command::Login { email, password } => {
            let session = client.sign_in(&email, &password)?;
            println!("Signed in as {}", session.email.unwrap_or(email));
            Ok(true)
        }
        Command::Logout => {
            client.sign_out()?;
            println!("Signed out");
            Ok(true)
        }
        Command::Status => {
            let engine = build_engine(&settings, client)?;
            print_status(&engine.status(&settings.tenant())?);
            Ok(true)
        }
        Command::ResetCursor => {
            CursorStore::new(settings.cursor_path()?).clear()?;
            println!("Sync cursor cleared; the next sync is a full resync");
            Ok(true)
        }
        Command::Sync { auto } => {
            let engine = build_engine(&settings, client)?;
            if auto && !cooldown_elapsed(engine.cursor().load(), settings.auto_sync_cooldown_secs) {
                info!(
                    "Last sync was less than {}s ago, skipping",
                    settings.auto_sync_cooldown_secs
                );
                return Ok(true);
            }
            run_round(engine, SyncMode::Full, settings.tenant())
        }
        Command::Pull => run_round(build_engine(&settings, client)?, SyncMode::PullOnly, settings.tenant()),
        Command::Push => run_round(build_engine(&settings, client)?, SyncMode::PushOnly, settings.tenant()),
        Command::ForceUpload => {
            run_round(build_engine(&settings, client)?, SyncMode::ForceUploadAll, settings.tenant())
        }
    }
}

fn build_engine(settings: &SyncSettings, client: Arc<RestClient>) -> Result<Arc<SyncOrchestrator>> {
    let stores = SqliteLocalStore::factory(settings.database_path()?);
    let cursor = CursorStore::new(settings.cursor_path()?);
    let engine = SyncOrchestrator::new(client.clone(), client, Arc::new(stores), cursor);
    Ok(Arc::new(engine))
}

/// Run one round on a worker thread while another prints its progress
fn run_round(engine: Arc<SyncOrchestrator>, mode: SyncMode, tenant: TenantId) -> Result<bool> {
    let events = engine.subscribe();
    let printer = thread::spawn(move || {
        for event in events {
            if let SyncEvent::Progress { stage, percent } = event {
                println!("[{:>3}%] {}", percent, stage);
            }
        }
    });

    let worker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(mode, &tenant))
    };
    let outcome = worker
        .join()
        .map_err(|_| anyhow!("sync thread panicked"))?;

    // Dropping the engine closes the event channel and ends the printer
    drop(engine);
    if printer.join().is_err() {
        warn!("progress printer panicked");
    }

    let result = outcome?;
    println!("{}", result);
    if result.assets_failed > 0 {
        println!("{} asset(s) will be retried on the next sync", result.assets_failed);
    }
    Ok(result.success)
}

fn print_status(status: &SyncStatus) {
    match status.last_synced_at {
        Some(at) => println!("Last sync:       {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")),
        None => println!("Last sync:       never"),
    }
    println!("Local records:   {}", status.local_records);
    println!("Pending uploads: {}", status.pending_uploads);
    println!("Pending assets:  {}", status.pending_assets);
}
