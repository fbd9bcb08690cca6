//! Command-line inspector for a cache database.
//!
//! # Responsibility
//! - Verify `repocache_core` linkage without any remote source.
//! - Print the core version, then every cached owner as one JSON line.
//!
//! Usage: `repocache_cli [DB_PATH] [OWNER_ID]`. Without `DB_PATH` an empty
//! in-memory cache is opened. Set `REPOCACHE_LOG_DIR` to an absolute path to
//! enable file logging.

use log::info;
use repocache_core::{core_version, default_log_level, init_logging, Store, StoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("repocache_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    if let Ok(log_dir) = std::env::var("REPOCACHE_LOG_DIR") {
        init_logging(default_log_level(), &log_dir).map_err(|err| err.to_string())?;
    }

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => StoreConfig::file(path),
        None => StoreConfig::in_memory(),
    };
    let owner_filter = match args.next() {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|err| format!("invalid owner id `{raw}`: {err}"))?,
        ),
        None => None,
    };

    println!("repocache_core version={}", core_version());
    let store = Store::open(config).map_err(|err| err.to_string())?;
    let owners = store.view_storage().owners();
    info!(
        "event=cli_dump module=cli status=ok owners={} filtered={}",
        owners.len(),
        owner_filter.is_some()
    );

    for owner in owners
        .iter()
        .filter(|owner| owner_filter.map_or(true, |owner_id| owner.owner_id == owner_id))
    {
        let line = serde_json::to_string(owner).map_err(|err| err.to_string())?;
        println!("{line}");
    }
    Ok(())
}
