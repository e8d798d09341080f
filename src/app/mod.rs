mod format;
mod page;
mod replay;
mod tracker;
mod tui;

#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::Result;

use crate::cli::{Cli, Command, TrackerArgs, WatchedSourceArg};
use crate::db::{Database, KvStore, MemoryStore};
use crate::logging::{LogTarget, init_logging};
use crate::paths::{database_file_path, log_dir_path};

use self::format::{format_updated_display, truncate};
use self::replay::run_replay;
use self::tracker::{PlaylistId, TrackerConfig, WatchStore, WatchedSource};

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Tui { .. } => {
            let dir = log_dir_path()?;
            init_logging(&cli.log_level, LogTarget::File(&dir))?;
        }
        _ => init_logging(&cli.log_level, LogTarget::Stderr)?,
    }

    let memory;
    let db;
    let kv: &dyn KvStore = if cli.ephemeral {
        memory = MemoryStore::default();
        &memory
    } else {
        db = open_db(cli.db.as_deref())?;
        &db
    };
    let config = tracker_config(&cli.tracker);

    match cli.command {
        Command::Replay { trace, realtime } => run_replay(kv, config, &trace, realtime)?,
        Command::Tui { trace } => tui::run_tui(kv, config, &trace)?,
        Command::List => run_list(kv)?,
        Command::Reset { playlist, all } => run_reset(kv, playlist.as_deref(), all)?,
    }

    Ok(())
}

fn tracker_config(args: &TrackerArgs) -> TrackerConfig {
    TrackerConfig {
        debounce_ms: args.debounce_ms,
        sample_timeout_ms: args.sample_timeout_ms,
        watched_source: match args.watched_source {
            WatchedSourceArg::Store => WatchedSource::Store,
            WatchedSourceArg::Host => WatchedSource::Host,
        },
    }
}

fn run_list(kv: &dyn KvStore) -> Result<()> {
    let store = WatchStore::new(kv);
    let items = store.tracked_playlists()?;
    if items.is_empty() {
        println!("No watch data stored yet. Run `playtrack replay <trace>` first.");
        return Ok(());
    }

    let current = store.last_known_identity();
    println!(
        "{:<2}{:<36} {:<8} {:<28}",
        "", "PLAYLIST", "WATCHED", "LAST UPDATE"
    );
    for item in items {
        let marker = if current.as_ref() == Some(&item.id) {
            "*"
        } else {
            ""
        };
        println!(
            "{:<2}{:<36} {:<8} {:<28}",
            marker,
            truncate(item.id.as_str(), 36),
            item.watched,
            format_updated_display(&item.updated_at)
        );
    }
    Ok(())
}

fn run_reset(kv: &dyn KvStore, playlist: Option<&str>, all: bool) -> Result<()> {
    let store = WatchStore::new(kv);
    if all {
        let items = store.tracked_playlists()?;
        for item in &items {
            store.evict(&item.id);
        }
        store.clear_identity();
        println!("Removed watch data for {} playlist(s).", items.len());
        return Ok(());
    }

    let Some(raw) = playlist else {
        println!("Nothing to reset. Pass a playlist id or --all.");
        return Ok(());
    };
    let id = PlaylistId::new(raw);
    if store.evict(&id) {
        println!("Removed watch data for {id}.");
    } else {
        println!("No watch data stored for {id}.");
    }
    Ok(())
}

fn open_db(override_path: Option<&Path>) -> Result<Database> {
    let db_path = match override_path {
        Some(path) => path.to_path_buf(),
        None => database_file_path()?,
    };
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
