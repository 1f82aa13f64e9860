// fantasy-sync entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr; stdout carries the JSON output)
// 2. Load config
// 3. Open the session store, falling back to memory if it cannot be opened
// 4. Build the game-state client and state manager (restores the session)
// 5. Handle --logout, otherwise load and print the requested game

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};

use fantasy_sync::config;
use fantasy_sync::db::SqliteStore;
use fantasy_sync::events::{Payload, Topic};
use fantasy_sync::manager::{ManagerOptions, StateManager};
use fantasy_sync::persistence::{KeyValueStore, MemoryStore, Persistence};
use fantasy_sync::remote::HttpGameStateSource;

const USAGE: &str = "usage: fantasy-sync [GAME_ID] [--force] [--logout]";

/// Parsed command-line arguments.
#[derive(Debug, Default)]
struct Args {
    game_id: Option<String>,
    force: bool,
    logout: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "--force" | "-f" => parsed.force = true,
            "--logout" => parsed.logout = true,
            "--help" | "-h" => bail!(USAGE),
            flag if flag.starts_with('-') => bail!("unknown flag {flag}\n{USAGE}"),
            _ if parsed.game_id.is_some() => bail!("more than one game id given\n{USAGE}"),
            _ => parsed.game_id = Some(arg),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    let args = parse_args(std::env::args().skip(1))?;

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: service={}", config.remote.base_url);

    // 3. Open the session store
    let store = open_store(config.storage_path());

    // 4. Build the manager
    let source = HttpGameStateSource::from_config(&config)
        .context("failed to build game-state client")?;
    let manager = StateManager::new(
        Arc::new(source),
        Persistence::new(store),
        ManagerOptions::from_config(&config),
    );
    manager.check_session_expiry();

    // 5. Handle the command
    if args.logout {
        manager.clear_session();
        println!("logged out");
        return Ok(());
    }

    manager.bus().subscribe(Topic::GAMESTATE_ERROR, |event| {
        if let Some(Payload::Error { game_id, message }) = &event.payload {
            warn!(game_id = %game_id, "serving cached data: {message}");
        }
    });

    let session = manager.session();
    match &session.team_name {
        Some(team) => info!("Session restored for team {team}"),
        None => info!("No active session"),
    }

    let game_id = args
        .game_id
        .unwrap_or_else(|| config.game.default_game_id.clone());
    let state = manager
        .load_game_state(&game_id, args.force)
        .await
        .with_context(|| format!("could not load game {game_id}"))?;

    let json = serde_json::to_string_pretty(state.as_ref())
        .context("failed to serialize game state")?;
    println!("{json}");
    Ok(())
}

/// Open the SQLite store at `path`, or an in-memory store if that fails.
fn open_store(path: PathBuf) -> Arc<dyn KeyValueStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Could not create {}: {e}", parent.display());
        }
    }
    match SqliteStore::open(&path.to_string_lossy()) {
        Ok(db) => {
            info!("Session store opened at {}", path.display());
            Arc::new(db)
        }
        Err(e) => {
            warn!("Session store unavailable ({e:#}); session will not persist");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Initialize tracing to stderr so stdout stays clean for JSON output.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fantasy_sync=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
