// State manager: the single owner of game and session state.
//
// Coordinates the cache before issuing network fetches, coalesces concurrent
// loads of the same game onto one in-flight request, persists session
// changes, and publishes change notifications on the event bus. No lock is
// held across an await or while publishing, so subscribers may call back
// into the manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{Cache, DEFAULT_TTL};
use crate::config::Config;
use crate::events::{EventBus, Payload, Topic};
use crate::game::{AthleteId, GameState, GameStatePatch, RaceResult};
use crate::persistence::Persistence;
use crate::remote::{FetchError, GameStateSource};
use crate::session::{SessionPatch, SessionState};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of the state manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The fetch failed and there was no cached snapshot to fall back on.
    #[error("failed to load game {game_id}: {source}")]
    Fetch {
        game_id: String,
        #[source]
        source: FetchError,
    },
}

/// Tunables for a [`StateManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// TTL applied to every fetched snapshot.
    pub ttl: Duration,
    /// Persistence key for the session record.
    pub session_key: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            session_key: "session".to_string(),
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.cache_ttl(),
            session_key: config.storage.session_key.clone(),
        }
    }
}

type LoadResult = Result<Arc<GameState>, StateError>;
type SharedFetch = Shared<BoxFuture<'static, LoadResult>>;

/// The mutable records the manager owns.
#[derive(Default)]
struct OwnedState {
    game: Arc<GameState>,
    /// Game the in-memory `game` snapshot belongs to.
    loaded_game_id: Option<String>,
    /// Most recently requested game.
    active_game_id: Option<String>,
    session: SessionState,
}

struct Inner {
    source: Arc<dyn GameStateSource>,
    persistence: Persistence,
    bus: EventBus,
    options: ManagerOptions,
    state: Mutex<OwnedState>,
    cache: Mutex<Cache<Arc<GameState>>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Owner of the canonical `GameState` and `SessionState`.
///
/// Cheap to clone; every clone is a handle to the same state.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<Inner>,
}

impl StateManager {
    /// Create a manager, synchronously restoring any persisted session before
    /// returning.
    pub fn new(
        source: Arc<dyn GameStateSource>,
        persistence: Persistence,
        options: ManagerOptions,
    ) -> Self {
        Self::with_bus(source, persistence, EventBus::new(), options)
    }

    /// Like [`StateManager::new`], publishing on an existing bus.
    pub fn with_bus(
        source: Arc<dyn GameStateSource>,
        persistence: Persistence,
        bus: EventBus,
        options: ManagerOptions,
    ) -> Self {
        let session = restore_session(&persistence, &options.session_key);
        let inner = Inner {
            source,
            persistence,
            bus,
            options,
            state: Mutex::new(OwnedState {
                session,
                ..OwnedState::default()
            }),
            cache: Mutex::new(Cache::new()),
            in_flight: Mutex::new(HashMap::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // -- Accessors --

    /// Current game-state snapshot.
    pub fn game_state(&self) -> Arc<GameState> {
        self.inner.state().game.clone()
    }

    /// Current session record.
    pub fn session(&self) -> SessionState {
        self.inner.state().session.clone()
    }

    /// The most recently requested game.
    pub fn active_game_id(&self) -> Option<String> {
        self.inner.state().active_game_id.clone()
    }

    /// The game the current in-memory snapshot belongs to.
    pub fn loaded_game_id(&self) -> Option<String> {
        self.inner.state().loaded_game_id.clone()
    }

    /// `true` while a fetch for `game_id` is in flight.
    pub fn is_fetching(&self, game_id: &str) -> bool {
        self.inner.in_flight().contains_key(game_id)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // -- Game state --

    /// Load the snapshot for `game_id`.
    ///
    /// A fresh cached snapshot is returned without touching the network
    /// unless `force_refresh` is set. Otherwise the remote service is asked,
    /// with concurrent callers for the same game sharing one request. If the
    /// fetch fails, the last cached snapshot (however stale) is returned and
    /// `gamestate:error` published; with nothing cached the error is
    /// returned and in-memory state is left untouched.
    pub async fn load_game_state(&self, game_id: &str, force_refresh: bool) -> LoadResult {
        self.inner.activate(game_id);

        if !force_refresh {
            let hit = self.inner.cache().get(game_id);
            if let Some(hit) = hit.filter(|hit| hit.fresh) {
                debug!(game_id, age_ms = hit.age.as_millis() as u64, "serving cached game state");
                self.inner.install_cached(game_id, hit.value.clone());
                return Ok(hit.value);
            }
        }

        Inner::in_flight_fetch(&self.inner, game_id, force_refresh).await
    }

    /// Shallow-merge `patch` into the current game state without a network
    /// round-trip and publish `gamestate:updated`.
    ///
    /// The change is written through to the loaded game's cache entry
    /// (keeping its fetch time) so a cache hit does not undo it before the
    /// next authoritative refresh.
    pub fn update_game_state(&self, patch: GameStatePatch) -> Arc<GameState> {
        let (next, game_id) = {
            let mut state = self.inner.state();
            let next = Arc::new(state.game.merged(patch));
            state.game = next.clone();
            (next, state.loaded_game_id.clone())
        };
        if let Some(id) = &game_id {
            self.inner.cache().replace_value(id, next.clone());
        }
        debug!(game_id = game_id.as_deref().unwrap_or("-"), "applied optimistic game-state update");
        self.inner.bus.publish(
            Topic::GAMESTATE_UPDATED,
            Some(Payload::GameState {
                game_id,
                state: next.clone(),
            }),
        );
        next
    }

    /// Merge `results` into the current results map and publish both
    /// `gamestate:updated` and `results:updated`.
    pub fn record_results(&self, results: HashMap<AthleteId, RaceResult>) -> Arc<GameState> {
        let mut athlete_ids: Vec<AthleteId> = results.keys().copied().collect();
        athlete_ids.sort_unstable();

        let current = self.game_state();
        let unknown = athlete_ids
            .iter()
            .filter(|id| current.athletes.find(**id).is_none())
            .count();
        if unknown > 0 {
            warn!(unknown, "results recorded for athletes outside the loaded field");
        }

        let mut merged = current.results.clone();
        merged.extend(results);
        let next = self.update_game_state(GameStatePatch {
            results: Some(merged),
            ..Default::default()
        });

        info!(count = athlete_ids.len(), "recorded race results");
        self.inner.bus.publish(
            Topic::RESULTS_UPDATED,
            Some(Payload::Results {
                game_id: self.loaded_game_id(),
                athlete_ids,
            }),
        );
        next
    }

    /// Mark the cache entry for `game_id` (or every entry) stale. Does not
    /// refetch.
    pub fn invalidate_cache(&self, game_id: Option<&str>) {
        self.inner.cache().invalidate(game_id);
    }

    // -- Session --

    /// Shallow-merge `patch` into the session, persist the full record, and
    /// publish `session:changed`.
    pub fn update_session(&self, patch: SessionPatch) -> SessionState {
        let has_fields = patch != SessionPatch::default();
        let next = {
            let mut state = self.inner.state();
            state.session = state.session.merged(patch);
            state.session.clone()
        };
        if has_fields && !next.is_logged_in() {
            debug!("session patch carried no token; staying logged out");
        }
        self.inner
            .persistence
            .save(&self.inner.options.session_key, &next);
        info!(logged_in = next.is_logged_in(), "session updated");
        self.inner
            .bus
            .publish(Topic::SESSION_CHANGED, Some(Payload::Session(next.clone())));
        next
    }

    /// Reset the session to the logged-out baseline, remove the persisted
    /// record, and publish `session:changed`.
    pub fn clear_session(&self) {
        self.inner.state().session = SessionState::default();
        self.inner.persistence.clear(&self.inner.options.session_key);
        info!("session cleared");
        self.inner.bus.publish(
            Topic::SESSION_CHANGED,
            Some(Payload::Session(SessionState::default())),
        );
    }

    /// Clear the session if its credential has expired. Returns `true` if it
    /// was cleared.
    pub fn check_session_expiry(&self) -> bool {
        let expired = self.inner.state().session.is_expired_at(Utc::now());
        if expired {
            info!("session expired");
            self.clear_session();
        }
        expired
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl Inner {
    fn state(&self) -> MutexGuard<'_, OwnedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, Cache<Arc<GameState>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, game_id: &str) -> bool {
        self.state().active_game_id.as_deref() == Some(game_id)
    }

    fn activate(&self, game_id: &str) {
        let mut state = self.state();
        if state.active_game_id.as_deref() != Some(game_id) {
            info!(game_id, "switching active game");
            state.active_game_id = Some(game_id.to_string());
        }
    }

    /// Install a cached snapshot if the in-memory state belongs to another
    /// game (e.g. after switching back to a recently viewed game).
    fn install_cached(&self, game_id: &str, snapshot: Arc<GameState>) {
        {
            let mut state = self.state();
            if state.loaded_game_id.as_deref() == Some(game_id) {
                return;
            }
            state.game = snapshot.clone();
            state.loaded_game_id = Some(game_id.to_string());
        }
        self.bus.publish(
            Topic::GAMESTATE_UPDATED,
            Some(Payload::GameState {
                game_id: Some(game_id.to_string()),
                state: snapshot,
            }),
        );
    }

    /// Join the in-flight fetch for `game_id`, starting one if none exists.
    fn in_flight_fetch(this: &Arc<Self>, game_id: &str, force_refresh: bool) -> SharedFetch {
        let mut in_flight = this.in_flight();
        if let Some(existing) = in_flight.get(game_id) {
            debug!(game_id, "joining in-flight fetch");
            return existing.clone();
        }

        // A fetch may have completed since the caller checked the cache. Its
        // snapshot is cached before it leaves the in-flight map.
        if !force_refresh {
            let hit = this.cache().get(game_id).filter(|hit| hit.fresh);
            if let Some(hit) = hit {
                drop(in_flight);
                this.install_cached(game_id, hit.value.clone());
                return future::ready::<LoadResult>(Ok(hit.value)).boxed().shared();
            }
        }

        debug!(game_id, "fetching game state");
        let inner = Arc::clone(this);
        let id = game_id.to_string();
        let fetch = async move {
            let result = inner.source.fetch_game_state(&id).await;
            inner.complete_fetch(&id, result)
        }
        .boxed()
        .shared();

        in_flight.insert(game_id.to_string(), fetch.clone());
        fetch
    }

    /// Apply the outcome of a fetch. Runs exactly once per network request,
    /// however many callers are waiting on it.
    fn complete_fetch(&self, game_id: &str, result: Result<GameState, FetchError>) -> LoadResult {
        match result {
            Ok(snapshot) => {
                let (snapshot, installed) = {
                    let mut state = self.state();
                    let mut snapshot = snapshot;
                    if state.active_game_id.as_deref() != Some(game_id) {
                        (Arc::new(snapshot), false)
                    } else {
                        if state.loaded_game_id.as_deref() == Some(game_id)
                            && state.game.draft_complete
                            && !snapshot.draft_complete
                        {
                            warn!(game_id, "snapshot reports draft incomplete after completion; keeping completed");
                            snapshot.draft_complete = true;
                        }
                        let snapshot = Arc::new(snapshot);
                        state.game = snapshot.clone();
                        state.loaded_game_id = Some(game_id.to_string());
                        (snapshot, true)
                    }
                };

                // Cache before leaving the in-flight map so a concurrent
                // caller sees one or the other.
                self.cache()
                    .set(game_id, snapshot.clone(), self.options.ttl);
                self.in_flight().remove(game_id);

                if installed {
                    info!(
                        game_id,
                        athletes = snapshot.athletes.len(),
                        players = snapshot.players.len(),
                        "game state refreshed"
                    );
                    self.bus.publish(
                        Topic::GAMESTATE_UPDATED,
                        Some(Payload::GameState {
                            game_id: Some(game_id.to_string()),
                            state: snapshot.clone(),
                        }),
                    );
                } else {
                    debug!(game_id, "fetched snapshot for inactive game; cached only");
                }
                Ok(snapshot)
            }
            Err(e) => {
                self.in_flight().remove(game_id);
                warn!(game_id, "game-state fetch failed: {e}");
                let fallback = self.cache().get(game_id);
                self.bus.publish(
                    Topic::GAMESTATE_ERROR,
                    Some(Payload::Error {
                        game_id: game_id.to_string(),
                        message: e.to_string(),
                    }),
                );
                match fallback {
                    Some(cached) => {
                        info!(
                            game_id,
                            age_ms = cached.age.as_millis() as u64,
                            "serving stale cached game state after fetch failure"
                        );
                        if self.is_active(game_id) {
                            self.install_cached(game_id, cached.value.clone());
                        }
                        Ok(cached.value)
                    }
                    None => Err(StateError::Fetch {
                        game_id: game_id.to_string(),
                        source: e,
                    }),
                }
            }
        }
    }
}

/// Read the persisted session, discarding records that are expired or that
/// carry fields without a token.
fn restore_session(persistence: &Persistence, key: &str) -> SessionState {
    let Some(stored) = persistence.load::<SessionState>(key) else {
        debug!("no persisted session");
        return SessionState::default();
    };

    let normalized = stored.clone().normalized();
    if normalized != stored {
        persistence.clear(key);
        return SessionState::default();
    }
    if normalized.is_expired_at(Utc::now()) {
        info!("persisted session has expired; discarding");
        persistence.clear(key);
        return SessionState::default();
    }

    info!(logged_in = normalized.is_logged_in(), "session restored");
    normalized
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
