// Reactive binding layer: the surface UI code talks to.
//
// A `Store` exposes the state manager's current values and mutators. Each UI
// subscriber takes a `Binding` from it; reading a value through the binding
// registers interest in the matching topic, and every publish on that topic
// invokes the subscriber's rerender callback. Dropping the binding removes
// its registrations.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::events::{Event, EventBus, Subscription, Topic};
use crate::game::{AthleteId, GameState, GameStatePatch, RaceResult};
use crate::manager::{StateError, StateManager};
use crate::session::{SessionPatch, SessionState};

type Rerender = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// UI-facing handle on a [`StateManager`]. Holds no state of its own.
#[derive(Clone)]
pub struct Store {
    manager: StateManager,
}

impl Store {
    pub fn new(manager: StateManager) -> Self {
        Self { manager }
    }

    pub fn game_state(&self) -> Arc<GameState> {
        self.manager.game_state()
    }

    pub fn session(&self) -> SessionState {
        self.manager.session()
    }

    pub fn is_fetching(&self, game_id: &str) -> bool {
        self.manager.is_fetching(game_id)
    }

    pub async fn load_game_state(
        &self,
        game_id: &str,
        force_refresh: bool,
    ) -> Result<Arc<GameState>, StateError> {
        self.manager.load_game_state(game_id, force_refresh).await
    }

    pub fn update_game_state(&self, patch: GameStatePatch) -> Arc<GameState> {
        self.manager.update_game_state(patch)
    }

    pub fn record_results(&self, results: HashMap<AthleteId, RaceResult>) -> Arc<GameState> {
        self.manager.record_results(results)
    }

    pub fn invalidate_cache(&self, game_id: Option<&str>) {
        self.manager.invalidate_cache(game_id)
    }

    pub fn update_session(&self, patch: SessionPatch) -> SessionState {
        self.manager.update_session(patch)
    }

    pub fn clear_session(&self) {
        self.manager.clear_session()
    }

    pub fn check_session_expiry(&self) -> bool {
        self.manager.check_session_expiry()
    }

    /// Create a binding for one UI subscriber. `rerender` runs every time a
    /// value the subscriber has read changes.
    pub fn bind<F>(&self, rerender: F) -> Binding
    where
        F: Fn() + Send + Sync + 'static,
    {
        Binding {
            store: self.clone(),
            rerender: Arc::new(rerender),
            game_sub: OnceLock::new(),
            session_sub: OnceLock::new(),
        }
    }

    /// Listen to an arbitrary topic (e.g. `results:updated`) for as long as
    /// the returned listener is alive.
    pub fn listen<F>(&self, topic: impl Into<Topic>, listener: F) -> TopicListener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let bus = self.manager.bus().clone();
        let subscription = bus.subscribe(topic, listener);
        TopicListener { bus, subscription }
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Per-subscriber view of the store. Subscribes lazily; unsubscribes on drop.
pub struct Binding {
    store: Store,
    rerender: Rerender,
    game_sub: OnceLock<Subscription>,
    session_sub: OnceLock<Subscription>,
}

impl Binding {
    /// Current game state; registers for `gamestate:updated` on first use.
    pub fn game_state(&self) -> Arc<GameState> {
        self.watch(&self.game_sub, Topic::GAMESTATE_UPDATED);
        self.store.game_state()
    }

    /// Current session; registers for `session:changed` on first use.
    pub fn session(&self) -> SessionState {
        self.watch(&self.session_sub, Topic::SESSION_CHANGED);
        self.store.session()
    }

    /// The store this binding reads from, for calling mutators.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Number of topics this binding is registered for.
    pub fn subscription_count(&self) -> usize {
        usize::from(self.game_sub.get().is_some()) + usize::from(self.session_sub.get().is_some())
    }

    fn watch(&self, slot: &OnceLock<Subscription>, topic: Topic) {
        slot.get_or_init(|| {
            let rerender = self.rerender.clone();
            debug!(%topic, "binding subscribed");
            self.store
                .manager
                .bus()
                .subscribe(topic, move |_| (*rerender)())
        });
    }

    fn bus(&self) -> &EventBus {
        self.store.manager.bus()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        for sub in [self.game_sub.take(), self.session_sub.take()]
            .into_iter()
            .flatten()
        {
            self.bus().unsubscribe(&sub);
        }
    }
}

/// Arbitrary-topic listener; unsubscribes on drop.
pub struct TopicListener {
    bus: EventBus,
    subscription: Subscription,
}

impl TopicListener {
    pub fn topic(&self) -> &Topic {
        self.subscription.topic()
    }
}

impl Drop for TopicListener {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.subscription);
    }
}
