// In-process publish/subscribe registry keyed by named topics.
//
// Delivery is synchronous: `publish` runs every subscriber callback, in
// subscription order, before it returns. A panicking callback is caught and
// logged so the remaining subscribers are still notified.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::game::{AthleteId, GameState};
use crate::session::SessionState;

// ---------------------------------------------------------------------------
// Topics and payloads
// ---------------------------------------------------------------------------

/// A named channel. Topics need no declaration; any string works.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(Cow<'static, str>);

impl Topic {
    /// A fresh game-state snapshot or optimistic update was applied.
    pub const GAMESTATE_UPDATED: Topic = Topic(Cow::Borrowed("gamestate:updated"));
    /// Loading game state failed.
    pub const GAMESTATE_ERROR: Topic = Topic(Cow::Borrowed("gamestate:error"));
    /// The session was updated or cleared.
    pub const SESSION_CHANGED: Topic = Topic(Cow::Borrowed("session:changed"));
    /// Race results were recorded.
    pub const RESULTS_UPDATED: Topic = Topic(Cow::Borrowed("results:updated"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Topic(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Topic {
    fn from(name: &'static str) -> Self {
        Topic(Cow::Borrowed(name))
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic(Cow::Owned(name))
    }
}

/// Data carried alongside a published event.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    GameState {
        game_id: Option<String>,
        state: Arc<GameState>,
    },
    Session(SessionState),
    Error {
        game_id: String,
        message: String,
    },
    Results {
        game_id: Option<String>,
        athlete_ids: Vec<AthleteId>,
    },
    Json(serde_json::Value),
}

/// A single delivery: the topic it was published on and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: Topic,
    pub payload: Option<Payload>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass it to
/// [`EventBus::unsubscribe`] to remove the registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<(u64, Callback)>>,
}

/// Publish/subscribe registry. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `topic`. Callbacks run in the order they
    /// were registered.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        debug!(%topic, id, "subscribed");
        Subscription { topic, id }
    }

    /// Remove a registration. Returns `false` if it was already removed;
    /// calling this more than once is harmless.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut registry = self.registry();
        let Some(callbacks) = registry.topics.get_mut(&subscription.topic) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != subscription.id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            registry.topics.remove(&subscription.topic);
        }
        if removed {
            debug!(topic = %subscription.topic, id = subscription.id, "unsubscribed");
        }
        removed
    }

    /// Deliver `payload` to every callback currently registered for `topic`.
    ///
    /// The subscriber list is snapshotted first, so callbacks may subscribe
    /// or unsubscribe (or publish) re-entrantly. A callback removed during
    /// this delivery may still receive this event. Returns how many
    /// callbacks completed without panicking.
    pub fn publish(&self, topic: impl Into<Topic>, payload: Option<Payload>) -> usize {
        let topic = topic.into();
        let callbacks: Vec<(u64, Callback)> = match self.registry().topics.get(&topic) {
            Some(callbacks) => callbacks.clone(),
            None => {
                debug!(%topic, "publish with no subscribers");
                return 0;
            }
        };

        let event = Event { topic, payload };
        let mut delivered = 0;
        for (id, callback) in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| (*callback)(&event))) {
                Ok(()) => delivered += 1,
                Err(cause) => {
                    error!(
                        topic = %event.topic,
                        id,
                        "subscriber panicked during delivery: {}",
                        panic_message(cause.as_ref())
                    );
                }
            }
        }
        debug!(topic = %event.topic, delivered, "published");
        delivered
    }

    /// Number of callbacks registered for `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry().topics.get(topic).map_or(0, Vec::len)
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: a shared log that callbacks append to.
    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nobody:listening", None), 0);
    }

    #[test]
    fn callbacks_run_in_subscription_order_once() {
        let bus = EventBus::new();
        let calls = log();
        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            bus.subscribe(Topic::GAMESTATE_UPDATED, move |_| {
                calls.lock().unwrap().push(name.to_string());
            });
        }

        assert_eq!(bus.publish(Topic::GAMESTATE_UPDATED, None), 3);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_topic_is_notified() {
        let bus = EventBus::new();
        let calls = log();
        let c = calls.clone();
        bus.subscribe(Topic::SESSION_CHANGED, move |e| {
            c.lock().unwrap().push(e.topic.to_string());
        });

        bus.publish(Topic::GAMESTATE_UPDATED, None);
        assert!(calls.lock().unwrap().is_empty());

        bus.publish(Topic::SESSION_CHANGED, None);
        assert_eq!(*calls.lock().unwrap(), vec!["session:changed"]);
    }

    #[test]
    fn payload_is_passed_through() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        bus.subscribe("custom:topic", move |e| {
            *s.lock().unwrap() = e.payload.clone();
        });

        let payload = Payload::Json(serde_json::json!({"lap": 3}));
        bus.publish("custom:topic", Some(payload.clone()));
        assert_eq!(*seen.lock().unwrap(), Some(payload));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let calls = log();
        let c = calls.clone();
        let sub = bus.subscribe(Topic::GAMESTATE_UPDATED, move |_| {
            c.lock().unwrap().push("called".into());
        });

        assert!(bus.unsubscribe(&sub));
        assert!(!bus.unsubscribe(&sub));
        assert_eq!(bus.subscriber_count(&Topic::GAMESTATE_UPDATED), 0);

        bus.publish(Topic::GAMESTATE_UPDATED, None);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let bus = EventBus::new();
        let calls = log();

        let c1 = calls.clone();
        bus.subscribe("t", move |_| c1.lock().unwrap().push("before".into()));
        bus.subscribe("t", |_| panic!("subscriber failure"));
        let c3 = calls.clone();
        bus.subscribe("t", move |_| c3.lock().unwrap().push("after".into()));

        assert_eq!(bus.publish("t", None), 2);
        assert_eq!(*calls.lock().unwrap(), vec!["before", "after"]);
    }

    #[test]
    fn unsubscribe_during_delivery_is_safe() {
        let bus = EventBus::new();
        let calls = log();

        // The second subscription is removed by the first callback while
        // the event is being delivered.
        let second: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let bus_clone = bus.clone();
        let second_clone = second.clone();
        let c1 = calls.clone();
        bus.subscribe("t", move |_| {
            c1.lock().unwrap().push("first".into());
            if let Some(sub) = second_clone.lock().unwrap().take() {
                bus_clone.unsubscribe(&sub);
            }
        });
        let c2 = calls.clone();
        let sub = bus.subscribe("t", move |_| c2.lock().unwrap().push("second".into()));
        *second.lock().unwrap() = Some(sub);

        bus.publish("t", None);
        bus.publish("t", None);

        let calls = calls.lock().unwrap();
        // The in-flight delivery still reached the removed subscriber; the
        // next one did not.
        assert_eq!(calls.iter().filter(|c| *c == "first").count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "second").count(), 1);
        assert_eq!(bus.subscriber_count(&Topic::new("t")), 1);
    }

    #[test]
    fn subscribe_during_delivery_takes_effect_next_publish() {
        let bus = EventBus::new();
        let calls = log();

        let bus_clone = bus.clone();
        let c = calls.clone();
        bus.subscribe("t", move |_| {
            let inner = c.clone();
            bus_clone.subscribe("t", move |_| inner.lock().unwrap().push("late".into()));
        });

        assert_eq!(bus.publish("t", None), 1);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(&Topic::new("t")), 2);
    }

    #[test]
    fn topic_constants_have_stable_names() {
        assert_eq!(Topic::GAMESTATE_UPDATED.as_str(), "gamestate:updated");
        assert_eq!(Topic::GAMESTATE_ERROR.as_str(), "gamestate:error");
        assert_eq!(Topic::SESSION_CHANGED.as_str(), "session:changed");
        assert_eq!(Topic::RESULTS_UPDATED.as_str(), "results:updated");
        assert_eq!(Topic::from("results:updated"), Topic::RESULTS_UPDATED);
        assert_eq!(Topic::from(String::from("session:changed")), Topic::SESSION_CHANGED);
    }
}
