//! Resource subscription index
//!
//! Keeps two mirrored maps, URI to subscribers and subscriber to URIs, behind
//! one lock so every mutation updates both sides together. Fan-out works on a
//! snapshot taken before any callback runs.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A change to the index, reported to the observer after it is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A new (uri, subscriber) pair
    Subscribed { uri: String, subscriber: String },
    /// A pair was removed
    Unsubscribed { uri: String, subscriber: String },
}

type Observer = Arc<dyn Fn(&SubscriptionEvent) + Send + Sync>;

#[derive(Default)]
struct Index {
    by_uri: HashMap<String, BTreeSet<String>>,
    by_subscriber: HashMap<String, BTreeSet<String>>,
}

impl Index {
    fn insert(&mut self, uri: &str, subscriber: &str) -> bool {
        let added = self
            .by_uri
            .entry(uri.to_string())
            .or_default()
            .insert(subscriber.to_string());
        if added {
            self.by_subscriber
                .entry(subscriber.to_string())
                .or_default()
                .insert(uri.to_string());
        }
        added
    }

    fn remove(&mut self, uri: &str, subscriber: &str) -> bool {
        let removed = match self.by_uri.get_mut(uri) {
            Some(subs) => {
                let removed = subs.remove(subscriber);
                if subs.is_empty() {
                    self.by_uri.remove(uri);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(uris) = self.by_subscriber.get_mut(subscriber) {
                uris.remove(uri);
                if uris.is_empty() {
                    self.by_subscriber.remove(subscriber);
                }
            }
        }
        removed
    }
}

/// Bidirectional index of resource URIs and subscriber ids
#[derive(Default)]
pub struct SubscriptionManager {
    index: Mutex<Index>,
    observer: Option<Observer>,
}

impl SubscriptionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that reports every change to `observer`
    pub fn with_observer<F>(observer: F) -> Self
    where
        F: Fn(&SubscriptionEvent) + Send + Sync + 'static,
    {
        Self {
            index: Mutex::new(Index::default()),
            observer: Some(Arc::new(observer)),
        }
    }

    /// Subscribe `subscriber` to `uri`. Returns false if already subscribed.
    pub fn subscribe(&self, uri: &str, subscriber: &str) -> bool {
        let added = self.index.lock().insert(uri, subscriber);
        if added {
            self.emit(SubscriptionEvent::Subscribed {
                uri: uri.to_string(),
                subscriber: subscriber.to_string(),
            });
        }
        added
    }

    /// Remove one pair. Returns false if it did not exist.
    pub fn unsubscribe(&self, uri: &str, subscriber: &str) -> bool {
        let removed = self.index.lock().remove(uri, subscriber);
        if removed {
            self.emit(SubscriptionEvent::Unsubscribed {
                uri: uri.to_string(),
                subscriber: subscriber.to_string(),
            });
        }
        removed
    }

    /// Remove every subscription held by `subscriber`, returning the URIs it had
    pub fn unsubscribe_all(&self, subscriber: &str) -> Vec<String> {
        let uris: Vec<String> = {
            let mut index = self.index.lock();
            let uris: Vec<String> = index
                .by_subscriber
                .get(subscriber)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            for uri in &uris {
                index.remove(uri, subscriber);
            }
            uris
        };
        for uri in &uris {
            self.emit(SubscriptionEvent::Unsubscribed {
                uri: uri.clone(),
                subscriber: subscriber.to_string(),
            });
        }
        uris
    }

    /// Subscribers of `uri`, sorted
    pub fn subscribers(&self, uri: &str) -> Vec<String> {
        self.index
            .lock()
            .by_uri
            .get(uri)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether anyone is subscribed to `uri`
    pub fn has_subscribers(&self, uri: &str) -> bool {
        self.index.lock().by_uri.contains_key(uri)
    }

    /// URIs `subscriber` is subscribed to, sorted
    pub fn subscriptions(&self, subscriber: &str) -> Vec<String> {
        self.index
            .lock()
            .by_subscriber
            .get(subscriber)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Call `f` once per current subscriber of `uri` and return how many were visited.
    ///
    /// Changes made by `f` (or concurrently) are not seen by this pass.
    pub fn notify_subscribers<F>(&self, uri: &str, mut f: F) -> usize
    where
        F: FnMut(&str),
    {
        let snapshot = self.subscribers(uri);
        for subscriber in &snapshot {
            f(subscriber);
        }
        snapshot.len()
    }

    fn emit(&self, event: SubscriptionEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("SubscriptionManager")
            .field("uris", &index.by_uri.len())
            .field("subscribers", &index.by_subscriber.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_then_unsubscribe_leaves_nothing() {
        let manager = SubscriptionManager::new();
        assert!(manager.subscribe("file:///a", "c1"));
        assert!(!manager.subscribe("file:///a", "c1"));
        assert!(manager.has_subscribers("file:///a"));
        assert_eq!(manager.subscriptions("c1"), vec!["file:///a".to_string()]);

        assert!(manager.unsubscribe("file:///a", "c1"));
        assert!(!manager.has_subscribers("file:///a"));
        assert!(manager.subscribers("file:///a").is_empty());
        assert!(manager.subscriptions("c1").is_empty());
        assert!(!manager.unsubscribe("file:///a", "c1"));
    }

    #[test]
    fn test_unsubscribe_all_removes_both_sides() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a://1", "c1");
        manager.subscribe("a://2", "c1");
        manager.subscribe("a://2", "c2");

        let removed = manager.unsubscribe_all("c1");
        assert_eq!(removed, vec!["a://1".to_string(), "a://2".to_string()]);
        assert!(!manager.has_subscribers("a://1"));
        assert_eq!(manager.subscribers("a://2"), vec!["c2".to_string()]);
        assert!(manager.subscriptions("c1").is_empty());
    }

    #[test]
    fn test_observer_sees_every_change() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let manager = SubscriptionManager::with_observer(move |e| sink.lock().push(e.clone()));

        manager.subscribe("a://1", "c1");
        manager.subscribe("a://1", "c1");
        manager.unsubscribe_all("c1");

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SubscriptionEvent::Unsubscribed { .. }));
    }

    #[test]
    fn test_observer_may_reenter_manager() {
        let slot: Arc<std::sync::OnceLock<std::sync::Weak<SubscriptionManager>>> = Arc::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (observer_slot, observer_seen) = (slot.clone(), seen.clone());
        let manager = Arc::new(SubscriptionManager::with_observer(move |e| {
            if let Some(manager) = observer_slot.get().and_then(|w| w.upgrade()) {
                if let SubscriptionEvent::Subscribed { uri, .. } = e {
                    observer_seen.lock().push(manager.subscribers(uri));
                }
            }
        }));
        slot.set(Arc::downgrade(&manager)).unwrap();

        manager.subscribe("a://1", "c1");
        assert_eq!(*seen.lock(), vec![vec!["c1".to_string()]]);
    }

    #[test]
    fn test_fan_out_uses_snapshot() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a://1", "c1");
        manager.subscribe("a://1", "c2");

        let mut seen = Vec::new();
        let count = manager.notify_subscribers("a://1", |s| {
            seen.push(s.to_string());
            manager.subscribe("a://1", "late");
            manager.unsubscribe("a://1", "c2");
        });

        assert_eq!(count, 2);
        assert_eq!(seen, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(manager.subscribers("a://1"), vec!["c1".to_string(), "late".to_string()]);
    }
}
