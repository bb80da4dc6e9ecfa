//! Subscription registry: event name ↔ connection index.
//!
//! Two maps kept as exact inverses of each other:
//! - `events[event]` holds every connection subscribed to `event`, and the
//!   key exists only while at least one subscriber remains
//! - `connections[id]` holds the connection and the events it subscribed to,
//!   used to reverse-clean on disconnect
//!
//! Pure data structure, no I/O. The [`EventHub`](crate::EventHub) serializes
//! access behind a mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pihub_core::ConnectionId;
use thiserror::Error;

use crate::websocket::connection::Connection;

/// Registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection was not subscribed to the event.
    #[error("not subscribed to {event}")]
    NotSubscribed {
        /// Event name.
        event: String,
    },
}

struct Entry {
    conn: Arc<Connection>,
    events: HashSet<String>,
}

/// Bidirectional subscription index.
#[derive(Default)]
pub struct SubscriptionRegistry {
    events: HashMap<String, HashMap<ConnectionId, Arc<Connection>>>,
    connections: HashMap<ConnectionId, Entry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a live connection with no subscriptions yet.
    ///
    /// Returns `false` if it was already tracked.
    pub fn add_connection(&mut self, conn: Arc<Connection>) -> bool {
        let id = conn.id().clone();
        if self.connections.contains_key(&id) {
            return false;
        }
        let _ = self.connections.insert(
            id,
            Entry {
                conn,
                events: HashSet::new(),
            },
        );
        true
    }

    /// Subscribe `conn` to `event`. Idempotent.
    ///
    /// Returns `true` if this added a new subscription.
    pub fn subscribe(&mut self, conn: &Arc<Connection>, event: &str) -> bool {
        let entry = self
            .connections
            .entry(conn.id().clone())
            .or_insert_with(|| Entry {
                conn: Arc::clone(conn),
                events: HashSet::new(),
            });
        if !entry.events.insert(event.to_owned()) {
            return false;
        }
        let _ = self
            .events
            .entry(event.to_owned())
            .or_default()
            .insert(conn.id().clone(), Arc::clone(conn));
        true
    }

    /// Remove the subscription of `id` to `event`, deleting the event key
    /// once its last subscriber leaves.
    pub fn unsubscribe(&mut self, id: &ConnectionId, event: &str) -> Result<(), RegistryError> {
        let removed = self
            .connections
            .get_mut(id)
            .is_some_and(|entry| entry.events.remove(event));
        if !removed {
            return Err(RegistryError::NotSubscribed {
                event: event.to_owned(),
            });
        }
        self.remove_from_event(id, event);
        Ok(())
    }

    /// Snapshot of the current subscribers of `event`.
    ///
    /// The returned list is detached from the registry, so it stays valid
    /// while subscriptions change during delivery.
    pub fn subscribers_of(&self, event: &str) -> Vec<Arc<Connection>> {
        self.events
            .get(event)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether anyone is subscribed to `event`.
    pub fn has_subscribers(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    /// Remove `id` from every event it subscribed to and stop tracking it.
    ///
    /// Returns the events it was subscribed to (empty if unknown).
    pub fn drop_connection(&mut self, id: &ConnectionId) -> Vec<String> {
        let Some(entry) = self.connections.remove(id) else {
            return Vec::new();
        };
        let mut events: Vec<String> = entry.events.into_iter().collect();
        for event in &events {
            self.remove_from_event(id, event);
        }
        events.sort_unstable();
        events
    }

    /// Events `id` is subscribed to, sorted.
    pub fn subscriptions_of(&self, id: &ConnectionId) -> Vec<String> {
        let mut events: Vec<String> = self
            .connections
            .get(id)
            .map(|entry| entry.events.iter().cloned().collect())
            .unwrap_or_default();
        events.sort_unstable();
        events
    }

    /// A tracked connection by id.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(&entry.conn))
    }

    /// Tracked connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Event names with at least one subscriber.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn remove_from_event(&mut self, id: &ConnectionId, event: &str) {
        if let Some(subs) = self.events.get_mut(event) {
            let _ = subs.remove(id);
            if subs.is_empty() {
                let _ = self.events.remove(event);
            }
        }
    }

    /// Check that both maps are exact inverses and no key is empty.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let forward = self.events.iter().all(|(event, subs)| {
            !subs.is_empty()
                && subs.keys().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|entry| entry.events.contains(event))
                })
        });
        let backward = self.connections.iter().all(|(id, entry)| {
            entry
                .events
                .iter()
                .all(|event| self.events.get(event).is_some_and(|subs| subs.contains_key(id)))
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use assert_matches::assert_matches;

    fn conn(id: &str) -> Arc<Connection> {
        make_connection(id, 4).0
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        let c = conn("c1");
        assert!(reg.subscribe(&c, "measure"));
        assert!(!reg.subscribe(&c, "measure"));
        assert_eq!(reg.subscribers_of("measure").len(), 1);
        assert_eq!(reg.subscriptions_of(c.id()), vec!["measure"]);
        assert!(reg.is_consistent());
    }

    #[test]
    fn last_unsubscribe_deletes_event_key() {
        let mut reg = SubscriptionRegistry::new();
        let (a, b) = (conn("a"), conn("b"));
        let _ = reg.subscribe(&a, "measure");
        let _ = reg.subscribe(&b, "measure");

        reg.unsubscribe(a.id(), "measure").unwrap();
        assert!(reg.has_subscribers("measure"));
        reg.unsubscribe(b.id(), "measure").unwrap();
        assert!(!reg.has_subscribers("measure"));
        assert_eq!(reg.event_count(), 0);
        assert!(reg.is_consistent());
    }

    #[test]
    fn unsubscribe_unknown_is_not_subscribed() {
        let mut reg = SubscriptionRegistry::new();
        let c = conn("c1");
        let _ = reg.subscribe(&c, "a");
        assert_matches!(
            reg.unsubscribe(c.id(), "b"),
            Err(RegistryError::NotSubscribed { event }) if event == "b"
        );
        assert_matches!(
            reg.unsubscribe(&ConnectionId::from("ghost"), "a"),
            Err(RegistryError::NotSubscribed { .. })
        );
        assert!(reg.has_subscribers("a"));
    }

    #[test]
    fn drop_connection_cleans_every_event() {
        let mut reg = SubscriptionRegistry::new();
        let (a, b) = (conn("a"), conn("b"));
        for event in ["x", "y", "z"] {
            let _ = reg.subscribe(&a, event);
        }
        let _ = reg.subscribe(&b, "y");

        assert_eq!(reg.drop_connection(a.id()), vec!["x", "y", "z"]);
        assert_eq!(reg.event_count(), 1);
        assert_eq!(reg.subscribers_of("y").len(), 1);
        assert!(reg.subscribers_of("x").is_empty());
        assert!(reg.connection(a.id()).is_none());
        assert!(reg.is_consistent());
    }

    #[test]
    fn drop_unknown_connection_is_noop() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.drop_connection(&ConnectionId::from("ghost")).is_empty());
    }

    #[test]
    fn tracked_connection_without_subscriptions() {
        let mut reg = SubscriptionRegistry::new();
        let c = conn("c1");
        assert!(reg.add_connection(Arc::clone(&c)));
        assert!(!reg.add_connection(Arc::clone(&c)));
        assert_eq!(reg.connection_count(), 1);
        assert_eq!(reg.event_count(), 0);
        let _ = reg.drop_connection(c.id());
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut reg = SubscriptionRegistry::new();
        let (a, b) = (conn("a"), conn("b"));
        let _ = reg.subscribe(&a, "e");
        let snapshot = reg.subscribers_of("e");
        let _ = reg.subscribe(&b, "e");
        let _ = reg.drop_connection(a.id());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id().as_str(), "a");
    }

    #[test]
    fn churn_keeps_maps_inverse() {
        let mut reg = SubscriptionRegistry::new();
        let conns: Vec<_> = (0..4).map(|i| conn(&format!("c{i}"))).collect();
        for (i, c) in conns.iter().enumerate() {
            for event in ["a", "b", "c"].iter().take(i + 1) {
                let _ = reg.subscribe(c, event);
            }
        }
        let _ = reg.unsubscribe(conns[3].id(), "c");
        let _ = reg.drop_connection(conns[1].id());
        let _ = reg.unsubscribe(conns[2].id(), "a");
        assert!(reg.is_consistent());
        assert_eq!(reg.subscribers_of("a").len(), 2);
        assert_eq!(reg.subscribers_of("c").len(), 1);
    }
}
