// Connection fan-out hub: tracks live observer connections and multiplexes
// broadcast messages to all of them without ever blocking the sender.
//
// The connection set is keyed by an opaque per-connection id, so one
// participant with several tabs open holds several independent entries.
// Presence (user_joined / user_left) is tracked per participant: only the
// first connection for a user announces a join, only the last announces a
// leave. Delivery is a bounded non-blocking attempt; a connection whose
// backlog is full or whose receiver is gone is dropped on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::draft::pick::UserId;
use crate::protocol::ServerMessage;

/// Opaque identity of a single observer connection, distinct from the
/// participant it represents.
pub type ConnectionId = u64;

/// Handed back from [`Hub::register`]: the connection's id and the receiving
/// end of its outbox. The WebSocket writer task drains the outbox into the
/// socket; when the hub drops the connection the outbox closes and the
/// writer ends.
pub struct Registration {
    pub connection_id: ConnectionId,
    pub outbox: mpsc::Receiver<String>,
}

struct ClientHandle {
    user_id: UserId,
    tx: mpsc::Sender<String>,
}

/// The fan-out hub for one draft room.
pub struct Hub {
    next_id: AtomicU64,
    buffer: usize,
    clients: Mutex<HashMap<ConnectionId, ClientHandle>>,
}

impl Hub {
    /// `buffer` bounds each connection's outbox; a connection that falls
    /// this many messages behind is dropped as dead.
    pub fn new(buffer: usize) -> Self {
        Hub {
            next_id: AtomicU64::new(1),
            buffer,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Add a connection for `user_id`. If it is the user's first live
    /// connection, all *other* connections are told the user joined; extra
    /// tabs attach silently.
    pub fn register(&self, user_id: UserId) -> Registration {
        let (tx, rx) = mpsc::channel(self.buffer);
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut clients = self.lock();
        let already_connected = clients.values().any(|c| c.user_id == user_id);
        clients.insert(connection_id, ClientHandle { user_id, tx });
        info!(user_id, connection_id, "client connected");

        if !already_connected {
            if let Some(text) = encode(&ServerMessage::UserJoined { user_id }) {
                deliver(&mut clients, Some(connection_id), &text);
            }
        }

        Registration {
            connection_id,
            outbox: rx,
        }
    }

    /// Remove a connection and close its outbox. If no other connection
    /// shares the participant, the remaining connections are told the user
    /// left. Unknown ids (already dropped as dead) are ignored.
    pub fn unregister(&self, connection_id: ConnectionId) {
        let mut clients = self.lock();
        let Some(client) = clients.remove(&connection_id) else {
            return;
        };
        info!(user_id = client.user_id, connection_id, "client disconnected");

        let still_connected = clients.values().any(|c| c.user_id == client.user_id);
        if !still_connected {
            if let Some(text) = encode(&ServerMessage::UserLeft {
                user_id: client.user_id,
            }) {
                deliver(&mut clients, None, &text);
            }
        }
    }

    /// Deliver `text` to every registered connection. Never blocks: a full
    /// or closed outbox marks that connection dead and removes it, without
    /// surfacing an error to the caller.
    pub fn broadcast(&self, text: &str) {
        let mut clients = self.lock();
        deliver(&mut clients, None, text);
    }

    /// Deliver `text` to a single connection, with the same dead-connection
    /// handling as [`Hub::broadcast`].
    pub fn send_to(&self, connection_id: ConnectionId, text: &str) {
        let mut clients = self.lock();
        let Some(client) = clients.get(&connection_id) else {
            return;
        };
        if client.tx.try_send(text.to_string()).is_err() {
            clients.remove(&connection_id);
            warn!(connection_id, "removed dead client (send failed)");
        }
    }

    /// Number of live connections (not participants).
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Deduplicated ids of all participants with at least one live
    /// connection.
    pub fn connected_user_ids(&self) -> Vec<UserId> {
        let clients = self.lock();
        let mut seen = Vec::with_capacity(clients.len());
        for client in clients.values() {
            if !seen.contains(&client.user_id) {
                seen.push(client.user_id);
            }
        }
        seen
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ClientHandle>> {
        self.clients.lock().expect("hub connection set lock poisoned")
    }
}

fn encode(msg: &ServerMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("failed to encode hub message: {e}");
            None
        }
    }
}

/// Attempt delivery to every connection except `skip`, removing any
/// connection whose outbox is full or closed.
fn deliver(
    clients: &mut HashMap<ConnectionId, ClientHandle>,
    skip: Option<ConnectionId>,
    text: &str,
) {
    let mut dead = Vec::new();
    for (id, client) in clients.iter() {
        if Some(*id) == skip {
            continue;
        }
        if client.tx.try_send(text.to_string()).is_err() {
            dead.push(*id);
        }
    }
    for id in dead {
        clients.remove(&id);
        warn!(connection_id = id, "removed dead client (send failed)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(outbox: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(text) = outbox.try_recv() {
            messages.push(serde_json::from_str(&text).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let hub = Hub::new(16);
        let mut a = hub.register(1);
        let mut b = hub.register(2);

        hub.broadcast(r#"{"type":"ping"}"#);

        assert_eq!(drain(&mut a.outbox).last().unwrap()["type"], "ping");
        assert_eq!(drain(&mut b.outbox).last().unwrap()["type"], "ping");
    }

    #[tokio::test]
    async fn first_connection_announces_join_to_others_only() {
        let hub = Hub::new(16);
        let mut observer = hub.register(99);

        let mut first = hub.register(1);
        let seen = drain(&mut observer.outbox);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["type"], "user_joined");
        assert_eq!(seen[0]["userID"], 1);

        // The joining connection does not hear about itself.
        assert!(drain(&mut first.outbox).is_empty());
    }

    #[tokio::test]
    async fn second_tab_joins_silently() {
        let hub = Hub::new(16);
        let mut observer = hub.register(99);
        let _tab1 = hub.register(1);
        drain(&mut observer.outbox);

        let _tab2 = hub.register(1);
        assert!(drain(&mut observer.outbox).is_empty());
        assert_eq!(hub.client_count(), 3);
        assert_eq!(hub.connected_user_ids().len(), 2);
    }

    #[tokio::test]
    async fn leave_announced_only_when_last_connection_drops() {
        let hub = Hub::new(16);
        let mut observer = hub.register(99);
        let tab1 = hub.register(1);
        let tab2 = hub.register(1);
        drain(&mut observer.outbox);

        hub.unregister(tab1.connection_id);
        assert!(
            drain(&mut observer.outbox).is_empty(),
            "user 1 still has a live tab, no user_left yet"
        );

        hub.unregister(tab2.connection_id);
        let seen = drain(&mut observer.outbox);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["type"], "user_left");
        assert_eq!(seen[0]["userID"], 1);
    }

    #[tokio::test]
    async fn unregister_closes_the_outbox() {
        let hub = Hub::new(16);
        let mut reg = hub.register(1);
        hub.unregister(reg.connection_id);
        assert_eq!(reg.outbox.recv().await, None);
    }

    #[tokio::test]
    async fn saturated_connection_is_dropped_others_still_delivered() {
        let hub = Hub::new(1);
        let slow = hub.register(1);
        let mut healthy = hub.register(2);

        // Fill the slow connection's single-slot outbox, drain the healthy one.
        hub.broadcast("first");
        drain(&mut healthy.outbox);

        hub.broadcast("second");

        assert_eq!(hub.client_count(), 1, "slow connection removed");
        let seen: Vec<String> = {
            let mut texts = Vec::new();
            while let Ok(t) = healthy.outbox.try_recv() {
                texts.push(t);
            }
            texts
        };
        assert_eq!(seen, vec!["second".to_string()]);

        // The slow connection's outbox was closed by removal.
        drop(slow);
    }

    #[tokio::test]
    async fn send_to_targets_one_connection() {
        let hub = Hub::new(16);
        let mut a = hub.register(1);
        let mut b = hub.register(2);

        hub.send_to(a.connection_id, "only-for-a");

        let mut a_texts = Vec::new();
        while let Ok(t) = a.outbox.try_recv() {
            a_texts.push(t);
        }
        assert_eq!(a_texts, vec!["only-for-a".to_string()]);
        assert!(b.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn connected_user_ids_deduplicates() {
        let hub = Hub::new(16);
        let _a = hub.register(1);
        let _b = hub.register(1);
        let _c = hub.register(2);

        let mut ids = hub.connected_user_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
