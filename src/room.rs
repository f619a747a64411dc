// Draft rooms: one turn engine + one hub per draft, indexed by draft id.
//
// Creating a room wires the engine's event stream into the hub: a single
// pump task drains the stream, serializes each event once, and broadcasts
// it. Because every observer is fed from that one ordered path, all
// connections see events in the same relative order. The pick-result and
// completion streams are left for the storage collaborator to claim.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::draft::pick::{DraftId, PickResult, PlayerId};
use crate::draft::state::{DraftState, DraftStreams};
use crate::hub::Hub;
use crate::protocol::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("draft room {0} already exists")]
    RoomExists(DraftId),
    #[error("no players assigned to this draft")]
    NoPlayers,
}

/// A running draft: the engine/hub pair plus the one-time-claimable output
/// streams.
pub struct Room {
    draft_id: DraftId,
    state: Arc<DraftState>,
    hub: Arc<Hub>,
    player_pool: Vec<PlayerId>,
    picks: Mutex<Option<mpsc::Receiver<PickResult>>>,
    completed: Mutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("draft_id", &self.draft_id)
            .field("player_pool", &self.player_pool)
            .finish_non_exhaustive()
    }
}

impl Room {
    pub fn draft_id(&self) -> DraftId {
        self.draft_id
    }

    pub fn state(&self) -> &Arc<DraftState> {
        &self.state
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The eligible players this room was created with.
    pub fn player_pool(&self) -> &[PlayerId] {
        &self.player_pool
    }

    /// Claim the finalized-pick stream. Returns `Some` exactly once; the
    /// persistence collaborator drains it independently of the hub.
    pub fn take_pick_results(&self) -> Option<mpsc::Receiver<PickResult>> {
        self.picks.lock().expect("room pick stream lock poisoned").take()
    }

    /// Claim the one-shot completion signal. Returns `Some` exactly once.
    pub fn take_completed(&self) -> Option<oneshot::Receiver<()>> {
        self.completed
            .lock()
            .expect("room completion lock poisoned")
            .take()
    }
}

/// Directory of running rooms, keyed by draft id. Owned by the composition
/// root and shared with the connection layer.
pub struct RoomRegistry {
    channel_capacity: usize,
    client_buffer: usize,
    rooms: Mutex<HashMap<DraftId, Arc<Room>>>,
}

impl RoomRegistry {
    /// `channel_capacity` bounds each engine's event/pick streams;
    /// `client_buffer` bounds each hub connection's outbox.
    pub fn new(channel_capacity: usize, client_buffer: usize) -> Self {
        RoomRegistry {
            channel_capacity,
            client_buffer,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Create a room for `draft_id` and spawn its event pump. Fails if a
    /// room with that id already exists or if the player pool is empty.
    pub fn create(
        &self,
        draft_id: DraftId,
        player_ids: Vec<PlayerId>,
    ) -> Result<Arc<Room>, RoomError> {
        if player_ids.is_empty() {
            return Err(RoomError::NoPlayers);
        }

        let mut rooms = self.lock();
        if rooms.contains_key(&draft_id) {
            return Err(RoomError::RoomExists(draft_id));
        }

        let (state, streams) = DraftState::new(draft_id, self.channel_capacity);
        let DraftStreams {
            events,
            picks,
            completed,
        } = streams;

        let hub = Arc::new(Hub::new(self.client_buffer));
        tokio::spawn(pump_events(draft_id, events, Arc::clone(&hub)));

        let room = Arc::new(Room {
            draft_id,
            state,
            hub,
            player_pool: player_ids,
            picks: Mutex::new(Some(picks)),
            completed: Mutex::new(Some(completed)),
        });
        rooms.insert(draft_id, Arc::clone(&room));
        info!(
            draft_id,
            players = room.player_pool.len(),
            "draft room created"
        );

        Ok(room)
    }

    pub fn get(&self, draft_id: DraftId) -> Option<Arc<Room>> {
        self.lock().get(&draft_id).cloned()
    }

    /// Drop a room from the directory, typically once its draft has
    /// completed and its streams are drained. Live connections keep their
    /// handles; only new lookups miss.
    pub fn remove(&self, draft_id: DraftId) -> Option<Arc<Room>> {
        let room = self.lock().remove(&draft_id);
        if room.is_some() {
            info!(draft_id, "draft room removed");
        }
        room
    }

    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DraftId, Arc<Room>>> {
        self.rooms.lock().expect("room registry lock poisoned")
    }
}

/// Drain the engine's event stream into the hub. Ends when the engine is
/// dropped and the stream closes.
async fn pump_events(draft_id: DraftId, mut events: mpsc::Receiver<ServerMessage>, hub: Arc<Hub>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(text) => hub.broadcast(&text),
            Err(e) => warn!(draft_id, "failed to encode draft event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const LONG_TURN: Duration = Duration::from_secs(3600);

    async fn recv_json(outbox: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let text = timeout(Duration::from_secs(5), outbox.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("outbox closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_returns_same_room() {
        let registry = RoomRegistry::new(256, 256);
        let room = registry.create(7, vec![10, 20]).unwrap();
        let found = registry.get(7).expect("room should be registered");
        assert_eq!(found.draft_id(), room.draft_id());
        assert_eq!(found.player_pool(), &[10, 20]);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_draft_id() {
        let registry = RoomRegistry::new(256, 256);
        registry.create(7, vec![10]).unwrap();
        let err = registry.create(7, vec![20]).unwrap_err();
        assert_eq!(err, RoomError::RoomExists(7));
    }

    #[tokio::test]
    async fn create_rejects_empty_player_pool() {
        let registry = RoomRegistry::new(256, 256);
        let err = registry.create(7, vec![]).unwrap_err();
        assert_eq!(err, RoomError::NoPlayers);
        assert!(registry.get(7).is_none());
    }

    #[tokio::test]
    async fn get_unknown_room_is_none() {
        let registry = RoomRegistry::new(256, 256);
        assert!(registry.get(404).is_none());
    }

    #[tokio::test]
    async fn remove_drops_the_room() {
        let registry = RoomRegistry::new(256, 256);
        registry.create(7, vec![10]).unwrap();
        assert!(registry.remove(7).is_some());
        assert!(registry.get(7).is_none());
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn pick_results_claimable_once() {
        let registry = RoomRegistry::new(256, 256);
        let room = registry.create(7, vec![10]).unwrap();
        assert!(room.take_pick_results().is_some());
        assert!(room.take_pick_results().is_none());
        assert!(room.take_completed().is_some());
        assert!(room.take_completed().is_none());
    }

    #[tokio::test]
    async fn pump_broadcasts_engine_events_in_order_to_all_connections() {
        let registry = RoomRegistry::new(256, 256);
        let room = registry.create(7, vec![10, 20]).unwrap();

        let mut a = room.hub().register(1);
        let mut b = room.hub().register(2);
        // Drop the join notice a received when b attached.
        let _ = recv_json(&mut a.outbox).await;

        room.state()
            .start(vec![1, 2], 1, LONG_TURN, vec![10, 20])
            .await
            .unwrap();
        room.state().make_pick(1, 10).await.unwrap();

        for outbox in [&mut a.outbox, &mut b.outbox] {
            let started = recv_json(outbox).await;
            assert_eq!(started["type"], "draft_started");
            assert_eq!(started["draftID"], 7);
            let picked = recv_json(outbox).await;
            assert_eq!(picked["type"], "pick_made");
            assert_eq!(picked["playerID"], 10);
            let turn = recv_json(outbox).await;
            assert_eq!(turn["type"], "turn_changed");
            assert_eq!(turn["currentTurn"], 2);
        }
    }
}
