// Draft turn engine: per-draft state machine with deadline-driven auto-picks.
//
// All mutable state lives behind a single async mutex per draft. Every
// operation, including the timer-expiry path, runs under that lock for its
// full duration, so readers never observe a torn mid-advance state. Events
// and finalized picks leave the engine on bounded channels that the room
// layer drains; enqueueing under the lock is the accepted backpressure point
// when a consumer stops draining.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pick::{DraftId, PickResult, PlayerId, UserId};
use crate::protocol::ServerMessage;

/// Lifecycle status of a draft. Transitions are one-directional:
/// NotStarted -> InProgress -> Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DraftStatus::NotStarted => "not_started",
            DraftStatus::InProgress => "in_progress",
            DraftStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Failures reported synchronously to callers. None of these mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("draft already started")]
    AlreadyStarted,
    #[error("pick order cannot be empty")]
    EmptyPickOrder,
    #[error("available players cannot be empty")]
    EmptyPlayerPool,
    #[error("draft is not in progress")]
    NotActive,
    #[error("not your turn")]
    NotYourTurn,
    #[error("player not available")]
    PlayerUnavailable,
}

/// Receiving ends of a draft's output streams, returned once at creation.
///
/// `events` feeds the fan-out hub, `picks` feeds the persistence
/// collaborator, and `completed` fires exactly once when the final pick
/// resolves.
pub struct DraftStreams {
    pub events: mpsc::Receiver<ServerMessage>,
    pub picks: mpsc::Receiver<PickResult>,
    pub completed: oneshot::Receiver<()>,
}

struct Inner {
    status: DraftStatus,
    pick_order: Vec<UserId>,
    total_rounds: u32,
    turn_duration: Duration,
    current_pick_index: usize,
    round_number: u32,
    current_turn: UserId,
    turn_deadline: DateTime<Utc>,
    available_players: Vec<PlayerId>,
    timer: Option<JoinHandle<()>>,
    /// Monotonic per-turn counter. Each armed timer captures the epoch at
    /// arm time; a fired timer whose epoch no longer matches is stale and
    /// must not act, even if it slipped past the abort.
    timer_epoch: u64,
    completed_tx: Option<oneshot::Sender<()>>,
}

/// The turn engine for a single draft.
pub struct DraftState {
    draft_id: DraftId,
    events_tx: mpsc::Sender<ServerMessage>,
    picks_tx: mpsc::Sender<PickResult>,
    inner: Mutex<Inner>,
}

impl DraftState {
    /// Create a new engine in `NotStarted` with no timer running.
    ///
    /// `capacity` bounds both the event stream and the pick-result stream;
    /// it should be generous relative to the message rate (the room layer
    /// passes the configured value, 256 by default).
    pub fn new(draft_id: DraftId, capacity: usize) -> (Arc<Self>, DraftStreams) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (picks_tx, picks_rx) = mpsc::channel(capacity);
        let (completed_tx, completed_rx) = oneshot::channel();

        let state = Arc::new(DraftState {
            draft_id,
            events_tx,
            picks_tx,
            inner: Mutex::new(Inner {
                status: DraftStatus::NotStarted,
                pick_order: Vec::new(),
                total_rounds: 0,
                turn_duration: Duration::ZERO,
                current_pick_index: 0,
                round_number: 0,
                current_turn: 0,
                turn_deadline: Utc::now(),
                available_players: Vec::new(),
                timer: None,
                timer_epoch: 0,
                completed_tx: Some(completed_tx),
            }),
        });

        let streams = DraftStreams {
            events: events_rx,
            picks: picks_rx,
            completed: completed_rx,
        };
        (state, streams)
    }

    /// Start the draft with the given pick order, round count, per-turn time
    /// limit, and player pool. Arms the first deadline and emits
    /// `draft_started`. Duplicate player ids are dropped so the remaining
    /// pool behaves as a set.
    pub async fn start(
        self: &Arc<Self>,
        pick_order: Vec<UserId>,
        total_rounds: u32,
        turn_duration: Duration,
        available_players: Vec<PlayerId>,
    ) -> Result<(), DraftError> {
        let mut inner = self.inner.lock().await;

        if inner.status != DraftStatus::NotStarted {
            return Err(DraftError::AlreadyStarted);
        }
        if pick_order.is_empty() {
            return Err(DraftError::EmptyPickOrder);
        }
        if available_players.is_empty() {
            return Err(DraftError::EmptyPlayerPool);
        }

        let mut seen = HashSet::new();
        let mut pool = Vec::with_capacity(available_players.len());
        for id in available_players {
            if seen.insert(id) {
                pool.push(id);
            }
        }

        inner.current_turn = pick_order[0];
        inner.pick_order = pick_order;
        inner.total_rounds = total_rounds;
        inner.turn_duration = turn_duration;
        inner.available_players = pool;
        inner.current_pick_index = 0;
        inner.round_number = 1;
        inner.status = DraftStatus::InProgress;

        self.arm_timer(&mut inner);

        info!(
            draft_id = self.draft_id,
            participants = inner.pick_order.len(),
            rounds = inner.total_rounds,
            players = inner.available_players.len(),
            "draft started"
        );

        let msg = ServerMessage::DraftStarted {
            draft_id: self.draft_id,
            current_turn: inner.current_turn,
            round_number: inner.round_number,
            turn_deadline: inner.turn_deadline.timestamp(),
        };
        self.emit(msg).await;

        Ok(())
    }

    /// Process an explicit pick from a participant.
    ///
    /// Validates status, turn ownership, and player availability; a failure
    /// leaves all state unchanged and emits nothing. On success the deadline
    /// is cancelled, the pick is recorded and emitted, and the turn
    /// advances.
    pub async fn make_pick(
        self: &Arc<Self>,
        user_id: UserId,
        player_id: PlayerId,
    ) -> Result<PickResult, DraftError> {
        let mut inner = self.inner.lock().await;

        if inner.status != DraftStatus::InProgress {
            return Err(DraftError::NotActive);
        }
        if user_id != inner.current_turn {
            return Err(DraftError::NotYourTurn);
        }
        let Some(index) = inner.available_players.iter().position(|id| *id == player_id) else {
            return Err(DraftError::PlayerUnavailable);
        };

        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.available_players.remove(index);

        let pick = PickResult {
            draft_id: self.draft_id,
            user_id,
            player_id,
            pick_number: (inner.current_pick_index + 1) as u32,
            round: inner.round_number,
            auto_draft: false,
        };

        self.emit_pick(&pick).await;
        self.advance_turn(&mut inner).await;

        Ok(pick)
    }

    /// Timer-expiry path: picks a random remaining player for the current
    /// turn. Fires at most once per armed timer; the epoch comparison makes
    /// a stale timer (cancelled after it already fired) a guaranteed no-op.
    async fn handle_timer_expired(self: Arc<Self>, epoch: u64) {
        let mut inner = self.inner.lock().await;

        if inner.status != DraftStatus::InProgress || epoch != inner.timer_epoch {
            return;
        }

        if inner.available_players.is_empty() {
            // The pool ran dry before the rounds did. The turn stalls here
            // until manual intervention; see the room-level docs.
            warn!(
                draft_id = self.draft_id,
                user_id = inner.current_turn,
                "turn deadline expired with no players remaining"
            );
            return;
        }

        let index = rand::rng().random_range(0..inner.available_players.len());
        let player_id = inner.available_players.remove(index);
        let user_id = inner.current_turn;

        let pick = PickResult {
            draft_id: self.draft_id,
            user_id,
            player_id,
            pick_number: (inner.current_pick_index + 1) as u32,
            round: inner.round_number,
            auto_draft: true,
        };

        info!(
            draft_id = self.draft_id,
            user_id,
            player_id,
            pick_number = pick.pick_number,
            "auto-drafted player after deadline"
        );

        self.emit_pick(&pick).await;
        self.advance_turn(&mut inner).await;
    }

    /// Move to the next position in the snake order, or complete the draft
    /// when all picks are resolved. Odd rounds traverse the pick order
    /// forward, even rounds backward: 1,2,3,4 / 4,3,2,1 / 1,2,3,4 ...
    async fn advance_turn(self: &Arc<Self>, inner: &mut Inner) {
        inner.current_pick_index += 1;
        let num_users = inner.pick_order.len();
        let total_picks = num_users * inner.total_rounds as usize;

        if inner.current_pick_index >= total_picks {
            self.complete_draft(inner).await;
            return;
        }

        if inner.current_pick_index >= num_users * inner.round_number as usize {
            inner.round_number += 1;
        }

        let position_in_round = if inner.round_number % 2 == 1 {
            inner.current_pick_index % num_users
        } else {
            num_users - 1 - (inner.current_pick_index % num_users)
        };
        inner.current_turn = inner.pick_order[position_in_round];

        self.arm_timer(inner);

        let msg = ServerMessage::TurnChanged {
            current_turn: inner.current_turn,
            round_number: inner.round_number,
            turn_deadline: inner.turn_deadline.timestamp(),
        };
        self.emit(msg).await;
    }

    async fn complete_draft(&self, inner: &mut Inner) {
        inner.status = DraftStatus::Completed;

        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        info!(
            draft_id = self.draft_id,
            total_picks = inner.current_pick_index,
            "draft completed"
        );

        let msg = ServerMessage::DraftCompleted {
            draft_id: self.draft_id,
            total_picks: inner.current_pick_index as u32,
            total_rounds: inner.total_rounds,
        };
        self.emit(msg).await;

        if let Some(tx) = inner.completed_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Arm the deadline for the current turn, cancelling any previous timer.
    /// The spawned task captures the new epoch; `handle_timer_expired`
    /// compares it against the live epoch under the lock.
    fn arm_timer(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        inner.timer_epoch += 1;
        let epoch = inner.timer_epoch;
        let duration = inner.turn_duration;
        inner.turn_deadline = Utc::now() + duration;

        let state = Arc::clone(self);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            state.handle_timer_expired(epoch).await;
        }));
    }

    async fn emit(&self, msg: ServerMessage) {
        if self.events_tx.send(msg).await.is_err() {
            debug!(draft_id = self.draft_id, "event stream closed, message dropped");
        }
    }

    async fn emit_pick(&self, pick: &PickResult) {
        let msg = ServerMessage::PickMade {
            user_id: pick.user_id,
            player_id: pick.player_id,
            pick_number: pick.pick_number,
            round: pick.round,
            auto_draft: pick.auto_draft,
        };
        self.emit(msg).await;

        if self.picks_tx.send(pick.clone()).await.is_err() {
            debug!(draft_id = self.draft_id, "pick stream closed, record dropped");
        }
    }

    // -- Read-only accessors. All acquire the engine lock so a concurrent
    // advance can never be observed half-applied. --

    pub fn draft_id(&self) -> DraftId {
        self.draft_id
    }

    pub async fn status(&self) -> DraftStatus {
        self.inner.lock().await.status
    }

    pub async fn current_turn(&self) -> UserId {
        self.inner.lock().await.current_turn
    }

    pub async fn round_number(&self) -> u32 {
        self.inner.lock().await.round_number
    }

    pub async fn current_pick_index(&self) -> usize {
        self.inner.lock().await.current_pick_index
    }

    pub async fn turn_deadline(&self) -> DateTime<Utc> {
        self.inner.lock().await.turn_deadline
    }

    pub async fn available_players(&self) -> Vec<PlayerId> {
        self.inner.lock().await.available_players.clone()
    }
}
