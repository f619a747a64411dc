// Wire protocol: JSON messages exchanged with draft room clients.
//
// Field names follow the draft room wire format (`userID`, `playerID`,
// `turnDeadline`, ...) that existing clients already speak.

use serde::{Deserialize, Serialize};

use crate::draft::pick::{DraftId, PlayerId, UserId};

/// Messages pushed from the server to every connected client.
///
/// The engine produces the draft lifecycle variants; `user_joined`,
/// `user_left`, and `error` originate in the hub / WebSocket layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DraftStarted {
        #[serde(rename = "draftID")]
        draft_id: DraftId,
        #[serde(rename = "currentTurn")]
        current_turn: UserId,
        #[serde(rename = "roundNumber")]
        round_number: u32,
        /// Unix epoch seconds at which the current turn expires.
        #[serde(rename = "turnDeadline")]
        turn_deadline: i64,
    },
    TurnChanged {
        #[serde(rename = "currentTurn")]
        current_turn: UserId,
        #[serde(rename = "roundNumber")]
        round_number: u32,
        #[serde(rename = "turnDeadline")]
        turn_deadline: i64,
    },
    PickMade {
        #[serde(rename = "userID")]
        user_id: UserId,
        #[serde(rename = "playerID")]
        player_id: PlayerId,
        #[serde(rename = "pickNumber")]
        pick_number: u32,
        round: u32,
        #[serde(rename = "autoDraft")]
        auto_draft: bool,
    },
    DraftCompleted {
        #[serde(rename = "draftID")]
        draft_id: DraftId,
        #[serde(rename = "totalPicks")]
        total_picks: u32,
        #[serde(rename = "totalRounds")]
        total_rounds: u32,
    },
    UserJoined {
        #[serde(rename = "userID")]
        user_id: UserId,
    },
    UserLeft {
        #[serde(rename = "userID")]
        user_id: UserId,
    },
    /// Sent only to the connection whose request failed, never broadcast.
    Error { message: String },
}

/// Messages sent by clients over the WebSocket connection.
///
/// `join` (or `create_room`) must be the first message on a connection; it
/// binds the connection to a draft room and a participant identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(rename = "draftID")]
        draft_id: DraftId,
        #[serde(rename = "userID")]
        user_id: UserId,
    },
    CreateRoom {
        #[serde(rename = "draftID")]
        draft_id: DraftId,
        #[serde(rename = "userID")]
        user_id: UserId,
        #[serde(rename = "availablePlayers")]
        available_players: Vec<PlayerId>,
    },
    StartDraft {
        #[serde(rename = "pickOrder")]
        pick_order: Vec<UserId>,
        #[serde(rename = "totalRounds")]
        total_rounds: u32,
        /// Per-turn time limit in seconds.
        #[serde(rename = "timerDuration")]
        timer_duration: u64,
        /// Overrides the room's player pool when non-empty.
        #[serde(rename = "availablePlayers", default)]
        available_players: Vec<PlayerId>,
    },
    MakePick {
        #[serde(rename = "userID")]
        user_id: UserId,
        #[serde(rename = "playerID")]
        player_id: PlayerId,
    },
}
