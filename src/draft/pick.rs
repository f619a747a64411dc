// Finalized pick records and the identifier types shared across the crate.

use serde::{Deserialize, Serialize};

/// Identifier of a draft (the event being drafted for).
pub type DraftId = i64;
/// Identifier of a participant.
pub type UserId = i64;
/// Identifier of a draftable player.
pub type PlayerId = i64;

/// The details of a completed pick, handed off to the persistence
/// collaborator. Produced exactly once per resolved turn and never mutated.
///
/// Serialized field names match the wire format consumed by the storage
/// layer (`draftID`, `userID`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickResult {
    #[serde(rename = "draftID")]
    pub draft_id: DraftId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "playerID")]
    pub player_id: PlayerId,
    /// Sequential pick number, 1-indexed across all rounds.
    #[serde(rename = "pickNumber")]
    pub pick_number: u32,
    pub round: u32,
    /// True when the pick was made by the deadline timer rather than the
    /// participant.
    #[serde(rename = "autoDraft")]
    pub auto_draft: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_result_wire_field_names() {
        let pick = PickResult {
            draft_id: 3,
            user_id: 7,
            player_id: 42,
            pick_number: 5,
            round: 2,
            auto_draft: true,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&pick).unwrap()).unwrap();
        assert_eq!(value["draftID"], 3);
        assert_eq!(value["userID"], 7);
        assert_eq!(value["playerID"], 42);
        assert_eq!(value["pickNumber"], 5);
        assert_eq!(value["round"], 2);
        assert_eq!(value["autoDraft"], true);
    }

    #[test]
    fn pick_result_roundtrip() {
        let pick = PickResult {
            draft_id: 1,
            user_id: 2,
            player_id: 3,
            pick_number: 4,
            round: 1,
            auto_draft: false,
        };
        let text = serde_json::to_string(&pick).unwrap();
        let parsed: PickResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, pick);
    }
}
