//! Public turn snapshot and the viewer's private view.
//!
//! Both are authoritative server state. The client replaces them wholesale on
//! every push or fetch; the only local mutation is the optimistic path of the
//! action orchestrator, which a later snapshot always supersedes.

use serde::{Deserialize, Serialize};

use crate::{Card, CardId, GameId, PlayerId, SecretId, SetIndex, SetType, normalize_tag};

/// Server-declared stage of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TurnPhase {
    /// Turn owner has not acted yet.
    #[default]
    None,
    /// An event or set is inside its response window.
    Playing,
    /// Waiting on another player (vote, forced reveal, trade).
    Waiting,
    /// Turn owner is discarding.
    Discarding,
    /// Turn owner is drawing back up.
    Replenish,
    /// Turn is over.
    Complete,
}

impl From<String> for TurnPhase {
    fn from(raw: String) -> Self {
        match normalize_tag(&raw).as_str() {
            "playing" => Self::Playing,
            "waiting" => Self::Waiting,
            "discarding" => Self::Discarding,
            "replenish" => Self::Replenish,
            "complete" => Self::Complete,
            _ => Self::None,
        }
    }
}

impl From<TurnPhase> for String {
    fn from(phase: TurnPhase) -> Self {
        match phase {
            TurnPhase::None => "None",
            TurnPhase::Playing => "Playing",
            TurnPhase::Waiting => "Waiting",
            TurnPhase::Discarding => "Discarding",
            TurnPhase::Replenish => "Replenish",
            TurnPhase::Complete => "Complete",
        }
        .to_string()
    }
}

/// A secret as seen by every player.
///
/// Hidden secrets are placeholders: only the id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSlot {
    /// Secret identifier.
    pub id: SecretId,
    /// Whether the secret is face up.
    pub revealed: bool,
    /// Secret name, present only once revealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A detective set on the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedSet {
    /// Position in the owner's set list.
    pub index: SetIndex,
    /// Set type, which decides the set's effect.
    pub set_type: SetType,
    /// Cards in the set.
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl PlayedSet {
    /// Whether a card with this display name belongs in the set.
    pub fn accepts(&self, card: &Card) -> bool {
        let name = normalize_tag(&card.name);
        self.cards.iter().any(|c| normalize_tag(&c.name) == name)
    }
}

/// Public summary of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Position in turn order.
    pub turn_order: u32,
    /// Secrets, revealed or placeholders.
    #[serde(default)]
    pub secrets: Vec<SecretSlot>,
    /// Played detective sets.
    #[serde(default)]
    pub sets: Vec<PlayedSet>,
    /// Social disgrace: only instant cards may be played.
    #[serde(default)]
    pub in_disgrace: bool,
}

/// Shared piles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piles {
    /// Cards left in the draw pile.
    pub draw_count: u32,
    /// Cards in the discard pile.
    pub discard_count: u32,
    /// Face of the top discard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discard_top: Option<Card>,
    /// Face-up draft cards.
    #[serde(default)]
    pub draft: Vec<Card>,
}

/// How the game ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndGame {
    /// Winning players.
    pub winners: Vec<PlayerId>,
    /// Server-supplied reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Authoritative public view of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    /// Game identifier.
    pub game_id: GameId,
    /// Player whose turn it is.
    pub turn_owner: PlayerId,
    /// Stage of the turn.
    #[serde(default)]
    pub phase: TurnPhase,
    /// Players, in server order.
    pub players: Vec<PlayerSummary>,
    /// Shared piles.
    #[serde(default)]
    pub piles: Piles,
    /// Set once the game is over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_game: Option<EndGame>,
    /// Server sequence number, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl TurnSnapshot {
    /// Look up a player.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerSummary> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Whether `id` owns the current turn.
    pub fn is_turn_owner(&self, id: PlayerId) -> bool {
        self.turn_owner == id
    }

    /// Whether `id` is in social disgrace. Unknown players are not.
    pub fn in_disgrace(&self, id: PlayerId) -> bool {
        self.player(id).is_some_and(|p| p.in_disgrace)
    }

    /// Played set of `owner` at `index`.
    pub fn set(&self, owner: PlayerId, index: SetIndex) -> Option<&PlayedSet> {
        self.player(owner).and_then(|p| p.sets.iter().find(|s| s.index == index))
    }
}

/// The viewer's own secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnSecret {
    /// Secret identifier.
    pub id: SecretId,
    /// Secret name.
    pub name: String,
    /// Whether it is face up on the table.
    pub revealed: bool,
}

/// The viewer's private state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivatePlayerView {
    /// Owner of this view.
    pub player_id: PlayerId,
    /// Hand, in display order.
    #[serde(default)]
    pub hand: Vec<Card>,
    /// Own secrets.
    #[serde(default)]
    pub secrets: Vec<OwnSecret>,
    /// Server sequence number, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl PrivatePlayerView {
    /// Card in hand.
    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.hand.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::CardKind;

    #[test]
    fn snapshot_decodes_with_defaults() {
        let json = r#"{
            "game_id": 4,
            "turn_owner": 2,
            "phase": "Playing",
            "players": [
                {"id": 2, "name": "Ann", "turn_order": 1, "in_disgrace": true},
                {"id": 5, "name": "Bo", "turn_order": 2}
            ]
        }"#;
        let snapshot: TurnSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.phase, TurnPhase::Playing);
        assert!(snapshot.is_turn_owner(2));
        assert!(snapshot.in_disgrace(2));
        assert!(!snapshot.in_disgrace(5));
        assert!(!snapshot.in_disgrace(99));
        assert_eq!(snapshot.piles, Piles::default());
        assert_eq!(snapshot.version, None);
    }

    #[test]
    fn unknown_phase_is_none() {
        let phase: TurnPhase = serde_json::from_str(r#""Intermission""#).unwrap();
        assert_eq!(phase, TurnPhase::None);
        let phase: TurnPhase = serde_json::from_str(r#""discarding""#).unwrap();
        assert_eq!(phase, TurnPhase::Discarding);
    }

    #[test]
    fn set_accepts_matching_detective() {
        let set = PlayedSet {
            index: 0,
            set_type: SetType::Marple,
            cards: vec![Card::new(1, "Miss Marple", CardKind::Detective)],
        };
        assert!(set.accepts(&Card::new(2, "miss marple", CardKind::Detective)));
        assert!(!set.accepts(&Card::new(3, "Parker Pyne", CardKind::Detective)));
    }
}
