//! Cards, event names and detective set types.

use serde::{Deserialize, Serialize};

use crate::{CardId, normalize_tag};

/// A card as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Card identifier.
    pub id: CardId,
    /// Display name; event cards are dispatched on its canonical form.
    pub name: String,
    /// Card type tag.
    #[serde(rename = "type")]
    pub kind: CardKind,
    /// Front artwork reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    /// Back artwork reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
}

impl Card {
    /// Card with no artwork references.
    pub fn new(id: CardId, name: impl Into<String>, kind: CardKind) -> Self {
        Self { id, name: name.into(), kind, front: None, back: None }
    }

    /// Event this card triggers, if it is a known event card.
    pub fn event(&self) -> Option<EventCard> {
        match self.kind {
            CardKind::Event => EventCard::from_name(&self.name),
            _ => None,
        }
    }

    /// Whether this is the Ariadne Oliver detective, which is attached to
    /// another player's set instead of starting one.
    pub fn is_ariadne(&self) -> bool {
        self.kind == CardKind::Detective && normalize_tag(&self.name).starts_with("ariadne")
    }
}

/// Card type tag.
///
/// Unknown tags decode to [`CardKind::Other`] so a newer server never breaks
/// hand decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CardKind {
    /// Played into the action zone; effect is deferred behind a response
    /// window.
    Event,
    /// Counter-play card, legal only while a response window is open.
    Instant,
    /// Detective card, played in sets.
    Detective,
    /// Devious card (blackmail, social faux pas).
    Devious,
    /// Secret card.
    Secret,
    /// Anything this client does not know about.
    Other,
}

impl From<String> for CardKind {
    fn from(raw: String) -> Self {
        match normalize_tag(&raw).as_str() {
            "event" => Self::Event,
            "instant" => Self::Instant,
            "detective" => Self::Detective,
            "devious" => Self::Devious,
            "secret" => Self::Secret,
            _ => Self::Other,
        }
    }
}

impl From<CardKind> for String {
    fn from(kind: CardKind) -> Self {
        match kind {
            CardKind::Event => "event",
            CardKind::Instant => "instant",
            CardKind::Detective => "detective",
            CardKind::Devious => "devious",
            CardKind::Secret => "secret",
            CardKind::Other => "other",
        }
        .to_string()
    }
}

/// Event cards the client knows how to follow up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCard {
    /// Pick one of the top five discards.
    LookIntoTheAshes,
    /// Take a revealed secret and give it, hidden, to a player of your choice.
    AndThenThereWasOneMore,
    /// Move cards from the draw pile to the discard pile.
    EarlyTrainToPaddington,
    /// Move cards from the discard pile back onto the draw pile.
    DelayTheMurderersEscape,
    /// Steal a played set.
    AnotherVictim,
    /// Trade a card with another player.
    CardTrade,
    /// Make a player discard every countering card in hand.
    CardsOffTheTable,
    /// Everyone votes for a suspect.
    PointYourSuspicions,
}

impl EventCard {
    /// Resolve a card display name to its canonical event.
    pub fn from_name(name: &str) -> Option<Self> {
        let tag = normalize_tag(name);
        let event = match tag.as_str() {
            "lookintotheashes" => Self::LookIntoTheAshes,
            "andthentherewasonemore" => Self::AndThenThereWasOneMore,
            "earlytraintopaddington" => Self::EarlyTrainToPaddington,
            "delaythemurderersescape" => Self::DelayTheMurderersEscape,
            "anothervictim" => Self::AnotherVictim,
            "cardtrade" => Self::CardTrade,
            "cardsoffthetable" => Self::CardsOffTheTable,
            "pointyoursuspicions" => Self::PointYourSuspicions,
            _ => return None,
        };
        Some(event)
    }
}

/// Type of a played detective set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SetType {
    /// Hercule Poirot.
    Poirot,
    /// Miss Marple.
    Marple,
    /// Parker Pyne.
    ParkerPyne,
    /// Mr Satterthwaite.
    Satterthwaite,
    /// Mr Satterthwaite played with Harley Quin ("specials").
    SatterthwaiteQuin,
    /// Tommy and/or Tuppence Beresford.
    Beresford,
    /// Lady Eileen "Bundle" Brent.
    EileenBrent,
    /// Unknown set type, kept verbatim.
    Other(String),
}

impl From<String> for SetType {
    fn from(raw: String) -> Self {
        match normalize_tag(&raw).as_str() {
            "poirot" | "herculepoirot" => Self::Poirot,
            "marple" | "missmarple" => Self::Marple,
            "parkerpyne" | "pyne" => Self::ParkerPyne,
            "satterthwaite" | "mrsatterthwaite" => Self::Satterthwaite,
            "specials" | "satterthwaitequin" | "quin" => Self::SatterthwaiteQuin,
            "beresford" | "tommy" | "tuppence" | "tommyberesford" | "tuppenceberesford" => {
                Self::Beresford
            },
            "eileenbrent" | "ladyeileenbrent" | "brent" => Self::EileenBrent,
            _ => Self::Other(raw),
        }
    }
}

impl From<SetType> for String {
    fn from(set_type: SetType) -> Self {
        match set_type {
            SetType::Poirot => "poirot".to_string(),
            SetType::Marple => "marple".to_string(),
            SetType::ParkerPyne => "parker pyne".to_string(),
            SetType::Satterthwaite => "satterthwaite".to_string(),
            SetType::SatterthwaiteQuin => "specials".to_string(),
            SetType::Beresford => "beresford".to_string(),
            SetType::EileenBrent => "eileen brent".to_string(),
            SetType::Other(raw) => raw,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn card_kind_decodes_case_insensitively() {
        let card: Card =
            serde_json::from_str(r#"{"id": 7, "name": "Not so fast", "type": "INSTANT"}"#).unwrap();
        assert_eq!(card.kind, CardKind::Instant);
        assert_eq!(card.front, None);
    }

    #[test]
    fn unknown_card_kind_is_other() {
        let card: Card =
            serde_json::from_str(r#"{"id": 1, "name": "Murderer", "type": "murder"}"#).unwrap();
        assert_eq!(card.kind, CardKind::Other);
    }

    #[test]
    fn event_names_resolve_with_punctuation() {
        assert_eq!(
            EventCard::from_name("Delay the Murderer's Escape!"),
            Some(EventCard::DelayTheMurderersEscape)
        );
        assert_eq!(
            EventCard::from_name("And then there was one more..."),
            Some(EventCard::AndThenThereWasOneMore)
        );
        assert_eq!(EventCard::from_name("Blackmailed"), None);
    }

    #[test]
    fn event_requires_event_kind() {
        let card = Card::new(3, "Card trade", CardKind::Devious);
        assert_eq!(card.event(), None);

        let card = Card::new(3, "Card trade", CardKind::Event);
        assert_eq!(card.event(), Some(EventCard::CardTrade));
    }

    #[test]
    fn set_type_keeps_unknown_verbatim() {
        let set: SetType = serde_json::from_str(r#""Miss Lemon""#).unwrap();
        assert_eq!(set, SetType::Other("Miss Lemon".to_string()));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#""Miss Lemon""#);
    }

    #[test]
    fn ariadne_detection() {
        assert!(Card::new(9, "Ariadne Oliver", CardKind::Detective).is_ariadne());
        assert!(!Card::new(9, "Ariadne Oliver", CardKind::Event).is_ariadne());
    }
}
