//! Realtime channel frames.
//!
//! Inbound frames are JSON objects with a `type` field and either a `data`
//! object or the payload fields inline:
//!
//! ```text
//! {"type": "game_public_update", "data": { ...TurnSnapshot... }, "version": 12}
//! {"type": "timer_tick", "remaining": 3}
//! {"type": "pong"}
//! ```
//!
//! Older servers push untyped objects keyed by `turn_data` or `player_data`;
//! those map onto the public and private update events.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{PlayerId, PrivatePlayerView, TurnSnapshot};

/// Legacy key carrying a public snapshot.
pub const LEGACY_PUBLIC_KEY: &str = "turn_data";

/// Legacy key carrying a private view.
pub const LEGACY_PRIVATE_KEY: &str = "player_data";

/// Errors decoding or encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// No `type` field and no legacy key.
    #[error("untyped frame without a legacy key")]
    Untyped,

    /// Known type with a payload that does not fit it.
    #[error("invalid {kind} payload: {source}")]
    Payload {
        /// Declared frame type.
        kind: String,
        /// Decoding failure.
        source: serde_json::Error,
    },
}

/// Event delivered to channel listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// New public snapshot.
    GamePublicUpdate(TurnSnapshot),
    /// New private view.
    PlayerPrivateUpdate(PrivatePlayerView),
    /// Channel connectivity changed.
    ConnectionStatus {
        /// Whether the channel is open.
        connected: bool,
    },
    /// A reconnect has been scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Reconnect attempts exhausted.
    ConnectionFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// A player has been ordered to reveal a secret.
    ForcedReveal {
        /// Player who must reveal.
        target: PlayerId,
        /// Player who forced it.
        requester: Option<PlayerId>,
    },
    /// Every player must vote for a suspect.
    SuspicionVote {
        /// Player who started the vote.
        initiator: Option<PlayerId>,
    },
    /// Response window countdown from the server.
    TimerTick {
        /// Seconds left.
        remaining: u32,
    },
    /// Another player opened a card trade with the viewer.
    TradeRequest {
        /// Trade initiator.
        from: PlayerId,
    },
    /// Frame type this client does not know.
    Other {
        /// Declared type.
        kind: String,
        /// Raw payload.
        payload: Value,
    },
}

/// Listener key: one per [`RealtimeEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// [`RealtimeEvent::GamePublicUpdate`]
    GamePublicUpdate,
    /// [`RealtimeEvent::PlayerPrivateUpdate`]
    PlayerPrivateUpdate,
    /// [`RealtimeEvent::ConnectionStatus`]
    ConnectionStatus,
    /// [`RealtimeEvent::Reconnecting`]
    Reconnecting,
    /// [`RealtimeEvent::ConnectionFailed`]
    ConnectionFailed,
    /// [`RealtimeEvent::ForcedReveal`]
    ForcedReveal,
    /// [`RealtimeEvent::SuspicionVote`]
    SuspicionVote,
    /// [`RealtimeEvent::TimerTick`]
    TimerTick,
    /// [`RealtimeEvent::TradeRequest`]
    TradeRequest,
    /// [`RealtimeEvent::Other`]
    Other,
}

impl RealtimeEvent {
    /// Listener key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GamePublicUpdate(_) => EventKind::GamePublicUpdate,
            Self::PlayerPrivateUpdate(_) => EventKind::PlayerPrivateUpdate,
            Self::ConnectionStatus { .. } => EventKind::ConnectionStatus,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            Self::ForcedReveal { .. } => EventKind::ForcedReveal,
            Self::SuspicionVote { .. } => EventKind::SuspicionVote,
            Self::TimerTick { .. } => EventKind::TimerTick,
            Self::TradeRequest { .. } => EventKind::TradeRequest,
            Self::Other { .. } => EventKind::Other,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Heartbeat reply; never dispatched.
    Pong,
    /// Anything listeners care about.
    Event(RealtimeEvent),
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Deserialize)]
struct AttemptPayload {
    #[serde(default, alias = "attempts")]
    attempt: u32,
}

#[derive(Deserialize)]
struct ForcedRevealPayload {
    target: PlayerId,
    #[serde(default)]
    requester: Option<PlayerId>,
}

#[derive(Deserialize)]
struct SuspicionVotePayload {
    #[serde(default)]
    initiator: Option<PlayerId>,
}

#[derive(Deserialize)]
struct TimerPayload {
    #[serde(alias = "timer")]
    remaining: u32,
}

#[derive(Deserialize)]
struct TradePayload {
    from: PlayerId,
}

impl InboundMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` for malformed JSON, non-object frames, untyped
    /// frames without a legacy key, and payloads that do not match their
    /// declared type.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };

        let kind = object.get("type").and_then(Value::as_str).map(str::to_string);
        let Some(kind) = kind else {
            return decode_legacy(object).map(Self::Event);
        };

        let version = object.get("version").and_then(Value::as_u64);
        let payload = match object.remove("data") {
            Some(data) => data,
            None => Value::Object(object),
        };

        let event = match kind.as_str() {
            "pong" => return Ok(Self::Pong),
            "game_public_update" => {
                let mut snapshot: TurnSnapshot = payload_as(&kind, payload)?;
                snapshot.version = snapshot.version.or(version);
                RealtimeEvent::GamePublicUpdate(snapshot)
            },
            "player_private_update" => {
                let mut view: PrivatePlayerView = payload_as(&kind, payload)?;
                view.version = view.version.or(version);
                RealtimeEvent::PlayerPrivateUpdate(view)
            },
            "connection_status" => {
                let status: StatusPayload = payload_as(&kind, payload)?;
                RealtimeEvent::ConnectionStatus {
                    connected: status.status.eq_ignore_ascii_case("connected"),
                }
            },
            "reconnecting" => {
                let attempt: AttemptPayload = payload_as(&kind, payload)?;
                RealtimeEvent::Reconnecting { attempt: attempt.attempt }
            },
            "connection_failed" => {
                let attempt: AttemptPayload = payload_as(&kind, payload)?;
                RealtimeEvent::ConnectionFailed { attempts: attempt.attempt }
            },
            "forced_reveal" => {
                let reveal: ForcedRevealPayload = payload_as(&kind, payload)?;
                RealtimeEvent::ForcedReveal { target: reveal.target, requester: reveal.requester }
            },
            "suspicion_vote" => {
                let vote: SuspicionVotePayload = payload_as(&kind, payload)?;
                RealtimeEvent::SuspicionVote { initiator: vote.initiator }
            },
            "timer_tick" => {
                let timer: TimerPayload = payload_as(&kind, payload)?;
                RealtimeEvent::TimerTick { remaining: timer.remaining }
            },
            "trade_request" => {
                let trade: TradePayload = payload_as(&kind, payload)?;
                RealtimeEvent::TradeRequest { from: trade.from }
            },
            _ => RealtimeEvent::Other { kind, payload },
        };

        Ok(Self::Event(event))
    }
}

fn payload_as<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, FrameError> {
    serde_json::from_value(payload)
        .map_err(|source| FrameError::Payload { kind: kind.to_string(), source })
}

fn decode_legacy(mut object: Map<String, Value>) -> Result<RealtimeEvent, FrameError> {
    if let Some(data) = object.remove(LEGACY_PUBLIC_KEY) {
        return payload_as(LEGACY_PUBLIC_KEY, data).map(RealtimeEvent::GamePublicUpdate);
    }
    if let Some(data) = object.remove(LEGACY_PRIVATE_KEY) {
        return payload_as(LEGACY_PRIVATE_KEY, data).map(RealtimeEvent::PlayerPrivateUpdate);
    }
    Err(FrameError::Untyped)
}

/// Frames the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Heartbeat probe.
    Ping,
}

impl OutboundMessage {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Json` if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::TurnPhase;

    fn snapshot_json() -> Value {
        serde_json::json!({
            "game_id": 1,
            "turn_owner": 3,
            "phase": "None",
            "players": [{"id": 3, "name": "Cy", "turn_order": 1}]
        })
    }

    #[test]
    fn ping_encodes_as_typed_object() {
        assert_eq!(OutboundMessage::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn pong_is_recognized() {
        assert_eq!(InboundMessage::decode(r#"{"type":"pong"}"#).unwrap(), InboundMessage::Pong);
    }

    #[test]
    fn public_update_takes_frame_version() {
        let frame = serde_json::json!({
            "type": "game_public_update",
            "data": snapshot_json(),
            "version": 9,
        });
        let message = InboundMessage::decode(&frame.to_string()).unwrap();

        let InboundMessage::Event(RealtimeEvent::GamePublicUpdate(snapshot)) = message else {
            panic!("expected public update, got {message:?}");
        };
        assert_eq!(snapshot.version, Some(9));
        assert_eq!(snapshot.phase, TurnPhase::None);
    }

    #[test]
    fn inline_payload_fields() {
        let message = InboundMessage::decode(r#"{"type":"timer_tick","remaining":4}"#).unwrap();
        assert_eq!(message, InboundMessage::Event(RealtimeEvent::TimerTick { remaining: 4 }));
    }

    #[test]
    fn legacy_public_payload() {
        let frame = serde_json::json!({ "turn_data": snapshot_json() });
        let message = InboundMessage::decode(&frame.to_string()).unwrap();
        assert!(matches!(message, InboundMessage::Event(RealtimeEvent::GamePublicUpdate(_))));
    }

    #[test]
    fn legacy_private_payload() {
        let frame = serde_json::json!({ "player_data": {"player_id": 3, "hand": []} });
        let message = InboundMessage::decode(&frame.to_string()).unwrap();
        assert!(matches!(message, InboundMessage::Event(RealtimeEvent::PlayerPrivateUpdate(_))));
    }

    #[test]
    fn untyped_unknown_payload_is_rejected() {
        let result = InboundMessage::decode(r#"{"hello": 1}"#);
        assert!(matches!(result, Err(FrameError::Untyped)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(InboundMessage::decode("{not json"), Err(FrameError::Json(_))));
        assert!(matches!(InboundMessage::decode("[1,2]"), Err(FrameError::NotAnObject)));
    }

    #[test]
    fn unknown_type_is_forwarded() {
        let message = InboundMessage::decode(r#"{"type":"chat","text":"hi"}"#).unwrap();
        let InboundMessage::Event(event) = message else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), EventKind::Other);
    }

    #[test]
    fn bad_payload_names_its_type() {
        let err = InboundMessage::decode(r#"{"type":"forced_reveal"}"#).unwrap_err();
        assert!(err.to_string().starts_with("invalid forced_reveal payload"));
    }
}
