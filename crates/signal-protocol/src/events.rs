//! Server-initiated events broadcast to connections joined to a room.
//!
//! The `event` tag strings match what clients subscribe to, so renaming a
//! variant here is a wire-protocol change.

use crate::media::{MediaKind, PeerProfile, RoomMessage};
use serde::{Deserialize, Serialize};

/// An event pushed from the controller to one or more room members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RoomEvent {
    /// The loudest peer changed. `peer_id` is `None` on silence.
    #[serde(rename = "mediaActiveSpeaker")]
    ActiveSpeaker {
        #[serde(rename = "peerId")]
        peer_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<i8>,
    },

    /// A producer this client consumes was closed.
    #[serde(rename = "mediaProducerClose")]
    ProducerClosed {
        #[serde(rename = "peerId")]
        peer_id: String,
        kind: MediaKind,
    },

    /// A producer this client consumes was paused.
    #[serde(rename = "mediaProducerPause")]
    ProducerPaused {
        #[serde(rename = "peerId")]
        peer_id: String,
        kind: MediaKind,
    },

    /// A producer this client consumes was resumed.
    #[serde(rename = "mediaProducerResume")]
    ProducerResumed {
        #[serde(rename = "peerId")]
        peer_id: String,
        kind: MediaKind,
    },

    /// A non-host member left the room.
    #[serde(rename = "mediaClientDisconnect")]
    ClientDisconnected { id: String },

    /// The host left or the room was explicitly unpublished.
    #[serde(rename = "roomClosed")]
    RoomClosed,

    /// A chat message relayed to the whole room.
    #[serde(rename = "newMessage")]
    NewMessage {
        #[serde(flatten)]
        message: RoomMessage,
        room: String,
    },

    /// A viewer joined; delivered to the host.
    #[serde(rename = "userJoined")]
    UserJoined { user: PeerProfile },

    /// A gift notification forwarded to the host.
    #[serde(rename = "giftSent")]
    GiftSent {
        #[serde(rename = "peerId")]
        peer_id: String,
        gift: serde_json::Value,
    },

    /// A peer asked the host for a video chat.
    #[serde(rename = "videoChatRequested")]
    VideoChatRequested {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// The host accepted a pending video chat request.
    #[serde(rename = "videoChatAccepted")]
    VideoChatAccepted {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
}

impl RoomEvent {
    /// The wire tag for this event, as clients subscribe to it.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomEvent::ActiveSpeaker { .. } => "mediaActiveSpeaker",
            RoomEvent::ProducerClosed { .. } => "mediaProducerClose",
            RoomEvent::ProducerPaused { .. } => "mediaProducerPause",
            RoomEvent::ProducerResumed { .. } => "mediaProducerResume",
            RoomEvent::ClientDisconnected { .. } => "mediaClientDisconnect",
            RoomEvent::RoomClosed => "roomClosed",
            RoomEvent::NewMessage { .. } => "newMessage",
            RoomEvent::UserJoined { .. } => "userJoined",
            RoomEvent::GiftSent { .. } => "giftSent",
            RoomEvent::VideoChatRequested { .. } => "videoChatRequested",
            RoomEvent::VideoChatAccepted { .. } => "videoChatAccepted",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn active_speaker_carries_nullable_peer() {
        let event = RoomEvent::ActiveSpeaker {
            peer_id: None,
            volume: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "mediaActiveSpeaker");
        assert_eq!(json["data"]["peerId"], serde_json::Value::Null);

        let event = RoomEvent::ActiveSpeaker {
            peer_id: Some("peer-1".to_string()),
            volume: Some(-42),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["peerId"], "peer-1");
        assert_eq!(json["data"]["volume"], -42);
    }

    #[test]
    fn producer_close_tag_matches_client_subscription() {
        let event = RoomEvent::ProducerClosed {
            peer_id: "peer-2".to_string(),
            kind: MediaKind::Video,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "mediaProducerClose");
        assert_eq!(json["data"]["kind"], "video");
        assert_eq!(event.name(), "mediaProducerClose");
    }

    #[test]
    fn new_message_flattens_payload_and_adds_room() {
        let event = RoomEvent::NewMessage {
            message: RoomMessage {
                content: "hello".to_string(),
                from: PeerProfile {
                    username: "ada".to_string(),
                    ..PeerProfile::default()
                },
            },
            room: "r1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "newMessage");
        assert_eq!(json["data"]["content"], "hello");
        assert_eq!(json["data"]["room"], "r1");
    }

    #[test]
    fn events_round_trip_through_json() {
        let events = vec![
            RoomEvent::RoomClosed,
            RoomEvent::ClientDisconnected {
                id: "peer-3".to_string(),
            },
            RoomEvent::ProducerResumed {
                peer_id: "peer-1".to_string(),
                kind: MediaKind::Audio,
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: RoomEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }
}
