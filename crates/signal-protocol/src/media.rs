//! Media kinds, RTP payloads, and client-facing profile types.

use serde::{Deserialize, Serialize};

/// Kind of a media track: audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as the lowercase wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One codec the router can negotiate.
///
/// Carried opaquely by the control plane; the media engine owns the
/// interpretation of `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    /// MIME type, e.g. `audio/opus` or `video/VP8`.
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl RtpCodecCapability {
    /// Opus audio, the default audio codec.
    #[must_use]
    pub fn opus() -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            parameters: serde_json::Map::new(),
        }
    }

    /// VP8 video, the default video codec.
    #[must_use]
    pub fn vp8() -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: None,
            parameters: serde_json::Map::new(),
        }
    }
}

/// Codec set negotiated at router creation, returned to joining peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RouterCapabilities {
    /// The default opus + VP8 capability set.
    #[must_use]
    pub fn default_set() -> Self {
        Self {
            codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
        }
    }
}

/// RTP parameters supplied by a producing client.
///
/// Opaque to the orchestration layer beyond the codec list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub rtcp: serde_json::Map<String, serde_json::Value>,
}

/// RTP capabilities a consuming client advertises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// True when this capability set advertises the given media kind.
    #[must_use]
    pub fn supports(&self, kind: MediaKind) -> bool {
        self.codecs.iter().any(|c| c.kind == kind)
    }
}

/// Display metadata attached to a peer. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub picture: String,
}

/// A chat-style message relayed through a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub content: String,
    pub from: PeerProfile,
}
