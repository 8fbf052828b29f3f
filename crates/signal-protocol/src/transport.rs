//! Transport negotiation payloads: ICE, DTLS, and the reply shapes
//! returned by `createTransport` and `consume`.

use crate::media::{MediaKind, RtpParameters};
use serde::{Deserialize, Serialize};

/// Direction a transport carries media in: producer (uplink) or
/// consumer (downlink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Producer,
    Consumer,
}

impl TransportKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportKind::Producer => "producer",
            TransportKind::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE credentials for one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

/// One ICE candidate the client can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

/// DTLS role for the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

/// Certificate fingerprint for DTLS verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS handshake parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    #[serde(default)]
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Connection parameters for one freshly created transport.
///
/// The caller completes ICE/DTLS negotiation out of band and feeds the
/// `dtls_parameters` back through `connectTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Reply shape of `createTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransportReply {
    pub params: TransportOptions,
    #[serde(rename = "type")]
    pub kind: TransportKind,
}

/// Reply shape of `consume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeReply {
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Consumer type reported by the engine (e.g. "simple", "simulcast").
    #[serde(rename = "type")]
    pub consumer_type: String,
    pub producer_paused: bool,
}
