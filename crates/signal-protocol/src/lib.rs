//! Signaling data model for Roomcast.
//!
//! This crate defines the types exchanged between the room controller and
//! connected clients: media/transport kinds, the WebRTC negotiation payloads
//! (ICE, DTLS, RTP parameters) carried opaquely through the control plane,
//! and the vocabulary of server-initiated room events.
//!
//! All types serialize to the camelCase JSON shapes clients expect.

#![warn(clippy::pedantic)]

pub mod events;
pub mod media;
pub mod transport;

pub use events::RoomEvent;
pub use media::{
    MediaKind, PeerProfile, RoomMessage, RouterCapabilities, RtpCapabilities, RtpCodecCapability,
    RtpParameters,
};
pub use transport::{
    ConsumeReply, CreateTransportReply, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate,
    IceParameters, TransportKind, TransportOptions,
};
