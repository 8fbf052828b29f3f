//! Room controller error types.
//!
//! Error types map to signaling error codes for client responses. Internal
//! details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Room controller error type.
///
/// Maps to signaling error codes:
/// - `RoomNotFound`, `PeerNotFound`, `TransportNotFound`, `NoSuchProducer`: `NOT_FOUND` (4)
/// - `DuplicateJoin`: `CONFLICT` (5)
/// - `CapabilityMismatch`: `UNSUPPORTED` (8)
/// - `Engine`, `WorkerPoolInit`, `Internal`: `INTERNAL_ERROR` (6)
/// - `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum RcError {
    /// Operation referenced a room absent from the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Join attempted with a peer id already present in the room.
    #[error("Duplicate join: {0}")]
    DuplicateJoin(String),

    /// Operation referenced a peer absent from the room.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Connect/produce/consume referenced a transport kind never created.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Consume could not resolve a source producer on the host.
    #[error("No such producer: {0}")]
    NoSuchProducer(String),

    /// The router cannot satisfy the requesting peer's RTP capabilities.
    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),

    /// Worker pool failed to initialize. Fatal at startup.
    #[error("Worker pool initialization failed: {0}")]
    WorkerPoolInit(String),

    /// A media-engine call failed.
    #[error("Media engine error: {0}")]
    Engine(String),

    /// The controller is shutting down and refuses new work.
    #[error("Controller is draining")]
    Draining,

    /// Internal error (channel failures and other bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the signaling error code value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RcError::RoomNotFound(_)
            | RcError::PeerNotFound(_)
            | RcError::TransportNotFound(_)
            | RcError::NoSuchProducer(_) => 4, // NOT_FOUND
            RcError::DuplicateJoin(_) => 5,    // CONFLICT
            RcError::Engine(_) | RcError::WorkerPoolInit(_) | RcError::Internal(_) => 6, // INTERNAL_ERROR
            RcError::Draining => 7,            // CAPACITY_EXCEEDED
            RcError::CapabilityMismatch(_) => 8, // UNSUPPORTED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::DuplicateJoin(_) => "Peer already joined this room".to_string(),
            RcError::PeerNotFound(_) => "Peer not found".to_string(),
            RcError::TransportNotFound(_) => "Transport not created yet".to_string(),
            RcError::NoSuchProducer(_) => "Host is not producing this media kind".to_string(),
            RcError::CapabilityMismatch(_) => {
                "Client capabilities cannot consume this producer".to_string()
            }
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
            RcError::Engine(_) | RcError::WorkerPoolInit(_) | RcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}
