//! Message types exchanged between actors.
//!
//! Request/response messages carry a `respond_to` oneshot; fire-and-forget
//! notifications do not. Internal variants (`AudioLevel`, `ConsumerNotice`)
//! are pumped into the room mailbox by the room's own watcher tasks, so
//! media-engine callbacks serialize with client commands.

use crate::actors::room::RoomActorHandle;
use crate::engine::{AudioObserverEvent, ConsumerEvent, WorkerStats};
use crate::errors::RcError;

use serde::Serialize;
use signal_protocol::{
    ConsumeReply, CreateTransportReply, DtlsParameters, MediaKind, PeerProfile, RoomEvent,
    RouterCapabilities, RtpCapabilities, RtpParameters, TransportKind,
};
use tokio::sync::{mpsc, oneshot};

/// Messages handled by the `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Look up a room, creating and loading it if absent.
    GetOrCreateRoom {
        room_name: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Look up an existing room.
    GetRoom {
        room_name: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// A room finished closing; drop it from the registry.
    /// Fire-and-forget so a closing room never blocks on the registry.
    RoomClosed { room_name: String },

    /// Snapshot of rooms and worker load.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Close all rooms and stop accepting work.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Registry state snapshot for diagnostics and shutdown decisions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub room_names: Vec<String>,
    pub rooms: u32,
    pub peers: u32,
    pub workers: Vec<WorkerStats>,
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Create the room's router and audio observer. Sent once by the
    /// registry before the room handle is shared.
    Load {
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Admit a peer into the room.
    Join {
        peer_id: String,
        profile: PeerProfile,
        event_sink: mpsc::UnboundedSender<RoomEvent>,
        respond_to: oneshot::Sender<Result<JoinReply, RcError>>,
    },

    /// Create (or replace) the peer's transport of the given kind.
    CreateTransport {
        peer_id: String,
        kind: TransportKind,
        respond_to: oneshot::Sender<Result<CreateTransportReply, RcError>>,
    },

    /// Feed client DTLS parameters into an existing transport.
    ConnectTransport {
        peer_id: String,
        kind: TransportKind,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<bool, RcError>>,
    },

    /// Create a producer for the peer. Soft-fails: `None` on any error.
    Produce {
        peer_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        respond_to: oneshot::Sender<Option<String>>,
    },

    /// Consume the host's producer of the given kind.
    Consume {
        peer_id: String,
        kind: MediaKind,
        rtp_capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumeReply, RcError>>,
    },

    /// Relay a chat message to the rest of the room.
    SendMessage {
        from_peer: String,
        content: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Notify the host of a gift from `from_peer`.
    SendGift {
        from_peer: String,
        gift: serde_json::Value,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Ask the host for a video chat.
    RequestVideoChat {
        from_peer: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Host accepts a pending video chat request from `peer_id`.
    AcceptVideoChat {
        from_peer: String,
        peer_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// A peer's signaling connection went away. Replies with `true` when
    /// the departure closed the whole room (the peer was the host).
    PeerDisconnected {
        peer_id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Close the room explicitly (unpublish).
    Close { respond_to: oneshot::Sender<()> },

    /// Snapshot of room state for diagnostics and tests.
    GetState {
        respond_to: oneshot::Sender<RoomStateSnapshot>,
    },

    /// Audio observer report, pumped in by the observer watcher task.
    AudioLevel { event: AudioObserverEvent },

    /// Consumer lifecycle notice, pumped in by a consumer watcher task.
    /// `owner_peer` holds the consumer; `source_peer` owns the producer.
    /// `consumer_id` pins the notice to the consumer that emitted it, so a
    /// late notice from a superseded consumer cannot touch its replacement.
    ConsumerNotice {
        owner_peer: String,
        source_peer: String,
        consumer_id: String,
        kind: MediaKind,
        event: ConsumerEvent,
    },
}

/// Reply to a successful join.
#[derive(Debug, Clone)]
pub struct JoinReply {
    /// Router codec capabilities for client device loading.
    pub capabilities: RouterCapabilities,
    /// Whether the joining peer was elected host.
    pub is_host: bool,
}

/// Lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    /// Spawned, router not created yet.
    Created,
    /// Router and observer live; serving peers.
    Active,
    /// Torn down; all further commands fail.
    Closed,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateSnapshot {
    pub room_name: String,
    pub phase: RoomPhase,
    pub host: Option<String>,
    pub peer_ids: Vec<String>,
    pub worker_index: usize,
    /// Unix timestamp of room creation.
    pub created_at: i64,
}

/// Messages handled by a `PeerConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Push an event to the client.
    Deliver { event: RoomEvent },

    /// Close the connection.
    Close { reason: String },

    /// Liveness probe.
    Ping { respond_to: oneshot::Sender<()> },
}
