//! Actor system for room orchestration.
//!
//! Three actor types, one ownership tree:
//!
//! - `RoomRegistryActor` - singleton, owns the room table
//! - `RoomActor` - one per room, owns router/observer/peers/host seat
//! - `PeerConnectionActor` - one per peer, owns event delivery
//!
//! Each actor runs as a tokio task with an mpsc mailbox and a cloneable
//! handle. Cancellation propagates down the tree via child tokens.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{PeerConnectionActor, PeerConnectionHandle};
pub use messages::{
    ConnectionMessage, JoinReply, RegistryMessage, RegistryStatus, RoomMessage, RoomPhase,
    RoomStateSnapshot,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor, RegistryMetrics};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
