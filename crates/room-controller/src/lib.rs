//! Room Controller (RC) Service Library
//!
//! This library provides the core functionality for the Roomcast
//! Room Controller - a stateful signaling server responsible for:
//!
//! - Room lifecycle: creation on first join, teardown when the host leaves
//! - Host election and host-centric media fan-out
//! - Placement of rooms on a fixed pool of media-engine workers
//! - Per-peer transport, producer, and consumer orchestration
//! - Server-pushed room events (active speaker, producer lifecycle, chat)
//!
//! # Architecture
//!
//! The RC uses an actor model hierarchy:
//!
//! ```text
//! RoomRegistryActor (singleton per RC instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns router, audio observer, host seat, peer media
//!         └── supervises N PeerConnectionActors
//!             └── PeerConnectionActor (one per joined peer)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per name**: creation is serialized through the registry
//!   mailbox, so concurrent joins for the same name share one room
//! - **Host-centric rooms**: the first peer admitted becomes host; the
//!   room closes when the host leaves, never transferring the seat
//! - **Engine behind traits**: all media objects sit behind the port
//!   traits in [`engine`]; the orchestration layer never names a
//!   concrete engine
//! - **Leased placement**: rooms hold a [`engine::WorkerLease`] whose
//!   drop releases every counter the room added, so load accounting
//!   survives crashes
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`engine`] - Media-engine port traits, local adapter, worker pool
//! - [`gateway`] - Signaling request dispatch
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing error codes
//! - [`observability`] - Health probes and stats endpoint

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod observability;
