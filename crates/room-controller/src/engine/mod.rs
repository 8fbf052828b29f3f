//! Media-engine capability seam.
//!
//! The room controller never touches RTP packets, codecs, or congestion
//! control. Everything media-related goes through these port traits:
//! a worker process hosts routers, a router hosts transports and an
//! audio-level observer, transports host producers and consumers.
//! Adapters implement the traits; the orchestration layer never references
//! a concrete engine.
//!
//! [`local::LocalEngine`] is the in-process adapter used by the default
//! binary wiring and by tests.

pub mod local;
pub mod pool;

use crate::errors::RcError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use signal_protocol::{
    DtlsParameters, MediaKind, RouterCapabilities, RtpCapabilities, RtpParameters, TransportKind,
    TransportOptions,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use pool::{WorkerLease, WorkerPool, WorkerStats};

/// Settings applied to every worker created for the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Address announced in ICE candidates.
    pub announced_ip: String,
    /// First RTC port; each worker gets its own range above this.
    pub rtc_port_base: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            announced_ip: "127.0.0.1".to_string(),
            rtc_port_base: 40_000,
        }
    }
}

/// Settings for the per-room audio-level observer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioObserverSettings {
    /// Number of loudest producers reported per interval.
    pub max_entries: usize,
    /// Loudness threshold in dBvo.
    pub threshold: i8,
    /// Reporting interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for AudioObserverSettings {
    fn default() -> Self {
        Self {
            max_entries: 1,
            threshold: -80,
            interval_ms: 800,
        }
    }
}

/// Event emitted by a consumer's source producer or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// The transport the consumer rides on was closed.
    TransportClosed,
    /// The source producer was closed.
    ProducerClosed,
    /// The source producer was paused.
    ProducerPaused,
    /// The source producer was resumed.
    ProducerResumed,
}

/// Event emitted by an audio-level observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioObserverEvent {
    /// The loudest tracked producer crossed the threshold.
    Volumes { peer_id: String, volume: i8 },
    /// No tracked producer exceeded the threshold for the window.
    Silence,
}

/// One instance of the external media-processing engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Instantiate a worker process.
    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, RcError>;
}

/// One worker process; hosts one or more routers.
#[async_trait]
pub trait MediaWorker: Send + Sync {
    /// Process identity of the worker.
    fn pid(&self) -> u32;

    /// Create a router negotiating the given codec set.
    async fn create_router(
        &self,
        codecs: RouterCapabilities,
    ) -> Result<Arc<dyn MediaRouter>, RcError>;
}

/// Per-room capability-negotiation context; shared by all peers in a room.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> String;

    /// Codec capabilities negotiated at creation.
    fn capabilities(&self) -> RouterCapabilities;

    fn closed(&self) -> bool;

    fn close(&self);

    /// Create a transport of the given kind, bound to the given peer.
    async fn create_transport(
        &self,
        kind: TransportKind,
        peer_id: &str,
    ) -> Result<Arc<dyn MediaTransport>, RcError>;

    /// Whether `capabilities` can consume the given producer.
    fn can_consume(&self, producer_id: &str, capabilities: &RtpCapabilities) -> bool;

    /// Create the room's audio-level observer.
    async fn create_audio_observer(
        &self,
        settings: AudioObserverSettings,
    ) -> Result<Arc<dyn AudioLevelObserver>, RcError>;
}

/// A negotiated network endpoint for sending or receiving media.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TransportKind;

    /// Connection parameters handed to the client for out-of-band ICE/DTLS.
    fn options(&self) -> TransportOptions;

    fn closed(&self) -> bool;

    fn close(&self);

    /// Complete the DTLS handshake. Reconnecting an already connected
    /// transport is a no-op success.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), RcError>;

    /// Create a producer on this (producer-kind) transport.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        peer_id: &str,
    ) -> Result<Arc<dyn MediaProducer>, RcError>;

    /// Create a consumer on this (consumer-kind) transport, referencing a
    /// producer owned by another peer.
    async fn consume(
        &self,
        producer_id: &str,
        capabilities: RtpCapabilities,
        paused: bool,
        peer_id: &str,
    ) -> Result<Arc<dyn MediaConsumer>, RcError>;
}

/// A media source bound to a peer and a producer transport.
#[async_trait]
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn paused(&self) -> bool;

    fn closed(&self) -> bool;

    async fn pause(&self);

    async fn resume(&self);

    /// Close the producer. Dependent consumers are notified, not destroyed.
    fn close(&self);
}

/// A media sink bound to a peer, referencing another peer's producer.
#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn producer_id(&self) -> String;

    fn rtp_parameters(&self) -> RtpParameters;

    /// Engine-reported consumer type (e.g. "simple").
    fn consumer_type(&self) -> String;

    fn paused(&self) -> bool;

    fn producer_paused(&self) -> bool;

    fn closed(&self) -> bool;

    async fn pause(&self) -> Result<(), RcError>;

    async fn resume(&self) -> Result<(), RcError>;

    fn close(&self);

    /// Take the consumer's event stream. Yields `Some` exactly once; the
    /// owner stores the receiver alongside the consumer and pumps it for
    /// producer-close/pause/resume and transport-close notifications.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConsumerEvent>>;
}

/// Per-room audio loudness observer.
#[async_trait]
pub trait AudioLevelObserver: Send + Sync {
    /// Track an audio producer, attributing its volume to `peer_id`.
    async fn add_producer(&self, producer_id: &str, peer_id: &str) -> Result<(), RcError>;

    /// Stop tracking a producer.
    async fn remove_producer(&self, producer_id: &str);

    fn close(&self);

    fn closed(&self) -> bool;

    /// Take the observer's event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<AudioObserverEvent>>;
}
