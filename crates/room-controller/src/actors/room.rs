//! `RoomActor` - owns all state for one live room.
//!
//! Each `RoomActor`:
//! - Owns the room's router, audio observer, peers, and host seat
//! - Serializes every room operation through its mailbox, including
//!   media-engine callbacks (pumped in as internal messages)
//! - Spawns one `PeerConnectionActor` per admitted peer
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry, then loaded (router + observer creation)
//! 2. Runs until the host leaves, the room is unpublished, or shutdown
//! 3. On teardown, notifies the registry so the name can be reused
//!
//! The first peer admitted while the host seat is empty becomes the host.
//! The host seat never transfers; when the host leaves, the room closes.

use crate::engine::{
    AudioLevelObserver, AudioObserverEvent, AudioObserverSettings, ConsumerEvent, MediaConsumer,
    MediaProducer, MediaRouter, MediaTransport, WorkerLease,
};
use crate::errors::RcError;

use super::connection::{PeerConnectionActor, PeerConnectionHandle};
use super::messages::{
    JoinReply, RegistryMessage, RoomMessage, RoomPhase, RoomStateSnapshot,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor, RegistryMetrics};

use signal_protocol::{
    ConsumeReply, CreateTransportReply, DtlsParameters, MediaKind, PeerProfile, RoomEvent,
    RoomMessage as ChatMessage, RouterCapabilities, RtpCapabilities, RtpParameters, TransportKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_name: String,
}

impl RoomActorHandle {
    /// Get the room name.
    #[must_use]
    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    /// Create the room's router and audio observer.
    pub async fn load(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Load { respond_to: tx }).await?;
        Self::receive(rx).await?
    }

    /// Admit a peer. Events for the peer flow into `event_sink`.
    pub async fn join(
        &self,
        peer_id: String,
        profile: PeerProfile,
        event_sink: mpsc::UnboundedSender<RoomEvent>,
    ) -> Result<JoinReply, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            peer_id,
            profile,
            event_sink,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Create (or replace) the peer's transport of the given kind.
    pub async fn create_transport(
        &self,
        peer_id: String,
        kind: TransportKind,
    ) -> Result<CreateTransportReply, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::CreateTransport {
            peer_id,
            kind,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Feed client DTLS parameters into an existing transport.
    pub async fn connect_transport(
        &self,
        peer_id: String,
        kind: TransportKind,
        dtls_parameters: DtlsParameters,
    ) -> Result<bool, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::ConnectTransport {
            peer_id,
            kind,
            dtls_parameters,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Create a producer. Returns `None` on any failure (soft-fail).
    pub async fn produce(
        &self,
        peer_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Option<String>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Produce {
            peer_id,
            kind,
            rtp_parameters,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Consume the host's producer of the given kind.
    pub async fn consume(
        &self,
        peer_id: String,
        kind: MediaKind,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeReply, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Consume {
            peer_id,
            kind,
            rtp_capabilities,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Relay a chat message to the rest of the room.
    pub async fn send_message(&self, from_peer: String, content: String) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::SendMessage {
            from_peer,
            content,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Notify the host of a gift.
    pub async fn send_gift(
        &self,
        from_peer: String,
        gift: serde_json::Value,
    ) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::SendGift {
            from_peer,
            gift,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Ask the host for a video chat.
    pub async fn request_video_chat(&self, from_peer: String) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::RequestVideoChat {
            from_peer,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Accept a pending video chat request from `peer_id`.
    pub async fn accept_video_chat(
        &self,
        from_peer: String,
        peer_id: String,
    ) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::AcceptVideoChat {
            from_peer,
            peer_id,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Report a peer's signaling connection as gone.
    ///
    /// Returns `true` when the departure closed the whole room.
    pub async fn peer_disconnected(&self, peer_id: String) -> Result<bool, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::PeerDisconnected {
            peer_id,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Close the room explicitly (unpublish).
    pub async fn close(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Close { respond_to: tx }).await?;
        Self::receive(rx).await
    }

    /// Snapshot of room state.
    pub async fn state(&self) -> Result<RoomStateSnapshot, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;
        Self::receive(rx).await
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    async fn receive<T>(rx: oneshot::Receiver<T>) -> Result<T, RcError> {
        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }
}

/// Media objects held for one peer.
#[derive(Default)]
struct PeerMedia {
    producer_transport: Option<Arc<dyn MediaTransport>>,
    consumer_transport: Option<Arc<dyn MediaTransport>>,
    audio_producer: Option<Arc<dyn MediaProducer>>,
    video_producer: Option<Arc<dyn MediaProducer>>,
    /// Keyed by (source peer, kind).
    consumers: HashMap<(String, MediaKind), Arc<dyn MediaConsumer>>,
}

struct Peer {
    profile: PeerProfile,
    connection: PeerConnectionHandle,
    connection_task: JoinHandle<()>,
    media: PeerMedia,
    /// Consumer event pumps feeding this peer's notices into the mailbox.
    watcher_tasks: Vec<JoinHandle<()>>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room name (registry key).
    room_name: String,
    /// Lifecycle phase.
    phase: RoomPhase,
    /// Unix timestamp of room creation.
    created_at: i64,
    /// Claim on the pool worker hosting this room's router.
    lease: WorkerLease,
    /// Codec set for the router.
    codecs: RouterCapabilities,
    /// Audio observer settings.
    observer_settings: AudioObserverSettings,
    /// The room's router; recreated if the engine closes it underneath us.
    router: Option<Arc<dyn MediaRouter>>,
    /// The room's audio-level observer.
    observer: Option<Arc<dyn AudioLevelObserver>>,
    /// Pump feeding observer reports into the mailbox.
    observer_task: Option<JoinHandle<()>>,
    /// Admitted peers by peer ID.
    peers: HashMap<String, Peer>,
    /// Host seat. Set once, never transferred.
    host: Option<String>,
    /// Registry mailbox for the fire-and-forget close notification.
    registry_tx: mpsc::Sender<RegistryMessage>,
    /// Own mailbox sender, cloned into watcher tasks.
    self_sender: mpsc::Sender<RoomMessage>,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Registry-level room/peer gauges.
    registry_metrics: Arc<RegistryMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle. The room is not usable
    /// until `load()` succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        room_name: String,
        lease: WorkerLease,
        codecs: RouterCapabilities,
        observer_settings: AudioObserverSettings,
        registry_tx: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        registry_metrics: Arc<RegistryMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_name: room_name.clone(),
            phase: RoomPhase::Created,
            created_at: chrono::Utc::now().timestamp(),
            lease,
            codecs,
            observer_settings,
            router: None,
            observer: None,
            observer_task: None,
            peers: HashMap::new(),
            host: None,
            registry_tx,
            self_sender: sender.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            registry_metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_name),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_name,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "rc.actor.room",
        fields(room_name = %self.room_name, worker_index = self.lease.worker_index())
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            worker_index = self.lease.worker_index(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_name = %self.room_name,
                        "RoomActor received cancellation signal"
                    );
                    self.close_room("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "rc.actor.room",
                                room_name = %self.room_name,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if self.phase != RoomPhase::Closed {
            self.close_room("mailbox closed").await;
        }
        let _ = self.registry_tx.try_send(RegistryMessage::RoomClosed {
            room_name: self.room_name.clone(),
        });

        info!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Load { respond_to } => {
                let _ = respond_to.send(self.handle_load().await);
                false
            }

            RoomMessage::Join {
                peer_id,
                profile,
                event_sink,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join(peer_id, profile, event_sink));
                false
            }

            RoomMessage::CreateTransport {
                peer_id,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create_transport(&peer_id, kind).await);
                false
            }

            RoomMessage::ConnectTransport {
                peer_id,
                kind,
                dtls_parameters,
                respond_to,
            } => {
                let _ = respond_to
                    .send(self.handle_connect_transport(&peer_id, kind, dtls_parameters).await);
                false
            }

            RoomMessage::Produce {
                peer_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_produce(&peer_id, kind, rtp_parameters).await);
                false
            }

            RoomMessage::Consume {
                peer_id,
                kind,
                rtp_capabilities,
                respond_to,
            } => {
                let _ =
                    respond_to.send(self.handle_consume(&peer_id, kind, rtp_capabilities).await);
                false
            }

            RoomMessage::SendMessage {
                from_peer,
                content,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_send_message(&from_peer, content).await);
                false
            }

            RoomMessage::SendGift {
                from_peer,
                gift,
                respond_to,
            } => {
                let _ = respond_to.send(
                    self.notify_host(RoomEvent::GiftSent {
                        peer_id: from_peer,
                        gift,
                    })
                    .await,
                );
                false
            }

            RoomMessage::RequestVideoChat {
                from_peer,
                respond_to,
            } => {
                let _ = respond_to.send(
                    self.notify_host(RoomEvent::VideoChatRequested { peer_id: from_peer })
                        .await,
                );
                false
            }

            RoomMessage::AcceptVideoChat {
                from_peer,
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_accept_video_chat(&from_peer, &peer_id).await);
                false
            }

            RoomMessage::PeerDisconnected {
                peer_id,
                respond_to,
            } => {
                let room_closed = self.handle_peer_disconnected(&peer_id).await;
                let _ = respond_to.send(room_closed);
                room_closed
            }

            RoomMessage::Close { respond_to } => {
                self.broadcast_all(RoomEvent::RoomClosed).await;
                self.close_room("unpublished").await;
                let _ = respond_to.send(());
                true
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                false
            }

            RoomMessage::AudioLevel { event } => {
                self.handle_audio_level(event).await;
                false
            }

            RoomMessage::ConsumerNotice {
                owner_peer,
                source_peer,
                consumer_id,
                kind,
                event,
            } => {
                self.handle_consumer_notice(&owner_peer, &source_peer, &consumer_id, kind, event)
                    .await;
                false
            }
        }
    }

    /// Create the router and audio observer.
    async fn handle_load(&mut self) -> Result<(), RcError> {
        if self.phase == RoomPhase::Closed {
            return Err(RcError::RoomNotFound(self.room_name.clone()));
        }
        if self.router.is_some() {
            return Ok(());
        }
        self.create_media_stack().await?;
        self.phase = RoomPhase::Active;
        info!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            worker_index = self.lease.worker_index(),
            "Room loaded"
        );
        Ok(())
    }

    async fn create_media_stack(&mut self) -> Result<(), RcError> {
        let router = self
            .lease
            .worker()
            .create_router(self.codecs.clone())
            .await?;
        let observer = router.create_audio_observer(self.observer_settings).await?;

        if let Some(task) = self.observer_task.take() {
            task.abort();
        }
        if let Some(mut events) = observer.take_events() {
            let sender = self.self_sender.clone();
            let cancel = self.cancel_token.clone();
            self.observer_task = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        maybe = events.recv() => match maybe {
                            Some(event) => {
                                if sender.send(RoomMessage::AudioLevel { event }).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }));
        }

        self.router = Some(router);
        self.observer = Some(observer);
        Ok(())
    }

    /// Return a live router, recreating the media stack if the engine
    /// closed it underneath us.
    async fn live_router(&mut self) -> Result<Arc<dyn MediaRouter>, RcError> {
        let needs_rebuild = self.router.as_ref().is_none_or(|r| r.closed());
        if needs_rebuild {
            warn!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                "Router is gone, recreating media stack"
            );
            self.create_media_stack().await?;
        }
        self.router
            .clone()
            .ok_or_else(|| RcError::Engine("router unavailable".to_string()))
    }

    fn handle_join(
        &mut self,
        peer_id: String,
        profile: PeerProfile,
        event_sink: mpsc::UnboundedSender<RoomEvent>,
    ) -> Result<JoinReply, RcError> {
        if self.phase != RoomPhase::Active {
            return Err(RcError::RoomNotFound(self.room_name.clone()));
        }
        if self.peers.contains_key(&peer_id) {
            return Err(RcError::DuplicateJoin(peer_id));
        }

        let capabilities = self
            .router
            .as_ref()
            .map(|r| r.capabilities())
            .ok_or_else(|| RcError::Engine("router unavailable".to_string()))?;

        let (connection, connection_task) = PeerConnectionActor::spawn(
            peer_id.clone(),
            self.room_name.clone(),
            event_sink,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        let is_host = self.host.is_none();
        if is_host {
            self.host = Some(peer_id.clone());
        }

        self.peers.insert(
            peer_id.clone(),
            Peer {
                profile,
                connection,
                connection_task,
                media: PeerMedia::default(),
                watcher_tasks: Vec::new(),
            },
        );
        self.lease.add_client();
        self.registry_metrics.increment_peers();
        self.metrics.connection_created();

        info!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            peer_id = %peer_id,
            is_host = is_host,
            peers = self.peers.len(),
            "Peer joined"
        );

        Ok(JoinReply {
            capabilities,
            is_host,
        })
    }

    async fn handle_create_transport(
        &mut self,
        peer_id: &str,
        kind: TransportKind,
    ) -> Result<CreateTransportReply, RcError> {
        if !self.peers.contains_key(peer_id) {
            return Err(RcError::PeerNotFound(peer_id.to_string()));
        }
        let router = self.live_router().await?;
        let transport = router.create_transport(kind, peer_id).await?;

        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| RcError::PeerNotFound(peer_id.to_string()))?;
        let slot = match kind {
            TransportKind::Producer => &mut peer.media.producer_transport,
            TransportKind::Consumer => &mut peer.media.consumer_transport,
        };
        // One live transport per direction: replacing closes the old one,
        // which also closes anything the client built on it.
        if let Some(old) = slot.replace(Arc::clone(&transport)) {
            debug!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                peer_id = %peer_id,
                kind = %kind,
                old_transport_id = %old.id(),
                "Replacing transport, closing superseded one"
            );
            old.close();
        }

        Ok(CreateTransportReply {
            params: transport.options(),
            kind,
        })
    }

    async fn handle_connect_transport(
        &mut self,
        peer_id: &str,
        kind: TransportKind,
        dtls_parameters: DtlsParameters,
    ) -> Result<bool, RcError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RcError::PeerNotFound(peer_id.to_string()))?;
        let transport = match kind {
            TransportKind::Producer => peer.media.producer_transport.as_ref(),
            TransportKind::Consumer => peer.media.consumer_transport.as_ref(),
        }
        .ok_or_else(|| RcError::TransportNotFound(format!("{kind} transport for {peer_id}")))?;

        transport.connect(dtls_parameters).await?;
        Ok(true)
    }

    /// Create a producer for the peer. All failures soft-fail to `None`;
    /// the client treats a null producer ID as "publish did not start".
    async fn handle_produce(
        &mut self,
        peer_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Option<String> {
        let Some(peer) = self.peers.get(peer_id) else {
            warn!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                peer_id = %peer_id,
                "Produce from unknown peer"
            );
            return None;
        };
        let Some(transport) = peer.media.producer_transport.clone() else {
            warn!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                peer_id = %peer_id,
                kind = %kind,
                "Produce without a producer transport"
            );
            return None;
        };

        let producer = match transport.produce(kind, rtp_parameters, peer_id).await {
            Ok(producer) => producer,
            Err(e) => {
                warn!(
                    target: "rc.actor.room",
                    room_name = %self.room_name,
                    peer_id = %peer_id,
                    kind = %kind,
                    error = %e,
                    "Produce failed"
                );
                return None;
            }
        };
        let producer_id = producer.id();

        // Replace any previous producer of this kind.
        let observer = self.observer.clone();
        if let Some(peer) = self.peers.get_mut(peer_id) {
            let slot = match kind {
                MediaKind::Audio => &mut peer.media.audio_producer,
                MediaKind::Video => &mut peer.media.video_producer,
            };
            if let Some(old) = slot.replace(producer) {
                if kind == MediaKind::Audio {
                    if let Some(observer) = &observer {
                        observer.remove_producer(&old.id()).await;
                    }
                }
                old.close();
            }
        }

        if kind == MediaKind::Audio {
            if let Some(observer) = &observer {
                if let Err(e) = observer.add_producer(&producer_id, peer_id).await {
                    warn!(
                        target: "rc.actor.room",
                        room_name = %self.room_name,
                        peer_id = %peer_id,
                        error = %e,
                        "Failed to track audio producer"
                    );
                }
            }
        }

        debug!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            peer_id = %peer_id,
            kind = %kind,
            producer_id = %producer_id,
            "Producer created"
        );
        Some(producer_id)
    }

    async fn handle_consume(
        &mut self,
        peer_id: &str,
        kind: MediaKind,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeReply, RcError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| RcError::PeerNotFound(peer_id.to_string()))?;
        let profile = peer.profile.clone();
        let transport = peer
            .media
            .consumer_transport
            .clone()
            .ok_or_else(|| RcError::TransportNotFound(format!("consumer transport for {peer_id}")))?;

        let host_id = self
            .host
            .clone()
            .ok_or_else(|| RcError::NoSuchProducer("room has no host".to_string()))?;
        let host = self
            .peers
            .get(&host_id)
            .ok_or_else(|| RcError::NoSuchProducer("room has no host".to_string()))?;
        let producer = match kind {
            MediaKind::Audio => host.media.audio_producer.clone(),
            MediaKind::Video => host.media.video_producer.clone(),
        }
        .ok_or_else(|| RcError::NoSuchProducer(format!("host has no {kind} producer")))?;
        let producer_id = producer.id();

        let router = self.live_router().await?;
        if !router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(RcError::CapabilityMismatch(format!(
                "cannot consume {kind} producer {producer_id}"
            )));
        }

        // Video consumers start paused and are resumed once wired up, so
        // the first keyframe lands after the client is ready. Audio flows
        // immediately.
        let start_paused = kind == MediaKind::Video;
        let consumer = transport
            .consume(&producer_id, rtp_capabilities, start_paused, peer_id)
            .await?;

        let reply = ConsumeReply {
            producer_id: producer_id.clone(),
            id: consumer.id(),
            kind,
            rtp_parameters: consumer.rtp_parameters(),
            consumer_type: consumer.consumer_type(),
            producer_paused: consumer.producer_paused(),
        };

        let watcher = consumer.take_events().map(|mut events| {
            let sender = self.self_sender.clone();
            let cancel = self.cancel_token.clone();
            let owner = peer_id.to_string();
            let source = host_id.clone();
            let consumer_id = consumer.id();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        maybe = events.recv() => match maybe {
                            Some(event) => {
                                let notice = RoomMessage::ConsumerNotice {
                                    owner_peer: owner.clone(),
                                    source_peer: source.clone(),
                                    consumer_id: consumer_id.clone(),
                                    kind,
                                    event,
                                };
                                if sender.send(notice).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            })
        });

        if start_paused {
            if let Err(e) = consumer.resume().await {
                warn!(
                    target: "rc.actor.room",
                    room_name = %self.room_name,
                    peer_id = %peer_id,
                    error = %e,
                    "Failed to resume video consumer"
                );
            }
        }

        if let Some(peer) = self.peers.get_mut(peer_id) {
            if let Some(old) = peer
                .media
                .consumers
                .insert((host_id.clone(), kind), consumer)
            {
                old.close();
            }
            if let Some(task) = watcher {
                peer.watcher_tasks.push(task);
            }
        }

        // Tell the host who is watching. Skip when the host consumes its
        // own echo.
        if host_id != peer_id {
            self.deliver_to(&host_id, RoomEvent::UserJoined { user: profile })
                .await;
        }

        debug!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            peer_id = %peer_id,
            kind = %kind,
            producer_id = %producer_id,
            "Consumer created"
        );
        Ok(reply)
    }

    async fn handle_send_message(
        &mut self,
        from_peer: &str,
        content: String,
    ) -> Result<(), RcError> {
        let profile = self
            .peers
            .get(from_peer)
            .map(|p| p.profile.clone())
            .ok_or_else(|| RcError::PeerNotFound(from_peer.to_string()))?;
        let event = RoomEvent::NewMessage {
            message: ChatMessage {
                content,
                from: profile,
            },
            room: self.room_name.clone(),
        };
        self.broadcast_except(from_peer, event).await;
        Ok(())
    }

    async fn handle_accept_video_chat(
        &mut self,
        from_peer: &str,
        peer_id: &str,
    ) -> Result<(), RcError> {
        if !self.peers.contains_key(from_peer) {
            return Err(RcError::PeerNotFound(from_peer.to_string()));
        }
        if !self.peers.contains_key(peer_id) {
            return Err(RcError::PeerNotFound(peer_id.to_string()));
        }
        self.deliver_to(
            peer_id,
            RoomEvent::VideoChatAccepted {
                peer_id: from_peer.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Remove a departed peer; close the room when it was the host.
    async fn handle_peer_disconnected(&mut self, peer_id: &str) -> bool {
        if !self.peers.contains_key(peer_id) {
            debug!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                peer_id = %peer_id,
                "Disconnect for unknown peer, ignoring"
            );
            return false;
        }

        let was_host = self.host.as_deref() == Some(peer_id);
        if was_host {
            info!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                peer_id = %peer_id,
                "Host disconnected, closing room"
            );
            self.broadcast_except(peer_id, RoomEvent::RoomClosed).await;
            self.close_room("host disconnected").await;
            return true;
        }

        if let Some(mut peer) = self.peers.remove(peer_id) {
            self.release_peer_media(&mut peer).await;
            Self::drain_and_stop_connection(peer, "disconnected").await;
            self.lease.remove_client();
            self.registry_metrics.decrement_peers();
            self.metrics.connection_closed();
        }

        self.broadcast_except(
            peer_id,
            RoomEvent::ClientDisconnected {
                id: peer_id.to_string(),
            },
        )
        .await;

        info!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            peer_id = %peer_id,
            peers = self.peers.len(),
            "Peer disconnected"
        );
        false
    }

    async fn handle_audio_level(&mut self, event: AudioObserverEvent) {
        let room_event = match event {
            AudioObserverEvent::Volumes { peer_id, volume } => RoomEvent::ActiveSpeaker {
                peer_id: Some(peer_id),
                volume: Some(volume),
            },
            AudioObserverEvent::Silence => RoomEvent::ActiveSpeaker {
                peer_id: None,
                volume: None,
            },
        };
        self.broadcast_all(room_event).await;
    }

    /// React to a consumer lifecycle notice, serialized with everything
    /// else through the mailbox.
    async fn handle_consumer_notice(
        &mut self,
        owner_peer: &str,
        source_peer: &str,
        consumer_id: &str,
        kind: MediaKind,
        event: ConsumerEvent,
    ) {
        let key = (source_peer.to_string(), kind);
        let consumer = match self.peers.get(owner_peer) {
            Some(peer) => peer.media.consumers.get(&key).cloned(),
            None => return,
        };
        let Some(consumer) = consumer else { return };
        if consumer.id() != consumer_id {
            debug!(
                target: "rc.actor.room",
                room_name = %self.room_name,
                owner_peer = %owner_peer,
                consumer_id = %consumer_id,
                "Notice from a superseded consumer, ignoring"
            );
            return;
        }

        match event {
            ConsumerEvent::TransportClosed => {
                consumer.close();
                if let Some(peer) = self.peers.get_mut(owner_peer) {
                    peer.media.consumers.remove(&key);
                }
            }
            ConsumerEvent::ProducerClosed => {
                consumer.close();
                if let Some(peer) = self.peers.get_mut(owner_peer) {
                    peer.media.consumers.remove(&key);
                }
                self.deliver_to(
                    owner_peer,
                    RoomEvent::ProducerClosed {
                        peer_id: source_peer.to_string(),
                        kind,
                    },
                )
                .await;
            }
            ConsumerEvent::ProducerPaused => {
                if let Err(e) = consumer.pause().await {
                    debug!(
                        target: "rc.actor.room",
                        room_name = %self.room_name,
                        error = %e,
                        "Pause on dead consumer"
                    );
                }
                self.deliver_to(
                    owner_peer,
                    RoomEvent::ProducerPaused {
                        peer_id: source_peer.to_string(),
                        kind,
                    },
                )
                .await;
            }
            ConsumerEvent::ProducerResumed => {
                if let Err(e) = consumer.resume().await {
                    debug!(
                        target: "rc.actor.room",
                        room_name = %self.room_name,
                        error = %e,
                        "Resume on dead consumer"
                    );
                }
                self.deliver_to(
                    owner_peer,
                    RoomEvent::ProducerResumed {
                        peer_id: source_peer.to_string(),
                        kind,
                    },
                )
                .await;
            }
        }
    }

    /// Deliver an event to the host, if one is seated.
    async fn notify_host(&mut self, event: RoomEvent) -> Result<(), RcError> {
        let host_id = self
            .host
            .clone()
            .ok_or_else(|| RcError::PeerNotFound("room has no host".to_string()))?;
        self.deliver_to(&host_id, event).await;
        Ok(())
    }

    async fn deliver_to(&self, peer_id: &str, event: RoomEvent) {
        if let Some(peer) = self.peers.get(peer_id) {
            if let Err(e) = peer.connection.deliver(event).await {
                warn!(
                    target: "rc.actor.room",
                    room_name = %self.room_name,
                    peer_id = %peer_id,
                    error = %e,
                    "Event delivery failed"
                );
            }
        }
    }

    async fn broadcast_except(&self, except_peer: &str, event: RoomEvent) {
        for (peer_id, peer) in &self.peers {
            if peer_id == except_peer {
                continue;
            }
            if let Err(e) = peer.connection.deliver(event.clone()).await {
                warn!(
                    target: "rc.actor.room",
                    room_name = %self.room_name,
                    peer_id = %peer_id,
                    error = %e,
                    "Broadcast delivery failed"
                );
            }
        }
    }

    async fn broadcast_all(&self, event: RoomEvent) {
        for (peer_id, peer) in &self.peers {
            if let Err(e) = peer.connection.deliver(event.clone()).await {
                warn!(
                    target: "rc.actor.room",
                    room_name = %self.room_name,
                    peer_id = %peer_id,
                    error = %e,
                    "Broadcast delivery failed"
                );
            }
        }
    }

    /// Close everything a peer owns. Safe to call on half-built peers;
    /// engine close calls are idempotent.
    async fn release_peer_media(&mut self, peer: &mut Peer) {
        for task in peer.watcher_tasks.drain(..) {
            task.abort();
        }
        for (_, consumer) in peer.media.consumers.drain() {
            consumer.close();
        }
        if let Some(producer) = peer.media.audio_producer.take() {
            if let Some(observer) = &self.observer {
                observer.remove_producer(&producer.id()).await;
            }
            producer.close();
        }
        if let Some(producer) = peer.media.video_producer.take() {
            producer.close();
        }
        if let Some(transport) = peer.media.producer_transport.take() {
            transport.close();
        }
        if let Some(transport) = peer.media.consumer_transport.take() {
            transport.close();
        }
    }

    /// Stop a peer's connection actor after its mailbox drains.
    ///
    /// The close message queues behind any pending deliveries, so events
    /// broadcast before teardown still reach the client. Aborting is
    /// reserved for an actor whose mailbox is already gone.
    async fn drain_and_stop_connection(peer: Peer, reason: &str) {
        let Peer {
            connection,
            connection_task,
            ..
        } = peer;
        if connection.close(reason.to_string()).await.is_err() {
            connection_task.abort();
        }
        let _ = connection_task.await;
        connection.cancel();
    }

    /// Tear the room down: evict all peers, close media, mark closed.
    async fn close_room(&mut self, reason: &str) {
        if self.phase == RoomPhase::Closed {
            return;
        }
        self.phase = RoomPhase::Closed;

        info!(
            target: "rc.actor.room",
            room_name = %self.room_name,
            reason = %reason,
            peers = self.peers.len(),
            "Closing room"
        );

        let peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        for peer_id in peer_ids {
            if let Some(mut peer) = self.peers.remove(&peer_id) {
                self.release_peer_media(&mut peer).await;
                Self::drain_and_stop_connection(peer, reason).await;
                self.lease.remove_client();
                self.registry_metrics.decrement_peers();
                self.metrics.connection_closed();
            }
        }
        self.host = None;

        if let Some(task) = self.observer_task.take() {
            task.abort();
        }
        if let Some(observer) = self.observer.take() {
            observer.close();
        }
        if let Some(router) = self.router.take() {
            router.close();
        }
    }

    fn snapshot(&self) -> RoomStateSnapshot {
        let mut peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        peer_ids.sort();
        RoomStateSnapshot {
            room_name: self.room_name.clone(),
            phase: self.phase,
            host: self.host.clone(),
            peer_ids,
            worker_index: self.lease.worker_index(),
            created_at: self.created_at,
        }
    }
}
