//! `PeerConnectionActor` - per-peer event delivery actor.
//!
//! Each `PeerConnectionActor`:
//! - Is 1:1 with room membership (one connection = one peer in one room)
//! - Serializes event delivery toward a single client
//! - Pushes events into the sink registered at join time
//!
//! # Lifecycle
//!
//! 1. Created when a join is accepted by the `RoomActor`
//! 2. Runs until the peer leaves, the room closes, or delivery fails
//! 3. Cancellation via child token propagates from the room

use crate::errors::RcError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use signal_protocol::RoomEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `PeerConnectionActor`.
#[derive(Clone, Debug)]
pub struct PeerConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    peer_id: String,
}

impl PeerConnectionHandle {
    /// Get the peer ID.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Deliver a room event to the client.
    pub async fn deliver(&self, event: RoomEvent) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Deliver { event })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the connection.
    pub async fn close(&self, reason: String) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Ping the connection to check liveness.
    pub async fn ping(&self) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ConnectionMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `PeerConnectionActor` implementation.
pub struct PeerConnectionActor {
    /// Peer ID.
    peer_id: String,
    /// Room name.
    room_name: String,
    /// Where delivered events go (the transport session feeding the client).
    event_sink: mpsc::UnboundedSender<RoomEvent>,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the room's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl PeerConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        peer_id: String,
        room_name: String,
        event_sink: mpsc::UnboundedSender<RoomEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (PeerConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            peer_id: peer_id.clone(),
            room_name,
            event_sink,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, &peer_id),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerConnectionHandle {
            sender,
            cancel_token,
            peer_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "rc.actor.connection",
        fields(peer_id = %self.peer_id, room_name = %self.room_name)
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.connection",
            peer_id = %self.peer_id,
            room_name = %self.room_name,
            "PeerConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.connection",
                        peer_id = %self.peer_id,
                        "PeerConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "rc.actor.connection",
                                peer_id = %self.peer_id,
                                "PeerConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.connection",
            peer_id = %self.peer_id,
            room_name = %self.room_name,
            messages_processed = self.mailbox.messages_processed(),
            "PeerConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                self.handle_deliver(event);
                false
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason);
                true
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    /// Push one event into the client sink.
    fn handle_deliver(&mut self, event: RoomEvent) {
        if self.is_closing {
            warn!(
                target: "rc.actor.connection",
                peer_id = %self.peer_id,
                event = event.name(),
                "Attempted to deliver event while closing"
            );
            return;
        }

        debug!(
            target: "rc.actor.connection",
            peer_id = %self.peer_id,
            event = event.name(),
            "Delivering event to client"
        );

        if self.event_sink.send(event).is_err() {
            // The session dropped its receiver; the room will learn about
            // the departure through the disconnect path, not here.
            warn!(
                target: "rc.actor.connection",
                peer_id = %self.peer_id,
                "Event sink closed, client is gone"
            );
            self.is_closing = true;
        }
    }

    /// Gracefully close the connection.
    fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "rc.actor.connection",
            peer_id = %self.peer_id,
            reason = %reason,
            "Closing connection"
        );
    }
}
