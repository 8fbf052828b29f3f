//! `RoomRegistryActor` - singleton owner of the room table.
//!
//! Each controller process runs exactly one registry. It:
//! - Maps room names to live `RoomActor` handles (at most one per name)
//! - Creates rooms on demand, placing them on the least-loaded worker
//! - Removes rooms when they close so names can be reused
//! - Reaps rooms whose task died without a close notification
//!
//! Room creation happens inside the message loop, so two concurrent joins
//! for the same name queue up in the mailbox and the second sees the
//! first's room. Creation includes awaiting `load()`; the handle is never
//! shared before the room's router exists.

use crate::engine::{AudioObserverSettings, WorkerPool};
use crate::errors::RcError;

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor, RegistryMetrics};
use super::room::{RoomActor, RoomActorHandle};

use signal_protocol::RouterCapabilities;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How often the registry sweeps for dead room tasks.
const ROOM_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for each room task during shutdown.
const SHUTDOWN_ROOM_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomRegistryActor`.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Look up a room, creating and loading it if absent.
    pub async fn get_or_create_room(&self, room_name: String) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetOrCreateRoom {
            room_name,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Look up an existing room.
    pub async fn get_room(&self, room_name: String) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetRoom {
            room_name,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Snapshot of rooms and worker load.
    pub async fn status(&self) -> Result<RegistryStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;
        Self::receive(rx).await
    }

    /// Close all rooms and stop the registry.
    pub async fn shutdown(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Shutdown { respond_to: tx })
            .await?;
        Self::receive(rx).await
    }

    /// Cancel the registry actor and everything under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), RcError> {
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

struct ManagedRoom {
    handle: RoomActorHandle,
    task: JoinHandle<()>,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    /// Worker pool for room placement.
    pool: Arc<WorkerPool>,
    /// Codec set handed to every room router.
    codecs: RouterCapabilities,
    /// Audio observer settings handed to every room.
    observer_settings: AudioObserverSettings,
    /// Live rooms by name.
    rooms: HashMap<String, ManagedRoom>,
    /// Refusing new rooms (shutdown in progress).
    draining: bool,
    /// Own mailbox sender, cloned into rooms for close notifications.
    self_sender: mpsc::Sender<RegistryMessage>,
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root cancellation token for the actor tree.
    cancel_token: CancellationToken,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Room/peer gauges.
    registry_metrics: Arc<RegistryMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        pool: Arc<WorkerPool>,
        codecs: RouterCapabilities,
        observer_settings: AudioObserverSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        registry_metrics: Arc<RegistryMetrics>,
    ) -> (RoomRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        let actor = Self {
            pool,
            codecs,
            observer_settings,
            rooms: HashMap::new(),
            draining: false,
            self_sender: sender.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            registry_metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomRegistryHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            pool_size = self.pool.size(),
            "RoomRegistryActor started"
        );

        let mut health_interval = tokio::time::interval(ROOM_HEALTH_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.shutdown_rooms().await;
                    break;
                }

                _ = health_interval.tick() => {
                    self.check_room_health().await;
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
                                target: "rc.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_name,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_get_or_create(room_name).await);
                false
            }

            RegistryMessage::GetRoom {
                room_name,
                respond_to,
            } => {
                let result = self
                    .rooms
                    .get(&room_name)
                    .map(|managed| managed.handle.clone())
                    .ok_or(RcError::RoomNotFound(room_name));
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::RoomClosed { room_name } => {
                if self.rooms.remove(&room_name).is_some() {
                    self.metrics.room_removed();
                    self.registry_metrics.decrement_rooms();
                    info!(
                        target: "rc.actor.registry",
                        room_name = %room_name,
                        rooms = self.rooms.len(),
                        "Room removed from registry"
                    );
                }
                false
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
                false
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.shutdown_rooms().await;
                let _ = respond_to.send(());
                true
            }
        }
    }

    /// Get or create the room. Runs inside the message loop: concurrent
    /// requests for the same name serialize here, so the second request
    /// finds the room the first one created.
    async fn handle_get_or_create(&mut self, room_name: String) -> Result<RoomActorHandle, RcError> {
        if self.draining {
            return Err(RcError::Draining);
        }
        if let Some(managed) = self.rooms.get(&room_name) {
            return Ok(managed.handle.clone());
        }

        let lease = self.pool.lease_least_loaded()?;
        let worker_index = lease.worker_index();
        let (handle, task) = RoomActor::spawn(
            room_name.clone(),
            lease,
            self.codecs.clone(),
            self.observer_settings,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.registry_metrics),
        );

        if let Err(e) = handle.load().await {
            warn!(
                target: "rc.actor.registry",
                room_name = %room_name,
                error = %e,
                "Room failed to load, discarding"
            );
            handle.cancel();
            return Err(e);
        }

        info!(
            target: "rc.actor.registry",
            room_name = %room_name,
            worker_index = worker_index,
            rooms = self.rooms.len() + 1,
            "Room created"
        );

        self.rooms.insert(
            room_name,
            ManagedRoom {
                handle: handle.clone(),
                task,
            },
        );
        self.metrics.room_created();
        self.registry_metrics.increment_rooms();

        Ok(handle)
    }

    fn status(&self) -> RegistryStatus {
        let mut room_names: Vec<String> = self.rooms.keys().cloned().collect();
        room_names.sort();
        let snapshot = self.registry_metrics.snapshot();
        RegistryStatus {
            room_names,
            rooms: snapshot.rooms,
            peers: snapshot.peers,
            workers: self.pool.stats(),
        }
    }

    /// Reap rooms whose task finished without sending `RoomClosed`.
    /// A finished task with a panic payload indicates a bug.
    async fn check_room_health(&mut self) {
        let dead: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for room_name in dead {
            if let Some(managed) = self.rooms.remove(&room_name) {
                if let Err(e) = managed.task.await {
                    if e.is_panic() {
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
                warn!(
                    target: "rc.actor.registry",
                    room_name = %room_name,
                    "Reaped dead room task"
                );
                self.metrics.room_removed();
                self.registry_metrics.decrement_rooms();
            }
        }
    }

    /// Close every room and wait briefly for each task to finish.
    async fn shutdown_rooms(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;

        let rooms: Vec<(String, ManagedRoom)> = self.rooms.drain().collect();
        info!(
            target: "rc.actor.registry",
            rooms = rooms.len(),
            "Shutting down all rooms"
        );

        for (room_name, managed) in rooms {
            if let Err(e) = managed.handle.close().await {
                debug!(
                    target: "rc.actor.registry",
                    room_name = %room_name,
                    error = %e,
                    "Room already gone during shutdown"
                );
            }
            if tokio::time::timeout(SHUTDOWN_ROOM_TIMEOUT, managed.task)
                .await
                .is_err()
            {
                warn!(
                    target: "rc.actor.registry",
                    room_name = %room_name,
                    "Room task did not finish in time, cancelling"
                );
                managed.handle.cancel();
            }
            self.metrics.room_removed();
            self.registry_metrics.decrement_rooms();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::local::LocalEngine;
    use crate::engine::WorkerSettings;
    use futures::future::join_all;
    use signal_protocol::{PeerProfile, RoomEvent};
    use std::time::Duration;

    async fn spawn_registry(pool_size: usize) -> RoomRegistryHandle {
        let pool = Arc::new(
            WorkerPool::create(&LocalEngine::new(), pool_size, &WorkerSettings::default())
                .await
                .unwrap(),
        );
        let (handle, _task) = RoomRegistryActor::spawn(
            pool,
            RouterCapabilities::default_set(),
            AudioObserverSettings::default(),
            CancellationToken::new(),
            ActorMetrics::new(),
            RegistryMetrics::new(),
        );
        handle
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_existing_room() {
        let registry = spawn_registry(2).await;

        let first = registry.get_or_create_room("r1".to_string()).await.unwrap();
        let second = registry.get_or_create_room("r1".to_string()).await.unwrap();
        assert_eq!(first.room_name(), second.room_name());

        let status = registry.status().await.unwrap();
        assert_eq!(status.room_names, vec!["r1".to_string()]);
        assert_eq!(status.rooms, 1);
    }

    #[tokio::test]
    async fn test_get_room_missing_fails() {
        let registry = spawn_registry(1).await;
        let result = registry.get_room("nope".to_string()).await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_room() {
        let registry = spawn_registry(2).await;

        let requests = (0..8).map(|_| registry.get_or_create_room("burst".to_string()));
        let results = join_all(requests).await;
        for result in results {
            assert!(result.is_ok());
        }

        let status = registry.status().await.unwrap();
        assert_eq!(status.rooms, 1);
    }

    #[tokio::test]
    async fn test_host_departure_frees_the_name() {
        let registry = spawn_registry(1).await;

        let room = registry.get_or_create_room("r1".to_string()).await.unwrap();
        let (sink_tx, _sink_rx) = tokio::sync::mpsc::unbounded_channel();
        let reply = room
            .join("host".to_string(), PeerProfile::default(), sink_tx)
            .await
            .unwrap();
        assert!(reply.is_host);

        let closed = room.peer_disconnected("host".to_string()).await.unwrap();
        assert!(closed);

        // The close notification is fire-and-forget; poll until the
        // registry has processed it.
        let mut freed = false;
        for _ in 0..50 {
            if registry.get_room("r1".to_string()).await.is_err() {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(freed, "room name was not released");

        // The name is reusable afterwards.
        let room = registry.get_or_create_room("r1".to_string()).await.unwrap();
        assert_eq!(room.room_name(), "r1");
    }

    #[tokio::test]
    async fn test_rooms_spread_across_workers() {
        let registry = spawn_registry(2).await;

        let r1 = registry.get_or_create_room("r1".to_string()).await.unwrap();
        let (sink_tx, _sink_rx) = tokio::sync::mpsc::unbounded_channel();
        r1.join("host".to_string(), PeerProfile::default(), sink_tx)
            .await
            .unwrap();

        // Second room goes to the idle worker.
        let r2 = registry.get_or_create_room("r2".to_string()).await.unwrap();
        let s1 = r1.state().await.unwrap();
        let s2 = r2.state().await.unwrap();
        assert_ne!(s1.worker_index, s2.worker_index);
    }

    #[tokio::test]
    async fn test_shutdown_closes_rooms() {
        let registry = spawn_registry(1).await;

        let room = registry.get_or_create_room("r1".to_string()).await.unwrap();
        let (sink_tx, mut sink_rx) = tokio::sync::mpsc::unbounded_channel();
        room.join("host".to_string(), PeerProfile::default(), sink_tx)
            .await
            .unwrap();

        registry.shutdown().await.unwrap();

        // Drain tells the client the room is gone, then the connection is
        // closed and no more events arrive.
        assert_eq!(sink_rx.recv().await, Some(RoomEvent::RoomClosed));
        assert!(sink_rx.recv().await.is_none());

        // The registry actor has exited; further requests fail.
        let result = registry.get_or_create_room("r2".to_string()).await;
        assert!(result.is_err());
    }
}
