//! Signaling gateway: maps client requests onto registry and room actors.
//!
//! One `Gateway` serves every signaling connection in the process. The
//! transport layer (WebSocket, WebTransport, in-process tests) owns the
//! framing; it hands the gateway a connection ID, parsed requests, and an
//! event sink for server-pushed room events, and gets JSON reply bodies
//! back. The gateway tracks which room and peer each connection is bound
//! to, so disconnects clean up the right membership.

use crate::actors::RoomRegistryHandle;
use crate::errors::RcError;

use serde::{Deserialize, Serialize};
use serde_json::json;
use signal_protocol::{
    DtlsParameters, MediaKind, PeerProfile, RoomEvent, RtpCapabilities, RtpParameters,
    TransportKind,
};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

/// A client request, tagged the way clients emit it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", content = "data")]
pub enum SignalRequest {
    /// Create (or replace) a transport of the given kind.
    #[serde(rename = "createWebRTCTransport")]
    CreateTransport {
        #[serde(rename = "type")]
        kind: TransportKind,
    },

    /// Feed DTLS parameters into a previously created transport.
    #[serde(rename = "connectWebRTCTransport")]
    ConnectTransport {
        #[serde(rename = "type")]
        kind: TransportKind,
        #[serde(rename = "dtlsParameters")]
        dtls_parameters: DtlsParameters,
    },

    /// Start publishing a track.
    #[serde(rename = "produce")]
    Produce {
        kind: MediaKind,
        #[serde(rename = "rtpParameters")]
        rtp_parameters: RtpParameters,
    },

    /// Subscribe to the host's track of the given kind.
    #[serde(rename = "consume")]
    Consume {
        kind: MediaKind,
        #[serde(rename = "rtpCapabilities")]
        rtp_capabilities: RtpCapabilities,
    },

    /// Relay a chat message to the room.
    #[serde(rename = "sendMessage")]
    SendMessage { content: String },

    /// Close the room explicitly.
    #[serde(rename = "unpublishRoom")]
    UnpublishRoom,

    /// Send a gift notification to the host.
    #[serde(rename = "sendGift")]
    SendGift { gift: serde_json::Value },

    /// Ask the host for a video chat.
    #[serde(rename = "requestVideoChat")]
    RequestVideoChat,

    /// Accept a pending video chat request from `peerId`.
    #[serde(rename = "acceptVideoChatRequest")]
    AcceptVideoChat {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Liveness echo; the payload comes back unchanged.
    #[serde(rename = "identity")]
    Identity(serde_json::Value),
}

/// Error envelope returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SignalError {
    pub code: i32,
    pub message: String,
}

impl From<&RcError> for SignalError {
    fn from(err: &RcError) -> Self {
        Self {
            code: err.error_code(),
            message: err.client_message(),
        }
    }
}

/// Which room and peer a signaling connection is bound to.
#[derive(Debug, Clone)]
struct Session {
    room_name: String,
    peer_id: String,
}

/// The signaling gateway.
pub struct Gateway {
    registry: RoomRegistryHandle,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Gateway {
    #[must_use]
    pub fn new(registry: RoomRegistryHandle) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Join (or create) a room and bind the connection to it.
    ///
    /// `event_sink` receives every server-pushed event for the peer.
    /// Returns the router capability set for client device loading.
    #[instrument(skip_all, fields(connection_id = %connection_id, room_name = %room_name, peer_id = %peer_id))]
    pub async fn join_room(
        &self,
        connection_id: &str,
        room_name: String,
        peer_id: String,
        profile: PeerProfile,
        event_sink: mpsc::UnboundedSender<RoomEvent>,
    ) -> Result<serde_json::Value, RcError> {
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(connection_id) {
                return Err(RcError::DuplicateJoin(connection_id.to_string()));
            }
        }

        let room = self.registry.get_or_create_room(room_name.clone()).await?;
        let reply = room.join(peer_id.clone(), profile, event_sink).await?;

        self.sessions.lock().await.insert(
            connection_id.to_string(),
            Session {
                room_name: room_name.clone(),
                peer_id: peer_id.clone(),
            },
        );

        info!(
            target: "rc.gateway",
            connection_id = %connection_id,
            room_name = %room_name,
            peer_id = %peer_id,
            is_host = reply.is_host,
            "Connection joined room"
        );

        Ok(json!({
            "room": room_name,
            "isHost": reply.is_host,
            "routerRtpCapabilities": reply.capabilities,
        }))
    }

    /// Dispatch one in-room request for a joined connection.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn dispatch(
        &self,
        connection_id: &str,
        request: SignalRequest,
    ) -> Result<serde_json::Value, RcError> {
        // identity is a liveness echo and works before a join.
        let request = match request {
            SignalRequest::Identity(value) => return Ok(value),
            other => other,
        };

        let session = self
            .sessions
            .lock()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| RcError::PeerNotFound(format!("connection {connection_id} not joined")))?;
        let room = self.registry.get_room(session.room_name.clone()).await?;
        let peer_id = session.peer_id;

        match request {
            SignalRequest::CreateTransport { kind } => {
                let reply = room.create_transport(peer_id, kind).await?;
                Ok(serde_json::to_value(reply)
                    .map_err(|e| RcError::Internal(format!("reply serialization failed: {e}")))?)
            }

            SignalRequest::ConnectTransport {
                kind,
                dtls_parameters,
            } => {
                let connected = room
                    .connect_transport(peer_id, kind, dtls_parameters)
                    .await?;
                Ok(json!(connected))
            }

            SignalRequest::Produce {
                kind,
                rtp_parameters,
            } => {
                let producer_id = room.produce(peer_id, kind, rtp_parameters).await?;
                Ok(json!({ "producerId": producer_id }))
            }

            SignalRequest::Consume {
                kind,
                rtp_capabilities,
            } => {
                let reply = room.consume(peer_id, kind, rtp_capabilities).await?;
                Ok(serde_json::to_value(reply)
                    .map_err(|e| RcError::Internal(format!("reply serialization failed: {e}")))?)
            }

            SignalRequest::SendMessage { content } => {
                room.send_message(peer_id, content).await?;
                Ok(json!(true))
            }

            SignalRequest::UnpublishRoom => {
                debug!(
                    target: "rc.gateway",
                    connection_id = %connection_id,
                    room_name = %room.room_name(),
                    "Unpublishing room"
                );
                room.close().await?;
                Ok(json!(true))
            }

            SignalRequest::SendGift { gift } => {
                room.send_gift(peer_id, gift).await?;
                Ok(json!(true))
            }

            SignalRequest::RequestVideoChat => {
                room.request_video_chat(peer_id).await?;
                Ok(json!(true))
            }

            SignalRequest::AcceptVideoChat { peer_id: target } => {
                room.accept_video_chat(peer_id, target).await?;
                Ok(json!(true))
            }

            SignalRequest::Identity(value) => Ok(value),
        }
    }

    /// Handle a connection going away: unbind it and tell its room.
    ///
    /// Returns `true` when the departure closed the whole room.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn connection_closed(&self, connection_id: &str) -> bool {
        let Some(session) = self.sessions.lock().await.remove(connection_id) else {
            return false;
        };

        let room = match self.registry.get_room(session.room_name.clone()).await {
            Ok(room) => room,
            // Room already gone (host left first); nothing to clean up.
            Err(_) => return false,
        };

        match room.peer_disconnected(session.peer_id.clone()).await {
            Ok(room_closed) => {
                info!(
                    target: "rc.gateway",
                    connection_id = %connection_id,
                    room_name = %session.room_name,
                    peer_id = %session.peer_id,
                    room_closed = room_closed,
                    "Connection left room"
                );
                room_closed
            }
            Err(e) => {
                warn!(
                    target: "rc.gateway",
                    connection_id = %connection_id,
                    error = %e,
                    "Disconnect cleanup failed"
                );
                false
            }
        }
    }

    /// Build the client-facing error envelope for a failed request.
    #[must_use]
    pub fn error_body(err: &RcError) -> serde_json::Value {
        json!({ "error": SignalError::from(err) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, RegistryMetrics, RoomRegistryActor};
    use crate::engine::local::LocalEngine;
    use crate::engine::{AudioObserverSettings, WorkerPool, WorkerSettings};
    use signal_protocol::{RouterCapabilities, RtpCodecCapability};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn gateway() -> Gateway {
        let pool = Arc::new(
            WorkerPool::create(&LocalEngine::new(), 2, &WorkerSettings::default())
                .await
                .unwrap(),
        );
        let (registry, _task) = RoomRegistryActor::spawn(
            pool,
            RouterCapabilities::default_set(),
            AudioObserverSettings::default(),
            CancellationToken::new(),
            ActorMetrics::new(),
            RegistryMetrics::new(),
        );
        Gateway::new(registry)
    }

    fn profile(name: &str) -> PeerProfile {
        PeerProfile {
            username: name.to_string(),
            ..PeerProfile::default()
        }
    }

    fn full_capabilities() -> RtpCapabilities {
        RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
        }
    }

    async fn join(
        gw: &Gateway,
        conn: &str,
        room: &str,
        peer: &str,
    ) -> (serde_json::Value, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let body = gw
            .join_room(conn, room.to_string(), peer.to_string(), profile(peer), tx)
            .await
            .unwrap();
        (body, rx)
    }

    #[tokio::test]
    async fn test_join_reports_host_and_capabilities() {
        let gw = gateway().await;
        let (body, _rx) = join(&gw, "c1", "r1", "host").await;
        assert_eq!(body["isHost"], true);
        assert_eq!(body["room"], "r1");
        assert!(body["routerRtpCapabilities"]["codecs"].is_array());

        let (body, _rx) = join(&gw, "c2", "r1", "viewer").await;
        assert_eq!(body["isHost"], false);
    }

    #[tokio::test]
    async fn test_dispatch_requires_join() {
        let gw = gateway().await;
        let result = gw.dispatch("c1", SignalRequest::RequestVideoChat).await;
        assert!(matches!(result, Err(RcError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_identity_echoes_payload_without_join() {
        let gw = gateway().await;
        let payload = json!({"nonce": 42});
        let body = gw
            .dispatch("c1", SignalRequest::Identity(payload.clone()))
            .await
            .unwrap();
        assert_eq!(body, payload);

        // Works the same once the connection is joined.
        let (_body, _rx) = join(&gw, "c1", "r1", "host").await;
        let body = gw
            .dispatch("c1", SignalRequest::Identity(json!("ping")))
            .await
            .unwrap();
        assert_eq!(body, json!("ping"));
    }

    #[tokio::test]
    async fn test_full_publish_subscribe_flow() {
        let gw = gateway().await;
        let (_body, _host_rx) = join(&gw, "c-host", "r1", "host").await;
        let (_body, _viewer_rx) = join(&gw, "c-viewer", "r1", "viewer").await;

        // Host publishes video.
        let body = gw
            .dispatch(
                "c-host",
                SignalRequest::CreateTransport {
                    kind: TransportKind::Producer,
                },
            )
            .await
            .unwrap();
        assert_eq!(body["type"], "producer");
        assert!(body["params"]["iceParameters"]["usernameFragment"].is_string());

        let connected = gw
            .dispatch(
                "c-host",
                SignalRequest::ConnectTransport {
                    kind: TransportKind::Producer,
                    dtls_parameters: DtlsParameters::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(connected, json!(true));

        let body = gw
            .dispatch(
                "c-host",
                SignalRequest::Produce {
                    kind: MediaKind::Video,
                    rtp_parameters: RtpParameters::default(),
                },
            )
            .await
            .unwrap();
        assert!(body["producerId"].is_string());

        // Viewer subscribes.
        gw.dispatch(
            "c-viewer",
            SignalRequest::CreateTransport {
                kind: TransportKind::Consumer,
            },
        )
        .await
        .unwrap();
        let body = gw
            .dispatch(
                "c-viewer",
                SignalRequest::Consume {
                    kind: MediaKind::Video,
                    rtp_capabilities: full_capabilities(),
                },
            )
            .await
            .unwrap();
        assert_eq!(body["producerId"], body["producerId"].as_str().unwrap());
        assert_eq!(body["kind"], "video");
        assert_eq!(body["producerPaused"], false);
    }

    #[tokio::test]
    async fn test_produce_failure_returns_null_producer() {
        let gw = gateway().await;
        let (_body, _rx) = join(&gw, "c1", "r1", "host").await;

        // No producer transport created yet.
        let body = gw
            .dispatch(
                "c1",
                SignalRequest::Produce {
                    kind: MediaKind::Audio,
                    rtp_parameters: RtpParameters::default(),
                },
            )
            .await
            .unwrap();
        assert!(body["producerId"].is_null());
    }

    #[tokio::test]
    async fn test_disconnect_of_host_closes_room() {
        let gw = gateway().await;
        let (_body, _host_rx) = join(&gw, "c-host", "r1", "host").await;
        let (_body, mut viewer_rx) = join(&gw, "c-viewer", "r1", "viewer").await;

        let room_closed = gw.connection_closed("c-host").await;
        assert!(room_closed);

        let event = viewer_rx.recv().await.unwrap();
        assert_eq!(event, RoomEvent::RoomClosed);

        // Disconnect is idempotent.
        assert!(!gw.connection_closed("c-host").await);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let err = RcError::RoomNotFound("r1".to_string());
        let body = Gateway::error_body(&err);
        assert_eq!(body["error"]["code"], 4);
        assert_eq!(body["error"]["message"], "Room not found");
    }

    #[test]
    fn test_request_wire_format() {
        let raw = r#"{"action":"createWebRTCTransport","data":{"type":"consumer"}}"#;
        let request: SignalRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            request,
            SignalRequest::CreateTransport {
                kind: TransportKind::Consumer
            }
        ));

        let raw = r#"{"action":"sendGift","data":{"gift":{"id":7}}}"#;
        let request: SignalRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(request, SignalRequest::SendGift { .. }));

        let raw = r#"{"action":"identity","data":"ping"}"#;
        let request: SignalRequest = serde_json::from_str(raw).unwrap();
        match request {
            SignalRequest::Identity(value) => assert_eq!(value, json!("ping")),
            other => panic!("expected identity, got {other:?}"),
        }
    }
}
