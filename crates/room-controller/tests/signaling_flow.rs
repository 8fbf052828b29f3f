//! End-to-end signaling flows through the gateway.
//!
//! Drives the full stack - gateway, registry, room, connection actors, and
//! the in-process media engine - the way a transport session would: joins
//! with event sinks, then dispatched requests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_controller::actors::{ActorMetrics, RegistryMetrics, RoomRegistryActor, RoomRegistryHandle};
use room_controller::engine::local::LocalEngine;
use room_controller::engine::{AudioObserverSettings, WorkerPool, WorkerSettings};
use room_controller::errors::RcError;
use room_controller::gateway::{Gateway, SignalRequest};
use signal_protocol::{
    DtlsParameters, MediaKind, PeerProfile, RoomEvent, RouterCapabilities, RtpCapabilities,
    RtpCodecCapability, RtpParameters, TransportKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Stack {
    gateway: Gateway,
    registry: RoomRegistryHandle,
}

async fn stack(pool_size: usize) -> Stack {
    let pool = Arc::new(
        WorkerPool::create(&LocalEngine::new(), pool_size, &WorkerSettings::default())
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
    Stack {
        gateway: Gateway::new(registry.clone()),
        registry,
    }
}

fn profile(name: &str) -> PeerProfile {
    PeerProfile {
        username: name.to_string(),
        first_name: name.to_string(),
        ..PeerProfile::default()
    }
}

fn full_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
    }
}

async fn join(
    stack: &Stack,
    conn: &str,
    room: &str,
    peer: &str,
) -> (serde_json::Value, mpsc::UnboundedReceiver<RoomEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let body = stack
        .gateway
        .join_room(conn, room.to_string(), peer.to_string(), profile(peer), tx)
        .await
        .unwrap();
    (body, rx)
}

/// Create + connect a transport for a joined connection.
async fn setup_transport(stack: &Stack, conn: &str, kind: TransportKind) {
    stack
        .gateway
        .dispatch(conn, SignalRequest::CreateTransport { kind })
        .await
        .unwrap();
    stack
        .gateway
        .dispatch(
            conn,
            SignalRequest::ConnectTransport {
                kind,
                dtls_parameters: DtlsParameters::default(),
            },
        )
        .await
        .unwrap();
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<RoomEvent>) -> RoomEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

#[tokio::test]
async fn host_publishes_and_viewer_consumes_both_kinds() {
    let s = stack(2).await;
    let (body, mut host_rx) = join(&s, "c-host", "live", "host").await;
    assert_eq!(body["isHost"], true);

    setup_transport(&s, "c-host", TransportKind::Producer).await;
    for kind in [MediaKind::Audio, MediaKind::Video] {
        let body = s
            .gateway
            .dispatch(
                "c-host",
                SignalRequest::Produce {
                    kind,
                    rtp_parameters: RtpParameters::default(),
                },
            )
            .await
            .unwrap();
        assert!(body["producerId"].is_string(), "{kind} publish failed");
    }

    // Publishing audio makes the host the active speaker.
    let event = next_event(&mut host_rx).await;
    match event {
        RoomEvent::ActiveSpeaker { peer_id, .. } => {
            assert_eq!(peer_id.as_deref(), Some("host"));
        }
        other => panic!("expected activeSpeaker, got {other:?}"),
    }

    let (body, _viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;
    assert_eq!(body["isHost"], false);
    setup_transport(&s, "c-viewer", TransportKind::Consumer).await;

    for kind in [MediaKind::Audio, MediaKind::Video] {
        let body = s
            .gateway
            .dispatch(
                "c-viewer",
                SignalRequest::Consume {
                    kind,
                    rtp_capabilities: full_capabilities(),
                },
            )
            .await
            .unwrap();
        assert_eq!(body["kind"], kind.as_str());
        assert_eq!(body["type"], "simple");
        assert_eq!(body["producerPaused"], false);
        assert!(body["rtpParameters"]["codecs"].is_array());
    }

    // The host hears about the viewer (one userJoined per consume).
    let event = next_event(&mut host_rx).await;
    match event {
        RoomEvent::UserJoined { user } => assert_eq!(user.username, "viewer"),
        other => panic!("expected userJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn audio_only_viewer_cannot_consume_video() {
    let s = stack(1).await;
    let (_body, _host_rx) = join(&s, "c-host", "live", "host").await;
    setup_transport(&s, "c-host", TransportKind::Producer).await;
    s.gateway
        .dispatch(
            "c-host",
            SignalRequest::Produce {
                kind: MediaKind::Video,
                rtp_parameters: RtpParameters::default(),
            },
        )
        .await
        .unwrap();

    let (_body, _viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;
    setup_transport(&s, "c-viewer", TransportKind::Consumer).await;

    let audio_only = RtpCapabilities {
        codecs: vec![RtpCodecCapability::opus()],
    };
    let result = s
        .gateway
        .dispatch(
            "c-viewer",
            SignalRequest::Consume {
                kind: MediaKind::Video,
                rtp_capabilities: audio_only,
            },
        )
        .await;
    match result {
        Err(RcError::CapabilityMismatch(_)) => {}
        other => panic!("expected capability mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_joins_share_one_room() {
    let s = stack(2).await;

    let joins = (0..6).map(|i| {
        let gateway = &s.gateway;
        async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = format!("c-{i}");
            let peer = format!("peer-{i}");
            let body = gateway
                .join_room(&conn, "burst".to_string(), peer.clone(), profile(&peer), tx)
                .await
                .unwrap();
            (body, rx)
        }
    });
    let results = futures::future::join_all(joins).await;

    // Exactly one of the concurrent joiners was elected host.
    let hosts = results
        .iter()
        .filter(|(body, _)| body["isHost"] == true)
        .count();
    assert_eq!(hosts, 1);

    let status = s.registry.status().await.unwrap();
    assert_eq!(status.rooms, 1);
    assert_eq!(status.peers, 6);
}

#[tokio::test]
async fn host_departure_tears_room_down_and_frees_capacity() {
    let s = stack(1).await;
    let (_body, _host_rx) = join(&s, "c-host", "live", "host").await;
    let (_body, mut viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;

    let status = s.registry.status().await.unwrap();
    assert_eq!(status.peers, 2);
    let worker = status.workers.first().unwrap();
    assert_eq!(worker.clients_count, 2);
    assert_eq!(worker.rooms_count, 1);

    let room_closed = s.gateway.connection_closed("c-host").await;
    assert!(room_closed);

    let event = next_event(&mut viewer_rx).await;
    assert_eq!(event, RoomEvent::RoomClosed);

    // Give the fire-and-forget close notification time to land, then the
    // worker counters must be back to zero and the name reusable.
    let mut freed = false;
    for _ in 0..50 {
        let status = s.registry.status().await.unwrap();
        if status.rooms == 0
            && status.peers == 0
            && status
                .workers
                .iter()
                .all(|w| w.clients_count == 0 && w.rooms_count == 0)
        {
            freed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(freed, "room teardown did not release capacity");

    let (body, _rx) = join(&s, "c-host-2", "live", "host2").await;
    assert_eq!(body["isHost"], true);
}

#[tokio::test]
async fn viewer_departure_keeps_room_alive() {
    let s = stack(1).await;
    let (_body, mut host_rx) = join(&s, "c-host", "live", "host").await;
    let (_body, _viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;

    let room_closed = s.gateway.connection_closed("c-viewer").await;
    assert!(!room_closed);

    let event = next_event(&mut host_rx).await;
    match event {
        RoomEvent::ClientDisconnected { id } => assert_eq!(id, "viewer"),
        other => panic!("expected mediaClientDisconnect, got {other:?}"),
    }

    let status = s.registry.status().await.unwrap();
    assert_eq!(status.rooms, 1);
    assert_eq!(status.peers, 1);
}

#[tokio::test]
async fn unpublish_closes_room_for_everyone() {
    let s = stack(1).await;
    let (_body, mut host_rx) = join(&s, "c-host", "live", "host").await;
    let (_body, mut viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;

    s.gateway
        .dispatch("c-host", SignalRequest::UnpublishRoom)
        .await
        .unwrap();

    assert_eq!(next_event(&mut host_rx).await, RoomEvent::RoomClosed);
    assert_eq!(next_event(&mut viewer_rx).await, RoomEvent::RoomClosed);
}

#[tokio::test]
async fn rooms_land_on_least_loaded_workers() {
    let s = stack(2).await;

    // First room with two peers loads worker 0.
    let (_b, _r1) = join(&s, "c1", "room-a", "host-a").await;
    let (_b, _r2) = join(&s, "c2", "room-a", "viewer-a").await;

    // Next room must land on the idle worker 1.
    let (_b, _r3) = join(&s, "c3", "room-b", "host-b").await;

    let status = s.registry.status().await.unwrap();
    let loads: Vec<(u32, u32)> = status
        .workers
        .iter()
        .map(|w| (w.rooms_count, w.clients_count))
        .collect();
    assert_eq!(loads, vec![(1, 2), (1, 1)]);
}

#[tokio::test]
async fn chat_gift_and_video_chat_flow() {
    let s = stack(1).await;
    let (_body, mut host_rx) = join(&s, "c-host", "live", "host").await;
    let (_body, mut viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;

    s.gateway
        .dispatch(
            "c-viewer",
            SignalRequest::SendMessage {
                content: "hi there".to_string(),
            },
        )
        .await
        .unwrap();
    let event = next_event(&mut host_rx).await;
    match event {
        RoomEvent::NewMessage { message, room } => {
            assert_eq!(message.content, "hi there");
            assert_eq!(room, "live");
        }
        other => panic!("expected newMessage, got {other:?}"),
    }

    s.gateway
        .dispatch(
            "c-viewer",
            SignalRequest::SendGift {
                gift: serde_json::json!({"kind": "rose", "count": 3}),
            },
        )
        .await
        .unwrap();
    let event = next_event(&mut host_rx).await;
    match event {
        RoomEvent::GiftSent { peer_id, gift } => {
            assert_eq!(peer_id, "viewer");
            assert_eq!(gift["kind"], "rose");
        }
        other => panic!("expected giftSent, got {other:?}"),
    }

    s.gateway
        .dispatch("c-viewer", SignalRequest::RequestVideoChat)
        .await
        .unwrap();
    assert_eq!(next_event(&mut host_rx).await.name(), "videoChatRequested");

    s.gateway
        .dispatch(
            "c-host",
            SignalRequest::AcceptVideoChat {
                peer_id: "viewer".to_string(),
            },
        )
        .await
        .unwrap();
    let event = next_event(&mut viewer_rx).await;
    match event {
        RoomEvent::VideoChatAccepted { peer_id } => assert_eq!(peer_id, "host"),
        other => panic!("expected videoChatAccepted, got {other:?}"),
    }
}

#[tokio::test]
async fn producer_replacement_notifies_consumers() {
    let s = stack(1).await;
    let (_body, _host_rx) = join(&s, "c-host", "live", "host").await;
    setup_transport(&s, "c-host", TransportKind::Producer).await;
    s.gateway
        .dispatch(
            "c-host",
            SignalRequest::Produce {
                kind: MediaKind::Video,
                rtp_parameters: RtpParameters::default(),
            },
        )
        .await
        .unwrap();

    let (_body, mut viewer_rx) = join(&s, "c-viewer", "live", "viewer").await;
    setup_transport(&s, "c-viewer", TransportKind::Consumer).await;
    s.gateway
        .dispatch(
            "c-viewer",
            SignalRequest::Consume {
                kind: MediaKind::Video,
                rtp_capabilities: full_capabilities(),
            },
        )
        .await
        .unwrap();

    // Host re-publishes video: the superseded producer closes, and the
    // viewer is told so it can re-subscribe.
    s.gateway
        .dispatch(
            "c-host",
            SignalRequest::Produce {
                kind: MediaKind::Video,
                rtp_parameters: RtpParameters::default(),
            },
        )
        .await
        .unwrap();

    let event = next_event(&mut viewer_rx).await;
    match event {
        RoomEvent::ProducerClosed { peer_id, kind } => {
            assert_eq!(peer_id, "host");
            assert_eq!(kind, MediaKind::Video);
        }
        other => panic!("expected mediaProducerClose, got {other:?}"),
    }
}
