//! In-process media engine adapter.
//!
//! Implements the engine port traits entirely in memory: no sockets, no
//! RTP. Object lifecycles, capability checks, and event propagation follow
//! the real engine's rules, which is what the orchestration layer cares
//! about. Used by the default binary wiring and by tests.

use super::{
    AudioLevelObserver, AudioObserverEvent, AudioObserverSettings, ConsumerEvent, MediaConsumer,
    MediaEngine, MediaProducer, MediaRouter, MediaTransport, MediaWorker, WorkerSettings,
};
use crate::errors::RcError;

use async_trait::async_trait;
use signal_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, MediaKind,
    RouterCapabilities, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportKind,
    TransportOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Volume reported when a tracked producer starts speaking.
const REPORTED_VOLUME: i8 = -50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process [`MediaEngine`].
#[derive(Debug, Default)]
pub struct LocalEngine {
    next_pid: AtomicU32,
}

impl LocalEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, RcError> {
        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(LocalWorker {
            pid,
            settings: settings.clone(),
        }))
    }
}

struct LocalWorker {
    pid: u32,
    settings: WorkerSettings,
}

#[async_trait]
impl MediaWorker for LocalWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn create_router(
        &self,
        codecs: RouterCapabilities,
    ) -> Result<Arc<dyn MediaRouter>, RcError> {
        Ok(Arc::new(LocalRouter {
            id: Uuid::new_v4().to_string(),
            codecs,
            settings: self.settings.clone(),
            next_port_offset: AtomicU16::new(0),
            shared: Arc::new(RouterShared::default()),
        }))
    }
}

struct ProducerEntry {
    kind: MediaKind,
    paused: bool,
    closed: bool,
    subscribers: Vec<mpsc::UnboundedSender<ConsumerEvent>>,
}

/// Producer registry shared by a router, its transports, and their
/// producers/consumers. All access is short lock-then-release; nothing
/// awaits while holding the lock.
#[derive(Default)]
struct RouterShared {
    closed: AtomicBool,
    producers: Mutex<HashMap<String, ProducerEntry>>,
}

impl RouterShared {
    fn close_producer(&self, producer_id: &str) {
        let mut producers = lock(&self.producers);
        if let Some(entry) = producers.get_mut(producer_id) {
            if !entry.closed {
                entry.closed = true;
                for subscriber in &entry.subscribers {
                    let _ = subscriber.send(ConsumerEvent::ProducerClosed);
                }
            }
        }
    }

    fn set_producer_paused(&self, producer_id: &str, paused: bool) {
        let mut producers = lock(&self.producers);
        if let Some(entry) = producers.get_mut(producer_id) {
            if entry.closed || entry.paused == paused {
                return;
            }
            entry.paused = paused;
            let event = if paused {
                ConsumerEvent::ProducerPaused
            } else {
                ConsumerEvent::ProducerResumed
            };
            for subscriber in &entry.subscribers {
                let _ = subscriber.send(event);
            }
        }
    }
}

struct LocalRouter {
    id: String,
    codecs: RouterCapabilities,
    settings: WorkerSettings,
    next_port_offset: AtomicU16,
    shared: Arc<RouterShared>,
}

#[async_trait]
impl MediaRouter for LocalRouter {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> RouterCapabilities {
        self.codecs.clone()
    }

    fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let producer_ids: Vec<String> = lock(&self.shared.producers).keys().cloned().collect();
        for producer_id in producer_ids {
            self.shared.close_producer(&producer_id);
        }
    }

    async fn create_transport(
        &self,
        kind: TransportKind,
        _peer_id: &str,
    ) -> Result<Arc<dyn MediaTransport>, RcError> {
        if self.closed() {
            return Err(RcError::Engine("router is closed".to_string()));
        }
        let offset = self.next_port_offset.fetch_add(1, Ordering::Relaxed);
        let port = self.settings.rtc_port_base.saturating_add(offset);
        let options = TransportOptions {
            id: Uuid::new_v4().to_string(),
            ice_parameters: IceParameters {
                username_fragment: Uuid::new_v4().simple().to_string(),
                password: Uuid::new_v4().simple().to_string(),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1_076_302_079,
                ip: self.settings.announced_ip.clone(),
                protocol: "udp".to_string(),
                port,
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: Uuid::new_v4().simple().to_string().to_uppercase(),
                }],
            },
        };
        Ok(Arc::new(LocalTransport {
            kind,
            options,
            closed: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
            produced: Mutex::new(Vec::new()),
            consumer_txs: Mutex::new(Vec::new()),
        }))
    }

    fn can_consume(&self, producer_id: &str, capabilities: &RtpCapabilities) -> bool {
        let producers = lock(&self.shared.producers);
        producers
            .get(producer_id)
            .is_some_and(|entry| !entry.closed && capabilities.supports(entry.kind))
    }

    async fn create_audio_observer(
        &self,
        settings: AudioObserverSettings,
    ) -> Result<Arc<dyn AudioLevelObserver>, RcError> {
        if self.closed() {
            return Err(RcError::Engine("router is closed".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Arc::new(LocalObserver {
            _settings: settings,
            closed: AtomicBool::new(false),
            tracked: Mutex::new(HashMap::new()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }))
    }
}

struct LocalTransport {
    kind: TransportKind,
    options: TransportOptions,
    closed: AtomicBool,
    connected: AtomicBool,
    shared: Arc<RouterShared>,
    /// Producer ids created on this transport; closed with it.
    produced: Mutex<Vec<String>>,
    /// Event senders of consumers riding on this transport.
    consumer_txs: Mutex<Vec<mpsc::UnboundedSender<ConsumerEvent>>>,
}

#[async_trait]
impl MediaTransport for LocalTransport {
    fn id(&self) -> String {
        self.options.id.clone()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn options(&self) -> TransportOptions {
        self.options.clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let produced: Vec<String> = lock(&self.produced).drain(..).collect();
        for producer_id in produced {
            self.shared.close_producer(&producer_id);
        }
        for tx in lock(&self.consumer_txs).drain(..) {
            let _ = tx.send(ConsumerEvent::TransportClosed);
        }
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> Result<(), RcError> {
        if self.closed() {
            return Err(RcError::Engine("transport is closed".to_string()));
        }
        // Repeat connects are accepted; the handshake result does not change.
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: RtpParameters,
        _peer_id: &str,
    ) -> Result<Arc<dyn MediaProducer>, RcError> {
        if self.kind != TransportKind::Producer {
            return Err(RcError::Engine(
                "produce requires a producer transport".to_string(),
            ));
        }
        if self.closed() {
            return Err(RcError::Engine("transport is closed".to_string()));
        }
        let id = Uuid::new_v4().to_string();
        lock(&self.shared.producers).insert(
            id.clone(),
            ProducerEntry {
                kind,
                paused: false,
                closed: false,
                subscribers: Vec::new(),
            },
        );
        lock(&self.produced).push(id.clone());
        Ok(Arc::new(LocalProducer {
            id,
            kind,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        capabilities: RtpCapabilities,
        paused: bool,
        _peer_id: &str,
    ) -> Result<Arc<dyn MediaConsumer>, RcError> {
        if self.kind != TransportKind::Consumer {
            return Err(RcError::Engine(
                "consume requires a consumer transport".to_string(),
            ));
        }
        if self.closed() {
            return Err(RcError::Engine("transport is closed".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (kind, producer_paused) = {
            let mut producers = lock(&self.shared.producers);
            let entry = producers.get_mut(producer_id).ok_or_else(|| {
                RcError::Engine(format!("producer {producer_id} does not exist"))
            })?;
            if entry.closed {
                return Err(RcError::Engine(format!(
                    "producer {producer_id} is closed"
                )));
            }
            if !capabilities.supports(entry.kind) {
                return Err(RcError::Engine(
                    "capabilities cannot consume this producer".to_string(),
                ));
            }
            entry.subscribers.push(tx.clone());
            (entry.kind, entry.paused)
        };
        lock(&self.consumer_txs).push(tx);
        let codec = match kind {
            MediaKind::Audio => RtpCodecCapability::opus(),
            MediaKind::Video => RtpCodecCapability::vp8(),
        };
        Ok(Arc::new(LocalConsumer {
            id: Uuid::new_v4().to_string(),
            kind,
            producer_id: producer_id.to_string(),
            rtp_parameters: RtpParameters {
                codecs: vec![codec],
                mid: None,
                rtcp: serde_json::Map::new(),
            },
            paused: AtomicBool::new(paused),
            producer_paused_at_creation: producer_paused,
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
            events_rx: Mutex::new(Some(rx)),
        }))
    }
}

struct LocalProducer {
    id: String,
    kind: MediaKind,
    shared: Arc<RouterShared>,
}

#[async_trait]
impl MediaProducer for LocalProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn paused(&self) -> bool {
        lock(&self.shared.producers)
            .get(&self.id)
            .is_some_and(|entry| entry.paused)
    }

    fn closed(&self) -> bool {
        lock(&self.shared.producers)
            .get(&self.id)
            .is_none_or(|entry| entry.closed)
    }

    async fn pause(&self) {
        self.shared.set_producer_paused(&self.id, true);
    }

    async fn resume(&self) {
        self.shared.set_producer_paused(&self.id, false);
    }

    fn close(&self) {
        self.shared.close_producer(&self.id);
    }
}

struct LocalConsumer {
    id: String,
    kind: MediaKind,
    producer_id: String,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    producer_paused_at_creation: bool,
    closed: AtomicBool,
    shared: Arc<RouterShared>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ConsumerEvent>>>,
}

#[async_trait]
impl MediaConsumer for LocalConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> String {
        "simple".to_string()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn producer_paused(&self) -> bool {
        lock(&self.shared.producers)
            .get(&self.producer_id)
            .map_or(self.producer_paused_at_creation, |entry| entry.paused)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<(), RcError> {
        if self.closed() {
            return Err(RcError::Engine("consumer is closed".to_string()));
        }
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), RcError> {
        if self.closed() {
            return Err(RcError::Engine("consumer is closed".to_string()));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConsumerEvent>> {
        lock(&self.events_rx).take()
    }
}

/// Audio observer that reports deterministically: a tracked producer is
/// immediately the loudest speaker, and removing the last tracked producer
/// reports silence. Enough to drive the active-speaker fan-out end to end.
struct LocalObserver {
    _settings: AudioObserverSettings,
    closed: AtomicBool,
    tracked: Mutex<HashMap<String, String>>,
    events_tx: mpsc::UnboundedSender<AudioObserverEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<AudioObserverEvent>>>,
}

#[async_trait]
impl AudioLevelObserver for LocalObserver {
    async fn add_producer(&self, producer_id: &str, peer_id: &str) -> Result<(), RcError> {
        if self.closed() {
            return Err(RcError::Engine("audio observer is closed".to_string()));
        }
        lock(&self.tracked).insert(producer_id.to_string(), peer_id.to_string());
        let _ = self.events_tx.send(AudioObserverEvent::Volumes {
            peer_id: peer_id.to_string(),
            volume: REPORTED_VOLUME,
        });
        Ok(())
    }

    async fn remove_producer(&self, producer_id: &str) {
        let mut tracked = lock(&self.tracked);
        if tracked.remove(producer_id).is_some() && tracked.is_empty() {
            let _ = self.events_tx.send(AudioObserverEvent::Silence);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<AudioObserverEvent>> {
        lock(&self.events_rx).take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn router() -> Arc<dyn MediaRouter> {
        let engine = LocalEngine::new();
        let worker = engine
            .create_worker(&WorkerSettings::default())
            .await
            .unwrap();
        worker
            .create_router(RouterCapabilities::default_set())
            .await
            .unwrap()
    }

    fn full_capabilities() -> RtpCapabilities {
        RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
        }
    }

    #[tokio::test]
    async fn produce_on_consumer_transport_is_rejected() {
        let router = router().await;
        let transport = router
            .create_transport(TransportKind::Consumer, "peer-1")
            .await
            .unwrap();
        let result = transport
            .produce(MediaKind::Audio, RtpParameters::default(), "peer-1")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn can_consume_honors_kind_and_liveness() {
        let router = router().await;
        let transport = router
            .create_transport(TransportKind::Producer, "host")
            .await
            .unwrap();
        let producer = transport
            .produce(MediaKind::Video, RtpParameters::default(), "host")
            .await
            .unwrap();

        assert!(router.can_consume(&producer.id(), &full_capabilities()));
        // Audio-only capabilities cannot consume a video producer.
        let audio_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus()],
        };
        assert!(!router.can_consume(&producer.id(), &audio_only));

        producer.close();
        assert!(!router.can_consume(&producer.id(), &full_capabilities()));
    }

    #[tokio::test]
    async fn producer_close_reaches_consumers() {
        let router = router().await;
        let uplink = router
            .create_transport(TransportKind::Producer, "host")
            .await
            .unwrap();
        let downlink = router
            .create_transport(TransportKind::Consumer, "viewer")
            .await
            .unwrap();
        let producer = uplink
            .produce(MediaKind::Audio, RtpParameters::default(), "host")
            .await
            .unwrap();
        let consumer = downlink
            .consume(&producer.id(), full_capabilities(), false, "viewer")
            .await
            .unwrap();
        let mut events = consumer.take_events().unwrap();
        assert!(consumer.take_events().is_none());

        producer.pause().await;
        producer.resume().await;
        producer.close();

        assert_eq!(events.recv().await, Some(ConsumerEvent::ProducerPaused));
        assert_eq!(events.recv().await, Some(ConsumerEvent::ProducerResumed));
        assert_eq!(events.recv().await, Some(ConsumerEvent::ProducerClosed));
    }

    #[tokio::test]
    async fn transport_close_closes_its_producers() {
        let router = router().await;
        let uplink = router
            .create_transport(TransportKind::Producer, "host")
            .await
            .unwrap();
        let producer = uplink
            .produce(MediaKind::Video, RtpParameters::default(), "host")
            .await
            .unwrap();
        assert!(!producer.closed());
        uplink.close();
        assert!(producer.closed());
        assert!(!router.can_consume(&producer.id(), &full_capabilities()));
    }

    #[tokio::test]
    async fn closed_router_rejects_new_transports() {
        let router = router().await;
        router.close();
        assert!(router.closed());
        let result = router.create_transport(TransportKind::Producer, "host").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn observer_reports_speaker_then_silence() {
        let router = router().await;
        let observer = router
            .create_audio_observer(AudioObserverSettings::default())
            .await
            .unwrap();
        let mut events = observer.take_events().unwrap();

        observer.add_producer("prod-1", "peer-1").await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(AudioObserverEvent::Volumes {
                peer_id: "peer-1".to_string(),
                volume: REPORTED_VOLUME,
            })
        );

        observer.remove_producer("prod-1").await;
        assert_eq!(events.recv().await, Some(AudioObserverEvent::Silence));
    }

    #[tokio::test]
    async fn repeat_connect_is_accepted() {
        let router = router().await;
        let transport = router
            .create_transport(TransportKind::Producer, "host")
            .await
            .unwrap();
        transport.connect(DtlsParameters::default()).await.unwrap();
        transport.connect(DtlsParameters::default()).await.unwrap();
    }
}
