use async_trait::async_trait;
use persister::persistence::NoopObserver;
use persister::{
    Category, EngineConfig, EngineState, MemorySink, Message, PersistObserver, PersisterEngine,
    PersisterError, Sink, SinkError, StopMode,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

fn message(n: u8) -> Message {
    Message::new("TEST.BUS", Category::saturating(n))
}

/// Sink that takes `latency` per write
struct SlowSink {
    latency: Duration,
    written: Arc<Mutex<Vec<Message>>>,
}

impl SlowSink {
    fn new(latency: Duration) -> (Self, Arc<Mutex<Vec<Message>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                latency,
                written: written.clone(),
            },
            written,
        )
    }
}

#[async_trait]
impl Sink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        tokio::time::sleep(self.latency).await;
        self.written.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn graceful_stop_persists_everything_in_order() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start(EngineConfig::default(), sink);

    let sent: Vec<Message> = (0..100).map(|n| message(n % 10)).collect();
    for m in &sent {
        assert_ok!(engine.persist(m.clone()));
    }

    assert_ok!(engine.stop().await);

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(received.messages(), sent);
    let metrics = engine.metrics();
    assert_eq!(metrics.accepted, 100);
    assert_eq!(metrics.persisted, 100);
    assert_eq!(metrics.discarded, 0);
}

#[tokio::test]
async fn graceful_stop_waits_for_slow_sink() {
    let (sink, written) = SlowSink::new(Duration::from_millis(5));
    let engine = PersisterEngine::start(EngineConfig::default(), sink);

    let sent: Vec<Message> = (0..20).map(message).collect();
    for m in &sent {
        assert_ok!(engine.persist(m.clone()));
    }
    assert_ok!(engine.stop().await);

    assert_eq!(*written.lock().unwrap(), sent);
}

#[tokio::test]
async fn persist_after_stop_is_rejected() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start(EngineConfig::default(), sink);
    assert_ok!(engine.stop().await);

    let late = message(3);
    let id = late.id();
    let err = assert_err!(engine.persist(late));
    assert!(matches!(err, PersisterError::RejectedAfterStop(rejected) if rejected == id));
    assert!(received.is_empty());
    assert_eq!(engine.metrics().rejected, 1);
}

#[tokio::test]
async fn persist_after_immediate_stop_is_rejected() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start(EngineConfig::default(), sink);
    assert_ok!(engine.stop_immediately().await);

    let err = assert_err!(engine.persist(message(1)));
    assert!(err.is_rejection());
    assert!(received.is_empty());
    assert!(!engine.is_accepting());
}

#[tokio::test]
async fn immediate_stop_does_not_wait_for_backlog() {
    let (sink, written) = SlowSink::new(Duration::from_millis(20));
    let engine = PersisterEngine::start(EngineConfig::default(), sink);

    const BACKLOG: usize = 50;
    for n in 0..BACKLOG {
        assert_ok!(engine.persist(message(n as u8)));
    }
    // Let the worker pick up its first message.
    tokio::time::sleep(Duration::from_millis(5)).await;

    let started = Instant::now();
    assert_ok!(engine.stop_immediately().await);
    let elapsed = started.elapsed();

    // At most the in-flight write is awaited, not the whole backlog (~1s).
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    let persisted = written.lock().unwrap().len();
    assert!(persisted < BACKLOG);
    assert_eq!(engine.state(), EngineState::Stopped);

    let metrics = engine.metrics();
    assert_eq!(metrics.persisted as usize, persisted);
    assert_eq!(metrics.persisted + metrics.discarded, BACKLOG as u64);
}

#[tokio::test]
async fn immediate_stop_with_abort_cancels_in_flight_write() {
    let (sink, written) = SlowSink::new(Duration::from_secs(30));
    let config = EngineConfig {
        abort_in_flight: true,
        ..EngineConfig::default()
    };
    let engine = PersisterEngine::start(config, sink);
    assert_ok!(engine.persist(message(1)));
    assert_ok!(engine.persist(message(2)));
    tokio::time::sleep(Duration::from_millis(5)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(1), engine.stop_immediately()).await;
    assert_ok!(assert_ok!(stopped));

    assert!(written.lock().unwrap().is_empty());
    assert_eq!(engine.metrics().discarded, 2);
}

#[tokio::test]
async fn repeated_and_mixed_stops_are_idempotent() {
    let engine = PersisterEngine::start(EngineConfig::default(), MemorySink::new());
    assert_ok!(engine.stop().await);
    assert_ok!(engine.stop().await);
    assert_eq!(engine.state(), EngineState::Stopped);

    let engine = PersisterEngine::start(EngineConfig::default(), MemorySink::new());
    assert_ok!(engine.stop_immediately().await);
    assert_ok!(engine.stop_immediately().await);
    assert_eq!(engine.state(), EngineState::Stopped);

    let engine = PersisterEngine::start(EngineConfig::default(), MemorySink::new());
    assert_ok!(engine.stop().await);
    assert_ok!(engine.stop_immediately().await);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.stop_mode(), Some(StopMode::Graceful));
}

#[tokio::test]
async fn immediate_stop_escalates_a_running_drain() {
    let (sink, written) = SlowSink::new(Duration::from_millis(20));
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));
    for n in 0..50 {
        assert_ok!(engine.persist(message(n)));
    }

    let draining = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.state(), EngineState::Draining);

    assert_ok!(engine.stop_immediately().await);
    assert_ok!(assert_ok!(draining.await));

    assert!(written.lock().unwrap().len() < 50);
    assert_eq!(engine.stop_mode(), Some(StopMode::Immediate));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_and_duplicate_nothing() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 250;

    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut ids = Vec::with_capacity(PER_PRODUCER);
                for n in 0..PER_PRODUCER {
                    let m = Message::new(&format!("BUS.{p}"), Category::saturating(n as u8));
                    ids.push(m.id());
                    engine.persist(m).unwrap();
                    if n % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                ids
            })
        })
        .collect();

    let mut sent = HashSet::new();
    for producer in producers {
        sent.extend(producer.await.unwrap());
    }
    assert_ok!(engine.stop().await);

    let messages = received.messages();
    assert_eq!(messages.len(), PRODUCERS * PER_PRODUCER);
    let persisted: HashSet<_> = messages.iter().map(Message::id).collect();
    assert_eq!(persisted.len(), messages.len());
    assert_eq!(persisted, sent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_producer_order_is_preserved() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));

    let producers: Vec<_> = ["LEFT", "RIGHT"]
        .into_iter()
        .map(|bus| {
            let engine = engine.clone();
            tokio::spawn(async move {
                (0..200)
                    .map(|n| {
                        let m = Message::new(bus, Category::saturating(n % 10));
                        let id = m.id();
                        engine.persist(m).unwrap();
                        id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut sent = Vec::new();
    for producer in producers {
        sent.push(producer.await.unwrap());
    }
    assert_ok!(engine.stop().await);

    let messages = received.messages();
    for (bus, ids) in ["LEFT", "RIGHT"].into_iter().zip(sent) {
        let seen: Vec<_> = messages
            .iter()
            .filter(|m| m.name().ends_with(&format!("from bus {bus}")))
            .map(Message::id)
            .collect();
        assert_eq!(seen, ids);
    }
}

#[tokio::test]
async fn three_messages_then_graceful_stop_arrive_in_order() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start(EngineConfig::default(), sink);

    let (a, b, c) = (message(0), message(1), message(2));
    assert_ok!(engine.persist(a.clone()));
    assert_ok!(engine.persist(b.clone()));
    assert_ok!(engine.persist(c.clone()));
    assert_ok!(engine.stop().await);

    assert_eq!(received.messages(), vec![a, b, c]);
}

#[tokio::test(flavor = "current_thread")]
async fn immediate_stop_before_worker_runs_persists_nothing() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start(EngineConfig::default(), sink);

    // No await between these calls, so the worker has not been polled yet.
    assert_ok!(engine.persist(message(0)));
    assert_ok!(engine.persist(message(1)));
    assert_ok!(engine.stop_immediately().await);

    assert!(received.is_empty());
    let metrics = engine.metrics();
    assert_eq!(metrics.accepted, 2);
    assert_eq!(metrics.discarded, 2);
    assert_eq!(metrics.persisted, 0);
}

#[tokio::test]
async fn state_receiver_observes_stop() {
    let engine = PersisterEngine::start(EngineConfig::default(), MemorySink::new());
    let mut state = engine.subscribe_state();
    assert_eq!(*state.borrow(), EngineState::Running);

    assert_ok!(engine.stop().await);
    assert_ok!(state.wait_for(|s| *s == EngineState::Stopped).await);
}

#[derive(Default)]
struct CountingObserver {
    persisted: AtomicUsize,
    rejected: AtomicUsize,
    discarded: AtomicUsize,
}

impl PersistObserver for CountingObserver {
    fn on_persisted(&self, _message: &Message) {
        self.persisted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_rejected(&self, _message: &Message) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_discarded(&self, count: usize) {
        self.discarded.fetch_add(count, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn observer_sees_every_outcome() {
    let observer = Arc::new(CountingObserver::default());
    let engine = PersisterEngine::start_with_observer(
        EngineConfig::default(),
        MemorySink::new(),
        observer.clone(),
    );

    for n in 0..3 {
        assert_ok!(engine.persist(message(n)));
    }
    assert_ok!(engine.stop_immediately().await);
    assert_err!(engine.persist(message(9)));

    assert_eq!(observer.persisted.load(Ordering::SeqCst), 0);
    assert_eq!(observer.discarded.load(Ordering::SeqCst), 3);
    assert_eq!(observer.rejected.load(Ordering::SeqCst), 1);

    let stats = engine.queue_stats();
    assert_eq!(stats.enqueued_total, 3);
    assert_eq!(stats.discarded_total, 3);
    assert!(!stats.accepting);
}

#[tokio::test]
async fn silent_engine_still_persists() {
    let sink = MemorySink::new();
    let received = sink.handle();
    let engine = PersisterEngine::start_with_observer(
        EngineConfig::default(),
        sink,
        Arc::new(NoopObserver),
    );

    assert_ok!(engine.persist(message(4)));
    assert_ok!(engine.stop().await);
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn immediate_stop_reports_stopped_while_write_in_flight() {
    let (sink, written) = SlowSink::new(Duration::from_millis(300));
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));
    for n in 0..3 {
        assert_ok!(engine.persist(message(n)));
    }
    // Let the worker start its first write.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stopping = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.stop_immediately().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!stopping.is_finished());
    let late = assert_err!(engine.persist(message(7)));
    assert!(late.is_rejection());

    assert_ok!(assert_ok!(stopping.await));
    assert_eq!(written.lock().unwrap().len(), 1);
    assert_eq!(engine.metrics().discarded, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persist_seen_after_immediate_request_is_rejected() {
    let (sink, written) = SlowSink::new(Duration::from_millis(10));
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));
    for n in 0..10 {
        assert_ok!(engine.persist(message(n)));
    }

    let mut state = engine.subscribe_state();
    let late_producer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let _ = state.wait_for(|s| *s == EngineState::Stopped).await;
            engine.persist(message(9))
        })
    };

    assert_ok!(engine.stop_immediately().await);
    let late = assert_ok!(late_producer.await);
    assert!(assert_err!(late).is_rejection());

    let metrics = engine.metrics();
    assert_eq!(metrics.accepted, 10);
    assert_eq!(metrics.rejected, 1);
    assert_eq!(
        metrics.persisted + metrics.discarded,
        metrics.accepted,
        "every accepted message is either written or counted as discarded"
    );
    assert_eq!(written.lock().unwrap().len() as u64, metrics.persisted);
}

#[tokio::test]
async fn persist_while_draining_is_rejected() {
    let (sink, written) = SlowSink::new(Duration::from_millis(20));
    let engine = Arc::new(PersisterEngine::start(EngineConfig::default(), sink));
    let sent: Vec<Message> = (0..5).map(message).collect();
    for m in &sent {
        assert_ok!(engine.persist(m.clone()));
    }

    let draining = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.state(), EngineState::Draining);

    let late = message(8);
    let late_id = late.id();
    let err = assert_err!(engine.persist(late));
    assert!(err.is_rejection());

    assert_ok!(assert_ok!(draining.await));
    let written = written.lock().unwrap().clone();
    assert_eq!(written, sent);
    assert!(written.iter().all(|m| m.id() != late_id));
}

#[tokio::test(flavor = "current_thread")]
async fn dropping_running_engine_reports_discards() {
    let observer = Arc::new(CountingObserver::default());
    let engine = PersisterEngine::start_with_observer(
        EngineConfig::default(),
        MemorySink::new(),
        observer.clone(),
    );
    assert_ok!(engine.persist(message(1)));
    assert_ok!(engine.persist(message(2)));

    drop(engine);

    assert_eq!(observer.discarded.load(Ordering::SeqCst), 2);
    assert_eq!(observer.persisted.load(Ordering::SeqCst), 0);
}
