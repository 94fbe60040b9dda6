//! Tests for the event batcher

use super::*;
use crate::event::{Metadata, UsageRecord};
use async_trait::async_trait;
use std::sync::atomic::AtomicU32;
use std::time::Instant;

/// Records delivered batches; fails the first `failures` attempts with `error`
#[derive(Default)]
struct ScriptedTransport {
    batches: Mutex<Vec<Batch>>,
    attempts: AtomicU32,
    failures: u32,
    error: Option<SendError>,
    delay: Duration,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(failures: u32, error: SendError) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error: Some(error),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    fn sent_batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    fn sent_tokens(&self) -> Vec<u64> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.input_tokens))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, batch: &Batch) -> std::result::Result<(), SendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt < self.failures {
            if let Some(ref error) = self.error {
                return Err(error.clone());
            }
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

fn event(i: u64) -> PricedEvent {
    PricedEvent::from_record(
        UsageRecord::new("gpt-4", i, 1),
        "default".to_string(),
        Metadata::new(),
        0.0,
    )
}

fn config(batch_size: usize, flush_interval: Duration) -> BatcherConfig {
    BatcherConfig {
        batch_size,
        flush_interval,
        max_queue_size: 1_000,
        retry: RetryConfig::new()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(200)),
        send_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        verbose: false,
    }
}

fn remote(
    config: BatcherConfig,
    transport: Arc<ScriptedTransport>,
) -> (EventBatcher, Arc<StatsRegistry>) {
    let stats = Arc::new(StatsRegistry::new());
    let batcher = EventBatcher::start(config, Sink::Remote(transport), stats.clone()).unwrap();
    (batcher, stats)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_rejects_zero_batch_size() {
    let err = EventBatcher::start(
        config(0, Duration::from_secs(1)),
        Sink::Local(Arc::new(LocalEventLog::new(10))),
        Arc::new(StatsRegistry::new()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_start_requires_runtime() {
    let result = EventBatcher::start(
        config(1, Duration::from_secs(1)),
        Sink::Local(Arc::new(LocalEventLog::new(10))),
        Arc::new(StatsRegistry::new()),
    );
    assert!(matches!(result, Err(Error::Internal(_))));
}

#[tokio::test]
async fn test_size_trigger_sends_one_batch() {
    let transport = ScriptedTransport::ok();
    let (batcher, stats) = remote(config(2, Duration::from_secs(60)), transport.clone());

    batcher.enqueue(event(1)).unwrap();
    batcher.enqueue(event(2)).unwrap();

    wait_until(|| transport.sent_batches().len() == 1).await;
    assert_eq!(transport.sent_tokens(), vec![1, 2]);

    batcher.enqueue(event(3)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent_batches().len(), 1);
    assert_eq!(stats.snapshot().batches_sent, 1);
}

#[tokio::test]
async fn test_time_trigger_flushes_partial_batch() {
    let transport = ScriptedTransport::ok();
    let (batcher, _stats) = remote(config(100, Duration::from_millis(100)), transport.clone());

    batcher.enqueue(event(7)).unwrap();
    assert!(transport.sent_batches().is_empty());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(transport.sent_tokens(), vec![7]);
}

#[tokio::test]
async fn test_explicit_flush() {
    let transport = ScriptedTransport::ok();
    let (batcher, stats) = remote(config(100, Duration::from_secs(60)), transport.clone());

    for i in 0..5 {
        batcher.enqueue(event(i)).unwrap();
    }
    batcher.flush().await;

    assert_eq!(transport.sent_tokens(), vec![0, 1, 2, 3, 4]);
    let snap = stats.snapshot();
    assert_eq!(snap.events_enqueued, 5);
    assert_eq!(snap.events_sent, 5);
    assert_eq!(batcher.state(), BatcherState::Idle);
}

#[tokio::test]
async fn test_flush_on_empty_is_noop() {
    let transport = ScriptedTransport::ok();
    let (batcher, _stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    batcher.flush().await;
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batches_delivered_in_order() {
    let transport = ScriptedTransport::slow(Duration::from_millis(10));
    let (batcher, _stats) = remote(config(3, Duration::from_secs(60)), transport.clone());

    for i in 0..10 {
        batcher.enqueue(event(i)).unwrap();
    }
    batcher.flush().await;

    assert_eq!(transport.sent_tokens(), (0..10).collect::<Vec<_>>());
    let sizes: Vec<usize> = transport.sent_batches().iter().map(Batch::len).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
}

#[tokio::test]
async fn test_backpressure() {
    let transport = ScriptedTransport::ok();
    let mut cfg = config(5, Duration::from_secs(60));
    cfg.max_queue_size = 5;
    let (batcher, stats) = remote(cfg, transport);

    // current-thread runtime: the dispatch loop cannot run between these calls
    for i in 0..5 {
        batcher.enqueue(event(i)).unwrap();
    }
    let err = batcher.enqueue(event(5)).unwrap_err();

    assert!(matches!(err, Error::Backpressure { capacity: 5 }));
    let snap = stats.snapshot();
    assert_eq!(snap.events_enqueued, 5);
    assert_eq!(snap.events_rejected, 1);
}

#[tokio::test]
async fn test_state_transitions() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::gated(gate.clone());
    let (batcher, _stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    assert_eq!(batcher.state(), BatcherState::Idle);
    batcher.enqueue(event(1)).unwrap();
    assert_eq!(batcher.state(), BatcherState::Accumulating);

    let batcher = Arc::new(batcher);
    let flushing = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.flush().await })
    };
    wait_until(|| transport.attempts.load(Ordering::SeqCst) == 1).await;
    assert_eq!(batcher.state(), BatcherState::Flushing);
    assert_eq!(batcher.pending(), 1);

    gate.notify_one();
    flushing.await.unwrap();
    assert_eq!(batcher.state(), BatcherState::Idle);
    assert_eq!(batcher.pending(), 0);
}

#[tokio::test]
async fn test_retry_then_success() {
    let transport = ScriptedTransport::failing(2, SendError::Transient("503".into()));
    let (batcher, stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    batcher.enqueue(event(1)).unwrap();
    let start = Instant::now();
    batcher.flush().await;

    // 10ms + 20ms of backoff at minimum
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    let snap = stats.snapshot();
    assert_eq!(snap.retries, 2);
    assert_eq!(snap.events_sent, 1);
    assert_eq!(snap.events_dropped, 0);
}

#[tokio::test]
async fn test_retries_exhausted_drops_batch() {
    let transport = ScriptedTransport::failing(u32::MAX, SendError::Transient("down".into()));
    let (batcher, stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    for i in 0..4 {
        batcher.enqueue(event(i)).unwrap();
    }
    batcher.flush().await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    let snap = stats.snapshot();
    assert_eq!(snap.events_dropped, 4);
    assert_eq!(snap.batches_failed, 1);
    assert_eq!(snap.events_sent, 0);
    assert_eq!(snap.events_enqueued, snap.events_sent + snap.events_dropped);
}

#[tokio::test]
async fn test_permanent_failure_not_retried_and_does_not_block() {
    let transport = ScriptedTransport::failing(
        1,
        SendError::Permanent {
            status: 400,
            body: "bad batch".into(),
        },
    );
    let (batcher, stats) = remote(config(2, Duration::from_secs(60)), transport.clone());

    for i in 0..4 {
        batcher.enqueue(event(i)).unwrap();
    }
    batcher.flush().await;

    // first batch dropped after one attempt, second delivered
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(transport.sent_tokens(), vec![2, 3]);
    let snap = stats.snapshot();
    assert_eq!(snap.retries, 0);
    assert_eq!(snap.events_dropped, 2);
    assert_eq!(snap.events_sent, 2);
}

#[tokio::test]
async fn test_rate_limit_hint_used_as_delay() {
    let transport = ScriptedTransport::failing(
        1,
        SendError::RateLimited {
            retry_after: Some(Duration::from_millis(150)),
        },
    );
    let (batcher, stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    batcher.enqueue(event(1)).unwrap();
    let start = Instant::now();
    batcher.flush().await;

    assert!(start.elapsed() >= Duration::from_millis(150));
    assert_eq!(stats.snapshot().events_sent, 1);
}

#[tokio::test]
async fn test_send_attempt_timeout_counts_as_transient() {
    let transport = ScriptedTransport::slow(Duration::from_secs(10));
    let mut cfg = config(10, Duration::from_secs(60));
    cfg.send_timeout = Duration::from_millis(20);
    cfg.retry = cfg.retry.with_max_retries(1);
    let (batcher, stats) = remote(cfg, transport.clone());

    batcher.enqueue(event(1)).unwrap();
    batcher.flush().await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.snapshot().events_dropped, 1);
}

#[tokio::test]
async fn test_shutdown_flushes_and_rejects() {
    let transport = ScriptedTransport::ok();
    let (batcher, stats) = remote(config(10, Duration::from_secs(60)), transport.clone());

    for i in 0..3 {
        batcher.enqueue(event(i)).unwrap();
    }
    batcher.shutdown().await;

    assert_eq!(transport.sent_tokens(), vec![0, 1, 2]);
    assert!(batcher.is_closed());
    assert!(matches!(batcher.enqueue(event(9)), Err(Error::ShutDown)));

    // idempotent
    batcher.shutdown().await;
    let snap = stats.snapshot();
    assert_eq!(snap.events_sent, 3);
    assert_eq!(snap.events_rejected, 1);
}

#[tokio::test]
async fn test_shutdown_timeout_counts_abandoned_events() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::gated(gate);
    let mut cfg = config(2, Duration::from_secs(60));
    cfg.shutdown_timeout = Duration::from_millis(100);
    let (batcher, stats) = remote(cfg, transport);

    for i in 0..5 {
        batcher.enqueue(event(i)).unwrap();
    }

    let start = Instant::now();
    batcher.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(2));

    let snap = stats.snapshot();
    assert_eq!(snap.events_enqueued, 5);
    assert_eq!(snap.events_sent, 0);
    assert_eq!(snap.events_dropped, 5);
    assert_eq!(batcher.pending(), 0);
}

#[tokio::test]
async fn test_shutdown_timeout_settles_concurrent_flush_once() {
    let transport = ScriptedTransport::slow(Duration::from_millis(300));
    let mut cfg = config(10, Duration::from_secs(60));
    cfg.shutdown_timeout = Duration::from_millis(50);
    let (batcher, stats) = remote(cfg, transport.clone());
    let batcher = Arc::new(batcher);

    batcher.enqueue(event(1)).unwrap();

    let flusher = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.flush().await })
    };
    wait_until(|| transport.attempts.load(Ordering::SeqCst) >= 1).await;

    batcher.shutdown().await;
    flusher.await.unwrap();

    let snap = stats.snapshot();
    assert_eq!(snap.events_enqueued, 1);
    assert_eq!(snap.events_dropped, 1);
    assert_eq!(snap.events_sent, 0);
    assert_eq!(snap.events_enqueued, snap.events_sent + snap.events_dropped);
    assert_eq!(snap.batches_failed, 1);
    assert_eq!(batcher.pending(), 0);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_sink_keeps_events_verbatim() {
    let log = Arc::new(LocalEventLog::new(100));
    let stats = Arc::new(StatsRegistry::new());
    let batcher = EventBatcher::start(
        config(2, Duration::from_secs(60)),
        Sink::Local(log.clone()),
        stats.clone(),
    )
    .unwrap();

    let events: Vec<PricedEvent> = (0..5).map(event).collect();
    for e in events.clone() {
        batcher.enqueue(e).unwrap();
    }
    batcher.flush().await;

    assert_eq!(log.snapshot(), events);
    let snap = stats.snapshot();
    assert_eq!(snap.events_sent, 5);
    assert_eq!(snap.batches_sent, 3);
}

#[tokio::test]
async fn test_local_sink_accepts_after_shutdown() {
    let log = Arc::new(LocalEventLog::new(100));
    let stats = Arc::new(StatsRegistry::new());
    let batcher = EventBatcher::start(
        config(10, Duration::from_secs(60)),
        Sink::Local(log.clone()),
        stats.clone(),
    )
    .unwrap();

    batcher.enqueue(event(1)).unwrap();
    batcher.shutdown().await;
    batcher.enqueue(event(2)).unwrap();

    let tokens: Vec<u64> = log.snapshot().iter().map(|e| e.input_tokens).collect();
    assert_eq!(tokens, vec![1, 2]);
    let snap = stats.snapshot();
    assert_eq!(snap.events_enqueued, 2);
    assert_eq!(snap.events_sent, 2);
}

#[tokio::test]
async fn test_enqueue_does_not_wait_for_slow_transport() {
    let transport = ScriptedTransport::slow(Duration::from_millis(300));
    let (batcher, _stats) = remote(config(2, Duration::from_secs(60)), transport);

    for i in 0..50 {
        let start = Instant::now();
        batcher.enqueue(event(i)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
        tokio::task::yield_now().await;
    }
}
