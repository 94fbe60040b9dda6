//! Pipeline Integration Tests
//!
//! Drives the public `Tracker` API against scripted transports and checks the
//! delivery guarantees end to end.

use agentcost_core::{Batch, SendError, Tracker, TrackerConfig, Transport, UsageRecord};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

/// Records every delivered event; optional delay and scripted failures
#[derive(Default)]
struct TestTransport {
    delivered: Mutex<Vec<u64>>,
    attempts: AtomicU32,
    delay: Duration,
    fail_first: u32,
    fail_every: u32,
}

impl TestTransport {
    fn delivered(&self) -> Vec<u64> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn send(&self, batch: &Batch) -> Result<(), SendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt < self.fail_first {
            return Err(SendError::Transient("503 Service Unavailable".into()));
        }
        if self.fail_every > 0 && attempt % self.fail_every == 0 {
            return Err(if attempt % 2 == 0 {
                SendError::Permanent {
                    status: 400,
                    body: "malformed".into(),
                }
            } else {
                SendError::Transient("connection reset".into())
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .extend(batch.events.iter().map(|e| e.input_tokens));
        Ok(())
    }
}

fn cloud_config() -> TrackerConfig {
    TrackerConfig::cloud("sk_test", "proj-test")
        .with_batch_size(10)
        .with_flush_interval(Duration::from_millis(200))
        .with_retries(1, Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_no_loss_no_duplication() {
    let transport = Arc::new(TestTransport::default());
    let tracker = Tracker::with_transport(cloud_config(), transport.clone()).unwrap();

    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 500;

    let producers = (0..PRODUCERS).map(|p| {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                assert_ok!(tracker.track(UsageRecord::new("gpt-4o", p * 10_000 + i, 1)));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    });
    for result in join_all(producers).await {
        result.unwrap();
    }
    tracker.shutdown().await;

    let delivered = transport.delivered();
    let unique: HashSet<u64> = delivered.iter().copied().collect();
    assert_eq!(delivered.len() as u64, PRODUCERS * PER_PRODUCER);
    assert_eq!(unique.len(), delivered.len());

    // each producer's events arrive in the order it tracked them
    for p in 0..PRODUCERS {
        let seq: Vec<u64> = delivered
            .iter()
            .copied()
            .filter(|t| t / 10_000 == p)
            .collect();
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
    }

    let stats = tracker.stats();
    assert_eq!(stats.events_enqueued, PRODUCERS * PER_PRODUCER);
    assert_eq!(stats.events_sent, PRODUCERS * PER_PRODUCER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conservation_with_failures() {
    let transport = Arc::new(TestTransport {
        fail_every: 3,
        ..TestTransport::default()
    });
    let tracker = Tracker::with_transport(cloud_config(), transport.clone()).unwrap();

    for i in 0..237 {
        assert_ok!(tracker.track(UsageRecord::new("gpt-4o", i, 1)));
    }
    tracker.shutdown().await;

    let stats = tracker.stats();
    assert_eq!(stats.events_enqueued, 237);
    assert!(stats.events_dropped > 0);
    assert_eq!(stats.events_enqueued, stats.events_sent + stats.events_dropped);
    assert_eq!(stats.events_sent, transport.delivered().len() as u64);
    assert_eq!(stats.in_transit(), 0);
}

#[tokio::test]
async fn test_slow_transport_does_not_block_track() {
    let transport = Arc::new(TestTransport {
        delay: Duration::from_millis(500),
        ..TestTransport::default()
    });
    let tracker = Tracker::with_transport(
        cloud_config().with_batch_size(5),
        transport,
    )
    .unwrap();

    let mut slowest = Duration::ZERO;
    for i in 0..100 {
        let start = Instant::now();
        assert_ok!(tracker.track(UsageRecord::new("gpt-4o", i, 1)));
        slowest = slowest.max(start.elapsed());
        tokio::task::yield_now().await;
    }

    assert!(slowest < Duration::from_millis(50), "slowest track took {slowest:?}");
}

#[tokio::test]
async fn test_retry_waits_out_backoff() {
    let transport = Arc::new(TestTransport {
        fail_first: 2,
        ..TestTransport::default()
    });
    let config = TrackerConfig::cloud("sk_test", "proj-test")
        .with_flush_interval(Duration::from_secs(60))
        .with_retries(3, Duration::from_millis(100), Duration::from_secs(1));
    let tracker = Tracker::with_transport(config, transport.clone()).unwrap();

    assert_ok!(tracker.track(UsageRecord::new("gpt-4o", 42, 1)));
    let start = Instant::now();
    tracker.flush().await;

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(transport.delivered(), vec![42]);
    let stats = tracker.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.events_dropped, 0);
}

#[tokio::test]
async fn test_time_trigger_delivers_partial_batch() {
    let transport = Arc::new(TestTransport::default());
    let config = cloud_config()
        .with_batch_size(50)
        .with_flush_interval(Duration::from_millis(100));
    let tracker = Tracker::with_transport(config, transport.clone()).unwrap();

    assert_ok!(tracker.track(UsageRecord::new("gpt-4o", 1, 1)));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.delivered(), vec![1]);
}

#[tokio::test]
async fn test_local_mode_returns_events_verbatim() {
    let tracker = Tracker::init(
        TrackerConfig::local()
            .with_batch_size(3)
            .with_default_agent_name("offline"),
    )
    .unwrap();

    let records: Vec<UsageRecord> = (0..7)
        .map(|i| {
            UsageRecord::new("claude-3-5-sonnet", 100 + i, 20 + i)
                .with_latency_ms(10 * i)
                .with_metadata("turn", i as i64)
        })
        .collect();
    for record in records.clone() {
        assert_ok!(tracker.track(record));
    }
    tracker.flush().await;

    let events = tracker.get_local_events();
    assert_eq!(events.len(), records.len());
    for (event, record) in events.iter().zip(&records) {
        assert_eq!(event.model, record.model());
        assert_eq!(event.input_tokens, record.input_tokens());
        assert_eq!(event.output_tokens, record.output_tokens());
        assert_eq!(event.latency_ms, record.latency_ms());
        assert_eq!(event.timestamp, record.timestamp());
        assert_eq!(event.agent_name, "offline");
        assert_eq!(&event.metadata, record.metadata());
    }

    let stats = tracker.get_stats();
    assert_eq!(stats.counters.events_sent, 7);
    assert_eq!(stats.pending_events, 0);
}
