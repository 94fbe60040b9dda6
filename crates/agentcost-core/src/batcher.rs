//! Event Batcher - Buffering and background delivery
//!
//! Producers call [`EventBatcher::enqueue`], which only touches a short
//! mutex: the event is appended to the current buffer, and a full buffer is
//! sealed into the outbox and the dispatch loop woken. No I/O happens on the
//! caller's path.
//!
//! The dispatch loop drains the outbox on every wake-up and every
//! `flush_interval` tick. Draining is serialised by a flush lock, so batches
//! are delivered one at a time in the order they were sealed.

use crate::config::TrackerConfig;
use crate::error::{Error, Result, SendError};
use crate::event::{Batch, PricedEvent};
use crate::local::LocalEventLog;
use crate::stats::StatsRegistry;
use crate::transport::Transport;
use crate::utils::{retry_with_backoff, RetryConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable batcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Nothing buffered
    Idle,
    /// Events buffered, no delivery running
    Accumulating,
    /// A delivery is running
    Flushing,
}

impl std::fmt::Display for BatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Accumulating => write!(f, "Accumulating"),
            Self::Flushing => write!(f, "Flushing"),
        }
    }
}

/// Batching and delivery policy
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Events per batch
    pub batch_size: usize,
    /// Time-based flush interval
    pub flush_interval: Duration,
    /// Hard cap on buffered plus sealed events
    pub max_queue_size: usize,
    /// Retry policy for failed sends
    pub retry: RetryConfig,
    /// Bound on each send attempt
    pub send_timeout: Duration,
    /// Bound on the final flush during shutdown
    pub shutdown_timeout: Duration,
    /// Log delivery failures at warn instead of debug
    pub verbose: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for BatcherConfig {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            max_queue_size: config.max_queue_size,
            retry: RetryConfig::new()
                .with_max_retries(config.max_retries)
                .with_initial_delay(config.initial_backoff())
                .with_max_delay(config.max_backoff()),
            send_timeout: config.request_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            verbose: config.debug,
        }
    }
}

/// Where sealed batches go
#[derive(Clone)]
pub enum Sink {
    /// Send over a transport with retries
    Remote(Arc<dyn Transport>),
    /// Append to an in-memory log
    Local(Arc<LocalEventLog>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(_) => write!(f, "Remote"),
            Self::Local(log) => write!(f, "Local({} events)", log.len()),
        }
    }
}

#[derive(Debug, Default)]
struct Buffer {
    current: Vec<PricedEvent>,
    outbox: VecDeque<Batch>,
    /// Events in `current` plus `outbox`
    queued: usize,
    /// Batch popped from the outbox whose delivery has not been settled
    in_flight: Option<InFlight>,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    batch_id: Uuid,
    events: usize,
}

impl Buffer {
    fn seal(&mut self) -> bool {
        if self.current.is_empty() {
            return false;
        }
        let events = std::mem::take(&mut self.current);
        self.outbox.push_back(Batch::new(events));
        true
    }
}

struct Shared {
    config: BatcherConfig,
    sink: Sink,
    stats: Arc<StatsRegistry>,
    buffer: Mutex<Buffer>,
    notify: Notify,
    flush_lock: tokio::sync::Mutex<()>,
    flushing: AtomicBool,
    cancel: CancellationToken,
}

/// Buffers events and delivers them in batches from a background task
pub struct EventBatcher {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatcher")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("sink", &self.shared.sink)
            .finish()
    }
}

impl EventBatcher {
    /// Create the batcher and spawn its dispatch loop on the current runtime
    pub fn start(config: BatcherConfig, sink: Sink, stats: Arc<StatsRegistry>) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch_size", "must be at least 1"));
        }
        if config.flush_interval.is_zero() {
            return Err(Error::config("flush_interval", "must be positive"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("EventBatcher requires a tokio runtime".to_string()))?;

        let shared = Arc::new(Shared {
            config,
            sink,
            stats,
            buffer: Mutex::new(Buffer::default()),
            notify: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
            flushing: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let task = runtime.spawn(dispatch_loop(
            Arc::downgrade(&shared),
            shared.cancel.clone(),
            shared.config.flush_interval,
        ));

        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// Buffer an event. Never performs I/O.
    ///
    /// Fails with [`Error::Backpressure`] when the queue is at capacity and
    /// with [`Error::ShutDown`] after shutdown (local mode keeps accepting,
    /// writing straight to the local log).
    pub fn enqueue(&self, event: PricedEvent) -> Result<()> {
        let shared = &self.shared;
        let mut buffer = shared.buffer.lock();

        if buffer.closed {
            drop(buffer);
            if let Sink::Local(ref log) = shared.sink {
                shared.stats.events_enqueued.fetch_add(1, Ordering::Relaxed);
                log.extend([event]);
                shared.stats.events_sent.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            shared.stats.events_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ShutDown);
        }

        if buffer.queued >= shared.config.max_queue_size {
            drop(buffer);
            shared.stats.events_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Backpressure {
                capacity: shared.config.max_queue_size,
            });
        }

        buffer.current.push(event);
        buffer.queued += 1;
        shared.stats.events_enqueued.fetch_add(1, Ordering::Relaxed);

        let sealed = buffer.current.len() >= shared.config.batch_size && buffer.seal();
        drop(buffer);

        if sealed {
            shared.notify.notify_one();
        }
        Ok(())
    }

    /// Seal the current buffer and deliver everything queued
    pub async fn flush(&self) {
        self.shared.buffer.lock().seal();
        self.shared.drain().await;
    }

    /// Stop the loop and deliver what is left, bounded by the shutdown
    /// timeout. Events still undelivered when the timeout fires are counted
    /// as dropped. Idempotent.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        {
            let mut buffer = shared.buffer.lock();
            if buffer.closed {
                return;
            }
            buffer.closed = true;
            buffer.seal();
        }
        shared.cancel.cancel();

        let timeout = shared.config.shutdown_timeout;
        let timed_out = tokio::time::timeout(timeout, shared.drain()).await.is_err();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if timed_out {
                task.abort();
            }
            let _ = task.await;
        }

        if timed_out {
            // A flush on another task may still hold the in-flight batch.
            // Taking it here settles it; that flush then skips accounting.
            let (abandoned, abandoned_batches) = {
                let mut buffer = shared.buffer.lock();
                let batches = buffer.outbox.len();
                buffer.outbox.clear();
                let queued = std::mem::take(&mut buffer.queued);
                let in_flight = buffer.in_flight.take().map_or(0, |f| f.events);
                (queued + in_flight, batches + usize::from(in_flight > 0))
            };

            shared
                .stats
                .events_dropped
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            shared
                .stats
                .batches_failed
                .fetch_add(abandoned_batches as u64, Ordering::Relaxed);
            shared.flushing.store(false, Ordering::Release);

            warn!(
                events = abandoned,
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown flush timed out, dropping remaining events"
            );
        } else if shared.config.verbose {
            info!("Event batcher shut down");
        } else {
            debug!("Event batcher shut down");
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BatcherState {
        if self.shared.flushing.load(Ordering::Acquire) {
            return BatcherState::Flushing;
        }
        if self.shared.buffer.lock().queued > 0 {
            BatcherState::Accumulating
        } else {
            BatcherState::Idle
        }
    }

    /// Events accepted but not yet delivered or dropped
    #[must_use]
    pub fn pending(&self) -> usize {
        let buffer = self.shared.buffer.lock();
        buffer.queued + buffer.in_flight.map_or(0, |f| f.events)
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.buffer.lock().closed
    }

    /// Shared counters
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.shared.stats
    }

    /// Local log, when running in local mode
    #[must_use]
    pub fn local_log(&self) -> Option<&Arc<LocalEventLog>> {
        match self.shared.sink {
            Sink::Local(ref log) => Some(log),
            Sink::Remote(_) => None,
        }
    }
}

impl Drop for EventBatcher {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn dispatch_loop(shared: Weak<Shared>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let Some(shared) = shared.upgrade() else {
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.buffer.lock().seal();
                shared.drain().await;
            }
            _ = shared.notify.notified() => {
                shared.drain().await;
            }
        }
    }

    debug!("Dispatch loop stopped");
}

impl Shared {
    /// Deliver sealed batches in order until the outbox is empty
    async fn drain(&self) {
        let _guard = self.flush_lock.lock().await;

        loop {
            let batch = {
                let mut buffer = self.buffer.lock();
                let Some(batch) = buffer.outbox.pop_front() else {
                    break;
                };
                buffer.queued = buffer.queued.saturating_sub(batch.len());
                buffer.in_flight = Some(InFlight {
                    batch_id: batch.id,
                    events: batch.len(),
                });
                self.flushing.store(true, Ordering::Release);
                batch
            };

            self.deliver(batch).await;
        }

        self.flushing.store(false, Ordering::Release);
    }

    async fn deliver(&self, batch: Batch) {
        let events = batch.len();

        match self.sink {
            Sink::Local(ref log) => {
                if !self.settle(batch.id) {
                    return;
                }
                let evicted = log.extend(batch.events);
                self.stats.record_sent(events);
                if evicted > 0 {
                    debug!(evicted, "Local event log full, evicted oldest events");
                }
            }
            Sink::Remote(ref transport) => {
                let result = retry_with_backoff(
                    &self.config.retry,
                    || self.send_once(transport.as_ref(), &batch),
                    |retry, err, delay| {
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        if self.config.verbose {
                            warn!(batch_id = %batch.id, retry, error = %err, delay_ms = delay.as_millis() as u64, "Batch send failed, retrying");
                        } else {
                            debug!(batch_id = %batch.id, retry, error = %err, delay_ms = delay.as_millis() as u64, "Batch send failed, retrying");
                        }
                    },
                )
                .await;

                if !self.settle(batch.id) {
                    debug!(batch_id = %batch.id, "Batch abandoned at shutdown, already counted as dropped");
                    return;
                }

                match result {
                    Ok(()) => {
                        self.stats.record_sent(events);
                        if self.config.verbose {
                            info!(batch_id = %batch.id, events, "Batch sent");
                        } else {
                            debug!(batch_id = %batch.id, events, "Batch sent");
                        }
                    }
                    Err(e) => {
                        self.stats.record_failed(events);
                        if self.config.verbose {
                            warn!(batch_id = %batch.id, events, attempts = e.attempts, error = %e.last_error, "Dropping batch");
                        } else {
                            debug!(batch_id = %batch.id, events, attempts = e.attempts, error = %e.last_error, "Dropping batch");
                        }
                    }
                }
            }
        }
    }

    /// Clear the in-flight mark for `batch_id`. False when shutdown has
    /// already written the batch off.
    fn settle(&self, batch_id: Uuid) -> bool {
        let mut buffer = self.buffer.lock();
        let owned = buffer.in_flight.is_some_and(|f| f.batch_id == batch_id);
        if owned {
            buffer.in_flight = None;
        }
        owned
    }

    fn is_abandoned(&self, batch_id: Uuid) -> bool {
        !self
            .buffer
            .lock()
            .in_flight
            .is_some_and(|f| f.batch_id == batch_id)
    }

    async fn send_once(
        &self,
        transport: &dyn Transport,
        batch: &Batch,
    ) -> std::result::Result<(), SendError> {
        if self.is_abandoned(batch.id) {
            return Err(SendError::Permanent {
                status: 0,
                body: "abandoned at shutdown".to_string(),
            });
        }
        match tokio::time::timeout(self.config.send_timeout, transport.send(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!(
                "send timed out after {:?}",
                self.config.send_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests;
