//! Double-buffered write aggregator.
//!
//! Collapses many keyed updates into one bulk write per flush. Two
//! equally-shaped maps back the aggregator: incoming `set`/`update`
//! calls touch only the active map, while a flush swaps the maps and
//! hands the filled one to the caller-supplied [`FlushSink`]. Writes
//! therefore never block on a flush in progress.
//!
//! A flush is triggered by the periodic timer (armed by `start`), by the
//! active map reaching `max_buffer_size`, or explicitly via
//! `force_flush`. Triggers coalesce: at most one flush runs at any
//! instant, and re-entrant triggers return immediately. When the sink
//! fails, the swapped-out snapshot is merged back into the active map so
//! no key is lost; updates that arrived while the flush ran are newer
//! and win the merge.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Errors surfaced by the aggregator.
#[derive(Debug, Error, Serialize, Clone)]
pub enum AggregatorError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("flush failed: {0}")]
    FlushFailed(String),
    #[error("aggregator is stopped")]
    Stopped,
}

/// Aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Period of the automatic flush timer, in milliseconds. Required.
    pub flush_interval_ms: u64,
    /// When set, reaching this many distinct keys in the active buffer
    /// triggers a flush.
    pub max_buffer_size: Option<usize>,
}

impl AggregatorConfig {
    pub fn new(flush_interval_ms: u64) -> Self {
        Self {
            flush_interval_ms,
            max_buffer_size: None,
        }
    }

    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.flush_interval_ms == 0 {
            return Err(AggregatorError::ConfigError(
                "flush_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_buffer_size == Some(0) {
            return Err(AggregatorError::ConfigError(
                "max_buffer_size must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Destination of flushed batches.
///
/// The sink borrows the batch: on failure the aggregator still owns the
/// data and rolls it back into the active buffer.
#[async_trait]
pub trait FlushSink<K, V>: Send + Sync {
    async fn flush(
        &self,
        batch: &HashMap<K, V>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct Buffers<K, V> {
    active: HashMap<K, V>,
    standby: HashMap<K, V>,
    flush_in_progress: bool,
    stopped: bool,
}

struct AggregatorShared<K, V> {
    buffers: Mutex<Buffers<K, V>>,
    sink: Arc<dyn FlushSink<K, V>>,
    config: AggregatorConfig,
}

enum TimerState {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
}

/// Double-buffered keyed write aggregator.
pub struct Aggregator<K, V> {
    shared: Arc<AggregatorShared<K, V>>,
    timer: Mutex<TimerState>,
}

impl<K, V> Aggregator<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Creates an aggregator that flushes into `sink`.
    ///
    /// # Errors
    /// Returns `AggregatorError::ConfigError` for a zero flush interval
    /// or zero `max_buffer_size`.
    pub fn new(
        config: AggregatorConfig,
        sink: Arc<dyn FlushSink<K, V>>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(AggregatorShared {
                buffers: Mutex::new(Buffers {
                    active: HashMap::new(),
                    standby: HashMap::new(),
                    flush_in_progress: false,
                    stopped: false,
                }),
                sink,
                config,
            }),
            timer: Mutex::new(TimerState::Idle),
        })
    }

    /// Arms the periodic flush timer. A no-op (with a warning) when
    /// already armed.
    pub async fn start(&self) {
        let mut timer = self.timer.lock().await;
        if matches!(*timer, TimerState::Running { .. }) {
            warn!("Aggregator timer already running; start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let interval = Duration::from_millis(self.shared.config.flush_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of an interval completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = flush_shared(&shared).await {
                            // Data was rolled back; the next trigger
                            // retries it.
                            error!(error = %e, "Periodic flush failed");
                        }
                    }
                }
            }
        });
        *timer = TimerState::Running {
            shutdown_tx,
            handle,
        };
    }

    /// Cancels the timer, rejects further writes, and runs a final
    /// flush, returning its outcome.
    pub async fn stop(&self) -> Result<(), AggregatorError> {
        let previous = {
            let mut timer = self.timer.lock().await;
            std::mem::replace(&mut *timer, TimerState::Idle)
        };
        if let TimerState::Running {
            shutdown_tx,
            handle,
        } = previous
        {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                error!(error = %e, "Aggregator timer task terminated abnormally");
            }
        }

        {
            let mut buffers = self.shared.buffers.lock().await;
            buffers.stopped = true;
        }

        flush_shared(&self.shared).await
    }

    /// Writes into the active buffer; last writer wins on `key`.
    ///
    /// When `max_buffer_size` is reached this triggers a flush, and a
    /// flush failure propagates to this caller.
    pub async fn set(&self, key: K, value: V) -> Result<(), AggregatorError> {
        let should_flush = {
            let mut buffers = self.shared.buffers.lock().await;
            if buffers.stopped {
                return Err(AggregatorError::Stopped);
            }
            buffers.active.insert(key, value);
            self.size_threshold_reached(&buffers)
        };

        if should_flush {
            self.force_flush().await
        } else {
            Ok(())
        }
    }

    /// Writes into the active buffer, combining with any existing value
    /// for `key` via `reducer(previous, incoming)`.
    pub async fn update<F>(&self, key: K, value: V, reducer: F) -> Result<(), AggregatorError>
    where
        F: FnOnce(&V, V) -> V,
    {
        let should_flush = {
            let mut buffers = self.shared.buffers.lock().await;
            if buffers.stopped {
                return Err(AggregatorError::Stopped);
            }
            match buffers.active.entry(key) {
                Entry::Occupied(mut occupied) => {
                    let merged = reducer(occupied.get(), value);
                    occupied.insert(merged);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(value);
                }
            }
            self.size_threshold_reached(&buffers)
        };

        if should_flush {
            self.force_flush().await
        } else {
            Ok(())
        }
    }

    /// Number of distinct keys in the active buffer.
    pub async fn size(&self) -> usize {
        self.shared.buffers.lock().await.active.len()
    }

    /// Flushes the active buffer now. Returns immediately when a flush
    /// is already running or the buffer is empty.
    pub async fn force_flush(&self) -> Result<(), AggregatorError> {
        flush_shared(&self.shared).await
    }

    fn size_threshold_reached(&self, buffers: &Buffers<K, V>) -> bool {
        self.shared
            .config
            .max_buffer_size
            .is_some_and(|max| buffers.active.len() >= max)
    }
}

/// The flush protocol.
///
/// Swap and snapshot happen under the buffer lock; the sink call runs
/// outside it so writers are never blocked on the sink. The in-flight
/// flag makes the swap/callback/clear sequence effectively exclusive.
async fn flush_shared<K, V>(shared: &AggregatorShared<K, V>) -> Result<(), AggregatorError>
where
    K: Eq + Hash + Send,
    V: Send,
{
    let batch = {
        let mut buffers = shared.buffers.lock().await;
        if buffers.flush_in_progress || buffers.active.is_empty() {
            return Ok(());
        }
        buffers.flush_in_progress = true;
        // New writes land in the emptied map from here on; the flush only
        // ever sees writes made before this swap point.
        let buffers = &mut *buffers;
        std::mem::swap(&mut buffers.active, &mut buffers.standby);
        std::mem::take(&mut buffers.standby)
    };

    let batch_size = batch.len();
    let result = shared.sink.flush(&batch).await;

    let mut buffers = shared.buffers.lock().await;
    buffers.flush_in_progress = false;
    match result {
        Ok(()) => {
            debug!(keys = batch_size, "Flushed aggregator buffer");
            Ok(())
        }
        Err(e) => {
            // Roll the unwritten snapshot back into the active buffer.
            // A key updated while the flush ran keeps its newer value;
            // the merged buffer may be larger than before the attempt.
            for (key, value) in batch {
                buffers.active.entry(key).or_insert(value);
            }
            Err(AggregatorError::FlushFailed(e.to_string()))
        }
    }
}
