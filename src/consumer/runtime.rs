//! The polling runtime.
//!
//! One spawned task owns the loop: receive a batch, run the per-message
//! pipeline, issue a single batch delete for terminal messages, then
//! poll again. `stop()` flips a watch flag; the loop finishes its
//! in-flight batch before exiting, so a message caught in a stop
//! transition either completes and is classified, or is left undeleted
//! and redelivers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::{QueueClient, QueueMessage, MAX_VISIBILITY_TIMEOUT_SECS};
use crate::stores::{BackoffStore, IdempotencyStore};

use super::config::ConsumerConfig;
use super::errors::ConsumerError;
use super::handler::{MessageHandler, MessageMetadata};
use super::outcome::{classify, MessageOutcome};

/// Fixed pause after a transport error on receive.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Per-delivery classification of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    /// Terminal: processed, or suppressed as a duplicate. Delete.
    Successful,
    /// Transient: leave undeleted so the queue redelivers. Carries the
    /// cool-down when a backoff store produced one.
    Retry { backoff_delay_ms: Option<i64> },
    /// Terminal: permanent fault. Delete; the idempotency mark stays.
    PermanentFailure,
    /// Still cooling down; left undeleted without dispatching.
    Skipped,
}

enum RunState {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
}

struct ConsumerInner {
    config: ConsumerConfig,
    queue: Arc<dyn QueueClient>,
    handler: Arc<dyn MessageHandler>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    backoff: Option<Arc<dyn BackoffStore>>,
}

/// SQS consumer runtime.
///
/// Construction validates the configuration; stores are attached with
/// the `with_*` builder methods before the first `start()`.
pub struct SqsConsumer {
    config: ConsumerConfig,
    queue: Arc<dyn QueueClient>,
    handler: Arc<dyn MessageHandler>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    backoff: Option<Arc<dyn BackoffStore>>,
    state: Mutex<RunState>,
}

impl std::fmt::Debug for SqsConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsConsumer")
            .field("queue_url", &self.config.queue_url)
            .field("idempotency", &self.idempotency.is_some())
            .field("backoff", &self.backoff.is_some())
            .finish()
    }
}

impl SqsConsumer {
    /// Creates a consumer over the given queue client and handler.
    ///
    /// # Errors
    /// Returns `ConsumerError::ConfigError` when any configuration field
    /// is outside its documented range; an invalid configuration never
    /// reaches the polling loop.
    pub fn new(
        config: ConsumerConfig,
        queue: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        Ok(Self {
            config,
            queue,
            handler,
            idempotency: None,
            backoff: None,
            state: Mutex::new(RunState::Idle),
        })
    }

    /// Attaches an idempotency store. Without one, no deduplication is
    /// performed.
    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    /// Attaches a backoff store. Without one, backoff is not consulted
    /// and visibility timeouts are never adjusted.
    pub fn with_backoff_store(mut self, store: Arc<dyn BackoffStore>) -> Self {
        self.backoff = Some(store);
        self
    }

    /// Spawns the polling task. A no-op (with a warning) when already
    /// running.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, RunState::Running { .. }) {
            warn!(queue_url = %self.config.queue_url, "Consumer already running; start ignored");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ConsumerInner {
            config: self.config.clone(),
            queue: self.queue.clone(),
            handler: self.handler.clone(),
            idempotency: self.idempotency.clone(),
            backoff: self.backoff.clone(),
        });
        let handle = tokio::spawn(run_loop(inner, shutdown_rx));
        *state = RunState::Running {
            shutdown_tx,
            handle,
        };
    }

    /// Signals the polling task to stop and waits for it to finish its
    /// in-flight batch. A no-op when idle.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, RunState::Idle)
        };

        match previous {
            RunState::Idle => {
                warn!(queue_url = %self.config.queue_url, "Consumer not running; stop ignored");
            }
            RunState::Running {
                shutdown_tx,
                handle,
            } => {
                info!(queue_url = %self.config.queue_url, "Stopping consumer");
                let _ = shutdown_tx.send(true);
                if let Err(e) = handle.await {
                    error!(error = %e, "Consumer task terminated abnormally");
                }
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, RunState::Running { .. })
    }
}

async fn run_loop(inner: Arc<ConsumerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(queue_url = %inner.config.queue_url, "Consumer started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let received = tokio::select! {
            _ = shutdown_rx.changed() => break,
            received = inner.queue.receive(
                inner.config.max_number_of_messages,
                inner.config.wait_time_seconds,
                inner.config.visibility_timeout,
            ) => received,
        };

        match received {
            Ok(messages) if messages.is_empty() => {
                sleep_or_shutdown(
                    &mut shutdown_rx,
                    Duration::from_millis(inner.config.poll_interval_ms),
                )
                .await;
            }
            Ok(messages) => {
                // The batch runs to completion even if a stop arrives
                // mid-flight; the loop head observes the flag afterwards.
                process_batch(&inner, messages).await;
            }
            Err(e) => {
                error!(error = %e, queue_url = %inner.config.queue_url, "Failed to receive messages");
                sleep_or_shutdown(&mut shutdown_rx, RECEIVE_ERROR_BACKOFF).await;
            }
        }
    }

    info!(queue_url = %inner.config.queue_url, "Consumer stopped");
}

async fn sleep_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

/// Runs the per-message pipeline over one received batch, then issues a
/// single delete for the terminal messages and re-paces retries.
async fn process_batch(inner: &ConsumerInner, messages: Vec<QueueMessage>) {
    debug!(message_count = messages.len(), "Processing batch");

    let outcomes: Vec<(QueueMessage, Classification)> = if inner.config.process_in_parallel {
        futures::future::join_all(
            messages
                .into_iter()
                .map(|message| process_message(inner, message)),
        )
        .await
    } else {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            outcomes.push(process_message(inner, message).await);
        }
        outcomes
    };

    let mut to_delete = Vec::new();
    let mut retries = Vec::new();
    for (message, classification) in outcomes {
        match classification {
            Classification::Successful | Classification::PermanentFailure => {
                to_delete.push(message);
            }
            Classification::Retry { backoff_delay_ms } => {
                retries.push((message, backoff_delay_ms));
            }
            Classification::Skipped => {}
        }
    }

    // One delete per batch regardless of dispatch mode. A failure is not
    // fatal: undeleted messages redeliver.
    if !to_delete.is_empty() {
        if let Err(e) = inner.queue.delete_batch(&to_delete).await {
            error!(
                error = %e,
                message_count = to_delete.len(),
                "Failed to delete batch; messages will redeliver"
            );
        }
    }

    // When the backoff store produced a cool-down, align the queue's
    // redelivery pacing with it. Otherwise the configured visibility
    // timeout governs.
    for (message, backoff_delay_ms) in retries {
        if let Some(delay_ms) = backoff_delay_ms {
            let visibility_seconds = (delay_ms / 1_000).min(MAX_VISIBILITY_TIMEOUT_SECS);
            if let Err(e) = inner
                .queue
                .change_visibility(&message, visibility_seconds)
                .await
            {
                warn!(
                    error = %e,
                    message_id = %message.message_id,
                    "Failed to change visibility; queue default governs redelivery"
                );
            }
        }
    }
}

async fn process_message(
    inner: &ConsumerInner,
    message: QueueMessage,
) -> (QueueMessage, Classification) {
    let id = message.message_id.clone();

    // Backoff gate: a cooling-down message is neither dispatched nor
    // deleted; it redelivers once the queue makes it visible again.
    if let Some(backoff) = &inner.backoff {
        match backoff.can_process(&id).await {
            Ok(false) => {
                debug!(message_id = %id, "Message is cooling down; skipped");
                return (message, Classification::Skipped);
            }
            Ok(true) => {}
            Err(e) => {
                // Fail open: a degraded store must not wedge the queue.
                warn!(error = %e, message_id = %id, "Backoff check failed; processing anyway");
            }
        }
    }

    // Duplicate suppression: delete without dispatching the handler.
    let mut pre_marked = false;
    if let Some(idempotency) = &inner.idempotency {
        match idempotency.has_processed(&id).await {
            Ok(true) => {
                debug!(message_id = %id, "Duplicate delivery suppressed");
                return (message, Classification::Successful);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, message_id = %id, "Idempotency check failed; processing anyway");
            }
        }

        if inner.config.mark_before_dispatch {
            match idempotency
                .mark_processed(&id, inner.config.idempotency_ttl_seconds)
                .await
            {
                Ok(()) => pre_marked = true,
                Err(e) => {
                    warn!(error = %e, message_id = %id, "Failed to pre-mark message");
                }
            }
        }
    }

    let metadata = MessageMetadata::new(message.receive_count, inner.config.max_receive_count);
    let result = inner.handler.handle(&message, &metadata).await;

    match classify(result) {
        MessageOutcome::Success => {
            if let Some(idempotency) = &inner.idempotency {
                if !pre_marked {
                    if let Err(e) = idempotency
                        .mark_processed(&id, inner.config.idempotency_ttl_seconds)
                        .await
                    {
                        warn!(error = %e, message_id = %id, "Failed to mark message as processed");
                    }
                }
            }
            if let Some(backoff) = &inner.backoff {
                if let Err(e) = backoff.clear(&id).await {
                    warn!(error = %e, message_id = %id, "Failed to clear backoff entry");
                }
            }
            debug!(
                message_id = %id,
                retry_count = metadata.retry_count,
                "Message processed"
            );
            (message, Classification::Successful)
        }
        MessageOutcome::Retry { reason } => {
            warn!(
                message_id = %id,
                retry_count = metadata.retry_count,
                reason = ?reason,
                "Transient handler failure; message will redeliver"
            );
            if pre_marked {
                if let Some(idempotency) = &inner.idempotency {
                    if let Err(e) = idempotency.remove(&id).await {
                        warn!(error = %e, message_id = %id, "Failed to remove pre-mark for retry");
                    }
                }
            }
            let mut backoff_delay_ms = None;
            if let Some(backoff) = &inner.backoff {
                match backoff
                    .record_failure(
                        &id,
                        inner.config.backoff_base_delay,
                        inner.config.backoff_base_delay_unit,
                        inner.config.retry_strategy,
                    )
                    .await
                {
                    Ok(next_retry_ms) => {
                        backoff_delay_ms =
                            Some((next_retry_ms - Utc::now().timestamp_millis()).max(0));
                    }
                    Err(e) => {
                        warn!(error = %e, message_id = %id, "Failed to record failure in backoff store");
                    }
                }
            }
            (message, Classification::Retry { backoff_delay_ms })
        }
        MessageOutcome::Failure { reason } => {
            error!(
                message_id = %id,
                retry_count = metadata.retry_count,
                reason = ?reason,
                "Permanent handler failure; message will be deleted"
            );
            // The mark stays (or is set) so a racing redelivery of this id
            // is suppressed instead of reprocessed.
            if let Some(idempotency) = &inner.idempotency {
                if !pre_marked {
                    if let Err(e) = idempotency
                        .mark_processed(&id, inner.config.idempotency_ttl_seconds)
                        .await
                    {
                        warn!(error = %e, message_id = %id, "Failed to mark permanently failed message");
                    }
                }
            }
            (message, Classification::PermanentFailure)
        }
    }
}
