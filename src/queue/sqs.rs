//! AWS SQS implementation of the queue client.
//!
//! Wraps `aws_sdk_sqs::Client` for a single queue URL. Credentials and
//! region come from the ambient AWS configuration; an explicit endpoint
//! override targets SQS-compatible emulators (e.g. LocalStack), in which
//! case the credentials may be placeholders.

use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, Message, MessageSystemAttributeName};
use tracing::{debug, error, warn};

use super::{
    QueueClient, QueueClientError, QueueMessage, DELETE_BATCH_MAX_ENTRIES,
    MAX_VISIBILITY_TIMEOUT_SECS,
};
use async_trait::async_trait;

/// SQS-backed queue client bound to one queue URL.
#[derive(Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl std::fmt::Debug for SqsQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueueClient")
            .field("queue_url", &self.queue_url)
            .finish()
    }
}

/// Clamps a requested visibility timeout to the SQS-accepted range.
fn clamp_visibility(visibility_seconds: i64) -> i32 {
    visibility_seconds.clamp(0, MAX_VISIBILITY_TIMEOUT_SECS) as i32
}

/// Converts an SDK message into the runtime envelope.
///
/// Messages without an id or receipt handle cannot be deleted or
/// re-visibilitied, so they are dropped with a warning rather than
/// surfaced to the handler.
fn convert_message(message: Message) -> Option<QueueMessage> {
    let receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse::<u32>().ok());

    let message_id = match message.message_id() {
        Some(id) => id.to_string(),
        None => {
            warn!("Dropping SQS message without a message id");
            return None;
        }
    };
    let receipt_handle = match message.receipt_handle() {
        Some(handle) => handle.to_string(),
        None => {
            warn!(message_id = %message_id, "Dropping SQS message without a receipt handle");
            return None;
        }
    };

    Some(QueueMessage {
        message_id,
        receipt_handle,
        body: message.body().unwrap_or_default().to_string(),
        receive_count,
    })
}

/// Builds the per-batch entries for one `DeleteMessageBatch` call.
/// Entries are keyed by their position in the chunk.
fn build_delete_entries(
    chunk: &[QueueMessage],
) -> Result<Vec<DeleteMessageBatchRequestEntry>, QueueClientError> {
    let mut entries = Vec::with_capacity(chunk.len());
    for (index, message) in chunk.iter().enumerate() {
        let entry = DeleteMessageBatchRequestEntry::builder()
            .id(index.to_string())
            .receipt_handle(&message.receipt_handle)
            .build()
            .map_err(|e| {
                QueueClientError::DeleteError(format!(
                    "Failed to build delete entry for {}: {e}",
                    message.message_id
                ))
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

impl SqsQueueClient {
    /// Creates a client from the ambient AWS configuration.
    ///
    /// When `endpoint_url` is provided, the SDK is pointed at that
    /// endpoint instead of the regional AWS one.
    pub async fn new(queue_url: String, endpoint_url: Option<String>) -> Self {
        let config = match endpoint_url {
            Some(endpoint) => aws_config::from_env().endpoint_url(endpoint).load().await,
            None => aws_config::load_from_env().await,
        };
        Self {
            client: aws_sdk_sqs::Client::new(&config),
            queue_url,
        }
    }

    /// Creates a client around an existing SDK client.
    pub fn from_client(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive(
        &self,
        max: i32,
        wait_seconds: i32,
        visibility_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueClientError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_seconds)
            .visibility_timeout(visibility_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| {
                QueueClientError::ReceiveError(format!("ReceiveMessage failed: {e}"))
            })?;

        let messages: Vec<QueueMessage> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(convert_message)
            .collect();

        debug!(
            queue_url = %self.queue_url,
            message_count = messages.len(),
            "Received messages from SQS"
        );

        Ok(messages)
    }

    async fn delete_batch(&self, messages: &[QueueMessage]) -> Result<(), QueueClientError> {
        // The wire protocol caps DeleteMessageBatch at 10 entries, so a
        // larger set is issued as successive calls.
        for chunk in messages.chunks(DELETE_BATCH_MAX_ENTRIES) {
            let entries = build_delete_entries(chunk)?;

            let output = self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| {
                    QueueClientError::DeleteError(format!("DeleteMessageBatch failed: {e}"))
                })?;

            // Partial success is tolerated: failed entries redeliver once
            // their visibility timeout lapses.
            for failed in output.failed() {
                let message_id = chunk
                    .get(failed.id().parse::<usize>().unwrap_or(usize::MAX))
                    .map(|m| m.message_id.as_str())
                    .unwrap_or("unknown");
                error!(
                    message_id = %message_id,
                    code = %failed.code(),
                    reason = ?failed.message(),
                    "Failed to delete message in batch; it will redeliver"
                );
            }

            debug!(
                queue_url = %self.queue_url,
                deleted = output.successful().len(),
                failed = output.failed().len(),
                "Issued delete batch"
            );
        }

        Ok(())
    }

    async fn change_visibility(
        &self,
        message: &QueueMessage,
        visibility_seconds: i64,
    ) -> Result<(), QueueClientError> {
        let clamped = clamp_visibility(visibility_seconds);
        if i64::from(clamped) != visibility_seconds {
            warn!(
                requested = visibility_seconds,
                clamped = clamped,
                "Visibility timeout clamped to SQS limit (0-43200)"
            );
        }

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(clamped)
            .send()
            .await
            .map_err(|e| {
                QueueClientError::ChangeVisibilityError(format!(
                    "ChangeMessageVisibility failed for {}: {e}",
                    message.message_id
                ))
            })?;

        debug!(
            message_id = %message.message_id,
            visibility_seconds = clamped,
            "Changed message visibility"
        );

        Ok(())
    }
}
