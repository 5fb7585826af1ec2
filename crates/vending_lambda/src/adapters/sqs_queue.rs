use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use vending_core::contract::QueueMessage;
use vending_core::error::{Error, Result};
use vending_core::queue::MessageQueue;

/// Longest per-message delay SQS accepts.
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Sends creation requests and workflow messages to their own queues.
pub struct SqsMessageQueue {
    client: aws_sdk_sqs::Client,
    creation_queue_url: String,
    workflow_queue_url: String,
}

impl SqsMessageQueue {
    pub fn new(
        client: aws_sdk_sqs::Client,
        creation_queue_url: impl Into<String>,
        workflow_queue_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            creation_queue_url: creation_queue_url.into(),
            workflow_queue_url: workflow_queue_url.into(),
        }
    }

    fn queue_url(&self, message: &QueueMessage) -> &str {
        match message {
            QueueMessage::CreationRequest(_) => &self.creation_queue_url,
            QueueMessage::Decommission(_) => &self.workflow_queue_url,
        }
    }
}

/// Whole seconds of delay, capped at [`MAX_DELAY`].
pub fn delay_seconds(delay: Duration) -> i32 {
    delay.min(MAX_DELAY).as_secs() as i32
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    async fn send(&self, message: &QueueMessage, delay: Option<Duration>) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.client
            .send_message()
            .queue_url(self.queue_url(message))
            .message_body(body)
            .set_delay_seconds(delay.map(delay_seconds))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                Error::queue(format!(
                    "failed to enqueue message: {}",
                    DisplayErrorContext(&error)
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_capped_at_fifteen_minutes() {
        assert_eq!(delay_seconds(Duration::from_secs(30)), 30);
        assert_eq!(delay_seconds(Duration::from_millis(1_999)), 1);
        assert_eq!(delay_seconds(Duration::from_secs(86_400)), 900);
    }
}
