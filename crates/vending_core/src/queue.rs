use std::time::Duration;

use async_trait::async_trait;

use crate::contract::QueueMessage;
use crate::error::Result;

/// An at-least-once message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Sends `message`, optionally hidden from consumers for `delay`.
    async fn send(&self, message: &QueueMessage, delay: Option<Duration>) -> Result<()>;
}
