//! SQS consumer for creation requests and parked decommission runs.

use chrono::{DateTime, Utc};
use lambda_runtime::Error;
use serde_json::Value;
use tracing::{info, warn};
use vending_core::contract::QueueMessage;
use vending_core::creation::ProvisionOutcome;
use vending_core::workflow::decommission::{DecommissionTicket, RunOutcome};

use crate::adapters::sqs_queue::MAX_DELAY;
use crate::handlers::BatchResponse;
use crate::services::Services;

pub fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .map(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record
                        .get("eventSource")
                        .and_then(Value::as_str)
                        .map(|source| source == "aws:sqs")
                        .unwrap_or(false)
                })
        })
        .unwrap_or(false)
}

/// A queue record: its SQS message id and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
}

pub fn decode_sqs_records(event: &Value) -> Result<Vec<QueueRecord>, Error> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::from("SQS event must include Records array"))?;

    let mut decoded = Vec::with_capacity(records.len());
    for record in records {
        let message_id = record
            .get("messageId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::from("SQS record messageId must be a string"))?;
        let body = record
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::from("SQS record body must be a string"))?;
        decoded.push(QueueRecord {
            message_id: message_id.to_string(),
            body: body.to_string(),
        });
    }

    Ok(decoded)
}

/// Processes every record and reports the ones that must be redelivered.
pub async fn handle_sqs_event(event: &Value, services: &Services) -> Result<BatchResponse, Error> {
    let mut response = BatchResponse::default();
    for record in decode_sqs_records(event)? {
        let message = match serde_json::from_str::<QueueMessage>(&record.body) {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    component = "queue_consumer",
                    event = "undecodable_message",
                    message_id = %record.message_id,
                    error = %error,
                );
                response.fail(record.message_id);
                continue;
            }
        };

        if let Err(error) = process_message(message, services).await {
            warn!(
                component = "queue_consumer",
                event = "message_failed",
                message_id = %record.message_id,
                error = %error,
            );
            response.fail(record.message_id);
        }
    }
    Ok(response)
}

pub async fn process_message(
    message: QueueMessage,
    services: &Services,
) -> vending_core::Result<()> {
    match message {
        QueueMessage::CreationRequest(request) => {
            match services.provisioning_worker().handle(&request).await? {
                ProvisionOutcome::Registered { account_id } => info!(
                    component = "queue_consumer",
                    event = "account_registered",
                    account_name = %request.account_name,
                    account_id = %account_id,
                ),
                ProvisionOutcome::Skipped { status } => info!(
                    component = "queue_consumer",
                    event = "duplicate_creation_request",
                    account_name = %request.account_name,
                    status = ?status,
                ),
            }
            Ok(())
        }
        QueueMessage::Decommission(ticket) => {
            match services.decommission_runner().run(ticket).await? {
                RunOutcome::Finished(state) => {
                    info!(
                        component = "queue_consumer",
                        event = "decommission_finished",
                        state = state.name(),
                    );
                    Ok(())
                }
                RunOutcome::Deferred { ticket, resume_at } => {
                    park(ticket, resume_at, services).await
                }
            }
        }
    }
}

/// Puts a decommission run back on the workflow queue until `resume_at`.
///
/// SQS delays top out at fifteen minutes, so long waits take several hops;
/// each early delivery re-defers.
pub async fn park(
    ticket: DecommissionTicket,
    resume_at: DateTime<Utc>,
    services: &Services,
) -> vending_core::Result<()> {
    let delay = (resume_at - services.clock.now())
        .to_std()
        .unwrap_or_default()
        .min(MAX_DELAY);
    info!(
        component = "queue_consumer",
        event = "decommission_parked",
        account_name = %ticket.account_name,
        state = ticket.state.name(),
        resume_at = %resume_at,
        delay_secs = delay.as_secs(),
    );
    services
        .queue
        .send(&QueueMessage::Decommission(ticket), Some(delay))
        .await
}
