//! DynamoDB stream consumer: turns `→ VENDED` changes into decommission runs.

use lambda_runtime::Error;
use serde_json::Value;
use tracing::{info, warn};
use vending_core::contract::QueueMessage;
use vending_core::store::ChangeNotification;
use vending_core::workflow::decommission::decommission_trigger;

use crate::adapters::dynamo_store::decode_account;
use crate::handlers::queue::process_message;
use crate::handlers::BatchResponse;
use crate::services::Services;

pub fn is_stream_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .is_some_and(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record.get("eventSource").and_then(Value::as_str) == Some("aws:dynamodb")
                })
        })
}

/// A stream record decoded into the store's change shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChange {
    pub sequence_number: String,
    /// `None` for removals.
    pub notification: Option<ChangeNotification>,
}

pub fn decode_stream_records(event: &Value) -> Result<Vec<StreamChange>, Error> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::from("stream event must include Records array"))?;

    let mut changes = Vec::with_capacity(records.len());
    for record in records {
        let sequence_number = record
            .pointer("/dynamodb/SequenceNumber")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::from("stream record must carry dynamodb.SequenceNumber"))?
            .to_string();

        let notification = match record.pointer("/dynamodb/NewImage") {
            Some(new_image) => Some(ChangeNotification {
                old_image: record
                    .pointer("/dynamodb/OldImage")
                    .map(account_from_image)
                    .transpose()?,
                new_image: account_from_image(new_image)?,
            }),
            None => None,
        };
        changes.push(StreamChange {
            sequence_number,
            notification,
        });
    }
    Ok(changes)
}

fn account_from_image(image: &Value) -> Result<vending_core::Account, Error> {
    decode_account(|name| {
        image
            .get(name)
            .and_then(|attribute| attribute.get("S"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
    .map_err(|error| Error::from(format!("invalid stream image: {error}")))
}

pub async fn handle_stream_event(
    event: &Value,
    services: &Services,
) -> Result<BatchResponse, Error> {
    let mut response = BatchResponse::default();
    let runner = services.decommission_runner();

    for change in decode_stream_records(event)? {
        let Some(request) = change.notification.as_ref().and_then(decommission_trigger) else {
            continue;
        };
        info!(
            component = "stream_consumer",
            event = "decommission_triggered",
            account_name = %request.account_name,
        );

        let ticket = runner.start(&request);
        if let Err(error) = process_message(QueueMessage::Decommission(ticket), services).await {
            warn!(
                component = "stream_consumer",
                event = "trigger_failed",
                account_name = %request.account_name,
                error = %error,
            );
            response.fail(change.sequence_number);
        }
    }
    Ok(response)
}
