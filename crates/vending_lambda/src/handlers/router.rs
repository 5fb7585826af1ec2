//! Dispatches a raw Lambda event to its handler by shape.

use lambda_runtime::Error;
use serde_json::Value;
use vending_core::contract::ScheduledSweep;

use crate::handlers::queue::{handle_sqs_event, is_sqs_event};
use crate::handlers::schedule::{run_sweep, scheduled_sweep};
use crate::handlers::stream::{handle_stream_event, is_stream_event};
use crate::handlers::vend::{handle_vend_event, is_api_event};
use crate::services::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Api,
    Queue,
    Stream,
    Schedule(ScheduledSweep),
}

pub fn classify_event(event: &Value) -> Result<EventKind, Error> {
    if is_sqs_event(event) {
        return Ok(EventKind::Queue);
    }
    if is_stream_event(event) {
        return Ok(EventKind::Stream);
    }
    if let Some(sweep) = scheduled_sweep(event) {
        return sweep.map(EventKind::Schedule);
    }
    if is_api_event(event) {
        return Ok(EventKind::Api);
    }
    Err(Error::from("unrecognized event shape"))
}

pub async fn handle_event(event: Value, services: &Services) -> Result<Value, Error> {
    match classify_event(&event)? {
        EventKind::Api => {
            let response = handle_vend_event(&event, &services.allocator()).await;
            serde_json::to_value(response)
                .map_err(|error| Error::from(format!("failed to serialize api response: {error}")))
        }
        EventKind::Queue => Ok(serde_json::to_value(
            handle_sqs_event(&event, services).await?,
        )?),
        EventKind::Stream => Ok(serde_json::to_value(
            handle_stream_event(&event, services).await?,
        )?),
        EventKind::Schedule(sweep) => run_sweep(sweep, services).await,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handlers::test_support::{created, Fixture};

    #[test]
    fn classifies_every_supported_shape() {
        assert_eq!(
            classify_event(&json!({"Records": [{"eventSource": "aws:sqs"}]})).expect("sqs"),
            EventKind::Queue
        );
        assert_eq!(
            classify_event(&json!({"Records": [{"eventSource": "aws:dynamodb"}]}))
                .expect("stream"),
            EventKind::Stream
        );
        assert_eq!(
            classify_event(&json!({"sweep": "suspension"})).expect("schedule"),
            EventKind::Schedule(ScheduledSweep::Suspension)
        );
        assert_eq!(
            classify_event(&json!({"httpMethod": "GET"})).expect("api"),
            EventKind::Api
        );
        assert!(classify_event(&json!({"hello": "world"})).is_err());
        assert!(classify_event(&json!({"sweep": "nope"})).is_err());
    }

    #[tokio::test]
    async fn api_events_return_a_proxy_response() {
        let fixture = Fixture::new([created("ovm-a", "123456789012")]);

        let event = json!({"httpMethod": "GET", "path": "/vend"});

        let response = handle_event(event, &fixture.services)
            .await
            .expect("handled");

        assert_eq!(response["statusCode"], 200);
        assert_eq!(response["headers"]["Content-Type"], "application/json");
    }

    #[tokio::test]
    async fn queue_events_return_batch_failures() {
        let fixture = Fixture::new([]);
        let event = json!({
            "Records": [{"eventSource": "aws:sqs", "messageId": "m-9", "body": "{}"}]
        });

        let response = handle_event(event, &fixture.services).await.expect("handled");

        assert_eq!(
            response,
            json!({"batchItemFailures": [{"itemIdentifier": "m-9"}]})
        );
    }
}
