use std::sync::Arc;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::error;
use vending_lambda::config::RuntimeConfig;
use vending_lambda::handlers::router::handle_event;
use vending_lambda::observability::init_logging;
use vending_lambda::services::Services;

async fn handle_request(
    event: LambdaEvent<Value>,
    services: Arc<Services>,
) -> Result<Value, Error> {
    handle_event(event.payload, &services).await.inspect_err(|failure| {
        error!(
            component = "runtime",
            event = "invocation_failed",
            request_id = %event.context.request_id,
            error = %failure,
        );
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = RuntimeConfig::from_env()?;
    init_logging(config.log_format);

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let services = Arc::new(Services::from_config(&aws_config, &config));

    lambda_runtime::run(service_fn(move |event| {
        let services = services.clone();
        async move { handle_request(event, services).await }
    }))
    .await
}
