//! EventBridge schedules: `{"sweep": "creation" | "burial" | "suspension" | "member_purge"}`.

use lambda_runtime::Error;
use serde_json::{json, Value};
use tracing::{error, info};
use vending_core::contract::ScheduledSweep;

use crate::services::Services;

/// Reads the sweep name from a constant-input rule or from an event's `detail`.
pub fn scheduled_sweep(event: &Value) -> Option<Result<ScheduledSweep, Error>> {
    let sweep = event
        .get("sweep")
        .or_else(|| event.pointer("/detail/sweep"))?;
    Some(
        serde_json::from_value(sweep.clone())
            .map_err(|error| Error::from(format!("unknown sweep {sweep}: {error}"))),
    )
}

pub async fn run_sweep(sweep: ScheduledSweep, services: &Services) -> Result<Value, Error> {
    let report = match sweep {
        ScheduledSweep::Creation => {
            serde_json::to_value(services.creation_scheduler().run().await?)?
        }
        ScheduledSweep::Burial => serde_json::to_value(services.burial_sweep().run().await?)?,
        ScheduledSweep::Suspension => {
            let report = services.suspension_sweeper().run().await?;
            if let Some(failure) = &report.failure {
                error!(
                    component = "scheduler",
                    event = "suspension_escalated",
                    account_name = %failure.account_name,
                    error = %failure.error_message,
                );
                return Err(Error::from(format!(
                    "suspension sweep stopped at {}: {}",
                    failure.account_name, failure.error_message
                )));
            }
            serde_json::to_value(report)?
        }
        ScheduledSweep::MemberPurge => {
            serde_json::to_value(services.member_purge().run().await?)?
        }
    };

    info!(
        component = "scheduler",
        event = "sweep_finished",
        sweep = ?sweep,
        report = %report,
    );
    Ok(json!({ "sweep": sweep, "report": report }))
}
