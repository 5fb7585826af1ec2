//! Runtime configuration read from the Lambda environment.

use std::str::FromStr;
use std::time::Duration;

use vending_core::contract::DEFAULT_MEMBER_ROLE_NAME;
use vending_core::creation::{
    AccountNaming, DEFAULT_ACCOUNT_EMAIL_TEMPLATE, DEFAULT_ACCOUNT_NAME_PREFIX,
};
use vending_core::policy::LifecyclePolicy;

use crate::observability::LogFormat;

pub const DEFAULT_ACCOUNT_TABLE: &str = "account";
pub const DEFAULT_STATUS_INDEX: &str = "account_status";
pub const DEFAULT_EXTERNAL_TASK_TIMEOUT_SECS: u64 = 840;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be configured")]
    Missing { name: &'static str },

    #[error("{name}={value:?} is invalid: {message}")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub account_table: String,
    pub status_index: String,
    pub creation_queue_url: String,
    pub workflow_queue_url: String,
    pub creation_task_function: String,
    pub closure_task_function: String,
    pub management_role_arn: String,
    pub graveyard_ou_id: String,
    pub member_role_name: String,
    pub naming: AccountNaming,
    pub policy: LifecyclePolicy,
    pub external_task_timeout: Duration,
    pub log_format: LogFormat,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let mut policy = LifecyclePolicy::default();
        if let Some(ceiling) = vars.parsed::<usize>("VENDING_CEILING")? {
            policy.target_pool_size = ceiling;
        }
        if let Some(hours) = vars.parsed::<u64>("GRACE_PERIOD_HOURS")? {
            policy.grace_period_secs = hours.saturating_mul(60 * 60);
        }
        if let Some(secs) = vars.parsed::<u64>("SUSPENSION_DELAY_SECS")? {
            policy.suspension_delay_secs = secs;
        }

        let prefix = vars.or("ACCOUNT_NAME_PREFIX", DEFAULT_ACCOUNT_NAME_PREFIX);
        let template = vars.or("ACCOUNT_EMAIL_TEMPLATE", DEFAULT_ACCOUNT_EMAIL_TEMPLATE);
        let naming =
            AccountNaming::new(prefix, template.clone()).map_err(|error| ConfigError::Invalid {
                name: "ACCOUNT_EMAIL_TEMPLATE",
                value: template,
                message: error.to_string(),
            })?;

        let log_format = match vars.optional("LOG_FORMAT") {
            Some(value) => value.parse().map_err(|message| ConfigError::Invalid {
                name: "LOG_FORMAT",
                value,
                message,
            })?,
            None => LogFormat::Json,
        };

        Ok(Self {
            account_table: vars.or("ACCOUNT_TABLE", DEFAULT_ACCOUNT_TABLE),
            status_index: vars.or("STATUS_INDEX", DEFAULT_STATUS_INDEX),
            creation_queue_url: vars.required("CREATION_QUEUE_URL")?,
            workflow_queue_url: vars.required("WORKFLOW_QUEUE_URL")?,
            creation_task_function: vars.required("CREATION_TASK_FUNCTION")?,
            closure_task_function: vars.required("CLOSURE_TASK_FUNCTION")?,
            management_role_arn: vars.required("MANAGEMENT_ROLE_ARN")?,
            graveyard_ou_id: vars.required("GRAVEYARD_OU_ID")?,
            member_role_name: vars.or("MEMBER_ROLE_NAME", DEFAULT_MEMBER_ROLE_NAME),
            naming,
            policy,
            external_task_timeout: Duration::from_secs(
                vars.parsed("EXTERNAL_TASK_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_EXTERNAL_TASK_TIMEOUT_SECS),
            ),
            log_format,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing { name })
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|value| {
                value.trim().parse().map_err(|error: T::Err| ConfigError::Invalid {
                    name,
                    value: value.clone(),
                    message: error.to_string(),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(overrides: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut vars: HashMap<String, String> = [
            ("CREATION_QUEUE_URL", "https://sqs.example/creation"),
            ("WORKFLOW_QUEUE_URL", "https://sqs.example/workflow"),
            ("CREATION_TASK_FUNCTION", "create-account"),
            ("CLOSURE_TASK_FUNCTION", "close-account"),
            ("MANAGEMENT_ROLE_ARN", "arn:aws:iam::111111111111:role/vending"),
            ("GRAVEYARD_OU_ID", "ou-abcd-graveyard"),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
        for (name, value) in overrides {
            vars.insert(name.to_string(), value.to_string());
        }
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).expect("config should load");

        assert_eq!(config.account_table, "account");
        assert_eq!(config.status_index, "account_status");
        assert_eq!(config.member_role_name, "OVMCrossAccountRole");
        assert_eq!(config.policy, LifecyclePolicy::default());
        assert_eq!(config.external_task_timeout, Duration::from_secs(840));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config
            .naming
            .request_for_suffix("abc")
            .account_email
            .contains("+abc@"));
    }

    #[test]
    fn overrides_feed_the_lifecycle_policy() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("VENDING_CEILING", "25"),
            ("GRACE_PERIOD_HOURS", "2"),
            ("SUSPENSION_DELAY_SECS", "1"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .expect("config should load");

        assert_eq!(config.policy.target_pool_size, 25);
        assert_eq!(config.policy.grace_period(), Duration::from_secs(7_200));
        assert_eq!(config.policy.suspension_delay(), Duration::from_secs(1));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn missing_required_var_is_named() {
        let base = lookup(&[]);
        let error = RuntimeConfig::from_lookup(|name| {
            if name == "GRAVEYARD_OU_ID" {
                None
            } else {
                base(name)
            }
        })
        .expect_err("graveyard is required");

        assert_eq!(
            error,
            ConfigError::Missing {
                name: "GRAVEYARD_OU_ID"
            }
        );
        assert_eq!(error.to_string(), "GRAVEYARD_OU_ID must be configured");
    }

    #[test]
    fn malformed_numbers_and_templates_are_rejected() {
        let error = RuntimeConfig::from_lookup(lookup(&[("VENDING_CEILING", "ten")]))
            .expect_err("non-numeric ceiling");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "VENDING_CEILING",
                ..
            }
        ));

        let error =
            RuntimeConfig::from_lookup(lookup(&[("ACCOUNT_EMAIL_TEMPLATE", "nobody@example.com")]))
                .expect_err("template without placeholder");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "ACCOUNT_EMAIL_TEMPLATE",
                ..
            }
        ));
    }
}
