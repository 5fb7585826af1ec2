//! DynamoDB-backed [`AccountStore`].
//!
//! Table keyed by `account_name`, with a global secondary index on
//! `account_status` (sort key `account_name`). Timestamps are stored as
//! RFC 3339 strings. Every conditional write carries `attribute_exists` on the
//! key so an update never creates a record.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue, Select};
use chrono::{DateTime, Utc};
use tracing::debug;
use vending_core::account::{Account, AccountStatus, TimestampField};
use vending_core::error::{Error, Result};
use vending_core::store::{
    check_mutation, AccountMutation, AccountStore, Page, Precondition, QueryOptions, QueryOrder,
    UpdateOutcome,
};

const KEY: &str = "account_name";
const STATUS: &str = "account_status";

pub struct DynamoAccountStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
    status_index: String,
}

impl DynamoAccountStore {
    pub fn new(
        client: aws_sdk_dynamodb::Client,
        table: impl Into<String>,
        status_index: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            status_index: status_index.into(),
        }
    }

    async fn insert(&self, account: &Account) -> Result<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(account_to_item(account)))
            .condition_expression("attribute_not_exists(#key)")
            .expression_attribute_names("#key", KEY)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(error) => Err(storage_error("put_item", &error)),
        }
    }
}

#[async_trait]
impl AccountStore for DynamoAccountStore {
    async fn get(&self, account_name: &str) -> Result<Option<Account>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(KEY, AttributeValue::S(account_name.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| storage_error("get_item", &error))?;

        output.item.as_ref().map(account_from_item).transpose()
    }

    async fn put(&self, account: &Account) -> Result<()> {
        if self.insert(account).await? {
            Ok(())
        } else {
            Err(Error::AlreadyExists {
                account_name: account.account_name.clone(),
            })
        }
    }

    async fn put_if_absent(&self, account: &Account) -> Result<bool> {
        self.insert(account).await
    }

    async fn conditional_update(
        &self,
        account_name: &str,
        precondition: &Precondition,
        mutation: &AccountMutation,
    ) -> Result<UpdateOutcome> {
        check_mutation(account_name, precondition, mutation)?;

        let mut expression = Expression::default();
        let Some(update) = expression.update(mutation) else {
            return Ok(match self.get(account_name).await? {
                None => UpdateOutcome::NotFound,
                Some(account) if precondition.holds(&account) => UpdateOutcome::Applied(account),
                Some(_) => UpdateOutcome::PreconditionFailed,
            });
        };
        let condition = expression.condition(precondition);

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(KEY, AttributeValue::S(account_name.to_string()))
            .update_expression(update)
            .condition_expression(condition)
            .set_expression_attribute_names(Some(expression.names))
            .set_expression_attribute_values(Some(expression.values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => {
                let item = output.attributes.ok_or_else(|| {
                    Error::storage(format!("update_item returned no image for {account_name}"))
                })?;
                Ok(UpdateOutcome::Applied(account_from_item(&item)?))
            }
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_conditional_check_failed_exception()) =>
            {
                debug!(
                    component = "dynamo_store",
                    event = "condition_failed",
                    account_name,
                );
                match self.get(account_name).await? {
                    Some(_) => Ok(UpdateOutcome::PreconditionFailed),
                    None => Ok(UpdateOutcome::NotFound),
                }
            }
            Err(error) => Err(storage_error("update_item", &error)),
        }
    }

    async fn query_by_status(
        &self,
        status: AccountStatus,
        options: &QueryOptions,
    ) -> Result<Page> {
        let start_key = options.start_after.as_ref().map(|cursor| {
            HashMap::from([
                (KEY.to_string(), AttributeValue::S(cursor.clone())),
                (STATUS.to_string(), AttributeValue::S(status.to_string())),
            ])
        });

        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(&self.status_index)
            .key_condition_expression("#status = :status")
            .expression_attribute_names("#status", STATUS)
            .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
            .scan_index_forward(options.order == QueryOrder::Ascending)
            .set_limit(options.limit.map(|limit| limit.min(i32::MAX as usize) as i32))
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|error| storage_error("query", &error))?;

        let items = output
            .items
            .unwrap_or_default()
            .iter()
            .map(account_from_item)
            .collect::<Result<Vec<_>>>()?;
        let next = output
            .last_evaluated_key
            .and_then(|key| key.get(KEY).and_then(|value| value.as_s().ok()).cloned());

        Ok(Page { items, next })
    }

    async fn count_by_status(&self, status: AccountStatus) -> Result<usize> {
        let mut total = 0usize;
        let mut start_key = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table)
                .index_name(&self.status_index)
                .key_condition_expression("#status = :status")
                .expression_attribute_names("#status", STATUS)
                .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
                .select(Select::Count)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|error| storage_error("query", &error))?;

            total += usize::try_from(output.count).unwrap_or_default();
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => return Ok(total),
            }
        }
    }
}

/// Placeholder maps for one update or condition expression.
#[derive(Default)]
struct Expression {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Expression {
    fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#{attribute}");
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, key: &str, value: AttributeValue) -> String {
        let placeholder = format!(":{key}");
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// `SET` and `REMOVE` clauses for the mutation, or `None` when it writes
    /// nothing.
    fn update(&mut self, mutation: &AccountMutation) -> Option<String> {
        let mut writes: Vec<(&str, AttributeValue)> = Vec::new();
        if let Some(status) = mutation.status {
            writes.push((STATUS, AttributeValue::S(status.to_string())));
        }
        if let Some(account_id) = &mutation.account_id {
            writes.push(("account_id", AttributeValue::S(account_id.clone())));
        }
        if let Some(password) = &mutation.password {
            writes.push(("password", AttributeValue::S(password.clone())));
        }
        for (field, at) in &mutation.timestamps {
            writes.push((field.attribute_name(), AttributeValue::S(at.to_rfc3339())));
        }
        if let Some(message) = &mutation.error_message {
            writes.push(("error_message", AttributeValue::S(message.clone())));
        }

        let mut clauses = Vec::new();
        if !writes.is_empty() {
            let assignments: Vec<String> = writes
                .into_iter()
                .map(|(attribute, value)| {
                    let name = self.name(attribute);
                    let value = self.value(&format!("new_{attribute}"), value);
                    format!("{name} = {value}")
                })
                .collect();
            clauses.push(format!("SET {}", assignments.join(", ")));
        }
        if !mutation.cleared.is_empty() {
            let removals: Vec<String> = mutation
                .cleared
                .iter()
                .map(|field| self.name(field.attribute_name()))
                .collect();
            clauses.push(format!("REMOVE {}", removals.join(", ")));
        }

        (!clauses.is_empty()).then(|| clauses.join(" "))
    }

    fn condition(&mut self, precondition: &Precondition) -> String {
        let key = self.name(KEY);
        let mut clauses = vec![format!("attribute_exists({key})")];
        if let Some(expected) = precondition.expected_status {
            let name = self.name(STATUS);
            let value = self.value("expected_status", AttributeValue::S(expected.to_string()));
            clauses.push(format!("{name} = {value}"));
        }
        for field in &precondition.absent {
            let name = self.name(field.attribute_name());
            clauses.push(format!("attribute_not_exists({name})"));
        }
        clauses.join(" AND ")
    }
}

fn storage_error<E>(operation: &str, error: &E) -> Error
where
    E: std::error::Error,
{
    Error::storage(format!("{operation} failed: {}", DisplayErrorContext(error)))
}

pub fn account_to_item(account: &Account) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        (KEY.to_string(), AttributeValue::S(account.account_name.clone())),
        (
            "account_email".to_string(),
            AttributeValue::S(account.account_email.clone()),
        ),
        (
            STATUS.to_string(),
            AttributeValue::S(account.account_status.to_string()),
        ),
    ]);
    if let Some(account_id) = &account.account_id {
        item.insert("account_id".into(), AttributeValue::S(account_id.clone()));
    }
    if let Some(password) = &account.password {
        item.insert("password".into(), AttributeValue::S(password.clone()));
    }
    for field in TimestampField::ALL {
        if let Some(at) = account.timestamp(field) {
            item.insert(
                field.attribute_name().to_string(),
                AttributeValue::S(at.to_rfc3339()),
            );
        }
    }
    if let Some(message) = &account.error_message {
        item.insert("error_message".into(), AttributeValue::S(message.clone()));
    }
    item
}

pub fn account_from_item(item: &HashMap<String, AttributeValue>) -> Result<Account> {
    decode_account(|name| item.get(name).and_then(|value| value.as_s().ok()).cloned())
}

/// Rebuilds an account from string attributes looked up by name.
///
/// Shared by table reads and stream images, which carry the same attributes
/// in different envelopes.
pub(crate) fn decode_account<F>(attribute: F) -> Result<Account>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |name: &str| {
        attribute(name).ok_or_else(|| Error::storage(format!("record is missing {name}")))
    };

    let mut account = Account::new(
        required(KEY)?,
        required("account_email")?,
        required(STATUS)?.parse()?,
    );
    account.account_id = attribute("account_id");
    account.password = attribute("password");
    account.error_message = attribute("error_message");
    for field in TimestampField::ALL {
        if let Some(raw) = attribute(field.attribute_name()) {
            account.set_timestamp(field, parse_timestamp(field, &raw)?);
        }
    }
    Ok(account)
}

fn parse_timestamp(field: TimestampField, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| {
            Error::storage(format!(
                "{} '{raw}' is not an RFC 3339 timestamp: {error}",
                field.attribute_name()
            ))
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample() -> Account {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().expect("valid date");
        Account::new("ovm-abc", "test+abc@example.com", AccountStatus::Vended)
            .with_account_id("123456789012")
            .with_timestamp(TimestampField::VendingDate, at)
    }

    #[test]
    fn item_carries_only_present_attributes() {
        let item = account_to_item(&sample());

        assert_eq!(item[STATUS].as_s().ok().map(String::as_str), Some("VENDED"));
        assert_eq!(
            item["vending_date"].as_s().ok().map(String::as_str),
            Some("2024-05-01T08:00:00+00:00")
        );
        assert!(!item.contains_key("burial_date"));
        assert!(!item.contains_key("password"));
        assert_eq!(account_from_item(&item).expect("decode"), sample());
    }

    #[test]
    fn decoding_rejects_unknown_status_and_bad_timestamps() {
        let mut item = account_to_item(&sample());
        item.insert(STATUS.into(), AttributeValue::S("ZOMBIE".into()));
        assert!(account_from_item(&item).is_err());

        let mut item = account_to_item(&sample());
        item.insert("burial_date".into(), AttributeValue::S("yesterday".into()));
        let error = account_from_item(&item).expect_err("bad timestamp");
        assert!(error.to_string().contains("burial_date"));
    }

    #[test]
    fn update_expression_sets_every_mutated_attribute() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).single().expect("valid date");
        let mutation = AccountMutation::transition(AccountStatus::Buried)
            .with_timestamp(TimestampField::BurialDate, at);
        let mut expression = Expression::default();

        let update = expression.update(&mutation).expect("non-empty update");
        let condition = expression.condition(
            &Precondition::status(AccountStatus::Vended).and_absent(TimestampField::BurialDate),
        );

        assert_eq!(
            update,
            "SET #account_status = :new_account_status, #burial_date = :new_burial_date"
        );
        assert_eq!(
            condition,
            "attribute_exists(#account_name) AND #account_status = :expected_status \
             AND attribute_not_exists(#burial_date)"
        );
        assert_eq!(
            expression.values[":expected_status"].as_s().ok().map(String::as_str),
            Some("VENDED")
        );
        assert_eq!(expression.names["#burial_date"], "burial_date");
    }

    #[test]
    fn released_claim_is_removed_alongside_the_set_clause() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).single().expect("valid date");
        let mutation = AccountMutation::annotate()
            .with_timestamp(TimestampField::RequestedDate, at)
            .without_timestamp(TimestampField::ProvisioningStartedDate);
        let mut expression = Expression::default();

        let update = expression.update(&mutation).expect("non-empty update");

        assert_eq!(
            update,
            "SET #requested_date = :new_requested_date REMOVE #provisioning_started_date"
        );
        assert_eq!(
            expression.names["#provisioning_started_date"],
            "provisioning_started_date"
        );
    }

    #[test]
    fn empty_mutation_has_no_update_clause() {
        let mut expression = Expression::default();
        assert!(expression.update(&AccountMutation::annotate()).is_none());
    }
}
