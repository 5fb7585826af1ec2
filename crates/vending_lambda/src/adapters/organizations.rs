//! AWS Organizations client that runs each call under an assumed role.
//!
//! Management calls assume the configured management role. Member calls
//! assume `arn:aws:iam::{account_id}:role/{member_role_name}` inside the
//! target account. Assumed credentials are cached per role until shortly
//! before they expire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_organizations::config::Credentials;
use aws_sdk_organizations::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_organizations::operation::close_account::CloseAccountError;
use aws_sdk_organizations::types::{HandshakeParty, HandshakePartyType};
use tracing::debug;
use vending_core::contract::cross_account_role_arn;
use vending_core::provider::{
    Handshake, OrganizationMember, OrganizationsApi, ProviderError, ProviderRole,
};

const SESSION_NAME: &str = "account-vending";
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const UNKNOWN_CODE: &str = "Unknown";

struct CachedClient {
    client: aws_sdk_organizations::Client,
    expires_at: Option<SystemTime>,
}

pub struct AssumedRoleOrganizations {
    sdk_config: SdkConfig,
    sts: aws_sdk_sts::Client,
    management_role_arn: String,
    member_role_name: String,
    clients: Mutex<HashMap<String, CachedClient>>,
}

impl AssumedRoleOrganizations {
    pub fn new(
        sdk_config: &SdkConfig,
        management_role_arn: impl Into<String>,
        member_role_name: impl Into<String>,
    ) -> Self {
        Self {
            sdk_config: sdk_config.clone(),
            sts: aws_sdk_sts::Client::new(sdk_config),
            management_role_arn: management_role_arn.into(),
            member_role_name: member_role_name.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn role_arn(&self, role: &ProviderRole) -> String {
        match role {
            ProviderRole::Management => self.management_role_arn.clone(),
            ProviderRole::Member { account_id } => {
                cross_account_role_arn(account_id, &self.member_role_name)
            }
        }
    }

    fn cached(&self, role_arn: &str) -> Option<aws_sdk_organizations::Client> {
        let clients = self.clients.lock().ok()?;
        let cached = clients.get(role_arn)?;
        let fresh = cached
            .expires_at
            .map_or(true, |at| at > SystemTime::now() + REFRESH_MARGIN);
        fresh.then(|| cached.client.clone())
    }

    async fn client(
        &self,
        role: &ProviderRole,
    ) -> Result<aws_sdk_organizations::Client, ProviderError> {
        let role_arn = self.role_arn(role);
        if let Some(client) = self.cached(&role_arn) {
            return Ok(client);
        }

        let output = self
            .sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(SESSION_NAME)
            .send()
            .await
            .map_err(|error| provider_error(&error))?;
        let credentials = output.credentials.ok_or_else(|| {
            ProviderError::new(
                UNKNOWN_CODE,
                format!("assume_role returned no credentials for {role_arn}"),
            )
        })?;
        let expires_at = SystemTime::try_from(credentials.expiration).ok();

        let config = aws_sdk_organizations::config::Builder::from(&self.sdk_config)
            .credentials_provider(Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key,
                Some(credentials.session_token),
                expires_at,
                "sts-assume-role",
            ))
            .build();
        let client = aws_sdk_organizations::Client::from_conf(config);
        debug!(component = "organizations", event = "role_assumed", role = %role);

        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(
                role_arn,
                CachedClient {
                    client: client.clone(),
                    expires_at,
                },
            );
        }
        Ok(client)
    }
}

#[async_trait]
impl OrganizationsApi for AssumedRoleOrganizations {
    async fn invite_account(
        &self,
        role: &ProviderRole,
        email: &str,
        notes: &str,
    ) -> Result<Handshake, ProviderError> {
        let target = HandshakeParty::builder()
            .id(email)
            .r#type(HandshakePartyType::Email)
            .build()
            .map_err(|error| ProviderError::new(UNKNOWN_CODE, error.to_string()))?;

        let output = self
            .client(role)
            .await?
            .invite_account_to_organization()
            .target(target)
            .notes(notes)
            .send()
            .await
            .map_err(|error| provider_error(&error))?;

        output
            .handshake
            .as_ref()
            .and_then(handshake)
            .ok_or_else(|| ProviderError::new(UNKNOWN_CODE, "invite returned no handshake"))
    }

    async fn list_handshakes_for_account(
        &self,
        role: &ProviderRole,
    ) -> Result<Vec<Handshake>, ProviderError> {
        let client = self.client(role).await?;
        let mut handshakes = Vec::new();
        let mut next_token = None;
        loop {
            let output = client
                .list_handshakes_for_account()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|error| provider_error(&error))?;
            handshakes.extend(output.handshakes().iter().filter_map(handshake));
            next_token = output.next_token;
            if next_token.is_none() {
                return Ok(handshakes);
            }
        }
    }

    async fn accept_handshake(
        &self,
        role: &ProviderRole,
        handshake_id: &str,
    ) -> Result<(), ProviderError> {
        self.client(role)
            .await?
            .accept_handshake()
            .handshake_id(handshake_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| provider_error(&error))
    }

    async fn list_parents(
        &self,
        role: &ProviderRole,
        account_id: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let output = self
            .client(role)
            .await?
            .list_parents()
            .child_id(account_id)
            .send()
            .await
            .map_err(|error| provider_error(&error))?;

        Ok(output
            .parents()
            .iter()
            .filter_map(|parent| parent.id().map(str::to_string))
            .collect())
    }

    async fn move_account(
        &self,
        role: &ProviderRole,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> Result<(), ProviderError> {
        self.client(role)
            .await?
            .move_account()
            .account_id(account_id)
            .source_parent_id(source_parent_id)
            .destination_parent_id(destination_parent_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| provider_error(&error))
    }

    async fn close_account(
        &self,
        role: &ProviderRole,
        account_id: &str,
    ) -> Result<(), ProviderError> {
        let result = self
            .client(role)
            .await?
            .close_account()
            .account_id(account_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                let reason = match error.as_service_error() {
                    Some(CloseAccountError::ConstraintViolationException(violation)) => violation
                        .reason()
                        .map(|reason| reason.as_str().to_string()),
                    _ => None,
                };
                let mapped = provider_error(&error);
                Err(match reason {
                    Some(reason) => mapped.with_reason(reason),
                    None => mapped,
                })
            }
        }
    }

    async fn list_accounts(
        &self,
        role: &ProviderRole,
    ) -> Result<Vec<OrganizationMember>, ProviderError> {
        let client = self.client(role).await?;
        let mut members = Vec::new();
        let mut next_token = None;
        loop {
            let output = client
                .list_accounts()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|error| provider_error(&error))?;
            members.extend(output.accounts().iter().filter_map(|account| {
                Some(OrganizationMember {
                    id: account.id()?.to_string(),
                    status: account
                        .status()
                        .map(|status| status.as_str().to_string())
                        .unwrap_or_default(),
                })
            }));
            next_token = output.next_token;
            if next_token.is_none() {
                return Ok(members);
            }
        }
    }
}

fn handshake(handshake: &aws_sdk_organizations::types::Handshake) -> Option<Handshake> {
    Some(Handshake {
        id: handshake.id()?.to_string(),
        state: handshake.state().map(|state| state.as_str().to_string()),
    })
}

/// Maps an SDK failure to the provider error taxonomy by its error code.
fn provider_error<E>(error: &E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let code = error.code().unwrap_or(UNKNOWN_CODE);
    let message = error
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(error).to_string());
    ProviderError::new(code, message)
}
