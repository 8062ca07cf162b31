//! OAuth credentials for the Salesforce identity provider
//!
//! A call to [`CredentialProvider::get_token`] performs, in order:
//! - client-credentials grant → core access token + instance URL
//! - user-info lookup → user id
//! - optional token exchange → tenant token + tenant instance URL (Data Cloud)
//!
//! Nothing is cached between calls and nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AuthSettings;
use crate::error::{MemdcError, Result};
use crate::http::{self, str_field};

/// Grant type of the Data Cloud token exchange
pub const TENANT_GRANT_TYPE: &str = "urn:salesforce:grant-type:external:cdp";

/// Token type of the exchanged subject token
pub const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Tenant-scoped credential used for warehouse ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub token: String,
    pub instance_url: String,
}

/// Credentials resolved by one authentication round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub access_token: String,
    pub instance_url: String,
    pub user_id: String,
    pub tenant: Option<TenantCredentials>,
}

impl AuthResult {
    /// Core credentials only, no tenant exchange
    pub fn new(
        access_token: impl Into<String>,
        instance_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            instance_url: instance_url.into(),
            user_id: user_id.into(),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, token: impl Into<String>, instance_url: impl Into<String>) -> Self {
        self.tenant = Some(TenantCredentials {
            token: token.into(),
            instance_url: instance_url.into(),
        });
        self
    }
}

/// Source of upstream credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self) -> Result<AuthResult>;
}

/// reqwest-based client for the Salesforce OAuth endpoints
pub struct AuthClient {
    client: reqwest::Client,
    settings: AuthSettings,
}

impl AuthClient {
    pub fn new(settings: AuthSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            settings,
        })
    }

    fn base_url(&self) -> Result<String> {
        self.settings
            .base_url
            .as_deref()
            .map(|b| b.trim().trim_end_matches('/'))
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                MemdcError::Config("SALESFORCE_BASE_URL must be set in environment".to_string())
            })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (
            self.settings.client_id.as_deref(),
            self.settings.client_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
            _ => Err(MemdcError::Config(
                "CLIENT_ID and CLIENT_SECRET must be set in environment".to_string(),
            )),
        }
    }

    /// Client-credentials grant; returns (access token, instance URL)
    async fn request_token(&self) -> Result<(String, String)> {
        let url = format!("{}/services/oauth2/token", self.base_url()?);
        let (client_id, client_secret) = self.credentials()?;

        debug!(url = %url, grant_type = %self.settings.grant_type, "Requesting access token");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", self.settings.grant_type.as_str()),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        let body = http::read_json(http::ensure_success(response).await?, "Token endpoint").await?;
        let access_token = str_field(&body, "access_token");
        let instance_url = str_field(&body, "instance_url");
        match (access_token, instance_url) {
            (Some(token), Some(instance)) => Ok((token.to_string(), instance.to_string())),
            _ => Err(MemdcError::UpstreamProtocol(
                "Token response missing access_token or instance_url".to_string(),
            )),
        }
    }

    async fn fetch_user_id(&self, access_token: &str, instance_url: &str) -> Result<String> {
        let url = format!(
            "{}/services/oauth2/userinfo",
            instance_url.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let body = http::read_json(http::ensure_success(response).await?, "User-info endpoint").await?;
        str_field(&body, "user_id")
            .map(str::to_string)
            .ok_or_else(|| {
                MemdcError::UpstreamProtocol("User-info response missing user_id".to_string())
            })
    }

    async fn exchange_tenant_token(
        &self,
        access_token: &str,
        instance_url: &str,
    ) -> Result<TenantCredentials> {
        let url = format!("{}/services/a360/token", instance_url.trim_end_matches('/'));

        debug!(url = %url, "Exchanging for Data Cloud tenant token");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", TENANT_GRANT_TYPE),
                ("subject_token", access_token),
                ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ])
            .send()
            .await?;

        let body = http::read_json(http::ensure_success(response).await?, "Token exchange").await?;
        match (
            str_field(&body, "access_token"),
            str_field(&body, "instance_url"),
        ) {
            (Some(token), Some(instance)) => Ok(TenantCredentials {
                token: token.to_string(),
                instance_url: instance.to_string(),
            }),
            _ => Err(MemdcError::UpstreamProtocol(
                "Token exchange response missing access_token or instance_url".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CredentialProvider for AuthClient {
    async fn get_token(&self) -> Result<AuthResult> {
        let (access_token, instance_url) = self.request_token().await?;
        let user_id = self.fetch_user_id(&access_token, &instance_url).await?;

        let tenant = if self.settings.tenant_exchange {
            Some(self.exchange_tenant_token(&access_token, &instance_url).await?)
        } else {
            None
        };

        info!(
            user_id = %user_id,
            tenant = tenant.is_some(),
            "Authenticated with identity provider"
        );
        Ok(AuthResult {
            access_token,
            instance_url,
            user_id,
            tenant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: Option<&str>, id: Option<&str>) -> AuthSettings {
        AuthSettings {
            base_url: base_url.map(String::from),
            client_id: id.map(String::from),
            client_secret: Some("secret".to_string()),
            grant_type: "client_credentials".to_string(),
            tenant_exchange: true,
        }
    }

    #[tokio::test]
    async fn test_missing_base_url_is_config_error() {
        let client = AuthClient::new(settings(None, Some("id")), Duration::from_secs(1)).unwrap();
        assert!(matches!(client.get_token().await, Err(MemdcError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_client_id_is_config_error() {
        let client = AuthClient::new(
            settings(Some("https://login.example.com"), None),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(client.get_token().await, Err(MemdcError::Config(_))));
    }

    #[test]
    fn test_auth_result_builder() {
        let auth = AuthResult::new("tok", "https://x.my.salesforce.com", "005")
            .with_tenant("tenant-tok", "abc.c360a.salesforce.com");
        assert_eq!(auth.tenant.unwrap().instance_url, "abc.c360a.salesforce.com");
    }
}
