//! Credential handling.
//!
//! Credentials live in process memory for the run's duration only, wrapped
//! in `SecretString` so they never leak through `Debug` or serialization.
//! Two providers: environment variables for local runs, and a JSON secret
//! document fetched from a secrets endpoint for managed deployments.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::CredentialError;

/// Portal account credentials.
///
/// Exposed only at two call sites: keyboard injection and error redaction.
pub struct Credentials {
    pub username: SecretString,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: SecretString::from(username.into()),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"[redacted]")
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Supplies account credentials on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, secret_id: &str) -> Result<Credentials, CredentialError>;
}

/// Reads credentials from environment variables (local runs).
pub struct EnvCredentialProvider {
    username_var: String,
    password_var: String,
}

impl EnvCredentialProvider {
    pub fn new(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("MAIL_CAPTURE_USERNAME", "MAIL_CAPTURE_PASSWORD")
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_credentials(&self, secret_id: &str) -> Result<Credentials, CredentialError> {
        let username = std::env::var(&self.username_var).map_err(|_| {
            CredentialError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: format!("{} not set", self.username_var),
            }
        })?;
        let password = std::env::var(&self.password_var).map_err(|_| {
            CredentialError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: format!("{} not set", self.password_var),
            }
        })?;
        Ok(Credentials::new(username, password))
    }
}

/// JSON secret document shape served by the secrets endpoint.
#[derive(Deserialize)]
struct SecretDocument {
    username: SecretString,
    password: SecretString,
}

/// Fetches credentials from a secrets endpoint (`GET {base}/{secret_id}`).
pub struct HttpCredentialProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCredentialProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn secret_url(&self, secret_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), secret_id)
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn get_credentials(&self, secret_id: &str) -> Result<Credentials, CredentialError> {
        let response = self
            .client
            .get(self.secret_url(secret_id))
            .send()
            .await
            .map_err(|e| CredentialError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CredentialError::SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: format!("secrets endpoint returned {}", response.status()),
            });
        }

        let document: SecretDocument =
            response
                .json()
                .await
                .map_err(|e| CredentialError::Malformed {
                    secret_id: secret_id.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Credentials {
            username: document.username,
            password: document.password,
        })
    }
}
