//! Credential acquisition for the environment platform

use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use tracing::debug;

const PRINCIPAL_ENV: &str = "PROVISIOND_PRINCIPAL";
const ACCESS_TOKEN_ENV: &str = "PROVISIOND_ACCESS_TOKEN";
const INSTANCE_URL_ENV: &str = "PROVISIOND_INSTANCE_URL";

/// An authenticated session handle.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub principal: String,
    pub access_token: String,
    #[serde(default)]
    pub instance_url: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("access_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

/// Produces a credential; every call authenticates afresh.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AuthError>;
}

/// Reads a JSON credentials file, falling back to environment variables.
#[derive(Debug, Clone, Default)]
pub struct FileCredentialProvider {
    path: Option<PathBuf>,
}

impl FileCredentialProvider {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn from_env() -> Result<Credential, AuthError> {
        let principal = env::var(PRINCIPAL_ENV).ok().filter(|v| !v.trim().is_empty());
        let access_token = env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());

        match (principal, access_token) {
            (Some(principal), Some(access_token)) => Ok(Credential {
                principal,
                access_token,
                instance_url: env::var(INSTANCE_URL_ENV).ok(),
            }),
            _ => Err(AuthError::Missing {
                message: format!(
                    "set a credentials file or both {} and {}",
                    PRINCIPAL_ENV, ACCESS_TOKEN_ENV
                ),
            }),
        }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        let Some(path) = &self.path else {
            return Self::from_env();
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::Unreadable {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let credential: Credential =
            serde_json::from_str(&raw).map_err(|e| AuthError::Malformed {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if credential.principal.trim().is_empty() || credential.access_token.trim().is_empty() {
            return Err(AuthError::Malformed {
                path: path.clone(),
                message: "principal and accessToken must be non-empty".to_string(),
            });
        }

        debug!(principal = %credential.principal, "authenticated");
        Ok(credential)
    }
}
