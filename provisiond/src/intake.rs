//! Request intake: validate, authenticate, record, hand off

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::credentials::CredentialProvider;
use crate::error::IntakeError;
use crate::model::ProvisionRequest;
use crate::orchestrator::Orchestrator;

/// An accepted request. The pipeline keeps running if `task` is dropped.
#[derive(Debug)]
pub struct Accepted {
    pub record_id: String,
    pub task: JoinHandle<ProvisionRequest>,
}

pub struct Intake {
    credentials: Arc<dyn CredentialProvider>,
    orchestrator: Orchestrator,
}

impl Intake {
    pub fn new(credentials: Arc<dyn CredentialProvider>, orchestrator: Orchestrator) -> Self {
        Self {
            credentials,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Accept `repo_url` for provisioning and return without waiting for it.
    pub async fn submit(&self, repo_url: Option<&str>) -> Result<Accepted, IntakeError> {
        let repo_url = validate_repo_url(repo_url)?;

        let credential = self.credentials.acquire().await?;
        let record_id = self.orchestrator.reporter().queued(repo_url).await?;
        info!(%record_id, repo = %repo_url, principal = %credential.principal, "provisioning request accepted");

        let request = self.orchestrator.request(&record_id, repo_url);
        let task = self.orchestrator.spawn(request);

        Ok(Accepted { record_id, task })
    }
}

/// Trimmed repository reference, or a validation error.
pub fn validate_repo_url(repo_url: Option<&str>) -> Result<&str, IntakeError> {
    let repo_url = repo_url.map(str::trim).unwrap_or_default();

    if repo_url.is_empty() {
        return Err(IntakeError::Validation {
            message: "GitHub repository URL is required".to_string(),
        });
    }
    if repo_url.starts_with('-') {
        return Err(IntakeError::Validation {
            message: "Repository URL must not start with '-'".to_string(),
        });
    }
    if repo_url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IntakeError::Validation {
            message: "Repository URL must not contain whitespace".to_string(),
        });
    }

    Ok(repo_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_repo_url() {
        assert_eq!(
            validate_repo_url(Some("  https://github.com/acme/app.git ")).unwrap(),
            "https://github.com/acme/app.git"
        );
        assert!(validate_repo_url(None).is_err());
        assert!(validate_repo_url(Some("   ")).is_err());
        assert!(validate_repo_url(Some("--upload-pack=evil")).is_err());
        assert!(validate_repo_url(Some("https://x/a b")).is_err());
    }

    #[test]
    fn test_missing_url_message() {
        let err = validate_repo_url(None).unwrap_err();
        assert_eq!(err.to_string(), "GitHub repository URL is required");
    }
}
