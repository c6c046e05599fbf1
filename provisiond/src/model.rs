//! Request lifecycle types shared across the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Local lifecycle state of a provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RequestStatus {
    Queued,
    Cloning,
    QueuedForProvision,
    Provisioning,
    PostProvisioning,
    Created,
    Error,
}

impl RequestStatus {
    fn rank(self) -> u8 {
        match self {
            RequestStatus::Queued => 0,
            RequestStatus::Cloning => 1,
            RequestStatus::QueuedForProvision => 2,
            RequestStatus::Provisioning => 3,
            RequestStatus::PostProvisioning => 4,
            RequestStatus::Created => 5,
            RequestStatus::Error => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Created | RequestStatus::Error)
    }

    /// Forward-only; Error is reachable from any non-terminal state.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RequestStatus::Error || next.rank() > self.rank()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Queued => "Queued",
            RequestStatus::Cloning => "Cloning",
            RequestStatus::QueuedForProvision => "QueuedForProvision",
            RequestStatus::Provisioning => "Provisioning",
            RequestStatus::PostProvisioning => "PostProvisioning",
            RequestStatus::Created => "Created",
            RequestStatus::Error => "Error",
        };
        f.write_str(label)
    }
}

/// One repository-to-environment request, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub record_id: String,
    pub repo_url: String,
    pub workspace: PathBuf,
    status: RequestStatus,
    error: Option<String>,
}

impl ProvisionRequest {
    pub fn new(
        record_id: impl Into<String>,
        repo_url: impl Into<String>,
        workspace: PathBuf,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            repo_url: repo_url.into(),
            workspace,
            status: RequestStatus::Queued,
            error: None,
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move to `next`; returns false and leaves the state untouched if the
    /// transition would go backwards or leave a terminal state.
    pub fn advance(&mut self, next: RequestStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.advance(RequestStatus::Error) {
            return false;
        }
        self.error = Some(message.into());
        true
    }
}

/// Result of a successful environment creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDescriptor {
    pub environment_id: String,
    pub username: String,
    pub login_url: String,
}

/// An executable line from the init script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommand {
    /// 1-based line number in the script.
    pub line: usize,
    pub command: String,
    pub rewritten: bool,
}
