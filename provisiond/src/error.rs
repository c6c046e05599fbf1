//! Error taxonomy for the provisioning pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Invalid service configuration, rejected before anything starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Queue capacity must be at least 1 (got {capacity})")]
    InvalidCapacity { capacity: usize },

    #[error("Setting '{field}' cannot be empty")]
    EmptySetting { field: &'static str },

    #[error("Setting '{field}' must be at most {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
}

/// Failure of a single external command.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with status {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },
}

impl ProcessError {
    /// Output captured before the command failed, if any.
    pub fn captured_stdout(&self) -> &str {
        match self {
            ProcessError::NonZeroExit { stdout, .. } => stdout,
            _ => "",
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No credentials configured: {message}")]
    Missing { message: String },

    #[error("Failed to read credentials file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("Credentials file {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to create workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: ProcessError,
    },
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Authentication failed before environment creation: {0}")]
    Auth(#[from] AuthError),

    #[error("Environment creation command failed: {0}")]
    Command(#[source] ProcessError),

    #[error("Login URL resolution failed: {0}")]
    LoginUrl(#[source] ProcessError),

    #[error("Malformed output from '{command}': {message}")]
    MalformedOutput { command: String, message: String },

    #[error("{message}")]
    Rejected { message: String },

    #[error("Provisioning task ended without a result")]
    Abandoned,
}

#[derive(Error, Debug)]
pub enum PostProvisionError {
    #[error("Error executing {script}: unable to read script: {source}")]
    ScriptUnreadable {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error executing init script: command `{command}` failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: ProcessError,
    },
}

#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("Failed to create tracking record: {message}")]
    Create { message: String },

    #[error("Tracking record {id} not found")]
    NotFound { id: String },

    #[error("Failed to update tracking record {id}: {message}")]
    Update { id: String, message: String },
}

/// Rejections surfaced synchronously to the intake caller.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Reporting(#[from] ReportingError),
}

/// Any failure that ends a request's lifecycle in the Error state.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    PostProvision(#[from] PostProvisionError),

    #[error(transparent)]
    Reporting(#[from] ReportingError),

    #[error("Pipeline task aborted: {message}")]
    Aborted { message: String },
}
