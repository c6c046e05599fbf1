//! Environment creation through the environment-management CLI

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::config::ToolSettings;
use crate::credentials::CredentialProvider;
use crate::error::ProvisionError;
use crate::events::{EventPublisher, ProvisionEvent};
use crate::model::EnvironmentDescriptor;
use crate::process::ProcessRunner;
use crate::queue::EnvironmentProvisioner;
use crate::source::shell_quote;

/// JSON envelope printed by the CLI with `--json`.
#[derive(Debug, Deserialize)]
struct CliResponse {
    status: i64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl CliResponse {
    fn parse(command: &str, stdout: &str) -> Result<Self, ProvisionError> {
        serde_json::from_str(stdout.trim()).map_err(|e| ProvisionError::MalformedOutput {
            command: command.to_string(),
            message: e.to_string(),
        })
    }

    /// The `result` object of a successful response.
    fn into_result(self) -> Result<Value, ProvisionError> {
        if self.status != 0 {
            return Err(ProvisionError::Rejected {
                message: self
                    .message
                    .unwrap_or_else(|| format!("command returned status {}", self.status)),
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

fn cli_failure_message(stdout: &str) -> Option<String> {
    serde_json::from_str::<CliResponse>(stdout.trim())
        .ok()
        .and_then(|response| response.message)
        .filter(|message| !message.trim().is_empty())
}

fn required_str(result: &Value, field: &str, command: &str) -> Result<String, ProvisionError> {
    result
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::MalformedOutput {
            command: command.to_string(),
            message: format!("missing result.{}", field),
        })
}

/// Creates environments by shelling out to the CLI.
pub struct CliEnvironmentProvisioner {
    settings: ToolSettings,
    runner: Arc<dyn ProcessRunner>,
    credentials: Arc<dyn CredentialProvider>,
    events: Arc<dyn EventPublisher>,
}

impl CliEnvironmentProvisioner {
    pub fn new(
        settings: ToolSettings,
        runner: Arc<dyn ProcessRunner>,
        credentials: Arc<dyn CredentialProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            settings,
            runner,
            credentials,
            events,
        }
    }

    pub fn create_command(&self, workspace: &Path) -> String {
        let definition = workspace.join(&self.settings.definition_file);
        format!(
            "{} org create scratch --definition-file {} --duration-days {} --alias {} --set-default --json",
            self.settings.binary,
            shell_quote(&definition.to_string_lossy()),
            self.settings.duration_days,
            shell_quote(&self.settings.alias),
        )
    }

    pub fn login_url_command(&self, username: &str) -> String {
        format!(
            "{} org open {} {} --url-only --json",
            self.settings.binary,
            self.settings.target_flag,
            shell_quote(username),
        )
    }

    async fn resolve_login_url(&self, username: &str) -> Result<String, ProvisionError> {
        let command = self.login_url_command(username);
        let output = self
            .runner
            .run(&command, None)
            .await
            .map_err(ProvisionError::LoginUrl)?;
        let result = CliResponse::parse(&command, &output.stdout)?.into_result()?;
        required_str(&result, "url", &command)
    }

    async fn create_inner(&self, workspace: &Path) -> Result<EnvironmentDescriptor, ProvisionError> {
        let credential = self.credentials.acquire().await?;

        let command = self.create_command(workspace);
        let output = match self.runner.run(&command, None).await {
            Ok(output) => output,
            Err(e) => {
                // With --json a failing CLI still prints an envelope naming the cause.
                return Err(match cli_failure_message(e.captured_stdout()) {
                    Some(message) => ProvisionError::Rejected { message },
                    None => ProvisionError::Command(e),
                });
            }
        };

        let result = CliResponse::parse(&command, &output.stdout)?.into_result()?;
        let username = required_str(&result, "username", &command)?;
        let environment_id = required_str(&result, "orgId", &command)?;
        let login_url = self.resolve_login_url(&username).await?;

        let descriptor = EnvironmentDescriptor {
            environment_id,
            username,
            login_url,
        };

        self.events
            .publish(ProvisionEvent::environment_created(
                &descriptor,
                &credential.principal,
            ))
            .await;

        Ok(descriptor)
    }
}

#[async_trait]
impl EnvironmentProvisioner for CliEnvironmentProvisioner {
    async fn create(&self, workspace: &Path) -> Result<EnvironmentDescriptor, ProvisionError> {
        match self.create_inner(workspace).await {
            Ok(descriptor) => {
                info!(
                    environment_id = %descriptor.environment_id,
                    username = %descriptor.username,
                    "environment created"
                );
                Ok(descriptor)
            }
            Err(e) => {
                error!(workspace = %workspace.display(), error = %e, "environment creation failed");
                Err(e)
            }
        }
    }
}
