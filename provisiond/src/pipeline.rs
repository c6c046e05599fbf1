//! Post-provision steps: policy patching and init-script execution

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{PipelineSettings, ToolSettings};
use crate::error::PostProvisionError;
use crate::events::{CommandStatus, EventPublisher, ProvisionEvent};
use crate::model::InitCommand;
use crate::process::ProcessRunner;

static USER_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<user>)[^<]*(</user>)").expect("valid user regex"));
static EXECUTION_USER_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(<executionUser>)[^<]*(</executionUser>)").expect("valid executionUser regex")
});

/// Outcome of patching the policy directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Replace the text of every `<user>` and `<executionUser>` element.
pub fn patch_identity_fields(content: &str, username: &str) -> String {
    let replacement = format!("${{1}}{}${{2}}", username.replace('$', "$$"));
    let patched = USER_FIELD.replace_all(content, replacement.as_str());
    EXECUTION_USER_FIELD
        .replace_all(&patched, replacement.as_str())
        .into_owned()
}

/// Rewrite one policy file in place; returns whether it changed.
async fn patch_policy_file(path: &Path, username: &str) -> std::io::Result<bool> {
    let content = tokio::fs::read_to_string(path).await?;
    let patched = patch_identity_fields(&content, username);
    if patched == content {
        return Ok(false);
    }
    tokio::fs::write(path, patched).await?;
    Ok(true)
}

/// Which lines target the environment tool and how they get bound to one.
#[derive(Debug, Clone)]
pub struct CommandRewriter {
    tool: String,
    target_flag: String,
    short_target_flag: Option<String>,
}

impl CommandRewriter {
    pub fn new(
        tool: impl Into<String>,
        target_flag: impl Into<String>,
        short_target_flag: Option<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            target_flag: target_flag.into(),
            short_target_flag,
        }
    }

    pub fn from_settings(settings: &ToolSettings) -> Self {
        Self::new(
            settings.binary.clone(),
            settings.target_flag.clone(),
            settings.short_target_flag.clone(),
        )
    }

    fn invokes_tool(&self, line: &str) -> bool {
        line.split_whitespace().next() == Some(self.tool.as_str())
    }

    fn has_target(&self, line: &str) -> bool {
        let long_assign = format!("{}=", self.target_flag);
        line.split_whitespace().any(|token| {
            token == self.target_flag
                || token.starts_with(&long_assign)
                || self.short_target_flag.as_deref() == Some(token)
        })
    }

    /// Bind `line` to `username` unless it already names a target.
    pub fn rewrite(&self, line: &str, username: &str) -> (String, bool) {
        if self.invokes_tool(line) && !self.has_target(line) {
            (format!("{} {} {}", line, self.target_flag, username), true)
        } else {
            (line.to_string(), false)
        }
    }

    /// Executable commands from an init script, in source order.
    pub fn parse_script(&self, script: &str, username: &str) -> Vec<InitCommand> {
        script
            .lines()
            .enumerate()
            .filter_map(|(index, raw)| {
                let line = raw.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (command, rewritten) = self.rewrite(line, username);
                Some(InitCommand {
                    line: index + 1,
                    command,
                    rewritten,
                })
            })
            .collect()
    }
}

/// Runs the steps that follow a successful environment creation.
pub struct PostProvisionPipeline {
    settings: PipelineSettings,
    rewriter: CommandRewriter,
    runner: Arc<dyn ProcessRunner>,
    events: Arc<dyn EventPublisher>,
}

impl PostProvisionPipeline {
    pub fn new(
        settings: PipelineSettings,
        rewriter: CommandRewriter,
        runner: Arc<dyn ProcessRunner>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            settings,
            rewriter,
            runner,
            events,
        }
    }

    /// Point every policy file at `username`. Never fails; problems are logged.
    pub async fn patch_policies(&self, workspace: &Path, username: &str) -> PatchSummary {
        let dir = workspace.join(&self.settings.policy_dir);
        let mut summary = PatchSummary::default();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %dir.display(), "no policy directory; skipping update");
                return summary;
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read policy directory; continuing");
                return summary;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "policy directory listing failed; continuing");
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(&self.settings.policy_suffix) {
                continue;
            }
            summary.scanned += 1;

            match patch_policy_file(&entry.path(), username).await {
                Ok(true) => {
                    info!(file = %name, %username, "policy file updated");
                    summary.updated += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to update policy file; continuing");
                    summary.failed += 1;
                }
            }
        }

        if summary.updated == 0 {
            info!(dir = %dir.display(), "no policy files needed updating");
        } else {
            info!(updated = summary.updated, "policy files updated");
        }
        summary
    }

    /// Run the init script against the new environment, stopping at the
    /// first failing command.
    pub async fn run_init_script(
        &self,
        workspace: &Path,
        record_id: &str,
        username: &str,
    ) -> Result<Vec<InitCommand>, PostProvisionError> {
        let script_path = workspace.join(&self.settings.init_script);
        let script = tokio::fs::read_to_string(&script_path)
            .await
            .map_err(|source| PostProvisionError::ScriptUnreadable {
                script: self.settings.init_script.clone(),
                source,
            })?;

        let commands = self.rewriter.parse_script(&script, username);
        info!(%record_id, count = commands.len(), "running init script");

        for init in &commands {
            match self.runner.run(&init.command, Some(workspace)).await {
                Ok(output) => {
                    self.events
                        .publish(ProvisionEvent::init_command(
                            record_id,
                            &init.command,
                            CommandStatus::Completed,
                            &output.stdout,
                            &output.stderr,
                        ))
                        .await;
                    info!(%record_id, line = init.line, command = %init.command, "init command succeeded");
                }
                Err(source) => {
                    self.events
                        .publish(ProvisionEvent::init_command(
                            record_id,
                            &init.command,
                            CommandStatus::Error,
                            source.captured_stdout(),
                            &source.to_string(),
                        ))
                        .await;
                    warn!(%record_id, line = init.line, command = %init.command, error = %source, "init command failed");
                    return Err(PostProvisionError::CommandFailed {
                        command: init.command.clone(),
                        source,
                    });
                }
            }
        }

        info!(%record_id, "all init commands executed");
        Ok(commands)
    }
}
