use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use provisiond::config::PipelineSettings;
use provisiond::events::CommandStatus;
use provisiond::{
    CommandOutput, CommandRewriter, MemoryEventPublisher, PostProvisionError,
    PostProvisionPipeline, ProcessError, ProcessRunner, ProvisionEvent,
};
use tempfile::TempDir;

/// Records every command line; fails the ones containing `fail`.
#[derive(Default)]
struct RecordingRunner {
    executed: Mutex<Vec<(String, Option<PathBuf>)>>,
}

impl RecordingRunner {
    fn commands(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        command_line: &str,
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, ProcessError> {
        self.executed
            .lock()
            .unwrap()
            .push((command_line.to_string(), cwd.map(Path::to_path_buf)));

        if command_line.contains("fail") {
            return Err(ProcessError::NonZeroExit {
                command: command_line.to_string(),
                code: Some(1),
                stdout: "partial output".to_string(),
                stderr: "boom".to_string(),
            });
        }
        Ok(CommandOutput {
            stdout: format!("ran {command_line}"),
            stderr: String::new(),
        })
    }
}

struct Harness {
    workspace: TempDir,
    runner: Arc<RecordingRunner>,
    events: MemoryEventPublisher,
    pipeline: PostProvisionPipeline,
}

fn harness() -> Harness {
    let runner = Arc::new(RecordingRunner::default());
    let events = MemoryEventPublisher::new();
    let pipeline = PostProvisionPipeline::new(
        PipelineSettings::default(),
        CommandRewriter::new("tool", "--target-env", None),
        runner.clone(),
        Arc::new(events.clone()),
    );
    Harness {
        workspace: TempDir::new().unwrap(),
        runner,
        events,
        pipeline,
    }
}

fn write_script(workspace: &Path, body: &str) {
    std::fs::write(workspace.join("orgInit.sh"), body).unwrap();
}

#[tokio::test]
async fn init_script_binds_unbound_tool_commands_to_new_environment() {
    let h = harness();
    write_script(
        h.workspace.path(),
        "# note\n\ntool list\ntool push --target-env X\n",
    );

    let commands = h
        .pipeline
        .run_init_script(h.workspace.path(), "rec-1", "new-user")
        .await
        .unwrap();

    assert_eq!(
        h.runner.commands(),
        vec!["tool list --target-env new-user", "tool push --target-env X"]
    );
    assert_eq!(commands.len(), 2);
    assert!(commands[0].rewritten);
    assert!(!commands[1].rewritten);

    let cwd = h.runner.executed.lock().unwrap()[0].1.clone();
    assert_eq!(cwd.as_deref(), Some(h.workspace.path()));
}

#[tokio::test]
async fn first_failing_command_stops_the_script() {
    let h = harness();
    write_script(
        h.workspace.path(),
        "tool list\ntool fail-here\ntool never-runs\n",
    );

    let err = h
        .pipeline
        .run_init_script(h.workspace.path(), "rec-2", "u1")
        .await
        .unwrap_err();

    assert_eq!(
        h.runner.commands(),
        vec!["tool list --target-env u1", "tool fail-here --target-env u1"]
    );
    match &err {
        PostProvisionError::CommandFailed { command, .. } => {
            assert_eq!(command, "tool fail-here --target-env u1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("tool fail-here"));
    assert!(!message.contains("never-runs"));
    assert!(!message.contains("tool list"));

    let events = h.events.events();
    assert_eq!(events.len(), 2);
    match &events[1] {
        ProvisionEvent::InitCommand {
            record_id,
            status,
            output,
            ..
        } => {
            assert_eq!(record_id, "rec-2");
            assert_eq!(*status, CommandStatus::Error);
            assert_eq!(output, "partial output");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn missing_init_script_is_fatal() {
    let h = harness();

    let err = h
        .pipeline
        .run_init_script(h.workspace.path(), "rec-3", "u1")
        .await
        .unwrap_err();

    assert!(matches!(err, PostProvisionError::ScriptUnreadable { .. }));
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn policy_files_are_pointed_at_the_new_user() {
    let h = harness();
    let dir = h
        .workspace
        .path()
        .join("force-app/main/default/transactionSecurityPolicies");
    std::fs::create_dir_all(&dir).unwrap();

    let policy = dir.join("Block.transactionSecurityPolicy-meta.xml");
    std::fs::write(
        &policy,
        "<Policy><user>OLD</user><executionUser>OLD</executionUser></Policy>",
    )
    .unwrap();
    let untouched = dir.join("README.md");
    std::fs::write(&untouched, "<user>OLD</user>").unwrap();

    let summary = h.pipeline.patch_policies(h.workspace.path(), "NEW").await;

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        std::fs::read_to_string(&policy).unwrap(),
        "<Policy><user>NEW</user><executionUser>NEW</executionUser></Policy>"
    );
    assert_eq!(
        std::fs::read_to_string(&untouched).unwrap(),
        "<user>OLD</user>"
    );
}

#[tokio::test]
async fn unreadable_policy_file_does_not_stop_the_others() {
    let h = harness();
    let dir = h
        .workspace
        .path()
        .join("force-app/main/default/transactionSecurityPolicies");
    std::fs::create_dir_all(dir.join("Broken.transactionSecurityPolicy-meta.xml")).unwrap();
    let policy = dir.join("Valid.transactionSecurityPolicy-meta.xml");
    std::fs::write(&policy, "<executionUser>OLD</executionUser>").unwrap();

    let summary = h.pipeline.patch_policies(h.workspace.path(), "NEW").await;

    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(
        std::fs::read_to_string(&policy).unwrap(),
        "<executionUser>NEW</executionUser>"
    );
}

#[tokio::test]
async fn absent_policy_directory_changes_nothing() {
    let h = harness();

    let summary = h.pipeline.patch_policies(h.workspace.path(), "NEW").await;

    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.failed, 0);
}
