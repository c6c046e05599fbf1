//! Per-request lifecycle: fetch, provision, post-provision, report, clean up

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cleaner::WorkspaceCleaner;
use crate::error::PipelineError;
use crate::model::{ProvisionRequest, RequestStatus};
use crate::pipeline::PostProvisionPipeline;
use crate::queue::ProvisioningQueue;
use crate::reporter::StatusReporter;
use crate::source::SourceControlClient;

/// Drives requests from fetch to terminal status. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    workspace_root: PathBuf,
    fetcher: Arc<dyn SourceControlClient>,
    queue: ProvisioningQueue,
    pipeline: Arc<PostProvisionPipeline>,
    reporter: StatusReporter,
    cleaner: WorkspaceCleaner,
}

impl Orchestrator {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        fetcher: Arc<dyn SourceControlClient>,
        queue: ProvisioningQueue,
        pipeline: Arc<PostProvisionPipeline>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            fetcher,
            queue,
            pipeline,
            reporter,
            cleaner: WorkspaceCleaner,
        }
    }

    pub fn queue(&self) -> &ProvisioningQueue {
        &self.queue
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// A new request whose workspace is named after its record.
    pub fn request(&self, record_id: &str, repo_url: &str) -> ProvisionRequest {
        ProvisionRequest::new(
            record_id,
            repo_url,
            self.workspace_root.join(workspace_dir_name(record_id)),
        )
    }

    /// Run `request` in the background; the handle yields its final state.
    pub fn spawn(&self, request: ProvisionRequest) -> JoinHandle<ProvisionRequest> {
        let this = self.clone();
        tokio::spawn(async move { this.run(request).await })
    }

    /// Run `request` to a terminal state. The workspace is removed exactly
    /// once, after every stage has finished, whatever the outcome.
    pub async fn run(&self, mut request: ProvisionRequest) -> ProvisionRequest {
        info!(record_id = %request.record_id, repo = %request.repo_url, "provisioning request started");

        let stages = {
            let this = self.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let mut request = request;
                let result = this.execute(&mut request).await;
                (request, result)
            })
        };

        let outcome = match stages.await {
            Ok((advanced, result)) => {
                request = advanced;
                result
            }
            Err(join_error) => Err(PipelineError::Aborted {
                message: join_error.to_string(),
            }),
        };

        match outcome {
            Ok(()) => {
                info!(record_id = %request.record_id, "provisioning request completed");
            }
            Err(e) => {
                let message = e.to_string();
                error!(record_id = %request.record_id, status = %request.status(), error = %message, "provisioning request failed");
                request.fail(message.clone());
                self.report_failure(&request.record_id, message).await;
            }
        }

        if let Err(e) = self.cleaner.delete(&request.workspace).await {
            warn!(
                record_id = %request.record_id,
                workspace = %request.workspace.display(),
                error = %e,
                "workspace cleanup failed"
            );
        }

        request
    }

    /// Error write on its own task; a panicking store must not skip cleanup.
    async fn report_failure(&self, record_id: &str, message: String) {
        let reporter = self.reporter.clone();
        let id = record_id.to_string();
        let report = tokio::spawn(async move { reporter.error(&id, &message).await });
        if let Err(join_error) = report.await {
            error!(%record_id, error = %join_error, "error report aborted");
        }
    }

    async fn execute(&self, request: &mut ProvisionRequest) -> Result<(), PipelineError> {
        transition(request, RequestStatus::Cloning);
        self.fetcher
            .fetch(&request.repo_url, &request.workspace)
            .await?;

        transition(request, RequestStatus::QueuedForProvision);
        let mut ticket = self.queue.enqueue(request.workspace.clone());
        ticket.admitted().await;
        transition(request, RequestStatus::Provisioning);
        let descriptor = ticket.outcome().await?;

        self.reporter
            .in_progress(&request.record_id, &descriptor, &request.repo_url)
            .await?;

        transition(request, RequestStatus::PostProvisioning);
        let summary = self
            .pipeline
            .patch_policies(&request.workspace, &descriptor.username)
            .await;
        debug!(record_id = %request.record_id, ?summary, "policy patch finished");

        self.pipeline
            .run_init_script(&request.workspace, &request.record_id, &descriptor.username)
            .await?;

        self.reporter.created(&request.record_id).await?;
        transition(request, RequestStatus::Created);
        Ok(())
    }
}

/// Directory name for a record. Ids that are not already path-safe get a
/// digest suffix so distinct ids never share a directory.
fn workspace_dir_name(record_id: &str) -> String {
    let safe = !record_id.is_empty()
        && record_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        return record_id.to_string();
    }

    let sanitized: String = record_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hex::encode(Sha256::digest(record_id.as_bytes()));
    format!("{}.{}", sanitized, &digest[..12])
}

fn transition(request: &mut ProvisionRequest, next: RequestStatus) {
    let from = request.status();
    if request.advance(next) {
        debug!(record_id = %request.record_id, %from, to = %next, "request status changed");
    } else {
        warn!(record_id = %request.record_id, %from, to = %next, "ignored invalid status transition");
    }
}
