//! Bounded-concurrency admission control for environment creation
//!
//! At most `capacity` creation calls run at once. Submissions beyond that wait
//! in a FIFO list; whenever a running call finishes (successfully, with an
//! error, or by panicking) its slot is released and the head of the wait list
//! is admitted. Admission is pull-based: nothing polls.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{ConfigError, ProvisionError};
use crate::model::EnvironmentDescriptor;

/// The expensive step gated by the queue.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    async fn create(&self, workspace: &Path) -> Result<EnvironmentDescriptor, ProvisionError>;
}

type Reply = oneshot::Sender<Result<EnvironmentDescriptor, ProvisionError>>;

/// A submission waiting for admission.
struct QueueSlot {
    workspace: PathBuf,
    admitted: oneshot::Sender<()>,
    reply: Reply,
}

/// Handle to a queued submission.
pub struct Ticket {
    admitted: Option<oneshot::Receiver<()>>,
    result: oneshot::Receiver<Result<EnvironmentDescriptor, ProvisionError>>,
}

impl Ticket {
    /// Resolves once the submission holds a running slot (or was abandoned).
    /// Cancel-safe: an interrupted wait can be resumed.
    pub async fn admitted(&mut self) {
        if let Some(admitted) = self.admitted.as_mut() {
            let _ = admitted.await;
            self.admitted = None;
        }
    }

    pub async fn outcome(self) -> Result<EnvironmentDescriptor, ProvisionError> {
        self.result.await.map_err(|_| ProvisionError::Abandoned)?
    }
}

#[derive(Default)]
struct QueueState {
    running: usize,
    waiting: VecDeque<QueueSlot>,
}

struct QueueInner {
    capacity: usize,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    state: Mutex<QueueState>,
}

/// Shared handle to the admission queue; clones refer to the same queue.
#[derive(Clone)]
pub struct ProvisioningQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for ProvisioningQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningQueue")
            .field("capacity", &self.inner.capacity)
            .field("running", &self.running())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl ProvisioningQueue {
    /// Create a queue admitting at most `capacity` concurrent creations.
    pub fn new(
        capacity: usize,
        provisioner: Arc<dyn EnvironmentProvisioner>,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { capacity });
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                capacity,
                provisioner,
                state: Mutex::new(QueueState::default()),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Creation calls currently in flight.
    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    /// Submissions waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Queue a creation for `workspace` and wait for its result.
    ///
    /// The creation runs on its own task, so dropping the returned future
    /// does not cancel an admitted call or leak its slot.
    pub async fn submit(
        &self,
        workspace: impl Into<PathBuf>,
    ) -> Result<EnvironmentDescriptor, ProvisionError> {
        self.enqueue(workspace).outcome().await
    }

    /// Queue a creation for `workspace` without waiting.
    pub fn enqueue(&self, workspace: impl Into<PathBuf>) -> Ticket {
        let (admitted_tx, admitted_rx) = oneshot::channel();
        let (reply, result) = oneshot::channel();
        let workspace = workspace.into();

        {
            let mut state = self.inner.lock();
            state.waiting.push_back(QueueSlot {
                workspace: workspace.clone(),
                admitted: admitted_tx,
                reply,
            });
            debug!(
                workspace = %workspace.display(),
                running = state.running,
                waiting = state.waiting.len(),
                "provisioning request queued"
            );
        }

        QueueInner::admit(&self.inner);

        Ticket {
            admitted: Some(admitted_rx),
            result,
        }
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Bookkeeping never panics mid-update, so a poisoned lock still holds
        // a consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start waiting submissions while slots are free.
    fn admit(inner: &Arc<QueueInner>) {
        loop {
            let slot = {
                let mut state = inner.lock();
                if state.running >= inner.capacity {
                    return;
                }
                let Some(slot) = state.waiting.pop_front() else {
                    return;
                };
                state.running += 1;
                slot
            };

            info!(workspace = %slot.workspace.display(), "provisioning admitted");
            let permit = RunningSlot {
                inner: Arc::clone(inner),
            };
            let provisioner = Arc::clone(&inner.provisioner);

            tokio::spawn(async move {
                let QueueSlot {
                    workspace,
                    admitted,
                    reply,
                } = slot;
                let _ = admitted.send(());
                let result = provisioner.create(&workspace).await;
                // Release the slot before handing back the result so the next
                // submission is admitted regardless of what the caller does.
                drop(permit);
                if reply.send(result).is_err() {
                    debug!(workspace = %workspace.display(), "submitter gone; result dropped");
                }
            });
        }
    }
}

/// Holds one running slot; releasing it admits the next waiter.
struct RunningSlot {
    inner: Arc<QueueInner>,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        {
            let mut state = self.inner.lock();
            state.running = state.running.saturating_sub(1);
        }
        QueueInner::admit(&self.inner);
    }
}
