//! Maps pipeline milestones onto tracking-record status updates

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::ReporterSettings;
use crate::error::ReportingError;
use crate::model::EnvironmentDescriptor;
use crate::records::{RecordFields, RecordStatus, RecordStore};

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn RecordStore>,
    settings: ReporterSettings,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn RecordStore>, settings: ReporterSettings) -> Self {
        Self { store, settings }
    }

    /// Create the record for a freshly accepted request.
    pub async fn queued(&self, repo_url: &str) -> Result<String, ReportingError> {
        let id = self
            .store
            .create(RecordFields {
                status: Some(RecordStatus::Queued),
                repo_url: Some(repo_url.to_string()),
                ..RecordFields::default()
            })
            .await?;
        info!(record_id = %id, "tracking record created");
        Ok(id)
    }

    pub async fn in_progress(
        &self,
        id: &str,
        descriptor: &EnvironmentDescriptor,
        repo_url: &str,
    ) -> Result<(), ReportingError> {
        self.write(
            id,
            RecordFields {
                status: Some(RecordStatus::InProgress),
                environment_id: Some(descriptor.environment_id.clone()),
                username: Some(descriptor.username.clone()),
                login_url: Some(descriptor.login_url.clone()),
                repo_url: Some(repo_url.to_string()),
                error_message: None,
            },
        )
        .await
    }

    pub async fn created(&self, id: &str) -> Result<(), ReportingError> {
        self.write(id, RecordFields::status(RecordStatus::Created))
            .await
    }

    /// Best-effort terminal error report. Failures are logged only.
    pub async fn error(&self, id: &str, message: &str) {
        let fields = RecordFields {
            status: Some(RecordStatus::Error),
            error_message: Some(message.to_string()),
            ..RecordFields::default()
        };
        if let Err(e) = self.write(id, fields).await {
            error!(record_id = %id, error = %e, "failed to record Error status; giving up");
        }
    }

    /// Delay before retry `attempt` (1-based): doubling, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.settings
            .retry_backoff
            .saturating_mul(factor)
            .min(MAX_RETRY_BACKOFF)
    }

    async fn write(&self, id: &str, fields: RecordFields) -> Result<(), ReportingError> {
        let status = fields.status.map(RecordStatus::as_str).unwrap_or("-");
        let mut last_error = None;

        for attempt in 0..=self.settings.retry_attempts {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!(
                    record_id = %id,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    "Retrying status update after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.store.update(id, fields.clone()).await {
                Ok(()) => {
                    info!(record_id = %id, %status, "status updated");
                    return Ok(());
                }
                // Retrying cannot make a missing record appear.
                Err(e @ ReportingError::NotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        record_id = %id,
                        attempt = attempt + 1,
                        max_attempts = self.settings.retry_attempts + 1,
                        error = %e,
                        "Status update failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ReportingError::Update {
            id: id.to_string(),
            message: "no attempts made".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{LocalRecordStore, TrackingRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` updates, then delegates.
    struct Flaky {
        inner: LocalRecordStore,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RecordStore for Flaky {
        async fn create(&self, fields: RecordFields) -> Result<String, ReportingError> {
            self.inner.create(fields).await
        }

        async fn update(&self, id: &str, fields: RecordFields) -> Result<(), ReportingError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReportingError::Update {
                    id: id.to_string(),
                    message: "store unavailable".to_string(),
                });
            }
            self.inner.update(id, fields).await
        }

        async fn get(&self, id: &str) -> Option<TrackingRecord> {
            self.inner.get(id).await
        }
    }

    fn settings(retry_attempts: u32) -> ReporterSettings {
        ReporterSettings {
            retry_attempts,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn descriptor() -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            environment_id: "00D1".to_string(),
            username: "test@example.com".to_string(),
            login_url: "https://login.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_milestones_flow_into_record() {
        let store = Arc::new(LocalRecordStore::in_memory());
        let reporter = StatusReporter::new(store.clone(), settings(0));

        let id = reporter.queued("https://github.com/acme/app").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, RecordStatus::Queued);

        reporter
            .in_progress(&id, &descriptor(), "https://github.com/acme/app")
            .await
            .unwrap();
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, RecordStatus::InProgress);
        assert_eq!(record.environment_id.as_deref(), Some("00D1"));
        assert_eq!(record.login_url.as_deref(), Some("https://login.example.com"));

        reporter.created(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, RecordStatus::Created);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(Flaky {
            inner: LocalRecordStore::in_memory(),
            failures: AtomicU32::new(2),
            attempts: AtomicU32::new(0),
        });
        let reporter = StatusReporter::new(store.clone(), settings(2));
        let id = reporter.queued("repo").await.unwrap();

        reporter.created(&id).await.unwrap();
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.get(&id).await.unwrap().status, RecordStatus::Created);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_error() {
        let store = Arc::new(Flaky {
            inner: LocalRecordStore::in_memory(),
            failures: AtomicU32::new(10),
            attempts: AtomicU32::new(0),
        });
        let reporter = StatusReporter::new(store.clone(), settings(1));
        let id = reporter.queued("repo").await.unwrap();

        let err = reporter.created(&id).await.unwrap_err();
        assert!(matches!(err, ReportingError::Update { .. }));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_doubles_and_is_capped() {
        let reporter = StatusReporter::new(
            Arc::new(LocalRecordStore::in_memory()),
            ReporterSettings {
                retry_attempts: 50,
                retry_backoff: Duration::from_millis(500),
            },
        );

        assert_eq!(reporter.backoff(1), Duration::from_millis(500));
        assert_eq!(reporter.backoff(3), Duration::from_secs(2));
        assert_eq!(reporter.backoff(40), MAX_RETRY_BACKOFF);
        assert_eq!(reporter.backoff(u32::MAX), MAX_RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn test_many_attempts_do_not_overflow() {
        let store = Arc::new(Flaky {
            inner: LocalRecordStore::in_memory(),
            failures: AtomicU32::new(u32::MAX),
            attempts: AtomicU32::new(0),
        });
        let reporter = StatusReporter::new(
            store.clone(),
            ReporterSettings {
                retry_attempts: 40,
                retry_backoff: Duration::ZERO,
            },
        );
        let id = reporter.queued("repo").await.unwrap();

        assert!(reporter.created(&id).await.is_err());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 41);
    }

    #[tokio::test]
    async fn test_error_report_never_fails() {
        let store = Arc::new(Flaky {
            inner: LocalRecordStore::in_memory(),
            failures: AtomicU32::new(10),
            attempts: AtomicU32::new(0),
        });
        let reporter = StatusReporter::new(store.clone(), settings(1));
        let id = reporter.queued("repo").await.unwrap();

        reporter.error(&id, "init script failed").await;
        assert_eq!(store.get(&id).await.unwrap().status, RecordStatus::Queued);
    }

    #[tokio::test]
    async fn test_error_report_attaches_message() {
        let store = Arc::new(LocalRecordStore::in_memory());
        let reporter = StatusReporter::new(store.clone(), settings(0));
        let id = reporter.queued("repo").await.unwrap();

        reporter.error(&id, "clone failed").await;
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("clone failed"));
    }
}
