//! Provisioning events and their publishers

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::model::EnvironmentDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Completed,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProvisionEvent {
    #[serde(rename = "environment.created:v1")]
    EnvironmentCreated {
        #[serde(rename = "environmentId")]
        environment_id: String,
        username: String,
        #[serde(rename = "loginUrl")]
        login_url: String,
        #[serde(rename = "requestedBy")]
        requested_by: String,
        ts: String,
    },
    #[serde(rename = "init.command:v1")]
    InitCommand {
        #[serde(rename = "recordId")]
        record_id: String,
        command: String,
        status: CommandStatus,
        output: String,
        error: String,
        ts: String,
    },
}

impl ProvisionEvent {
    pub fn environment_created(descriptor: &EnvironmentDescriptor, requested_by: &str) -> Self {
        ProvisionEvent::EnvironmentCreated {
            environment_id: descriptor.environment_id.clone(),
            username: descriptor.username.clone(),
            login_url: descriptor.login_url.clone(),
            requested_by: requested_by.to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn init_command(
        record_id: &str,
        command: &str,
        status: CommandStatus,
        output: &str,
        error: &str,
    ) -> Self {
        ProvisionEvent::InitCommand {
            record_id: record_id.to_string(),
            command: command.to_string(),
            status,
            output: output.to_string(),
            error: error.to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Subject the event is published on, under `prefix`.
    pub fn subject(&self, prefix: &str) -> String {
        match self {
            ProvisionEvent::EnvironmentCreated { environment_id, .. } => {
                format!("{}.environments.{}.created", prefix, environment_id)
            }
            ProvisionEvent::InitCommand { record_id, .. } => {
                format!("{}.requests.{}.commands", prefix, record_id)
            }
        }
    }
}

/// Fire-and-forget event sink; delivery failures are logged, never returned.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ProvisionEvent);
}

/// Publishes events as JSON on NATS core subjects.
pub struct NatsEventPublisher {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsEventPublisher {
    pub async fn connect(
        nats_url: &str,
        creds_path: Option<&str>,
        subject_prefix: impl Into<String>,
    ) -> Result<Self> {
        info!("Connecting to NATS at {}", nats_url);

        let client = if let Some(creds_path) = creds_path {
            info!("Using credentials file: {}", creds_path);
            async_nats::ConnectOptions::new()
                .credentials_file(creds_path)
                .await
                .context("Failed to load NATS credentials")?
                .connect(nats_url)
                .await
                .context("Failed to connect to NATS with credentials")?
        } else {
            warn!("No NATS credentials provided, connecting without auth");
            async_nats::connect(nats_url)
                .await
                .context("Failed to connect to NATS")?
        };

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: ProvisionEvent) {
        let subject = event.subject(&self.subject_prefix);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%subject, error = %e, "failed to serialize event");
                return;
            }
        };

        match self.client.publish(subject.clone(), payload.into()).await {
            Ok(()) => debug!(%subject, "event published"),
            Err(e) => warn!(%subject, error = %e, "failed to publish event"),
        }
    }
}

/// Writes events to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: ProvisionEvent) {
        match &event {
            ProvisionEvent::EnvironmentCreated {
                environment_id,
                username,
                ..
            } => info!(%environment_id, %username, "environment created"),
            ProvisionEvent::InitCommand {
                record_id,
                command,
                status,
                ..
            } => info!(%record_id, %command, status = ?status, "init command finished"),
        }
    }
}

/// Keeps published events in memory, in publish order.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventPublisher {
    events: Arc<Mutex<Vec<ProvisionEvent>>>,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProvisionEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, event: ProvisionEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
