//! Tracking-record storage

use crate::error::ReportingError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Externally visible status of a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Queued,
    #[serde(rename = "In Progress")]
    InProgress,
    Created,
    Error,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Queued => "Queued",
            RecordStatus::InProgress => "In Progress",
            RecordStatus::Created => "Created",
            RecordStatus::Error => "Error",
        }
    }
}

/// Fields written to a record; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RecordFields {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub id: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    fn apply(&mut self, fields: &RecordFields) {
        if let Some(status) = fields.status {
            self.status = status;
        }
        overwrite(&mut self.environment_id, &fields.environment_id);
        overwrite(&mut self.username, &fields.username);
        overwrite(&mut self.login_url, &fields.login_url);
        overwrite(&mut self.repo_url, &fields.repo_url);
        overwrite(&mut self.error_message, &fields.error_message);
        self.updated_at = Utc::now();
    }
}

fn overwrite(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

/// External store of tracking records, addressed by id. Last writer wins.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, fields: RecordFields) -> Result<String, ReportingError>;
    async fn update(&self, id: &str, fields: RecordFields) -> Result<(), ReportingError>;
    async fn get(&self, id: &str) -> Option<TrackingRecord>;
}

/// Record store kept in memory and optionally mirrored to a JSON file.
#[derive(Debug, Clone)]
pub struct LocalRecordStore {
    path: Option<PathBuf>,
    state: Arc<RwLock<RecordDb>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordDb {
    records: HashMap<String, TrackingRecord>,
}

impl LocalRecordStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(RecordDb::default())),
        }
    }

    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading record store at {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| "parsing record store JSON")?
        } else {
            RecordDb::default()
        };

        Ok(Self {
            path: Some(path),
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub async fn list(&self) -> Vec<TrackingRecord> {
        let guard = self.state.read().await;
        let mut records: Vec<TrackingRecord> = guard.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    async fn mirror(&self, db: RecordDb) -> Result<(), String> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        persist(path, db).await.map_err(|e| format!("{e:#}"))
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn create(&self, fields: RecordFields) -> Result<String, ReportingError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let mut record = TrackingRecord {
            id: id.clone(),
            status: RecordStatus::Queued,
            environment_id: None,
            username: None,
            login_url: None,
            repo_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        record.apply(&fields);

        let mut guard = self.state.write().await;
        guard.records.insert(id.clone(), record);
        let snapshot = guard.clone();
        drop(guard);

        self.mirror(snapshot)
            .await
            .map_err(|message| ReportingError::Create { message })?;
        Ok(id)
    }

    async fn update(&self, id: &str, fields: RecordFields) -> Result<(), ReportingError> {
        let mut guard = self.state.write().await;
        let Some(record) = guard.records.get_mut(id) else {
            return Err(ReportingError::NotFound { id: id.to_string() });
        };
        record.apply(&fields);
        let snapshot = guard.clone();
        drop(guard);

        self.mirror(snapshot)
            .await
            .map_err(|message| ReportingError::Update {
                id: id.to_string(),
                message,
            })
    }

    async fn get(&self, id: &str) -> Option<TrackingRecord> {
        let guard = self.state.read().await;
        guard.records.get(id).cloned()
    }
}

async fn persist(path: &Path, db: RecordDb) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating record store directory {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&db).context("serializing record store")?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing record store to {}", path.display()))?;
        Ok::<(), anyhow::Error>(())
    })
    .await
    .context("joining record store persistence task")??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_then_update_merges_fields() {
        let store = LocalRecordStore::in_memory();
        let id = store
            .create(RecordFields::status(RecordStatus::Queued))
            .await
            .unwrap();

        store
            .update(
                &id,
                RecordFields {
                    status: Some(RecordStatus::InProgress),
                    username: Some("test-abc@example.com".to_string()),
                    ..RecordFields::default()
                },
            )
            .await
            .unwrap();
        store
            .update(&id, RecordFields::status(RecordStatus::Created))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Created);
        assert_eq!(record.username.as_deref(), Some("test-abc@example.com"));
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let store = LocalRecordStore::in_memory();
        let err = store
            .update("missing", RecordFields::status(RecordStatus::Error))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_persisted_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("records.json");

        let store = LocalRecordStore::open(path.clone()).unwrap();
        let id = store
            .create(RecordFields::status(RecordStatus::Queued))
            .await
            .unwrap();

        let reopened = LocalRecordStore::open(path).unwrap();
        assert_eq!(reopened.get(&id).await.unwrap().status, RecordStatus::Queued);
    }

    #[test]
    fn test_in_progress_serializes_with_space() {
        let json = serde_json::to_string(&RecordStatus::InProgress).unwrap();
        assert_eq!(json, "\"In Progress\"");
        assert_eq!(RecordStatus::InProgress.as_str(), "In Progress");
    }
}
