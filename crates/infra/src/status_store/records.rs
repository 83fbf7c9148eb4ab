//! Typed access to the status store.

use serde_json::Value;
use tracing::debug;

use folio_core::{ModelId, PartId};
use folio_workflow::{JobId, StatusRecord};

use super::{StatusStore, StatusStoreError};

pub const DEFAULT_KEY_PREFIX: &str = "process-";
const TRAINING_KEY_PREFIX: &str = "training-";

/// Part status records and training markers on top of a raw store.
#[derive(Debug, Clone)]
pub struct StatusRecords<S> {
    store: S,
    prefix: String,
}

impl<S: StatusStore> StatusRecords<S> {
    pub fn new(store: S) -> Self {
        Self::with_prefix(store, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(&self, part_id: PartId) -> String {
        format!("{}{}", self.prefix, part_id)
    }

    /// Absent or malformed blobs load as an empty record.
    pub fn load(&self, part_id: PartId) -> Result<StatusRecord, StatusStoreError> {
        let raw = self.store.read(&self.key(part_id))?;
        Ok(StatusRecord::decode(raw.as_deref()))
    }

    pub fn save(&self, part_id: PartId, record: &StatusRecord) -> Result<(), StatusStoreError> {
        let encoded = record
            .encode()
            .map_err(|e| StatusStoreError::Encode(e.to_string()))?;
        self.store.write(&self.key(part_id), &encoded)
    }

    pub fn clear(&self, part_id: PartId) -> Result<(), StatusStoreError> {
        self.store.remove(&self.key(part_id))
    }

    pub fn training_key(model_id: ModelId) -> String {
        format!("{TRAINING_KEY_PREFIX}{model_id}")
    }

    /// Record the queue job training `model_id`.
    pub fn set_training_job(&self, model_id: ModelId, job_id: Option<JobId>) -> Result<(), StatusStoreError> {
        let value = serde_json::json!({ "task_id": job_id });
        self.store.write(&Self::training_key(model_id), &value.to_string())
    }

    /// Tracked training job for `model_id`.
    ///
    /// A missing key, a malformed blob or a blob without a usable `task_id`
    /// is [`TrainingLookup::Missing`]; an explicit `null` id means the
    /// training has not been picked up yet.
    pub fn training_job(&self, model_id: ModelId) -> Result<TrainingLookup, StatusStoreError> {
        let key = Self::training_key(model_id);
        let Some(raw) = self.store.read(&key)? else {
            return Ok(TrainingLookup::Missing);
        };
        let task_id = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| v.get("task_id").cloned());
        let lookup = match task_id {
            None => TrainingLookup::Missing,
            Some(Value::Null) => TrainingLookup::Unassigned,
            Some(id) => serde_json::from_value::<JobId>(id)
                .map(TrainingLookup::Job)
                .unwrap_or(TrainingLookup::Missing),
        };
        if lookup == TrainingLookup::Missing {
            debug!(key = %key, "training record is absent or malformed");
        }
        Ok(lookup)
    }
}

/// What the status store knows about a model's training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingLookup {
    Missing,
    Unassigned,
    Job(JobId),
}
