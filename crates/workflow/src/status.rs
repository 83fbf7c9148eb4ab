//! Typed status record tracked out-of-band for each part.
//!
//! The record lives in an external key-value store as one JSON blob per part:
//!
//! ```json
//! {"segment": {"status": "running", "job_id": "0190...", "timestamp": 1718000000}}
//! ```
//!
//! It is not transactionally consistent with the part's persisted stage.
//! Decoding is read-tolerant: a missing or malformed blob is an empty record,
//! and individual malformed or unknown entries are skipped.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::{JobId, JobName, TaskChain};
use crate::stage::WorkflowStage;

/// Status of one tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Chain submitted, job not yet picked up by the queue.
    Pending,
    /// Registered by the queue, waiting for a worker.
    Queued,
    Running,
    Canceled,
    Error,
    Done,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskEntry {
    pub fn new(status: TaskStatus, job_id: Option<JobId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            job_id,
            timestamp: Some(timestamp),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Mapping job name → status entry for one part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    entries: BTreeMap<JobName, TaskEntry>,
}

impl StatusRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh record for a just-submitted chain: only the last job is tracked,
    /// as `pending`. Earlier jobs appear once the queue reports on them, so an
    /// absent entry means "not started yet", never "failed".
    pub fn seeded(chain: &TaskChain, now: DateTime<Utc>) -> Self {
        let mut record = Self::new();
        if let Some(last) = chain.last() {
            record.insert(last.name, TaskEntry::new(TaskStatus::Pending, Some(last.id), now));
        }
        record
    }

    pub fn get(&self, name: JobName) -> Option<&TaskEntry> {
        self.entries.get(&name)
    }

    pub fn contains(&self, name: JobName) -> bool {
        self.entries.contains_key(&name)
    }

    pub fn insert(&mut self, name: JobName, entry: TaskEntry) -> Option<TaskEntry> {
        self.entries.insert(name, entry)
    }

    pub fn remove(&mut self, name: JobName) -> Option<TaskEntry> {
        self.entries.remove(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobName, &TaskEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose job has not reached a terminal status.
    pub fn outstanding(&self) -> impl Iterator<Item = (JobName, &TaskEntry)> {
        self.iter().filter(|(_, e)| !e.is_terminal())
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding().next().is_some()
    }

    /// Nothing running and at least one job waiting for a worker.
    pub fn in_queue(&self) -> bool {
        let running = self.iter().any(|(_, e)| e.status == TaskStatus::Running);
        let waiting = self
            .iter()
            .any(|(_, e)| matches!(e.status, TaskStatus::Pending | TaskStatus::Queued));
        !running && waiting
    }

    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.values().filter_map(|e| e.timestamp).max()
    }

    /// Decode a stored blob. Never fails: anything unreadable is dropped.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::new();
        };
        let map: BTreeMap<String, serde_json::Value> = match serde_json::from_str(raw) {
            Ok(map) => map,
            Err(e) => {
                debug!(error = %e, "malformed status record, treating as empty");
                return Self::new();
            }
        };

        let mut record = Self::new();
        for (key, value) in map {
            let Ok(name) = key.parse::<JobName>() else {
                debug!(job = %key, "skipping unknown job in status record");
                continue;
            };
            match serde_json::from_value::<TaskEntry>(value) {
                Ok(entry) => {
                    record.insert(name, entry);
                }
                Err(e) => debug!(job = %key, error = %e, "skipping malformed status entry"),
            }
        }
        record
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let wire: BTreeMap<&'static str, &TaskEntry> =
            self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
        serde_json::to_string(&wire)
    }
}

impl FromIterator<(JobName, TaskEntry)> for StatusRecord {
    fn from_iter<T: IntoIterator<Item = (JobName, TaskEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Presentation state of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Ongoing,
    Done,
    Canceled,
    Error,
}

/// Per-step summary combining the persisted stage with the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert: Option<StepState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<StepState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribe: Option<StepState>,
}

pub fn workflow_view(stage: WorkflowStage, record: &StatusRecord) -> WorkflowView {
    let mut view = WorkflowView::default();

    if stage == WorkflowStage::Converting {
        view.convert = Some(StepState::Ongoing);
    } else if stage > WorkflowStage::Converting {
        view.convert = Some(StepState::Done);
    }
    if stage == WorkflowStage::Segmenting {
        view.segment = Some(StepState::Ongoing);
    } else if stage > WorkflowStage::Segmenting {
        view.segment = Some(StepState::Done);
    }
    if stage == WorkflowStage::Transcribing {
        view.transcribe = Some(StepState::Done);
    }

    // the record wins for reruns of later steps
    for (name, slot) in [
        (JobName::Segment, &mut view.segment),
        (JobName::Transcribe, &mut view.transcribe),
    ] {
        if let Some(entry) = record.get(name) {
            match entry.status {
                TaskStatus::Pending => *slot = Some(StepState::Pending),
                TaskStatus::Queued | TaskStatus::Running => *slot = Some(StepState::Ongoing),
                TaskStatus::Canceled => *slot = Some(StepState::Canceled),
                TaskStatus::Error => *slot = Some(StepState::Error),
                TaskStatus::Done => {}
            }
        }
    }
    view
}
