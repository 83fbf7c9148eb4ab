//! Applying queue lifecycle notifications to the status record.
//!
//! A failure only records `error`; the stage is left alone. Rolling the stage
//! back is the recovery pass's job, because the failure notification and the
//! part write are not atomic with each other. The stage is therefore
//! eventually consistent after a failure, never immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobName};
use crate::part::PartCommand;
use crate::status::{StatusRecord, TaskEntry, TaskStatus};

/// Notification delivered by the job queue for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum JobLifecycle {
    Queued,
    BeforeDispatch,
    Started,
    Succeeded,
    Failed { reason: String },
}

impl JobLifecycle {
    pub fn status(&self) -> TaskStatus {
        match self {
            JobLifecycle::Queued | JobLifecycle::BeforeDispatch => TaskStatus::Queued,
            JobLifecycle::Started => TaskStatus::Running,
            JobLifecycle::Succeeded => TaskStatus::Done,
            JobLifecycle::Failed { .. } => TaskStatus::Error,
        }
    }
}

/// What the orchestrator must persist after a lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// The job was canceled before this notification; write nothing.
    Ignored,
    /// The record entry was rewritten; optionally the part stage moves too.
    Recorded { command: Option<PartCommand> },
}

/// Rewrite the job's entry in `record` and decide the stage effect.
pub fn apply_lifecycle(
    record: &mut StatusRecord,
    job: JobName,
    job_id: JobId,
    event: &JobLifecycle,
    now: DateTime<Utc>,
) -> LifecycleDecision {
    if let Some(entry) = record.get(job) {
        // canceled-then-finished: the cancel wins
        let same_job = entry.job_id.is_none_or(|id| id == job_id);
        if entry.status == TaskStatus::Canceled && same_job {
            return LifecycleDecision::Ignored;
        }
    }

    record.insert(job, TaskEntry::new(event.status(), Some(job_id), now));

    let command = match event {
        JobLifecycle::Succeeded => Some(PartCommand::Complete {
            job,
            occurred_at: now,
        }),
        _ => None,
    };
    LifecycleDecision::Recorded { command }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_event_maps_to_a_status() {
        let mut record = StatusRecord::new();
        let id = JobId::new();
        let now = Utc::now();

        for (event, status) in [
            (JobLifecycle::Queued, TaskStatus::Queued),
            (JobLifecycle::BeforeDispatch, TaskStatus::Queued),
            (JobLifecycle::Started, TaskStatus::Running),
            (JobLifecycle::Succeeded, TaskStatus::Done),
        ] {
            apply_lifecycle(&mut record, JobName::Segment, id, &event, now);
            let entry = record.get(JobName::Segment).unwrap();
            assert_eq!(entry.status, status);
            assert_eq!(entry.job_id, Some(id));
            assert_eq!(entry.timestamp, Some(now));
        }
    }

    #[test]
    fn success_advances_failure_does_not() {
        let mut record = StatusRecord::new();
        let id = JobId::new();

        let decision = apply_lifecycle(&mut record, JobName::Segment, id, &JobLifecycle::Succeeded, Utc::now());
        assert!(matches!(
            decision,
            LifecycleDecision::Recorded {
                command: Some(PartCommand::Complete { job: JobName::Segment, .. })
            }
        ));

        let decision = apply_lifecycle(
            &mut record,
            JobName::Transcribe,
            id,
            &JobLifecycle::Failed {
                reason: "model crashed".into(),
            },
            Utc::now(),
        );
        assert_eq!(decision, LifecycleDecision::Recorded { command: None });
        assert_eq!(record.get(JobName::Transcribe).unwrap().status, TaskStatus::Error);
    }

    #[test]
    fn canceled_job_finishing_late_is_a_no_op() {
        let id = JobId::new();
        let mut record = StatusRecord::new();
        record.insert(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Canceled, Some(id), Utc::now()),
        );
        let before = record.clone();

        let decision = apply_lifecycle(&mut record, JobName::Segment, id, &JobLifecycle::Succeeded, Utc::now());

        assert_eq!(decision, LifecycleDecision::Ignored);
        assert_eq!(record, before);
    }

    #[test]
    fn a_new_job_with_the_same_name_is_not_shadowed_by_an_old_cancel() {
        let mut record = StatusRecord::new();
        record.insert(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Canceled, Some(JobId::new()), Utc::now()),
        );
        let fresh = JobId::new();

        let decision = apply_lifecycle(&mut record, JobName::Segment, fresh, &JobLifecycle::Started, Utc::now());

        assert_eq!(decision, LifecycleDecision::Recorded { command: None });
        assert_eq!(record.get(JobName::Segment).unwrap().job_id, Some(fresh));
    }
}
