//! Cancellation of a part's outstanding jobs.

use chrono::{DateTime, Utc};

use crate::job::{JobId, JobName};
use crate::part::{DocumentPart, PartCommand};
use crate::stage::WorkflowStage;
use crate::status::{StatusRecord, TaskEntry, TaskStatus};

/// What `cancel_all` has to do for one part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancelPlan {
    /// Queue jobs to revoke (terminating them if already running).
    pub revoke: Vec<JobId>,
    /// Record entries to flip to `canceled`.
    pub canceled: Vec<JobName>,
    /// Stage rollback to persist before the record is rewritten.
    pub rollback: Option<PartCommand>,
}

impl CancelPlan {
    pub fn is_empty(&self) -> bool {
        self.revoke.is_empty() && self.canceled.is_empty() && self.rollback.is_none()
    }

    /// Mark the planned entries canceled, keeping their job ids.
    pub fn apply_to(&self, record: &mut StatusRecord, now: DateTime<Utc>) {
        for &name in &self.canceled {
            let job_id = record.get(name).and_then(|e| e.job_id);
            record.insert(name, TaskEntry::new(TaskStatus::Canceled, job_id, now));
        }
    }
}

/// Decide revocations, entry rewrites and the stage rollback.
///
/// Foundational jobs are never revoked and entries without a job id cannot
/// be revoked; both are still marked canceled so the part reads as idle.
/// Entries already terminal are left as they are.
pub fn plan_cancellation(
    part: &DocumentPart,
    record: &StatusRecord,
    now: DateTime<Utc>,
) -> CancelPlan {
    let mut plan = CancelPlan::default();

    for (name, entry) in record.outstanding() {
        if name.is_cancelable()
            && let Some(id) = entry.job_id
        {
            plan.revoke.push(id);
        }
        plan.canceled.push(name);
    }

    if part.stage() == WorkflowStage::Segmenting {
        plan.rollback = Some(PartCommand::RollBack {
            job: JobName::Segment,
            occurred_at: now,
        });
    }
    plan
}
