//! Reconciling a drifted status record with the live queue.
//!
//! The status record, the part's stage and the queue's live set are three
//! independent stores. A worker crash, a lost notification or a queue flush
//! leaves them disagreeing; [`reconcile`] repairs the record and the stage
//! from whatever the queue still knows about.
//!
//! Reconciliation is idempotent: running it again on its own output reports
//! `changed == false`, and callers only persist when something changed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobName};
use crate::part::{DocumentPart, PartCommand};
use crate::status::{StatusRecord, TaskEntry, TaskStatus};

/// Snapshot of the queue: job ids grouped by worker, per liveness bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveJobs {
    pub scheduled: BTreeMap<String, Vec<JobId>>,
    pub active: BTreeMap<String, Vec<JobId>>,
    pub reserved: BTreeMap<String, Vec<JobId>>,
}

impl LiveJobs {
    /// Every live job id across buckets and workers.
    pub fn ids(&self) -> BTreeSet<JobId> {
        [&self.scheduled, &self.active, &self.reserved]
            .into_iter()
            .flat_map(|bucket| bucket.values())
            .flatten()
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

/// Result of one reconciliation pass over a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Non-terminal entries dropped because the queue no longer knows them.
    pub stale: Vec<JobName>,
    /// Pipeline jobs whose in-progress stage was orphaned.
    pub lost: Vec<JobName>,
    /// Stage rollback to persist, if the part was stuck in progress.
    pub command: Option<PartCommand>,
    /// Repaired record.
    pub record: StatusRecord,
    pub changed: bool,
}

/// Reconcile `record` and the part's stage against `live`.
///
/// 1. every non-terminal entry whose job id is missing or not live is removed
/// 2. if the part sits in a pipeline job's in-progress stage and that job has
///    no entry left, the job is recorded as `error` and the stage rolled back;
///    a job that already failed keeps its `error` entry and is rolled back too,
///    and so does a canceled job that still left its stage in progress
pub fn reconcile(
    part: &DocumentPart,
    record: &StatusRecord,
    live: &LiveJobs,
    now: DateTime<Utc>,
) -> RecoveryOutcome {
    let live_ids = live.ids();
    let mut repaired = record.clone();

    let stale: Vec<JobName> = record
        .outstanding()
        .filter(|(_, e)| e.job_id.is_none_or(|id| !live_ids.contains(&id)))
        .map(|(name, _)| name)
        .collect();
    for &name in &stale {
        repaired.remove(name);
    }

    let mut lost = Vec::new();
    let mut command = None;
    for job in JobName::PIPELINE {
        let Some(transition) = job.transition() else {
            continue;
        };
        if part.stage() != transition.in_progress {
            continue;
        }
        let failed = match repaired.get(job) {
            None => {
                repaired.insert(job, TaskEntry::new(TaskStatus::Error, None, now));
                true
            }
            Some(entry) => match entry.status {
                TaskStatus::Error => true,
                // a revoke that raced the job's Begin; Transcribing is also the
                // finished stage, so a canceled re-run there is left alone
                TaskStatus::Canceled => transition.in_progress != transition.completed,
                _ => false,
            },
        };
        if failed {
            lost.push(job);
            command = Some(PartCommand::RollBack {
                job,
                occurred_at: now,
            });
        }
    }

    let changed = !stale.is_empty() || !lost.is_empty();
    RecoveryOutcome {
        stale,
        lost,
        command,
        record: repaired,
        changed,
    }
}

/// Whether a periodic sweep should touch a part at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverability {
    /// No entry carries a timestamp; nothing to reconcile.
    Idle,
    /// Newest activity is older than the window; left as-is.
    Expired,
    Recoverable,
}

pub fn recoverability(record: &StatusRecord, now: DateTime<Utc>, window: Duration) -> Recoverability {
    match record.newest_timestamp() {
        None => Recoverability::Idle,
        Some(newest) if now - newest > window => Recoverability::Expired,
        Some(_) => Recoverability::Recoverable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Aggregate, DocumentId};

    use crate::part::ImageRef;
    use crate::stage::WorkflowStage;

    fn part_in(stage: WorkflowStage) -> DocumentPart {
        let now = Utc::now();
        let mut part = DocumentPart::create(
            DocumentId::new(),
            "p",
            ImageRef {
                path: "p.png".into(),
                width: 1,
                height: 1,
            },
            now,
        )
        .unwrap();
        let steps: &[PartCommand] = match stage {
            WorkflowStage::Converting => &[PartCommand::Begin { job: JobName::Convert, occurred_at: now }],
            WorkflowStage::Converted => &[PartCommand::Complete { job: JobName::Convert, occurred_at: now }],
            WorkflowStage::Segmenting => &[
                PartCommand::Complete { job: JobName::Convert, occurred_at: now },
                PartCommand::Begin { job: JobName::Segment, occurred_at: now },
            ],
            WorkflowStage::Segmented => &[PartCommand::Complete { job: JobName::Segment, occurred_at: now }],
            _ => &[],
        };
        for cmd in steps {
            part.execute(cmd).unwrap();
        }
        assert_eq!(part.stage(), stage);
        part
    }

    fn live_with(ids: &[JobId]) -> LiveJobs {
        let mut live = LiveJobs::default();
        live.active.insert("worker-1".into(), ids.to_vec());
        live
    }

    #[test]
    fn live_ids_span_all_buckets() {
        let (a, b, c) = (JobId::new(), JobId::new(), JobId::new());
        let mut live = LiveJobs::default();
        live.scheduled.insert("w1".into(), vec![a]);
        live.active.insert("w2".into(), vec![b]);
        live.reserved.insert("w1".into(), vec![c, a]);

        assert_eq!(live.ids().len(), 3);
    }

    #[test]
    fn stale_segmentation_is_rolled_back() {
        let now = Utc::now();
        let part = part_in(WorkflowStage::Segmenting);
        let mut record = StatusRecord::new();
        record.insert(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Running, Some(JobId::new()), now - Duration::hours(2)),
        );

        let out = reconcile(&part, &record, &LiveJobs::default(), now);

        assert!(out.changed);
        assert_eq!(out.stale, vec![JobName::Segment]);
        assert_eq!(out.lost, vec![JobName::Segment]);
        let entry = out.record.get(JobName::Segment).unwrap();
        assert_eq!(entry.status, TaskStatus::Error);
        assert_eq!(entry.job_id, None);
        assert!(matches!(
            out.command,
            Some(PartCommand::RollBack { job: JobName::Segment, .. })
        ));

        let mut part = part;
        part.execute(&out.command.unwrap()).unwrap();
        assert_eq!(part.stage(), WorkflowStage::Converted);
    }

    #[test]
    fn live_jobs_and_terminal_entries_survive() {
        let now = Utc::now();
        let part = part_in(WorkflowStage::Segmenting);
        let running = JobId::new();
        let mut record = StatusRecord::new();
        record.insert(JobName::Segment, TaskEntry::new(TaskStatus::Running, Some(running), now));
        record.insert(JobName::Convert, TaskEntry::new(TaskStatus::Done, Some(JobId::new()), now));

        let out = reconcile(&part, &record, &live_with(&[running]), now);

        assert!(!out.changed);
        assert_eq!(out.record, record);
        assert!(out.command.is_none());
    }

    #[test]
    fn pending_entry_without_id_is_stale() {
        let now = Utc::now();
        let mut record = StatusRecord::new();
        record.insert(JobName::Transcribe, TaskEntry::new(TaskStatus::Pending, None, now));

        let out = reconcile(&part_in(WorkflowStage::Segmented), &record, &LiveJobs::default(), now);

        assert_eq!(out.stale, vec![JobName::Transcribe]);
        assert!(out.record.is_empty());
        assert!(out.command.is_none());
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let now = Utc::now();
        let mut part = part_in(WorkflowStage::Segmenting);
        let mut record = StatusRecord::new();
        record.insert(JobName::Segment, TaskEntry::new(TaskStatus::Queued, Some(JobId::new()), now));

        let first = reconcile(&part, &record, &LiveJobs::default(), now);
        if let Some(cmd) = &first.command {
            part.execute(cmd).unwrap();
        }
        let second = reconcile(&part, &first.record, &LiveJobs::default(), now);

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.record, first.record);
        assert!(second.command.is_none());
    }

    #[test]
    fn failed_job_rolls_back_keeping_its_entry() {
        let now = Utc::now();
        let mut part = part_in(WorkflowStage::Segmenting);
        let failed = JobId::new();
        let mut record = StatusRecord::new();
        record.insert(JobName::Segment, TaskEntry::new(TaskStatus::Error, Some(failed), now));

        let out = reconcile(&part, &record, &LiveJobs::default(), now);

        assert!(out.changed);
        assert!(out.stale.is_empty());
        assert_eq!(out.lost, vec![JobName::Segment]);
        assert_eq!(out.record, record);

        part.execute(&out.command.unwrap()).unwrap();
        assert!(!reconcile(&part, &out.record, &LiveJobs::default(), now).changed);
    }

    #[test]
    fn job_canceled_after_it_began_rolls_back_keeping_its_entry() {
        let now = Utc::now();
        let mut part = part_in(WorkflowStage::Segmenting);
        let mut record = StatusRecord::new();
        record.insert(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Canceled, Some(JobId::new()), now),
        );

        let out = reconcile(&part, &record, &LiveJobs::default(), now);

        assert!(out.changed);
        assert_eq!(out.lost, vec![JobName::Segment]);
        assert_eq!(out.record, record);
        part.execute(&out.command.unwrap()).unwrap();
        assert_eq!(part.stage(), WorkflowStage::Converted);
        assert!(!reconcile(&part, &out.record, &LiveJobs::default(), now).changed);
    }

    #[test]
    fn canceled_entry_outside_its_stage_is_left_alone() {
        let now = Utc::now();
        let mut record = StatusRecord::new();
        record.insert(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Canceled, Some(JobId::new()), now),
        );

        let out = reconcile(&part_in(WorkflowStage::Converted), &record, &LiveJobs::default(), now);

        assert!(!out.changed);
        assert!(out.command.is_none());
    }

    #[test]
    fn converting_part_with_no_entry_gets_an_error_and_rolls_back() {
        let now = Utc::now();
        let out = reconcile(&part_in(WorkflowStage::Converting), &StatusRecord::new(), &LiveJobs::default(), now);

        assert_eq!(out.lost, vec![JobName::Convert]);
        assert_eq!(out.record.get(JobName::Convert).unwrap().status, TaskStatus::Error);
        assert!(matches!(
            out.command,
            Some(PartCommand::RollBack { job: JobName::Convert, .. })
        ));
    }

    #[test]
    fn recovery_window_classification() {
        let now = Utc::now();
        let window = Duration::hours(24);
        let mut record = StatusRecord::new();
        assert_eq!(recoverability(&record, now, window), Recoverability::Idle);

        record.insert(JobName::Segment, TaskEntry::new(TaskStatus::Running, None, now - Duration::hours(30)));
        assert_eq!(recoverability(&record, now, window), Recoverability::Expired);

        record.insert(JobName::Convert, TaskEntry::new(TaskStatus::Done, None, now - Duration::hours(1)));
        assert_eq!(recoverability(&record, now, window), Recoverability::Recoverable);
    }
}
