//! Job queue adapter.
//!
//! The workflow only relies on three broker operations: submit a chain,
//! inspect the live jobs, revoke a job. Workers use the [`JobSource`] side
//! to claim and settle jobs.

pub mod memory;

pub use memory::InMemoryJobQueue;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use folio_core::PartId;
use folio_workflow::{ChainId, JobId, JobLifecycle, JobName, JobSpec, LiveJobs, TaskChain};

/// Producer side of the broker.
pub trait JobQueue: Send + Sync {
    /// Publish `chain`; its jobs run in order, each after the previous one
    /// succeeded. Linked jobs run after their parent, outside the chain.
    fn submit_chain(&self, chain: TaskChain) -> Result<ChainId, JobQueueError>;

    /// Job ids currently scheduled, reserved by a worker, or executing.
    fn inspect_live(&self) -> Result<LiveJobs, JobQueueError>;

    /// Revoke a job, terminating it if already running. Advisory: a job in a
    /// non-interruptible section may still complete.
    fn cancel(&self, job_id: JobId) -> Result<(), JobQueueError>;
}

/// Worker side of the broker.
pub trait JobSource: Send + Sync {
    /// Reserve the next ready job for `worker`.
    fn claim(&self, worker: &str) -> Result<Option<JobSpec>, JobQueueError>;

    /// Move a reserved job to executing. Fails if it was revoked meanwhile.
    fn start(&self, job_id: JobId) -> Result<(), JobQueueError>;

    /// Settle an executing job and publish whatever follows it.
    fn finish(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), JobQueueError>;

    /// Lifecycle notifications produced by the broker since the last drain.
    fn drain_events(&self) -> Vec<QueueEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

/// Lifecycle notification for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub job_id: JobId,
    pub name: JobName,
    pub part_id: PartId,
    pub event: JobLifecycle,
}

impl QueueEvent {
    pub fn for_job(job: &JobSpec, event: JobLifecycle) -> Self {
        Self {
            job_id: job.id,
            name: job.name,
            part_id: job.part_id,
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobQueueError {
    #[error("cannot submit an empty chain")]
    EmptyChain,
    #[error("job not held by the queue: {0}")]
    UnknownJob(JobId),
    #[error("job was revoked: {0}")]
    Revoked(JobId),
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl<T: JobQueue + ?Sized> JobQueue for Arc<T> {
    fn submit_chain(&self, chain: TaskChain) -> Result<ChainId, JobQueueError> {
        (**self).submit_chain(chain)
    }

    fn inspect_live(&self) -> Result<LiveJobs, JobQueueError> {
        (**self).inspect_live()
    }

    fn cancel(&self, job_id: JobId) -> Result<(), JobQueueError> {
        (**self).cancel(job_id)
    }
}

impl<T: JobSource + ?Sized> JobSource for Arc<T> {
    fn claim(&self, worker: &str) -> Result<Option<JobSpec>, JobQueueError> {
        (**self).claim(worker)
    }

    fn start(&self, job_id: JobId) -> Result<(), JobQueueError> {
        (**self).start(job_id)
    }

    fn finish(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), JobQueueError> {
        (**self).finish(job_id, outcome)
    }

    fn drain_events(&self) -> Vec<QueueEvent> {
        (**self).drain_events()
    }
}
