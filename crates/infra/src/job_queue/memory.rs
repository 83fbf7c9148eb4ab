//! In-memory broker for tests/dev and single-process deployments.
//!
//! Jobs move `scheduled → reserved → active`. Only the head of a chain is
//! published; the rest is carried along and published when the head
//! succeeds, like a broker-side chain primitive would.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use folio_workflow::{ChainId, JobId, JobLifecycle, JobSpec, LiveJobs, TaskChain};

use super::{JobOutcome, JobQueue, JobQueueError, JobSource, QueueEvent};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone)]
struct Published {
    job: JobSpec,
    /// Chain continuation, published after `job` succeeds.
    rest: Vec<JobSpec>,
}

#[derive(Debug, Default)]
struct QueueState {
    scheduled: VecDeque<Published>,
    reserved: HashMap<JobId, (String, Published)>,
    active: HashMap<JobId, (String, Published)>,
    revoked: HashSet<JobId>,
    events: Vec<QueueEvent>,
}

impl QueueState {
    /// Publish `jobs[0]` carrying the rest; revoked heads drop the remainder.
    fn publish(&mut self, mut jobs: Vec<JobSpec>) {
        if jobs.is_empty() {
            return;
        }
        let rest = jobs.split_off(1);
        let job = jobs.remove(0);
        if self.revoked.remove(&job.id) {
            debug!(job_id = %job.id, job = %job.name, "skipping revoked job and its continuation");
            return;
        }
        self.events.push(QueueEvent::for_job(&job, JobLifecycle::Queued));
        self.scheduled.push_back(Published { job, rest });
    }

    /// Whether `job_id` is still to be published as part of something held.
    fn carries(&self, job_id: JobId) -> bool {
        self.scheduled
            .iter()
            .chain(self.reserved.values().map(|(_, p)| p))
            .chain(self.active.values().map(|(_, p)| p))
            .any(|p| {
                contains_job(&p.job.linked, job_id) || contains_job(&p.rest, job_id)
            })
    }
}

impl QueueState {
    /// Drop revoke marks for jobs that will never be published now.
    fn forget(&mut self, jobs: &[JobSpec]) {
        for job in jobs {
            self.revoked.remove(&job.id);
            self.forget(&job.linked);
        }
    }

    fn forget_carried(&mut self, published: &Published) {
        self.forget(&published.job.linked);
        self.forget(&published.rest);
    }
}

fn contains_job(jobs: &[JobSpec], job_id: JobId) -> bool {
    jobs.iter()
        .any(|j| j.id == job_id || contains_job(&j.linked, job_id))
}

#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::named(DEFAULT_QUEUE)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>, JobQueueError> {
        self.state
            .lock()
            .map_err(|_| JobQueueError::Backend("queue lock poisoned".to_string()))
    }

    /// Jobs waiting for a worker.
    pub fn scheduled_len(&self) -> usize {
        self.state().map(|s| s.scheduled.len()).unwrap_or(0)
    }

    /// Drop everything the broker holds (simulates a flushed broker).
    pub fn purge(&self) -> Result<usize, JobQueueError> {
        let mut state = self.state()?;
        let dropped = state.scheduled.len() + state.reserved.len() + state.active.len();
        state.scheduled.clear();
        state.reserved.clear();
        state.active.clear();
        state.revoked.clear();
        state.events.clear();
        Ok(dropped)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn by_worker<'a>(
    entries: impl Iterator<Item = (&'a JobId, &'a (String, Published))>,
) -> BTreeMap<String, Vec<JobId>> {
    let mut grouped: BTreeMap<String, Vec<JobId>> = BTreeMap::new();
    for (id, (worker, _)) in entries {
        grouped.entry(worker.clone()).or_default().push(*id);
    }
    for ids in grouped.values_mut() {
        ids.sort();
    }
    grouped
}

impl JobQueue for InMemoryJobQueue {
    fn submit_chain(&self, chain: TaskChain) -> Result<ChainId, JobQueueError> {
        if chain.jobs.is_empty() {
            return Err(JobQueueError::EmptyChain);
        }
        let chain_id = ChainId::new();
        debug!(
            chain_id = %chain_id,
            part_id = %chain.part_id,
            jobs = ?chain.names(),
            "chain submitted"
        );
        self.state()?.publish(chain.jobs);
        Ok(chain_id)
    }

    fn inspect_live(&self) -> Result<LiveJobs, JobQueueError> {
        let state = self.state()?;
        let mut live = LiveJobs {
            reserved: by_worker(state.reserved.iter()),
            active: by_worker(state.active.iter()),
            ..Default::default()
        };
        if !state.scheduled.is_empty() {
            live.scheduled.insert(
                self.name.clone(),
                state.scheduled.iter().map(|p| p.job.id).collect(),
            );
        }
        Ok(live)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), JobQueueError> {
        let mut state = self.state()?;

        if let Some(at) = state.scheduled.iter().position(|p| p.job.id == job_id) {
            if let Some(dropped) = state.scheduled.remove(at) {
                state.forget_carried(&dropped);
            }
            debug!(job_id = %job_id, "revoked waiting job");
        } else if state.reserved.contains_key(&job_id) {
            // the claiming worker learns about it on start
            state.revoked.insert(job_id);
            debug!(job_id = %job_id, "revoked claimed job");
        } else if state.active.contains_key(&job_id) {
            state.revoked.insert(job_id);
            debug!(job_id = %job_id, "terminate requested for running job");
        } else if state.carries(job_id) {
            state.revoked.insert(job_id);
            debug!(job_id = %job_id, "revoke recorded for a job not yet published");
        } else {
            debug!(job_id = %job_id, "revoke for a job the broker no longer holds");
        }
        Ok(())
    }
}

impl JobSource for InMemoryJobQueue {
    fn claim(&self, worker: &str) -> Result<Option<JobSpec>, JobQueueError> {
        let mut state = self.state()?;
        let Some(published) = state.scheduled.pop_front() else {
            return Ok(None);
        };
        let job = published.job.clone();
        state
            .reserved
            .insert(job.id, (worker.to_string(), published));
        state
            .events
            .push(QueueEvent::for_job(&job, JobLifecycle::BeforeDispatch));
        Ok(Some(job))
    }

    fn start(&self, job_id: JobId) -> Result<(), JobQueueError> {
        let mut state = self.state()?;
        if state.revoked.remove(&job_id) {
            if let Some((_, dropped)) = state.reserved.remove(&job_id) {
                state.forget_carried(&dropped);
            }
            return Err(JobQueueError::Revoked(job_id));
        }
        let entry = state
            .reserved
            .remove(&job_id)
            .ok_or(JobQueueError::UnknownJob(job_id))?;
        state.active.insert(job_id, entry);
        Ok(())
    }

    fn finish(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), JobQueueError> {
        let mut state = self.state()?;
        let (_, published) = state
            .active
            .remove(&job_id)
            .ok_or(JobQueueError::UnknownJob(job_id))?;

        if state.revoked.remove(&job_id) {
            state.forget_carried(&published);
            debug!(job_id = %job_id, "revoked job settled; continuation dropped");
            return Ok(());
        }

        match outcome {
            JobOutcome::Succeeded => {
                let Published { job, rest } = published;
                state.publish(job.linked);
                state.publish(rest);
            }
            JobOutcome::Failed(reason) => {
                state.forget_carried(&published);
                debug!(job_id = %job_id, reason = %reason, "job failed; chain stopped");
            }
        }
        Ok(())
    }

    fn drain_events(&self) -> Vec<QueueEvent> {
        self.state()
            .map(|mut s| std::mem::take(&mut s.events))
            .unwrap_or_default()
    }
}
