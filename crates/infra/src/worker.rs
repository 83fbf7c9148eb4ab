//! Job worker: claims jobs from the broker and runs their bodies.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use folio_events::EventBus;
use folio_workflow::{JobLifecycle, JobSpec, PartNotification};

use crate::job_queue::{JobOutcome, JobQueue, JobQueueError, JobSource, QueueEvent};
use crate::orchestrator::Workflow;
use crate::repository::PartRepository;
use crate::status_store::StatusStore;

/// What a worker needs from the service that owns the jobs.
pub trait JobHandler: Send + Sync {
    /// Record a lifecycle notification. Failures are the handler's to log.
    fn handle_event(&self, event: &QueueEvent);

    fn run(&self, job: &JobSpec) -> Result<(), String>;
}

impl<S, Q, R, B> JobHandler for Workflow<S, Q, R, B>
where
    S: StatusStore,
    Q: JobQueue,
    R: PartRepository,
    B: EventBus<PartNotification>,
{
    fn handle_event(&self, event: &QueueEvent) {
        if let Err(e) = self.on_job_event(event) {
            warn!(part_id = %event.part_id, job = %event.name, error = %e, "lifecycle notification not applied");
        }
    }

    fn run(&self, job: &JobSpec) -> Result<(), String> {
        self.run_job(job).map_err(|e| e.to_string())
    }
}

impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    fn handle_event(&self, event: &QueueEvent) {
        (**self).handle_event(event)
    }

    fn run(&self, job: &JobSpec) -> Result<(), String> {
        (**self).run(job)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when no job is ready.
    pub poll_interval: Duration,
    /// Worker name reported to the broker and in logs.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "folio-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun {
    Succeeded(JobSpec),
    Failed(JobSpec, String),
    /// Revoked between claim and start; the body never ran.
    Revoked(JobSpec),
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_revoked: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, run: &JobRun) {
        self.jobs_processed += 1;
        match run {
            JobRun::Succeeded(_) => self.jobs_succeeded += 1,
            JobRun::Failed(..) => self.jobs_failed += 1,
            JobRun::Revoked(_) => self.jobs_revoked += 1,
        }
    }
}

#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the current job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct JobWorker<J, H> {
    source: J,
    handler: H,
    name: String,
}

impl<J: JobSource, H: JobHandler> JobWorker<J, H> {
    pub fn new(source: J, handler: H) -> Self {
        Self {
            source,
            handler,
            name: WorkerConfig::default().name,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Forward pending broker notifications to the handler.
    pub fn pump_events(&self) -> usize {
        let events = self.source.drain_events();
        for event in &events {
            self.handler.handle_event(event);
        }
        events.len()
    }

    /// Claim and run one job. `Ok(None)` when nothing is ready.
    pub fn run_next(&self) -> Result<Option<JobRun>, JobQueueError> {
        self.pump_events();
        let Some(job) = self.source.claim(&self.name)? else {
            return Ok(None);
        };
        self.pump_events();

        match self.source.start(job.id) {
            Ok(()) => {}
            Err(JobQueueError::Revoked(_)) => {
                debug!(worker = %self.name, job_id = %job.id, job = %job.name, "claimed job was revoked");
                return Ok(Some(JobRun::Revoked(job)));
            }
            Err(e) => return Err(e),
        }
        self.handler
            .handle_event(&QueueEvent::for_job(&job, JobLifecycle::Started));

        let (outcome, lifecycle) = match self.handler.run(&job) {
            Ok(()) => (JobOutcome::Succeeded, JobLifecycle::Succeeded),
            Err(reason) => (
                JobOutcome::Failed(reason.clone()),
                JobLifecycle::Failed { reason },
            ),
        };
        self.handler.handle_event(&QueueEvent::for_job(&job, lifecycle));
        self.source.finish(job.id, &outcome)?;
        self.pump_events();

        Ok(Some(match outcome {
            JobOutcome::Succeeded => JobRun::Succeeded(job),
            JobOutcome::Failed(reason) => JobRun::Failed(job, reason),
        }))
    }

    /// Run jobs until the broker has nothing ready, at most `limit` of them.
    pub fn run_until_idle(&self, limit: usize) -> Result<Vec<JobRun>, JobQueueError> {
        let mut runs = Vec::new();
        while runs.len() < limit {
            match self.run_next()? {
                Some(run) => runs.push(run),
                None => break,
            }
        }
        Ok(runs)
    }
}

impl<J, H> JobWorker<J, H>
where
    J: JobSource + 'static,
    H: JobHandler + 'static,
{
    /// Run the worker loop on a background thread.
    pub fn spawn(self, config: WorkerConfig) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();
        let worker = self.named(config.name.clone());

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(worker, config, shutdown_rx, stats_clone))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<J: JobSource, H: JobHandler>(
    worker: JobWorker<J, H>,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, "job worker started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match worker.run_next() {
            Ok(Some(run)) => {
                if let JobRun::Failed(job, reason) = &run {
                    debug!(worker = %config.name, job_id = %job.id, job = %job.name, reason = %reason, "job failed");
                }
                touch(&stats, start_time).record(&run);
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to run job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, "job worker stopped");
}

fn touch(stats: &Mutex<WorkerStats>, started: Instant) -> MutexGuard<'_, WorkerStats> {
    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
    s.uptime_secs = started.elapsed().as_secs();
    s
}
