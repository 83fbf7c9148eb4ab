//! Background thread running the recovery sweep periodically.

use std::io;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use folio_events::EventBus;
use folio_workflow::PartNotification;

use crate::job_queue::JobQueue;
use crate::orchestrator::{SweepReport, Workflow, WorkflowError};
use crate::repository::PartRepository;
use crate::status_store::StatusStore;

/// Something that can reconcile every tracked part in one pass.
pub trait Sweep: Send + Sync {
    fn sweep(&self) -> Result<SweepReport, WorkflowError>;
}

impl<S, Q, R, B> Sweep for Workflow<S, Q, R, B>
where
    S: StatusStore,
    Q: JobQueue,
    R: PartRepository,
    B: EventBus<PartNotification>,
{
    fn sweep(&self) -> Result<SweepReport, WorkflowError> {
        Workflow::sweep(self)
    }
}

impl<T: Sweep + ?Sized> Sweep for Arc<T> {
    fn sweep(&self) -> Result<SweepReport, WorkflowError> {
        (**self).sweep()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub sweeps: u64,
    pub sweeps_failed: u64,
    pub parts_recovered: u64,
    pub parts_expired: u64,
}

#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for an in-flight pass to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
pub struct RecoverySweeper;

impl RecoverySweeper {
    /// Sweep every `interval`, starting one interval after spawning.
    pub fn spawn<W>(target: W, interval: Duration) -> io::Result<SweeperHandle>
    where
        W: Sweep + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name("folio-recovery-sweeper".to_string())
            .spawn(move || sweeper_loop(target, interval, shutdown_rx, stats_clone))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweeper_loop<W: Sweep>(
    target: W,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SweeperStats>>,
) {
    info!(interval_secs = interval.as_secs(), "recovery sweeper started");

    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let result = target.sweep();
        let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
        s.sweeps += 1;
        match result {
            Ok(report) => {
                s.parts_recovered += report.recovered.len() as u64;
                s.parts_expired += report.expired.len() as u64;
            }
            Err(e) => {
                s.sweeps_failed += 1;
                error!(error = %e, "recovery sweep failed");
            }
        }
    }

    info!("recovery sweeper stopped");
}
