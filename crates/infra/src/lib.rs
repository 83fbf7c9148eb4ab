//! Adapters and services around the part workflow.
//!
//! - `status_store`: out-of-band status records (in-memory, Redis)
//! - `job_queue`: the broker seam and an in-memory broker
//! - `repository`: parts, layout and transcriptions
//! - `inference`: segmentation, recognition and image collaborators
//! - `orchestrator`: the `Workflow` service tying them together
//! - `worker` / `sweeper`: background threads driving jobs and recovery

pub mod config;
pub mod inference;
pub mod job_queue;
pub mod orchestrator;
pub mod repository;
pub mod status_store;
pub mod sweeper;
pub mod worker;

pub use config::WorkflowConfig;
pub use inference::{
    Collaborators, ImageProcessor, InferenceError, PassthroughImages, Recognizer,
    SegmentationRequest, Segmenter,
};
pub use job_queue::{InMemoryJobQueue, JobOutcome, JobQueue, JobQueueError, JobSource, QueueEvent};
pub use orchestrator::{SweepReport, Workflow, WorkflowError};
pub use repository::{InMemoryPartRepository, PartRepository, RepositoryError};
#[cfg(feature = "redis")]
pub use status_store::RedisStatusStore;
pub use status_store::{InMemoryStatusStore, StatusRecords, StatusStore, StatusStoreError, TrainingLookup};
pub use sweeper::{RecoverySweeper, Sweep, SweeperHandle, SweeperStats};
pub use worker::{JobHandler, JobRun, JobWorker, WorkerConfig, WorkerHandle, WorkerStats};
