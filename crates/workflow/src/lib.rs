//! Per-part processing workflow (pure domain logic, no IO).
//!
//! A document part moves through a fixed pipeline of stages
//! (convert → segment → transcribe) driven by background jobs. This crate
//! decides *what* should happen:
//!
//! - which jobs to chain for a requested operation (`plan`)
//! - how job lifecycle notifications rewrite the status record and stage
//!   (`lifecycle`)
//! - what to revoke on cancellation (`cancel`)
//! - how to reconcile a drifted status record with the live queue
//!   (`recovery`)
//! - the natural reading order of segmented lines (`ordering`)
//!
//! Adapters for the status store, job queue and persistence live in
//! `folio-infra`.

pub mod cancel;
pub mod error;
pub mod job;
pub mod layout;
pub mod lifecycle;
pub mod notification;
pub mod ordering;
pub mod part;
pub mod plan;
pub mod recovery;
pub mod segmentation;
pub mod stage;
pub mod status;
pub mod transcription;

pub use cancel::{CancelPlan, plan_cancellation};
pub use error::ProcessError;
pub use job::{
    ChainId, JobId, JobName, JobParams, JobSpec, ModelRef, Operation, SegmentOptions,
    SegmentSteps, StageTransition, TaskChain, TextDirection, TranscribeOptions,
};
pub use layout::{Block, Document, Line, ReadDirection, Script, Typology};
pub use lifecycle::{JobLifecycle, LifecycleDecision, apply_lifecycle};
pub use notification::{NotificationKind, PartNotification};
pub use ordering::{OrderChange, contiguous_order_changes, reading_order, reorder_changes};
pub use part::{DocumentPart, ImageRef, PartCommand, PartEvent, PartSnapshot, StageChangeReason};
pub use plan::{ChainSettings, OperationOptions, ensure_idle, plan_operation};
pub use recovery::{LiveJobs, Recoverability, RecoveryOutcome, reconcile, recoverability};
pub use segmentation::{PredictedLine, SegmentationChangeset, SegmentationResult, build_changeset};
pub use stage::WorkflowStage;
pub use status::{StatusRecord, StepState, TaskEntry, TaskStatus, WorkflowView, workflow_view};
pub use transcription::{
    LineDescription, LineTranscription, Transcription, describe_line, transcription_progress,
};
