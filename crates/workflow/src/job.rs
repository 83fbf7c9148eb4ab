//! Job names, job descriptors and chains.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::{DomainError, ModelId, PartId};

use crate::layout::ReadDirection;
use crate::stage::WorkflowStage;

/// Unique job identifier, minted when the job is described (before submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier returned by the queue for a submitted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub Uuid);

impl ChainId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of background jobs a part can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    Convert,
    LosslessCompression,
    #[serde(rename = "generate_part_thumbnails")]
    GenerateThumbnails,
    Segment,
    Transcribe,
}

/// Stage values a pipeline job moves a part through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransition {
    /// Stage while the job executes.
    pub in_progress: WorkflowStage,
    /// Stable stage to fall back to when the job is lost.
    pub rollback: WorkflowStage,
    /// Stage reached when the job succeeds.
    pub completed: WorkflowStage,
}

impl JobName {
    /// Jobs that drive the part's stage, in pipeline order.
    pub const PIPELINE: [JobName; 3] = [JobName::Convert, JobName::Segment, JobName::Transcribe];

    pub fn as_str(self) -> &'static str {
        match self {
            JobName::Convert => "convert",
            JobName::LosslessCompression => "lossless_compression",
            JobName::GenerateThumbnails => "generate_part_thumbnails",
            JobName::Segment => "segment",
            JobName::Transcribe => "transcribe",
        }
    }

    /// Foundational jobs (conversion and its image follow-ups) always run to
    /// completion.
    pub fn is_cancelable(self) -> bool {
        !matches!(
            self,
            JobName::Convert | JobName::LosslessCompression | JobName::GenerateThumbnails
        )
    }

    pub fn transition(self) -> Option<StageTransition> {
        match self {
            JobName::Convert => Some(StageTransition {
                in_progress: WorkflowStage::Converting,
                rollback: WorkflowStage::Created,
                completed: WorkflowStage::Converted,
            }),
            JobName::Segment => Some(StageTransition {
                in_progress: WorkflowStage::Segmenting,
                rollback: WorkflowStage::Converted,
                completed: WorkflowStage::Segmented,
            }),
            JobName::Transcribe => Some(StageTransition {
                in_progress: WorkflowStage::Transcribing,
                rollback: WorkflowStage::Segmented,
                completed: WorkflowStage::Transcribing,
            }),
            JobName::LosslessCompression | JobName::GenerateThumbnails => None,
        }
    }
}

impl core::fmt::Display for JobName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "convert" => Ok(JobName::Convert),
            "lossless_compression" => Ok(JobName::LosslessCompression),
            "generate_part_thumbnails" => Ok(JobName::GenerateThumbnails),
            "segment" => Ok(JobName::Segment),
            "transcribe" => Ok(JobName::Transcribe),
            other => Err(DomainError::validation(format!("unknown job: {other}"))),
        }
    }
}

/// Operations a caller may request for a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Convert,
    Segment,
    Transcribe,
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "convert" => Ok(Operation::Convert),
            "segment" => Ok(Operation::Segment),
            "transcribe" => Ok(Operation::Transcribe),
            other => Err(DomainError::validation(format!("unknown operation: {other}"))),
        }
    }
}

/// Writing direction hint passed to inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextDirection {
    #[default]
    #[serde(rename = "horizontal-lr")]
    HorizontalLr,
    #[serde(rename = "horizontal-rl")]
    HorizontalRl,
    #[serde(rename = "vertical-lr")]
    VerticalLr,
    #[serde(rename = "vertical-rl")]
    VerticalRl,
}

impl TextDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TextDirection::HorizontalLr => "horizontal-lr",
            TextDirection::HorizontalRl => "horizontal-rl",
            TextDirection::VerticalLr => "vertical-lr",
            TextDirection::VerticalRl => "vertical-rl",
        }
    }
}

/// Opaque handle to a trained model understood by the inference collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: ModelId,
    pub name: String,
    /// Location of the model file or registry key.
    pub handle: String,
}

/// Which layout elements a segmentation pass produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSteps {
    Lines,
    Regions,
    #[default]
    Both,
}

impl SegmentSteps {
    pub fn includes_lines(self) -> bool {
        matches!(self, SegmentSteps::Lines | SegmentSteps::Both)
    }

    pub fn includes_regions(self) -> bool {
        matches!(self, SegmentSteps::Regions | SegmentSteps::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentOptions {
    pub steps: SegmentSteps,
    /// Drop existing elements of the segmented kinds first.
    #[serde(default)]
    pub override_existing: bool,
    pub text_direction: Option<TextDirection>,
    pub read_direction: Option<ReadDirection>,
    pub model: Option<ModelRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranscribeOptions {
    pub model: Option<ModelRef>,
    pub text_direction: Option<TextDirection>,
}

/// Job arguments, serialized into the queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    #[default]
    None,
    Segment(SegmentOptions),
    Transcribe(TranscribeOptions),
}

/// One job of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub name: JobName,
    pub part_id: PartId,
    pub params: JobParams,
    /// Jobs run in order after this one succeeds, outside the main chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked: Vec<JobSpec>,
}

impl JobSpec {
    pub fn new(name: JobName, part_id: PartId) -> Self {
        Self {
            id: JobId::new(),
            name,
            part_id,
            params: JobParams::None,
            linked: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    pub fn link(mut self, job: JobSpec) -> Self {
        self.linked.push(job);
        self
    }
}

/// Ordered jobs submitted for one part as a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChain {
    pub part_id: PartId,
    pub jobs: Vec<JobSpec>,
    pub created_at: DateTime<Utc>,
}

impl TaskChain {
    pub fn new(part_id: PartId, jobs: Vec<JobSpec>, created_at: DateTime<Utc>) -> Self {
        Self {
            part_id,
            jobs,
            created_at,
        }
    }

    /// Last job of the main chain (the one seeded as pending).
    pub fn last(&self) -> Option<&JobSpec> {
        self.jobs.last()
    }

    pub fn names(&self) -> Vec<JobName> {
        self.jobs.iter().map(|j| j.name).collect()
    }

    /// Every job id of the chain, linked jobs included.
    pub fn job_ids(&self) -> Vec<JobId> {
        fn collect(jobs: &[JobSpec], out: &mut Vec<JobId>) {
            for j in jobs {
                out.push(j.id);
                collect(&j.linked, out);
            }
        }
        let mut out = Vec::new();
        collect(&self.jobs, &mut out);
        out
    }
}
