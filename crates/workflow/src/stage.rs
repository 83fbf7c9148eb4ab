use serde::{Deserialize, Serialize};

use folio_core::DomainError;

/// Position of a part in the processing pipeline.
///
/// Persisted as a small integer. Values 3 and 4 belonged to a retired
/// binarization stage and are rejected on decode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum WorkflowStage {
    Created = 0,
    Converting = 1,
    Converted = 2,
    Segmenting = 5,
    Segmented = 6,
    Transcribing = 7,
}

impl WorkflowStage {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkflowStage::Created => "Created",
            WorkflowStage::Converting => "Converting",
            WorkflowStage::Converted => "Converted",
            WorkflowStage::Segmenting => "Segmenting",
            WorkflowStage::Segmented => "Segmented",
            WorkflowStage::Transcribing => "Transcribing",
        }
    }

    pub fn is_converted(self) -> bool {
        self >= WorkflowStage::Converted
    }
}

impl TryFrom<u8> for WorkflowStage {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WorkflowStage::Created),
            1 => Ok(WorkflowStage::Converting),
            2 => Ok(WorkflowStage::Converted),
            5 => Ok(WorkflowStage::Segmenting),
            6 => Ok(WorkflowStage::Segmented),
            7 => Ok(WorkflowStage::Transcribing),
            other => Err(DomainError::validation(format!(
                "unknown workflow stage: {other}"
            ))),
        }
    }
}

impl From<WorkflowStage> for u8 {
    fn from(stage: WorkflowStage) -> Self {
        stage.as_u8()
    }
}

impl core::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}
