use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_core::{Aggregate, AggregateRoot, DocumentId, DomainError, PartId};
use folio_events::Event;

use crate::job::JobName;
use crate::stage::WorkflowStage;

/// Stored page image handed to the codecs and inference collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// Aggregate root: DocumentPart (one page moving through the pipeline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPart {
    id: PartId,
    document_id: Option<DocumentId>,
    name: String,
    image: Option<ImageRef>,
    stage: WorkflowStage,
    progress: u8,
    version: u64,
    created: bool,
    updated_at: Option<DateTime<Utc>>,
}

/// Persisted shape of a part (stage as its small integer encoding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSnapshot {
    pub id: PartId,
    pub document_id: DocumentId,
    pub name: String,
    pub image: ImageRef,
    pub stage: u8,
    pub progress: u8,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl DocumentPart {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PartId) -> Self {
        Self {
            id,
            document_id: None,
            name: String::new(),
            image: None,
            stage: WorkflowStage::Created,
            progress: 0,
            version: 0,
            created: false,
            updated_at: None,
        }
    }

    /// Build a freshly created part.
    pub fn create(
        document_id: DocumentId,
        name: impl Into<String>,
        image: ImageRef,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let id = PartId::new();
        let mut part = Self::empty(id);
        part.execute(&PartCommand::Create {
            part_id: id,
            document_id,
            name: name.into(),
            image,
            occurred_at,
        })?;
        Ok(part)
    }

    pub fn from_snapshot(s: PartSnapshot) -> Result<Self, DomainError> {
        if s.progress > 100 {
            return Err(DomainError::validation("progress must be within 0..=100"));
        }
        Ok(Self {
            id: s.id,
            document_id: Some(s.document_id),
            name: s.name,
            image: Some(s.image),
            stage: WorkflowStage::try_from(s.stage)?,
            progress: s.progress,
            version: s.version,
            created: true,
            updated_at: Some(s.updated_at),
        })
    }

    pub fn snapshot(&self) -> Result<PartSnapshot, DomainError> {
        match (self.created, self.document_id, &self.image, self.updated_at) {
            (true, Some(document_id), Some(image), Some(updated_at)) => Ok(PartSnapshot {
                id: self.id,
                document_id,
                name: self.name.clone(),
                image: image.clone(),
                stage: self.stage.as_u8(),
                progress: self.progress,
                version: self.version,
                updated_at,
            }),
            _ => Err(DomainError::invariant("part was never created")),
        }
    }

    pub fn id_typed(&self) -> PartId {
        self.id
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.document_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for DocumentPart {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartCommand {
    Create {
        part_id: PartId,
        document_id: DocumentId,
        name: String,
        image: ImageRef,
        occurred_at: DateTime<Utc>,
    },
    /// A job started executing: enter its in-progress stage (never backwards).
    Begin {
        job: JobName,
        occurred_at: DateTime<Utc>,
    },
    /// A job succeeded: advance to its completed stage (never backwards).
    Complete {
        job: JobName,
        occurred_at: DateTime<Utc>,
    },
    /// A job was lost or canceled mid-flight: fall back to the stable stage
    /// preceding it, if the part is still in that job's in-progress stage.
    RollBack {
        job: JobName,
        occurred_at: DateTime<Utc>,
    },
    UpdateProgress {
        progress: u8,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageChangeReason {
    Advanced,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartEvent {
    PartCreated {
        part_id: PartId,
        document_id: DocumentId,
        name: String,
        image: ImageRef,
        occurred_at: DateTime<Utc>,
    },
    StageChanged {
        part_id: PartId,
        from: WorkflowStage,
        to: WorkflowStage,
        reason: StageChangeReason,
        occurred_at: DateTime<Utc>,
    },
    ProgressUpdated {
        part_id: PartId,
        progress: u8,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for PartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartEvent::PartCreated { .. } => "part.created",
            PartEvent::StageChanged {
                reason: StageChangeReason::Advanced,
                ..
            } => "part.stage.advanced",
            PartEvent::StageChanged {
                reason: StageChangeReason::RolledBack,
                ..
            } => "part.stage.rolled_back",
            PartEvent::ProgressUpdated { .. } => "part.progress.updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartEvent::PartCreated { occurred_at, .. }
            | PartEvent::StageChanged { occurred_at, .. }
            | PartEvent::ProgressUpdated { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for DocumentPart {
    type Command = PartCommand;
    type Event = PartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartEvent::PartCreated {
                part_id,
                document_id,
                name,
                image,
                occurred_at,
            } => {
                self.id = *part_id;
                self.document_id = Some(*document_id);
                self.name = name.clone();
                self.image = Some(image.clone());
                self.stage = WorkflowStage::Created;
                self.progress = 0;
                self.created = true;
                self.updated_at = Some(*occurred_at);
            }
            PartEvent::StageChanged { to, occurred_at, .. } => {
                self.stage = *to;
                self.updated_at = Some(*occurred_at);
            }
            PartEvent::ProgressUpdated {
                progress,
                occurred_at,
                ..
            } => {
                self.progress = *progress;
                self.updated_at = Some(*occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartCommand::Create {
                part_id,
                document_id,
                name,
                image,
                occurred_at,
            } => {
                if self.created {
                    return Err(DomainError::conflict("part already exists"));
                }
                if *part_id != self.id {
                    return Err(DomainError::invariant("part_id mismatch"));
                }
                Ok(vec![PartEvent::PartCreated {
                    part_id: *part_id,
                    document_id: *document_id,
                    name: name.clone(),
                    image: image.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PartCommand::Begin { job, occurred_at } => {
                self.ensure_created()?;
                Ok(job
                    .transition()
                    .filter(|t| self.stage < t.in_progress)
                    .map(|t| self.stage_changed(t.in_progress, StageChangeReason::Advanced, *occurred_at))
                    .into_iter()
                    .collect())
            }
            PartCommand::Complete { job, occurred_at } => {
                self.ensure_created()?;
                Ok(job
                    .transition()
                    .filter(|t| self.stage < t.completed)
                    .map(|t| self.stage_changed(t.completed, StageChangeReason::Advanced, *occurred_at))
                    .into_iter()
                    .collect())
            }
            PartCommand::RollBack { job, occurred_at } => {
                self.ensure_created()?;
                Ok(job
                    .transition()
                    .filter(|t| self.stage == t.in_progress)
                    .map(|t| self.stage_changed(t.rollback, StageChangeReason::RolledBack, *occurred_at))
                    .into_iter()
                    .collect())
            }
            PartCommand::UpdateProgress {
                progress,
                occurred_at,
            } => {
                self.ensure_created()?;
                if *progress > 100 {
                    return Err(DomainError::validation("progress must be within 0..=100"));
                }
                if *progress == self.progress {
                    return Ok(vec![]);
                }
                Ok(vec![PartEvent::ProgressUpdated {
                    part_id: self.id,
                    progress: *progress,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl DocumentPart {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn stage_changed(
        &self,
        to: WorkflowStage,
        reason: StageChangeReason,
        occurred_at: DateTime<Utc>,
    ) -> PartEvent {
        PartEvent::StageChanged {
            part_id: self.id,
            from: self.stage,
            to,
            reason,
            occurred_at,
        }
    }
}
