//! Events pushed to document watchers when a part changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_core::{DocumentId, PartId};
use folio_events::Event;

use crate::stage::WorkflowStage;
use crate::status::WorkflowView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    New,
    Delete,
    Workflow,
}

impl NotificationKind {
    pub fn name(self) -> &'static str {
        match self {
            NotificationKind::New => "part:new",
            NotificationKind::Delete => "part:delete",
            NotificationKind::Workflow => "part:workflow",
        }
    }
}

/// Broadcast on the document channel; `view` is only set for workflow updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartNotification {
    pub kind: NotificationKind,
    pub document_id: DocumentId,
    pub part_id: PartId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<WorkflowView>,
    pub occurred_at: DateTime<Utc>,
}

impl PartNotification {
    pub fn new_part(document_id: DocumentId, part_id: PartId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::New,
            document_id,
            part_id,
            stage: None,
            view: None,
            occurred_at,
        }
    }

    pub fn deleted(document_id: DocumentId, part_id: PartId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::Delete,
            ..Self::new_part(document_id, part_id, occurred_at)
        }
    }

    pub fn workflow(
        document_id: DocumentId,
        part_id: PartId,
        stage: WorkflowStage,
        view: WorkflowView,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: NotificationKind::Workflow,
            stage: Some(stage),
            view: Some(view),
            ..Self::new_part(document_id, part_id, occurred_at)
        }
    }
}

impl Event for PartNotification {
    fn event_type(&self) -> &'static str {
        self.kind.name()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StepState;

    #[test]
    fn workflow_notification_carries_the_view() {
        let view = WorkflowView {
            convert: Some(StepState::Done),
            segment: Some(StepState::Ongoing),
            transcribe: None,
        };
        let n = PartNotification::workflow(
            DocumentId::new(),
            PartId::new(),
            WorkflowStage::Segmenting,
            view,
            Utc::now(),
        );

        assert_eq!(n.event_type(), "part:workflow");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["stage"], 5);
        assert_eq!(json["view"]["segment"], "ongoing");
        assert!(json["view"].get("transcribe").is_none());
    }

    #[test]
    fn new_and_delete_have_no_payload() {
        let (doc, part) = (DocumentId::new(), PartId::new());
        let json = serde_json::to_value(PartNotification::deleted(doc, part, Utc::now())).unwrap();
        assert_eq!(json["kind"], "delete");
        assert!(json.get("view").is_none());
        assert_eq!(PartNotification::new_part(doc, part, Utc::now()).event_type(), "part:new");
    }
}
