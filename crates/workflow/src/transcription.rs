//! Transcriptions and what a recognizer gets to see of a line.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use folio_core::{DocumentId, Entity, LineId, TranscriptionId};
use folio_geometry::{Polygon, Polyline};

use crate::job::TextDirection;
use crate::layout::Line;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<]+?>").expect("markup pattern compiles"));

/// A named layer of text for a document (one per model, plus `manual`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub id: TranscriptionId,
    pub document_id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Transcription {
    /// Layer created for hand-typed text and when no model is given.
    pub const DEFAULT_NAME: &'static str = "manual";

    pub fn new(document_id: DocumentId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TranscriptionId::new(),
            document_id,
            name: name.into(),
            archived: false,
            created_at,
        }
    }

    /// Layer name used for a recognition model's output.
    pub fn model_layer_name(model_name: &str) -> String {
        format!("model:{model_name}")
    }
}

impl Entity for Transcription {
    type Id = TranscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTranscription {
    pub line_id: LineId,
    pub transcription_id: TranscriptionId,
    /// Raw content, may contain inline markup.
    pub content: String,
}

impl LineTranscription {
    /// Content with markup tags removed.
    pub fn text(&self) -> String {
        MARKUP.replace_all(&self.content, "").into_owned()
    }
}

/// Share of lines with a transcription, as a whole percentage.
pub fn transcription_progress(transcribed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = transcribed.saturating_mul(100) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Geometry handed to the recognizer for one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineDescription {
    Baseline {
        baseline: Polyline,
        boundary: Option<Polygon>,
        text_direction: TextDirection,
    },
    /// Lines without a baseline are described by their box.
    Box {
        bbox: [f64; 4],
        text_direction: TextDirection,
    },
}

pub fn describe_line(line: &Line, text_direction: TextDirection) -> LineDescription {
    match &line.baseline {
        Some(baseline) => LineDescription::Baseline {
            baseline: baseline.clone(),
            boundary: line.mask.clone(),
            text_direction,
        },
        None => LineDescription::Box {
            bbox: line.bounding_box().as_array(),
            text_direction,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::PartId;
    use folio_geometry::Point;

    #[test]
    fn text_strips_markup() {
        let lt = LineTranscription {
            line_id: LineId::new(),
            transcription_id: TranscriptionId::new(),
            content: "<b>Hello</b> <i class=\"x\">world</i>".into(),
        };
        assert_eq!(lt.text(), "Hello world");
    }

    #[test]
    fn progress_is_capped_and_guards_empty_parts() {
        assert_eq!(transcription_progress(0, 0), 0);
        assert_eq!(transcription_progress(1, 3), 33);
        assert_eq!(transcription_progress(3, 3), 100);
        assert_eq!(transcription_progress(5, 3), 100);
    }

    #[test]
    fn model_layers_are_prefixed() {
        assert_eq!(Transcription::model_layer_name("generic"), "model:generic");
        let t = Transcription::new(DocumentId::new(), Transcription::DEFAULT_NAME, Utc::now());
        assert!(!t.archived);
        assert_eq!(t.name, "manual");
    }

    #[test]
    fn box_description_for_mask_only_lines() {
        let part = PartId::new();
        let mask = Polygon::new(vec![
            Point::new(1.0, 2.0),
            Point::new(11.0, 2.0),
            Point::new(11.0, 8.0),
        ])
        .unwrap();
        let line = Line::new(part, None, Some(mask)).unwrap();

        match describe_line(&line, TextDirection::HorizontalRl) {
            LineDescription::Box { bbox, text_direction } => {
                assert_eq!(bbox, [1.0, 2.0, 11.0, 8.0]);
                assert_eq!(text_direction, TextDirection::HorizontalRl);
            }
            other => panic!("unexpected description: {other:?}"),
        }

        let with_baseline = Line::new(
            part,
            Some(Polyline::new(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)]).unwrap()),
            None,
        )
        .unwrap();
        assert!(matches!(
            describe_line(&with_baseline, TextDirection::default()),
            LineDescription::Baseline { boundary: None, .. }
        ));
    }
}
