//! Turning a requested operation into a job chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::job::{
    JobName, JobParams, JobSpec, ModelRef, Operation, SegmentOptions, SegmentSteps, TaskChain,
    TextDirection, TranscribeOptions,
};
use crate::layout::ReadDirection;
use crate::part::DocumentPart;
use crate::status::StatusRecord;

/// Caller-supplied knobs for an operation request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationOptions {
    pub steps: SegmentSteps,
    #[serde(default)]
    pub override_existing: bool,
    /// Segmentation model for `segment`, recognition model for `transcribe`.
    pub model: Option<ModelRef>,
    pub text_direction: Option<TextDirection>,
    pub read_direction: Option<ReadDirection>,
}

/// Which follow-up jobs get linked after conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSettings {
    pub compress: bool,
    pub thumbnails: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            compress: true,
            thumbnails: true,
        }
    }
}

/// Single-flight guard: refuse while any tracked job is not terminal.
pub fn ensure_idle(record: &StatusRecord) -> Result<(), ProcessError> {
    if record.has_outstanding() {
        return Err(ProcessError::AlreadyProcessing);
    }
    Ok(())
}

/// Build the ordered chain for `op`.
///
/// - `convert` leads whenever the part is not converted yet, whatever `op` is
/// - `segment` runs for `op = segment`, or for `transcribe` on a part without lines
/// - `transcribe` runs for `op = transcribe`
pub fn plan_operation(
    part: &DocumentPart,
    has_lines: bool,
    op: Operation,
    options: &OperationOptions,
    settings: ChainSettings,
    now: DateTime<Utc>,
) -> TaskChain {
    let part_id = part.id_typed();
    let mut jobs = Vec::new();

    if op == Operation::Convert || !part.stage().is_converted() {
        jobs.push(convert_job(part_id, settings));
    }

    if op == Operation::Segment || (op == Operation::Transcribe && !has_lines) {
        let params = if op == Operation::Segment {
            SegmentOptions {
                steps: options.steps,
                override_existing: options.override_existing,
                text_direction: options.text_direction,
                read_direction: options.read_direction,
                model: options.model.clone(),
            }
        } else {
            // implicit segmentation ahead of transcription uses the default model
            SegmentOptions {
                text_direction: options.text_direction,
                read_direction: options.read_direction,
                ..Default::default()
            }
        };
        jobs.push(JobSpec::new(JobName::Segment, part_id).with_params(JobParams::Segment(params)));
    }

    if op == Operation::Transcribe {
        jobs.push(
            JobSpec::new(JobName::Transcribe, part_id).with_params(JobParams::Transcribe(
                TranscribeOptions {
                    model: options.model.clone(),
                    text_direction: options.text_direction,
                },
            )),
        );
    }

    TaskChain::new(part_id, jobs, now)
}

fn convert_job(part_id: folio_core::PartId, settings: ChainSettings) -> JobSpec {
    let mut convert = JobSpec::new(JobName::Convert, part_id);
    if settings.compress {
        convert = convert.link(JobSpec::new(JobName::LosslessCompression, part_id));
    }
    if settings.thumbnails {
        convert = convert.link(JobSpec::new(JobName::GenerateThumbnails, part_id));
    }
    convert
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Aggregate, DocumentId};

    use crate::part::{ImageRef, PartCommand};
    use crate::stage::WorkflowStage;
    use crate::status::{TaskEntry, TaskStatus};

    fn part_at(stage: WorkflowStage) -> DocumentPart {
        let now = Utc::now();
        let mut part = DocumentPart::create(
            DocumentId::new(),
            "p",
            ImageRef {
                path: "p.png".into(),
                width: 10,
                height: 10,
            },
            now,
        )
        .unwrap();
        for job in JobName::PIPELINE {
            let t = job.transition().unwrap();
            if stage >= t.in_progress {
                part.execute(&PartCommand::Begin { job, occurred_at: now }).unwrap();
            }
            if stage >= t.completed && t.completed != t.in_progress {
                part.execute(&PartCommand::Complete { job, occurred_at: now }).unwrap();
            }
        }
        assert_eq!(part.stage(), stage);
        part
    }

    fn plan(stage: WorkflowStage, has_lines: bool, op: Operation) -> Vec<JobName> {
        plan_operation(
            &part_at(stage),
            has_lines,
            op,
            &OperationOptions::default(),
            ChainSettings::default(),
            Utc::now(),
        )
        .names()
    }

    #[test]
    fn convert_is_prepended_until_converted() {
        assert_eq!(
            plan(WorkflowStage::Created, false, Operation::Segment),
            vec![JobName::Convert, JobName::Segment]
        );
        assert_eq!(
            plan(WorkflowStage::Converted, false, Operation::Segment),
            vec![JobName::Segment]
        );
        assert_eq!(
            plan(WorkflowStage::Segmented, true, Operation::Convert),
            vec![JobName::Convert]
        );
    }

    #[test]
    fn transcribe_segments_first_when_there_are_no_lines() {
        assert_eq!(
            plan(WorkflowStage::Converted, false, Operation::Transcribe),
            vec![JobName::Segment, JobName::Transcribe]
        );
        assert_eq!(
            plan(WorkflowStage::Segmented, true, Operation::Transcribe),
            vec![JobName::Transcribe]
        );
        assert_eq!(
            plan(WorkflowStage::Created, false, Operation::Transcribe),
            vec![JobName::Convert, JobName::Segment, JobName::Transcribe]
        );
    }

    #[test]
    fn conversion_links_follow_up_jobs_per_settings() {
        let part = part_at(WorkflowStage::Created);
        let opts = OperationOptions::default();

        let chain = plan_operation(&part, false, Operation::Convert, &opts, ChainSettings::default(), Utc::now());
        let linked: Vec<_> = chain.jobs[0].linked.iter().map(|j| j.name).collect();
        assert_eq!(linked, vec![JobName::LosslessCompression, JobName::GenerateThumbnails]);

        let settings = ChainSettings {
            compress: true,
            thumbnails: false,
        };
        let chain = plan_operation(&part, false, Operation::Convert, &opts, settings, Utc::now());
        assert_eq!(chain.jobs[0].linked.len(), 1);
    }

    #[test]
    fn segment_options_are_forwarded_only_to_explicit_segmentation() {
        let part = part_at(WorkflowStage::Converted);
        let opts = OperationOptions {
            steps: SegmentSteps::Lines,
            override_existing: true,
            ..Default::default()
        };

        let chain = plan_operation(&part, false, Operation::Segment, &opts, ChainSettings::default(), Utc::now());
        match &chain.jobs[0].params {
            JobParams::Segment(o) => {
                assert_eq!(o.steps, SegmentSteps::Lines);
                assert!(o.override_existing);
            }
            other => panic!("unexpected params: {other:?}"),
        }

        let chain = plan_operation(&part, false, Operation::Transcribe, &opts, ChainSettings::default(), Utc::now());
        match &chain.jobs[0].params {
            JobParams::Segment(o) => assert!(!o.override_existing),
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn outstanding_jobs_block_new_requests() {
        let mut record = StatusRecord::new();
        assert!(ensure_idle(&record).is_ok());

        record.insert(JobName::Convert, TaskEntry::new(TaskStatus::Done, None, Utc::now()));
        record.insert(JobName::Segment, TaskEntry::new(TaskStatus::Canceled, None, Utc::now()));
        assert!(ensure_idle(&record).is_ok());

        record.insert(JobName::Transcribe, TaskEntry::new(TaskStatus::Pending, None, Utc::now()));
        assert_eq!(ensure_idle(&record), Err(ProcessError::AlreadyProcessing));
    }
}
