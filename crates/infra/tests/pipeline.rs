//! End-to-end runs of the part workflow on in-memory adapters.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{Duration, Utc};

use folio_core::{Aggregate, AggregateRoot, ModelId, PartId};
use folio_events::{EventBus, InMemoryEventBus};
use folio_infra::{
    Collaborators, InMemoryJobQueue, InMemoryPartRepository, InMemoryStatusStore, InferenceError,
    JobQueue, JobRun, JobSource, JobWorker, PartRepository, QueueEvent, Recognizer,
    RepositoryError, SegmentationRequest, Segmenter, StatusStore, Workflow, WorkflowConfig,
    WorkflowError,
};
use folio_workflow::{
    Document, ImageRef, JobId, JobLifecycle, JobName, LifecycleDecision, LineDescription,
    ModelRef, NotificationKind, Operation, OperationOptions, OrderChange, PartCommand,
    PartNotification, ProcessError, StatusRecord, StepState, TaskEntry, TaskStatus, Transcription,
    WorkflowStage,
};
use folio_workflow::{PredictedLine, SegmentSteps, SegmentationResult};

type Flow = Workflow<
    Arc<InMemoryStatusStore>,
    Arc<InMemoryJobQueue>,
    Arc<InMemoryPartRepository>,
    Arc<InMemoryEventBus<PartNotification>>,
>;

struct ScriptedSegmenter {
    result: Mutex<Result<SegmentationResult, InferenceError>>,
    requests: Mutex<Vec<SegmentationRequest>>,
}

impl ScriptedSegmenter {
    fn returning(result: SegmentationResult) -> Self {
        Self {
            result: Mutex::new(Ok(result)),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn respond_with(&self, result: SegmentationResult) {
        *self.result.lock().unwrap() = Ok(result);
    }

    fn fail_with(&self, error: InferenceError) {
        *self.result.lock().unwrap() = Err(error);
    }
}

impl Segmenter for ScriptedSegmenter {
    fn segment(
        &self,
        _image: &ImageRef,
        request: &SegmentationRequest,
    ) -> Result<SegmentationResult, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.result.lock().unwrap().clone()
    }
}

/// Reads back the vertical position of the line it is shown.
struct EchoRecognizer;

impl Recognizer for EchoRecognizer {
    fn recognize(
        &self,
        _image: &ImageRef,
        model: &ModelRef,
        line: &LineDescription,
    ) -> Result<String, InferenceError> {
        match line {
            LineDescription::Baseline { baseline, .. } => {
                Ok(format!("{} <b>y={}</b>", model.name, baseline.first().y))
            }
            LineDescription::Box { .. } => Err(InferenceError::Failed("no baseline".into())),
        }
    }
}

fn raw(points: &[[f64; 2]]) -> Vec<Vec<f64>> {
    points.iter().map(|p| p.to_vec()).collect()
}

/// One block around two stacked lines, plus a line far below it, returned
/// bottom-up.
fn page_layout() -> SegmentationResult {
    let mut result = SegmentationResult::default();
    result.regions.insert(
        "paragraph".to_string(),
        vec![raw(&[[-1.0, -1.0], [20.0, -1.0], [20.0, 20.0], [-1.0, 20.0]])],
    );
    result.lines = [
        [[0.0, 100.0], [10.0, 100.0]],
        [[0.0, 5.0], [10.0, 5.0]],
        [[0.0, 0.0], [10.0, 0.0]],
    ]
    .iter()
    .map(|b| PredictedLine {
        baseline: raw(b),
        ..Default::default()
    })
    .collect();
    result
}

fn catmus() -> ModelRef {
    ModelRef {
        id: ModelId::new(),
        name: "catmus".to_string(),
        handle: "models/catmus.mlmodel".to_string(),
    }
}

struct Harness {
    workflow: Arc<Flow>,
    queue: Arc<InMemoryJobQueue>,
    store: Arc<InMemoryStatusStore>,
    repository: Arc<InMemoryPartRepository>,
    bus: Arc<InMemoryEventBus<PartNotification>>,
    segmenter: Arc<ScriptedSegmenter>,
    worker: JobWorker<Arc<InMemoryJobQueue>, Arc<Flow>>,
    document: Document,
}

impl Harness {
    fn new() -> Result<Self> {
        folio_observability::init_with(folio_observability::LogFormat::Pretty);

        let queue = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(InMemoryStatusStore::new());
        let repository = Arc::new(InMemoryPartRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let segmenter = Arc::new(ScriptedSegmenter::returning(page_layout()));

        let document = Document::new("register").with_block_types(&["paragraph"]);
        repository.insert_document(document.clone())?;

        let workflow = Arc::new(Workflow::new(
            store.clone(),
            queue.clone(),
            repository.clone(),
            bus.clone(),
            Collaborators::new(segmenter.clone(), Arc::new(EchoRecognizer)),
            WorkflowConfig::default().with_inference_device("cuda:0"),
        ));
        let worker = JobWorker::new(queue.clone(), workflow.clone()).named("test-worker");

        Ok(Self {
            workflow,
            queue,
            store,
            repository,
            bus,
            segmenter,
            worker,
            document,
        })
    }

    fn new_part(&self) -> Result<PartId> {
        let image = ImageRef {
            path: "pages/f1r.jpg".to_string(),
            width: 1000,
            height: 1500,
        };
        Ok(self
            .workflow
            .create_part(self.document.id, "f. 1r", image)?
            .id_typed())
    }

    /// A part whose conversion chain has already run.
    fn converted_part(&self) -> Result<PartId> {
        let id = self.new_part()?;
        self.drain()?;
        Ok(id)
    }

    fn drain(&self) -> Result<Vec<JobRun>> {
        Ok(self.worker.run_until_idle(50)?)
    }

    fn stage(&self, id: PartId) -> Result<WorkflowStage> {
        Ok(self.repository.part(id)?.stage())
    }

    fn record(&self, id: PartId) -> Result<StatusRecord> {
        Ok(self.workflow.records().load(id)?)
    }

    /// Claim the next job and execute its body without reporting success.
    fn start_next(&self) -> Result<folio_workflow::JobSpec> {
        self.worker.pump_events();
        let job = self
            .queue
            .claim("test-worker")?
            .ok_or_else(|| anyhow::anyhow!("no job ready"))?;
        self.queue.start(job.id)?;
        self.workflow
            .on_job_event(&QueueEvent::for_job(&job, JobLifecycle::Started))?;
        self.workflow.run_job(&job)?;
        Ok(job)
    }

    fn force_stage(&self, id: PartId, command: PartCommand) -> Result<()> {
        let mut part = self.repository.part(id)?;
        let expected = part.version();
        part.execute(&command)?;
        self.repository.save_part(&part, expected)?;
        Ok(())
    }
}

#[test]
fn a_new_part_is_converted_by_its_automatic_chain() -> Result<()> {
    let h = Harness::new()?;
    let sub = h.bus.subscribe();

    let id = h.new_part()?;
    let seeded = h.record(id)?;
    assert_eq!(seeded.len(), 1);
    assert_eq!(seeded.get(JobName::Convert).map(|e| e.status), Some(TaskStatus::Pending));

    let runs = h.drain()?;
    let names: Vec<JobName> = runs
        .iter()
        .map(|r| match r {
            JobRun::Succeeded(job) => job.name,
            other => panic!("unexpected run: {other:?}"),
        })
        .collect();
    assert_eq!(
        names,
        vec![JobName::Convert, JobName::LosslessCompression, JobName::GenerateThumbnails]
    );
    assert_eq!(h.stage(id)?, WorkflowStage::Converted);

    let record = h.record(id)?;
    assert!(!record.has_outstanding());
    assert_eq!(record.get(JobName::Convert).map(|e| e.status), Some(TaskStatus::Done));

    let notifications = sub.drain();
    assert_eq!(notifications[0].kind, NotificationKind::New);
    let stages: Vec<WorkflowStage> = notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::Workflow)
        .filter_map(|n| n.stage)
        .collect();
    assert_eq!(stages, vec![WorkflowStage::Converting, WorkflowStage::Converted]);
    Ok(())
}

#[test]
fn transcribing_an_unsegmented_part_segments_it_first() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;

    let options = OperationOptions {
        model: Some(catmus()),
        ..Default::default()
    };
    let chain = h.workflow.request_operation(id, Operation::Transcribe, &options)?;
    assert_eq!(chain.names(), vec![JobName::Segment, JobName::Transcribe]);

    h.drain()?;
    assert_eq!(h.stage(id)?, WorkflowStage::Transcribing);
    assert_eq!(h.repository.part(id)?.progress(), 100);

    // the implicit segmentation ran on the default model
    let requests = h.segmenter.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, None);
    assert_eq!(requests[0].device, "cuda:0");

    let layer = h
        .repository
        .transcriptions(h.document.id)?
        .into_iter()
        .find(|t| t.name == "model:catmus")
        .ok_or_else(|| anyhow::anyhow!("model layer missing"))?;
    let lines = h.repository.lines(id)?;
    let texts = h.repository.line_transcriptions(id, layer.id)?;
    assert_eq!(texts.len(), 3);
    let first = texts
        .iter()
        .find(|t| t.line_id == lines[0].id)
        .ok_or_else(|| anyhow::anyhow!("first line untranscribed"))?;
    assert_eq!(first.text(), "catmus y=0");
    Ok(())
}

#[test]
fn segmentation_stores_lines_in_reading_order() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;

    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    h.drain()?;
    assert_eq!(h.stage(id)?, WorkflowStage::Segmented);

    let blocks = h.repository.blocks(id)?;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].typology.as_ref().map(|t| t.name.as_str()), Some("paragraph"));

    let lines = h.repository.lines(id)?;
    let rows: Vec<(u32, f64)> = lines
        .iter()
        .map(|l| (l.order, l.baseline.as_ref().map_or(f64::NAN, |b| b.first().y)))
        .collect();
    assert_eq!(rows, vec![(0, 0.0), (1, 5.0), (2, 100.0)]);
    assert_eq!(lines[0].block, Some(blocks[0].id));
    assert_eq!(lines[1].block, Some(blocks[0].id));
    assert_eq!(lines[2].block, None);
    Ok(())
}

/// A tall block near the origin holding a low line, and a small block far
/// to the right holding a high one.
fn two_column_layout() -> SegmentationResult {
    let mut result = SegmentationResult::default();
    result.regions.insert(
        "paragraph".to_string(),
        vec![
            raw(&[[0.0, 0.0], [100.0, 0.0], [100.0, 1000.0], [0.0, 1000.0]]),
            raw(&[[500.0, 0.0], [600.0, 0.0], [600.0, 100.0], [500.0, 100.0]]),
        ],
    );
    result.lines = [[[10.0, 900.0], [90.0, 900.0]], [[510.0, 50.0], [590.0, 50.0]]]
        .iter()
        .map(|b| PredictedLine {
            baseline: raw(b),
            ..Default::default()
        })
        .collect();
    result
}

#[test]
fn regions_only_resegmentation_reorders_the_lines() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.segmenter.respond_with(two_column_layout());

    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    h.drain()?;
    let heights = |h: &Harness| -> Result<Vec<f64>> {
        Ok(h.repository
            .lines(id)?
            .iter()
            .map(|l| l.baseline.as_ref().map_or(f64::NAN, |b| b.first().y))
            .collect())
    };
    assert_eq!(heights(&h)?, vec![900.0, 50.0]);

    h.segmenter.respond_with(SegmentationResult::default());
    let regions_only = OperationOptions {
        steps: SegmentSteps::Regions,
        override_existing: true,
        ..Default::default()
    };
    h.workflow
        .request_operation(id, Operation::Segment, &regions_only)?;
    h.drain()?;

    assert!(h.repository.blocks(id)?.is_empty());
    assert!(h.repository.lines(id)?.iter().all(|l| l.block.is_none()));
    assert_eq!(heights(&h)?, vec![50.0, 900.0]);
    assert_eq!(h.workflow.recalculate_ordering(id, None)?, 0);
    Ok(())
}

#[test]
fn a_second_request_while_a_chain_is_outstanding_is_refused() -> Result<()> {
    let h = Harness::new()?;
    let id = h.new_part()?;

    let err = h
        .workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Process(ProcessError::AlreadyProcessing)));

    let record = h.record(id)?;
    assert!(!record.is_empty());
    assert_eq!(record.outstanding().filter(|(_, e)| e.job_id.is_some()).count(), 1);

    h.drain()?;
    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    Ok(())
}

#[test]
fn cancel_then_request_segment_succeeds() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;

    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    let plan = h.workflow.cancel_all(id)?;
    assert_eq!(plan.revoke.len(), 1);
    assert_eq!(plan.canceled, vec![JobName::Segment]);

    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    let runs = h.drain()?;
    assert_eq!(runs.len(), 1);
    assert_eq!(h.stage(id)?, WorkflowStage::Segmented);
    assert_eq!(h.segmenter.requests.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn a_canceled_job_finishing_late_changes_nothing() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;

    let job = h.start_next()?;
    assert_eq!(h.stage(id)?, WorkflowStage::Segmenting);

    let plan = h.workflow.cancel_all(id)?;
    assert!(plan.rollback.is_some());
    assert_eq!(h.stage(id)?, WorkflowStage::Converted);

    let late = QueueEvent::for_job(&job, JobLifecycle::Succeeded);
    assert_eq!(h.workflow.on_job_event(&late)?, LifecycleDecision::Ignored);
    h.queue.finish(job.id, &folio_infra::JobOutcome::Succeeded)?;

    assert_eq!(h.stage(id)?, WorkflowStage::Converted);
    let entry = h.record(id)?.get(JobName::Segment).copied();
    assert_eq!(entry.map(|e| e.status), Some(TaskStatus::Canceled));
    assert_eq!(h.workflow.workflow_view(id)?.segment, Some(StepState::Canceled));
    Ok(())
}

#[test]
fn a_lost_segmentation_is_rolled_back_once() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    h.start_next()?;
    assert_eq!(h.stage(id)?, WorkflowStage::Segmenting);

    // the broker forgets everything it held
    h.queue.purge()?;

    let first = h.workflow.recover(id)?;
    assert!(first.changed);
    assert_eq!(first.stale, vec![JobName::Segment]);
    assert_eq!(first.lost, vec![JobName::Segment]);
    assert_eq!(h.stage(id)?, WorkflowStage::Converted);
    assert_eq!(
        h.record(id)?.get(JobName::Segment).map(|e| e.status),
        Some(TaskStatus::Error)
    );

    let before = h.record(id)?;
    let second = h.workflow.recover(id)?;
    assert!(!second.changed);
    assert_eq!(h.record(id)?, before);
    assert_eq!(h.stage(id)?, WorkflowStage::Converted);
    Ok(())
}

#[test]
fn a_failed_segmentation_keeps_its_stage_until_recovery() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.segmenter
        .fail_with(InferenceError::Model("weights missing".into()));

    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    let runs = h.drain()?;
    assert!(matches!(&runs[..], [JobRun::Failed(job, _)] if job.name == JobName::Segment));

    assert_eq!(h.stage(id)?, WorkflowStage::Segmenting);
    assert_eq!(h.workflow.workflow_view(id)?.segment, Some(StepState::Error));

    h.workflow.recover(id)?;
    assert_eq!(h.stage(id)?, WorkflowStage::Converted);

    // error is terminal, a new request is accepted
    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    Ok(())
}

#[test]
fn sweep_skips_parts_outside_the_recovery_window() -> Result<()> {
    let h = Harness::new()?;
    let old = h.converted_part()?;
    let recent = h.converted_part()?;
    let now = Utc::now();

    for (id, at) in [(old, now - Duration::days(2)), (recent, now - Duration::minutes(1))] {
        h.force_stage(id, PartCommand::Begin {
            job: JobName::Segment,
            occurred_at: now,
        })?;
        let record: StatusRecord = [(
            JobName::Segment,
            TaskEntry::new(TaskStatus::Running, Some(JobId::new()), at),
        )]
        .into_iter()
        .collect();
        h.workflow.records().save(id, &record)?;
    }

    let report = h.workflow.sweep()?;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, vec![old]);
    assert_eq!(report.recovered, vec![recent]);
    assert_eq!(h.stage(old)?, WorkflowStage::Segmenting);
    assert_eq!(h.stage(recent)?, WorkflowStage::Converted);

    // an explicit recovery ignores the window
    h.workflow.recover(old)?;
    assert_eq!(h.stage(old)?, WorkflowStage::Converted);
    assert_eq!(
        h.record(old)?.get(JobName::Segment).map(|e| e.status),
        Some(TaskStatus::Error)
    );
    Ok(())
}

#[test]
fn order_enforcement_is_idempotent() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.workflow
        .request_operation(id, Operation::Segment, &OperationOptions::default())?;
    h.drain()?;

    let lines = h.repository.lines(id)?;
    let gappy: Vec<OrderChange> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| OrderChange {
            line_id: l.id,
            order: 10 * (i as u32 + 1),
        })
        .collect();
    h.repository.update_line_orders(&gappy)?;

    assert_eq!(h.workflow.enforce_line_order(id)?, 3);
    assert_eq!(h.workflow.enforce_line_order(id)?, 0);

    let after: Vec<_> = h.repository.lines(id)?.iter().map(|l| (l.id, l.order)).collect();
    let expected: Vec<_> = lines.iter().map(|l| (l.id, l.order)).collect();
    assert_eq!(after, expected);
    Ok(())
}

#[test]
fn manual_transcription_creates_the_default_layer_only() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    h.workflow
        .request_operation(id, Operation::Transcribe, &OperationOptions::default())?;
    h.drain()?;

    let layers: Vec<String> = h
        .repository
        .transcriptions(h.document.id)?
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(layers, vec![Transcription::DEFAULT_NAME.to_string()]);
    assert_eq!(h.stage(id)?, WorkflowStage::Transcribing);
    assert_eq!(h.repository.part(id)?.progress(), 0);
    Ok(())
}

#[test]
fn deleting_a_part_clears_its_record_and_notifies() -> Result<()> {
    let h = Harness::new()?;
    let id = h.converted_part()?;
    let sub = h.bus.subscribe();

    h.workflow.delete_part(id)?;

    assert_eq!(h.store.read(&h.workflow.records().key(id))?, None);
    assert!(matches!(h.repository.part(id), Err(RepositoryError::NotFound(_))));
    let kinds: Vec<NotificationKind> = sub.drain().into_iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::Delete]);
    Ok(())
}

#[test]
fn training_cancellation_needs_a_tracked_job() -> Result<()> {
    let h = Harness::new()?;
    let model = ModelId::new();

    let missing = h.workflow.cancel_training(model).unwrap_err();
    assert!(matches!(missing, WorkflowError::Process(ProcessError::ProcessFailure(_))));

    h.workflow.records().set_training_job(model, None)?;
    assert!(h.workflow.cancel_training(model).is_err());

    let job = JobId::new();
    h.workflow.records().set_training_job(model, Some(job))?;
    assert_eq!(h.workflow.cancel_training(model)?, job);
    assert!(h.workflow.cancel_training(model).is_err());
    assert!(h.queue.inspect_live()?.is_empty());
    Ok(())
}
