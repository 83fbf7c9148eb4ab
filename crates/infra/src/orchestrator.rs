//! The per-part workflow service.
//!
//! `Workflow` wires the pure decisions of `folio-workflow` to the status
//! store, the job queue, the repository and the inference collaborators.
//! Every public operation is synchronous and does its own IO; nothing here
//! blocks waiting for a queued job.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use folio_core::{Aggregate, AggregateRoot, DocumentId, DomainError, ModelId, PartId};
use folio_events::EventBus;
use folio_workflow::{
    CancelPlan, ChainSettings, DocumentPart, ImageRef, JobId, JobLifecycle, JobName, JobParams,
    JobSpec, LifecycleDecision, LineTranscription, LiveJobs, Operation, OperationOptions,
    PartCommand, PartEvent, PartNotification, ReadDirection, Recoverability, RecoveryOutcome,
    SegmentOptions, StatusRecord, TaskChain, Transcription, TranscribeOptions, WorkflowView,
    apply_lifecycle, build_changeset, contiguous_order_changes, describe_line, ensure_idle,
    plan_cancellation, plan_operation, reading_order, reconcile, recoverability, reorder_changes,
    transcription_progress, workflow_view,
};

use crate::config::WorkflowConfig;
use crate::inference::{Collaborators, InferenceError, SegmentationRequest};
use crate::job_queue::{JobQueue, JobQueueError, QueueEvent};
use crate::repository::{PartRepository, RepositoryError};
use crate::status_store::{StatusRecords, StatusStore, StatusStoreError, TrainingLookup};

/// Attempts at an optimistic stage write before giving up.
const SAVE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Process(#[from] folio_workflow::ProcessError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("status store: {0}")]
    Status(#[from] StatusStoreError),
    #[error("job queue: {0}")]
    Queue(#[from] JobQueueError),
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("inference: {0}")]
    Inference(#[from] InferenceError),
}

/// Outcome of one periodic sweep over every part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// Parts without any timestamped entry.
    pub idle: usize,
    /// Parts whose newest activity is outside the recovery window.
    pub expired: Vec<PartId>,
    /// Parts whose record or stage was repaired.
    pub recovered: Vec<PartId>,
    pub failed: usize,
}

pub struct Workflow<S, Q, R, B> {
    records: StatusRecords<S>,
    queue: Q,
    repository: R,
    bus: B,
    collaborators: Collaborators,
    config: WorkflowConfig,
}

impl<S, Q, R, B> Workflow<S, Q, R, B>
where
    S: StatusStore,
    Q: JobQueue,
    R: PartRepository,
    B: EventBus<PartNotification>,
{
    pub fn new(
        store: S,
        queue: Q,
        repository: R,
        bus: B,
        collaborators: Collaborators,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            records: StatusRecords::with_prefix(store, config.status_key_prefix.clone()),
            queue,
            repository,
            bus,
            collaborators,
            config,
        }
    }

    pub fn records(&self) -> &StatusRecords<S> {
        &self.records
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            compress: self.config.compress_enabled,
            thumbnails: self.config.thumbnails_enabled,
        }
    }

    // ---- part lifecycle -------------------------------------------------

    /// Insert a new part and queue its conversion.
    #[instrument(skip(self, image), fields(document_id = %document_id), err)]
    pub fn create_part(
        &self,
        document_id: DocumentId,
        name: &str,
        image: ImageRef,
    ) -> Result<DocumentPart, WorkflowError> {
        let now = Utc::now();
        let part = DocumentPart::create(document_id, name, image, now)?;
        self.repository.insert_part(&part)?;
        info!(part_id = %part.id_typed(), "part created");
        self.notify(PartNotification::new_part(document_id, part.id_typed(), now));

        self.request_operation(part.id_typed(), Operation::Convert, &OperationOptions::default())?;
        Ok(part)
    }

    /// Delete a part with its layout and text, and forget its status record.
    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub fn delete_part(&self, part_id: PartId) -> Result<(), WorkflowError> {
        let part = self.repository.part(part_id)?;
        self.records.clear(part_id)?;
        self.repository.delete_part(part_id)?;
        info!(part_id = %part_id, "part deleted");
        if let Some(document_id) = part.document_id() {
            self.notify(PartNotification::deleted(document_id, part_id, Utc::now()));
        }
        Ok(())
    }

    // ---- operations -----------------------------------------------------

    /// Queue the chain for `op`. Refused while another chain is outstanding.
    #[instrument(skip(self, options), fields(part_id = %part_id, op = ?op), err)]
    pub fn request_operation(
        &self,
        part_id: PartId,
        op: Operation,
        options: &OperationOptions,
    ) -> Result<TaskChain, WorkflowError> {
        let part = self.repository.part(part_id)?;
        let record = self.records.load(part_id)?;
        ensure_idle(&record)?;

        let now = Utc::now();
        let has_lines = self.repository.has_lines(part_id)?;
        let chain = plan_operation(&part, has_lines, op, options, self.chain_settings(), now);

        // seed before submitting, a worker may report on the chain right away
        self.records.save(part_id, &StatusRecord::seeded(&chain, now))?;
        let chain_id = self.queue.submit_chain(chain.clone())?;
        info!(part_id = %part_id, chain_id = %chain_id, jobs = ?chain.names(), "chain queued");
        Ok(chain)
    }

    /// Revoke every cancelable outstanding job of the part.
    ///
    /// Revocation is advisory: a job past its last interruptible point may
    /// still finish, its late notifications are then ignored.
    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub fn cancel_all(&self, part_id: PartId) -> Result<CancelPlan, WorkflowError> {
        let part = self.repository.part(part_id)?;
        let mut record = self.records.load(part_id)?;
        let now = Utc::now();
        let plan = plan_cancellation(&part, &record, now);
        if plan.is_empty() {
            debug!(part_id = %part_id, "nothing to cancel");
            return Ok(plan);
        }

        if let Some(rollback) = &plan.rollback {
            self.apply_command(part_id, rollback)?;
        }
        for &job_id in &plan.revoke {
            if let Err(e) = self.queue.cancel(job_id) {
                warn!(part_id = %part_id, job_id = %job_id, error = %e, "revoke failed");
            }
        }
        plan.apply_to(&mut record, now);
        self.records.save(part_id, &record)?;
        info!(part_id = %part_id, revoked = plan.revoke.len(), canceled = ?plan.canceled, "jobs canceled");
        Ok(plan)
    }

    /// Revoke the tracked training job of a model.
    #[instrument(skip(self), fields(model_id = %model_id), err)]
    pub fn cancel_training(&self, model_id: ModelId) -> Result<JobId, WorkflowError> {
        let job_id = match self.records.training_job(model_id)? {
            TrainingLookup::Job(id) => id,
            TrainingLookup::Missing | TrainingLookup::Unassigned => {
                return Err(folio_workflow::ProcessError::failure("couldn't find the training task").into());
            }
        };
        self.queue.cancel(job_id)?;
        self.records
            .store()
            .remove(&StatusRecords::<S>::training_key(model_id))?;
        info!(model_id = %model_id, job_id = %job_id, "training canceled");
        Ok(job_id)
    }

    /// Apply a queue notification to the status record and the stage.
    pub fn on_job_event(&self, event: &QueueEvent) -> Result<LifecycleDecision, WorkflowError> {
        let QueueEvent {
            job_id,
            name,
            part_id,
            event,
        } = event;
        let mut record = self.records.load(*part_id)?;
        let decision = apply_lifecycle(&mut record, *name, *job_id, event, Utc::now());

        match &decision {
            LifecycleDecision::Ignored => {
                debug!(part_id = %part_id, job = %name, job_id = %job_id, ?event, "notification for a canceled job ignored");
            }
            LifecycleDecision::Recorded { command } => {
                self.records.save(*part_id, &record)?;
                debug!(part_id = %part_id, job = %name, status = ?event.status(), "status recorded");
                if let JobLifecycle::Failed { reason } = event {
                    warn!(part_id = %part_id, job = %name, job_id = %job_id, reason = %reason, "job failed");
                }
                if let Some(command) = command {
                    self.apply_command(*part_id, command)?;
                }
            }
        }
        Ok(decision)
    }

    // ---- recovery -------------------------------------------------------

    /// Reconcile one part against the live queue, whatever its age.
    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub fn recover(&self, part_id: PartId) -> Result<RecoveryOutcome, WorkflowError> {
        let live = self.queue.inspect_live()?;
        self.recover_against(part_id, &live, Utc::now())
    }

    /// Reconcile every part with recent activity. Errors on one part are
    /// logged and counted, they do not stop the sweep.
    pub fn sweep(&self) -> Result<SweepReport, WorkflowError> {
        let live = self.queue.inspect_live()?;
        let now = Utc::now();
        let window = self.config.recovery_window_chrono();
        let mut report = SweepReport::default();

        for part_id in self.repository.part_ids()? {
            report.scanned += 1;
            let record = match self.records.load(part_id) {
                Ok(record) => record,
                Err(e) => {
                    warn!(part_id = %part_id, error = %e, "status record unreadable");
                    report.failed += 1;
                    continue;
                }
            };
            match recoverability(&record, now, window) {
                Recoverability::Idle => report.idle += 1,
                Recoverability::Expired => {
                    debug!(part_id = %part_id, "activity outside the recovery window, left as is");
                    report.expired.push(part_id);
                }
                Recoverability::Recoverable => match self.recover_against(part_id, &live, now) {
                    Ok(outcome) if outcome.changed => report.recovered.push(part_id),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(part_id = %part_id, error = %e, "recovery failed");
                        report.failed += 1;
                    }
                },
            }
        }

        info!(
            scanned = report.scanned,
            recovered = report.recovered.len(),
            expired = report.expired.len(),
            failed = report.failed,
            "recovery sweep finished"
        );
        Ok(report)
    }

    fn recover_against(
        &self,
        part_id: PartId,
        live: &LiveJobs,
        now: DateTime<Utc>,
    ) -> Result<RecoveryOutcome, WorkflowError> {
        let part = self.repository.part(part_id)?;
        let record = self.records.load(part_id)?;
        let outcome = reconcile(&part, &record, live, now);
        if !outcome.changed {
            return Ok(outcome);
        }

        if let Some(command) = &outcome.command {
            self.apply_command(part_id, command)?;
        }
        self.records.save(part_id, &outcome.record)?;
        info!(part_id = %part_id, stale = ?outcome.stale, lost = ?outcome.lost, "status record repaired");
        Ok(outcome)
    }

    // ---- reads ----------------------------------------------------------

    pub fn workflow_view(&self, part_id: PartId) -> Result<WorkflowView, WorkflowError> {
        let part = self.repository.part(part_id)?;
        let record = self.records.load(part_id)?;
        Ok(workflow_view(part.stage(), &record))
    }

    // ---- ordering -------------------------------------------------------

    /// Compact line order indices to `0..n`; returns the number of writes.
    pub fn enforce_line_order(&self, part_id: PartId) -> Result<usize, WorkflowError> {
        let lines = self.repository.lines(part_id)?;
        let changes = contiguous_order_changes(&lines);
        if changes.is_empty() {
            return Ok(0);
        }
        Ok(self.repository.update_line_orders(&changes)?)
    }

    /// Reorder lines naturally; `direction` defaults to the document's.
    pub fn recalculate_ordering(
        &self,
        part_id: PartId,
        direction: Option<ReadDirection>,
    ) -> Result<usize, WorkflowError> {
        let part = self.repository.part(part_id)?;
        let document = self.repository.document(document_of(&part)?)?;
        let direction = direction.unwrap_or(document.read_direction);
        let page_width = part.image().map_or(0.0, |i| f64::from(i.width));

        let lines = self.repository.lines(part_id)?;
        let blocks = self.repository.blocks(part_id)?;
        let ordered = reading_order(&lines, &blocks, direction, page_width);
        let changes = reorder_changes(&lines, &ordered);
        if changes.is_empty() {
            return Ok(0);
        }
        let written = self.repository.update_line_orders(&changes)?;
        debug!(part_id = %part_id, written, "reading order updated");
        Ok(written)
    }

    // ---- job bodies -----------------------------------------------------

    /// Execute the body of a claimed job.
    #[instrument(skip(self, job), fields(part_id = %job.part_id, job = %job.name, job_id = %job.id), err)]
    pub fn run_job(&self, job: &JobSpec) -> Result<(), WorkflowError> {
        match job.name {
            JobName::Convert => self.run_convert(job.part_id),
            JobName::LosslessCompression => {
                let part = self.repository.part(job.part_id)?;
                Ok(self.collaborators.images.compress(image_of(&part)?)?)
            }
            JobName::GenerateThumbnails => {
                let part = self.repository.part(job.part_id)?;
                Ok(self.collaborators.images.thumbnails(image_of(&part)?)?)
            }
            JobName::Segment => {
                let options = match &job.params {
                    JobParams::Segment(options) => options.clone(),
                    _ => SegmentOptions::default(),
                };
                self.run_segment(job.part_id, &options)
            }
            JobName::Transcribe => {
                let options = match &job.params {
                    JobParams::Transcribe(options) => options.clone(),
                    _ => TranscribeOptions::default(),
                };
                self.run_transcribe(job.part_id, &options)
            }
        }
    }

    fn run_convert(&self, part_id: PartId) -> Result<(), WorkflowError> {
        let part = self.apply_command(
            part_id,
            &PartCommand::Begin {
                job: JobName::Convert,
                occurred_at: Utc::now(),
            },
        )?;
        self.collaborators.images.convert(image_of(&part)?)?;
        Ok(())
    }

    fn run_segment(&self, part_id: PartId, options: &SegmentOptions) -> Result<(), WorkflowError> {
        let part = self.apply_command(
            part_id,
            &PartCommand::Begin {
                job: JobName::Segment,
                occurred_at: Utc::now(),
            },
        )?;
        let document = self.repository.document(document_of(&part)?)?;

        let request = SegmentationRequest {
            device: self.config.inference_device.clone(),
            model: options
                .model
                .as_ref()
                .map(|m| m.handle.clone())
                .or_else(|| self.config.default_segmentation_model.clone()),
            text_direction: Some(
                options
                    .text_direction
                    .unwrap_or_else(|| document.default_text_direction()),
            ),
        };
        let result = self
            .collaborators
            .segmenter
            .segment(image_of(&part)?, &request)?;

        let existing = self.repository.blocks(part_id)?;
        let changes = build_changeset(part_id, &document, &existing, &result, options);
        self.repository.apply_segmentation(part_id, &changes)?;
        info!(
            part_id = %part_id,
            blocks = changes.blocks.len(),
            lines = changes.lines.len(),
            rejected = changes.rejected,
            "segmentation stored"
        );

        // cleared or replaced blocks move line anchors too
        self.recalculate_ordering(part_id, options.read_direction)?;
        Ok(())
    }

    fn run_transcribe(&self, part_id: PartId, options: &TranscribeOptions) -> Result<(), WorkflowError> {
        let part = self.repository.part(part_id)?;
        let document = self.repository.document(document_of(&part)?)?;
        let now = Utc::now();

        match &options.model {
            Some(model) => {
                let layer = Transcription::model_layer_name(&model.name);
                let transcription =
                    self.repository
                        .get_or_create_transcription(document.id, &layer, now)?;
                let direction = options
                    .text_direction
                    .unwrap_or_else(|| document.default_text_direction());
                let image = image_of(&part)?;

                let lines = self.repository.lines(part_id)?;
                for line in &lines {
                    let description = describe_line(line, direction);
                    let content = self
                        .collaborators
                        .recognizer
                        .recognize(image, model, &description)?;
                    self.repository.save_line_transcription(LineTranscription {
                        line_id: line.id,
                        transcription_id: transcription.id,
                        content,
                    })?;
                }
                info!(part_id = %part_id, layer = %layer, lines = lines.len(), "lines transcribed");
            }
            None => {
                self.repository.get_or_create_transcription(
                    document.id,
                    Transcription::DEFAULT_NAME,
                    now,
                )?;
            }
        }

        self.update_progress(part_id)?;
        Ok(())
    }

    /// Recompute and store the share of transcribed lines.
    pub fn update_progress(&self, part_id: PartId) -> Result<u8, WorkflowError> {
        let total = self.repository.lines(part_id)?.len();
        let transcribed = self.repository.count_transcribed_lines(part_id)?;
        let progress = transcription_progress(transcribed, total);
        self.apply_command(
            part_id,
            &PartCommand::UpdateProgress {
                progress,
                occurred_at: Utc::now(),
            },
        )?;
        Ok(progress)
    }

    // ---- internals ------------------------------------------------------

    /// Run a command against the stored part, retrying on version conflicts.
    /// Stage changes are broadcast.
    fn apply_command(&self, part_id: PartId, command: &PartCommand) -> Result<DocumentPart, WorkflowError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut part = self.repository.part(part_id)?;
            let expected = part.version();
            let events = part.execute(command)?;
            if events.is_empty() {
                return Ok(part);
            }

            match self.repository.save_part(&part, expected) {
                Ok(()) => {
                    self.announce_stage_changes(&part, &events);
                    return Ok(part);
                }
                Err(RepositoryError::Conflict { .. }) if attempt < SAVE_ATTEMPTS => {
                    debug!(part_id = %part_id, attempt, "concurrent part write, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn announce_stage_changes(&self, part: &DocumentPart, events: &[PartEvent]) {
        let Some(document_id) = part.document_id() else {
            return;
        };
        for event in events {
            if let PartEvent::StageChanged {
                part_id,
                from,
                to,
                reason,
                occurred_at,
            } = event
            {
                info!(part_id = %part_id, %from, %to, ?reason, "stage changed");
                let view = match self.records.load(*part_id) {
                    Ok(record) => workflow_view(*to, &record),
                    Err(_) => workflow_view(*to, &StatusRecord::new()),
                };
                self.notify(PartNotification::workflow(
                    document_id,
                    *part_id,
                    *to,
                    view,
                    *occurred_at,
                ));
            }
        }
    }

    fn notify(&self, notification: PartNotification) {
        let kind = notification.kind.name();
        if let Err(e) = self.bus.publish(notification) {
            warn!(kind, error = ?e, "part notification not delivered");
        }
    }
}

fn image_of(part: &DocumentPart) -> Result<&ImageRef, DomainError> {
    part.image()
        .ok_or_else(|| DomainError::invariant("part has no image"))
}

fn document_of(part: &DocumentPart) -> Result<DocumentId, DomainError> {
    part.document_id()
        .ok_or_else(|| DomainError::invariant("part has no document"))
}

impl<S, Q, R, B> std::fmt::Debug for Workflow<S, Q, R, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
