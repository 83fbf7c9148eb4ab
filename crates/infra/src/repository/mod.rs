//! Persistence of documents, parts and their layout.
//!
//! Every method is one atomic unit; [`PartRepository::apply_segmentation`]
//! in particular either lands the whole changeset or nothing.

pub mod memory;

pub use memory::InMemoryPartRepository;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use folio_core::{BlockId, DocumentId, PartId, TranscriptionId};
use folio_workflow::{
    Block, Document, DocumentPart, Line, LineTranscription, OrderChange, SegmentationChangeset,
    Transcription,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("version conflict on part {part_id}: expected {expected}, found {actual}")]
    Conflict {
        part_id: PartId,
        expected: u64,
        actual: u64,
    },
    #[error("invalid stored data: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub trait PartRepository: Send + Sync {
    fn insert_document(&self, document: Document) -> Result<(), RepositoryError>;

    fn document(&self, id: DocumentId) -> Result<Document, RepositoryError>;

    fn insert_part(&self, part: &DocumentPart) -> Result<(), RepositoryError>;

    fn part(&self, id: PartId) -> Result<DocumentPart, RepositoryError>;

    fn part_ids(&self) -> Result<Vec<PartId>, RepositoryError>;

    /// Persist `part` if the stored version is still `expected_version`.
    fn save_part(&self, part: &DocumentPart, expected_version: u64) -> Result<(), RepositoryError>;

    /// Delete the part with its blocks, lines and line transcriptions.
    fn delete_part(&self, id: PartId) -> Result<(), RepositoryError>;

    /// Blocks sorted by order.
    fn blocks(&self, part_id: PartId) -> Result<Vec<Block>, RepositoryError>;

    /// Lines sorted by order.
    fn lines(&self, part_id: PartId) -> Result<Vec<Line>, RepositoryError>;

    fn has_lines(&self, part_id: PartId) -> Result<bool, RepositoryError> {
        Ok(!self.lines(part_id)?.is_empty())
    }

    /// Apply a segmentation pass atomically. New elements are appended after
    /// the surviving ones in order.
    fn apply_segmentation(
        &self,
        part_id: PartId,
        changes: &SegmentationChangeset,
    ) -> Result<(), RepositoryError>;

    /// Delete blocks; lines referencing them lose their block reference.
    fn delete_blocks(&self, part_id: PartId, ids: &[BlockId]) -> Result<(), RepositoryError>;

    /// Write new line order indices; returns how many lines were written.
    fn update_line_orders(&self, changes: &[OrderChange]) -> Result<usize, RepositoryError>;

    fn get_or_create_transcription(
        &self,
        document_id: DocumentId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Transcription, RepositoryError>;

    fn transcriptions(&self, document_id: DocumentId) -> Result<Vec<Transcription>, RepositoryError>;

    /// Insert or replace the (line, transcription) text.
    fn save_line_transcription(&self, record: LineTranscription) -> Result<(), RepositoryError>;

    fn line_transcriptions(
        &self,
        part_id: PartId,
        transcription_id: TranscriptionId,
    ) -> Result<Vec<LineTranscription>, RepositoryError>;

    /// Lines of the part having at least one transcription.
    fn count_transcribed_lines(&self, part_id: PartId) -> Result<usize, RepositoryError>;
}

impl<T: PartRepository + ?Sized> PartRepository for Arc<T> {
    fn insert_document(&self, document: Document) -> Result<(), RepositoryError> {
        (**self).insert_document(document)
    }

    fn document(&self, id: DocumentId) -> Result<Document, RepositoryError> {
        (**self).document(id)
    }

    fn insert_part(&self, part: &DocumentPart) -> Result<(), RepositoryError> {
        (**self).insert_part(part)
    }

    fn part(&self, id: PartId) -> Result<DocumentPart, RepositoryError> {
        (**self).part(id)
    }

    fn part_ids(&self) -> Result<Vec<PartId>, RepositoryError> {
        (**self).part_ids()
    }

    fn save_part(&self, part: &DocumentPart, expected_version: u64) -> Result<(), RepositoryError> {
        (**self).save_part(part, expected_version)
    }

    fn delete_part(&self, id: PartId) -> Result<(), RepositoryError> {
        (**self).delete_part(id)
    }

    fn blocks(&self, part_id: PartId) -> Result<Vec<Block>, RepositoryError> {
        (**self).blocks(part_id)
    }

    fn lines(&self, part_id: PartId) -> Result<Vec<Line>, RepositoryError> {
        (**self).lines(part_id)
    }

    fn has_lines(&self, part_id: PartId) -> Result<bool, RepositoryError> {
        (**self).has_lines(part_id)
    }

    fn apply_segmentation(
        &self,
        part_id: PartId,
        changes: &SegmentationChangeset,
    ) -> Result<(), RepositoryError> {
        (**self).apply_segmentation(part_id, changes)
    }

    fn delete_blocks(&self, part_id: PartId, ids: &[BlockId]) -> Result<(), RepositoryError> {
        (**self).delete_blocks(part_id, ids)
    }

    fn update_line_orders(&self, changes: &[OrderChange]) -> Result<usize, RepositoryError> {
        (**self).update_line_orders(changes)
    }

    fn get_or_create_transcription(
        &self,
        document_id: DocumentId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Transcription, RepositoryError> {
        (**self).get_or_create_transcription(document_id, name, now)
    }

    fn transcriptions(&self, document_id: DocumentId) -> Result<Vec<Transcription>, RepositoryError> {
        (**self).transcriptions(document_id)
    }

    fn save_line_transcription(&self, record: LineTranscription) -> Result<(), RepositoryError> {
        (**self).save_line_transcription(record)
    }

    fn line_transcriptions(
        &self,
        part_id: PartId,
        transcription_id: TranscriptionId,
    ) -> Result<Vec<LineTranscription>, RepositoryError> {
        (**self).line_transcriptions(part_id, transcription_id)
    }

    fn count_transcribed_lines(&self, part_id: PartId) -> Result<usize, RepositoryError> {
        (**self).count_transcribed_lines(part_id)
    }
}
