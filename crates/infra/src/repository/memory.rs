//! In-memory repository for tests/dev.
//!
//! A single lock guards the whole state, so every trait method is atomic.
//! Parts are stored as snapshots, the same shape a database row would have.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use folio_core::{BlockId, DocumentId, LineId, PartId, TranscriptionId};
use folio_workflow::{
    Block, Document, DocumentPart, Line, LineTranscription, OrderChange, PartSnapshot,
    SegmentationChangeset, Transcription,
};

use super::{PartRepository, RepositoryError};

#[derive(Debug, Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    parts: HashMap<PartId, PartSnapshot>,
    blocks: HashMap<PartId, Vec<Block>>,
    lines: HashMap<PartId, Vec<Line>>,
    transcriptions: Vec<Transcription>,
    line_transcriptions: HashMap<(LineId, TranscriptionId), LineTranscription>,
}

impl State {
    fn drop_line_transcriptions(&mut self, removed: &HashSet<LineId>) {
        self.line_transcriptions
            .retain(|(line_id, _), _| !removed.contains(line_id));
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPartRepository {
    state: RwLock<State>,
}

impl InMemoryPartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, RepositoryError> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Storage("repository lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, RepositoryError> {
        self.state
            .write()
            .map_err(|_| RepositoryError::Storage("repository lock poisoned".to_string()))
    }
}

fn snapshot(part: &DocumentPart) -> Result<PartSnapshot, RepositoryError> {
    part.snapshot()
        .map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

fn sorted<T: Clone>(items: Option<&Vec<T>>, order: impl Fn(&T) -> u32) -> Vec<T> {
    let mut items = items.cloned().unwrap_or_default();
    items.sort_by_key(|i| order(i));
    items
}

fn next_order(orders: impl Iterator<Item = u32>) -> u32 {
    orders.max().map_or(0, |max| max + 1)
}

impl PartRepository for InMemoryPartRepository {
    fn insert_document(&self, document: Document) -> Result<(), RepositoryError> {
        self.write()?.documents.insert(document.id, document);
        Ok(())
    }

    fn document(&self, id: DocumentId) -> Result<Document, RepositoryError> {
        self.read()?
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("document {id}")))
    }

    fn insert_part(&self, part: &DocumentPart) -> Result<(), RepositoryError> {
        let snap = snapshot(part)?;
        let mut state = self.write()?;
        if !state.documents.contains_key(&snap.document_id) {
            return Err(RepositoryError::NotFound(format!("document {}", snap.document_id)));
        }
        state.parts.insert(snap.id, snap);
        Ok(())
    }

    fn part(&self, id: PartId) -> Result<DocumentPart, RepositoryError> {
        let snap = self
            .read()?
            .parts
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("part {id}")))?;
        DocumentPart::from_snapshot(snap).map_err(|e| RepositoryError::Corrupt(e.to_string()))
    }

    fn part_ids(&self) -> Result<Vec<PartId>, RepositoryError> {
        let mut ids: Vec<PartId> = self.read()?.parts.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn save_part(&self, part: &DocumentPart, expected_version: u64) -> Result<(), RepositoryError> {
        let snap = snapshot(part)?;
        let mut state = self.write()?;
        let stored = state
            .parts
            .get_mut(&snap.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("part {}", snap.id)))?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict {
                part_id: snap.id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        *stored = snap;
        Ok(())
    }

    fn delete_part(&self, id: PartId) -> Result<(), RepositoryError> {
        let mut state = self.write()?;
        if state.parts.remove(&id).is_none() {
            return Err(RepositoryError::NotFound(format!("part {id}")));
        }
        state.blocks.remove(&id);
        let removed: HashSet<LineId> = state
            .lines
            .remove(&id)
            .unwrap_or_default()
            .iter()
            .map(|l| l.id)
            .collect();
        state.drop_line_transcriptions(&removed);
        Ok(())
    }

    fn blocks(&self, part_id: PartId) -> Result<Vec<Block>, RepositoryError> {
        Ok(sorted(self.read()?.blocks.get(&part_id), |b| b.order))
    }

    fn lines(&self, part_id: PartId) -> Result<Vec<Line>, RepositoryError> {
        Ok(sorted(self.read()?.lines.get(&part_id), |l| l.order))
    }

    fn apply_segmentation(
        &self,
        part_id: PartId,
        changes: &SegmentationChangeset,
    ) -> Result<(), RepositoryError> {
        let mut state = self.write()?;
        if !state.parts.contains_key(&part_id) {
            return Err(RepositoryError::NotFound(format!("part {part_id}")));
        }

        // staged copies; nothing is written unless every check passes
        let mut blocks = state.blocks.get(&part_id).cloned().unwrap_or_default();
        let mut lines = state.lines.get(&part_id).cloned().unwrap_or_default();
        let mut removed_lines = HashSet::new();

        if changes.clear_lines {
            removed_lines.extend(lines.drain(..).map(|l| l.id));
        }
        if changes.clear_blocks {
            blocks.clear();
            for line in &mut lines {
                line.block = None;
            }
        }

        let mut order = next_order(blocks.iter().map(|b| b.order));
        for block in &changes.blocks {
            if block.part_id != part_id {
                return Err(RepositoryError::Corrupt(format!(
                    "block {} belongs to part {}",
                    block.id, block.part_id
                )));
            }
            blocks.push(Block {
                order,
                ..block.clone()
            });
            order += 1;
        }

        let known: HashSet<BlockId> = blocks.iter().map(|b| b.id).collect();
        let mut order = next_order(lines.iter().map(|l| l.order));
        for line in &changes.lines {
            if line.part_id != part_id {
                return Err(RepositoryError::Corrupt(format!(
                    "line {} belongs to part {}",
                    line.id, line.part_id
                )));
            }
            if let Some(block) = line.block
                && !known.contains(&block)
            {
                return Err(RepositoryError::Corrupt(format!(
                    "line {} references unknown block {block}",
                    line.id
                )));
            }
            lines.push(Line {
                order,
                ..line.clone()
            });
            order += 1;
        }

        debug!(
            part_id = %part_id,
            blocks = blocks.len(),
            lines = lines.len(),
            "segmentation applied"
        );
        state.blocks.insert(part_id, blocks);
        state.lines.insert(part_id, lines);
        state.drop_line_transcriptions(&removed_lines);
        Ok(())
    }

    fn delete_blocks(&self, part_id: PartId, ids: &[BlockId]) -> Result<(), RepositoryError> {
        let ids: HashSet<BlockId> = ids.iter().copied().collect();
        let mut state = self.write()?;
        if let Some(blocks) = state.blocks.get_mut(&part_id) {
            blocks.retain(|b| !ids.contains(&b.id));
            blocks.sort_by_key(|b| b.order);
            for (order, block) in (0u32..).zip(blocks.iter_mut()) {
                block.order = order;
            }
        }
        if let Some(lines) = state.lines.get_mut(&part_id) {
            for line in lines.iter_mut() {
                if line.block.is_some_and(|b| ids.contains(&b)) {
                    line.block = None;
                }
            }
        }
        Ok(())
    }

    fn update_line_orders(&self, changes: &[OrderChange]) -> Result<usize, RepositoryError> {
        if changes.is_empty() {
            return Ok(0);
        }
        let wanted: HashMap<LineId, u32> = changes.iter().map(|c| (c.line_id, c.order)).collect();
        let mut state = self.write()?;
        let mut written = 0;
        for line in state.lines.values_mut().flat_map(|ls| ls.iter_mut()) {
            if let Some(&order) = wanted.get(&line.id) {
                line.order = order;
                written += 1;
            }
        }
        if written != wanted.len() {
            debug!(requested = wanted.len(), written, "some reordered lines no longer exist");
        }
        Ok(written)
    }

    fn get_or_create_transcription(
        &self,
        document_id: DocumentId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Transcription, RepositoryError> {
        let mut state = self.write()?;
        if let Some(existing) = state
            .transcriptions
            .iter()
            .find(|t| t.document_id == document_id && t.name == name)
        {
            return Ok(existing.clone());
        }
        let created = Transcription::new(document_id, name, now);
        state.transcriptions.push(created.clone());
        Ok(created)
    }

    fn transcriptions(&self, document_id: DocumentId) -> Result<Vec<Transcription>, RepositoryError> {
        Ok(self
            .read()?
            .transcriptions
            .iter()
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect())
    }

    fn save_line_transcription(&self, record: LineTranscription) -> Result<(), RepositoryError> {
        let mut state = self.write()?;
        let line_exists = state
            .lines
            .values()
            .any(|ls| ls.iter().any(|l| l.id == record.line_id));
        if !line_exists {
            return Err(RepositoryError::NotFound(format!("line {}", record.line_id)));
        }
        state
            .line_transcriptions
            .insert((record.line_id, record.transcription_id), record);
        Ok(())
    }

    fn line_transcriptions(
        &self,
        part_id: PartId,
        transcription_id: TranscriptionId,
    ) -> Result<Vec<LineTranscription>, RepositoryError> {
        let state = self.read()?;
        let lines = sorted(state.lines.get(&part_id), |l| l.order);
        Ok(lines
            .iter()
            .filter_map(|l| state.line_transcriptions.get(&(l.id, transcription_id)).cloned())
            .collect())
    }

    fn count_transcribed_lines(&self, part_id: PartId) -> Result<usize, RepositoryError> {
        let state = self.read()?;
        let transcribed: HashSet<LineId> = state.line_transcriptions.keys().map(|(l, _)| *l).collect();
        Ok(state
            .lines
            .get(&part_id)
            .map_or(0, |ls| ls.iter().filter(|l| transcribed.contains(&l.id)).count()))
    }
}
