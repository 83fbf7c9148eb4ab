//! Materializing a segmentation prediction into blocks and lines.
//!
//! The inference collaborator returns raw coordinate arrays. They are
//! validated here; invalid shapes are skipped and counted, they never abort
//! the whole pass. Building the changeset is pure, the repository applies it
//! as one atomic write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use folio_core::{BlockId, PartId};
use folio_geometry::{Polygon, Polyline};

use crate::job::SegmentOptions;
use crate::layout::{Block, Document, Line};

/// One predicted text line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictedLine {
    pub baseline: Vec<Vec<f64>>,
    #[serde(default)]
    pub boundary: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub script: Option<String>,
}

/// Raw output of the segmentation model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentationResult {
    /// Region polygons grouped by region type name.
    #[serde(default)]
    pub regions: BTreeMap<String, Vec<Vec<Vec<f64>>>>,
    #[serde(default)]
    pub lines: Vec<PredictedLine>,
}

/// Everything one segmentation pass writes for a part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentationChangeset {
    pub clear_lines: bool,
    pub clear_blocks: bool,
    pub blocks: Vec<Block>,
    pub lines: Vec<Line>,
    /// Predicted shapes dropped for invalid geometry.
    pub rejected: usize,
}

impl SegmentationChangeset {
    pub fn is_empty(&self) -> bool {
        !self.clear_lines && !self.clear_blocks && self.blocks.is_empty() && self.lines.is_empty()
    }
}

/// Turn `result` into the blocks and lines to persist.
///
/// With `override_existing`, the segmented kinds are cleared first. Each new
/// line is attached to the first block (surviving ones first, then new ones)
/// whose polygon contains the midpoint of its baseline.
pub fn build_changeset(
    part_id: PartId,
    document: &Document,
    existing_blocks: &[Block],
    result: &SegmentationResult,
    options: &SegmentOptions,
) -> SegmentationChangeset {
    let mut changes = SegmentationChangeset {
        clear_lines: options.override_existing && options.steps.includes_lines(),
        clear_blocks: options.override_existing && options.steps.includes_regions(),
        ..Default::default()
    };

    if options.steps.includes_regions() {
        for (region_type, polygons) in &result.regions {
            let typology = document.block_type(region_type).cloned();
            for raw in polygons {
                match Polygon::from_raw(raw) {
                    Ok(polygon) => changes
                        .blocks
                        .push(Block::new(part_id, polygon, typology.clone())),
                    Err(err) => {
                        warn!(part_id = %part_id, region_type = region_type.as_str(), error = %err, "skipping invalid region");
                        changes.rejected += 1;
                    }
                }
            }
        }
    }

    if options.steps.includes_lines() {
        let surviving: &[Block] = if changes.clear_blocks { &[] } else { existing_blocks };
        let candidates: Vec<&Block> = surviving.iter().chain(changes.blocks.iter()).collect();

        let mut lines = Vec::with_capacity(result.lines.len());
        for predicted in &result.lines {
            match materialize_line(part_id, document, predicted, &candidates) {
                Ok(line) => lines.push(line),
                Err(err) => {
                    warn!(part_id = %part_id, error = %err, "skipping invalid line");
                    changes.rejected += 1;
                }
            }
        }
        changes.lines = lines;
    }

    changes
}

fn materialize_line(
    part_id: PartId,
    document: &Document,
    predicted: &PredictedLine,
    blocks: &[&Block],
) -> folio_core::DomainResult<Line> {
    let baseline = Polyline::from_raw(&predicted.baseline)?;
    let mask = predicted
        .boundary
        .as_deref()
        .map(Polygon::from_raw)
        .transpose()?;

    let center = baseline.midpoint();
    let block: Option<BlockId> = blocks
        .iter()
        .find(|b| b.polygon.contains(center))
        .map(|b| b.id);
    let typology = predicted
        .script
        .as_deref()
        .and_then(|s| document.line_type(s))
        .cloned();

    Ok(Line::new(part_id, Some(baseline), mask)?
        .in_block(block)
        .with_script(predicted.script.clone(), typology))
}
