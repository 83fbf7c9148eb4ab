//! Documents and the layout elements segmentation produces.

use serde::{Deserialize, Serialize};

use folio_core::{
    BlockId, DocumentId, DomainError, DomainResult, Entity, ExternalId, ExternalIdKind, LineId,
    PartId,
};
use folio_geometry::{BoundingBox, Polygon, Polyline};

use crate::job::TextDirection;

/// Reading direction of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadDirection {
    #[default]
    Ltr,
    Rtl,
}

/// A named element type (e.g. "Paragraph", "Marginalia").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Typology {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    pub text_direction: TextDirection,
}

/// The document a part belongs to; scopes valid element types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub read_direction: ReadDirection,
    pub main_script: Option<Script>,
    pub valid_block_types: Vec<Typology>,
    pub valid_line_types: Vec<Typology>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            name: name.into(),
            read_direction: ReadDirection::default(),
            main_script: None,
            valid_block_types: Vec::new(),
            valid_line_types: Vec::new(),
        }
    }

    pub fn with_read_direction(mut self, read_direction: ReadDirection) -> Self {
        self.read_direction = read_direction;
        self
    }

    pub fn with_main_script(mut self, script: Script) -> Self {
        self.main_script = Some(script);
        self
    }

    pub fn with_block_types(mut self, names: &[&str]) -> Self {
        self.valid_block_types = typologies(names);
        self
    }

    pub fn with_line_types(mut self, names: &[&str]) -> Self {
        self.valid_line_types = typologies(names);
        self
    }

    pub fn block_type(&self, name: &str) -> Option<&Typology> {
        self.valid_block_types.iter().find(|t| t.name == name)
    }

    pub fn line_type(&self, name: &str) -> Option<&Typology> {
        self.valid_line_types.iter().find(|t| t.name == name)
    }

    pub fn default_text_direction(&self) -> TextDirection {
        self.main_script
            .as_ref()
            .map(|s| s.text_direction)
            .unwrap_or_default()
    }
}

fn typologies(names: &[&str]) -> Vec<Typology> {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| Typology {
            id: i as u32 + 1,
            name: (*n).to_string(),
        })
        .collect()
}

/// A region grouping lines (paragraph, margin note, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub part_id: PartId,
    pub external_id: ExternalId,
    pub typology: Option<Typology>,
    pub polygon: Polygon,
    /// Position among the part's blocks; assigned by the repository.
    pub order: u32,
}

impl Block {
    pub fn new(part_id: PartId, polygon: Polygon, typology: Option<Typology>) -> Self {
        Self {
            id: BlockId::new(),
            part_id,
            external_id: ExternalId::mint(ExternalIdKind::TextBlock),
            typology,
            polygon,
            order: 0,
        }
    }

    /// `[xmin, ymin, xmax, ymax]`.
    pub fn coordinates_box(&self) -> [f64; 4] {
        self.polygon.bounding_box().as_array()
    }

    pub fn width(&self) -> f64 {
        self.polygon.bounding_box().width()
    }

    pub fn height(&self) -> f64 {
        self.polygon.bounding_box().height()
    }
}

impl Entity for Block {
    type Id = BlockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A segmented text line.
///
/// `block` is a weak reference: removing the block nulls it, it never
/// deletes the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub part_id: PartId,
    pub external_id: ExternalId,
    pub block: Option<BlockId>,
    pub baseline: Option<Polyline>,
    pub mask: Option<Polygon>,
    pub script: Option<String>,
    pub typology: Option<Typology>,
    /// Position among the part's lines; assigned by the repository.
    pub order: u32,
}

impl Line {
    /// A line needs a baseline, a mask, or both.
    pub fn new(
        part_id: PartId,
        baseline: Option<Polyline>,
        mask: Option<Polygon>,
    ) -> DomainResult<Self> {
        if baseline.is_none() && mask.is_none() {
            return Err(DomainError::validation("line needs a baseline or a mask"));
        }
        Ok(Self {
            id: LineId::new(),
            part_id,
            external_id: ExternalId::mint(ExternalIdKind::Line),
            block: None,
            baseline,
            mask,
            script: None,
            typology: None,
            order: 0,
        })
    }

    pub fn in_block(mut self, block: Option<BlockId>) -> Self {
        self.block = block;
        self
    }

    pub fn with_script(mut self, script: Option<String>, typology: Option<Typology>) -> Self {
        self.script = script;
        self.typology = typology;
        self
    }

    /// Box of the mask, or of the baseline when there is no mask.
    pub fn bounding_box(&self) -> BoundingBox {
        match (&self.mask, &self.baseline) {
            (Some(mask), _) => mask.bounding_box(),
            (None, Some(baseline)) => baseline.bounding_box(),
            // constructor guarantees one of the two
            (None, None) => BoundingBox {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 0.0,
                max_y: 0.0,
            },
        }
    }

    pub fn width(&self) -> f64 {
        self.bounding_box().width()
    }

    pub fn height(&self) -> f64 {
        self.bounding_box().height()
    }
}

impl Entity for Line {
    type Id = LineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
