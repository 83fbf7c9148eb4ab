//! `folio-core`: identifiers, errors and the small trait vocabulary shared by
//! the geometry, layout and workflow crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    BlockId, DocumentId, ExternalId, ExternalIdKind, LineId, ModelId, PartId, TranscriptionId,
};
pub use value_object::ValueObject;
