//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a document (a collection of parts).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

/// Identifier of a document part (one page being processed).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(Uuid);

/// Identifier of a block (region) inside a part.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

/// Identifier of a line inside a part.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(Uuid);

/// Identifier of a named transcription of a document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscriptionId(Uuid);

/// Identifier of a trained model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(DocumentId, "DocumentId");
impl_uuid_newtype!(PartId, "PartId");
impl_uuid_newtype!(BlockId, "BlockId");
impl_uuid_newtype!(LineId, "LineId");
impl_uuid_newtype!(TranscriptionId, "TranscriptionId");
impl_uuid_newtype!(ModelId, "ModelId");

/// Kind of layout element an external identifier is minted for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExternalIdKind {
    TextBlock,
    Line,
}

impl ExternalIdKind {
    fn prefix(self) -> &'static str {
        match self {
            ExternalIdKind::TextBlock => "textblock_",
            ExternalIdKind::Line => "line_",
        }
    }
}

/// Externally-stable identifier of a block or line (e.g. `line_1f2e3d4c`).
///
/// Minted once when the element is created and never reassigned; exports
/// reference elements by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Mint a fresh identifier: kind prefix + 8 random hex characters.
    ///
    /// Uses UUIDv4 so the suffix is random rather than timestamp-derived.
    pub fn mint(kind: ExternalIdKind) -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", kind.prefix(), &simple[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ExternalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > 128 {
            return Err(DomainError::invalid_id(format!(
                "ExternalId: expected 1..=128 characters, got {}",
                s.len()
            )));
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_external_ids_carry_kind_prefix() {
        let block = ExternalId::mint(ExternalIdKind::TextBlock);
        let line = ExternalId::mint(ExternalIdKind::Line);

        assert!(block.as_str().starts_with("textblock_"));
        assert_eq!(block.as_str().len(), "textblock_".len() + 8);
        assert!(line.as_str().starts_with("line_"));
        assert_ne!(
            ExternalId::mint(ExternalIdKind::Line),
            ExternalId::mint(ExternalIdKind::Line)
        );
    }

    #[test]
    fn part_id_round_trips_through_display() {
        let id = PartId::new();
        let parsed: PartId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        let err = "not-a-uuid".parse::<LineId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("LineId")));
    }

    #[test]
    fn empty_external_id_is_rejected() {
        assert!("   ".parse::<ExternalId>().is_err());
    }
}
