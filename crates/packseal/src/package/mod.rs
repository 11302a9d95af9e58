//! Part/relationship container model.
//!
//! The signing subsystem only needs a narrow view of a package: part
//! existence, creation and deletion, and typed relationships between parts.
//! [`Package`] is that seam; [`MemoryPackage`] is the in-memory
//! implementation that encrypted envelopes materialize.

pub mod archive;
pub mod memory;
pub mod uri;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PackResult;

pub use memory::MemoryPackage;
pub use uri::PartUri;

/// Owner of a set of relationships: the package root or a part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSource {
    Package,
    Part(PartUri),
}

impl RelationshipSource {
    /// The source part, if this is not the package root.
    pub fn part(&self) -> Option<&PartUri> {
        match self {
            Self::Package => None,
            Self::Part(uri) => Some(uri),
        }
    }
}

impl fmt::Display for RelationshipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package => f.write_str("/"),
            Self::Part(uri) => write!(f, "{uri}"),
        }
    }
}

impl From<PartUri> for RelationshipSource {
    fn from(uri: PartUri) -> Self {
        Self::Part(uri)
    }
}

/// Whether a relationship points inside or outside the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    #[default]
    Internal,
    External,
}

/// A typed, directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRelationship {
    pub id: String,
    pub source: RelationshipSource,
    pub target: String,
    pub target_mode: TargetMode,
    pub relationship_type: String,
}

impl PackageRelationship {
    /// The part this relationship points at, for internal targets.
    pub fn resolve_target(&self) -> Option<PartUri> {
        match self.target_mode {
            TargetMode::External => None,
            TargetMode::Internal => PartUri::resolve(self.source.part(), &self.target).ok(),
        }
    }
}

/// Container of parts connected by typed relationships.
pub trait Package {
    /// Whether mutating calls are refused.
    fn is_read_only(&self) -> bool;

    fn part_exists(&self, uri: &PartUri) -> bool;

    /// Content type of an existing part.
    fn content_type(&self, uri: &PartUri) -> PackResult<String>;

    /// Create an empty part. Fails if the part exists.
    fn create_part(&mut self, uri: &PartUri, content_type: &str) -> PackResult<()>;

    /// Delete a part together with its outbound relationships.
    fn delete_part(&mut self, uri: &PartUri) -> PackResult<()>;

    fn read_part(&self, uri: &PartUri) -> PackResult<Vec<u8>>;

    /// Replace the contents of an existing part.
    fn write_part(&mut self, uri: &PartUri, data: &[u8]) -> PackResult<()>;

    /// All part names, in stable order.
    fn part_uris(&self) -> Vec<PartUri>;

    /// Create a relationship. A fresh id is generated when `id` is `None`.
    fn create_relationship(
        &mut self,
        source: &RelationshipSource,
        target: &str,
        target_mode: TargetMode,
        relationship_type: &str,
        id: Option<&str>,
    ) -> PackResult<PackageRelationship>;

    fn delete_relationship(&mut self, source: &RelationshipSource, id: &str) -> PackResult<()>;

    /// Relationships owned by `source`, in creation order.
    fn relationships(&self, source: &RelationshipSource) -> PackResult<Vec<PackageRelationship>>;

    fn relationships_by_type(
        &self,
        source: &RelationshipSource,
        relationship_type: &str,
    ) -> PackResult<Vec<PackageRelationship>> {
        Ok(self
            .relationships(source)?
            .into_iter()
            .filter(|r| r.relationship_type == relationship_type)
            .collect())
    }

    /// Persist pending changes.
    fn flush(&mut self) -> PackResult<()>;
}
