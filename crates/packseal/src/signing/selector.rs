//! Relationship selectors: which relationships of a source a signature covers.

use serde::{Deserialize, Serialize};

use crate::error::{PackResult, PackageError};
use crate::package::{Package, PackageRelationship, RelationshipSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSelectorType {
    /// Match a single relationship by id.
    Id,
    /// Match every relationship of a type.
    Type,
}

/// Selection criteria over the relationships of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRelationshipSelector {
    source: RelationshipSource,
    selector_type: RelationshipSelectorType,
    criteria: String,
}

impl PackageRelationshipSelector {
    pub fn new(
        source: RelationshipSource,
        selector_type: RelationshipSelectorType,
        criteria: impl Into<String>,
    ) -> PackResult<Self> {
        let criteria = criteria.into();
        if criteria.trim().is_empty() {
            return Err(PackageError::validation(
                "relationship selector criteria must not be empty",
            ));
        }
        if selector_type == RelationshipSelectorType::Id && !super::is_ncname(&criteria) {
            return Err(PackageError::format(format!(
                "relationship id '{criteria}' is not a valid identifier"
            )));
        }
        Ok(Self {
            source,
            selector_type,
            criteria,
        })
    }

    pub fn source(&self) -> &RelationshipSource {
        &self.source
    }

    pub fn selector_type(&self) -> RelationshipSelectorType {
        self.selector_type
    }

    pub fn criteria(&self) -> &str {
        &self.criteria
    }

    /// Relationships currently matching this selector, ordered by id.
    pub fn select(&self, package: &dyn Package) -> PackResult<Vec<PackageRelationship>> {
        let mut selected: Vec<PackageRelationship> = package
            .relationships(&self.source)?
            .into_iter()
            .filter(|r| match self.selector_type {
                RelationshipSelectorType::Id => r.id == self.criteria,
                RelationshipSelectorType::Type => r.relationship_type == self.criteria,
            })
            .collect();
        selected.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(selected)
    }
}
