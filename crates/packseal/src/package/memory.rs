//! In-memory package.

use std::collections::BTreeMap;

use crate::error::{PackResult, PackageError};
use crate::package::{Package, PackageRelationship, PartUri, RelationshipSource, TargetMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartEntry {
    pub(crate) content_type: String,
    pub(crate) data: Vec<u8>,
}

/// Package held entirely in memory.
///
/// Relationship ids are generated as `R1`, `R2`, ... skipping ids already in
/// use for the same source.
#[derive(Debug, Clone, Default)]
pub struct MemoryPackage {
    pub(crate) parts: BTreeMap<PartUri, PartEntry>,
    pub(crate) relationships: BTreeMap<RelationshipSource, Vec<PackageRelationship>>,
    read_only: bool,
    next_id: u64,
    flushes: u64,
}

impl MemoryPackage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the package read-only (or writable again).
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Create a part and write its contents in one step.
    pub fn add_part(&mut self, uri: &PartUri, content_type: &str, data: &[u8]) -> PackResult<()> {
        self.create_part(uri, content_type)?;
        self.write_part(uri, data)
    }

    /// Number of times [`Package::flush`] was called.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn ensure_writable(&self) -> PackResult<()> {
        if self.read_only {
            return Err(PackageError::state("package is read-only"));
        }
        Ok(())
    }

    fn entry(&self, uri: &PartUri) -> PackResult<&PartEntry> {
        self.parts.get(uri).ok_or_else(|| PackageError::not_found(uri))
    }

    fn generate_id(&mut self, source: &RelationshipSource) -> String {
        loop {
            self.next_id += 1;
            let candidate = format!("R{}", self.next_id);
            let taken = self
                .relationships
                .get(source)
                .is_some_and(|rels| rels.iter().any(|r| r.id == candidate));
            if !taken {
                return candidate;
            }
        }
    }
}

impl Package for MemoryPackage {
    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn part_exists(&self, uri: &PartUri) -> bool {
        self.parts.contains_key(uri)
    }

    fn content_type(&self, uri: &PartUri) -> PackResult<String> {
        Ok(self.entry(uri)?.content_type.clone())
    }

    fn create_part(&mut self, uri: &PartUri, content_type: &str) -> PackResult<()> {
        self.ensure_writable()?;
        if self.parts.contains_key(uri) {
            return Err(PackageError::validation(format!("part already exists: {uri}")));
        }
        if content_type.trim().is_empty() {
            return Err(PackageError::validation("content type must not be empty"));
        }
        self.parts.insert(
            uri.clone(),
            PartEntry {
                content_type: content_type.to_string(),
                data: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_part(&mut self, uri: &PartUri) -> PackResult<()> {
        self.ensure_writable()?;
        if self.parts.remove(uri).is_none() {
            return Err(PackageError::not_found(uri));
        }
        self.relationships.remove(&RelationshipSource::Part(uri.clone()));
        Ok(())
    }

    fn read_part(&self, uri: &PartUri) -> PackResult<Vec<u8>> {
        Ok(self.entry(uri)?.data.clone())
    }

    fn write_part(&mut self, uri: &PartUri, data: &[u8]) -> PackResult<()> {
        self.ensure_writable()?;
        let entry = self
            .parts
            .get_mut(uri)
            .ok_or_else(|| PackageError::not_found(uri))?;
        entry.data = data.to_vec();
        Ok(())
    }

    fn part_uris(&self) -> Vec<PartUri> {
        self.parts.keys().cloned().collect()
    }

    fn create_relationship(
        &mut self,
        source: &RelationshipSource,
        target: &str,
        target_mode: TargetMode,
        relationship_type: &str,
        id: Option<&str>,
    ) -> PackResult<PackageRelationship> {
        self.ensure_writable()?;
        if let RelationshipSource::Part(uri) = source {
            if !self.parts.contains_key(uri) {
                return Err(PackageError::not_found(uri));
            }
        }
        if relationship_type.trim().is_empty() {
            return Err(PackageError::validation("relationship type must not be empty"));
        }

        let id = match id {
            Some(id) => {
                let taken = self
                    .relationships
                    .get(source)
                    .is_some_and(|rels| rels.iter().any(|r| r.id == id));
                if taken {
                    return Err(PackageError::validation(format!(
                        "duplicate relationship id '{id}' on {source}"
                    )));
                }
                id.to_string()
            }
            None => self.generate_id(source),
        };

        let relationship = PackageRelationship {
            id,
            source: source.clone(),
            target: target.to_string(),
            target_mode,
            relationship_type: relationship_type.to_string(),
        };
        self.relationships
            .entry(source.clone())
            .or_default()
            .push(relationship.clone());
        Ok(relationship)
    }

    fn delete_relationship(&mut self, source: &RelationshipSource, id: &str) -> PackResult<()> {
        self.ensure_writable()?;
        let rels = self.relationships.get_mut(source).ok_or_else(|| {
            PackageError::not_found(format!("{source}#{id}"))
        })?;
        let before = rels.len();
        rels.retain(|r| r.id != id);
        if rels.len() == before {
            return Err(PackageError::not_found(format!("{source}#{id}")));
        }
        if rels.is_empty() {
            self.relationships.remove(source);
        }
        Ok(())
    }

    fn relationships(&self, source: &RelationshipSource) -> PackResult<Vec<PackageRelationship>> {
        if let RelationshipSource::Part(uri) = source {
            if !self.parts.contains_key(uri) {
                return Err(PackageError::not_found(uri));
            }
        }
        Ok(self.relationships.get(source).cloned().unwrap_or_default())
    }

    fn flush(&mut self) -> PackResult<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> PartUri {
        PartUri::new(s).unwrap()
    }

    #[test]
    fn test_part_lifecycle() {
        let mut pkg = MemoryPackage::new();
        pkg.add_part(&uri("/a.xml"), "application/xml", b"<a/>").unwrap();
        assert!(pkg.part_exists(&uri("/A.xml")));
        assert_eq!(pkg.read_part(&uri("/a.xml")).unwrap(), b"<a/>");
        assert_eq!(pkg.content_type(&uri("/a.xml")).unwrap(), "application/xml");

        let err = pkg.create_part(&uri("/a.xml"), "text/plain").unwrap_err();
        assert!(err.is_validation());

        pkg.delete_part(&uri("/a.xml")).unwrap();
        assert!(!pkg.part_exists(&uri("/a.xml")));
        assert!(pkg.delete_part(&uri("/a.xml")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_part_drops_outbound_relationships() {
        let mut pkg = MemoryPackage::new();
        pkg.add_part(&uri("/a.xml"), "application/xml", b"").unwrap();
        pkg.add_part(&uri("/b.xml"), "application/xml", b"").unwrap();
        let source = RelationshipSource::Part(uri("/a.xml"));
        pkg.create_relationship(&source, "/b.xml", TargetMode::Internal, "urn:t", None)
            .unwrap();
        pkg.delete_part(&uri("/a.xml")).unwrap();
        pkg.add_part(&uri("/a.xml"), "application/xml", b"").unwrap();
        assert!(pkg.relationships(&source).unwrap().is_empty());
    }

    #[test]
    fn test_relationship_ids() {
        let mut pkg = MemoryPackage::new();
        let root = RelationshipSource::Package;
        pkg.create_relationship(&root, "/x.xml", TargetMode::Internal, "urn:t", Some("R2"))
            .unwrap();
        let first = pkg
            .create_relationship(&root, "/y.xml", TargetMode::Internal, "urn:t", None)
            .unwrap();
        let second = pkg
            .create_relationship(&root, "/z.xml", TargetMode::Internal, "urn:t", None)
            .unwrap();
        assert_eq!(first.id, "R1");
        assert_eq!(second.id, "R3");

        let dup = pkg.create_relationship(&root, "/z.xml", TargetMode::Internal, "urn:t", Some("R1"));
        assert!(dup.unwrap_err().is_validation());

        pkg.delete_relationship(&root, "R1").unwrap();
        assert_eq!(pkg.relationships(&root).unwrap().len(), 2);
        assert!(pkg.delete_relationship(&root, "R1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_relationships_by_type_and_resolution() {
        let mut pkg = MemoryPackage::new();
        pkg.add_part(&uri("/docs/a.xml"), "application/xml", b"").unwrap();
        let source = RelationshipSource::Part(uri("/docs/a.xml"));
        pkg.create_relationship(&source, "b.xml", TargetMode::Internal, "urn:one", None)
            .unwrap();
        pkg.create_relationship(&source, "https://example.com", TargetMode::External, "urn:two", None)
            .unwrap();

        let one = pkg.relationships_by_type(&source, "urn:one").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].resolve_target().unwrap(), uri("/docs/b.xml"));

        let two = pkg.relationships_by_type(&source, "urn:two").unwrap();
        assert!(two[0].resolve_target().is_none());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let mut pkg = MemoryPackage::new();
        pkg.add_part(&uri("/a.xml"), "application/xml", b"").unwrap();
        pkg.set_read_only(true);
        assert!(pkg.is_read_only());
        assert!(pkg.write_part(&uri("/a.xml"), b"x").unwrap_err().is_state());
        assert!(pkg.delete_part(&uri("/a.xml")).unwrap_err().is_state());
        assert_eq!(pkg.read_part(&uri("/a.xml")).unwrap(), b"");
    }
}
