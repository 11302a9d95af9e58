//! Signature origin lifecycle.
//!
//! The origin part exists exactly while at least one signature does: it is
//! created by the first sign and deleted with the last signature.

use crate::error::{PackResult, PackageError};
use crate::package::{Package, PackageRelationship, PartUri, RelationshipSource, TargetMode};
use crate::signing::rollback::RollbackLog;
use crate::signing::{
    ORIGIN_CONTENT_TYPE, ORIGIN_PART_NAME, ORIGIN_RELATIONSHIP_TYPE, SIGNATURE_RELATIONSHIP_TYPE,
};

pub(crate) fn default_origin_uri() -> PackResult<PartUri> {
    PartUri::new(ORIGIN_PART_NAME)
}

/// Find the origin through the package-level origin relationship.
pub(crate) fn locate(package: &dyn Package) -> PackResult<Option<PartUri>> {
    let rels = package.relationships_by_type(&RelationshipSource::Package, ORIGIN_RELATIONSHIP_TYPE)?;
    let rel = match rels.as_slice() {
        [] => return Ok(None),
        [rel] => rel,
        _ => {
            return Err(PackageError::format(format!(
                "package has {} signature origin relationships",
                rels.len()
            )))
        }
    };

    let uri = rel.resolve_target().ok_or_else(|| {
        PackageError::format(format!("signature origin target is not a part: {}", rel.target))
    })?;
    if !package.part_exists(&uri) {
        return Err(PackageError::format(format!("signature origin part missing: {uri}")));
    }
    if package.content_type(&uri)? != ORIGIN_CONTENT_TYPE {
        return Err(PackageError::format(format!(
            "signature origin {uri} has wrong content type"
        )));
    }
    Ok(Some(uri))
}

/// Return the existing origin, or create it at the default location.
pub(crate) fn ensure(
    package: &mut dyn Package,
    current: Option<&PartUri>,
    log: &mut RollbackLog,
) -> PackResult<PartUri> {
    if let Some(uri) = current {
        return Ok(uri.clone());
    }

    let uri = default_origin_uri()?;
    if package.part_exists(&uri) {
        if package.content_type(&uri)? != ORIGIN_CONTENT_TYPE {
            return Err(PackageError::format(format!(
                "part {uri} exists but is not a signature origin"
            )));
        }
    } else {
        package.create_part(&uri, ORIGIN_CONTENT_TYPE)?;
        log.part(&uri);
    }

    let rel = package.create_relationship(
        &RelationshipSource::Package,
        uri.as_str(),
        TargetMode::Internal,
        ORIGIN_RELATIONSHIP_TYPE,
        None,
    )?;
    log.relationship(&RelationshipSource::Package, &rel.id);
    tracing::debug!(origin = %uri, "signature origin created");
    Ok(uri)
}

/// Origin → signature relationships.
pub(crate) fn signature_relationships(
    package: &dyn Package,
    origin: &PartUri,
) -> PackResult<Vec<PackageRelationship>> {
    package.relationships_by_type(
        &RelationshipSource::Part(origin.clone()),
        SIGNATURE_RELATIONSHIP_TYPE,
    )
}

/// Delete the origin part with all of its outbound relationships, and the
/// package-level relationship to it.
pub(crate) fn delete(package: &mut dyn Package, origin: &PartUri) -> PackResult<()> {
    let root_rels =
        package.relationships_by_type(&RelationshipSource::Package, ORIGIN_RELATIONSHIP_TYPE)?;
    for rel in root_rels {
        if rel.resolve_target().as_ref() == Some(origin) {
            package.delete_relationship(&RelationshipSource::Package, &rel.id)?;
        }
    }
    if package.part_exists(origin) {
        package.delete_part(origin)?;
    }
    tracing::debug!(origin = %origin, "signature origin deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryPackage;

    #[test]
    fn test_ensure_then_delete() {
        let mut pkg = MemoryPackage::new();
        assert_eq!(locate(&pkg).unwrap(), None);

        let mut log = RollbackLog::new();
        let origin = ensure(&mut pkg, None, &mut log).unwrap();
        log.commit();
        assert_eq!(origin.as_str(), ORIGIN_PART_NAME);
        assert_eq!(locate(&pkg).unwrap(), Some(origin.clone()));

        delete(&mut pkg, &origin).unwrap();
        assert_eq!(locate(&pkg).unwrap(), None);
        assert!(!pkg.part_exists(&origin));
    }

    #[test]
    fn test_multiple_origins_is_format_error() {
        let mut pkg = MemoryPackage::new();
        for _ in 0..2 {
            pkg.create_relationship(
                &RelationshipSource::Package,
                ORIGIN_PART_NAME,
                TargetMode::Internal,
                ORIGIN_RELATIONSHIP_TYPE,
                None,
            )
            .unwrap();
        }
        assert!(locate(&pkg).unwrap_err().is_format());
    }

    #[test]
    fn test_dangling_origin_is_format_error() {
        let mut pkg = MemoryPackage::new();
        pkg.create_relationship(
            &RelationshipSource::Package,
            ORIGIN_PART_NAME,
            TargetMode::Internal,
            ORIGIN_RELATIONSHIP_TYPE,
            None,
        )
        .unwrap();
        assert!(locate(&pkg).unwrap_err().is_format());
    }

    #[test]
    fn test_ensure_reuses_unlinked_origin_part() {
        let mut pkg = MemoryPackage::new();
        let origin = default_origin_uri().unwrap();
        pkg.create_part(&origin, ORIGIN_CONTENT_TYPE).unwrap();
        let mut log = RollbackLog::new();
        ensure(&mut pkg, None, &mut log).unwrap();
        assert!(!log.created_part(&origin));
        log.unwind(&mut pkg);
        assert!(pkg.part_exists(&origin));
        assert_eq!(locate(&pkg).unwrap(), None);
    }
}
