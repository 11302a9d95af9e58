//! Reference-counted certificate parts.
//!
//! Certificate part names are derived from the serial number, so signing
//! twice with one certificate shares a single part. The count for a part is
//! the number of live signature parts relating to it.

use std::collections::HashMap;

use crate::error::{PackResult, PackageError};
use crate::package::{Package, PartUri, RelationshipSource, TargetMode};
use crate::signing::certificate::Certificate;
use crate::signing::rollback::RollbackLog;
use crate::signing::{
    CERTIFICATE_CONTENT_TYPE, CERTIFICATE_PART_EXTENSION, CERTIFICATE_PART_PREFIX,
    CERTIFICATE_RELATIONSHIP_TYPE,
};

#[derive(Debug, Default)]
pub(crate) struct CertificateRegistry {
    counts: HashMap<PartUri, usize>,
}

impl CertificateRegistry {
    /// Part name for `certificate`.
    pub(crate) fn part_uri(certificate: &Certificate) -> PackResult<PartUri> {
        PartUri::new(format!(
            "{CERTIFICATE_PART_PREFIX}{}{CERTIFICATE_PART_EXTENSION}",
            certificate.serial_number()
        ))
    }

    /// Build counts from the certificate relationships of `signature_parts`.
    pub(crate) fn load(package: &dyn Package, signature_parts: &[PartUri]) -> PackResult<Self> {
        let mut registry = Self::default();
        for part in signature_parts {
            for cert in certificate_targets(package, part)? {
                *registry.counts.entry(cert).or_insert(0) += 1;
            }
        }
        Ok(registry)
    }

    pub(crate) fn reference_count(&self, uri: &PartUri) -> usize {
        self.counts.get(uri).copied().unwrap_or(0)
    }

    /// Create or reuse the certificate part and relate `signature_part` to it.
    ///
    /// Counts are not touched until [`CertificateRegistry::acquire`] is called
    /// for the committed signature.
    pub(crate) fn attach(
        package: &mut dyn Package,
        signature_part: &PartUri,
        certificate: &Certificate,
        log: &mut RollbackLog,
    ) -> PackResult<PartUri> {
        let uri = Self::part_uri(certificate)?;
        if package.part_exists(&uri) {
            if package.content_type(&uri)? != CERTIFICATE_CONTENT_TYPE {
                return Err(PackageError::format(format!(
                    "part {uri} exists but is not a certificate part"
                )));
            }
        } else {
            package.create_part(&uri, CERTIFICATE_CONTENT_TYPE)?;
            log.part(&uri);
            package.write_part(&uri, &certificate.to_bytes()?)?;
        }

        let source = RelationshipSource::Part(signature_part.clone());
        let rel = package.create_relationship(
            &source,
            uri.as_str(),
            TargetMode::Internal,
            CERTIFICATE_RELATIONSHIP_TYPE,
            None,
        )?;
        log.relationship(&source, &rel.id);
        Ok(uri)
    }

    pub(crate) fn acquire(&mut self, uri: &PartUri) {
        *self.counts.entry(uri.clone()).or_insert(0) += 1;
    }

    /// Drop one reference; delete the part when none remain.
    ///
    /// Returns whether the part was deleted.
    pub(crate) fn release(&mut self, package: &mut dyn Package, uri: &PartUri) -> PackResult<bool> {
        let remaining = self.reference_count(uri).saturating_sub(1);
        if remaining > 0 {
            self.counts.insert(uri.clone(), remaining);
            return Ok(false);
        }
        self.counts.remove(uri);
        if package.part_exists(uri) {
            package.delete_part(uri)?;
        }
        tracing::debug!(certificate = %uri, "certificate part deleted");
        Ok(true)
    }

    pub(crate) fn clear(&mut self) {
        self.counts.clear();
    }
}

/// Certificate parts related from `signature_part`.
pub(crate) fn certificate_targets(
    package: &dyn Package,
    signature_part: &PartUri,
) -> PackResult<Vec<PartUri>> {
    let rels = package.relationships_by_type(
        &RelationshipSource::Part(signature_part.clone()),
        CERTIFICATE_RELATIONSHIP_TYPE,
    )?;
    rels.iter()
        .map(|rel| {
            rel.resolve_target().ok_or_else(|| {
                PackageError::format(format!(
                    "certificate relationship {} of {signature_part} is not internal",
                    rel.id
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryPackage;
    use chrono::Utc;
    use ed25519_dalek::SigningKey;

    fn cert() -> Certificate {
        Certificate::new("beef", "CN=x", Utc::now(), Utc::now(), SigningKey::from_bytes(&[9; 32]))
            .unwrap()
    }

    #[test]
    fn test_part_uri_from_serial() {
        let uri = CertificateRegistry::part_uri(&cert()).unwrap();
        assert_eq!(
            uri.as_str(),
            "/package/services/digital-signature/certificate/BEEF.cer"
        );
    }

    #[test]
    fn test_shared_part_counting() {
        let mut pkg = MemoryPackage::new();
        let sig_a = PartUri::new("/a.psdsxs").unwrap();
        let sig_b = PartUri::new("/b.psdsxs").unwrap();
        pkg.create_part(&sig_a, "application/x-sig").unwrap();
        pkg.create_part(&sig_b, "application/x-sig").unwrap();

        let mut registry = CertificateRegistry::default();
        let mut log = RollbackLog::new();
        let first = CertificateRegistry::attach(&mut pkg, &sig_a, &cert(), &mut log).unwrap();
        let second = CertificateRegistry::attach(&mut pkg, &sig_b, &cert(), &mut log).unwrap();
        log.commit();
        registry.acquire(&first);
        registry.acquire(&second);
        assert_eq!(first, second);
        assert_eq!(registry.reference_count(&first), 2);

        let reloaded = CertificateRegistry::load(&pkg, &[sig_a.clone(), sig_b.clone()]).unwrap();
        assert_eq!(reloaded.reference_count(&first), 2);

        assert!(!registry.release(&mut pkg, &first).unwrap());
        assert!(pkg.part_exists(&first));
        assert!(registry.release(&mut pkg, &first).unwrap());
        assert!(!pkg.part_exists(&first));
    }
}
