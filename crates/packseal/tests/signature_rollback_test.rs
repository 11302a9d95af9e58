//! Failed signs leave the package exactly as it was.

mod common;

use std::rc::Rc;

use common::*;
use packseal::error::ErrorKind;
use packseal::signing::{DataObject, SignRequest, SignatureContent, PACKAGE_OBJECT_ID};
use packseal::{
    Certificate, DigestSignatureEngine, MemoryPackage, Package, PackageDigitalSignatureManager,
    PackageError, PackResult, PartUri, RelationshipSource, SignatureDefinition, SignatureEngine,
    SignatureManagerOptions, VerifyResult,
};

/// Writes garbage into the signature part, then fails.
struct FailingEngine;

impl SignatureEngine for FailingEngine {
    fn sign(&self, package: &mut dyn Package, request: &SignRequest<'_>) -> PackResult<SignatureContent> {
        package.write_part(request.signature_part, b"partial")?;
        Err(PackageError::crypto("hardware token unavailable"))
    }

    fn load(&self, package: &dyn Package, signature_part: &PartUri) -> PackResult<SignatureContent> {
        DigestSignatureEngine::new().load(package, signature_part)
    }

    fn verify(
        &self,
        package: &dyn Package,
        content: &SignatureContent,
        certificate: &Certificate,
    ) -> PackResult<bool> {
        DigestSignatureEngine::new().verify(package, content, certificate)
    }
}

struct Snapshot {
    parts: Vec<PartUri>,
    root_rels: usize,
}

fn snapshot(pkg: &MemoryPackage) -> Snapshot {
    Snapshot {
        parts: pkg.part_uris(),
        root_rels: pkg.relationships(&RelationshipSource::Package).unwrap().len(),
    }
}

fn assert_unchanged(pkg: &MemoryPackage, before: &Snapshot) {
    assert_eq!(pkg.part_uris(), before.parts);
    assert_eq!(
        pkg.relationships(&RelationshipSource::Package).unwrap().len(),
        before.root_rels
    );
}

#[test]
fn test_engine_failure_on_first_signature_removes_origin() {
    let pkg = shared(sample_package());
    let before = snapshot(&pkg.borrow());

    let mut manager = PackageDigitalSignatureManager::with_engine(
        pkg.clone(),
        Rc::new(FailingEngine),
        SignatureManagerOptions::default(),
    )
    .unwrap();
    let err = manager.sign(&[uri(DOC_A)], &certificate(1, "01")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_unchanged(&pkg.borrow(), &before);
    assert!(!origin_exists(&*pkg.borrow()));
    assert!(!manager.is_signed().unwrap());
}

#[test]
fn test_unsupported_hash_algorithm_rolls_back() {
    let pkg = shared(sample_package());
    let before = snapshot(&pkg.borrow());
    let options = SignatureManagerOptions::default().with_hash_algorithm("urn:example:md5");
    let mut manager = PackageDigitalSignatureManager::with_options(pkg.clone(), options).unwrap();

    let err = manager.sign(&[uri(DOC_A)], &certificate(1, "01")).unwrap_err();
    assert!(err.is_crypto());
    assert_unchanged(&pkg.borrow(), &before);
}

#[test]
fn test_failure_on_later_signature_keeps_existing_ones() {
    let pkg = shared(sample_package());
    let cert = certificate(1, "01");
    let mut manager = PackageDigitalSignatureManager::new(pkg.clone());
    let first = manager.sign(&[uri(DOC_A)], &cert).unwrap();
    let before = snapshot(&pkg.borrow());

    manager.set_hash_algorithm("urn:example:md5").unwrap();
    let other = certificate(2, "02");
    assert!(manager.sign(&[uri(DOC_B)], &other).unwrap_err().is_crypto());

    assert_unchanged(&pkg.borrow(), &before);
    assert!(origin_exists(&*pkg.borrow()));
    assert_eq!(certificate_part_count(&*pkg.borrow()), 1);
    assert_eq!(manager.signatures().unwrap(), vec![first.clone()]);
    assert_eq!(first.verify().unwrap(), VerifyResult::Success);
}

#[test]
fn test_shared_certificate_part_survives_failed_sign() {
    let pkg = shared(sample_package());
    let cert = certificate(1, "01");
    let mut manager = PackageDigitalSignatureManager::new(pkg.clone());
    let first = manager.sign(&[uri(DOC_A)], &cert).unwrap();

    // A failed sign with the same certificate must not touch its part.
    let mut failing = PackageDigitalSignatureManager::with_engine(
        pkg.clone(),
        Rc::new(FailingEngine),
        SignatureManagerOptions::default(),
    )
    .unwrap();
    assert!(failing.sign(&[uri(DOC_B)], &cert).is_err());

    assert_eq!(certificate_part_count(&*pkg.borrow()), 1);
    assert_eq!(first.verify().unwrap(), VerifyResult::Success);
}

#[test]
fn test_missing_target_part_is_not_found() {
    let pkg = shared(sample_package());
    let before = snapshot(&pkg.borrow());
    let mut manager = PackageDigitalSignatureManager::new(pkg.clone());

    let err = manager
        .sign(&[uri(DOC_A), uri("/docs/missing.xml")], &certificate(1, "01"))
        .unwrap_err();
    assert!(err.is_not_found());
    assert_unchanged(&pkg.borrow(), &before);
}

#[test]
fn test_input_validation_precedes_mutation() {
    let pkg = shared(sample_package());
    let before = snapshot(&pkg.borrow());
    let mut manager = PackageDigitalSignatureManager::new(pkg.clone());
    let cert = certificate(1, "01");

    assert!(manager.sign(&[], &cert).unwrap_err().is_validation());
    assert!(manager
        .sign_definition(
            &SignatureDefinition::new()
                .with_parts([uri(DOC_A)])
                .with_signature_id("1bad id"),
            &cert,
        )
        .unwrap_err()
        .is_format());
    assert!(manager
        .sign_definition(
            &SignatureDefinition::new().with_object(DataObject::new(PACKAGE_OBJECT_ID, b"x".to_vec())),
            &cert,
        )
        .unwrap_err()
        .is_validation());

    let public = cert.public_only();
    assert!(manager.sign(&[uri(DOC_A)], &public).unwrap_err().is_crypto());

    assert_unchanged(&pkg.borrow(), &before);
}

#[test]
fn test_read_only_package_is_state_error() {
    let mut pkg = sample_package();
    pkg.set_read_only(true);
    let pkg = shared(pkg);
    let mut manager = PackageDigitalSignatureManager::new(pkg);

    let err = manager.sign(&[uri(DOC_A)], &certificate(1, "01")).unwrap_err();
    assert!(err.is_state());
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_corrupt_structure_is_format_error() {
    // Two origin relationships from the package root.
    let mut pkg = sample_package();
    let origin = uri(packseal::signing::ORIGIN_PART_NAME);
    pkg.add_part(&origin, packseal::signing::ORIGIN_CONTENT_TYPE, b"")
        .unwrap();
    for _ in 0..2 {
        pkg.create_relationship(
            &RelationshipSource::Package,
            origin.as_str(),
            packseal::TargetMode::Internal,
            packseal::signing::ORIGIN_RELATIONSHIP_TYPE,
            None,
        )
        .unwrap();
    }
    let mut manager = PackageDigitalSignatureManager::new(shared(pkg));
    assert!(manager.signatures().unwrap_err().is_format());
}
