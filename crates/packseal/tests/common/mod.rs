#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use packseal::signing::{CERTIFICATE_PART_PREFIX, ORIGIN_PART_NAME, SIGNATURE_PART_PREFIX};
use packseal::{Certificate, MemoryPackage, Package, PartUri, RelationshipSource, TargetMode};

pub const DOC_A: &str = "/docs/a.xml";
pub const DOC_B: &str = "/docs/b.json";

pub fn uri(s: &str) -> PartUri {
    PartUri::new(s).unwrap()
}

/// Certificate with a deterministic key, valid 2020..2100.
pub fn certificate(seed: u8, serial: &str) -> Certificate {
    Certificate::new(
        serial,
        format!("CN=Signer {seed}"),
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
        SigningKey::from_bytes(&[seed; 32]),
    )
    .unwrap()
}

/// Two content parts and one package-level relationship.
pub fn sample_package() -> MemoryPackage {
    let mut pkg = MemoryPackage::new();
    pkg.add_part(&uri(DOC_A), "application/xml", b"<doc>alpha</doc>")
        .unwrap();
    pkg.add_part(&uri(DOC_B), "application/json", br#"{"beta":true}"#)
        .unwrap();
    pkg.create_relationship(
        &RelationshipSource::Package,
        DOC_A,
        TargetMode::Internal,
        "http://example.com/relationships/main",
        Some("rMain"),
    )
    .unwrap();
    pkg
}

pub fn shared(pkg: MemoryPackage) -> Rc<RefCell<MemoryPackage>> {
    Rc::new(RefCell::new(pkg))
}

fn count_with_prefix(pkg: &dyn Package, prefix: &str) -> usize {
    pkg.part_uris()
        .iter()
        .filter(|u| u.as_str().starts_with(prefix))
        .count()
}

pub fn signature_part_count(pkg: &dyn Package) -> usize {
    count_with_prefix(pkg, SIGNATURE_PART_PREFIX)
}

pub fn certificate_part_count(pkg: &dyn Package) -> usize {
    count_with_prefix(pkg, CERTIFICATE_PART_PREFIX)
}

pub fn origin_exists(pkg: &dyn Package) -> bool {
    pkg.part_exists(&uri(ORIGIN_PART_NAME))
}
