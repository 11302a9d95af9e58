//! Signing engine seam.
//!
//! The manager owns structural bookkeeping; everything cryptographic
//! (digesting, canonicalization, producing and checking signature values) is
//! delegated to a [`SignatureEngine`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PackResult;
use crate::package::{Package, PartUri};
use crate::signing::certificate::Certificate;
use crate::signing::selector::PackageRelationshipSelector;

/// Caller-supplied object embedded in and covered by a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl DataObject {
    pub fn new(id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// Algorithm identifiers a signature was produced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureFormat {
    pub canonicalization_method: String,
    pub signature_method: String,
    pub digest_method: String,
}

/// Digest of one signed part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartReference {
    pub uri: PartUri,
    pub content_type: String,
    pub transforms: Vec<String>,
    pub digest: String,
}

/// Digest of the relationships one selector matched at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipReference {
    pub selector: PackageRelationshipSelector,
    pub digest: String,
}

/// Digest of an embedded data object named by an object reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub id: String,
    pub digest: String,
}

/// The signed portion of a signature document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInfo {
    pub signature_id: String,
    pub format: SignatureFormat,
    pub part_references: Vec<PartReference>,
    pub relationship_references: Vec<RelationshipReference>,
    pub object_references: Vec<ObjectReference>,
    pub signing_time: String,
    pub time_format: String,
    pub key_id: String,
}

/// Everything stored in a signature part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureContent {
    pub signed_info: SignedInfo,
    #[serde(with = "base64_bytes")]
    pub signature_value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    #[serde(default)]
    pub objects: Vec<DataObject>,
}

/// Inputs to [`SignatureEngine::sign`].
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    /// Already-created, empty signature part the engine writes into.
    pub signature_part: &'a PartUri,
    pub parts: &'a [PartUri],
    pub relationship_selectors: &'a [PackageRelationshipSelector],
    pub certificate: &'a Certificate,
    pub signature_id: &'a str,
    pub embed_certificate: bool,
    pub signature_objects: &'a [DataObject],
    /// Ids of `signature_objects` to cover; unreferenced objects are
    /// embedded but not signed.
    pub object_references: &'a [String],
    pub hash_algorithm: &'a str,
    pub time_format: &'a str,
    pub transform_mapping: &'a BTreeMap<String, String>,
}

/// External signing/verification engine.
pub trait SignatureEngine {
    /// Produce a signature and write it into `request.signature_part`.
    fn sign(&self, package: &mut dyn Package, request: &SignRequest<'_>)
        -> PackResult<SignatureContent>;

    /// Parse the signature stored in `signature_part`.
    fn load(&self, package: &dyn Package, signature_part: &PartUri) -> PackResult<SignatureContent>;

    /// Cryptographically compare `content` against the current package state.
    ///
    /// An error means `certificate` itself is unusable.
    fn verify(
        &self,
        package: &dyn Package,
        content: &SignatureContent,
        certificate: &Certificate,
    ) -> PackResult<bool>;
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
