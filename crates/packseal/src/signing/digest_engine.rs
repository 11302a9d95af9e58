//! Reference signing engine: digest manifest plus Ed25519 over a DSSE PAE.
//!
//! # Signing Process
//!
//! ```text
//! 1. Digest every signed part (raw bytes) with the configured algorithm
//! 2. Digest JCS(relationships matched by each selector)
//! 3. Digest every referenced data object
//! 4. Build signed_info {references, signing time, key_id, format}
//! 5. PAE = DSSEv1_PAE(payload_type, JCS(signed_info))
//! 6. signature_value = ed25519_sign(private_key, PAE)
//! 7. Write {signed_info, signature_value, certificate?, objects} as JSON
//! ```

use chrono::Utc;
use ed25519_dalek::{Signature, Signer, Verifier};

use crate::crypto::{jcs, HashAlgorithm};
use crate::error::{PackResult, PackageError};
use crate::package::{Package, PartUri};
use crate::signing::certificate::Certificate;
use crate::signing::engine::{
    ObjectReference, PartReference, RelationshipReference, SignRequest, SignatureContent,
    SignatureEngine, SignatureFormat, SignedInfo,
};
use crate::signing::selector::PackageRelationshipSelector;
use crate::signing::time_format;

/// DSSE payload type of the signed info.
pub const SIGNED_INFO_PAYLOAD_TYPE: &str = "application/vnd.packseal.signed-info+json;v=1";
/// Canonicalization applied to the signed info.
pub const CANONICALIZATION_METHOD: &str = "urn:ietf:rfc:8785";
/// Signature method identifier.
pub const SIGNATURE_METHOD: &str = "urn:packseal:ed25519-dsse-pae";

/// Engine used by default by the signature manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSignatureEngine;

impl DigestSignatureEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureEngine for DigestSignatureEngine {
    fn sign(
        &self,
        package: &mut dyn Package,
        request: &SignRequest<'_>,
    ) -> PackResult<SignatureContent> {
        let algorithm = HashAlgorithm::from_uri(request.hash_algorithm)?;
        let signing_key = request.certificate.signing_key().ok_or_else(|| {
            PackageError::crypto(format!(
                "certificate {} has no private key",
                request.certificate.serial_number()
            ))
        })?;
        let key_id = request.certificate.key_id()?;

        let mut part_references: Vec<PartReference> = Vec::with_capacity(request.parts.len());
        for uri in request.parts {
            if part_references.iter().any(|r| &r.uri == uri) {
                continue;
            }
            let content_type = package.content_type(uri)?;
            let transforms = request
                .transform_mapping
                .get(&content_type)
                .cloned()
                .into_iter()
                .collect();
            let data = package.read_part(uri)?;
            part_references.push(PartReference {
                uri: uri.clone(),
                content_type,
                transforms,
                digest: hex::encode(algorithm.digest(&data)),
            });
        }

        let mut relationship_references = Vec::with_capacity(request.relationship_selectors.len());
        for selector in request.relationship_selectors {
            relationship_references.push(RelationshipReference {
                selector: selector.clone(),
                digest: relationship_digest(&*package, selector, algorithm)?,
            });
        }

        let mut object_references = Vec::with_capacity(request.object_references.len());
        for id in request.object_references {
            let object = request
                .signature_objects
                .iter()
                .find(|o| &o.id == id)
                .ok_or_else(|| {
                    PackageError::crypto(format!("object reference '{id}' matches no object"))
                })?;
            object_references.push(ObjectReference {
                id: id.clone(),
                digest: hex::encode(algorithm.digest(&object.content)),
            });
        }

        let signed_info = SignedInfo {
            signature_id: request.signature_id.to_string(),
            format: SignatureFormat {
                canonicalization_method: CANONICALIZATION_METHOD.to_string(),
                signature_method: SIGNATURE_METHOD.to_string(),
                digest_method: algorithm.uri().to_string(),
            },
            part_references,
            relationship_references,
            object_references,
            signing_time: time_format::format_time(Utc::now(), request.time_format)?,
            time_format: request.time_format.to_string(),
            key_id,
        };

        let pae = signing_payload(&signed_info)?;
        let signature: Signature = signing_key.sign(&pae);

        let content = SignatureContent {
            signed_info,
            signature_value: signature.to_bytes().to_vec(),
            certificate: request
                .embed_certificate
                .then(|| request.certificate.public_only()),
            objects: request.signature_objects.to_vec(),
        };
        package.write_part(request.signature_part, &serde_json::to_vec_pretty(&content)?)?;

        tracing::debug!(
            part = %request.signature_part,
            parts = content.signed_info.part_references.len(),
            relationships = content.signed_info.relationship_references.len(),
            "signature written"
        );
        Ok(content)
    }

    fn load(&self, package: &dyn Package, signature_part: &PartUri) -> PackResult<SignatureContent> {
        let bytes = package.read_part(signature_part)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PackageError::format(format!("corrupt signature part {signature_part}: {e}"))
        })
    }

    fn verify(
        &self,
        package: &dyn Package,
        content: &SignatureContent,
        certificate: &Certificate,
    ) -> PackResult<bool> {
        let verifying_key = certificate.verifying_key()?;
        let info = &content.signed_info;

        if certificate.key_id()? != info.key_id {
            return Ok(false);
        }
        let Ok(algorithm) = HashAlgorithm::from_uri(&info.format.digest_method) else {
            return Ok(false);
        };

        for reference in &info.part_references {
            if !package.part_exists(&reference.uri)
                || package.content_type(&reference.uri)? != reference.content_type
            {
                return Ok(false);
            }
            let data = package.read_part(&reference.uri)?;
            if hex::encode(algorithm.digest(&data)) != reference.digest {
                return Ok(false);
            }
        }

        for reference in &info.relationship_references {
            match relationship_digest(package, &reference.selector, algorithm) {
                Ok(digest) if digest == reference.digest => {}
                _ => return Ok(false),
            }
        }

        for reference in &info.object_references {
            let matches = content
                .objects
                .iter()
                .find(|o| o.id == reference.id)
                .is_some_and(|o| hex::encode(algorithm.digest(&o.content)) == reference.digest);
            if !matches {
                return Ok(false);
            }
        }

        let Ok(signature) = Signature::from_slice(&content.signature_value) else {
            return Ok(false);
        };
        let pae = signing_payload(info)?;
        Ok(verifying_key.verify(&pae, &signature).is_ok())
    }
}

fn relationship_digest(
    package: &dyn Package,
    selector: &PackageRelationshipSelector,
    algorithm: HashAlgorithm,
) -> PackResult<String> {
    let selected = selector.select(package)?;
    let canonical = jcs::to_vec(&selected).map_err(|e| PackageError::format(format!("{e:#}")))?;
    Ok(hex::encode(algorithm.digest(&canonical)))
}

fn signing_payload(signed_info: &SignedInfo) -> PackResult<Vec<u8>> {
    let canonical = jcs::to_vec(signed_info)
        .map_err(|e| PackageError::format(format!("failed to canonicalize signed info: {e:#}")))?;
    Ok(build_pae(SIGNED_INFO_PAYLOAD_TYPE, &canonical))
}

/// Build DSSE Pre-Authentication Encoding (PAE).
///
/// ```text
/// PAE(type, payload) = "DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload
/// ```
fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut pae = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(payload_type.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}
