//! Package digital signatures.
//!
//! Every signature lives in its own signature part, linked from a single
//! origin part. Signer certificates are either embedded in the signature
//! part or stored once per serial number in a shared certificate part.
//!
//! ```text
//! / ──origin──▶ origin.psdsor ──signature──▶ xml-signature/<id>.psdsxs ──certificate──▶ certificate/<serial>.cer
//! ```

pub mod certificate;
pub mod digest_engine;
pub mod engine;
pub mod manager;
pub(crate) mod origin;
pub(crate) mod registry;
pub(crate) mod rollback;
pub mod selector;
pub mod signature;
pub mod time_format;

use serde::{Deserialize, Serialize};

pub use certificate::{Certificate, CertificateStatus};
pub use digest_engine::DigestSignatureEngine;
pub use engine::{DataObject, SignRequest, SignatureContent, SignatureEngine, SignatureFormat};
pub use manager::{PackageDigitalSignatureManager, SignatureDefinition};
pub use selector::{PackageRelationshipSelector, RelationshipSelectorType};
pub use signature::PackageDigitalSignature;

/// Default location of the origin part.
pub const ORIGIN_PART_NAME: &str = "/package/services/digital-signature/origin.psdsor";
/// Package root → origin.
pub const ORIGIN_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/origin";
/// Origin → signature part.
pub const SIGNATURE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/signature";
/// Signature part → certificate part.
pub const CERTIFICATE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/certificate";

pub const ORIGIN_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-origin";
pub const SIGNATURE_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-xmlsignature+xml";
pub const CERTIFICATE_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-certificate";

pub const SIGNATURE_PART_PREFIX: &str = "/package/services/digital-signature/xml-signature/";
pub const SIGNATURE_PART_EXTENSION: &str = ".psdsxs";
pub const CERTIFICATE_PART_PREFIX: &str = "/package/services/digital-signature/certificate/";
pub const CERTIFICATE_PART_EXTENSION: &str = ".cer";

/// Signature id used when the caller supplies none.
pub const DEFAULT_SIGNATURE_ID: &str = "packageSignature";
/// Object id reserved for the package manifest object.
pub const PACKAGE_OBJECT_ID: &str = "idPackageObject";

/// Outcome of verifying a signature. Not an error: every variant is a
/// legitimate answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyResult {
    Success,
    InvalidSignature,
    CertificateRequired,
    InvalidCertificate,
    ReferenceNotFound,
    NotSigned,
}

impl VerifyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Where the signer certificate is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateEmbeddingOption {
    /// Shared certificate part, keyed by serial number.
    #[default]
    InCertificatePart,
    /// Inside the signature part.
    InSignaturePart,
    /// Not stored; verifiers must supply the certificate.
    NotEmbedded,
}

impl std::str::FromStr for CertificateEmbeddingOption {
    type Err = crate::error::PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-certificate-part" => Ok(Self::InCertificatePart),
            "in-signature-part" => Ok(Self::InSignaturePart),
            "not-embedded" => Ok(Self::NotEmbedded),
            other => Err(crate::error::PackageError::validation(format!(
                "unknown certificate embedding option: {other}"
            ))),
        }
    }
}

/// XML NCName check used for signature and relationship ids.
pub(crate) fn is_ncname(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ncname() {
        for ok in ["packageSignature", "_a", "sig-1.2", "idÄ"] {
            assert!(is_ncname(ok), "{ok}");
        }
        for bad in ["", "1sig", "-a", "a b", "a:b", "a/b"] {
            assert!(!is_ncname(bad), "{bad}");
        }
    }

    #[test]
    fn test_embedding_option_parse() {
        assert_eq!(
            "in-signature-part".parse::<CertificateEmbeddingOption>().unwrap(),
            CertificateEmbeddingOption::InSignaturePart
        );
        assert!("elsewhere".parse::<CertificateEmbeddingOption>().is_err());
    }
}
