//! Signature manager configuration.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PACKSEAL_HASH_ALGORITHM` | Digest method URI (default: SHA-256) |
//! | `PACKSEAL_LEGACY_SHA1` | `1`/`true` selects SHA-1 for compatibility with old consumers |
//! | `PACKSEAL_CERTIFICATE_OPTION` | `in-certificate-part` (default), `in-signature-part`, `not-embedded` |
//! | `PACKSEAL_TIME_FORMAT` | Signing-time format (default: `YYYY-MM-DDThh:mm:ss.sTZD`) |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{SHA1_URI, SHA256_URI};
use crate::error::{PackResult, PackageError};
use crate::signing::time_format::{self, DEFAULT_TIME_FORMAT};
use crate::signing::CertificateEmbeddingOption;

/// Options for a [`PackageDigitalSignatureManager`](crate::PackageDigitalSignatureManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureManagerOptions {
    /// Digest method URI used for new signatures.
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Where new signatures store the signer certificate.
    #[serde(default)]
    pub certificate_option: CertificateEmbeddingOption,

    /// Format of the recorded signing time.
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Content type → transform applied before digesting parts of that type.
    #[serde(default)]
    pub transform_mapping: BTreeMap<String, String>,
}

fn default_hash_algorithm() -> String {
    SHA256_URI.to_string()
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

impl Default for SignatureManagerOptions {
    fn default() -> Self {
        Self {
            hash_algorithm: default_hash_algorithm(),
            certificate_option: CertificateEmbeddingOption::default(),
            time_format: default_time_format(),
            transform_mapping: BTreeMap::new(),
        }
    }
}

impl SignatureManagerOptions {
    /// Build options from environment variables, falling back to defaults.
    pub fn from_env() -> PackResult<Self> {
        let legacy_sha1 = std::env::var("PACKSEAL_LEGACY_SHA1")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let hash_algorithm = if legacy_sha1 {
            SHA1_URI.to_string()
        } else {
            std::env::var("PACKSEAL_HASH_ALGORITHM").unwrap_or_else(|_| default_hash_algorithm())
        };
        let certificate_option = match std::env::var("PACKSEAL_CERTIFICATE_OPTION") {
            Ok(v) => v.parse()?,
            Err(_) => CertificateEmbeddingOption::default(),
        };
        let options = Self {
            hash_algorithm,
            certificate_option,
            time_format: std::env::var("PACKSEAL_TIME_FORMAT")
                .unwrap_or_else(|_| default_time_format()),
            transform_mapping: BTreeMap::new(),
        };
        options.validate()?;
        Ok(options)
    }

    /// Set the digest method URI.
    pub fn with_hash_algorithm(mut self, uri: impl Into<String>) -> Self {
        self.hash_algorithm = uri.into();
        self
    }

    /// Select SHA-1 for compatibility with legacy consumers.
    pub fn with_legacy_sha1(self) -> Self {
        self.with_hash_algorithm(SHA1_URI)
    }

    pub fn with_certificate_option(mut self, option: CertificateEmbeddingOption) -> Self {
        self.certificate_option = option;
        self
    }

    pub fn with_time_format(mut self, time_format: impl Into<String>) -> Self {
        self.time_format = time_format.into();
        self
    }

    pub fn with_transform(
        mut self,
        content_type: impl Into<String>,
        transform: impl Into<String>,
    ) -> Self {
        self.transform_mapping
            .insert(content_type.into(), transform.into());
        self
    }

    /// Reject option values that would fail every sign.
    ///
    /// The hash algorithm is not checked here: an unsupported algorithm is
    /// reported by the signing engine.
    pub fn validate(&self) -> PackResult<()> {
        if self.hash_algorithm.trim().is_empty() {
            return Err(PackageError::validation("hash algorithm must not be empty"));
        }
        if !time_format::is_supported(&self.time_format) {
            return Err(PackageError::validation(format!(
                "unsupported signing time format: {}",
                self.time_format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SignatureManagerOptions::default();
        assert_eq!(options.hash_algorithm, SHA256_URI);
        assert_eq!(options.certificate_option, CertificateEmbeddingOption::InCertificatePart);
        assert_eq!(options.time_format, DEFAULT_TIME_FORMAT);
        options.validate().unwrap();
    }

    #[test]
    fn test_builders() {
        let options = SignatureManagerOptions::default()
            .with_legacy_sha1()
            .with_certificate_option(CertificateEmbeddingOption::NotEmbedded)
            .with_transform("application/xml", "c14n");
        assert_eq!(options.hash_algorithm, SHA1_URI);
        assert_eq!(options.transform_mapping["application/xml"], "c14n");
    }

    #[test]
    fn test_deserialize_partial() {
        let options: SignatureManagerOptions =
            serde_json::from_str(r#"{"certificate_option":"in-signature-part"}"#).unwrap();
        assert_eq!(options.certificate_option, CertificateEmbeddingOption::InSignaturePart);
        assert_eq!(options.hash_algorithm, SHA256_URI);
    }

    #[test]
    fn test_rejects_bad_time_format() {
        let options = SignatureManagerOptions::default().with_time_format("dd/mm/yyyy");
        assert!(options.validate().unwrap_err().is_validation());
    }
}
