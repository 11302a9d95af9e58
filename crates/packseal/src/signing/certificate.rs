//! Signer certificates.
//!
//! A certificate binds a serial number and subject to an Ed25519 public key
//! for a validity window. The private key travels with the certificate only
//! on the signing side and is never part of the encoded form.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::jcs;
use crate::error::{PackResult, PackageError};

/// Outcome of [`Certificate::status_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    Valid,
    NotYetValid,
    Expired,
    InvalidKey,
}

/// Encoded certificate fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CertificateData {
    serial_number: String,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: String,
}

#[derive(Clone)]
pub struct Certificate {
    data: CertificateData,
    signing_key: Option<SigningKey>,
}

impl Certificate {
    /// Issue a certificate for `signing_key`.
    ///
    /// The serial number must be non-empty hexadecimal; it is normalized to
    /// upper case because certificate part names are derived from it.
    pub fn new(
        serial_number: &str,
        subject: impl Into<String>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        signing_key: SigningKey,
    ) -> PackResult<Self> {
        let data = CertificateData {
            serial_number: normalize_serial(serial_number)?,
            subject: subject.into(),
            not_before,
            not_after,
            public_key: BASE64.encode(signing_key.verifying_key().as_bytes()),
        };
        Ok(Self {
            data,
            signing_key: Some(signing_key),
        })
    }

    /// Self-issued certificate with a fresh Ed25519 key and a random serial.
    pub fn generate(
        subject: impl Into<String>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> PackResult<Self> {
        let mut rng = rand::thread_rng();
        let serial: [u8; 16] = rand::Rng::gen(&mut rng);
        let signing_key = SigningKey::generate(&mut rng);
        Self::new(&hex::encode(serial), subject, not_before, not_after, signing_key)
    }

    /// Decode a certificate previously produced by [`Certificate::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> PackResult<Self> {
        let mut data: CertificateData = serde_json::from_slice(bytes)?;
        data.serial_number = normalize_serial(&data.serial_number)?;
        Ok(Self {
            data,
            signing_key: None,
        })
    }

    /// Canonical encoding without the private key.
    pub fn to_bytes(&self) -> PackResult<Vec<u8>> {
        jcs::to_vec(&self.data).map_err(|e| PackageError::format(format!("{e:#}")))
    }

    pub fn serial_number(&self) -> &str {
        &self.data.serial_number
    }

    pub fn subject(&self) -> &str {
        &self.data.subject
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.data.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.data.not_after
    }

    pub fn has_private_key(&self) -> bool {
        self.signing_key.is_some()
    }

    pub(crate) fn signing_key(&self) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }

    /// Copy of this certificate without the private key.
    pub fn public_only(&self) -> Self {
        Self {
            data: self.data.clone(),
            signing_key: None,
        }
    }

    /// Decode the Ed25519 public key.
    pub fn verifying_key(&self) -> PackResult<VerifyingKey> {
        let bytes = BASE64
            .decode(&self.data.public_key)
            .map_err(|e| PackageError::crypto(format!("invalid public key encoding: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PackageError::crypto("public key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| PackageError::crypto(format!("invalid public key: {e}")))
    }

    /// `sha256:<hex>` of the public key bytes.
    pub fn key_id(&self) -> PackResult<String> {
        let key = self.verifying_key()?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(key.as_bytes()))))
    }

    /// Validity of the certificate at `at`.
    pub fn status_at(&self, at: DateTime<Utc>) -> CertificateStatus {
        if self.verifying_key().is_err() {
            CertificateStatus::InvalidKey
        } else if at < self.data.not_before {
            CertificateStatus::NotYetValid
        } else if at > self.data.not_after {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Valid
        }
    }
}

fn normalize_serial(serial: &str) -> PackResult<String> {
    if serial.is_empty() || !serial.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PackageError::validation(format!(
            "certificate serial number must be hexadecimal: '{serial}'"
        )));
    }
    Ok(serial.to_ascii_uppercase())
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("serial_number", &self.data.serial_number)
            .field("subject", &self.data.subject)
            .field("not_before", &self.data.not_before)
            .field("not_after", &self.data.not_after)
            .field("has_private_key", &self.signing_key.is_some())
            .finish()
    }
}

impl Serialize for Certificate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Certificate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut data = CertificateData::deserialize(deserializer)?;
        data.serial_number =
            normalize_serial(&data.serial_number).map_err(serde::de::Error::custom)?;
        Ok(Self {
            data,
            signing_key: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cert() -> Certificate {
        Certificate::new(
            "0a1b",
            "CN=Test Signer",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap(),
            SigningKey::from_bytes(&[7u8; 32]),
        )
        .unwrap()
    }

    #[test]
    fn test_serial_normalized() {
        assert_eq!(cert().serial_number(), "0A1B");
        let bad = Certificate::new(
            "xyz",
            "CN=x",
            Utc::now(),
            Utc::now(),
            SigningKey::from_bytes(&[1u8; 32]),
        );
        assert!(bad.unwrap_err().is_validation());
    }

    #[test]
    fn test_encoding_drops_private_key() {
        let cert = cert();
        let decoded = Certificate::from_bytes(&cert.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, cert);
        assert!(cert.has_private_key());
        assert!(!decoded.has_private_key());
        assert_eq!(decoded.key_id().unwrap(), cert.key_id().unwrap());
        assert!(!format!("{cert:?}").contains("signing_key:"));
    }

    #[test]
    fn test_status_window() {
        let cert = cert();
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let during = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2028, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(cert.status_at(before), CertificateStatus::NotYetValid);
        assert_eq!(cert.status_at(during), CertificateStatus::Valid);
        assert_eq!(cert.status_at(after), CertificateStatus::Expired);
    }

    #[test]
    fn test_generate() {
        let now = Utc::now();
        let a = Certificate::generate("CN=A", now, now + chrono::Duration::days(1)).unwrap();
        let b = Certificate::generate("CN=B", now, now + chrono::Duration::days(1)).unwrap();
        assert_eq!(a.serial_number().len(), 32);
        assert_ne!(a.serial_number(), b.serial_number());
        assert!(a.has_private_key());
    }

    #[test]
    fn test_corrupt_key_is_invalid() {
        let json = br#"{"serial_number":"01","subject":"CN=x","not_before":"2025-01-01T00:00:00Z","not_after":"2027-01-01T00:00:00Z","public_key":"AAAA"}"#;
        let cert = Certificate::from_bytes(json).unwrap();
        assert!(cert.verifying_key().unwrap_err().is_crypto());
        assert_eq!(cert.status_at(Utc::now()), CertificateStatus::InvalidKey);
    }
}
