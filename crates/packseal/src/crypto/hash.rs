//! Digest algorithms addressable by their XML-DSig identifiers.

use crate::error::{PackResult, PackageError};

/// SHA-256, the default digest method.
pub const SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// SHA-1, selected only by the legacy compatibility switch.
pub const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// SHA-512.
pub const SHA512_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

/// Supported digest methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Resolve a digest-method URI.
    pub fn from_uri(uri: &str) -> PackResult<Self> {
        match uri {
            SHA256_URI => Ok(Self::Sha256),
            SHA1_URI => Ok(Self::Sha1),
            SHA512_URI => Ok(Self::Sha512),
            other => Err(PackageError::crypto(format!(
                "unsupported hash algorithm: {other}"
            ))),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => SHA1_URI,
            Self::Sha256 => SHA256_URI,
            Self::Sha512 => SHA512_URI,
        }
    }

    /// Digest `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => <sha1::Sha1 as sha1::Digest>::digest(data).to_vec(),
            Self::Sha256 => <sha2::Sha256 as sha2::Digest>::digest(data).to_vec(),
            Self::Sha512 => <sha2::Sha512 as sha2::Digest>::digest(data).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_roundtrip_and_lengths() {
        for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            assert_eq!(HashAlgorithm::from_uri(alg.uri()).unwrap(), alg);
        }
        assert_eq!(HashAlgorithm::Sha1.digest(b"abc").len(), 20);
        assert_eq!(HashAlgorithm::Sha256.digest(b"abc").len(), 32);
        assert_eq!(HashAlgorithm::Sha512.digest(b"abc").len(), 64);
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unknown_uri_is_crypto_error() {
        let err = HashAlgorithm::from_uri("urn:md5").unwrap_err();
        assert!(err.is_crypto());
    }
}
