//! Rights-management confidentiality transform.
//!
//! The transform instance stores the publish license and the embedded use
//! licenses; a [`CryptoProvider`] seals and opens the bytes of the stream
//! the transform is applied to.
//!
//! Sealed layout:
//!
//! ```text
//! [plaintext length: u64 LE][nonce: 12 bytes][ChaCha20-Poly1305 ciphertext + tag]
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};

use crate::envelope::rights::{ContentUser, PublishLicense, UseLicense};
use crate::envelope::storage::StorageRoot;
use crate::error::{PackResult, PackageError};

/// Class id identifying the rights-management encryption transform.
pub const RIGHTS_MANAGEMENT_TRANSFORM_CLASS: &str = "{C73DFACD-061F-43B0-8B64-0C620D2A8B50}";

const LENGTH_SIZE: usize = 8;
const NONCE_SIZE: usize = 12;

/// Content key for sealing an envelope's ciphertext stream.
#[derive(Clone)]
pub struct CryptoProvider {
    key: [u8; 32],
}

impl CryptoProvider {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Provider with a fresh random content key.
    pub fn generate() -> Self {
        let generated = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut key = [0u8; 32];
        key.copy_from_slice(&generated);
        Self { key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Encrypt `plaintext` under a fresh nonce.
    pub fn seal(&self, plaintext: &[u8]) -> PackResult<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|_| PackageError::crypto("encryption failed"))?;

        let mut out = Vec::with_capacity(LENGTH_SIZE + NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed stream. An empty stream opens to empty plaintext.
    pub fn open(&self, sealed: &[u8]) -> PackResult<Vec<u8>> {
        if sealed.is_empty() {
            return Ok(Vec::new());
        }
        if sealed.len() < LENGTH_SIZE + NONCE_SIZE {
            return Err(PackageError::format("ciphertext stream is truncated"));
        }
        let (length, rest) = sealed.split_at(LENGTH_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        let mut length_bytes = [0u8; LENGTH_SIZE];
        length_bytes.copy_from_slice(length);
        let expected = u64::from_le_bytes(length_bytes);

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PackageError::crypto("decryption failed: wrong key or tampered stream"))?;
        if plaintext.len() as u64 != expected {
            return Err(PackageError::format(format!(
                "plaintext length {} does not match recorded length {expected}",
                plaintext.len()
            )));
        }
        Ok(plaintext)
    }
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RightsManagementData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_license: Option<PublishLicense>,
    #[serde(default)]
    use_licenses: BTreeMap<String, UseLicenseRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UseLicenseRecord {
    user: ContentUser,
    license: UseLicense,
}

/// Handle on the transform instance stored in a [`StorageRoot`].
#[derive(Debug, Clone)]
pub struct RightsManagementEncryptionTransform {
    root: Rc<RefCell<StorageRoot>>,
    name: String,
}

impl RightsManagementEncryptionTransform {
    pub(crate) fn new(root: Rc<RefCell<StorageRoot>>, name: impl Into<String>) -> Self {
        Self {
            root,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn data(&self) -> PackResult<RightsManagementData> {
        let root = self.root.borrow();
        let definition = root
            .transform(&self.name)
            .ok_or_else(|| PackageError::format(format!("transform not found: {}", self.name)))?;
        if definition.instance_data.is_null() {
            return Ok(RightsManagementData::default());
        }
        Ok(serde_json::from_value(definition.instance_data.clone())?)
    }

    fn store(&self, data: &RightsManagementData) -> PackResult<()> {
        let value = serde_json::to_value(data)?;
        self.root.borrow_mut().set_transform_data(&self.name, value)
    }

    pub fn load_publish_license(&self) -> PackResult<Option<PublishLicense>> {
        Ok(self.data()?.publish_license)
    }

    pub fn save_publish_license(&self, license: &PublishLicense) -> PackResult<()> {
        let mut data = self.data()?;
        data.publish_license = Some(license.clone());
        self.store(&data)
    }

    pub fn load_use_license(&self, user: &ContentUser) -> PackResult<Option<UseLicense>> {
        Ok(self
            .data()?
            .use_licenses
            .remove(&user.key())
            .map(|record| record.license))
    }

    pub fn save_use_license(&self, user: &ContentUser, license: &UseLicense) -> PackResult<()> {
        let mut data = self.data()?;
        data.use_licenses.insert(
            user.key(),
            UseLicenseRecord {
                user: user.clone(),
                license: license.clone(),
            },
        );
        self.store(&data)
    }

    /// Remove `user`'s use license. Absent licenses are ignored.
    pub fn delete_use_license(&self, user: &ContentUser) -> PackResult<()> {
        let mut data = self.data()?;
        if data.use_licenses.remove(&user.key()).is_some() {
            self.store(&data)?;
        }
        Ok(())
    }

    pub fn embedded_use_licenses(&self) -> PackResult<Vec<(ContentUser, UseLicense)>> {
        Ok(self
            .data()?
            .use_licenses
            .into_values()
            .map(|record| (record.user, record.license))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let provider = CryptoProvider::new([7; 32]);
        let sealed = provider.seal(b"package bytes").unwrap();
        assert_eq!(&sealed[..8], &13u64.to_le_bytes());
        assert_eq!(provider.open(&sealed).unwrap(), b"package bytes");

        // Fresh nonce per seal.
        assert_ne!(sealed, provider.seal(b"package bytes").unwrap());
    }

    #[test]
    fn test_open_rejects_wrong_key_and_tampering() {
        let provider = CryptoProvider::new([7; 32]);
        let mut sealed = provider.seal(b"secret").unwrap();

        let err = CryptoProvider::new([8; 32]).open(&sealed).unwrap_err();
        assert!(err.is_crypto());

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(provider.open(&sealed).unwrap_err().is_crypto());

        assert!(provider.open(&[1, 2, 3]).unwrap_err().is_format());
        assert!(provider.open(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_debug_hides_key() {
        let provider = CryptoProvider::new([0xAB; 32]);
        assert!(!format!("{provider:?}").contains("171"));
    }
}
