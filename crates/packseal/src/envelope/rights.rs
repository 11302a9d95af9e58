//! Rights-management facade over an envelope's encryption transform.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::transform::{CryptoProvider, RightsManagementEncryptionTransform};
use crate::error::{PackResult, PackageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationType {
    Windows,
    Passport,
    WindowsPassport,
    Internal,
}

impl fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Windows => "windows",
            Self::Passport => "passport",
            Self::WindowsPassport => "windows-passport",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A user a use license is issued to. Names compare case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentUser {
    pub name: String,
    pub authentication_type: AuthenticationType,
}

impl ContentUser {
    pub fn new(name: impl Into<String>, authentication_type: AuthenticationType) -> PackResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PackageError::validation("content user name must not be empty"));
        }
        Ok(Self {
            name,
            authentication_type,
        })
    }

    pub(crate) fn key(&self) -> String {
        format!("{}:{}", self.authentication_type, self.name.to_lowercase())
    }
}

impl PartialEq for ContentUser {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ContentUser {}

/// Document-level grant, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishLicense(String);

impl PublishLicense {
    pub fn new(license: impl Into<String>) -> PackResult<Self> {
        let license = license.into();
        if license.is_empty() {
            return Err(PackageError::validation("publish license must not be empty"));
        }
        Ok(Self(license))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-user grant, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseLicense(String);

impl UseLicense {
    pub fn new(license: impl Into<String>) -> PackResult<Self> {
        let license = license.into();
        if license.is_empty() {
            return Err(PackageError::validation("use license must not be empty"));
        }
        Ok(Self(license))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// License storage and content key of an open envelope.
#[derive(Debug)]
pub struct RightsManagementInformation {
    transform: RightsManagementEncryptionTransform,
    crypto_provider: Option<CryptoProvider>,
}

impl RightsManagementInformation {
    pub(crate) fn new(
        transform: RightsManagementEncryptionTransform,
        crypto_provider: Option<CryptoProvider>,
    ) -> Self {
        Self {
            transform,
            crypto_provider,
        }
    }

    pub fn crypto_provider(&self) -> Option<&CryptoProvider> {
        self.crypto_provider.as_ref()
    }

    /// Install the content key used to read and write the package.
    pub fn set_crypto_provider(&mut self, provider: CryptoProvider) {
        self.crypto_provider = Some(provider);
    }

    pub fn load_publish_license(&self) -> PackResult<Option<PublishLicense>> {
        self.transform.load_publish_license()
    }

    pub fn save_publish_license(&self, license: &PublishLicense) -> PackResult<()> {
        self.transform.save_publish_license(license)
    }

    pub fn load_use_license(&self, user: &ContentUser) -> PackResult<Option<UseLicense>> {
        self.transform.load_use_license(user)
    }

    pub fn save_use_license(&self, user: &ContentUser, license: &UseLicense) -> PackResult<()> {
        self.transform.save_use_license(user, license)
    }

    pub fn delete_use_license(&self, user: &ContentUser) -> PackResult<()> {
        self.transform.delete_use_license(user)
    }

    pub fn embedded_use_licenses(&self) -> PackResult<Vec<(ContentUser, UseLicense)>> {
        self.transform.embedded_use_licenses()
    }
}
