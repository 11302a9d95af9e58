//! Rights-managed encrypted package envelopes.
//!
//! An envelope is a compound file whose `EncryptedPackage` stream holds a
//! sealed package archive. Licenses live in the confidentiality transform
//! applied to that stream.

mod encrypted;
pub mod properties;
pub mod rights;
pub mod storage;
pub mod transform;

pub use encrypted::{
    EncryptedPackageEnvelope, PackageStream, DATASPACE_LABEL, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_TRANSFORM_NAME,
};
pub use properties::PackageProperties;
pub use rights::{AuthenticationType, ContentUser, PublishLicense, RightsManagementInformation, UseLicense};
pub use storage::{FileAccess, FileMode, FileShare, PropertySet, StorageError, StorageRoot};
pub use transform::{CryptoProvider, RightsManagementEncryptionTransform};
