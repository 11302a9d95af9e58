//! Package digital signatures and rights-managed encrypted envelopes.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use chrono::{Duration, Utc};
//! use packseal::{Certificate, MemoryPackage, PackageDigitalSignatureManager, PartUri, VerifyResult};
//!
//! let part = PartUri::new("/docs/report.json").unwrap();
//! let mut package = MemoryPackage::new();
//! package.add_part(&part, "application/json", br#"{"total":42}"#).unwrap();
//! let package = Rc::new(RefCell::new(package));
//!
//! let now = Utc::now();
//! let signer = Certificate::generate("CN=Reviewer", now, now + Duration::days(30)).unwrap();
//!
//! let mut manager = PackageDigitalSignatureManager::new(package);
//! let signature = manager.sign(&[part.clone()], &signer).unwrap();
//! assert_eq!(signature.signed_parts().unwrap(), vec![part]);
//! assert_eq!(manager.verify_signatures(false).unwrap(), VerifyResult::Success);
//! ```

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod package;
pub mod signing;

// Convenience re-exports
pub use config::SignatureManagerOptions;
pub use envelope::{
    ContentUser, CryptoProvider, EncryptedPackageEnvelope, FileAccess, FileMode, FileShare,
    PackageProperties, PackageStream, PublishLicense, RightsManagementInformation, UseLicense,
};
pub use error::{ErrorKind, PackResult, PackageError};
pub use package::{MemoryPackage, Package, PackageRelationship, PartUri, RelationshipSource, TargetMode};
pub use signing::{
    Certificate, CertificateEmbeddingOption, CertificateStatus, DigestSignatureEngine,
    PackageDigitalSignature, PackageDigitalSignatureManager, PackageRelationshipSelector,
    RelationshipSelectorType, SignatureDefinition, SignatureEngine, VerifyResult,
};
