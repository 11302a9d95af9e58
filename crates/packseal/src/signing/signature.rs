//! Read view over one signature part.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::error::{PackResult, PackageError};
use crate::package::{Package, PartUri};
use crate::signing::certificate::Certificate;
use crate::signing::engine::{SignatureContent, SignatureEngine, SignatureFormat};
use crate::signing::registry::certificate_targets;
use crate::signing::selector::PackageRelationshipSelector;
use crate::signing::{time_format, CertificateEmbeddingOption, VerifyResult};

/// Package handle shared by the manager and its signature views.
pub type SharedPackage = Rc<RefCell<dyn Package>>;

/// A signature in a package.
///
/// Contents are parsed lazily on first access. Once the signature is removed
/// through its manager the view is invalidated and every accessor returns a
/// state error. Clones share the same state.
#[derive(Clone)]
pub struct PackageDigitalSignature {
    inner: Rc<Inner>,
}

struct Inner {
    part: PartUri,
    package: SharedPackage,
    engine: Rc<dyn SignatureEngine>,
    content: OnceCell<SignatureContent>,
    invalidated: Cell<bool>,
}

impl PackageDigitalSignature {
    pub(crate) fn new(part: PartUri, package: SharedPackage, engine: Rc<dyn SignatureEngine>) -> Self {
        Self {
            inner: Rc::new(Inner {
                part,
                package,
                engine,
                content: OnceCell::new(),
                invalidated: Cell::new(false),
            }),
        }
    }

    pub(crate) fn with_content(
        part: PartUri,
        package: SharedPackage,
        engine: Rc<dyn SignatureEngine>,
        content: SignatureContent,
    ) -> Self {
        let signature = Self::new(part, package, engine);
        let _ = signature.inner.content.set(content);
        signature
    }

    /// Backing part name, without the invalidation check.
    pub(crate) fn part_uri(&self) -> &PartUri {
        &self.inner.part
    }

    pub(crate) fn invalidate(&self) {
        self.inner.invalidated.set(true);
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.get()
    }

    fn guard(&self) -> PackResult<()> {
        if self.is_invalidated() {
            return Err(PackageError::state(format!(
                "signature {} has been removed",
                self.inner.part
            )));
        }
        Ok(())
    }

    fn content(&self) -> PackResult<&SignatureContent> {
        self.guard()?;
        if self.inner.content.get().is_none() {
            let loaded = {
                let package = self.inner.package.borrow();
                self.inner.engine.load(&*package, &self.inner.part)?
            };
            tracing::debug!(part = %self.inner.part, "signature loaded");
            let _ = self.inner.content.set(loaded);
        }
        self.inner
            .content
            .get()
            .ok_or_else(|| PackageError::state("signature content unavailable"))
    }

    /// The signature part.
    pub fn signature_part(&self) -> PackResult<PartUri> {
        self.guard()?;
        Ok(self.inner.part.clone())
    }

    pub fn signature_id(&self) -> PackResult<String> {
        Ok(self.content()?.signed_info.signature_id.clone())
    }

    /// Parts covered by this signature.
    pub fn signed_parts(&self) -> PackResult<Vec<PartUri>> {
        Ok(self
            .content()?
            .signed_info
            .part_references
            .iter()
            .map(|r| r.uri.clone())
            .collect())
    }

    pub fn signed_relationship_selectors(&self) -> PackResult<Vec<PackageRelationshipSelector>> {
        Ok(self
            .content()?
            .signed_info
            .relationship_references
            .iter()
            .map(|r| r.selector.clone())
            .collect())
    }

    /// Transforms applied to `part` before digesting.
    pub fn transforms_for_part(&self, part: &PartUri) -> PackResult<Vec<String>> {
        self.content()?
            .signed_info
            .part_references
            .iter()
            .find(|r| &r.uri == part)
            .map(|r| r.transforms.clone())
            .ok_or_else(|| {
                PackageError::validation(format!("{part} is not covered by this signature"))
            })
    }

    /// Signer certificate, from the signature itself or its certificate part.
    pub fn signer(&self) -> PackResult<Option<Certificate>> {
        let content = self.content()?;
        if let Some(certificate) = &content.certificate {
            return Ok(Some(certificate.clone()));
        }
        let package = self.inner.package.borrow();
        for uri in certificate_targets(&*package, &self.inner.part)? {
            if package.part_exists(&uri) {
                return Ok(Some(Certificate::from_bytes(&package.read_part(&uri)?)?));
            }
        }
        Ok(None)
    }

    pub fn signing_time(&self) -> PackResult<DateTime<Utc>> {
        let info = &self.content()?.signed_info;
        time_format::parse_time(&info.signing_time, &info.time_format)
    }

    pub fn time_format(&self) -> PackResult<String> {
        Ok(self.content()?.signed_info.time_format.clone())
    }

    pub fn signature_value(&self) -> PackResult<Vec<u8>> {
        Ok(self.content()?.signature_value.clone())
    }

    pub fn signature_format(&self) -> PackResult<SignatureFormat> {
        Ok(self.content()?.signed_info.format.clone())
    }

    /// Where the signer certificate is stored, recomputed on every call.
    pub fn certificate_embedding_option(&self) -> PackResult<CertificateEmbeddingOption> {
        let content = self.content()?;
        let in_part = {
            let package = self.inner.package.borrow();
            !certificate_targets(&*package, &self.inner.part)?.is_empty()
        };
        Ok(if in_part {
            CertificateEmbeddingOption::InCertificatePart
        } else if content.certificate.is_some() {
            CertificateEmbeddingOption::InSignaturePart
        } else {
            CertificateEmbeddingOption::NotEmbedded
        })
    }

    /// Verify against the embedded signer certificate.
    pub fn verify(&self) -> PackResult<VerifyResult> {
        match self.signer() {
            Ok(Some(certificate)) => self.verify_with(&certificate),
            Ok(None) => Ok(VerifyResult::CertificateRequired),
            Err(e) if e.is_format() => {
                tracing::debug!(part = %self.inner.part, error = %e, "unreadable signer certificate");
                Ok(VerifyResult::InvalidCertificate)
            }
            Err(e) => Err(e),
        }
    }

    /// Verify against `certificate`.
    ///
    /// Signed parts that no longer exist yield `ReferenceNotFound` without
    /// running any cryptography.
    pub fn verify_with(&self, certificate: &Certificate) -> PackResult<VerifyResult> {
        let content = self.content()?;
        let package = self.inner.package.borrow();

        let missing = content
            .signed_info
            .part_references
            .iter()
            .find(|r| !package.part_exists(&r.uri));
        if let Some(missing) = missing {
            tracing::debug!(part = %self.inner.part, missing = %missing.uri, "signed part missing");
            return Ok(VerifyResult::ReferenceNotFound);
        }

        let result = match self.inner.engine.verify(&*package, content, certificate) {
            Ok(true) => VerifyResult::Success,
            Ok(false) => VerifyResult::InvalidSignature,
            Err(e) if e.is_crypto() => VerifyResult::InvalidCertificate,
            Err(e) => return Err(e),
        };
        tracing::debug!(part = %self.inner.part, ?result, "signature verified");
        Ok(result)
    }
}

impl fmt::Debug for PackageDigitalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageDigitalSignature")
            .field("part", &self.inner.part)
            .field("invalidated", &self.inner.invalidated.get())
            .finish()
    }
}

impl PartialEq for PackageDigitalSignature {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
