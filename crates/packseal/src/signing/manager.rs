//! Signature manager: sign, countersign, verify and remove signatures while
//! keeping origin, signature and certificate parts consistent.
//!
//! # Sign
//!
//! ```text
//! 1. Validate input (nothing to sign, ids, read-only)
//! 2. Ensure origin exists                         ─┐
//! 3. origin ──signature──▶ new part name, flush    │ recorded in the
//! 4. Check every target part exists                │ rollback log; any
//! 5. Create signature part, delegate to engine     │ failure unwinds
//! 6. Certificate part (create or reuse) + link     │ newest-first
//! 7. Flush                                        ─┘
//! 8. Commit: append to the in-memory list, bump certificate count
//! ```
//!
//! The origin relationship is created before the signature content so that a
//! signature may cover the package's own relationships, including the origin
//! relationship to it.
//!
//! A manager is single-threaded (`!Send`); callers must not interleave
//! mutations on managers sharing one package.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SignatureManagerOptions;
use crate::error::{PackResult, PackageError};
use crate::package::{Package, PartUri, RelationshipSource, TargetMode};
use crate::signing::certificate::{Certificate, CertificateStatus};
use crate::signing::digest_engine::DigestSignatureEngine;
use crate::signing::engine::{DataObject, SignRequest, SignatureContent, SignatureEngine};
use crate::signing::registry::{certificate_targets, CertificateRegistry};
use crate::signing::rollback::RollbackLog;
use crate::signing::selector::PackageRelationshipSelector;
use crate::signing::signature::{PackageDigitalSignature, SharedPackage};
use crate::signing::{
    is_ncname, origin, time_format, CertificateEmbeddingOption, VerifyResult,
    DEFAULT_SIGNATURE_ID, PACKAGE_OBJECT_ID, SIGNATURE_CONTENT_TYPE, SIGNATURE_PART_EXTENSION,
    SIGNATURE_PART_PREFIX, SIGNATURE_RELATIONSHIP_TYPE,
};

type InvalidSignatureHandler = Box<dyn FnMut(&PackageDigitalSignature, VerifyResult)>;

/// What a new signature covers.
#[derive(Debug, Clone, Default)]
pub struct SignatureDefinition {
    pub parts: Vec<PartUri>,
    pub relationship_selectors: Vec<PackageRelationshipSelector>,
    /// Defaults to `packageSignature`.
    pub signature_id: Option<String>,
    pub signature_objects: Vec<DataObject>,
    pub object_references: Vec<String>,
}

impl SignatureDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(mut self, parts: impl IntoIterator<Item = PartUri>) -> Self {
        self.parts.extend(parts);
        self
    }

    pub fn with_relationship_selector(mut self, selector: PackageRelationshipSelector) -> Self {
        self.relationship_selectors.push(selector);
        self
    }

    pub fn with_signature_id(mut self, id: impl Into<String>) -> Self {
        self.signature_id = Some(id.into());
        self
    }

    pub fn with_object(mut self, object: DataObject) -> Self {
        self.signature_objects.push(object);
        self
    }

    pub fn with_object_reference(mut self, id: impl Into<String>) -> Self {
        self.object_references.push(id.into());
        self
    }

    fn validate(&self) -> PackResult<()> {
        if self.parts.is_empty()
            && self.relationship_selectors.is_empty()
            && self.signature_objects.is_empty()
            && self.object_references.is_empty()
        {
            return Err(PackageError::validation("nothing to sign"));
        }
        if let Some(id) = &self.signature_id {
            if !is_ncname(id) {
                return Err(PackageError::format(format!(
                    "signature id '{id}' is not a valid identifier"
                )));
            }
        }
        let mut seen = HashSet::new();
        for object in &self.signature_objects {
            if object.id == PACKAGE_OBJECT_ID {
                return Err(PackageError::validation(format!(
                    "object id '{PACKAGE_OBJECT_ID}' is reserved"
                )));
            }
            if !seen.insert(object.id.as_str()) {
                return Err(PackageError::validation(format!(
                    "duplicate object id '{}'",
                    object.id
                )));
            }
        }
        Ok(())
    }
}

/// Signatures loaded from the package.
struct LoadedState {
    origin: Option<PartUri>,
    signatures: Vec<PackageDigitalSignature>,
    certificates: CertificateRegistry,
}

pub struct PackageDigitalSignatureManager {
    package: SharedPackage,
    engine: Rc<dyn SignatureEngine>,
    options: SignatureManagerOptions,
    state: Option<LoadedState>,
    invalid_signature_handlers: Vec<InvalidSignatureHandler>,
}

impl PackageDigitalSignatureManager {
    /// Manager with default options and the [`DigestSignatureEngine`].
    pub fn new(package: SharedPackage) -> Self {
        Self {
            package,
            engine: Rc::new(DigestSignatureEngine::new()),
            options: SignatureManagerOptions::default(),
            state: None,
            invalid_signature_handlers: Vec::new(),
        }
    }

    pub fn with_options(package: SharedPackage, options: SignatureManagerOptions) -> PackResult<Self> {
        Self::with_engine(package, Rc::new(DigestSignatureEngine::new()), options)
    }

    pub fn with_engine(
        package: SharedPackage,
        engine: Rc<dyn SignatureEngine>,
        options: SignatureManagerOptions,
    ) -> PackResult<Self> {
        options.validate()?;
        Ok(Self {
            package,
            engine,
            options,
            state: None,
            invalid_signature_handlers: Vec::new(),
        })
    }

    pub fn options(&self) -> &SignatureManagerOptions {
        &self.options
    }

    pub fn hash_algorithm(&self) -> &str {
        &self.options.hash_algorithm
    }

    /// Digest method for subsequent signatures. Unsupported URIs surface as
    /// crypto errors from `sign`.
    pub fn set_hash_algorithm(&mut self, uri: impl Into<String>) -> PackResult<()> {
        let uri = uri.into();
        if uri.trim().is_empty() {
            return Err(PackageError::validation("hash algorithm must not be empty"));
        }
        self.options.hash_algorithm = uri;
        Ok(())
    }

    pub fn certificate_option(&self) -> CertificateEmbeddingOption {
        self.options.certificate_option
    }

    pub fn set_certificate_option(&mut self, option: CertificateEmbeddingOption) {
        self.options.certificate_option = option;
    }

    pub fn time_format(&self) -> &str {
        &self.options.time_format
    }

    pub fn set_time_format(&mut self, time_format: impl Into<String>) -> PackResult<()> {
        let time_format = time_format.into();
        if !time_format::is_supported(&time_format) {
            return Err(PackageError::validation(format!(
                "unsupported signing time format: {time_format}"
            )));
        }
        self.options.time_format = time_format;
        Ok(())
    }

    pub fn transform_mapping(&self) -> &BTreeMap<String, String> {
        &self.options.transform_mapping
    }

    pub fn transform_mapping_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.options.transform_mapping
    }

    /// Register an observer called once per non-successful verification
    /// during [`verify_signatures`](Self::verify_signatures).
    pub fn on_invalid_signature(
        &mut self,
        handler: impl FnMut(&PackageDigitalSignature, VerifyResult) + 'static,
    ) {
        self.invalid_signature_handlers.push(Box::new(handler));
    }

    /// Validity of `certificate` at `at`.
    pub fn verify_certificate(certificate: &Certificate, at: DateTime<Utc>) -> CertificateStatus {
        certificate.status_at(at)
    }

    fn ensure_loaded(&mut self) -> PackResult<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let package = self.package.borrow();
        let origin = origin::locate(&*package)?;
        let mut signatures: Vec<PackageDigitalSignature> = Vec::new();
        if let Some(origin) = &origin {
            for rel in origin::signature_relationships(&*package, origin)? {
                let part = rel.resolve_target().ok_or_else(|| {
                    PackageError::format(format!("signature relationship {} is external", rel.id))
                })?;
                if !package.part_exists(&part) {
                    return Err(PackageError::format(format!("signature part missing: {part}")));
                }
                if package.content_type(&part)? != SIGNATURE_CONTENT_TYPE {
                    return Err(PackageError::format(format!(
                        "{part} is not a signature part"
                    )));
                }
                if signatures.iter().any(|s| s.part_uri() == &part) {
                    continue;
                }
                signatures.push(PackageDigitalSignature::new(
                    part,
                    Rc::clone(&self.package),
                    Rc::clone(&self.engine),
                ));
            }
        }
        let parts: Vec<PartUri> = signatures.iter().map(|s| s.part_uri().clone()).collect();
        let certificates = CertificateRegistry::load(&*package, &parts)?;
        drop(package);

        tracing::debug!(count = signatures.len(), "signatures loaded");
        self.state = Some(LoadedState {
            origin,
            signatures,
            certificates,
        });
        Ok(())
    }

    fn loaded(&mut self) -> PackResult<&mut LoadedState> {
        self.ensure_loaded()?;
        self.state
            .as_mut()
            .ok_or_else(|| PackageError::state("signatures not loaded"))
    }

    /// Origin part name: the existing origin, or where one would be created.
    pub fn signature_origin(&mut self) -> PackResult<PartUri> {
        match &self.loaded()?.origin {
            Some(uri) => Ok(uri.clone()),
            None => origin::default_origin_uri(),
        }
    }

    pub fn is_signed(&mut self) -> PackResult<bool> {
        Ok(!self.loaded()?.signatures.is_empty())
    }

    /// Snapshot of the current signatures, in origin relationship order.
    pub fn signatures(&mut self) -> PackResult<Vec<PackageDigitalSignature>> {
        Ok(self.loaded()?.signatures.clone())
    }

    /// Signature backed by `signature_part`.
    pub fn get_signature(
        &mut self,
        signature_part: &PartUri,
    ) -> PackResult<Option<PackageDigitalSignature>> {
        Ok(self
            .loaded()?
            .signatures
            .iter()
            .find(|s| s.part_uri() == signature_part)
            .cloned())
    }

    /// Sign `parts` with `certificate`.
    pub fn sign(
        &mut self,
        parts: &[PartUri],
        certificate: &Certificate,
    ) -> PackResult<PackageDigitalSignature> {
        self.sign_definition(
            &SignatureDefinition::new().with_parts(parts.iter().cloned()),
            certificate,
        )
    }

    /// Sign everything named by `definition`.
    ///
    /// On failure every element created by this call is removed again and
    /// the original error is returned.
    pub fn sign_definition(
        &mut self,
        definition: &SignatureDefinition,
        certificate: &Certificate,
    ) -> PackResult<PackageDigitalSignature> {
        definition.validate()?;
        if self.package.borrow().is_read_only() {
            return Err(PackageError::state("cannot sign a read-only package"));
        }
        self.ensure_loaded()?;

        let signature_part = self.generate_signature_part_uri()?;
        let Self {
            package,
            engine,
            options,
            state,
            ..
        } = self;
        let state = state
            .as_mut()
            .ok_or_else(|| PackageError::state("signatures not loaded"))?;

        let request = SignRequest {
            signature_part: &signature_part,
            parts: &definition.parts,
            relationship_selectors: &definition.relationship_selectors,
            certificate,
            signature_id: definition
                .signature_id
                .as_deref()
                .unwrap_or(DEFAULT_SIGNATURE_ID),
            embed_certificate: options.certificate_option
                == CertificateEmbeddingOption::InSignaturePart,
            signature_objects: &definition.signature_objects,
            object_references: &definition.object_references,
            hash_algorithm: &options.hash_algorithm,
            time_format: &options.time_format,
            transform_mapping: &options.transform_mapping,
        };
        let separate_certificate =
            options.certificate_option == CertificateEmbeddingOption::InCertificatePart;

        let mut log = RollbackLog::new();
        let outcome = {
            let mut pkg = package.borrow_mut();
            apply_sign(
                &mut *pkg,
                state.origin.as_ref(),
                &**engine,
                &request,
                separate_certificate,
                &mut log,
            )
        };

        match outcome {
            Ok(applied) => {
                log.commit();
                state.origin = Some(applied.origin);
                if let Some(uri) = &applied.certificate_part {
                    state.certificates.acquire(uri);
                }
                let signature = PackageDigitalSignature::with_content(
                    signature_part.clone(),
                    Rc::clone(package),
                    Rc::clone(engine),
                    applied.content,
                );
                state.signatures.push(signature.clone());
                tracing::info!(
                    part = %signature_part,
                    signatures = state.signatures.len(),
                    "package signed"
                );
                Ok(signature)
            }
            Err(e) => {
                tracing::warn!(part = %signature_part, error = %e, "sign failed, rolling back");
                log.unwind(&mut *package.borrow_mut());
                Err(e)
            }
        }
    }

    /// Sign existing signature parts; all of them when `signatures` is `None`.
    ///
    /// Fails with a state error before touching the certificate when the
    /// package is not signed.
    pub fn countersign(
        &mut self,
        certificate: &Certificate,
        signatures: Option<&[PartUri]>,
    ) -> PackResult<PackageDigitalSignature> {
        if !self.is_signed()? {
            return Err(PackageError::state("cannot countersign an unsigned package"));
        }

        let targets: Vec<PartUri> = match signatures {
            Some(uris) => {
                let package = self.package.borrow();
                for uri in uris {
                    if !package.part_exists(uri) {
                        return Err(PackageError::not_found(uri));
                    }
                    if package.content_type(uri)? != SIGNATURE_CONTENT_TYPE {
                        return Err(PackageError::validation(format!(
                            "{uri} is not a signature part"
                        )));
                    }
                }
                uris.to_vec()
            }
            None => self
                .loaded()?
                .signatures
                .iter()
                .map(|s| s.part_uri().clone())
                .collect(),
        };
        self.sign(&targets, certificate)
    }

    /// Verify every signature in list order.
    ///
    /// The aggregate is the first non-success outcome, or `Success`. Handlers
    /// registered with [`on_invalid_signature`](Self::on_invalid_signature)
    /// see every non-success outcome reached.
    pub fn verify_signatures(&mut self, exit_on_first_failure: bool) -> PackResult<VerifyResult> {
        let signatures = self.signatures()?;
        if signatures.is_empty() {
            return Ok(VerifyResult::NotSigned);
        }

        let mut aggregate = VerifyResult::Success;
        for signature in &signatures {
            let result = signature.verify()?;
            if result.is_success() {
                continue;
            }
            for handler in &mut self.invalid_signature_handlers {
                handler(signature, result);
            }
            if aggregate.is_success() {
                aggregate = result;
            }
            if exit_on_first_failure {
                break;
            }
        }
        Ok(aggregate)
    }

    /// Remove one signature. Unknown part names are ignored.
    pub fn remove_signature(&mut self, signature_part: &PartUri) -> PackResult<()> {
        self.ensure_loaded()?;
        let Self { package, state, .. } = self;
        let state = state
            .as_mut()
            .ok_or_else(|| PackageError::state("signatures not loaded"))?;

        let Some(index) = state
            .signatures
            .iter()
            .position(|s| s.part_uri() == signature_part)
        else {
            return Ok(());
        };

        let mut pkg = package.borrow_mut();
        if pkg.is_read_only() {
            return Err(PackageError::state("cannot remove a signature from a read-only package"));
        }
        let part = state.signatures[index].part_uri().clone();
        let origin = state
            .origin
            .clone()
            .ok_or_else(|| PackageError::format("signature exists without an origin"))?;
        let certificates = certificate_targets(&*pkg, &part)?;

        let remaining = state.signatures.len() - 1;
        if remaining == 0 {
            origin::delete(&mut *pkg, &origin)?;
            state.origin = None;
        } else {
            let source = RelationshipSource::Part(origin.clone());
            for rel in origin::signature_relationships(&*pkg, &origin)? {
                if rel.resolve_target().as_ref() == Some(&part) {
                    pkg.delete_relationship(&source, &rel.id)?;
                }
            }
        }

        for certificate in &certificates {
            state.certificates.release(&mut *pkg, certificate)?;
        }
        pkg.delete_part(&part)?;
        state.signatures.remove(index).invalidate();
        pkg.flush()?;

        tracing::info!(part = %part, remaining, "signature removed");
        Ok(())
    }

    /// Remove every signature, certificate part and the origin.
    pub fn remove_all_signatures(&mut self) -> PackResult<()> {
        self.ensure_loaded()?;
        let Self { package, state, .. } = self;
        let state = state
            .as_mut()
            .ok_or_else(|| PackageError::state("signatures not loaded"))?;

        let mut pkg = package.borrow_mut();
        if pkg.is_read_only() {
            return Err(PackageError::state("cannot remove signatures from a read-only package"));
        }

        let count = state.signatures.len();
        for signature in &state.signatures {
            let part = signature.part_uri();
            for certificate in certificate_targets(&*pkg, part)? {
                state.certificates.release(&mut *pkg, &certificate)?;
            }
            pkg.delete_part(part)?;
        }
        if let Some(origin) = state.origin.take() {
            origin::delete(&mut *pkg, &origin)?;
        }
        for signature in state.signatures.drain(..) {
            signature.invalidate();
        }
        state.certificates.clear();
        pkg.flush()?;

        tracing::info!(count, "all signatures removed");
        Ok(())
    }

    fn generate_signature_part_uri(&self) -> PackResult<PartUri> {
        let package = self.package.borrow();
        loop {
            let uri = PartUri::new(format!(
                "{SIGNATURE_PART_PREFIX}{}{SIGNATURE_PART_EXTENSION}",
                Uuid::new_v4().simple()
            ))?;
            if !package.part_exists(&uri) {
                return Ok(uri);
            }
        }
    }
}

struct AppliedSignature {
    origin: PartUri,
    content: SignatureContent,
    certificate_part: Option<PartUri>,
}

fn apply_sign(
    package: &mut dyn Package,
    current_origin: Option<&PartUri>,
    engine: &dyn SignatureEngine,
    request: &SignRequest<'_>,
    separate_certificate: bool,
    log: &mut RollbackLog,
) -> PackResult<AppliedSignature> {
    let origin = origin::ensure(package, current_origin, log)?;
    let source = RelationshipSource::Part(origin.clone());
    let rel = package.create_relationship(
        &source,
        request.signature_part.as_str(),
        TargetMode::Internal,
        SIGNATURE_RELATIONSHIP_TYPE,
        None,
    )?;
    log.relationship(&source, &rel.id);
    package.flush()?;

    if let Some(missing) = request.parts.iter().find(|p| !package.part_exists(p)) {
        return Err(PackageError::not_found(missing));
    }

    package.create_part(request.signature_part, SIGNATURE_CONTENT_TYPE)?;
    log.part(request.signature_part);
    let content = engine.sign(package, request)?;

    let certificate_part = if separate_certificate {
        Some(CertificateRegistry::attach(
            package,
            request.signature_part,
            request.certificate,
            log,
        )?)
    } else {
        None
    };
    package.flush()?;

    Ok(AppliedSignature {
        origin,
        content,
        certificate_part,
    })
}
