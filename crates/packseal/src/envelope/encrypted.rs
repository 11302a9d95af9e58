//! Encrypted package envelope.
//!
//! ```text
//! StorageRoot
//! ├── transform  EncryptionTransform   (publish + use licenses)
//! ├── dataspace  RMEncryptionNoCompression = [EncryptionTransform]
//! └── stream     EncryptedPackage  ∈ RMEncryptionNoCompression
//!                   └── sealed package archive
//! ```
//!
//! The embedded package is exposed either as a [`MemoryPackage`] or as a
//! raw plaintext [`PackageStream`], never both for one envelope instance.

use std::cell::RefCell;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::envelope::properties::PackageProperties;
use crate::envelope::rights::{PublishLicense, RightsManagementInformation};
use crate::envelope::storage::{
    FileAccess, FileMode, FileShare, StorageError, StorageRoot, StorageStream, TransformDefinition,
};
use crate::envelope::transform::{
    CryptoProvider, RightsManagementEncryptionTransform, RIGHTS_MANAGEMENT_TRANSFORM_CLASS,
};
use crate::error::{PackResult, PackageError};
use crate::package::{MemoryPackage, Package};

/// Stream holding the sealed package.
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";
/// Instance name of the confidentiality transform.
pub const ENCRYPTION_TRANSFORM_NAME: &str = "EncryptionTransform";
/// Dataspace wrapping [`ENCRYPTION_TRANSFORM_NAME`].
pub const DATASPACE_LABEL: &str = "RMEncryptionNoCompression";

const ENVELOPE: &str = "encrypted package envelope";

/// Plaintext bytes of the embedded package.
///
/// Clones share one buffer. Writes fail when the envelope was opened
/// without write access.
#[derive(Debug, Clone)]
pub struct PackageStream {
    buffer: Rc<RefCell<Cursor<Vec<u8>>>>,
    writable: bool,
}

impl PackageStream {
    fn new(plaintext: Vec<u8>, writable: bool) -> Self {
        Self {
            buffer: Rc::new(RefCell::new(Cursor::new(plaintext))),
            writable,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contents(&self) -> Vec<u8> {
        self.buffer.borrow().get_ref().clone()
    }
}

impl Read for PackageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().read(buf)
    }
}

impl Write for PackageStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "envelope is opened read-only",
            ));
        }
        self.buffer.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for PackageStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.borrow_mut().seek(pos)
    }
}

enum PackageView {
    Unopened,
    Container(Rc<RefCell<MemoryPackage>>),
    Stream(PackageStream),
}

struct OpenEnvelope {
    root: Rc<RefCell<StorageRoot>>,
    access: FileAccess,
    rights: RightsManagementInformation,
    properties: Option<PackageProperties>,
    view: PackageView,
}

impl OpenEnvelope {
    fn provider(&self) -> PackResult<&CryptoProvider> {
        self.rights
            .crypto_provider()
            .ok_or_else(|| PackageError::state("no crypto provider set for the envelope"))
    }

    fn read_plaintext(&self) -> PackResult<Vec<u8>> {
        let provider = self.provider()?;
        let root = self.root.borrow();
        provider.open(root.read_stream(ENCRYPTED_PACKAGE_STREAM)?)
    }

    fn write_plaintext(&self, plaintext: &[u8]) -> PackResult<()> {
        let sealed = self.provider()?.seal(plaintext)?;
        self.root
            .borrow_mut()
            .write_stream(ENCRYPTED_PACKAGE_STREAM, sealed)
    }

    fn flush_container(&self) -> PackResult<()> {
        let PackageView::Container(package) = &self.view else {
            return Ok(());
        };
        if !self.access.can_write() {
            return Ok(());
        }
        let plaintext = {
            let mut package = package
                .try_borrow_mut()
                .map_err(|_| PackageError::state("embedded package is borrowed"))?;
            package.flush()?;
            package.to_archive_bytes()?
        };
        self.write_plaintext(&plaintext)
    }

    fn flush_stream(&self) -> PackResult<()> {
        let PackageView::Stream(stream) = &self.view else {
            return Ok(());
        };
        if !self.access.can_write() {
            return Ok(());
        }
        self.write_plaintext(&stream.contents())
    }

    fn flush_root(&self) -> PackResult<()> {
        self.root
            .try_borrow_mut()
            .map_err(|_| PackageError::state("storage root is borrowed"))?
            .flush()
    }
}

/// A package sealed inside a compound file with rights-management
/// metadata.
///
/// Single-threaded; dropping the envelope closes it.
pub struct EncryptedPackageEnvelope {
    inner: Option<OpenEnvelope>,
}

impl EncryptedPackageEnvelope {
    /// Create (or truncate) `path` holding an empty package.
    pub fn create(
        path: impl AsRef<Path>,
        publish_license: PublishLicense,
        crypto_provider: CryptoProvider,
    ) -> PackResult<Self> {
        let root =
            StorageRoot::open_file(path, FileMode::Create, FileAccess::ReadWrite, FileShare::None)?;
        let empty = MemoryPackage::new().to_archive_bytes()?;
        Self::initialize(root, &publish_license, crypto_provider, &empty)
    }

    /// Create an envelope holding an empty package on a caller stream.
    pub fn create_on_stream<S: StorageStream + 'static>(
        stream: S,
        publish_license: PublishLicense,
        crypto_provider: CryptoProvider,
    ) -> PackResult<Self> {
        let root = StorageRoot::create_on_stream(stream)?;
        let empty = MemoryPackage::new().to_archive_bytes()?;
        Self::initialize(root, &publish_license, crypto_provider, &empty)
    }

    /// Create `path` sealing the plaintext package archive at `package_path`.
    pub fn create_from_package(
        path: impl AsRef<Path>,
        package_path: impl AsRef<Path>,
        publish_license: PublishLicense,
        crypto_provider: CryptoProvider,
    ) -> PackResult<Self> {
        let plaintext = fs::read(package_path)?;
        MemoryPackage::read_archive(plaintext.as_slice())?;
        let root =
            StorageRoot::open_file(path, FileMode::Create, FileAccess::ReadWrite, FileShare::None)?;
        Self::initialize(root, &publish_license, crypto_provider, &plaintext)
    }

    /// Create an envelope on `stream` sealing the package archive read from
    /// `package`.
    pub fn create_from_package_stream<S: StorageStream + 'static>(
        stream: S,
        package: &mut dyn Read,
        publish_license: PublishLicense,
        crypto_provider: CryptoProvider,
    ) -> PackResult<Self> {
        let mut plaintext = Vec::new();
        package.read_to_end(&mut plaintext)?;
        MemoryPackage::read_archive(plaintext.as_slice())?;
        let root = StorageRoot::create_on_stream(stream)?;
        Self::initialize(root, &publish_license, crypto_provider, &plaintext)
    }

    fn initialize(
        mut root: StorageRoot,
        publish_license: &PublishLicense,
        crypto_provider: CryptoProvider,
        plaintext: &[u8],
    ) -> PackResult<Self> {
        root.define_transform(
            ENCRYPTION_TRANSFORM_NAME,
            TransformDefinition::new(RIGHTS_MANAGEMENT_TRANSFORM_CLASS),
        )?;
        root.define_dataspace(DATASPACE_LABEL, &[ENCRYPTION_TRANSFORM_NAME])?;
        root.create_stream(ENCRYPTED_PACKAGE_STREAM, Some(DATASPACE_LABEL))?;

        let root = Rc::new(RefCell::new(root));
        let transform =
            RightsManagementEncryptionTransform::new(Rc::clone(&root), ENCRYPTION_TRANSFORM_NAME);
        transform.save_publish_license(publish_license)?;

        let open = OpenEnvelope {
            root,
            access: FileAccess::ReadWrite,
            rights: RightsManagementInformation::new(transform, Some(crypto_provider)),
            properties: None,
            view: PackageView::Unopened,
        };
        open.write_plaintext(plaintext)?;
        open.flush_root()?;

        tracing::info!(bytes = plaintext.len(), "encrypted envelope created");
        Ok(Self { inner: Some(open) })
    }

    /// Open an existing envelope file.
    pub fn open(path: impl AsRef<Path>, access: FileAccess, share: FileShare) -> PackResult<Self> {
        check_open_access(access)?;
        let root = StorageRoot::open_file(path, FileMode::Open, access, share)?;
        Self::attach(root)
    }

    /// Open an envelope held in a caller stream.
    pub fn open_stream<S: StorageStream + 'static>(stream: S, access: FileAccess) -> PackResult<Self> {
        check_open_access(access)?;
        let root = StorageRoot::open_stream(stream, access)?;
        Self::attach(root)
    }

    fn attach(root: StorageRoot) -> PackResult<Self> {
        if !root.stream_exists(ENCRYPTED_PACKAGE_STREAM) {
            return Err(PackageError::format("package not found"));
        }
        let transform_name = recognized_transform(&root)?;
        let access = root.access();

        let root = Rc::new(RefCell::new(root));
        let transform = RightsManagementEncryptionTransform::new(Rc::clone(&root), transform_name);
        tracing::info!(?access, "encrypted envelope opened");
        Ok(Self {
            inner: Some(OpenEnvelope {
                root,
                access,
                rights: RightsManagementInformation::new(transform, None),
                properties: None,
                view: PackageView::Unopened,
            }),
        })
    }

    /// Whether `path` is a compound file containing a sealed package.
    ///
    /// Files that are not compound files at all yield `false`; other I/O
    /// errors are returned.
    pub fn is_encrypted_package_envelope(path: impl AsRef<Path>) -> PackResult<bool> {
        match StorageRoot::open_file(path, FileMode::Open, FileAccess::Read, FileShare::Read) {
            Ok(root) => Ok(root.stream_exists(ENCRYPTED_PACKAGE_STREAM)),
            Err(StorageError::NotStructuredStorage) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream variant of [`is_encrypted_package_envelope`](Self::is_encrypted_package_envelope).
    pub fn is_encrypted_package_envelope_stream<R: Read + Seek>(stream: &mut R) -> PackResult<bool> {
        match StorageRoot::probe(stream, ENCRYPTED_PACKAGE_STREAM) {
            Ok(found) => Ok(found),
            Err(StorageError::NotStructuredStorage) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn state(&self) -> PackResult<&OpenEnvelope> {
        self.inner
            .as_ref()
            .ok_or_else(|| PackageError::disposed(ENVELOPE))
    }

    fn state_mut(&mut self) -> PackResult<&mut OpenEnvelope> {
        self.inner
            .as_mut()
            .ok_or_else(|| PackageError::disposed(ENVELOPE))
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn file_open_access(&self) -> PackResult<FileAccess> {
        Ok(self.state()?.access)
    }

    pub fn rights_management_information(&mut self) -> PackResult<&mut RightsManagementInformation> {
        Ok(&mut self.state_mut()?.rights)
    }

    pub fn package_properties(&mut self) -> PackResult<&mut PackageProperties> {
        let open = self.state_mut()?;
        let root = Rc::clone(&open.root);
        Ok(open
            .properties
            .get_or_insert_with(|| PackageProperties::new(root)))
    }

    /// The embedded package as a container.
    ///
    /// The package is read-only when the envelope was opened without write
    /// access. Fails with a state error once
    /// [`get_package_stream`](Self::get_package_stream) has been called.
    pub fn get_package(&mut self) -> PackResult<Rc<RefCell<MemoryPackage>>> {
        let open = self.state_mut()?;
        match &open.view {
            PackageView::Container(package) => return Ok(Rc::clone(package)),
            PackageView::Stream(_) => {
                return Err(PackageError::state(
                    "package stream is already open; container view unavailable",
                ));
            }
            PackageView::Unopened => {}
        }

        let plaintext = open.read_plaintext()?;
        let mut package = MemoryPackage::read_archive(plaintext.as_slice())?;
        package.set_read_only(!open.access.can_write());
        let package = Rc::new(RefCell::new(package));
        open.view = PackageView::Container(Rc::clone(&package));
        tracing::debug!(bytes = plaintext.len(), "embedded package materialized");
        Ok(package)
    }

    /// The embedded package as raw plaintext bytes.
    ///
    /// Fails with a state error once [`get_package`](Self::get_package) has
    /// been called.
    pub fn get_package_stream(&mut self) -> PackResult<PackageStream> {
        let open = self.state_mut()?;
        match &open.view {
            PackageView::Stream(stream) => return Ok(stream.clone()),
            PackageView::Container(_) => {
                return Err(PackageError::state(
                    "package is already open; stream view unavailable",
                ));
            }
            PackageView::Unopened => {}
        }

        let plaintext = open.read_plaintext()?;
        let stream = PackageStream::new(plaintext, open.access.can_write());
        open.view = PackageView::Stream(stream.clone());
        tracing::debug!(bytes = stream.len(), "embedded package stream materialized");
        Ok(stream)
    }

    /// Persist the container or stream view, then the storage root.
    pub fn flush(&mut self) -> PackResult<()> {
        let open = self.state()?;
        open.flush_container()?;
        open.flush_stream()?;
        open.flush_root()
    }

    /// Flush and release everything. Every teardown step runs even if an
    /// earlier one fails; the first failure is returned. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> PackResult<()> {
        let Some(mut open) = self.inner.take() else {
            return Ok(());
        };

        let mut first_error: Option<PackageError> = None;
        let mut record = |step: &'static str, result: PackResult<()>| {
            if let Err(e) = result {
                tracing::warn!(step, error = %e, "envelope teardown step failed");
                first_error.get_or_insert(e);
            }
        };

        record("container", open.flush_container());
        if matches!(open.view, PackageView::Container(_)) {
            open.view = PackageView::Unopened;
        }
        record("stream", open.flush_stream());
        open.view = PackageView::Unopened;
        open.properties = None;
        record("storage", open.flush_root());
        drop(open);

        tracing::info!(failed = first_error.is_some(), "encrypted envelope closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EncryptedPackageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("EncryptedPackageEnvelope");
        match &self.inner {
            Some(open) => {
                let view = match open.view {
                    PackageView::Unopened => "unopened",
                    PackageView::Container(_) => "container",
                    PackageView::Stream(_) => "stream",
                };
                s.field("access", &open.access).field("view", &view)
            }
            None => s.field("disposed", &true),
        };
        s.finish()
    }
}

impl Drop for EncryptedPackageEnvelope {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close encrypted envelope on drop");
        }
    }
}

fn check_open_access(access: FileAccess) -> PackResult<()> {
    if !access.can_read() {
        return Err(PackageError::validation(
            "an envelope cannot be opened write-only",
        ));
    }
    Ok(())
}

/// Name of the single rights-management transform on the package stream.
fn recognized_transform(root: &StorageRoot) -> PackResult<String> {
    let names: Vec<&str> = root
        .transforms_for_stream(ENCRYPTED_PACKAGE_STREAM)
        .into_iter()
        .filter(|(_, definition)| definition.class_id == RIGHTS_MANAGEMENT_TRANSFORM_CLASS)
        .map(|(name, _)| name)
        .collect();
    match names.as_slice() {
        [] => Err(PackageError::format("transform not found")),
        [name] => Ok((*name).to_string()),
        _ => Err(PackageError::format("multiple transforms found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::rights::{AuthenticationType, ContentUser, UseLicense};
    use crate::package::PartUri;

    fn license() -> PublishLicense {
        PublishLicense::new("<publish-license/>").unwrap()
    }

    #[test]
    fn test_views_are_exclusive() {
        let file = tempfile::tempfile().unwrap();
        let mut envelope =
            EncryptedPackageEnvelope::create_on_stream(file, license(), CryptoProvider::new([3; 32]))
                .unwrap();
        let package = envelope.get_package().unwrap();
        assert!(Rc::ptr_eq(&package, &envelope.get_package().unwrap()));
        assert!(envelope.get_package_stream().unwrap_err().is_state());
    }

    #[test]
    fn test_stream_view_round_trip() {
        let file = tempfile::tempfile().unwrap();
        let reader = file.try_clone().unwrap();
        let key = [5; 32];

        let mut source = MemoryPackage::new();
        source
            .add_part(&PartUri::new("/doc.txt").unwrap(), "text/plain", b"hello")
            .unwrap();
        let archive = source.to_archive_bytes().unwrap();

        let mut envelope =
            EncryptedPackageEnvelope::create_on_stream(file, license(), CryptoProvider::new(key))
                .unwrap();
        let mut stream = envelope.get_package_stream().unwrap();
        assert!(envelope.get_package().unwrap_err().is_state());
        stream.seek(SeekFrom::Start(0)).unwrap();
        stream.write_all(&archive).unwrap();
        envelope.close().unwrap();

        let mut envelope = EncryptedPackageEnvelope::open_stream(reader, FileAccess::Read).unwrap();
        envelope
            .rights_management_information()
            .unwrap()
            .set_crypto_provider(CryptoProvider::new(key));
        let package = envelope.get_package().unwrap();
        let data = package
            .borrow()
            .read_part(&PartUri::new("/doc.txt").unwrap())
            .unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_disposed_envelope_rejects_operations() {
        let file = tempfile::tempfile().unwrap();
        let mut envelope =
            EncryptedPackageEnvelope::create_on_stream(file, license(), CryptoProvider::new([1; 32]))
                .unwrap();
        envelope.close().unwrap();
        envelope.close().unwrap();
        assert!(envelope.is_disposed());
        assert!(envelope.get_package().unwrap_err().is_disposed());
        assert!(envelope.flush().unwrap_err().is_disposed());
        assert!(envelope.file_open_access().unwrap_err().is_disposed());
        assert!(envelope.package_properties().unwrap_err().is_disposed());
    }

    #[test]
    fn test_package_requires_crypto_provider() {
        let file = tempfile::tempfile().unwrap();
        let reader = file.try_clone().unwrap();
        EncryptedPackageEnvelope::create_on_stream(file, license(), CryptoProvider::new([1; 32]))
            .unwrap()
            .close()
            .unwrap();

        let mut envelope =
            EncryptedPackageEnvelope::open_stream(reader, FileAccess::ReadWrite).unwrap();
        assert!(envelope.get_package().unwrap_err().is_state());
        let rights = envelope.rights_management_information().unwrap();
        assert_eq!(rights.load_publish_license().unwrap(), Some(license()));

        let user = ContentUser::new("reader@example.com", AuthenticationType::Internal).unwrap();
        rights
            .save_use_license(&user, &UseLicense::new("ul").unwrap())
            .unwrap();
        assert_eq!(rights.embedded_use_licenses().unwrap().len(), 1);
    }

    #[test]
    fn test_write_only_open_rejected() {
        let file = tempfile::tempfile().unwrap();
        let err = EncryptedPackageEnvelope::open_stream(file, FileAccess::Write).unwrap_err();
        assert!(err.is_validation());
    }
}
