//! Compound-file storage: named streams, dataspaces and transforms in one
//! file.
//!
//! Layout (uncompressed tar, deterministic headers):
//!
//! ```text
//! storage.json          # header: signature, dataspaces, transforms, properties
//! streams/<name>        # raw stream bytes
//! ```
//!
//! Anything that is not a tar archive starting with a header carrying
//! [`STORAGE_SIGNATURE`] is reported as [`StorageError::NotStructuredStorage`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tar::Builder;

use crate::error::{PackResult, PackageError};
use crate::package::archive::write_entry;

pub const STORAGE_HEADER_ENTRY: &str = "storage.json";
pub const STORAGE_SIGNATURE: &str = "packseal-compound/1";
const STREAMS_PREFIX: &str = "streams/";

/// Errors raised while opening a storage root.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Input is not a compound file at all.
    #[error("not a structured storage file")]
    NotStructuredStorage,

    /// Input is a compound file but its contents are inconsistent.
    #[error("corrupt structured storage: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<StorageError> for PackageError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotStructuredStorage => PackageError::storage(err.to_string()),
            StorageError::Corrupt(message) => PackageError::format(message),
            StorageError::Io(e) => PackageError::Io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Sharing requested from other openers. Recorded for diagnostics; the
/// storage does not take OS-level locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileShare {
    None,
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileMode {
    /// Fail if the file exists.
    CreateNew,
    /// Create or truncate.
    Create,
    /// Fail if the file does not exist.
    Open,
    OpenOrCreate,
}

/// A transform instance: its class and opaque per-instance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDefinition {
    pub class_id: String,
    #[serde(default)]
    pub instance_data: serde_json::Value,
}

impl TransformDefinition {
    pub fn new(class_id: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            instance_data: serde_json::Value::Null,
        }
    }
}

/// Document summary properties stored beside the streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageHeader {
    signature: String,
    #[serde(default)]
    dataspaces: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    stream_dataspaces: BTreeMap<String, String>,
    #[serde(default)]
    transforms: BTreeMap<String, TransformDefinition>,
    #[serde(default)]
    properties: PropertySet,
}

/// Seekable caller-supplied backing.
pub trait StorageStream: Read + Write + Seek {}

impl<T: Read + Write + Seek> StorageStream for T {}

enum Backing {
    File(PathBuf),
    Stream(Box<dyn StorageStream>),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct StorageRoot {
    backing: Backing,
    access: FileAccess,
    header: StorageHeader,
    streams: BTreeMap<String, Vec<u8>>,
    dirty: bool,
}

impl StorageRoot {
    /// Open or create a storage file according to `mode`.
    pub fn open_file(
        path: impl AsRef<Path>,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let exists = path.exists();
        tracing::debug!(path = %path.display(), ?mode, ?access, ?share, "opening storage file");

        let fresh = match mode {
            FileMode::CreateNew if exists => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", path.display()),
                )
                .into());
            }
            FileMode::Open if !exists => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )
                .into());
            }
            FileMode::CreateNew | FileMode::Create => true,
            FileMode::Open => false,
            FileMode::OpenOrCreate => !exists,
        };

        let backing = Backing::File(path.to_path_buf());
        if fresh {
            return Self::fresh(backing, access);
        }
        let raw = fs::read(path)?;
        Self::parsed(backing, access, &raw)
    }

    /// Create a new storage on a caller stream, overwriting from offset 0.
    pub fn create_on_stream<S: StorageStream + 'static>(stream: S) -> Result<Self, StorageError> {
        Self::fresh(Backing::Stream(Box::new(stream)), FileAccess::ReadWrite)
    }

    /// Open the storage held in a caller stream.
    pub fn open_stream<S: StorageStream + 'static>(
        mut stream: S,
        access: FileAccess,
    ) -> Result<Self, StorageError> {
        stream.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        Self::parsed(Backing::Stream(Box::new(stream)), access, &raw)
    }

    /// Check whether `reader` holds a storage containing stream `name`,
    /// leaving the reader positioned at its start.
    pub fn probe<R: Read + Seek>(reader: &mut R, name: &str) -> Result<bool, StorageError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        reader.seek(SeekFrom::Start(0))?;
        let (_, streams) = parse(&raw)?;
        Ok(streams.contains_key(name))
    }

    fn fresh(backing: Backing, access: FileAccess) -> Result<Self, StorageError> {
        if !access.can_write() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot create storage without write access",
            )
            .into());
        }
        let mut root = Self {
            backing,
            access,
            header: StorageHeader {
                signature: STORAGE_SIGNATURE.to_string(),
                ..StorageHeader::default()
            },
            streams: BTreeMap::new(),
            dirty: true,
        };
        root.flush().map_err(|e| match e {
            PackageError::Io(io) => StorageError::Io(io),
            other => StorageError::Corrupt(other.to_string()),
        })?;
        Ok(root)
    }

    fn parsed(backing: Backing, access: FileAccess, raw: &[u8]) -> Result<Self, StorageError> {
        let (header, streams) = parse(raw)?;
        Ok(Self {
            backing,
            access,
            header,
            streams,
            dirty: false,
        })
    }

    pub fn access(&self) -> FileAccess {
        self.access
    }

    pub fn is_writable(&self) -> bool {
        self.access.can_write()
    }

    fn ensure_writable(&self) -> PackResult<()> {
        if !self.is_writable() {
            return Err(PackageError::state("storage is opened read-only"));
        }
        Ok(())
    }

    pub fn stream_exists(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    pub fn read_stream(&self, name: &str) -> PackResult<&[u8]> {
        self.streams
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| PackageError::storage(format!("stream not found: {name}")))
    }

    pub fn write_stream(&mut self, name: &str, data: Vec<u8>) -> PackResult<()> {
        self.ensure_writable()?;
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| PackageError::storage(format!("stream not found: {name}")))?;
        *stream = data;
        self.dirty = true;
        Ok(())
    }

    /// Create an empty stream. With `dataspace`, the stream is stored
    /// through that dataspace's transforms.
    pub fn create_stream(&mut self, name: &str, dataspace: Option<&str>) -> PackResult<()> {
        self.ensure_writable()?;
        validate_name(name)?;
        if self.streams.contains_key(name) {
            return Err(PackageError::storage(format!("stream already exists: {name}")));
        }
        if let Some(label) = dataspace {
            if !self.header.dataspaces.contains_key(label) {
                return Err(PackageError::storage(format!("dataspace not defined: {label}")));
            }
            self.header
                .stream_dataspaces
                .insert(name.to_string(), label.to_string());
        }
        self.streams.insert(name.to_string(), Vec::new());
        self.dirty = true;
        Ok(())
    }

    pub fn define_transform(&mut self, name: &str, definition: TransformDefinition) -> PackResult<()> {
        self.ensure_writable()?;
        validate_name(name)?;
        if self.header.transforms.contains_key(name) {
            return Err(PackageError::storage(format!("transform already defined: {name}")));
        }
        self.header.transforms.insert(name.to_string(), definition);
        self.dirty = true;
        Ok(())
    }

    /// Define a dataspace applying `transforms` in order.
    pub fn define_dataspace(&mut self, label: &str, transforms: &[&str]) -> PackResult<()> {
        self.ensure_writable()?;
        validate_name(label)?;
        if self.header.dataspaces.contains_key(label) {
            return Err(PackageError::storage(format!("dataspace already defined: {label}")));
        }
        if let Some(missing) = transforms
            .iter()
            .find(|t| !self.header.transforms.contains_key(**t))
        {
            return Err(PackageError::storage(format!("transform not defined: {missing}")));
        }
        self.header.dataspaces.insert(
            label.to_string(),
            transforms.iter().map(|t| t.to_string()).collect(),
        );
        self.dirty = true;
        Ok(())
    }

    pub fn dataspace_of(&self, stream: &str) -> Option<&str> {
        self.header.stream_dataspaces.get(stream).map(String::as_str)
    }

    /// Transforms applied to `stream`, in dataspace order.
    pub fn transforms_for_stream(&self, stream: &str) -> Vec<(&str, &TransformDefinition)> {
        let Some(label) = self.dataspace_of(stream) else {
            return Vec::new();
        };
        self.header
            .dataspaces
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(|name| {
                self.header
                    .transforms
                    .get_key_value(name)
                    .map(|(k, v)| (k.as_str(), v))
            })
            .collect()
    }

    pub fn transform(&self, name: &str) -> Option<&TransformDefinition> {
        self.header.transforms.get(name)
    }

    pub fn set_transform_data(&mut self, name: &str, data: serde_json::Value) -> PackResult<()> {
        self.ensure_writable()?;
        let definition = self
            .header
            .transforms
            .get_mut(name)
            .ok_or_else(|| PackageError::storage(format!("transform not defined: {name}")))?;
        definition.instance_data = data;
        self.dirty = true;
        Ok(())
    }

    pub fn properties(&self) -> &PropertySet {
        &self.header.properties
    }

    pub fn update_properties(&mut self, update: impl FnOnce(&mut PropertySet)) -> PackResult<()> {
        self.ensure_writable()?;
        update(&mut self.header.properties);
        self.dirty = true;
        Ok(())
    }

    /// Serialize the storage.
    pub fn to_bytes(&self) -> PackResult<Vec<u8>> {
        let header = serde_json::to_vec_pretty(&self.header)?;
        let mut tar = Builder::new(Vec::new());
        tar.mode(tar::HeaderMode::Deterministic);
        write_entry(&mut tar, STORAGE_HEADER_ENTRY, &header)?;
        for (name, data) in &self.streams {
            write_entry(&mut tar, &format!("{STREAMS_PREFIX}{name}"), data)?;
        }
        Ok(tar.into_inner()?)
    }

    /// Persist pending changes to the backing. A no-op when read-only or
    /// clean.
    pub fn flush(&mut self) -> PackResult<()> {
        if !self.dirty || !self.is_writable() {
            return Ok(());
        }
        let bytes = self.to_bytes()?;
        match &mut self.backing {
            Backing::File(path) => fs::write(path, &bytes)?,
            Backing::Stream(stream) => {
                // Trailing bytes from a longer previous image sit past the
                // end-of-archive marker and are never read.
                stream.seek(SeekFrom::Start(0))?;
                stream.write_all(&bytes)?;
                stream.flush()?;
            }
        }
        self.dirty = false;
        tracing::debug!(bytes = bytes.len(), "storage flushed");
        Ok(())
    }
}

fn validate_name(name: &str) -> PackResult<()> {
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(PackageError::validation(format!("invalid storage name: {name:?}")));
    }
    Ok(())
}

fn parse(raw: &[u8]) -> Result<(StorageHeader, BTreeMap<String, Vec<u8>>), StorageError> {
    let mut archive = tar::Archive::new(raw);
    let mut entries = archive
        .entries()
        .map_err(|_| StorageError::NotStructuredStorage)?;

    let header: StorageHeader = match entries.next() {
        Some(Ok(mut entry)) => {
            let is_header = entry
                .path()
                .map(|p| p.to_string_lossy() == STORAGE_HEADER_ENTRY)
                .unwrap_or(false);
            if !is_header {
                return Err(StorageError::NotStructuredStorage);
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            serde_json::from_slice(&data).map_err(|_| StorageError::NotStructuredStorage)?
        }
        _ => return Err(StorageError::NotStructuredStorage),
    };
    if header.signature != STORAGE_SIGNATURE {
        return Err(StorageError::NotStructuredStorage);
    }

    let mut streams = BTreeMap::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let name = path
            .strip_prefix(STREAMS_PREFIX)
            .filter(|n| !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| StorageError::Corrupt(format!("unexpected entry '{path}'")))?
            .to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        if streams.insert(name.clone(), data).is_some() {
            return Err(StorageError::Corrupt(format!("duplicate stream '{name}'")));
        }
    }

    check_consistency(&header, &streams)?;
    Ok((header, streams))
}

fn check_consistency(
    header: &StorageHeader,
    streams: &BTreeMap<String, Vec<u8>>,
) -> Result<(), StorageError> {
    for (label, transforms) in &header.dataspaces {
        let mut seen = HashSet::new();
        for name in transforms {
            if !header.transforms.contains_key(name) {
                return Err(StorageError::Corrupt(format!(
                    "dataspace '{label}' references undefined transform '{name}'"
                )));
            }
            if !seen.insert(name) {
                return Err(StorageError::Corrupt(format!(
                    "dataspace '{label}' lists transform '{name}' twice"
                )));
            }
        }
    }
    for (stream, label) in &header.stream_dataspaces {
        if !streams.contains_key(stream) {
            return Err(StorageError::Corrupt(format!(
                "dataspace mapping for missing stream '{stream}'"
            )));
        }
        if !header.dataspaces.contains_key(label) {
            return Err(StorageError::Corrupt(format!(
                "stream '{stream}' mapped to undefined dataspace '{label}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("sample.bin");
        let mut root =
            StorageRoot::open_file(&path, FileMode::CreateNew, FileAccess::ReadWrite, FileShare::None)
                .unwrap();
        root.define_transform("T", TransformDefinition::new("{class}")).unwrap();
        root.define_dataspace("DS", &["T"]).unwrap();
        root.create_stream("Data", Some("DS")).unwrap();
        root.write_stream("Data", b"payload".to_vec()).unwrap();
        root.update_properties(|p| p.title = Some("Report".into())).unwrap();
        root.flush().unwrap();
        path
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());

        let root =
            StorageRoot::open_file(&path, FileMode::Open, FileAccess::Read, FileShare::Read).unwrap();
        assert_eq!(root.read_stream("Data").unwrap(), b"payload");
        assert_eq!(root.dataspace_of("Data"), Some("DS"));
        let transforms = root.transforms_for_stream("Data");
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].0, "T");
        assert_eq!(transforms[0].1.class_id, "{class}");
        assert_eq!(root.properties().title.as_deref(), Some("Report"));
    }

    #[test]
    fn test_create_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let err =
            StorageRoot::open_file(&path, FileMode::CreateNew, FileAccess::ReadWrite, FileShare::None)
                .unwrap_err();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let mut root =
            StorageRoot::open_file(&path, FileMode::Open, FileAccess::Read, FileShare::Read).unwrap();
        assert!(root.write_stream("Data", vec![]).unwrap_err().is_state());
        root.flush().unwrap();
    }

    #[test]
    fn test_not_structured_storage() {
        let err = StorageRoot::open_stream(Cursor::new(b"plain text".to_vec()), FileAccess::Read)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotStructuredStorage));

        let err = StorageRoot::open_stream(Cursor::new(Vec::new()), FileAccess::Read).unwrap_err();
        assert!(matches!(err, StorageError::NotStructuredStorage));

        // A tar archive without the header is not a compound file either.
        let mut tar = Builder::new(Vec::new());
        write_entry(&mut tar, "other.txt", b"x").unwrap();
        let bytes = tar.into_inner().unwrap();
        let err = StorageRoot::open_stream(Cursor::new(bytes), FileAccess::Read).unwrap_err();
        assert!(matches!(err, StorageError::NotStructuredStorage));
    }

    #[test]
    fn test_stream_backing_overwrites_in_place() {
        let file = tempfile::tempfile().unwrap();
        let reader = file.try_clone().unwrap();
        let mut root = StorageRoot::create_on_stream(file).unwrap();
        root.create_stream("A", None).unwrap();
        root.write_stream("A", vec![7; 4096]).unwrap();
        root.flush().unwrap();
        root.write_stream("A", vec![1]).unwrap();
        root.flush().unwrap();
        drop(root);

        let root = StorageRoot::open_stream(reader, FileAccess::Read).unwrap();
        assert_eq!(root.read_stream("A").unwrap(), &[1]);
    }

    #[test]
    fn test_dataspace_requires_defined_transforms() {
        let mut root = StorageRoot::create_on_stream(Cursor::new(Vec::new())).unwrap();
        let err = root.define_dataspace("DS", &["missing"]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        let err = root.create_stream("S", Some("DS")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        assert!(root.create_stream("a/b", None).unwrap_err().is_validation());
    }
}
