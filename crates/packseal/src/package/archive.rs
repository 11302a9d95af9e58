//! Archive encoding of a [`MemoryPackage`].
//!
//! Layout (gzip-compressed tar, deterministic headers):
//!
//! ```text
//! [Content_Types].json         # part names and content types, first entry
//! _rels/relationships.json     # every relationship, grouped by source
//! parts/<part name>            # raw part bytes
//! ```
//!
//! This is the plaintext an encrypted envelope seals.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Component;

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use tar::{Builder, Header};

use crate::crypto::jcs;
use crate::error::{PackResult, PackageError};
use crate::package::memory::PartEntry;
use crate::package::{MemoryPackage, PackageRelationship, PartUri};

const CONTENT_TYPES_ENTRY: &str = "[Content_Types].json";
const RELATIONSHIPS_ENTRY: &str = "_rels/relationships.json";
const PARTS_PREFIX: &str = "parts";

#[derive(Debug, Serialize, Deserialize)]
struct ContentTypes {
    parts: Vec<ContentTypeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentTypeEntry {
    name: PartUri,
    content_type: String,
}

impl MemoryPackage {
    /// Write the package as a gzip tar archive.
    pub fn write_archive<W: Write>(&self, writer: W) -> PackResult<()> {
        let content_types = ContentTypes {
            parts: self
                .parts
                .iter()
                .map(|(name, entry)| ContentTypeEntry {
                    name: name.clone(),
                    content_type: entry.content_type.clone(),
                })
                .collect(),
        };
        let relationships: Vec<&PackageRelationship> =
            self.relationships.values().flatten().collect();

        let content_types_bytes = jcs::to_vec(&content_types)
            .map_err(|e| PackageError::format(format!("{e:#}")))?;
        let relationships_bytes = jcs::to_vec(&relationships)
            .map_err(|e| PackageError::format(format!("{e:#}")))?;

        let encoder = GzBuilder::new()
            .mtime(0)
            .operating_system(255)
            .write(writer, Compression::default());
        let mut tar = Builder::new(encoder);
        tar.mode(tar::HeaderMode::Deterministic);

        write_entry(&mut tar, CONTENT_TYPES_ENTRY, &content_types_bytes)?;
        write_entry(&mut tar, RELATIONSHIPS_ENTRY, &relationships_bytes)?;
        for (name, entry) in &self.parts {
            write_entry(&mut tar, &part_entry_path(name), &entry.data)?;
        }

        let encoder = tar.into_inner()?;
        encoder.finish()?;
        Ok(())
    }

    /// Encode the package into a byte vector.
    pub fn to_archive_bytes(&self) -> PackResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_archive(&mut out)?;
        Ok(out)
    }

    /// Read a package written by [`MemoryPackage::write_archive`].
    ///
    /// An empty input yields an empty package.
    pub fn read_archive<R: Read>(mut reader: R) -> PackResult<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        if raw.is_empty() {
            return Ok(Self::new());
        }

        let mut archive = tar::Archive::new(GzDecoder::new(raw.as_slice()));
        let mut entries: HashMap<String, Vec<u8>> = HashMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_path_buf();
            for component in path.components() {
                if !matches!(component, Component::Normal(_) | Component::CurDir) {
                    return Err(PackageError::format(format!(
                        "invalid path component in '{}'",
                        path.display()
                    )));
                }
            }
            let name = path.to_string_lossy().replace('\\', "/");
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            if entries.insert(name.clone(), data).is_some() {
                return Err(PackageError::format(format!("duplicate archive entry '{name}'")));
            }
        }

        let content_types: ContentTypes = serde_json::from_slice(
            entries
                .get(CONTENT_TYPES_ENTRY)
                .ok_or_else(|| PackageError::format("missing [Content_Types].json"))?,
        )?;
        let relationships: Vec<PackageRelationship> = match entries.get(RELATIONSHIPS_ENTRY) {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => Vec::new(),
        };

        let mut package = Self::new();
        for ct in content_types.parts {
            let data = entries.remove(&part_entry_path(&ct.name)).ok_or_else(|| {
                PackageError::format(format!("missing data for part {}", ct.name))
            })?;
            package.parts.insert(
                ct.name,
                PartEntry {
                    content_type: ct.content_type,
                    data,
                },
            );
        }
        let stray = entries
            .keys()
            .find(|k| k.starts_with(&format!("{PARTS_PREFIX}/")));
        if let Some(stray) = stray {
            return Err(PackageError::format(format!(
                "archive entry '{stray}' has no content type"
            )));
        }

        let mut grouped: BTreeMap<_, Vec<PackageRelationship>> = BTreeMap::new();
        for rel in relationships {
            if let Some(source) = rel.source.part() {
                if !package.parts.contains_key(source) {
                    return Err(PackageError::format(format!(
                        "relationship {} has missing source {}",
                        rel.id, source
                    )));
                }
            }
            grouped.entry(rel.source.clone()).or_default().push(rel);
        }
        package.relationships = grouped;
        Ok(package)
    }
}

fn part_entry_path(name: &PartUri) -> String {
    format!("{PARTS_PREFIX}{}", name.as_str())
}

pub(crate) fn write_entry<T: Write>(tar: &mut Builder<T>, path: &str, data: &[u8]) -> PackResult<()> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
    tar.append(&header, data)?;
    Ok(())
}
