//! Part names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{PackResult, PackageError};

/// Absolute, validated part name such as `/word/document.xml`.
///
/// Comparison is ASCII case-insensitive; the original spelling is kept for
/// display and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartUri {
    original: String,
    normalized: String,
}

impl PartUri {
    /// Parse and validate an absolute part name.
    pub fn new(uri: impl Into<String>) -> PackResult<Self> {
        let original = uri.into();
        validate(&original)?;
        let normalized = original.to_ascii_lowercase();
        Ok(Self {
            original,
            normalized,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Extension of the last segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let last = self.original.rsplit('/').next()?;
        last.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Resolve a relationship target relative to `base`.
    ///
    /// Absolute targets are parsed as-is; relative targets are joined to the
    /// directory of `base` with `.` and `..` segments collapsed.
    pub fn resolve(base: Option<&PartUri>, target: &str) -> PackResult<Self> {
        if target.starts_with('/') {
            return Self::new(target);
        }
        let dir = match base {
            Some(base) => match base.original.rfind('/') {
                Some(idx) => &base.original[..idx],
                None => "",
            },
            None => "",
        };

        let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
        for segment in target.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PackageError::validation(format!(
                            "relationship target escapes package root: {target}"
                        )));
                    }
                }
                other => segments.push(other),
            }
        }
        Self::new(format!("/{}", segments.join("/")))
    }
}

fn validate(uri: &str) -> PackResult<()> {
    let invalid = |reason: &str| {
        Err(PackageError::validation(format!(
            "invalid part uri '{uri}': {reason}"
        )))
    };

    if !uri.starts_with('/') {
        return invalid("must be absolute");
    }
    if uri.len() == 1 || uri.ends_with('/') {
        return invalid("must name a part, not a folder");
    }
    if uri.contains(['\\', '?', '#']) {
        return invalid("contains a reserved character");
    }
    for segment in uri[1..].split('/') {
        if segment.is_empty() {
            return invalid("empty segment");
        }
        if segment == "." || segment == ".." || segment.ends_with('.') {
            return invalid("dot segment");
        }
    }
    Ok(())
}

impl PartialEq for PartUri {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for PartUri {}

impl Hash for PartUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for PartUri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartUri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Display for PartUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl TryFrom<String> for PartUri {
    type Error = PackageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PartUri {
    type Error = PackageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartUri> for String {
    fn from(uri: PartUri) -> Self {
        uri.original
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_uris() {
        let uri = PartUri::new("/word/document.xml").unwrap();
        assert_eq!(uri.as_str(), "/word/document.xml");
        assert_eq!(uri.extension(), Some("xml"));
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = PartUri::new("/Word/Document.XML").unwrap();
        let b = PartUri::new("/word/document.xml").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/Word/Document.XML");
    }

    #[test]
    fn test_rejects_invalid() {
        for bad in ["word/doc.xml", "/", "/a//b", "/a/../b", "/a/", "/a/b.", "/a?b"] {
            assert!(PartUri::new(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_resolve_relative() {
        let base = PartUri::new("/package/services/digital-signature/origin.psdsor").unwrap();
        let resolved = PartUri::resolve(Some(&base), "xml-signature/abc.psdsxs").unwrap();
        assert_eq!(
            resolved.as_str(),
            "/package/services/digital-signature/xml-signature/abc.psdsxs"
        );

        let up = PartUri::resolve(Some(&base), "../../docs/a.xml").unwrap();
        assert_eq!(up.as_str(), "/package/docs/a.xml");

        let root = PartUri::resolve(None, "docs/a.xml").unwrap();
        assert_eq!(root.as_str(), "/docs/a.xml");

        assert!(PartUri::resolve(None, "../a.xml").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let uri = PartUri::new("/a.xml").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"/a.xml\"");
        let back: PartUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
        assert!(serde_json::from_str::<PartUri>("\"rel.xml\"").is_err());
    }
}
