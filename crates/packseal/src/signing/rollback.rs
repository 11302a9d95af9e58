//! Ordered record of structural elements created by an in-flight mutation.
//!
//! Every step that creates something records it here. On failure the log is
//! unwound newest-first, returning the package to the state it had before
//! the call; on success it is committed and forgotten.

use crate::package::{Package, PartUri, RelationshipSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Created {
    Part(PartUri),
    Relationship { source: RelationshipSource, id: String },
}

#[derive(Debug, Default)]
#[must_use = "a rollback log must be committed or unwound"]
pub(crate) struct RollbackLog {
    created: Vec<Created>,
}

impl RollbackLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn part(&mut self, uri: &PartUri) {
        self.created.push(Created::Part(uri.clone()));
    }

    pub(crate) fn relationship(&mut self, source: &RelationshipSource, id: &str) {
        self.created.push(Created::Relationship {
            source: source.clone(),
            id: id.to_string(),
        });
    }

    /// Whether `uri` was created during this mutation.
    #[cfg(test)]
    pub(crate) fn created_part(&self, uri: &PartUri) -> bool {
        self.created
            .iter()
            .any(|c| matches!(c, Created::Part(p) if p == uri))
    }

    pub(crate) fn commit(self) {}

    /// Delete everything recorded, newest first.
    ///
    /// Elements already gone (for example relationships removed together
    /// with their source part) are skipped. Other failures are logged and do
    /// not stop the unwind.
    pub(crate) fn unwind(self, package: &mut dyn Package) {
        for created in self.created.into_iter().rev() {
            let result = match &created {
                Created::Part(uri) => {
                    if !package.part_exists(uri) {
                        continue;
                    }
                    package.delete_part(uri)
                }
                Created::Relationship { source, id } => {
                    if let Some(part) = source.part() {
                        if !package.part_exists(part) {
                            continue;
                        }
                    }
                    package.delete_relationship(source, id)
                }
            };
            match result {
                Ok(()) => tracing::debug!(?created, "rolled back"),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(?created, error = %e, "rollback step failed"),
            }
        }
        if let Err(e) = package.flush() {
            tracing::warn!(error = %e, "flush after rollback failed");
        }
    }
}
