//! Document summary properties of an envelope.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::envelope::storage::{PropertySet, StorageRoot};
use crate::error::PackResult;

macro_rules! text_property {
    ($(#[$doc:meta])* $get:ident, $set:ident) => {
        $(#[$doc])*
        pub fn $get(&self) -> Option<String> {
            self.root.borrow().properties().$get.clone()
        }

        pub fn $set(&mut self, value: Option<String>) -> PackResult<()> {
            self.update(|p| p.$get = value)
        }
    };
}

/// Facade over the storage property set. Setters require an envelope
/// opened with write access.
#[derive(Debug)]
pub struct PackageProperties {
    root: Rc<RefCell<StorageRoot>>,
}

impl PackageProperties {
    pub(crate) fn new(root: Rc<RefCell<StorageRoot>>) -> Self {
        Self { root }
    }

    fn update(&mut self, update: impl FnOnce(&mut PropertySet)) -> PackResult<()> {
        self.root.borrow_mut().update_properties(update)
    }

    /// Snapshot of every property.
    pub fn snapshot(&self) -> PropertySet {
        self.root.borrow().properties().clone()
    }

    text_property!(title, set_title);
    text_property!(subject, set_subject);
    text_property!(creator, set_creator);
    text_property!(keywords, set_keywords);
    text_property!(description, set_description);
    text_property!(last_modified_by, set_last_modified_by);
    text_property!(
        /// Free-form revision label.
        revision,
        set_revision
    );

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.root.borrow().properties().created
    }

    pub fn set_created(&mut self, value: Option<DateTime<Utc>>) -> PackResult<()> {
        self.update(|p| p.created = value)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.root.borrow().properties().modified
    }

    pub fn set_modified(&mut self, value: Option<DateTime<Utc>>) -> PackResult<()> {
        self.update(|p| p.modified = value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::storage::{FileAccess, StorageRoot};
    use chrono::TimeZone;
    use std::io::Cursor;

    #[test]
    fn test_set_and_read_back() {
        let root = Rc::new(RefCell::new(
            StorageRoot::create_on_stream(Cursor::new(Vec::new())).unwrap(),
        ));
        let mut props = PackageProperties::new(Rc::clone(&root));
        props.set_title(Some("Quarterly".into())).unwrap();
        props.set_revision(Some("3".into())).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        props.set_created(Some(at)).unwrap();

        assert_eq!(props.title().as_deref(), Some("Quarterly"));
        assert_eq!(props.created(), Some(at));
        assert_eq!(props.snapshot().revision.as_deref(), Some("3"));
        assert!(props.subject().is_none());
    }

    #[test]
    fn test_read_only_rejects_setters() {
        let file = tempfile::tempfile().unwrap();
        let reader = file.try_clone().unwrap();
        StorageRoot::create_on_stream(file).unwrap();
        let root = Rc::new(RefCell::new(
            StorageRoot::open_stream(reader, FileAccess::Read).unwrap(),
        ));
        let mut props = PackageProperties::new(root);
        assert!(props.set_title(Some("x".into())).unwrap_err().is_state());
    }
}
