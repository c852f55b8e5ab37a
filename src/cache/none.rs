//! Disabled session store
//!
//! Accepts writes and never returns anything, leaving only the adapter's
//! own instance-level cache in effect.

use std::collections::HashMap;

use super::SessionStore;
use crate::metadata::FileMetadata;

/// Session store that caches nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessionStore;

impl SessionStore for NoSessionStore {
    fn put_listing(&self, _scope: &str, _directory: &str, _entries: HashMap<String, FileMetadata>) {}

    fn lookup(&self, _scope: &str, _path: &str) -> Option<FileMetadata> {
        None
    }

    fn clear(&self, _scope: &str) {}
}
