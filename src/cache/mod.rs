//! Metadata caching
//!
//! Two levels of caching sit in front of metadata lookups:
//!
//! - [`MetadataCache`]: owned by one adapter instance, keyed by logical path.
//! - [`SessionStore`]: injected by the caller and shared between adapter
//!   instances for the lifetime the caller chooses, keyed by directory.
//!
//! Neither level is invalidated by writes, deletes or renames. Entries stay
//! until the directory is listed again or the owner drops the cache.

pub mod memory;
pub mod none;

use std::collections::HashMap;

use dashmap::DashMap;

use crate::metadata::FileMetadata;

pub use memory::MemorySessionStore;
pub use none::NoSessionStore;

/// Instance-level cache mapping logical path to last known metadata
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<String, FileMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<FileMetadata> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, meta: FileMetadata) {
        self.entries.insert(meta.path.clone(), meta);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Cross-instance metadata store with caller-owned lifetime
///
/// `scope` identifies the storage root (bucket and key prefix) so adapters
/// over different roots never see each other's entries.
pub trait SessionStore: Send + Sync {
    /// Replace the cached listing of `directory`
    fn put_listing(&self, scope: &str, directory: &str, entries: HashMap<String, FileMetadata>);

    /// Find `path` in any cached directory of `scope`
    fn lookup(&self, scope: &str, path: &str) -> Option<FileMetadata>;

    /// Drop every entry of `scope`
    fn clear(&self, scope: &str);
}
