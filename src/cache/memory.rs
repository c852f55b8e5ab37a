//! In-memory session store
//!
//! Shared between adapter instances by cloning the `Arc` it is handed out
//! in. Entries live until the store is dropped or a scope is cleared.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::trace;

use super::SessionStore;
use crate::metadata::FileMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    scope: String,
    directory: String,
}

/// Session store kept in process memory
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    listings: DashMap<ListingKey, HashMap<String, FileMetadata>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached directory listings across all scopes
    pub fn directory_count(&self) -> usize {
        self.listings.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn put_listing(&self, scope: &str, directory: &str, entries: HashMap<String, FileMetadata>) {
        trace!(
            "session put_listing: scope={} directory={} entries={}",
            scope,
            directory,
            entries.len()
        );
        let key = ListingKey {
            scope: scope.to_string(),
            directory: directory.to_string(),
        };
        self.listings.insert(key, entries);
    }

    fn lookup(&self, scope: &str, path: &str) -> Option<FileMetadata> {
        self.listings
            .iter()
            .filter(|entry| entry.key().scope == scope)
            .find_map(|entry| entry.value().get(path).cloned())
    }

    fn clear(&self, scope: &str) {
        self.listings.retain(|key, _| key.scope != scope);
    }
}
