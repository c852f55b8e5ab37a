//! In-memory object store
//!
//! Behaves like a single-region S3 endpoint for the calls the adapter makes:
//! ordered keys, prefix/delimiter listings with continuation tokens, canned
//! ACLs surfaced as grants. Per-operation call counters and failure injection
//! make it suitable as a test double.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream;
use parking_lot::RwLock;
use tracing::trace;

use super::{
    CannedAcl, GetObjectOutput, Grant, HeadObjectOutput, ListPage, ListRequest, ObjectClient,
    ObjectEntry, Permission, ProviderResult, UploadOutput, PUBLIC_GRANT_URI,
};
use crate::config::{MetaOption, ObjectOptions};
use crate::error::ProviderError;

/// Canonical id reported as the owner of every object
pub const OWNER_ID: &str = "memory-owner";

/// Default maximum number of entries per listing page
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Operations tracked by [`MemoryClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    HeadObject,
    GetObject,
    PutObject,
    DeleteObject,
    DeleteMatchingObjects,
    CopyObject,
    GetObjectAcl,
    PutObjectAcl,
    ListObjects,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::HeadObject => "HeadObject",
            Operation::GetObject => "GetObject",
            Operation::PutObject => "PutObject",
            Operation::DeleteObject => "DeleteObject",
            Operation::DeleteMatchingObjects => "DeleteObjects",
            Operation::CopyObject => "CopyObject",
            Operation::GetObjectAcl => "GetObjectAcl",
            Operation::PutObjectAcl => "PutObjectAcl",
            Operation::ListObjects => "ListObjectsV2",
        }
    }
}

/// Stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub storage_class: Option<String>,
    pub acl: CannedAcl,
    pub etag: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
}

type ObjectKey = (String, String);

/// In-memory [`ObjectClient`]
#[derive(Debug)]
pub struct MemoryClient {
    objects: RwLock<BTreeMap<ObjectKey, StoredObject>>,
    calls: DashMap<Operation, usize>,
    failures: DashMap<Operation, ProviderError>,
    interrupt_reads_after: RwLock<Option<usize>>,
    page_size: usize,
    next_version: AtomicUsize,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            calls: DashMap::new(),
            failures: DashMap::new(),
            interrupt_reads_after: RwLock::new(None),
            page_size: DEFAULT_PAGE_SIZE,
            next_version: AtomicUsize::new(1),
        }
    }

    /// Limit listing pages to `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store an object directly, bypassing call accounting
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let object = self.new_object(data.into(), CannedAcl::Private, &ObjectOptions::new());
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), object);
    }

    /// Snapshot of a stored object
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of times `operation` was invoked
    pub fn calls(&self, operation: Operation) -> usize {
        self.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    /// Total number of calls across all operations
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    /// Make every subsequent call of `operation` fail with `error`
    pub fn fail(&self, operation: Operation, error: ProviderError) {
        self.failures.insert(operation, error);
    }

    /// Make every subsequent call of `operation` fail with an HTTP status
    pub fn fail_with_status(&self, operation: Operation, status: u16) {
        let error = if status == 404 {
            ProviderError::not_found("injected")
        } else {
            ProviderError::Service {
                operation: operation.as_str(),
                status,
                code: None,
                message: format!("injected {} failure", status),
            }
        };
        self.fail(operation, error);
    }

    /// Make object bodies fail with a connection reset after `bytes` bytes
    pub fn interrupt_reads_after(&self, bytes: usize) {
        *self.interrupt_reads_after.write() = Some(bytes);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
        *self.interrupt_reads_after.write() = None;
    }

    fn begin(&self, operation: Operation) -> ProviderResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        match self.failures.get(&operation) {
            Some(error) => Err(error.value().clone()),
            None => Ok(()),
        }
    }

    fn new_object(&self, data: Bytes, acl: CannedAcl, options: &ObjectOptions) -> StoredObject {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) as u64;
        StoredObject {
            etag: format!("\"{:016x}{:08x}\"", version, data.len()),
            content_type: options.get(MetaOption::ContentType).map(str::to_string),
            metadata: options.metadata().clone(),
            storage_class: options.get(MetaOption::StorageClass).map(str::to_string),
            data,
            acl,
            version,
            last_modified: Utc::now(),
        }
    }

    fn head_of(object: &StoredObject) -> HeadObjectOutput {
        HeadObjectOutput {
            content_length: Some(object.data.len() as u64),
            content_type: object.content_type.clone(),
            last_modified: Some(object.last_modified),
            etag: Some(object.etag.clone()),
            storage_class: object.storage_class.clone(),
            version_id: Some(object.version.to_string()),
            metadata: object.metadata.clone(),
        }
    }

    fn grants_of(object: &StoredObject) -> Vec<Grant> {
        let mut grants = vec![Grant {
            grantee_uri: None,
            grantee_id: Some(OWNER_ID.to_string()),
            permission: Permission::FullControl,
        }];
        if object.acl.is_public() {
            grants.push(Grant {
                grantee_uri: Some(PUBLIC_GRANT_URI.to_string()),
                grantee_id: None,
                permission: Permission::Read,
            });
        }
        if object.acl == CannedAcl::PublicReadWrite {
            grants.push(Grant {
                grantee_uri: Some(PUBLIC_GRANT_URI.to_string()),
                grantee_id: None,
                permission: Permission::Write,
            });
        }
        grants
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        _options: &ObjectOptions,
    ) -> ProviderResult<HeadObjectOutput> {
        trace!("memory head_object: bucket={} key={}", bucket, key);
        self.begin(Operation::HeadObject)?;
        self.object(bucket, key)
            .map(|object| Self::head_of(&object))
            .ok_or_else(|| ProviderError::not_found(key))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        _options: &ObjectOptions,
    ) -> ProviderResult<GetObjectOutput> {
        trace!("memory get_object: bucket={} key={}", bucket, key);
        self.begin(Operation::GetObject)?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| ProviderError::not_found(key))?;

        let chunks = match *self.interrupt_reads_after.read() {
            Some(bytes) => {
                let cut = bytes.min(object.data.len());
                vec![
                    Ok(object.data.slice(..cut)),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
                ]
            }
            None => vec![Ok(object.data.clone())],
        };

        Ok(GetObjectOutput {
            head: Self::head_of(&object),
            body: Box::pin(stream::iter(chunks)),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput> {
        trace!("memory put_object: bucket={} key={} size={}", bucket, key, body.len());
        self.begin(Operation::PutObject)?;
        let object = self.new_object(body, acl, options);
        let output = UploadOutput {
            etag: Some(object.etag.clone()),
            version_id: Some(object.version.to_string()),
        };
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(output)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        trace!("memory delete_object: bucket={} key={}", bucket, key);
        self.begin(Operation::DeleteObject)?;
        self.objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn delete_matching_objects(&self, bucket: &str, prefix: &str) -> ProviderResult<()> {
        trace!("memory delete_matching_objects: bucket={} prefix={}", bucket, prefix);
        self.begin(Operation::DeleteMatchingObjects)?;
        self.objects
            .write()
            .retain(|(b, k), _| !(b == bucket && k.starts_with(prefix)));
        Ok(())
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
        _options: &ObjectOptions,
    ) -> ProviderResult<()> {
        trace!(
            "memory copy_object: {}/{} -> {}/{}",
            source_bucket,
            source_key,
            bucket,
            key
        );
        self.begin(Operation::CopyObject)?;
        let source = self
            .object(source_bucket, source_key)
            .ok_or_else(|| ProviderError::not_found(source_key))?;

        let mut copy = source.clone();
        copy.acl = acl;
        copy.version = self.next_version.fetch_add(1, Ordering::SeqCst) as u64;
        copy.last_modified = Utc::now();
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), copy);
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> ProviderResult<Vec<Grant>> {
        trace!("memory get_object_acl: bucket={} key={}", bucket, key);
        self.begin(Operation::GetObjectAcl)?;
        self.object(bucket, key)
            .map(|object| Self::grants_of(&object))
            .ok_or_else(|| ProviderError::not_found(key))
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> ProviderResult<()> {
        trace!("memory put_object_acl: bucket={} key={} acl={}", bucket, key, acl.as_str());
        self.begin(Operation::PutObjectAcl)?;
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| ProviderError::not_found(key))?;
        object.acl = acl;
        Ok(())
    }

    async fn list_objects_page(
        &self,
        request: &ListRequest,
        token: Option<String>,
    ) -> ProviderResult<ListPage> {
        trace!(
            "memory list_objects_page: bucket={} prefix={} delimiter={:?} token={:?}",
            request.bucket,
            request.prefix,
            request.delimiter,
            token
        );
        self.begin(Operation::ListObjects)?;

        let limit = request
            .max_keys
            .map(|n| n.max(0) as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);

        let objects = self.objects.read();
        let mut page = ListPage::default();
        let mut returned = 0;
        let mut last: Option<String> = None;

        let keys = objects
            .iter()
            .filter(|((b, k), _)| b == &request.bucket && k.starts_with(&request.prefix));

        for ((_, key), object) in keys {
            if let Some(token) = &token {
                // A token ending in the delimiter is a common prefix already returned
                let rolled_up = request
                    .delimiter
                    .as_deref()
                    .is_some_and(|d| token.ends_with(d) && key.starts_with(token.as_str()));
                if key.as_str() <= token.as_str() || rolled_up {
                    continue;
                }
            }

            let common_prefix = request.delimiter.as_deref().and_then(|d| {
                let rest = &key[request.prefix.len()..];
                rest.find(d)
                    .map(|idx| format!("{}{}", request.prefix, &rest[..idx + d.len()]))
            });

            if let Some(cp) = &common_prefix {
                if page.common_prefixes.last() == Some(cp) {
                    continue;
                }
            }

            if returned == limit {
                page.next_token = last;
                return Ok(page);
            }

            match common_prefix {
                Some(cp) => {
                    last = Some(cp.clone());
                    page.common_prefixes.push(cp);
                }
                None => {
                    last = Some(key.clone());
                    page.contents.push(ObjectEntry {
                        key: key.clone(),
                        size: Some(object.data.len() as u64),
                        last_modified: Some(object.last_modified),
                        etag: Some(object.etag.clone()),
                        storage_class: object
                            .storage_class
                            .clone()
                            .or_else(|| Some("STANDARD".to_string())),
                    });
                }
            }
            returned += 1;
        }

        Ok(page)
    }
}
