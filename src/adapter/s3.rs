//! S3 filesystem adapter
//!
//! Maps filesystem verbs onto [`ObjectClient`] calls. Directories do not exist
//! in the store; they are emulated with `/`-terminated marker objects, prefix
//! probes and the common prefixes reported by delimited listings.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{debug, trace, warn};

use super::FilesystemAdapter;
use crate::cache::{MetadataCache, NoSessionStore, SessionStore};
use crate::client::s3::S3Client;
use crate::client::{ByteStream, CannedAcl, ListRequest, ObjectClient, UploadBody};
use crate::config::{Config, MetaOption, ObjectOptions, WriteConfig};
use crate::error::{AdapterError, ProviderError, Result};
use crate::metadata::{normalize, FileMetadata, ObjectBody, ProviderRecord, ReadOutput, UploadRecord, Visibility};
use crate::mime;
use crate::path::{normalize_directory, PathPrefixer, SEPARATOR};

/// Adapter over an S3-compatible bucket
pub struct S3Adapter<C: ObjectClient = S3Client> {
    client: Arc<C>,
    bucket: String,
    prefixer: PathPrefixer,
    /// Adapter-wide provider options, sent with every call
    options: ObjectOptions,
    cache: MetadataCache,
    session: Arc<dyn SessionStore>,
    /// Session store scope: bucket plus key prefix
    scope: String,
}

impl S3Adapter<S3Client> {
    /// Build an adapter and its S3 client from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let client = S3Client::new(&config.s3).await;
        let prefix = config.s3.prefix.as_deref().unwrap_or_default();

        Ok(Self::new(Arc::new(client), config.s3.bucket.clone(), prefix).with_options(config.options.clone()))
    }
}

impl<C: ObjectClient> S3Adapter<C> {
    pub fn new(client: Arc<C>, bucket: impl Into<String>, prefix: &str) -> Self {
        let bucket = bucket.into();
        let prefixer = PathPrefixer::new(prefix);
        let scope = format!("{}{}{}", bucket, SEPARATOR, prefixer.prefix());

        Self {
            client,
            bucket,
            prefixer,
            options: ObjectOptions::new(),
            cache: MetadataCache::new(),
            session: Arc::new(NoSessionStore),
            scope,
        }
    }

    /// Set the provider options sent with every call
    pub fn with_options(mut self, options: ObjectOptions) -> Self {
        self.options = options;
        self
    }

    /// Share listings with other adapters through `store`
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session = store;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefixer(&self) -> &PathPrefixer {
        &self.prefixer
    }

    pub fn options(&self) -> &ObjectOptions {
        &self.options
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Merge per-call settings over the adapter-wide options
    pub fn options_from_config(&self, config: &WriteConfig) -> ObjectOptions {
        let mut options = self.options.clone();

        if let Some(visibility) = config.visibility() {
            let acl = match visibility {
                Visibility::Public => CannedAcl::PublicRead,
                Visibility::Private => CannedAcl::Private,
            };
            options.set(MetaOption::Acl, acl.as_str());
        }

        if let Some(mimetype) = config.mimetype() {
            options.set(MetaOption::ContentType, mimetype);
        }

        for option in MetaOption::ALL {
            if let Some(value) = config.option(option) {
                options.set(option, value);
            }
        }

        if let Some(metadata) = config.metadata() {
            options.set_metadata(metadata.clone());
        }

        options
    }

    async fn upload(&self, path: &str, body: UploadBody, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        let path = logical(path);
        let key = self.prefixer.apply(path);
        let mut options = self.options_from_config(config);

        let acl = match options.get(MetaOption::Acl) {
            Some(value) => {
                CannedAcl::parse(value).ok_or_else(|| AdapterError::Config(format!("Unknown ACL: {}", value)))?
            }
            None => CannedAcl::Private,
        };

        if !path.ends_with(SEPARATOR) {
            if !options.contains(MetaOption::ContentType) {
                options.set(MetaOption::ContentType, mime::detect(path));
            }
            if !options.contains(MetaOption::ContentLength) {
                if let Some(length) = body.known_length() {
                    options.set(MetaOption::ContentLength, length.to_string());
                }
            }
        }

        debug!("write: path={:?} key={} acl={}", path, key, acl.as_str());

        let output = match self.client.upload(&self.bucket, &key, body, acl, &options).await {
            Ok(output) => output,
            Err(e @ ProviderError::MultipartUpload { .. }) => {
                warn!("write failed: path={:?}: {}", path, e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record = UploadRecord {
            content_length: options
                .get(MetaOption::ContentLength)
                .and_then(|len| len.parse().ok()),
            content_type: options.get(MetaOption::ContentType).map(str::to_string),
            metadata: (!options.metadata().is_empty()).then(|| options.metadata().clone()),
            storage_class: options.get(MetaOption::StorageClass).map(str::to_string),
            output,
        };

        Ok(Some(normalize(&self.prefixer, ProviderRecord::Upload(&record), Some(path))))
    }

    /// Probe for any key below `key` treated as a directory
    async fn does_directory_exist(&self, key: &str) -> Result<bool> {
        let request = ListRequest {
            bucket: self.bucket.clone(),
            prefix: format!("{}{}", key.trim_end_matches(SEPARATOR), SEPARATOR),
            delimiter: None,
            max_keys: Some(1),
        };

        match self.client.list_objects_page(&request, None).await {
            Ok(page) => Ok(!page.contents.is_empty() || !page.common_prefixes.is_empty()),
            Err(e) if matches!(e.status(), Some(403) | Some(404)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Visibility of the object at a physical key
    async fn raw_visibility(&self, key: &str) -> std::result::Result<Visibility, ProviderError> {
        let grants = self.client.get_object_acl(&self.bucket, key).await?;
        if grants.iter().any(|grant| grant.is_public_read()) {
            Ok(Visibility::Public)
        } else {
            Ok(Visibility::Private)
        }
    }

    async fn fetch(&self, path: &str) -> Option<(FileMetadata, ByteStream)> {
        let path = logical(path);
        let key = self.prefixer.apply(path);

        match self.client.get_object(&self.bucket, &key, &self.options).await {
            Ok(output) => {
                let meta = normalize(&self.prefixer, ProviderRecord::Head(&output.head), Some(path));
                Some((meta, output.body))
            }
            Err(e) => {
                debug!("read failed: path={:?}: {}", path, e);
                None
            }
        }
    }
}

/// Logical paths never start with a separator
fn logical(path: &str) -> &str {
    path.trim_start_matches(SEPARATOR)
}

/// Directory operand of create/delete, which never targets the root
fn directory_name(dirname: &str) -> Result<&str> {
    match normalize_directory(dirname) {
        "" => Err(AdapterError::InvalidPath(format!("{:?} is not a directory name", dirname))),
        name => Ok(name),
    }
}

/// Add records for directories implied by deeper entries but never listed
fn emulate_directories(directory: &str, entries: &mut Vec<FileMetadata>) {
    let listed: HashSet<String> = entries
        .iter()
        .filter(|meta| meta.is_dir())
        .map(|meta| meta.path.clone())
        .collect();

    let mut implied = BTreeSet::new();
    for meta in entries.iter() {
        let mut parent = meta.info.dirname.as_str();
        while !parent.is_empty() && parent != directory {
            if !listed.contains(parent) {
                implied.insert(parent.to_string());
            }
            parent = parent.rsplit_once(SEPARATOR).map(|(dir, _)| dir).unwrap_or("");
        }
    }

    entries.extend(implied.into_iter().map(FileMetadata::directory));
}

/// Whether `path` lies strictly below `directory`
fn is_below(directory: &str, path: &str) -> bool {
    if directory.is_empty() {
        return !path.is_empty();
    }
    path.strip_prefix(directory)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .is_some_and(|rest| !rest.is_empty())
}

#[async_trait]
impl<C: ObjectClient> FilesystemAdapter for S3Adapter<C> {
    async fn write(&self, path: &str, contents: Bytes, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        self.upload(path, UploadBody::Bytes(contents), config).await
    }

    async fn write_stream(&self, path: &str, stream: ByteStream, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        let length = config
            .option(MetaOption::ContentLength)
            .and_then(|len| len.parse().ok());
        self.upload(path, UploadBody::Stream { stream, length }, config).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<bool> {
        debug!("rename: {:?} -> {:?}", path, new_path);

        if !self.copy(path, new_path).await? {
            return Ok(false);
        }
        self.delete(path).await
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<bool> {
        let source = self.prefixer.apply(logical(path));
        let destination = self.prefixer.apply(logical(new_path));
        debug!("copy: {} -> {}", source, destination);

        let acl = match self.raw_visibility(&source).await {
            Ok(Visibility::Public) => CannedAcl::PublicRead,
            Ok(Visibility::Private) => CannedAcl::Private,
            Err(e) => {
                debug!("copy failed to read source ACL: key={}: {}", source, e);
                return Ok(false);
            }
        };

        match self
            .client
            .copy_object(&self.bucket, &source, &self.bucket, &destination, acl, &self.options)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("copy failed: {} -> {}: {}", source, destination, e);
                Ok(false)
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.prefixer.apply(logical(path));
        debug!("delete: path={:?} key={}", path, key);

        // Outcome is decided by the existence check below
        if let Err(e) = self.client.delete_object(&self.bucket, &key).await {
            warn!("delete_object failed: key={}: {}", key, e);
        }

        Ok(!self.has(path).await?)
    }

    async fn delete_dir(&self, dirname: &str) -> Result<bool> {
        let prefix = format!("{}{}", self.prefixer.apply(directory_name(dirname)?), SEPARATOR);
        debug!("delete_dir: dirname={:?} prefix={}", dirname, prefix);

        match self.client.delete_matching_objects(&self.bucket, &prefix).await {
            Ok(()) => Ok(true),
            Err(e @ ProviderError::DeleteMultiple { .. }) => {
                warn!("delete_dir failed: prefix={}: {}", prefix, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir(&self, dirname: &str, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        let marker = format!("{}{}", directory_name(dirname)?, SEPARATOR);
        self.upload(&marker, UploadBody::Bytes(Bytes::new()), config).await
    }

    async fn has(&self, path: &str) -> Result<bool> {
        let key = self.prefixer.apply(logical(path));
        trace!("has: path={:?} key={}", path, key);

        if self.client.does_object_exist(&self.bucket, &key, &self.options).await? {
            return Ok(true);
        }
        self.does_directory_exist(&key).await
    }

    async fn read(&self, path: &str) -> Result<Option<ReadOutput>> {
        let Some((metadata, mut stream)) = self.fetch(path).await else {
            return Ok(None);
        };

        let mut contents = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => contents.extend_from_slice(&chunk),
                Err(e) => {
                    warn!("read interrupted: path={:?}: {}", metadata.path, e);
                    return Ok(None);
                }
            }
        }

        Ok(Some(ReadOutput {
            metadata,
            body: ObjectBody::Contents(contents.freeze()),
        }))
    }

    async fn read_stream(&self, path: &str) -> Result<Option<ReadOutput>> {
        Ok(self.fetch(path).await.map(|(metadata, stream)| ReadOutput {
            metadata,
            body: ObjectBody::Stream(stream),
        }))
    }

    async fn list_contents(&self, directory: &str, recursive: bool) -> Result<Vec<FileMetadata>> {
        let directory = normalize_directory(directory);
        let request = ListRequest {
            bucket: self.bucket.clone(),
            prefix: self.prefixer.directory_prefix(directory),
            delimiter: (!recursive).then(|| SEPARATOR.to_string()),
            max_keys: None,
        };
        debug!(
            "list_contents: directory={:?} recursive={} prefix={}",
            directory, recursive, request.prefix
        );

        let mut entries = Vec::new();
        let mut token = None;
        loop {
            let page = self.client.list_objects_page(&request, token.take()).await?;

            for entry in &page.contents {
                entries.push(normalize(&self.prefixer, ProviderRecord::Object(entry), None));
            }
            for prefix in &page.common_prefixes {
                entries.push(normalize(&self.prefixer, ProviderRecord::CommonPrefix(prefix), None));
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        entries.retain(|meta| is_below(directory, &meta.path));
        emulate_directories(directory, &mut entries);

        let mut seen = HashSet::new();
        entries.retain(|meta| seen.insert(meta.path.clone()));

        for meta in entries.iter_mut().filter(|meta| meta.is_file()) {
            if meta.mimetype.is_none() {
                meta.mimetype = Some(mime::detect(&meta.path));
            }
        }

        let listing: HashMap<String, FileMetadata> = entries
            .iter()
            .map(|meta| (meta.path.clone(), meta.clone()))
            .collect();
        for meta in &entries {
            self.cache.insert(meta.clone());
        }
        self.session.put_listing(&self.scope, directory, listing);

        Ok(entries)
    }

    async fn get_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        let path = logical(path);

        if let Some(meta) = self.cache.get(path) {
            trace!("get_metadata: cache hit path={:?}", path);
            return Ok(Some(meta));
        }

        if let Some(meta) = self.session.lookup(&self.scope, path) {
            trace!("get_metadata: session hit path={:?}", path);
            self.cache.insert(meta.clone());
            return Ok(Some(meta));
        }

        let key = self.prefixer.apply(path);
        match self.client.head_object(&self.bucket, &key, &self.options).await {
            Ok(head) => {
                let meta = normalize(&self.prefixer, ProviderRecord::Head(&head), Some(path));
                self.cache.insert(meta.clone());
                Ok(Some(meta))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_mimetype(&self, path: &str) -> Result<String> {
        Ok(mime::detect(logical(path)))
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<Option<FileMetadata>> {
        let path = logical(path);
        let key = self.prefixer.apply(path);
        let acl = match visibility {
            Visibility::Public => CannedAcl::PublicRead,
            Visibility::Private => CannedAcl::Private,
        };
        debug!("set_visibility: path={:?} visibility={}", path, visibility);

        match self.client.put_object_acl(&self.bucket, &key, acl).await {
            Ok(()) => {
                let mut meta = FileMetadata::file(path);
                meta.visibility = Some(visibility);
                Ok(Some(meta))
            }
            Err(e) => {
                debug!("set_visibility failed: key={}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn get_visibility(&self, path: &str) -> Result<Visibility> {
        let key = self.prefixer.apply(logical(path));
        Ok(self.raw_visibility(&key).await?)
    }
}
