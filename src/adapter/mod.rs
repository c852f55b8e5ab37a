//! Filesystem adapter interface
//!
//! Adapters are path-based: each operation receives a logical path, resolves
//! it to a storage key and performs the requested action. Expected outcomes
//! such as a missing object or a failed bulk delete come back as `None` or
//! `false`; only unexpected provider errors are returned as `Err`.

pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::ByteStream;
use crate::config::WriteConfig;
use crate::error::Result;
use crate::metadata::{FileMetadata, ReadOutput, Visibility};

pub use s3::S3Adapter;

/// Core adapter trait
#[async_trait]
pub trait FilesystemAdapter: Send + Sync {
    /// Write a new file from a buffer
    ///
    /// Returns `None` when the upload could not be completed.
    async fn write(&self, path: &str, contents: Bytes, config: &WriteConfig) -> Result<Option<FileMetadata>>;

    /// Overwrite a file from a buffer
    ///
    /// Object stores make no distinction between creating and replacing.
    async fn update(&self, path: &str, contents: Bytes, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        self.write(path, contents, config).await
    }

    /// Write a new file from a byte stream
    ///
    /// The content length is only known when the `ContentLength` option is set.
    async fn write_stream(&self, path: &str, stream: ByteStream, config: &WriteConfig) -> Result<Option<FileMetadata>>;

    /// Overwrite a file from a byte stream
    async fn update_stream(&self, path: &str, stream: ByteStream, config: &WriteConfig) -> Result<Option<FileMetadata>> {
        self.write_stream(path, stream, config).await
    }

    /// Move a file, reporting `false` if either the copy or the delete failed
    async fn rename(&self, path: &str, new_path: &str) -> Result<bool>;

    /// Copy a file, keeping its visibility
    async fn copy(&self, path: &str, new_path: &str) -> Result<bool>;

    /// Delete a file, reporting whether it is gone afterwards
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Delete a directory and everything below it
    async fn delete_dir(&self, dirname: &str) -> Result<bool>;

    /// Create an empty directory marker
    async fn create_dir(&self, dirname: &str, config: &WriteConfig) -> Result<Option<FileMetadata>>;

    /// Check whether a file or directory exists
    async fn has(&self, path: &str) -> Result<bool>;

    /// Read a file into memory
    async fn read(&self, path: &str) -> Result<Option<ReadOutput>>;

    /// Open a file as a byte stream
    async fn read_stream(&self, path: &str) -> Result<Option<ReadOutput>>;

    /// List the contents of a directory
    async fn list_contents(&self, directory: &str, recursive: bool) -> Result<Vec<FileMetadata>>;

    /// Get metadata for a path, `None` if it does not exist
    async fn get_metadata(&self, path: &str) -> Result<Option<FileMetadata>>;

    async fn get_size(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.get_metadata(path).await?.and_then(|meta| meta.size))
    }

    /// Resolve the MIME type for a path without querying storage
    async fn get_mimetype(&self, path: &str) -> Result<String>;

    async fn get_timestamp(&self, path: &str) -> Result<Option<i64>> {
        Ok(self.get_metadata(path).await?.and_then(|meta| meta.timestamp))
    }

    /// Change visibility, returning the path and applied visibility
    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<Option<FileMetadata>>;

    async fn get_visibility(&self, path: &str) -> Result<Visibility>;
}
