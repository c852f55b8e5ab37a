//! Common test utilities and fixtures
//!
//! Every test gets its own [`TestHarness`]: a fresh in-memory store and an
//! adapter over it. Additional adapters over the same store can be created to
//! exercise session sharing.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use s3_fs_adapter::adapter::{FilesystemAdapter, S3Adapter};
use s3_fs_adapter::cache::SessionStore;
use s3_fs_adapter::client::memory::MemoryClient;
use s3_fs_adapter::client::ByteStream;
use s3_fs_adapter::config::WriteConfig;
use s3_fs_adapter::metadata::FileMetadata;
use tracing_subscriber::EnvFilter;

pub const BUCKET: &str = "test-bucket";

/// Initialize logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Adapter over a private in-memory store
pub struct TestHarness {
    pub client: Arc<MemoryClient>,
    pub adapter: S3Adapter<MemoryClient>,
    prefix: String,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self::with_client(MemoryClient::new(), prefix)
    }

    pub fn with_client(client: MemoryClient, prefix: &str) -> Self {
        init_logging();
        let client = Arc::new(client);
        let adapter = S3Adapter::new(client.clone(), BUCKET, prefix);
        Self {
            client,
            adapter,
            prefix: prefix.to_string(),
        }
    }

    /// A second adapter over the same store and prefix
    pub fn another_adapter(&self) -> S3Adapter<MemoryClient> {
        S3Adapter::new(self.client.clone(), BUCKET, &self.prefix)
    }

    /// Replace the harness adapter with one sharing `store`
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.adapter = self.another_adapter().with_session_store(store);
        self
    }

    /// Physical key of a logical path
    pub fn key(&self, path: &str) -> String {
        self.adapter.prefixer().apply(path)
    }

    /// Write a file with default settings
    pub async fn put(&self, path: &str, content: &str) -> Result<FileMetadata> {
        self.adapter
            .write(path, Bytes::copy_from_slice(content.as_bytes()), &WriteConfig::new())
            .await?
            .with_context(|| format!("write of {} reported failure", path))
    }

    /// Read a file and decode it as UTF-8
    pub async fn read_string(&self, path: &str) -> Result<Option<String>> {
        match self.adapter.read(path).await? {
            Some(output) => {
                let data = output.contents().context("buffered read returned a stream")?;
                Ok(Some(String::from_utf8(data.to_vec())?))
            }
            None => Ok(None),
        }
    }

    /// Sorted paths of a listing
    pub async fn list_paths(&self, directory: &str, recursive: bool) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .adapter
            .list_contents(directory, recursive)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Byte stream yielding `chunks` in order
pub fn stream_of(chunks: &[&'static str]) -> ByteStream {
    let items: Vec<std::io::Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    Box::pin(stream::iter(items))
}

/// Drain a byte stream into memory
pub async fn collect(mut stream: ByteStream) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}
