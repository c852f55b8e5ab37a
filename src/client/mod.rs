//! Object storage client abstraction
//!
//! The adapter only ever talks to storage through [`ObjectClient`], a narrow
//! interface over the handful of calls it needs. The production
//! implementation wraps the AWS SDK; an in-memory implementation backs tests
//! and local development.

pub mod memory;
pub mod s3;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};

use crate::config::ObjectOptions;
use crate::error::ProviderError;

/// Well-known grantee URI for anonymous (public) access
pub const PUBLIC_GRANT_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Detachable stream of object bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Result type for storage client calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Upload payload
pub enum UploadBody {
    Bytes(Bytes),
    Stream {
        stream: ByteStream,
        /// Total length when known up front
        length: Option<u64>,
    },
}

impl UploadBody {
    /// Content length, when it can be determined without consuming the body
    pub fn known_length(&self) -> Option<u64> {
        match self {
            UploadBody::Bytes(data) => Some(data.len() as u64),
            UploadBody::Stream { length, .. } => *length,
        }
    }

    /// Buffer the whole body in memory
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            UploadBody::Bytes(data) => Ok(data),
            UploadBody::Stream { stream, length } => {
                let capacity = length.unwrap_or(0).min(64 * 1024 * 1024) as usize;
                let buf = stream
                    .try_fold(BytesMut::with_capacity(capacity), |mut buf, chunk| async move {
                        buf.extend_from_slice(&chunk);
                        Ok(buf)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            UploadBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

impl From<Bytes> for UploadBody {
    fn from(data: Bytes) -> Self {
        UploadBody::Bytes(data)
    }
}

/// Canned ACL applied on upload, copy and ACL updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
            CannedAcl::AwsExecRead => "aws-exec-read",
            CannedAcl::BucketOwnerRead => "bucket-owner-read",
            CannedAcl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(CannedAcl::Private),
            "public-read" => Some(CannedAcl::PublicRead),
            "public-read-write" => Some(CannedAcl::PublicReadWrite),
            "authenticated-read" => Some(CannedAcl::AuthenticatedRead),
            "aws-exec-read" => Some(CannedAcl::AwsExecRead),
            "bucket-owner-read" => Some(CannedAcl::BucketOwnerRead),
            "bucket-owner-full-control" => Some(CannedAcl::BucketOwnerFullControl),
            _ => None,
        }
    }

    /// Whether the ACL grants anonymous read access
    pub fn is_public(&self) -> bool {
        matches!(self, CannedAcl::PublicRead | CannedAcl::PublicReadWrite)
    }
}

/// Permission carried by an ACL grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    FullControl,
    Read,
    ReadAcp,
    Write,
    WriteAcp,
    Other(String),
}

impl Permission {
    pub fn parse(s: &str) -> Self {
        match s {
            "FULL_CONTROL" => Permission::FullControl,
            "READ" => Permission::Read,
            "READ_ACP" => Permission::ReadAcp,
            "WRITE" => Permission::Write,
            "WRITE_ACP" => Permission::WriteAcp,
            other => Permission::Other(other.to_string()),
        }
    }
}

/// Single ACL grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Group URI, for group grantees
    pub grantee_uri: Option<String>,
    /// Canonical user id, for user grantees
    pub grantee_id: Option<String>,
    pub permission: Permission,
}

impl Grant {
    /// Whether this grant lets anonymous users read the object
    pub fn is_public_read(&self) -> bool {
        self.grantee_uri.as_deref() == Some(PUBLIC_GRANT_URI) && self.permission == Permission::Read
    }
}

/// Object head fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadObjectOutput {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
    pub version_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Object fetched with GetObject
pub struct GetObjectOutput {
    pub head: HeadObjectOutput,
    pub body: ByteStream,
}

/// Object listed by ListObjects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

/// Provider-reported fields of a completed upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Listing parameters
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: Option<i32>,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub contents: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    /// Token for the next page; `None` when the listing is exhausted
    pub next_token: Option<String>,
}

/// Storage operations consumed by the adapter
///
/// Every call maps a missing object to [`ProviderError::NotFound`]; any other
/// failure carries the provider's status code when one was received.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
    ) -> ProviderResult<HeadObjectOutput>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
    ) -> ProviderResult<GetObjectOutput>;

    /// Store an object in a single request
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput>;

    /// Store an object, switching to a multipart upload when the client
    /// supports it
    ///
    /// Fails with [`ProviderError::MultipartUpload`] when the upload could not
    /// be completed.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput> {
        let data = body.collect().await.map_err(|e| ProviderError::MultipartUpload {
            key: key.to_string(),
            message: format!("failed to read upload body: {}", e),
        })?;
        self.put_object(bucket, key, data, acl, options).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()>;

    /// Delete every object whose key starts with `prefix`
    ///
    /// Fails with [`ProviderError::DeleteMultiple`] when any object could not
    /// be removed.
    async fn delete_matching_objects(&self, bucket: &str, prefix: &str) -> ProviderResult<()>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<()>;

    async fn get_object_acl(&self, bucket: &str, key: &str) -> ProviderResult<Vec<Grant>>;

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> ProviderResult<()>;

    /// Fetch one page of a listing, starting after `token`
    async fn list_objects_page(
        &self,
        request: &ListRequest,
        token: Option<String>,
    ) -> ProviderResult<ListPage>;

    /// Check whether an object exists at exactly `key`
    ///
    /// Access denied counts as existing; server and transport errors propagate.
    async fn does_object_exist(
        &self,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
    ) -> ProviderResult<bool> {
        match self.head_object(bucket, key, options).await {
            Ok(_) => Ok(true),
            Err(e) => match e.status() {
                Some(403) => Ok(true),
                Some(status) if status < 500 => Ok(false),
                _ => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_public_read_grant() {
        let grant = Grant {
            grantee_uri: Some(PUBLIC_GRANT_URI.to_string()),
            grantee_id: None,
            permission: Permission::Read,
        };
        assert!(grant.is_public_read());

        let write = Grant {
            permission: Permission::Write,
            ..grant.clone()
        };
        assert!(!write.is_public_read());

        let owner = Grant {
            grantee_uri: None,
            grantee_id: Some("owner".to_string()),
            permission: Permission::Read,
        };
        assert!(!owner.is_public_read());
    }

    #[test]
    fn test_canned_acl_strings() {
        assert_eq!(CannedAcl::parse("public-read"), Some(CannedAcl::PublicRead));
        assert_eq!(CannedAcl::parse(CannedAcl::Private.as_str()), Some(CannedAcl::Private));
        assert_eq!(CannedAcl::parse("log-delivery-write"), None);
        assert!(CannedAcl::PublicReadWrite.is_public());
        assert_eq!(Permission::parse("READ"), Permission::Read);
    }

    #[tokio::test]
    async fn test_collect_stream_body() {
        let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"buy ")), Ok(Bytes::from_static(b"milk"))];
        let body = UploadBody::Stream {
            stream: Box::pin(stream::iter(chunks)),
            length: None,
        };
        assert_eq!(body.known_length(), None);
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"buy milk"));
    }
}
