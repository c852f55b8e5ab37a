//! S3 client implementation
//!
//! Talks to Amazon S3 or S3-compatible storage (MinIO, LocalStack, etc.)
//! through the AWS SDK. Large uploads are split into a multipart upload.

use std::io;

use async_stream::stream;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as SdkByteStream, DateTime as SdkDateTime, DateTimeFormat};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectCannedAcl, ObjectIdentifier,
    RequestPayer, ServerSideEncryption, StorageClass,
};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, trace, warn};

use super::{
    ByteStream, CannedAcl, GetObjectOutput, Grant, HeadObjectOutput, ListPage, ListRequest,
    ObjectClient, ObjectEntry, Permission, ProviderResult, UploadBody, UploadOutput,
};
use crate::config::{MetaOption, ObjectOptions, S3Config};
use crate::error::ProviderError;

/// Maximum number of keys a single DeleteObjects request accepts
const DELETE_BATCH_SIZE: usize = 1000;

/// Characters escaped in a copy source key. Unreserved characters and `/` pass through.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Map an SDK error to a provider error, keeping the HTTP status
fn provider_error<E>(operation: &'static str, key: &str, err: SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    match status {
        Some(404) => ProviderError::not_found(key),
        Some(status) => ProviderError::Service {
            operation,
            status,
            code,
            message,
        },
        None => ProviderError::Transport { operation, message },
    }
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Percent-encode a key for use in a copy source header
fn encode_copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

/// Apply the write-time meta-options shared by PutObject, CreateMultipartUpload
/// and CopyObject request builders
macro_rules! apply_write_options {
    ($builder:expr, $options:expr) => {{
        let mut builder = $builder;
        for (option, value) in $options.iter() {
            builder = match option {
                MetaOption::CacheControl => builder.cache_control(value),
                MetaOption::ContentDisposition => builder.content_disposition(value),
                MetaOption::ContentEncoding => builder.content_encoding(value),
                MetaOption::ContentType => builder.content_type(value),
                MetaOption::Expires => match SdkDateTime::from_str(value, DateTimeFormat::HttpDate) {
                    Ok(expires) => builder.expires(expires),
                    Err(e) => {
                        warn!("ignoring unparseable Expires option {:?}: {}", value, e);
                        builder
                    }
                },
                MetaOption::GrantFullControl => builder.grant_full_control(value),
                MetaOption::GrantRead => builder.grant_read(value),
                MetaOption::GrantReadAcp => builder.grant_read_acp(value),
                MetaOption::GrantWriteAcp => builder.grant_write_acp(value),
                MetaOption::RequestPayer => builder.request_payer(RequestPayer::from(value)),
                MetaOption::SseCustomerAlgorithm => builder.sse_customer_algorithm(value),
                MetaOption::SseCustomerKey => builder.sse_customer_key(value),
                MetaOption::SseCustomerKeyMd5 => builder.sse_customer_key_md5(value),
                MetaOption::SseKmsKeyId => builder.ssekms_key_id(value),
                MetaOption::ServerSideEncryption => {
                    builder.server_side_encryption(ServerSideEncryption::from(value))
                }
                MetaOption::StorageClass => builder.storage_class(StorageClass::from(value)),
                MetaOption::Tagging => builder.tagging(value),
                MetaOption::WebsiteRedirectLocation => builder.website_redirect_location(value),
                // ACL travels as an explicit argument; length is request specific
                MetaOption::Acl | MetaOption::ContentLength => builder,
            };
        }
        if !$options.metadata().is_empty() {
            builder = builder.set_metadata(Some($options.metadata().clone()));
        }
        builder
    }};
}

/// Apply the options that matter when reading an object: customer-provided
/// encryption keys and requester-pays
macro_rules! apply_read_options {
    ($builder:expr, $options:expr) => {{
        let mut builder = $builder;
        if let Some(value) = $options.get(MetaOption::SseCustomerAlgorithm) {
            builder = builder.sse_customer_algorithm(value);
        }
        if let Some(value) = $options.get(MetaOption::SseCustomerKey) {
            builder = builder.sse_customer_key(value);
        }
        if let Some(value) = $options.get(MetaOption::SseCustomerKeyMd5) {
            builder = builder.sse_customer_key_md5(value);
        }
        if let Some(value) = $options.get(MetaOption::RequestPayer) {
            builder = builder.request_payer(RequestPayer::from(value));
        }
        builder
    }};
}

/// S3 client for Amazon S3 and S3-compatible storage
pub struct S3Client {
    client: Client,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Self {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "s3-fs-adapter");
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        if let Some(timeout) = config.timeout {
            sdk_config_builder = sdk_config_builder
                .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::from_client(
            Client::from_conf(s3_config_builder.build()),
            config.multipart_threshold,
            config.part_size,
        )
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, multipart_threshold: u64, part_size: u64) -> Self {
        Self {
            client,
            multipart_threshold,
            part_size,
        }
    }

    fn canned_acl(acl: CannedAcl) -> ObjectCannedAcl {
        ObjectCannedAcl::from(acl.as_str())
    }

    /// Upload `first` plus the rest of `rest` as a multipart upload
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        first: Bytes,
        rest: Option<ByteStream>,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput> {
        let multipart_error = |message: String| ProviderError::MultipartUpload {
            key: key.to_string(),
            message,
        };

        let request = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .acl(Self::canned_acl(acl));
        let created = apply_write_options!(request, options)
            .send()
            .await
            .map_err(|e| multipart_error(format!("CreateMultipartUpload: {}", DisplayErrorContext(&e))))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| multipart_error("CreateMultipartUpload returned no upload id".to_string()))?
            .to_string();

        debug!("multipart upload started: key={} upload_id={}", key, upload_id);

        match self
            .upload_parts(bucket, key, &upload_id, first, rest, options)
            .await
        {
            Ok(parts) => {
                let completed = self
                    .client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await;

                match completed {
                    Ok(output) => Ok(UploadOutput {
                        etag: output.e_tag().map(str::to_string),
                        version_id: output.version_id().map(str::to_string),
                    }),
                    Err(e) => {
                        let message = format!("CompleteMultipartUpload: {}", DisplayErrorContext(&e));
                        self.abort_multipart(bucket, key, &upload_id).await;
                        Err(multipart_error(message))
                    }
                }
            }
            Err(message) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Err(multipart_error(message))
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Bytes,
        rest: Option<ByteStream>,
        options: &ObjectOptions,
    ) -> Result<Vec<CompletedPart>, String> {
        let part_size = self.part_size as usize;
        let mut parts = Vec::new();
        let mut buffer = BytesMut::from(&first[..]);
        let mut rest = rest;

        loop {
            // Fill the buffer to at least one part unless the source is exhausted
            while buffer.len() < part_size {
                let Some(stream) = rest.as_mut() else { break };
                let next = stream.next().await;
                match next {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Err(format!("failed to read upload body: {}", e)),
                    None => rest = None,
                }
            }

            if buffer.is_empty() && !parts.is_empty() {
                break;
            }

            let take = buffer.len().min(part_size);
            let chunk = buffer.split_to(take).freeze();
            let part_number = parts.len() as i32 + 1;
            trace!(
                "upload_part: key={} part={} size={}",
                key,
                part_number,
                chunk.len()
            );

            let request = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(SdkByteStream::from(chunk));
            let output = apply_read_options!(request, options)
                .send()
                .await
                .map_err(|e| format!("UploadPart {}: {}", part_number, DisplayErrorContext(&e)))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            if buffer.is_empty() && rest.is_none() {
                break;
            }
        }

        Ok(parts)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(
                "failed to abort multipart upload {} for {}: {}",
                upload_id,
                key,
                DisplayErrorContext(&e)
            );
        }
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        prefix: &str,
        keys: Vec<String>,
    ) -> ProviderResult<Vec<String>> {
        let delete_error = |message: String| ProviderError::DeleteMultiple {
            prefix: prefix.to_string(),
            failed: Vec::new(),
            message,
        };

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| delete_error(format!("invalid object identifier: {}", e)))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| delete_error(format!("failed to build delete: {}", e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| delete_error(format!("DeleteObjects: {}", DisplayErrorContext(&e))))?;

        Ok(output
            .errors()
            .iter()
            .map(|err| {
                format!(
                    "{} ({})",
                    err.key().unwrap_or("?"),
                    err.code().unwrap_or("unknown")
                )
            })
            .collect())
    }
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
    ) -> ProviderResult<HeadObjectOutput> {
        trace!("head_object: bucket={} key={}", bucket, key);

        let request = self.client.head_object().bucket(bucket).key(key);
        let output = apply_read_options!(request, options)
            .send()
            .await
            .map_err(|e| provider_error("HeadObject", key, e))?;

        Ok(HeadObjectOutput {
            content_length: output.content_length().map(|n| n.max(0) as u64),
            content_type: output.content_type().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
            storage_class: output.storage_class().map(|s| s.as_str().to_string()),
            version_id: output.version_id().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
    ) -> ProviderResult<GetObjectOutput> {
        trace!("get_object: bucket={} key={}", bucket, key);

        let request = self.client.get_object().bucket(bucket).key(key);
        let output = apply_read_options!(request, options)
            .send()
            .await
            .map_err(|e| provider_error("GetObject", key, e))?;

        let head = HeadObjectOutput {
            content_length: output.content_length().map(|n| n.max(0) as u64),
            content_type: output.content_type().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
            storage_class: output.storage_class().map(|s| s.as_str().to_string()),
            version_id: output.version_id().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        };

        let mut body = output.body;
        let stream: ByteStream = Box::pin(stream! {
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(io::Error::new(io::ErrorKind::Other, e));
                        break;
                    }
                }
            }
        });

        Ok(GetObjectOutput { head, body: stream })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput> {
        trace!("put_object: bucket={} key={} size={}", bucket, key, body.len());

        let length = body.len() as i64;
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .acl(Self::canned_acl(acl))
            .content_length(length)
            .body(SdkByteStream::from(body));
        let output = apply_write_options!(request, options)
            .send()
            .await
            .map_err(|e| provider_error("PutObject", key, e))?;

        Ok(UploadOutput {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<UploadOutput> {
        match body {
            UploadBody::Bytes(data) if (data.len() as u64) <= self.multipart_threshold => {
                self.put_object(bucket, key, data, acl, options).await
            }
            UploadBody::Bytes(data) => {
                self.multipart_upload(bucket, key, data, None, acl, options)
                    .await
            }
            UploadBody::Stream { mut stream, .. } => {
                // Buffer up to the threshold to decide between single put and multipart
                let mut head = BytesMut::new();
                let mut exhausted = false;
                while (head.len() as u64) <= self.multipart_threshold {
                    match stream.next().await {
                        Some(Ok(chunk)) => head.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            return Err(ProviderError::MultipartUpload {
                                key: key.to_string(),
                                message: format!("failed to read upload body: {}", e),
                            })
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }

                if exhausted {
                    self.put_object(bucket, key, head.freeze(), acl, options)
                        .await
                } else {
                    self.multipart_upload(bucket, key, head.freeze(), Some(stream), acl, options)
                        .await
                }
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        trace!("delete_object: bucket={} key={}", bucket, key);

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| provider_error("DeleteObject", key, e))?;

        Ok(())
    }

    async fn delete_matching_objects(&self, bucket: &str, prefix: &str) -> ProviderResult<()> {
        debug!("delete_matching_objects: bucket={} prefix={}", bucket, prefix);

        let request = ListRequest {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: None,
            max_keys: Some(DELETE_BATCH_SIZE as i32),
        };

        let mut failed = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .list_objects_page(&request, token.take())
                .await
                .map_err(|e| ProviderError::DeleteMultiple {
                    prefix: prefix.to_string(),
                    failed: Vec::new(),
                    message: e.to_string(),
                })?;

            let keys: Vec<String> = page.contents.into_iter().map(|e| e.key).collect();
            if !keys.is_empty() {
                failed.extend(self.delete_batch(bucket, prefix, keys).await?);
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::DeleteMultiple {
                prefix: prefix.to_string(),
                message: format!("could not delete: {}", failed.join(", ")),
                failed,
            })
        }
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
        options: &ObjectOptions,
    ) -> ProviderResult<()> {
        trace!(
            "copy_object: {}/{} -> {}/{}",
            source_bucket,
            source_key,
            bucket,
            key
        );

        let mut request = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(encode_copy_source(source_bucket, source_key))
            .acl(Self::canned_acl(acl));

        // Source-side SSE-C keys mirror the destination keys
        if let Some(value) = options.get(MetaOption::SseCustomerAlgorithm) {
            request = request.copy_source_sse_customer_algorithm(value);
        }
        if let Some(value) = options.get(MetaOption::SseCustomerKey) {
            request = request.copy_source_sse_customer_key(value);
        }
        if let Some(value) = options.get(MetaOption::SseCustomerKeyMd5) {
            request = request.copy_source_sse_customer_key_md5(value);
        }

        apply_write_options!(request, options)
            .send()
            .await
            .map_err(|e| provider_error("CopyObject", source_key, e))?;

        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> ProviderResult<Vec<Grant>> {
        trace!("get_object_acl: bucket={} key={}", bucket, key);

        let output = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| provider_error("GetObjectAcl", key, e))?;

        Ok(output
            .grants()
            .iter()
            .map(|grant| Grant {
                grantee_uri: grant.grantee().and_then(|g| g.uri()).map(str::to_string),
                grantee_id: grant.grantee().and_then(|g| g.id()).map(str::to_string),
                permission: grant
                    .permission()
                    .map(|p| Permission::parse(p.as_str()))
                    .unwrap_or_else(|| Permission::Other(String::new())),
            })
            .collect())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> ProviderResult<()> {
        trace!("put_object_acl: bucket={} key={} acl={}", bucket, key, acl.as_str());

        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(Self::canned_acl(acl))
            .send()
            .await
            .map_err(|e| provider_error("PutObjectAcl", key, e))?;

        Ok(())
    }

    async fn list_objects_page(
        &self,
        request: &ListRequest,
        token: Option<String>,
    ) -> ProviderResult<ListPage> {
        trace!(
            "list_objects_page: bucket={} prefix={} delimiter={:?}",
            request.bucket,
            request.prefix,
            request.delimiter
        );

        let result = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_max_keys(request.max_keys)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| provider_error("ListObjectsV2", &request.prefix, e))?;

        let contents = result
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: obj.size().map(|n| n.max(0) as u64),
                    last_modified: obj.last_modified().and_then(to_chrono),
                    etag: obj.e_tag().map(str::to_string),
                    storage_class: obj.storage_class().map(|s| s.as_str().to_string()),
                })
            })
            .collect();

        let common_prefixes = result
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();

        let next_token = if result.is_truncated().unwrap_or(false) {
            result.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            contents,
            common_prefixes,
            next_token,
        })
    }
}
