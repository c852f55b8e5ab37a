//! Normalized metadata records
//!
//! Every read, stat and listing operation returns the same record shape no
//! matter which provider response it was built from.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{ByteStream, HeadObjectOutput, ObjectEntry, UploadOutput};
use crate::path::{PathInfo, PathPrefixer, SEPARATOR};

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    File,
    Dir,
}

/// Access classification derived from ACL grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// Canonical metadata record
///
/// `path` never carries the adapter's key prefix, and directory records never
/// carry size, mimetype or provider passthrough fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(flatten)]
    pub info: PathInfo,
    /// Last modification time as unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storageclass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versionid: Option<String>,
}

impl FileMetadata {
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path.into(), ObjectType::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        let path: String = path.into();
        Self::new(path.trim_end_matches(SEPARATOR).to_string(), ObjectType::Dir)
    }

    fn new(path: String, object_type: ObjectType) -> Self {
        Self {
            info: PathInfo::from_path(&path),
            path,
            object_type,
            timestamp: None,
            size: None,
            mimetype: None,
            visibility: None,
            metadata: None,
            storageclass: None,
            etag: None,
            versionid: None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.object_type, ObjectType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.object_type, ObjectType::Dir)
    }
}

/// Object content returned by a read
pub enum ObjectBody {
    /// Fully buffered content
    Contents(Bytes),
    /// Detached byte stream, consumed by the caller
    Stream(ByteStream),
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBody::Contents(data) => f.debug_tuple("Contents").field(&data.len()).finish(),
            ObjectBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of `read` / `read_stream`
#[derive(Debug)]
pub struct ReadOutput {
    pub metadata: FileMetadata,
    pub body: ObjectBody,
}

impl ReadOutput {
    /// Buffered content, if this was a buffered read
    pub fn contents(&self) -> Option<&Bytes> {
        match &self.body {
            ObjectBody::Contents(data) => Some(data),
            ObjectBody::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ByteStream> {
        match self.body {
            ObjectBody::Stream(stream) => Some(stream),
            ObjectBody::Contents(_) => None,
        }
    }
}

/// Field set of a completed upload, as the adapter knows it
#[derive(Debug, Clone, Default)]
pub struct UploadRecord {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub storage_class: Option<String>,
    pub output: UploadOutput,
}

/// Provider response shapes accepted by [`normalize`]
#[derive(Debug, Clone, Copy)]
pub enum ProviderRecord<'a> {
    Head(&'a HeadObjectOutput),
    Object(&'a ObjectEntry),
    CommonPrefix(&'a str),
    Upload(&'a UploadRecord),
}

impl ProviderRecord<'_> {
    fn key(&self) -> Option<&str> {
        match self {
            ProviderRecord::Object(entry) => Some(&entry.key),
            ProviderRecord::CommonPrefix(prefix) => Some(prefix),
            ProviderRecord::Head(_) | ProviderRecord::Upload(_) => None,
        }
    }

    fn last_modified(&self) -> Option<&DateTime<Utc>> {
        match self {
            ProviderRecord::Head(head) => head.last_modified.as_ref(),
            ProviderRecord::Object(entry) => entry.last_modified.as_ref(),
            ProviderRecord::CommonPrefix(_) | ProviderRecord::Upload(_) => None,
        }
    }
}

/// Convert a provider response into a normalized record
///
/// `path` is the logical path when the caller knows it; otherwise it is
/// derived from the key carried by the response.
pub fn normalize(prefixer: &PathPrefixer, record: ProviderRecord<'_>, path: Option<&str>) -> FileMetadata {
    let path = match path {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => prefixer.remove(record.key().unwrap_or_default()).to_string(),
    };

    let timestamp = record.last_modified().map(|dt| dt.timestamp());

    if path.ends_with(SEPARATOR) {
        let mut meta = FileMetadata::directory(path);
        meta.timestamp = timestamp;
        return meta;
    }

    let mut meta = FileMetadata::file(path);
    meta.timestamp = timestamp;

    match record {
        ProviderRecord::Head(head) => {
            meta.size = head.content_length;
            meta.mimetype = head.content_type.clone();
            meta.metadata = (!head.metadata.is_empty()).then(|| head.metadata.clone());
            meta.storageclass = head.storage_class.clone();
            meta.etag = head.etag.clone();
            meta.versionid = head.version_id.clone();
        }
        ProviderRecord::Object(entry) => {
            meta.size = entry.size;
            meta.storageclass = entry.storage_class.clone();
            meta.etag = entry.etag.clone();
        }
        ProviderRecord::Upload(upload) => {
            meta.size = upload.content_length;
            meta.mimetype = upload.content_type.clone();
            meta.metadata = upload.metadata.clone();
            meta.storageclass = upload.storage_class.clone();
            meta.etag = upload.output.etag.clone();
            meta.versionid = upload.output.version_id.clone();
        }
        ProviderRecord::CommonPrefix(_) => {}
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prefixer() -> PathPrefixer {
        PathPrefixer::new("root")
    }

    #[test]
    fn test_normalize_head_with_known_path() {
        let head = HeadObjectOutput {
            content_length: Some(8),
            content_type: Some("text/plain".to_string()),
            last_modified: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            etag: Some("\"abc\"".to_string()),
            storage_class: Some("STANDARD".to_string()),
            version_id: Some("v1".to_string()),
            metadata: HashMap::from([("owner".to_string(), "me".to_string())]),
        };

        let meta = normalize(&prefixer(), ProviderRecord::Head(&head), Some("notes/todo.txt"));
        assert_eq!(meta.path, "notes/todo.txt");
        assert_eq!(meta.object_type, ObjectType::File);
        assert_eq!(meta.size, Some(8));
        assert_eq!(meta.mimetype.as_deref(), Some("text/plain"));
        assert_eq!(meta.timestamp, Some(1704164645));
        assert_eq!(meta.etag.as_deref(), Some("\"abc\""));
        assert_eq!(meta.storageclass.as_deref(), Some("STANDARD"));
        assert_eq!(meta.versionid.as_deref(), Some("v1"));
        assert_eq!(meta.info.extension.as_deref(), Some("txt"));
        assert_eq!(meta.metadata.unwrap().get("owner").map(String::as_str), Some("me"));
    }

    #[test]
    fn test_normalize_entry_strips_prefix() {
        let entry = ObjectEntry {
            key: "root/a/b.txt".to_string(),
            size: Some(3),
            ..Default::default()
        };
        let meta = normalize(&prefixer(), ProviderRecord::Object(&entry), None);
        assert_eq!(meta.path, "a/b.txt");
        assert_eq!(meta.info.dirname, "a");
        assert_eq!(meta.size, Some(3));
        assert!(meta.is_file());
    }

    #[test]
    fn test_normalize_common_prefix_is_directory() {
        let meta = normalize(&prefixer(), ProviderRecord::CommonPrefix("root/a/sub/"), None);
        assert_eq!(meta.path, "a/sub");
        assert!(meta.is_dir());
        assert_eq!(meta.size, None);
        assert_eq!(meta.mimetype, None);
    }

    #[test]
    fn test_normalize_directory_marker_drops_file_fields() {
        let entry = ObjectEntry {
            key: "root/a/".to_string(),
            size: Some(0),
            etag: Some("\"d41d\"".to_string()),
            last_modified: Some(Utc.timestamp_opt(100, 0).unwrap()),
            ..Default::default()
        };
        let meta = normalize(&prefixer(), ProviderRecord::Object(&entry), None);
        assert_eq!(meta.path, "a");
        assert!(meta.is_dir());
        assert_eq!(meta.timestamp, Some(100));
        assert_eq!(meta.size, None);
        assert_eq!(meta.etag, None);
    }

    #[test]
    fn test_normalize_upload() {
        let upload = UploadRecord {
            content_length: Some(8),
            content_type: Some("text/plain".to_string()),
            output: UploadOutput {
                etag: Some("\"e\"".to_string()),
                version_id: None,
            },
            ..Default::default()
        };
        let meta = normalize(&prefixer(), ProviderRecord::Upload(&upload), Some("notes/todo.txt"));
        assert_eq!(meta.size, Some(8));
        assert_eq!(meta.mimetype.as_deref(), Some("text/plain"));
        assert_eq!(meta.etag.as_deref(), Some("\"e\""));
        assert_eq!(meta.timestamp, None);
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        assert_eq!("private".parse::<Visibility>(), Ok(Visibility::Private));
        assert!("world".parse::<Visibility>().is_err());
        assert_eq!(Visibility::Public.to_string(), "public");
    }
}
