//! Configuration parsing and structures

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;
use crate::metadata::Visibility;

/// Smallest part size S3 accepts for all but the last part of a multipart upload
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default size above which uploads switch to multipart
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default multipart part size
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Key under which user metadata is carried in option maps
pub const METADATA_KEY: &str = "Metadata";

// =============================================================================
// Provider options
// =============================================================================

/// Provider meta-options recognized on write-style calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaOption {
    Acl,
    CacheControl,
    ContentDisposition,
    ContentEncoding,
    ContentLength,
    ContentType,
    Expires,
    GrantFullControl,
    GrantRead,
    GrantReadAcp,
    GrantWriteAcp,
    RequestPayer,
    SseCustomerAlgorithm,
    SseCustomerKey,
    SseCustomerKeyMd5,
    SseKmsKeyId,
    ServerSideEncryption,
    StorageClass,
    Tagging,
    WebsiteRedirectLocation,
}

impl MetaOption {
    pub const ALL: [MetaOption; 20] = [
        MetaOption::Acl,
        MetaOption::CacheControl,
        MetaOption::ContentDisposition,
        MetaOption::ContentEncoding,
        MetaOption::ContentLength,
        MetaOption::ContentType,
        MetaOption::Expires,
        MetaOption::GrantFullControl,
        MetaOption::GrantRead,
        MetaOption::GrantReadAcp,
        MetaOption::GrantWriteAcp,
        MetaOption::RequestPayer,
        MetaOption::SseCustomerAlgorithm,
        MetaOption::SseCustomerKey,
        MetaOption::SseCustomerKeyMd5,
        MetaOption::SseKmsKeyId,
        MetaOption::ServerSideEncryption,
        MetaOption::StorageClass,
        MetaOption::Tagging,
        MetaOption::WebsiteRedirectLocation,
    ];

    /// Provider parameter name
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaOption::Acl => "ACL",
            MetaOption::CacheControl => "CacheControl",
            MetaOption::ContentDisposition => "ContentDisposition",
            MetaOption::ContentEncoding => "ContentEncoding",
            MetaOption::ContentLength => "ContentLength",
            MetaOption::ContentType => "ContentType",
            MetaOption::Expires => "Expires",
            MetaOption::GrantFullControl => "GrantFullControl",
            MetaOption::GrantRead => "GrantRead",
            MetaOption::GrantReadAcp => "GrantReadACP",
            MetaOption::GrantWriteAcp => "GrantWriteACP",
            MetaOption::RequestPayer => "RequestPayer",
            MetaOption::SseCustomerAlgorithm => "SSECustomerAlgorithm",
            MetaOption::SseCustomerKey => "SSECustomerKey",
            MetaOption::SseCustomerKeyMd5 => "SSECustomerKeyMD5",
            MetaOption::SseKmsKeyId => "SSEKMSKeyId",
            MetaOption::ServerSideEncryption => "ServerSideEncryption",
            MetaOption::StorageClass => "StorageClass",
            MetaOption::Tagging => "Tagging",
            MetaOption::WebsiteRedirectLocation => "WebsiteRedirectLocation",
        }
    }
}

impl fmt::Display for MetaOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaOption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetaOption::ALL
            .iter()
            .copied()
            .find(|opt| opt.as_str() == s)
            .ok_or_else(|| ConfigError::ValidationError(format!("Unknown provider option: {}", s)))
    }
}

/// Provider options passed along with storage calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    params: BTreeMap<MetaOption, String>,
    metadata: HashMap<String, String>,
}

impl ObjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, option: MetaOption) -> Option<&str> {
        self.params.get(&option).map(String::as_str)
    }

    pub fn contains(&self, option: MetaOption) -> bool {
        self.params.contains_key(&option)
    }

    pub fn set(&mut self, option: MetaOption, value: impl Into<String>) {
        self.params.insert(option, value.into());
    }

    pub fn with(mut self, option: MetaOption, value: impl Into<String>) -> Self {
        self.set(option, value);
        self
    }

    /// User metadata stored alongside the object
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn set_metadata(&mut self, metadata: HashMap<String, String>) {
        self.metadata = metadata;
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetaOption, &str)> {
        self.params.iter().map(|(opt, value)| (*opt, value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.metadata.is_empty()
    }
}

// =============================================================================
// Per-call configuration
// =============================================================================

/// Configuration passed with a single write-style call
///
/// Recognized keys are `visibility`, `mimetype`, `Metadata` and the provider
/// option names of [`MetaOption`].
#[derive(Debug, Clone, Default)]
pub struct WriteConfig {
    visibility: Option<Visibility>,
    mimetype: Option<String>,
    options: ObjectOptions,
    metadata: Option<HashMap<String, String>>,
}

impl WriteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_option(mut self, option: MetaOption, value: impl Into<String>) -> Self {
        self.options.set(option, value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn visibility(&self) -> Option<Visibility> {
        self.visibility
    }

    pub fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    pub fn option(&self, option: MetaOption) -> Option<&str> {
        self.options.get(option)
    }

    pub fn metadata(&self) -> Option<&HashMap<String, String>> {
        self.metadata.as_ref()
    }

    /// Look up a setting by name
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "visibility" => self.visibility.map(|v| v.as_str().to_string()),
            "mimetype" => self.mimetype.clone(),
            _ => key
                .parse::<MetaOption>()
                .ok()
                .and_then(|opt| self.options.get(opt))
                .map(str::to_string),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        match key {
            METADATA_KEY => self.metadata.is_some(),
            _ => self.get(key).is_some(),
        }
    }
}

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage connection
    pub s3: RawS3Config,

    /// Adapter-wide default provider options
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

/// S3 connection settings before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawS3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Key prefix all logical paths live under
    pub prefix: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,

    /// Static credentials; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    /// Per-operation timeout (e.g., "30s", "1m")
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Size above which uploads use multipart (e.g., "16MB")
    pub multipart_threshold: Option<String>,

    /// Multipart part size (e.g., "8MB")
    pub part_size: Option<String>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Storage connection
    pub s3: S3Config,

    /// Adapter-wide default provider options
    pub options: ObjectOptions,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// S3 connection settings (fully resolved)
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub timeout: Option<Duration>,
    pub multipart_threshold: u64,
    pub part_size: u64,
}

impl S3Config {
    /// Minimal settings for a bucket, everything else defaulted
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            prefix: None,
            endpoint: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            timeout: None,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            s3,
            options,
        } = self;

        Ok(Config {
            logging,
            s3: Self::resolve_s3(s3)?,
            options: Self::resolve_options(options)?,
        })
    }

    fn resolve_s3(raw: RawS3Config) -> Result<S3Config, ConfigError> {
        let multipart_threshold = Self::resolve_size(
            "multipart_threshold",
            raw.multipart_threshold.as_deref(),
            DEFAULT_MULTIPART_THRESHOLD,
        )?;
        let part_size = Self::resolve_size("part_size", raw.part_size.as_deref(), DEFAULT_PART_SIZE)?;

        if raw.access_key_id.is_some() != raw.secret_access_key.is_some() {
            return Err(ConfigError::ValidationError(
                "access_key_id and secret_access_key must be set together".to_string(),
            ));
        }

        Ok(S3Config {
            bucket: raw.bucket,
            region: raw.region,
            prefix: raw.prefix,
            endpoint: raw.endpoint,
            force_path_style: raw.force_path_style,
            access_key_id: raw.access_key_id,
            secret_access_key: raw.secret_access_key,
            timeout: raw.timeout,
            multipart_threshold,
            part_size,
        })
    }

    fn resolve_size(name: &str, value: Option<&str>, default: u64) -> Result<u64, ConfigError> {
        match value {
            None => Ok(default),
            Some(s) => parse_size(s).ok_or_else(|| {
                ConfigError::ValidationError(format!("Invalid size for {}: {:?}", name, s))
            }),
        }
    }

    fn resolve_options(
        raw: BTreeMap<String, serde_yaml::Value>,
    ) -> Result<ObjectOptions, ConfigError> {
        let mut options = ObjectOptions::new();

        for (name, value) in raw {
            if name == METADATA_KEY {
                let metadata: HashMap<String, String> = serde_yaml::from_value(value)
                    .map_err(|e| {
                        ConfigError::ValidationError(format!("Invalid Metadata option: {}", e))
                    })?;
                options.set_metadata(metadata);
                continue;
            }

            let option = name.parse::<MetaOption>()?;
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Option {} must be a scalar, got {:?}",
                        name, other
                    )))
                }
            };
            options.set(option, value);
        }

        Ok(options)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    ///
    /// `${VAR}` references are substituted from the environment first.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "S3 bucket cannot be empty".to_string(),
            ));
        }

        if self.s3.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "part_size must be at least {} bytes, got {}",
                MIN_PART_SIZE, self.s3.part_size
            )));
        }

        if self.s3.multipart_threshold < self.s3.part_size {
            return Err(ConfigError::ValidationError(format!(
                "multipart_threshold ({}) cannot be smaller than part_size ({})",
                self.s3.multipart_threshold, self.s3.part_size
            )));
        }

        if let Some(acl) = self.options.get(MetaOption::Acl) {
            if crate::client::CannedAcl::parse(acl).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown canned ACL: {}",
                    acl
                )));
            }
        }

        Ok(())
    }
}

/// Parse size string like "1GB" to bytes
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (num_part, suffix) = if s.ends_with("GB") {
        (&s[..s.len() - 2], 1024 * 1024 * 1024)
    } else if s.ends_with("MB") {
        (&s[..s.len() - 2], 1024 * 1024)
    } else if s.ends_with("KB") {
        (&s[..s.len() - 2], 1024)
    } else if s.ends_with('B') {
        (&s[..s.len() - 1], 1)
    } else {
        (s.as_str(), 1)
    };

    num_part.trim().parse::<u64>().ok()?.checked_mul(suffix)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::error::AdapterError {
    fn from(e: ConfigError) -> Self {
        crate::error::AdapterError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
s3:
  bucket: my-bucket
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.s3.bucket, "my-bucket");
        assert_eq!(config.s3.prefix, None);
        assert_eq!(config.s3.multipart_threshold, DEFAULT_MULTIPART_THRESHOLD);
        assert_eq!(config.s3.part_size, DEFAULT_PART_SIZE);
        assert!(config.options.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
logging:
  level: debug

s3:
  bucket: shared-bucket
  region: us-west-2
  prefix: "uploads/"
  endpoint: "http://localhost:9000"
  force_path_style: true
  timeout: 30s
  multipart_threshold: 32MB
  part_size: 16MB

options:
  CacheControl: "max-age=3600"
  ServerSideEncryption: AES256
  ContentLength: 10
  Metadata:
    owner: team-a
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.s3.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.s3.prefix.as_deref(), Some("uploads/"));
        assert_eq!(config.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.s3.force_path_style);
        assert_eq!(config.s3.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.s3.multipart_threshold, 32 * 1024 * 1024);
        assert_eq!(config.s3.part_size, 16 * 1024 * 1024);

        assert_eq!(config.options.get(MetaOption::CacheControl), Some("max-age=3600"));
        assert_eq!(config.options.get(MetaOption::ServerSideEncryption), Some("AES256"));
        assert_eq!(config.options.get(MetaOption::ContentLength), Some("10"));
        assert_eq!(
            config.options.metadata().get("owner").map(String::as_str),
            Some("team-a")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_option_rejected() {
        let yaml = r#"
s3:
  bucket: b
options:
  NotAnOption: x
"#;
        let err = Config::from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("NotAnOption"));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("S3FS_TEST_BUCKET", "from-env");
        let yaml = r#"
s3:
  bucket: ${S3FS_TEST_BUCKET}
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.s3.bucket, "from-env");
        std::env::remove_var("S3FS_TEST_BUCKET");
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let yaml = r#"
s3:
  bucket: b
  access_key_id: AKIA
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn test_validate() {
        let yaml = r#"
s3:
  bucket: ""
"#;
        assert!(Config::from_str(yaml).unwrap().validate().is_err());

        let yaml = r#"
s3:
  bucket: b
  part_size: 1MB
"#;
        assert!(Config::from_str(yaml).unwrap().validate().is_err());

        let yaml = r#"
s3:
  bucket: b
  multipart_threshold: 8MB
  part_size: 10MB
"#;
        assert!(Config::from_str(yaml).unwrap().validate().is_err());

        let yaml = r#"
s3:
  bucket: b
options:
  ACL: everyone-writes
"#;
        assert!(Config::from_str(yaml).unwrap().validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("500MB"), Some(500 * 1024 * 1024));
        assert_eq!(parse_size("100KB"), Some(100 * 1024));
        assert_eq!(parse_size("1024B"), Some(1024));
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("99999999999GB"), None);
    }

    #[test]
    fn test_oversized_part_size_rejected() {
        let yaml = r#"
s3:
  bucket: b
  part_size: 99999999999GB
"#;
        assert!(matches!(
            Config::from_str(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_meta_option_names() {
        for opt in MetaOption::ALL {
            assert_eq!(opt.as_str().parse::<MetaOption>().unwrap(), opt);
        }
        assert_eq!("GrantReadACP".parse::<MetaOption>().unwrap(), MetaOption::GrantReadAcp);
        assert!("grantreadacp".parse::<MetaOption>().is_err());
    }

    #[test]
    fn test_write_config_get_has() {
        let config = WriteConfig::new()
            .with_visibility(Visibility::Public)
            .with_mimetype("text/markdown")
            .with_option(MetaOption::CacheControl, "no-cache")
            .with_metadata("k", "v");

        assert_eq!(config.get("visibility").as_deref(), Some("public"));
        assert_eq!(config.get("mimetype").as_deref(), Some("text/markdown"));
        assert_eq!(config.get("CacheControl").as_deref(), Some("no-cache"));
        assert!(config.has("Metadata"));
        assert!(config.has("CacheControl"));
        assert!(!config.has("Tagging"));
        assert!(!config.has("bogus"));
    }
}
