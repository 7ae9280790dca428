//! Configuration for the broker
//!
//! Values come from a JSON file or from the environment. Missing settings
//! fall back to defaults; placeholder credentials are detected here so the
//! broker can refuse to call out before any network round trip.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Default STS endpoint
pub const DEFAULT_STS_ENDPOINT: &str = "sts.aliyuncs.com";

/// Default region
pub const DEFAULT_REGION: &str = "oss-cn-hangzhou";

/// Timeout for every provider HTTP call, in seconds
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Largest page the listing will ever request
pub const MAX_PAGE_SIZE: usize = 100;

/// Markers left behind by sample `.env` files
const PLACEHOLDER_MARKERS: [&str; 4] = ["your-", "your_", "<", "changeme"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing setting: {0}")]
    Missing(&'static str),

    #[error("Placeholder value for {0}")]
    Placeholder(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Operation mode; provider diagnostics are only exposed outside production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Development,
    #[default]
    Production,
}

impl RunMode {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(ConfigError::Invalid {
                field: "mode",
                reason: format!("unknown mode {:?}", other),
            }),
        }
    }

    pub fn is_production(self) -> bool {
        self == RunMode::Production
    }
}

/// Cloud account settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliyunConfig {
    /// Long-lived access key id of the broker's RAM user
    pub access_key_id: String,

    /// Long-lived access key secret (never logged)
    pub access_key_secret: String,

    /// Role assumed on behalf of end users
    pub role_arn: String,

    /// OSS region, e.g. `oss-cn-hangzhou`
    pub region: String,

    /// Shared bucket holding all user namespaces
    pub bucket: String,

    /// OSS endpoint host; derived from the region when empty
    pub endpoint: String,

    /// STS endpoint host
    pub sts_endpoint: String,
}

impl Default for AliyunConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            access_key_secret: String::new(),
            role_arn: String::new(),
            region: DEFAULT_REGION.to_string(),
            bucket: String::new(),
            endpoint: String::new(),
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
        }
    }
}

impl fmt::Debug for AliyunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliyunConfig")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("role_arn", &self.role_arn)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("sts_endpoint", &self.sts_endpoint)
            .finish()
    }
}

impl AliyunConfig {
    /// OSS endpoint host, falling back to `{region}.aliyuncs.com`
    pub fn endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("{}.aliyuncs.com", self.region)
        } else {
            self.endpoint.clone()
        }
    }

    /// Verify the access key pair is set and not a sample value
    pub fn check_credentials(&self) -> Result<(), ConfigError> {
        check_setting("ALIYUN_ACCESS_KEY_ID", &self.access_key_id)?;
        check_setting("ALIYUN_ACCESS_KEY_SECRET", &self.access_key_secret)
    }

    /// Verify the role ARN is set, not a sample value, and looks like a RAM role
    pub fn check_role(&self) -> Result<(), ConfigError> {
        check_setting("ALIYUN_ROLE_ARN", &self.role_arn)?;
        if !self.role_arn.starts_with("acs:ram::") || !self.role_arn.contains(":role/") {
            return Err(ConfigError::Invalid {
                field: "ALIYUN_ROLE_ARN",
                reason: "expected acs:ram::<account-id>:role/<role-name>".to_string(),
            });
        }
        Ok(())
    }
}

/// Upload and listing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Per-object size cap written into every policy (bytes)
    pub max_file_size: u64,

    /// Requested credential lifetime (seconds)
    pub session_duration_secs: u64,

    /// Listing page size, clamped to 1..=100
    pub page_size: usize,

    /// Default lifetime of share links (seconds)
    pub share_expiry_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024 * 1024, // 10 GB
            session_duration_secs: 3600,            // 1 hour
            page_size: MAX_PAGE_SIZE,
            share_expiry_secs: 3600,
        }
    }
}

impl UploadConfig {
    pub fn page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OssGateConfig {
    pub aliyun: AliyunConfig,
    pub upload: UploadConfig,
    pub mode: RunMode,
}

impl OssGateConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut config = Self::default();

        if let Some(v) = env("ALIYUN_ACCESS_KEY_ID") {
            config.aliyun.access_key_id = v;
        }
        if let Some(v) = env("ALIYUN_ACCESS_KEY_SECRET") {
            config.aliyun.access_key_secret = v;
        }
        if let Some(v) = env("ALIYUN_ROLE_ARN") {
            config.aliyun.role_arn = v;
        }
        if let Some(v) = env("OSS_REGION") {
            config.aliyun.region = v;
        }
        if let Some(v) = env("OSS_BUCKET") {
            config.aliyun.bucket = v;
        }
        if let Some(v) = env("OSS_ENDPOINT") {
            config.aliyun.endpoint = v;
        }
        if let Some(v) = env("STS_ENDPOINT") {
            config.aliyun.sts_endpoint = v;
        }

        if let Some(v) = env("OSSGATE_MAX_FILE_SIZE") {
            config.upload.max_file_size = parse_size(&v).map_err(|reason| ConfigError::Invalid {
                field: "OSSGATE_MAX_FILE_SIZE",
                reason,
            })?;
        }
        if let Some(v) = env("OSSGATE_SESSION_DURATION") {
            config.upload.session_duration_secs = parse_number("OSSGATE_SESSION_DURATION", &v)?;
        }
        if let Some(v) = env("OSSGATE_PAGE_SIZE") {
            config.upload.page_size = parse_number("OSSGATE_PAGE_SIZE", &v)?;
        }
        if let Some(v) = env("OSSGATE_MODE") {
            config.mode = RunMode::parse(&v)?;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("not a number: {}", value),
    })
}

fn check_setting(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    if is_placeholder(value) {
        return Err(ConfigError::Placeholder(field));
    }
    Ok(())
}

/// Recognize obviously-placeholder values copied from sample configuration
pub fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Parses a size string like "10GB", "100MB", "1024KB", "5000" into bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();

    if s.is_empty() {
        return Err("Empty size string".to_string());
    }

    let num_end = s.chars().position(|c| !c.is_ascii_digit() && c != '.').unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(num_end);

    let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;

    let multiplier: u64 = match suffix.trim() {
        "GB" | "G" => 1024 * 1024 * 1024,
        "MB" | "M" => 1024 * 1024,
        "KB" | "K" => 1024,
        "B" | "" => 1,
        other => return Err(format!("Unknown size suffix: {}", other)),
    };

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn configured() -> AliyunConfig {
        AliyunConfig {
            access_key_id: "LTAI5tExampleKeyId".to_string(),
            access_key_secret: "s3cr3tValue".to_string(),
            role_arn: "acs:ram::1234567890123456:role/oss-uploader".to_string(),
            bucket: "media-bucket".to_string(),
            ..AliyunConfig::default()
        }
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("5000").unwrap(), 5000);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("100mb").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("10GB").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert!(parse_size("").is_err());
        assert!(parse_size("12TB").is_err());
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("your-access-key-id"));
        assert!(is_placeholder("acs:ram::your-account-id:role/x"));
        assert!(is_placeholder("<ROLE_ARN>"));
        assert!(!is_placeholder("LTAI5tExampleKeyId"));
    }

    #[test]
    fn test_check_role() {
        let config = configured();
        assert!(config.check_credentials().is_ok());
        assert!(config.check_role().is_ok());

        let mut missing = configured();
        missing.role_arn.clear();
        assert!(matches!(missing.check_role(), Err(ConfigError::Missing(_))));

        let mut placeholder = configured();
        placeholder.role_arn = "acs:ram::your-account-id:role/your-role".to_string();
        assert!(matches!(placeholder.check_role(), Err(ConfigError::Placeholder(_))));

        let mut malformed = configured();
        malformed.role_arn = "arn:aws:iam::123:role/x".to_string();
        assert!(matches!(malformed.check_role(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", configured());
        assert!(!rendered.contains("s3cr3tValue"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_endpoint_fallback() {
        let mut config = configured();
        assert_eq!(config.endpoint(), "oss-cn-hangzhou.aliyuncs.com");

        config.endpoint = "oss-accelerate.aliyuncs.com".to_string();
        assert_eq!(config.endpoint(), "oss-accelerate.aliyuncs.com");
    }

    #[test]
    fn test_page_size_clamped() {
        let mut upload = UploadConfig::default();
        assert_eq!(upload.page_size(), 100);

        upload.page_size = 1000;
        assert_eq!(upload.page_size(), 100);

        upload.page_size = 0;
        assert_eq!(upload.page_size(), 1);
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!(RunMode::parse("Development").unwrap(), RunMode::Development);
        assert_eq!(RunMode::parse("prod").unwrap(), RunMode::Production);
        assert!(RunMode::parse("staging").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "aliyun": {{ "bucket": "media-bucket", "region": "oss-cn-shanghai" }},
                "upload": {{ "page_size": 50 }},
                "mode": "development"
            }}"#
        )
        .unwrap();

        let config = OssGateConfig::from_json_file(file.path()).unwrap();

        assert_eq!(config.aliyun.bucket, "media-bucket");
        assert_eq!(config.aliyun.region, "oss-cn-shanghai");
        assert_eq!(config.aliyun.sts_endpoint, DEFAULT_STS_ENDPOINT);
        assert_eq!(config.upload.page_size, 50);
        assert_eq!(config.upload.session_duration_secs, 3600);
        assert_eq!(config.mode, RunMode::Development);
    }
}
