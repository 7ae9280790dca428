//! Session name and duration newtypes

use crate::config::ConfigError;
use crate::crypto;
use crate::identity::UserId;

use chrono::{DateTime, Utc};
use std::fmt;

const SESSION_PREFIX: &str = "oss-user-";
const MIN_SESSION_NAME_LEN: usize = 2;
const MAX_SESSION_NAME_LEN: usize = 64;

/// Hex digits of the digest used when the user id cannot be embedded
const DIGEST_SEGMENT_LEN: usize = 16;

/// Role session name accepted by the provider
///
/// Only `[A-Za-z0-9.@_-]`, 2 to 64 characters. Built by `derive`, so an
/// invalid name cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionName(String);

impl SessionName {
    /// `oss-user-{id}-{unix_millis}`, with the id replaced by a digest prefix
    /// when it would make the name invalid
    pub fn derive(user_id: &UserId, at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis();
        let name = format!("{}{}-{}", SESSION_PREFIX, user_id, millis);

        if Self::is_valid(&name) {
            return Self(name);
        }

        let digest = crypto::sha256_hex(user_id.as_str().as_bytes());
        Self(format!(
            "{}{}-{}",
            SESSION_PREFIX,
            &digest[..DIGEST_SEGMENT_LEN],
            millis
        ))
    }

    fn is_valid(name: &str) -> bool {
        (MIN_SESSION_NAME_LEN..=MAX_SESSION_NAME_LEN).contains(&name.len())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential lifetime in seconds, 900 to 3600
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDuration(u64);

impl SessionDuration {
    pub const MIN_SECS: u64 = 900;
    pub const MAX_SECS: u64 = 3600;

    pub fn new(secs: u64) -> Result<Self, ConfigError> {
        if !(Self::MIN_SECS..=Self::MAX_SECS).contains(&secs) {
            return Err(ConfigError::Invalid {
                field: "session_duration_secs",
                reason: format!(
                    "{} is outside {}..={} seconds",
                    secs,
                    Self::MIN_SECS,
                    Self::MAX_SECS
                ),
            });
        }
        Ok(Self(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl Default for SessionDuration {
    fn default() -> Self {
        Self(Self::MAX_SECS)
    }
}
