//! Policy Module - scoped access-policy documents
//!
//! Builds the RAM policy attached to every credential exchange. The policy
//! confines the temporary credentials to one user's namespace prefix and caps
//! the size of each uploaded object.

use crate::identity::UserId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Policy language version understood by the provider
pub const POLICY_VERSION: &str = "1";

/// Object operations granted inside the namespace
pub const GRANTED_ACTIONS: [&str; 6] = [
    "oss:PutObject",
    "oss:GetObject",
    "oss:DeleteObject",
    "oss:ListObjects",
    "oss:ListParts",
    "oss:AbortMultipartUpload",
];

const CONTENT_LENGTH_KEY: &str = "oss:ContentLength";

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Maximum object size must be positive")]
    NonPositiveMaxSize,

    #[error("Invalid bucket name: {0:?}")]
    InvalidBucket(String),

    #[error("Policy serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Condition block; operator -> (key -> limit)
pub type Condition = BTreeMap<String, BTreeMap<String, u64>>;

/// One statement of a policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: Condition,
}

impl Statement {
    /// Check whether a resource ARN is covered by this statement
    ///
    /// Patterns match exactly, or by prefix when they end with `*`.
    pub fn covers(&self, arn: &str) -> bool {
        self.resource.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => arn.starts_with(prefix),
            None => arn == pattern,
        })
    }

    /// Per-object size cap carried by the condition block, if any
    pub fn max_content_length(&self) -> Option<u64> {
        self.condition
            .get("NumericLessThanEquals")
            .and_then(|limits| limits.get(CONTENT_LENGTH_KEY))
            .copied()
    }
}

/// Scoped policy document, recomputed per request and never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Serialize to the exact JSON sent to the trust-exchange provider
    pub fn to_json(&self) -> Result<String, PolicyError> {
        serde_json::to_string(self).map_err(|e| PolicyError::Serialization(e.to_string()))
    }

    /// Every resource pattern named by any statement
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.statement
            .iter()
            .flat_map(|s| s.resource.iter().map(String::as_str))
    }

    /// Check whether any `Allow` statement covers the ARN
    pub fn allows_resource(&self, arn: &str) -> bool {
        self.statement
            .iter()
            .any(|s| s.effect == Effect::Allow && s.covers(arn))
    }
}

/// Builds per-user policy documents for one bucket
#[derive(Debug, Clone)]
pub struct PolicyGenerator {
    bucket: String,
}

impl PolicyGenerator {
    pub fn new(bucket: impl Into<String>) -> Result<Self, PolicyError> {
        let bucket = bucket.into();
        let valid = !bucket.is_empty()
            && bucket
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if !valid {
            return Err(PolicyError::InvalidBucket(bucket));
        }

        Ok(Self { bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// ARN of an object key (or key pattern) in this bucket
    pub fn object_arn(&self, key: &str) -> String {
        format!("acs:oss:*:*:{}/{}", self.bucket, key)
    }

    /// Generate the scoped policy for one user
    pub fn generate(&self, user_id: &UserId, max_object_size: u64) -> Result<PolicyDocument, PolicyError> {
        if max_object_size == 0 {
            return Err(PolicyError::NonPositiveMaxSize);
        }

        let namespace = user_id.namespace();
        let root = namespace.trim_end_matches('/');

        let mut limits = BTreeMap::new();
        limits.insert(CONTENT_LENGTH_KEY.to_string(), max_object_size);
        let mut condition = Condition::new();
        condition.insert("NumericLessThanEquals".to_string(), limits);

        let statement = Statement {
            effect: Effect::Allow,
            action: GRANTED_ACTIONS.iter().map(|a| a.to_string()).collect(),
            resource: vec![
                self.object_arn(root),
                self.object_arn(&format!("{}*", namespace)),
            ],
            condition,
        };

        Ok(PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![statement],
        })
    }
}
