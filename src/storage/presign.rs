//! Share links - signed, time-limited direct-read URLs

use super::{decode_key, ObjectStore, StorageError};
use crate::config::AliyunConfig;
use crate::crypto;
use crate::identity::Identity;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Longest lifetime a share link may be given (7 days)
pub const MAX_SHARE_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Signs OSS object URLs with the broker's long-lived key (signature V1)
#[derive(Clone)]
pub struct OssUrlSigner {
    bucket: String,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
}

impl OssUrlSigner {
    pub fn new(
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
        }
    }

    pub fn from_config(config: &AliyunConfig) -> Self {
        Self::new(
            config.bucket.clone(),
            config.endpoint(),
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
        )
    }

    /// Unsigned virtual-hosted URL of an object
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "https://{}.{}/{}",
            self.bucket,
            self.endpoint,
            crypto::percent_encode_path(key)
        )
    }

    /// GET URL valid until `expires_at`
    pub fn sign_get(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, StorageError> {
        let expires = expires_at.timestamp();
        let string_to_sign = format!("GET\n\n\n{}\n/{}/{}", expires, self.bucket, key);
        let signature =
            crypto::hmac_sha1_base64(self.access_key_secret.as_bytes(), string_to_sign.as_bytes())?;

        Ok(format!(
            "{}?OSSAccessKeyId={}&Expires={}&Signature={}",
            self.object_url(key),
            crypto::percent_encode(&self.access_key_id),
            expires,
            crypto::percent_encode(&signature)
        ))
    }
}

impl fmt::Debug for OssUrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssUrlSigner")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Share link handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub url: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    pub object_key: String,
}

/// Issues share links for objects inside the caller's namespace
#[derive(Clone)]
pub struct ShareLinkIssuer {
    store: Arc<dyn ObjectStore>,
    default_expiry_secs: u64,
}

impl ShareLinkIssuer {
    pub fn new(store: Arc<dyn ObjectStore>, default_expiry_secs: u64) -> Self {
        Self {
            store,
            default_expiry_secs,
        }
    }

    pub async fn issue(
        &self,
        identity: &Identity,
        raw_key: &str,
        expires_secs: Option<u64>,
    ) -> Result<ShareLink, StorageError> {
        let key = decode_key(raw_key)?;
        if !identity.user_id.owns_key(&key) {
            tracing::warn!("User {} requested a share link outside its namespace", identity.user_id);
            return Err(StorageError::Unauthorized {
                keys: vec![raw_key.to_string()],
            });
        }

        let expires_in = expires_secs.unwrap_or(self.default_expiry_secs);
        if expires_in == 0 || expires_in > MAX_SHARE_EXPIRY_SECS {
            return Err(StorageError::InvalidExpiry(expires_in));
        }

        // Bounded above, so the conversion cannot overflow
        let expires_at = Utc::now() + Duration::seconds(expires_in as i64);
        let url = self.store.presign_get(&key, expires_at).await?;

        tracing::debug!("Issued share link for {} ({}s)", key, expires_in);

        Ok(ShareLink {
            url,
            expires_in,
            expires_at,
            object_key: key,
        })
    }
}
