//! Aliyun STS client (RPC-style API, signature version 1.0)

use super::{AssumeRoleRequest, AssumeRoleResponse, CredentialBundle, ProviderDiagnostic, TrustExchange};
use crate::config::{AliyunConfig, HTTP_TIMEOUT_SECS};
use crate::crypto::{self, CryptoError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// STS API version this client speaks
pub const STS_API_VERSION: &str = "2015-04-01";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SuccessBody {
    request_id: Option<String>,
    credentials: WireCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCredentials {
    access_key_id: String,
    access_key_secret: String,
    security_token: String,
    expiration: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    request_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// HTTPS client for the Aliyun Security Token Service
pub struct AliyunStsClient {
    client: reqwest::Client,
    url: String,
    access_key_id: String,
    access_key_secret: String,
}

impl AliyunStsClient {
    /// Build a client for the configured STS endpoint
    ///
    /// Construct once per process; the inner connection pool is shared.
    pub fn new(config: &AliyunConfig) -> Result<Self, ProviderDiagnostic> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderDiagnostic::transport(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &AliyunConfig) -> Self {
        let endpoint = config.sts_endpoint.trim_end_matches('/');
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}/", endpoint)
        } else {
            format!("https://{}/", endpoint)
        };

        Self {
            client,
            url,
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
        }
    }

    /// Signed form body for an AssumeRole call
    fn signed_body(
        &self,
        request: &AssumeRoleRequest,
        now: DateTime<Utc>,
        nonce: &str,
    ) -> Result<String, CryptoError> {
        let mut params = BTreeMap::new();
        params.insert("AccessKeyId", self.access_key_id.clone());
        params.insert("Action", "AssumeRole".to_string());
        params.insert("DurationSeconds", request.duration.as_secs().to_string());
        params.insert("Format", "JSON".to_string());
        params.insert("Policy", request.policy.clone());
        params.insert("RoleArn", request.role_arn.clone());
        params.insert("RoleSessionName", request.session_name.to_string());
        params.insert("SignatureMethod", "HMAC-SHA1".to_string());
        params.insert("SignatureNonce", nonce.to_string());
        params.insert("SignatureVersion", "1.0".to_string());
        params.insert("Timestamp", now.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        params.insert("Version", STS_API_VERSION.to_string());

        let canonical = canonical_query(&params);
        let signature = sign("POST", &canonical, &self.access_key_secret)?;

        Ok(format!(
            "{}&Signature={}",
            canonical,
            crypto::percent_encode(&signature)
        ))
    }
}

impl fmt::Debug for AliyunStsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliyunStsClient")
            .field("url", &self.url)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Sorted `pct(k)=pct(v)` pairs joined with `&`
fn canonical_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", crypto::percent_encode(k), crypto::percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// RPC signature: HMAC-SHA1 keyed with `secret&` over `METHOD&%2F&pct(query)`
fn sign(method: &str, canonical: &str, secret: &str) -> Result<String, CryptoError> {
    let string_to_sign = format!(
        "{}&{}&{}",
        method,
        crypto::percent_encode("/"),
        crypto::percent_encode(canonical)
    );
    crypto::hmac_sha1_base64(format!("{}&", secret).as_bytes(), string_to_sign.as_bytes())
}

/// Turn a non-success response into a diagnostic
fn error_diagnostic(status: u16, body: &str) -> ProviderDiagnostic {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => ProviderDiagnostic {
            code: err.code,
            message: err
                .message
                .unwrap_or_else(|| format!("HTTP status {}", status)),
            request_id: err.request_id,
            http_status: Some(status),
        },
        Err(_) => ProviderDiagnostic {
            code: None,
            message: format!("HTTP status {} with unparseable body", status),
            request_id: None,
            http_status: Some(status),
        },
    }
}

/// Parse a success body into the credential bundle
fn parse_success(status: u16, body: &str) -> Result<AssumeRoleResponse, ProviderDiagnostic> {
    let parsed: SuccessBody = serde_json::from_str(body).map_err(|e| ProviderDiagnostic {
        code: None,
        message: format!("Malformed AssumeRole response: {}", e),
        request_id: None,
        http_status: Some(status),
    })?;

    Ok(AssumeRoleResponse {
        request_id: parsed.request_id,
        credentials: CredentialBundle {
            access_key_id: parsed.credentials.access_key_id,
            access_key_secret: parsed.credentials.access_key_secret,
            security_token: parsed.credentials.security_token,
            expiration: parsed.credentials.expiration,
        },
    })
}

#[async_trait]
impl TrustExchange for AliyunStsClient {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumeRoleResponse, ProviderDiagnostic> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let body = self
            .signed_body(request, Utc::now(), &nonce)
            .map_err(|e| ProviderDiagnostic::transport(format!("Request signing failed: {}", e)))?;

        tracing::debug!(
            "AssumeRole {} for session {}",
            request.role_arn,
            request.session_name
        );

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderDiagnostic::transport(format!("STS request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderDiagnostic {
                code: None,
                message: format!("Failed to read STS response: {}", e),
                request_id: None,
                http_status: Some(status.as_u16()),
            })?;

        if status.is_success() {
            parse_success(status.as_u16(), &text)
        } else {
            Err(error_diagnostic(status.as_u16(), &text))
        }
    }
}
