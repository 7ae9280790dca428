//! Aliyun OSS object store (REST API, header signature V1)
//!
//! Listing uses marker pagination; the continuation token is the provider's
//! `NextMarker` and is passed back unchanged.

use super::{
    BatchDeleteReport, DeleteFailure, ListPage, ListRequest, ObjectMeta, ObjectStore, OssUrlSigner,
    PageToken, StorageError,
};
use crate::config::{AliyunConfig, HTTP_TIMEOUT_SECS};
use crate::crypto;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Method;
use std::fmt;
use std::time::Duration;

/// Most keys OSS accepts in one DeleteMultipleObjects call
pub const MAX_DELETE_BATCH: usize = 1000;

const XML_CONTENT_TYPE: &str = "application/xml";

/// HTTPS client for one OSS bucket
pub struct AliyunOssStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    access_key_id: String,
    access_key_secret: String,
    signer: OssUrlSigner,
}

impl AliyunOssStore {
    pub fn new(config: &AliyunConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| request_failed(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Build on an existing connection pool
    pub fn with_client(client: reqwest::Client, config: &AliyunConfig) -> Self {
        let endpoint = config.endpoint();
        let endpoint = endpoint.trim_end_matches('/');
        let base_url = match endpoint.split_once("://") {
            Some((scheme, host)) => format!("{}://{}.{}", scheme, config.bucket, host),
            None => format!("https://{}.{}", config.bucket, endpoint),
        };

        Self {
            client,
            base_url,
            bucket: config.bucket.clone(),
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
            signer: OssUrlSigner::from_config(config),
        }
    }

    /// `Authorization` header value for one request
    fn authorization(
        &self,
        method: &Method,
        content_md5: &str,
        content_type: &str,
        date: &str,
        resource: &str,
    ) -> Result<String, StorageError> {
        let string_to_sign = string_to_sign(method.as_str(), content_md5, content_type, date, resource);
        let signature =
            crypto::hmac_sha1_base64(self.access_key_secret.as_bytes(), string_to_sign.as_bytes())?;
        Ok(format!("OSS {}:{}", self.access_key_id, signature))
    }

    /// Send a signed request and return the response body
    async fn send(
        &self,
        method: Method,
        url: String,
        resource: &str,
        body: Option<String>,
    ) -> Result<String, StorageError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let (content_md5, content_type) = match &body {
            Some(body) => (content_md5(body.as_bytes()), XML_CONTENT_TYPE),
            None => (String::new(), ""),
        };
        let authorization = self.authorization(&method, &content_md5, content_type, &date, resource)?;

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Date", &date)
            .header("Authorization", authorization);
        if let Some(body) = body {
            request = request
                .header("Content-MD5", content_md5)
                .header("Content-Type", content_type)
                .body(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("OSS {} {} failed: {}", method, resource, e);
            request_failed(e.to_string())
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| request_failed(format!("Failed to read response body: {}", e)))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(parse_error(status.as_u16(), &text))
        }
    }

    async fn delete_chunk(&self, keys: &[String]) -> Result<BatchDeleteReport, StorageError> {
        let body = delete_request_body(keys);
        let resource = format!("/{}/?delete", self.bucket);
        let url = format!("{}/?delete", self.base_url);

        let text = self.send(Method::POST, url, &resource, Some(body)).await?;
        parse_delete_result(&text)
    }
}

impl fmt::Debug for AliyunOssStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliyunOssStore")
            .field("base_url", &self.base_url)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for AliyunOssStore {
    async fn list(&self, request: &ListRequest) -> Result<ListPage, StorageError> {
        let mut url = format!(
            "{}/?prefix={}&max-keys={}",
            self.base_url,
            crypto::percent_encode(&request.prefix),
            request.max_keys
        );
        if let Some(token) = &request.page_token {
            url.push_str("&marker=");
            url.push_str(&crypto::percent_encode(token.as_str()));
        }
        let resource = format!("/{}/", self.bucket);

        let text = self.send(Method::GET, url, &resource, None).await?;
        let page = parse_list_result(&text)?;
        tracing::debug!(
            "Listed {} object(s) under {} (truncated: {})",
            page.objects.len(),
            request.prefix,
            page.truncated
        );
        Ok(page)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let url = format!("{}/{}", self.base_url, crypto::percent_encode_path(key));
        let resource = format!("/{}/{}", self.bucket, key);

        self.send(Method::DELETE, url, &resource, None).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<BatchDeleteReport, StorageError> {
        let mut report = BatchDeleteReport::default();
        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let part = self.delete_chunk(chunk).await?;
            report.deleted.extend(part.deleted);
            report.failed.extend(part.failed);
        }
        Ok(report)
    }

    async fn presign_get(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, StorageError> {
        self.signer.sign_get(key, expires_at)
    }

    fn object_url(&self, key: &str) -> String {
        self.signer.object_url(key)
    }
}

fn request_failed(message: impl Into<String>) -> StorageError {
    StorageError::Provider {
        code: "RequestFailed".to_string(),
        message: message.into(),
    }
}

fn malformed(message: impl fmt::Display) -> StorageError {
    StorageError::Provider {
        code: "MalformedResponse".to_string(),
        message: message.to_string(),
    }
}

/// `VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedResource`
fn string_to_sign(
    method: &str,
    content_md5: &str,
    content_type: &str,
    date: &str,
    resource: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method, content_md5, content_type, date, resource
    )
}

fn content_md5(body: &[u8]) -> String {
    BASE64.encode(md5::compute(body).0)
}

/// XML body of a DeleteMultipleObjects call, verbose mode
fn delete_request_body(keys: &[String]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Delete><Quiet>false</Quiet>"#);
    for key in keys {
        body.push_str("<Object><Key>");
        body.push_str(&quick_xml::escape::escape(key.as_str()));
        body.push_str("</Key></Object>");
    }
    body.push_str("</Delete>");
    body
}

#[derive(Default)]
struct PendingObject {
    key: Option<String>,
    size: Option<u64>,
    last_modified: Option<DateTime<Utc>>,
}

impl PendingObject {
    fn finish(self) -> Result<ObjectMeta, StorageError> {
        match (self.key, self.size, self.last_modified) {
            (Some(key), Some(size), Some(last_modified)) => Ok(ObjectMeta {
                key,
                size,
                last_modified,
            }),
            _ => Err(malformed("Contents entry without Key, Size or LastModified")),
        }
    }
}

/// Parse a `ListBucketResult` document
fn parse_list_result(xml: &str) -> Result<ListPage, StorageError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut element = String::new();
    let mut pending: Option<PendingObject> = None;
    let mut objects = Vec::new();
    let mut truncated = false;
    let mut next_marker: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if element == "Contents" {
                    pending = Some(PendingObject::default());
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(malformed)?.to_string();
                match (pending.as_mut(), element.as_str()) {
                    (Some(object), "Key") => object.key = Some(text),
                    (Some(object), "Size") => {
                        object.size = Some(text.parse().map_err(|_| malformed(format!("Invalid Size: {}", text)))?)
                    }
                    (Some(object), "LastModified") => {
                        let parsed = DateTime::parse_from_rfc3339(&text)
                            .map_err(|_| malformed(format!("Invalid LastModified: {}", text)))?;
                        object.last_modified = Some(parsed.with_timezone(&Utc));
                    }
                    (None, "IsTruncated") => truncated = text == "true",
                    (None, "NextMarker") => next_marker = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Contents" {
                    if let Some(object) = pending.take() {
                        objects.push(object.finish()?);
                    }
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
        buf.clear();
    }

    let next_token = if truncated {
        next_marker
            .filter(|marker| !marker.is_empty())
            .or_else(|| objects.last().map(|o: &ObjectMeta| o.key.clone()))
            .map(PageToken::new)
    } else {
        None
    };

    Ok(ListPage {
        objects,
        next_token,
        truncated,
    })
}

enum DeleteEntry {
    Deleted,
    Failed,
}

/// Parse a `DeleteResult` document into per-key outcomes
fn parse_delete_result(xml: &str) -> Result<BatchDeleteReport, StorageError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut element = String::new();
    let mut entry: Option<DeleteEntry> = None;
    let mut failure = DeleteFailure {
        key: String::new(),
        code: String::new(),
        message: String::new(),
    };
    let mut report = BatchDeleteReport::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match element.as_str() {
                    "Deleted" => entry = Some(DeleteEntry::Deleted),
                    "Error" => {
                        entry = Some(DeleteEntry::Failed);
                        failure = DeleteFailure {
                            key: String::new(),
                            code: String::new(),
                            message: String::new(),
                        };
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(malformed)?.to_string();
                match (&entry, element.as_str()) {
                    (Some(DeleteEntry::Deleted), "Key") => report.deleted.push(text),
                    (Some(DeleteEntry::Failed), "Key") => failure.key = text,
                    (Some(DeleteEntry::Failed), "Code") => failure.code = text,
                    (Some(DeleteEntry::Failed), "Message") => failure.message = text,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Error" {
                    if let Some(DeleteEntry::Failed) = entry.take() {
                        report.failed.push(failure.clone());
                    }
                } else if e.name().as_ref() == b"Deleted" {
                    entry = None;
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(report)
}

/// Turn an OSS `<Error>` document into a provider error
fn parse_error(status: u16, body: &str) -> StorageError {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut element = String::new();
    let mut code = None;
    let mut message = None;
    let mut request_id = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = String::from_utf8_lossy(e.name().as_ref()).to_string();
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.to_string(),
                    Err(_) => break,
                };
                match element.as_str() {
                    "Code" => code = Some(text),
                    "Message" => message = Some(text),
                    "RequestId" => request_id = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => element.clear(),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let message = message.unwrap_or_else(|| format!("HTTP status {}", status));
    StorageError::Provider {
        code: code.unwrap_or_else(|| format!("HTTP{}", status)),
        message: match request_id {
            Some(id) => format!("{} (request {})", message, id),
            None => message,
        },
    }
}
