//! Cryptography Module - request signing primitives
//!
//! Provides the HMAC-SHA1 signatures used by the STS RPC API and by OSS
//! query-string signed URLs, plus the RFC 3986 percent-encoding both share.

use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Everything except the RFC 3986 unreserved characters
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// As `RFC3986`, but keeps `/` so object keys stay readable in URL paths
const RFC3986_PATH: &AsciiSet = &RFC3986.remove(b'/');

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// HMAC-SHA1 of `data` under `key`, base64 encoded
pub fn hmac_sha1_base64(key: &[u8], data: &[u8]) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha1::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Percent-encode with uppercase hex, leaving only `A-Za-z0-9-_.~`
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, RFC3986).to_string()
}

/// Percent-encode an object key for use as a URL path
pub fn percent_encode_path(s: &str) -> String {
    utf8_percent_encode(s, RFC3986_PATH).to_string()
}

/// Decode `%XX` sequences; the result must be valid UTF-8
pub fn percent_decode(s: &str) -> Result<String, CryptoError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| CryptoError::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha1_base64() {
        let signature =
            hmac_sha1_base64(b"key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(signature, "3nybhbi3iqa8ino29wqQcBydtNk=");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(&sha256_hex(b"user with spaces")[..16], "2059978e0a5db61a");
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("a b/c*"), "a%20b%2Fc%2A");
        assert_eq!(percent_encode("+="), "%2B%3D");
        assert_eq!(percent_encode_path("users/u1/a b.jpg"), "users/u1/a%20b.jpg");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("users%2Fu1%2Fa%20b.jpg").unwrap(), "users/u1/a b.jpg");
        assert_eq!(percent_decode("plain").unwrap(), "plain");
        assert_eq!(percent_decode("%E6%96%87%E4%BB%B6").unwrap(), "文件");
        assert!(percent_decode("%FF%FE").is_err());
    }
}
