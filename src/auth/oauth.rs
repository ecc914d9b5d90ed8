//! OAuth 1.0a request signing (HMAC-SHA1).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::hmac;
use ring::rand::{self, SecureRandom};
use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::transport::Method;

/// Consumer key pair registered with the API for this client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Per-session token issued by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub token_secret: String,
}

/// RFC 3986 percent-encoding: everything but unreserved characters.
pub fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Signature base string: method, base URL, and the sorted, encoded parameter set.
/// Query parameters are taken from `url` as-is; request URLs built by this crate
/// carry no percent-encoded values.
pub fn signature_base(method: Method, url: &str, oauth_params: &[(&str, String)]) -> String {
    let (base_url, query) = match url.split_once('?') {
        Some((base, query)) => (base, query),
        None => (url, ""),
    };

    let mut params: Vec<(String, String)> = oauth_params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        params.push((percent_encode(k), percent_encode(v)));
    }
    params.sort();

    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}&{}&{}", method.as_str(), percent_encode(base_url), percent_encode(&joined))
}

fn sign(config: &OAuthConfig, credentials: &Credentials, base: &str) -> String {
    let signing_key = format!(
        "{}&{}",
        percent_encode(&config.consumer_secret),
        percent_encode(&credentials.token_secret)
    );
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
    STANDARD.encode(hmac::sign(&key, base.as_bytes()).as_ref())
}

fn nonce() -> Result<String> {
    let mut bytes = [0u8; 16];
    rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::auth("could not generate nonce"))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// `Authorization` header value with an explicit nonce and timestamp.
pub fn authorization_header_at(
    config: &OAuthConfig,
    credentials: &Credentials,
    method: Method,
    url: &str,
    nonce: &str,
    timestamp: i64,
) -> String {
    let mut params: Vec<(&str, String)> = vec![
        ("oauth_consumer_key", config.consumer_key.clone()),
        ("oauth_nonce", nonce.to_string()),
        ("oauth_signature_method", "HMAC-SHA1".to_string()),
        ("oauth_timestamp", timestamp.to_string()),
        ("oauth_token", credentials.token.clone()),
        ("oauth_version", "1.0".to_string()),
    ];
    let signature = sign(config, credentials, &signature_base(method, url, &params));
    params.push(("oauth_signature", signature));

    let fields = params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {fields}")
}

pub fn authorization_header(
    config: &OAuthConfig,
    credentials: &Credentials,
    method: Method,
    url: &str,
) -> Result<String> {
    Ok(authorization_header_at(
        config,
        credentials,
        method,
        url,
        &nonce()?,
        chrono::Utc::now().timestamp(),
    ))
}
