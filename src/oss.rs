//! Object-storage request signing.
//!
//! Uploads are authorized with the storage service's header signature:
//! an HMAC-SHA1 over a canonical string built from the method, content
//! type, date, the `x-oss-*` headers and the resource path. Everything here
//! is a pure function of its inputs so the signature can be checked without
//! a network.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, DATE, USER_AGENT,
};
use sha1::Sha1;

use crate::errors::{LipSyncError, Result};
use crate::models::UploadCredential;

type HmacSha1 = Hmac<Sha1>;

/// Prefix of every uploaded object's key.
pub(crate) const UPLOAD_PREFIX: &str = "upload";

/// Client identifier sent in `x-oss-user-agent`.
pub(crate) const OSS_CLIENT_ID: &str = concat!("lipsync-rs/", env!("CARGO_PKG_VERSION"));

pub(crate) const HEADER_SECURITY_TOKEN: &str = "x-oss-security-token";
pub(crate) const HEADER_FORBID_OVERWRITE: &str = "x-oss-forbid-overwrite";
pub(crate) const HEADER_CLIENT_ID: &str = "x-oss-user-agent";

/// Build the exact string the storage service reconstructs and verifies.
///
/// Layout: method, an empty Content-MD5 line, content type, date, then one
/// `key:value\n` line per storage header (keys lower-cased, sorted), with the
/// resource path appended directly after the last header line.
pub fn string_to_sign(
    method: &str,
    content_type: &str,
    date: &str,
    oss_headers: &BTreeMap<String, String>,
    resource: &str,
) -> String {
    // Re-key through a fresh map so sorting happens on the lower-cased names.
    let canonical: BTreeMap<String, &str> = oss_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();

    let mut out = String::with_capacity(128 + resource.len());
    out.push_str(method);
    out.push('\n');
    out.push('\n');
    out.push_str(content_type);
    out.push('\n');
    out.push_str(date);
    out.push('\n');
    for (k, v) in &canonical {
        out.push_str(k);
        out.push(':');
        out.push_str(v);
        out.push('\n');
    }
    out.push_str(resource);
    out
}

/// Base64 HMAC-SHA1 of `string_to_sign` keyed by `secret`.
pub fn sign(secret: &str, string_to_sign: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// `Authorization` header value for a computed signature.
pub fn authorization(access_key_id: &str, signature: &str) -> String {
    format!("OSS {access_key_id}:{signature}")
}

/// RFC 7231 HTTP-date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Text after the last `.`, if any and non-empty.
pub(crate) fn extension(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Fresh random object name keeping the original extension as-is.
pub(crate) fn object_name(file_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match extension(file_name) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// The `x-oss-*` headers that take part in the signature.
pub(crate) fn oss_headers(credential: &UploadCredential) -> BTreeMap<String, String> {
    BTreeMap::from([
        (HEADER_SECURITY_TOKEN.to_string(), credential.security_token.clone()),
        (HEADER_FORBID_OVERWRITE.to_string(), "true".to_string()),
        (HEADER_CLIENT_ID.to_string(), OSS_CLIENT_ID.to_string()),
    ])
}

/// Complete header set for a signed PUT of `resource`.
///
/// `date` must be the exact string sent in the `Date` header.
pub(crate) fn signed_put_headers(
    credential: &UploadCredential,
    content_type: &str,
    date: &str,
    resource: &str,
    user_agent: &str,
) -> Result<HeaderMap> {
    let oss = oss_headers(credential);
    let to_sign = string_to_sign("PUT", content_type, date, &oss, resource);
    let signature = sign(&credential.access_key_secret, &to_sign);

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        header_value(&authorization(&credential.access_key_id, &signature))?,
    );
    headers.insert(DATE, header_value(date)?);
    headers.insert(CONTENT_TYPE, header_value(content_type)?);
    headers.insert(USER_AGENT, header_value(user_agent)?);
    for (k, v) in &oss {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| LipSyncError::InvalidHeader(format!("{k}: {e}")))?;
        headers.insert(name, header_value(v)?);
    }
    Ok(headers)
}

fn header_value(v: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(v).map_err(|e| LipSyncError::InvalidHeader(e.to_string()))
}
