use std::fmt;

use serde::{Deserialize, Serialize};

/// Short-lived object-storage credential returned by
/// [`Client::get_upload_token`](crate::Client::get_upload_token).
///
/// Good for one upload session. The `Debug` output never includes the secret
/// or the security token.
#[derive(Clone, Deserialize, Serialize)]
pub struct UploadCredential {
    #[serde(rename = "accessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "accessKeySecret")]
    pub access_key_secret: String,

    #[serde(rename = "securityToken")]
    pub security_token: String,

    /// ISO 8601, if the server reports it.
    #[serde(default)]
    pub expiration: Option<String>,
}

impl fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredential")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("security_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Coarse media classification used by the API: video or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MediaType {
    /// `video/mp4`. Wire code 1.
    Video,
    /// Everything else. Wire code 2.
    Other,
}

impl MediaType {
    /// Only `video/mp4` counts as video; this is not a general MIME taxonomy.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type == "video/mp4" {
            MediaType::Video
        } else {
            MediaType::Other
        }
    }

    pub fn code(self) -> u8 {
        match self {
            MediaType::Video => 1,
            MediaType::Other => 2,
        }
    }
}

impl From<MediaType> for u8 {
    fn from(t: MediaType) -> u8 {
        t.code()
    }
}

impl TryFrom<u8> for MediaType {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(MediaType::Video),
            2 => Ok(MediaType::Other),
            other => Err(format!("unknown media type code {other}")),
        }
    }
}

/// An object placed in storage by
/// [`Client::upload_to_oss`](crate::Client::upload_to_oss).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadedObject {
    /// Generated `<uuid>[.ext]`.
    pub name: String,
    /// `upload/<name>`.
    pub path: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// A media item known to the control plane after registration.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub id: u64,
    pub name: String,
    pub path: String,
    /// Public URL, if the server returns one.
    pub url: Option<String>,
    /// Full payload JSON.
    pub raw: serde_json::Value,
}

/// Parameters for [`Client::create_lip_sync`](crate::Client::create_lip_sync).
#[derive(Debug, Clone, Default, Serialize)]
pub struct LipSyncRequest {
    /// Storage path of the source video, e.g. `upload/<uuid>.mp4`.
    pub customer_video_path: String,
    /// Seconds. Must be strictly positive.
    pub customer_video_duration: f64,
    /// Script the avatar should speak.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A freshly created lip-sync job.
#[derive(Debug, Clone)]
pub struct LipSyncJob {
    pub job_id: u64,
    pub status: String,
    /// Full payload JSON.
    pub raw: serde_json::Value,
}

/// Result of [`Client::extract_last_frame`](crate::Client::extract_last_frame).
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub frame_url: String,
    /// Full payload JSON.
    pub raw: serde_json::Value,
}

/// Current state of a job. `status` is passed through as the server reports it.
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub job_id: u64,
    pub status: String,
    /// 0-100, if reported.
    pub progress: Option<f64>,
    /// Output video, once rendered.
    pub result_url: Option<String>,
    /// Server-side failure reason, if any.
    pub error_message: Option<String>,
    /// Full payload JSON.
    pub raw: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Internal deserialization helpers (not part of the public API surface)
// ---------------------------------------------------------------------------

/// The control plane's uniform `{ code, message, data }` wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Body of the media registration call.
#[derive(Serialize)]
pub(crate) struct RegisterMediaBody<'a> {
    pub name: &'a str,
    pub path: &'a str,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// Body of the last-frame extraction call.
#[derive(Serialize)]
pub(crate) struct LastFrameBody<'a> {
    pub video_path: &'a str,
    pub video_duration: f64,
}

/// Body of the job detail call.
#[derive(Serialize)]
pub(crate) struct JobDetailBody {
    pub job_id: u64,
}

/// Pull a string out of a JSON value, or `""` if missing.
pub(crate) fn json_str(val: &serde_json::Value, key: &str) -> String {
    json_str_opt(val, key).unwrap_or_default()
}

/// Pull a string out of a JSON value, or `None`.
pub(crate) fn json_str_opt(val: &serde_json::Value, key: &str) -> Option<String> {
    val.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Pull a `u64` out of a JSON value, or `0` if missing.
pub(crate) fn json_u64(val: &serde_json::Value, key: &str) -> u64 {
    val.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Pull an `f64` out of a JSON value, or `None`.
pub(crate) fn json_f64_opt(val: &serde_json::Value, key: &str) -> Option<f64> {
    val.get(key).and_then(|v| v.as_f64())
}

pub(crate) fn media_asset_from_value(val: serde_json::Value) -> MediaAsset {
    MediaAsset {
        id: json_u64(&val, "id"),
        name: json_str(&val, "name"),
        path: json_str(&val, "path"),
        url: json_str_opt(&val, "url"),
        raw: val,
    }
}

pub(crate) fn lip_sync_job_from_value(val: serde_json::Value) -> LipSyncJob {
    LipSyncJob {
        job_id: json_u64(&val, "job_id"),
        status: json_str(&val, "status"),
        raw: val,
    }
}

pub(crate) fn frame_result_from_value(val: serde_json::Value) -> FrameResult {
    FrameResult {
        frame_url: json_str(&val, "frame_url"),
        raw: val,
    }
}

pub(crate) fn job_detail_from_value(val: serde_json::Value) -> JobDetail {
    JobDetail {
        job_id: json_u64(&val, "job_id"),
        status: json_str(&val, "status"),
        progress: json_f64_opt(&val, "progress"),
        result_url: json_str_opt(&val, "result_url"),
        error_message: json_str_opt(&val, "error_msg"),
        raw: val,
    }
}
