use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, USER_AGENT,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{LipSyncError, Result};
use crate::models::{
    frame_result_from_value, job_detail_from_value, lip_sync_job_from_value,
    media_asset_from_value, Envelope, FrameResult, JobDetail, JobDetailBody, LastFrameBody,
    LipSyncJob, LipSyncRequest, MediaAsset, MediaType, RegisterMediaBody, UploadCredential,
    UploadedObject,
};
use crate::oss;

const DEFAULT_BASE_URL: &str = "https://api.lipsync.video";
const DEFAULT_STORAGE_URL: &str = "https://lipsync-media.oss-cn-hangzhou.aliyuncs.com";
const DEFAULT_BUCKET: &str = "lipsync-media";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const TOKEN_ENV: &str = "LIPSYNC_TOKEN";
const TOKEN_HEADER: &str = "token";
const TRACE_HEADER: &str = "x-trace-id";

/// The service only answers requests that look like they come from its web app.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const UPLOAD_TOKEN_PATH: &str = "/api/upload/token";
const REGISTER_MEDIA_PATH: &str = "/api/media/register";
const CREATE_LIP_SYNC_PATH: &str = "/api/lipsync/create";
const LAST_FRAME_PATH: &str = "/api/video/last-frame";
const JOB_DETAIL_PATH: &str = "/api/job/detail";

/// When and how often the request executor retries.
///
/// The default retries every failure, including application errors that
/// will never succeed on a second try (a rejected argument, an expired
/// token). This mirrors the service's own web client. List such codes in
/// [`non_retryable_codes`](Self::non_retryable_codes) to fail fast on them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Fixed wait between attempts. Default: 1s.
    pub delay: Duration,
    /// Envelope codes returned to the caller without retrying. Default: empty.
    pub non_retryable_codes: Vec<i64>,
}

impl RetryPolicy {
    /// Whether a failed attempt should be tried again (budget permitting).
    pub fn should_retry(&self, err: &LipSyncError) -> bool {
        match err {
            LipSyncError::Envelope { code, .. } => !self.non_retryable_codes.contains(code),
            LipSyncError::Validation(_) | LipSyncError::InvalidHeader(_) => false,
            _ => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
            non_retryable_codes: Vec::new(),
        }
    }
}

/// Settings fixed at construction. Shared read-only by every call.
#[derive(Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub storage_url: String,
    pub bucket: String,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    /// Fixed headers, auth token and caller extras, already merged. The token
    /// value is marked sensitive and does not show up in `Debug` output.
    pub default_headers: HeaderMap,
}

/// A single control-plane call: path, method, optional JSON body and
/// per-call header overrides.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub path: String,
    pub method: Method,
    pub body: Option<serde_json::Value>,
    /// Merged last; wins over every default.
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// All of the service's endpoints are POST.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Override a header for this call only.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Builder for constructing a [`Client`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use lipsync::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> lipsync::Result<()> {
/// let client = ClientBuilder::new()
///     .token("your-session-token")
///     .extra_header("x-app-version", "2.4.0")
///     .max_retries(5)
///     .timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    token: Option<String>,
    base_url: String,
    storage_url: String,
    bucket: String,
    extra_headers: Vec<(String, String)>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            extra_headers: Vec::new(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the auth token sent in the `token` header.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the control-plane base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Override the object-storage endpoint uploads are PUT to.
    pub fn storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = url.into();
        self
    }

    /// Override the bucket name used in the signed resource path.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Add a header sent on every control-plane call. Replaces a built-in
    /// default of the same name.
    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Retries after the first attempt (defaults to 3).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.retry.max_retries = n;
        self
    }

    /// Fixed wait between attempts (defaults to 1 second).
    pub fn retry_delay(mut self, d: Duration) -> Self {
        self.retry.delay = d;
        self
    }

    /// Envelope codes that fail immediately instead of being retried.
    pub fn non_retryable_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.retry.non_retryable_codes = codes.into_iter().collect();
        self
    }

    /// Set the HTTP transport timeout (defaults to 60 seconds).
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Build the [`Client`].
    ///
    /// If no token was set via [`token`](Self::token), the builder reads the
    /// `LIPSYNC_TOKEN` environment variable.
    ///
    /// Returns [`LipSyncError::Authentication`] if no token is available and
    /// [`LipSyncError::InvalidHeader`] if the token or an extra header cannot
    /// be sent as an HTTP header.
    pub fn build(self) -> Result<Client> {
        let token = self
            .token
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .ok_or_else(|| {
                LipSyncError::Authentication(
                    "a token is required. Pass it to ClientBuilder::token() \
                     or set the LIPSYNC_TOKEN environment variable."
                        .into(),
                )
            })?;

        let default_headers = default_headers(&token, &self.extra_headers)?;

        // No cookie store: requests never carry ambient credentials.
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(LipSyncError::Http)?;

        let config = ClientConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            storage_url: self.storage_url.trim_end_matches('/').to_string(),
            bucket: self.bucket,
            retry: self.retry,
            timeout: self.timeout,
            default_headers,
        };

        Ok(Client {
            config: Arc::new(config),
            http,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The lip-sync API client.
///
/// Cheap to clone; clones share configuration and the connection pool.
///
/// # Example
///
/// ```no_run
/// use lipsync::{Client, LipSyncRequest};
///
/// # async fn example() -> lipsync::Result<()> {
/// let client = Client::new("your-session-token");
///
/// let video = tokio::fs::read("speaker.mp4").await?;
/// let asset = client.upload_media(video, "speaker.mp4", "video/mp4").await?;
///
/// let job = client
///     .create_lip_sync(&LipSyncRequest {
///         customer_video_path: asset.path.clone(),
///         customer_video_duration: 12.0,
///         text: "Hello from Rust".into(),
///         ..Default::default()
///     })
///     .await?;
/// println!("job {} is {}", job.job_id, job.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
}

impl Client {
    /// Create a new client with the given token and default settings.
    ///
    /// For customization, use [`ClientBuilder`] instead.
    ///
    /// # Panics
    ///
    /// If the token contains characters that are not valid in an HTTP header
    /// or the TLS backend cannot be initialized.
    pub fn new(token: impl Into<String>) -> Self {
        ClientBuilder::new()
            .token(token)
            .build()
            .expect("failed to build client")
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch a short-lived credential for uploading to object storage.
    pub async fn get_upload_token(&self) -> Result<UploadCredential> {
        self.request(ApiRequest::post(UPLOAD_TOKEN_PATH)).await
    }

    /// Upload `data` to object storage under a freshly generated name.
    ///
    /// The extension of `file_name` is kept; nothing else from it is used.
    /// The PUT is signed with `credential` and sent exactly once. Calling this
    /// again after a failure produces a new name, date and signature.
    ///
    /// # Errors
    ///
    /// - [`LipSyncError::Upload`] if storage answers with a non-2xx status.
    /// - [`LipSyncError::Http`] on transport failure.
    pub async fn upload_to_oss(
        &self,
        data: Vec<u8>,
        file_name: &str,
        content_type: &str,
        credential: &UploadCredential,
    ) -> Result<UploadedObject> {
        let name = oss::object_name(file_name);
        let path = format!("{}/{}", oss::UPLOAD_PREFIX, name);
        let resource = format!("/{}/{}", self.config.bucket, path);
        let date = oss::http_date(Utc::now());

        let headers = oss::signed_put_headers(
            credential,
            content_type,
            &date,
            &resource,
            BROWSER_USER_AGENT,
        )?;

        let size = data.len();
        let url = format!("{}/{}", self.config.storage_url, path);
        let resp = self
            .http
            .put(&url)
            .headers(headers)
            .body(data)
            .send()
            .await
            .map_err(LipSyncError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("unknown status").to_string()
            } else {
                text
            };
            return Err(LipSyncError::Upload {
                status_code: status.as_u16(),
                message,
            });
        }

        info!(path = %path, size, "uploaded object");

        Ok(UploadedObject {
            name,
            path,
            media_type: MediaType::from_content_type(content_type),
        })
    }

    /// Tell the control plane about an object already placed in storage.
    pub async fn register_media(&self, object: &UploadedObject) -> Result<MediaAsset> {
        let body = RegisterMediaBody {
            name: &object.name,
            path: &object.path,
            media_type: object.media_type,
        };
        let data: serde_json::Value = self
            .request(ApiRequest::post(REGISTER_MEDIA_PATH).json(&body)?)
            .await?;
        Ok(media_asset_from_value(data))
    }

    /// Fetch a credential, upload `data` and register it, in that order.
    pub async fn upload_media(
        &self,
        data: Vec<u8>,
        file_name: &str,
        content_type: &str,
    ) -> Result<MediaAsset> {
        let credential = self.get_upload_token().await?;
        let object = self
            .upload_to_oss(data, file_name, content_type, &credential)
            .await?;
        self.register_media(&object).await
    }

    /// Read a local file and hand it to [`upload_media`](Self::upload_media).
    ///
    /// # Errors
    ///
    /// - [`LipSyncError::Io`] if the file cannot be read.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        content_type: &str,
    ) -> Result<MediaAsset> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let data = tokio::fs::read(path).await.map_err(LipSyncError::Io)?;
        self.upload_media(data, &file_name, content_type).await
    }

    /// Start a lip-sync job that makes the speaker in a source video say `text`.
    ///
    /// # Errors
    ///
    /// - [`LipSyncError::Validation`] without any request if the video path or
    ///   text is empty, or the duration is not strictly positive.
    pub async fn create_lip_sync(&self, req: &LipSyncRequest) -> Result<LipSyncJob> {
        validate_lip_sync(req)?;
        let data: serde_json::Value = self
            .request(ApiRequest::post(CREATE_LIP_SYNC_PATH).json(req)?)
            .await?;
        Ok(lip_sync_job_from_value(data))
    }

    /// Grab the final frame of an uploaded video as an image.
    ///
    /// # Errors
    ///
    /// - [`LipSyncError::Validation`] without any request if the path is empty
    ///   or the duration is not strictly positive.
    pub async fn extract_last_frame(
        &self,
        video_path: &str,
        video_duration: f64,
    ) -> Result<FrameResult> {
        require_non_empty("video_path", video_path)?;
        require_positive("video_duration", video_duration)?;

        let body = LastFrameBody {
            video_path,
            video_duration,
        };
        let data: serde_json::Value = self
            .request(ApiRequest::post(LAST_FRAME_PATH).json(&body)?)
            .await?;
        Ok(frame_result_from_value(data))
    }

    /// Look up the current state of a job.
    ///
    /// # Errors
    ///
    /// - [`LipSyncError::Validation`] without any request if `job_id` is 0.
    pub async fn get_job_detail(&self, job_id: u64) -> Result<JobDetail> {
        if job_id == 0 {
            return Err(LipSyncError::Validation("job_id is required".into()));
        }
        let data: serde_json::Value = self
            .request(ApiRequest::post(JOB_DETAIL_PATH).json(&JobDetailBody { job_id })?)
            .await?;
        Ok(job_detail_from_value(data))
    }

    /// Execute a control-plane call, retrying per the configured [`RetryPolicy`].
    ///
    /// Success needs a 2xx status and an envelope code of 0; the envelope's
    /// `data` is then decoded into `T`. Every other outcome counts as a
    /// failure and is retried after a fixed delay until the budget runs out,
    /// at which point the last error is returned as-is.
    pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T> {
        let policy = &self.config.retry;
        let mut last_err: Option<LipSyncError> = None;

        for attempt in 0..=policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(policy.delay).await;
            }

            let err = match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !policy.should_retry(&err) {
                return Err(err);
            }

            if attempt < policy.max_retries {
                warn!(
                    path = %req.path,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error = %err,
                    "request failed, retrying"
                );
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| LipSyncError::Api {
            status_code: 0,
            message: "request failed after all retries".into(),
        }))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// One attempt: send, check status, unwrap the envelope.
    async fn send_once<T: DeserializeOwned>(&self, req: &ApiRequest) -> Result<T> {
        let trace_id = Uuid::new_v4().to_string();
        let headers = request_headers(&self.config.default_headers, &trace_id, &req.headers)?;
        let url = format!("{}{}", self.config.base_url, req.path);

        debug!(method = %req.method, path = %req.path, trace_id = %trace_id, "sending request");

        let mut builder = self.http.request(req.method.clone(), &url).headers(headers);
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(LipSyncError::Http)?;
        let status = response.status();
        let text = response.text().await.map_err(LipSyncError::Http)?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&text)
                .ok()
                .map(|env| env.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            return Err(LipSyncError::Api {
                status_code: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = serde_json::from_str(&text)?;
        if envelope.code != 0 {
            return Err(LipSyncError::Envelope {
                code: envelope.code,
                message: envelope.message,
            });
        }

        Ok(serde_json::from_value(envelope.data)?)
    }
}

/// Fixed headers every control-plane call carries, with `extras` layered on top.
fn default_headers(token: &str, extras: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, token, x-trace-id"),
    );

    let (name, mut value) = parse_header(TOKEN_HEADER, token)?;
    value.set_sensitive(true);
    headers.insert(name, value);

    for (name, value) in extras {
        let (name, value) = parse_header(name, value)?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Headers for one attempt: defaults, a fresh trace id, then per-call overrides.
fn request_headers(
    defaults: &HeaderMap,
    trace_id: &str,
    overrides: &HeaderMap,
) -> Result<HeaderMap> {
    let mut headers = defaults.clone();
    let (name, value) = parse_header(TRACE_HEADER, trace_id)?;
    headers.insert(name, value);
    for (name, value) in overrides {
        headers.insert(name.clone(), value.clone());
    }
    Ok(headers)
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| LipSyncError::InvalidHeader(format!("{name}: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| LipSyncError::InvalidHeader(format!("{name}: {e}")))?;
    Ok((header_name, header_value))
}

fn validate_lip_sync(req: &LipSyncRequest) -> Result<()> {
    require_non_empty("customer_video_path", &req.customer_video_path)?;
    require_non_empty("text", &req.text)?;
    require_positive("customer_video_duration", req.customer_video_duration)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LipSyncError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_positive(field: &str, value: f64) -> Result<()> {
    // NaN fails too.
    if value.is_nan() || value <= 0.0 {
        return Err(LipSyncError::Validation(format!(
            "{field} must be greater than 0, got {value}"
        )));
    }
    Ok(())
}
