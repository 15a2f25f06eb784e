use thiserror::Error;

/// All errors that can occur when using the lip-sync SDK.
#[derive(Error, Debug)]
pub enum LipSyncError {
    /// No auth token was supplied to the builder or the environment.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A control-plane call returned a non-2xx HTTP status.
    #[error("API error {status_code}: {message}")]
    Api { status_code: u16, message: String },

    /// The response envelope carried a nonzero application code.
    #[error("{message} (code {code})")]
    Envelope { code: i64, message: String },

    /// The object-storage PUT returned a non-2xx HTTP status.
    #[error("upload failed with status {status_code}: {message}")]
    Upload { status_code: u16, message: String },

    /// A required argument was missing or out of range. Raised before any
    /// request is sent.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// A header name or value could not be encoded.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A transport-level HTTP error from reqwest.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not a valid envelope or payload.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An I/O error, typically from reading a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience alias for `Result<T, LipSyncError>`.
pub type Result<T> = std::result::Result<T, LipSyncError>;
