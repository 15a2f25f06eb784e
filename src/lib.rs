//! # lipsync
//!
//! Async Rust client for the lip-sync video generation API. Upload media to
//! object storage, start lip-sync jobs, grab the last frame of a clip and
//! check on job progress.
//!
//! Control-plane calls go through a retrying JSON executor that unwraps the
//! service's `{ code, message, data }` envelope. Uploads are a single PUT to
//! object storage signed with a short-lived credential (see [`oss`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use lipsync::{Client, LipSyncRequest};
//!
//! #[tokio::main]
//! async fn main() -> lipsync::Result<()> {
//!     let client = Client::new("your-session-token");
//!
//!     let asset = client.upload_file("speaker.mp4", "video/mp4").await?;
//!     let job = client
//!         .create_lip_sync(&LipSyncRequest {
//!             customer_video_path: asset.path,
//!             customer_video_duration: 8.0,
//!             text: "Welcome to the demo.".into(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let detail = client.get_job_detail(job.job_id).await?;
//!     println!("{}: {}", detail.job_id, detail.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Builder pattern
//!
//! ```no_run
//! use lipsync::ClientBuilder;
//! use std::time::Duration;
//!
//! # fn example() -> lipsync::Result<()> {
//! let client = ClientBuilder::new()
//!     .token("your-session-token")
//!     .base_url("https://staging.example.com")
//!     .retry_delay(Duration::from_millis(500))
//!     .non_retryable_codes([40001])
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod errors;
mod models;
pub mod oss;

pub use client::{ApiRequest, Client, ClientBuilder, ClientConfig, RetryPolicy};
pub use errors::{LipSyncError, Result};
pub use models::{
    FrameResult, JobDetail, LipSyncJob, LipSyncRequest, MediaAsset, MediaType, UploadCredential,
    UploadedObject,
};
