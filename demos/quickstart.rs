//! Quick-start walkthrough for the lipsync Rust SDK.
//!
//! Run with:
//!   LIPSYNC_TOKEN=... cargo run --example quickstart -- speaker.mp4
//!
//! Or pass the token directly in code (not recommended for production).

use lipsync::{ClientBuilder, LipSyncRequest};
use std::time::Duration;

#[tokio::main]
async fn main() -> lipsync::Result<()> {
    let video = std::env::args().nth(1).unwrap_or_else(|| "speaker.mp4".into());

    // -----------------------------------------------------------------------
    // 1. Create a client (reads LIPSYNC_TOKEN from environment)
    // -----------------------------------------------------------------------
    let client = ClientBuilder::new().build()?;

    // Or provide the token directly:
    // let client = lipsync::Client::new("your-session-token");

    // -----------------------------------------------------------------------
    // 2. Upload step by step: credential, signed PUT, registration
    // -----------------------------------------------------------------------
    let credential = client.get_upload_token().await?;
    println!("Got upload credential {:?}", credential);

    let bytes = tokio::fs::read(&video).await?;
    let object = client
        .upload_to_oss(bytes, &video, "video/mp4", &credential)
        .await?;
    println!("Stored as {} (type {})", object.path, object.media_type.code());

    let asset = client.register_media(&object).await?;
    println!("Registered media #{}", asset.id);
    println!();

    // Or all three in one call:
    // let asset = client.upload_file(&video, "video/mp4").await?;

    // -----------------------------------------------------------------------
    // 3. Grab the last frame as a thumbnail
    // -----------------------------------------------------------------------
    let duration = 8.0;
    let frame = client.extract_last_frame(&asset.path, duration).await?;
    println!("Last frame: {}", frame.frame_url);

    // -----------------------------------------------------------------------
    // 4. Start a lip-sync job
    // -----------------------------------------------------------------------
    let job = client
        .create_lip_sync(&LipSyncRequest {
            customer_video_path: asset.path.clone(),
            customer_video_duration: duration,
            text: "Thanks for watching. See you next week!".into(),
            title: Some("weekly sign-off".into()),
            ..Default::default()
        })
        .await?;
    println!("Job {} created ({})", job.job_id, job.status);

    // -----------------------------------------------------------------------
    // 5. Check on it until the result shows up
    // -----------------------------------------------------------------------
    for _ in 0..60 {
        let detail = client.get_job_detail(job.job_id).await?;
        print!("  Status: {}", detail.status);
        if let Some(p) = detail.progress {
            print!(" ({:.0}%)", p);
        }
        println!();

        if let Some(url) = detail.result_url {
            println!("Done: {}", url);
            break;
        }
        if let Some(reason) = detail.error_message {
            println!("Failed: {}", reason);
            break;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    Ok(())
}
