use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lipsync::{oss, Client, ClientBuilder, LipSyncError, LipSyncRequest, MediaType};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DELAY: Duration = Duration::from_millis(50);

fn client(server: &MockServer) -> Client {
    ClientBuilder::new()
        .token("test-token")
        .base_url(server.uri())
        .storage_url(server.uri())
        .bucket("test-bucket")
        .retry_delay(DELAY)
        .build()
        .unwrap()
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "message": "ok", "data": data }))
}

fn credential_body() -> Value {
    json!({
        "accessKeyId": "STS.test-id",
        "accessKeySecret": "test-secret",
        "securityToken": "CAIS-test-token",
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_2xx_is_attempted_four_times() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let started = Instant::now();
    let err = client(&server).get_upload_token().await.unwrap_err();

    assert_eq!(request_count(&server).await, 4);
    assert!(started.elapsed() >= DELAY * 3);
    match err {
        LipSyncError::Api {
            status_code,
            message,
        } => {
            assert_eq!(status_code, 503);
            assert_eq!(message, "unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn nonzero_envelope_code_is_retried_and_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/job/detail"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": 40010, "message": "quota exhausted", "data": null })),
        )
        .mount(&server)
        .await;

    let err = client(&server).get_job_detail(7).await.unwrap_err();

    assert_eq!(request_count(&server).await, 4);
    assert!(matches!(err, LipSyncError::Envelope { code: 40010, .. }));
    let text = err.to_string();
    assert!(text.contains("quota exhausted"), "{text}");
    assert!(text.contains("40010"), "{text}");
}

#[tokio::test]
async fn success_on_attempt_k_stops_retrying() {
    for k in 1..=4u64 {
        let server = MockServer::start().await;
        if k > 1 {
            Mock::given(method("POST"))
                .and(path("/api/job/detail"))
                .respond_with(ResponseTemplate::new(500))
                .up_to_n_times(k - 1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/api/job/detail"))
            .respond_with(ok(json!({ "job_id": k, "status": "done" })))
            .mount(&server)
            .await;

        let job = client(&server).get_job_detail(k).await.unwrap();

        assert_eq!(job.job_id, k);
        assert_eq!(job.status, "done");
        assert_eq!(request_count(&server).await as u64, k);
    }
}

#[tokio::test]
async fn non_retryable_code_fails_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "code": 40001, "msg": "bad param" })),
        )
        .mount(&server)
        .await;

    let client = ClientBuilder::new()
        .token("test-token")
        .base_url(server.uri())
        .retry_delay(DELAY)
        .non_retryable_codes([40001])
        .build()
        .unwrap();

    let err = client.get_upload_token().await.unwrap_err();
    assert!(matches!(err, LipSyncError::Envelope { code: 40001, .. }));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn zero_retries_means_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = ClientBuilder::new()
        .token("test-token")
        .base_url(server.uri())
        .max_retries(0)
        .build()
        .unwrap();

    assert!(client.get_upload_token().await.is_err());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn undecodable_body_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).get_upload_token().await.unwrap_err();
    assert!(matches!(err, LipSyncError::Decode(_)));
    assert_eq!(request_count(&server).await, 4);
}

#[tokio::test]
async fn control_plane_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ClientBuilder::new()
        .token("test-token")
        .base_url(server.uri())
        .extra_header("x-app-version", "9")
        .retry_delay(Duration::from_millis(1))
        .build()
        .unwrap();
    let _ = client.get_upload_token().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);

    let first = &requests[0].headers;
    let get = |name: &str| first.get(name).unwrap().to_str().unwrap().to_string();
    assert_eq!(get("token"), "test-token");
    assert_eq!(get("content-type"), "application/json");
    assert_eq!(get("access-control-allow-origin"), "*");
    assert_eq!(get("x-app-version"), "9");
    assert!(get("user-agent").starts_with("Mozilla/5.0"));

    // Each attempt gets its own trace id.
    let mut trace_ids: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-trace-id").unwrap().to_str().unwrap().to_string())
        .collect();
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 4);
}

#[tokio::test]
async fn raw_request_with_header_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/custom"))
        .and(header("token", "override"))
        .and(body_json(json!({ "a": 1 })))
        .respond_with(ok(json!({ "echo": true })))
        .mount(&server)
        .await;

    let req = lipsync::ApiRequest::post("/api/custom")
        .json(&json!({ "a": 1 }))
        .unwrap()
        .header("token", "override")
        .unwrap();
    let data: Value = client(&server).request(req).await.unwrap();
    assert_eq!(data, json!({ "echo": true }));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_lip_sync_rejects_locally() {
    let server = MockServer::start().await;
    let client = client(&server);

    let zero_duration = LipSyncRequest {
        customer_video_path: "upload/a.mp4".into(),
        customer_video_duration: 0.0,
        text: "hello".into(),
        ..Default::default()
    };
    let empty_path = LipSyncRequest {
        customer_video_path: String::new(),
        customer_video_duration: 4.0,
        text: "hello".into(),
        ..Default::default()
    };
    let empty_text = LipSyncRequest {
        customer_video_path: "upload/a.mp4".into(),
        customer_video_duration: 4.0,
        text: String::new(),
        ..Default::default()
    };

    for req in [zero_duration, empty_path, empty_text] {
        let err = client.create_lip_sync(&req).await.unwrap_err();
        assert!(matches!(err, LipSyncError::Validation(_)), "{err:?}");
    }
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn other_operations_reject_locally() {
    let server = MockServer::start().await;
    let client = client(&server);

    assert!(matches!(
        client.extract_last_frame("", 3.0).await,
        Err(LipSyncError::Validation(_))
    ));
    assert!(matches!(
        client.extract_last_frame("upload/a.mp4", -2.0).await,
        Err(LipSyncError::Validation(_))
    ));
    assert!(matches!(
        client.get_job_detail(0).await,
        Err(LipSyncError::Validation(_))
    ));
    assert_eq!(request_count(&server).await, 0);
}

// ---------------------------------------------------------------------------
// Convenience operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_lip_sync_sends_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/lipsync/create"))
        .and(body_json(json!({
            "customer_video_path": "upload/a.mp4",
            "customer_video_duration": 4.5,
            "text": "hello there",
            "voice_id": "v-1",
        })))
        .respond_with(ok(json!({ "job_id": 901, "status": "queued" })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client(&server)
        .create_lip_sync(&LipSyncRequest {
            customer_video_path: "upload/a.mp4".into(),
            customer_video_duration: 4.5,
            text: "hello there".into(),
            voice_id: Some("v-1".into()),
            title: None,
        })
        .await
        .unwrap();

    assert_eq!(job.job_id, 901);
    assert_eq!(job.status, "queued");
}

#[tokio::test]
async fn extract_last_frame_returns_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/last-frame"))
        .and(body_json(json!({ "video_path": "upload/a.mp4", "video_duration": 6.0 })))
        .respond_with(ok(json!({ "frame_url": "https://cdn.example.com/f.jpg" })))
        .mount(&server)
        .await;

    let frame = client(&server)
        .extract_last_frame("upload/a.mp4", 6.0)
        .await
        .unwrap();
    assert_eq!(frame.frame_url, "https://cdn.example.com/f.jpg");
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn token_then_upload_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload/token"))
        .respond_with(ok(credential_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/[0-9a-f-]{36}\.mp4$"))
        .and(header("content-type", "video/mp4"))
        .and(header("x-oss-forbid-overwrite", "true"))
        .and(header("x-oss-security-token", "CAIS-test-token"))
        .and(header_exists("authorization"))
        .and(header_exists("date"))
        .and(header_exists("x-oss-user-agent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let credential = client.get_upload_token().await.unwrap();
    let object = client
        .upload_to_oss(vec![0u8; 10], "a.mp4", "video/mp4", &credential)
        .await
        .unwrap();

    assert!(object.name.ends_with(".mp4"));
    assert_eq!(object.name.len(), 36 + 4);
    assert_eq!(object.path, format!("upload/{}", object.name));
    assert_eq!(object.media_type, MediaType::Video);
    assert_eq!(
        serde_json::to_value(&object).unwrap()["type"],
        json!(1)
    );

    // The server can rebuild the signature from what it received.
    let requests = server.received_requests().await.unwrap();
    let put = requests.iter().find(|r| r.method.as_str() == "PUT").unwrap();
    assert_eq!(put.body.len(), 10);

    let hdr = |name: &str| put.headers.get(name).unwrap().to_str().unwrap().to_string();
    let oss_headers = BTreeMap::from([
        ("x-oss-forbid-overwrite".to_string(), hdr("x-oss-forbid-overwrite")),
        ("x-oss-security-token".to_string(), hdr("x-oss-security-token")),
        ("x-oss-user-agent".to_string(), hdr("x-oss-user-agent")),
    ]);
    let resource = format!("/test-bucket/{}", object.path);
    let to_sign = oss::string_to_sign("PUT", "video/mp4", &hdr("date"), &oss_headers, &resource);
    let expected = oss::authorization("STS.test-id", &oss::sign("test-secret", &to_sign));
    assert_eq!(hdr("authorization"), expected);
}

#[tokio::test]
async fn upload_keeps_or_omits_extension() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(&server);
    let credential: lipsync::UploadCredential =
        serde_json::from_value(credential_body()).unwrap();

    let mov = client
        .upload_to_oss(b"clip".to_vec(), "clip.MOV", "video/quicktime", &credential)
        .await
        .unwrap();
    assert!(mov.name.ends_with(".MOV"));
    assert_eq!(mov.media_type, MediaType::Other);

    let bare = client
        .upload_to_oss(b"data".to_vec(), "voice", "audio/mpeg", &credential)
        .await
        .unwrap();
    assert!(!bare.name.contains('.'));
    assert_eq!(bare.media_type.code(), 2);
}

#[tokio::test]
async fn upload_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
        .mount(&server)
        .await;

    let client = client(&server);
    let credential: lipsync::UploadCredential =
        serde_json::from_value(credential_body()).unwrap();

    let err = client
        .upload_to_oss(vec![1, 2, 3], "a.mp4", "video/mp4", &credential)
        .await
        .unwrap_err();

    match err {
        LipSyncError::Upload {
            status_code,
            message,
        } => {
            assert_eq!(status_code, 403);
            assert_eq!(message, "SignatureDoesNotMatch");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn upload_failure_without_body_uses_reason() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let client = client(&server);
    let credential: lipsync::UploadCredential =
        serde_json::from_value(credential_body()).unwrap();

    let err = client
        .upload_to_oss(vec![1], "a.mp4", "video/mp4", &credential)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Conflict"), "{err}");
}

#[tokio::test]
async fn upload_media_registers_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload/token"))
        .respond_with(ok(credential_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/media/register"))
        .respond_with(ok(json!({ "id": 55, "name": "n", "path": "upload/n.mp4" })))
        .mount(&server)
        .await;

    let asset = client(&server)
        .upload_media(vec![0u8; 10], "a.mp4", "video/mp4")
        .await
        .unwrap();
    assert_eq!(asset.id, 55);

    let requests = server.received_requests().await.unwrap();
    let order: Vec<_> = requests.iter().map(|r| r.method.as_str().to_string()).collect();
    assert_eq!(order, ["POST", "PUT", "POST"]);

    let register: Value = requests[2].body_json().unwrap();
    assert_eq!(register["type"], json!(1));
    assert!(register["path"].as_str().unwrap().starts_with("upload/"));
    assert!(register["name"].as_str().unwrap().ends_with(".mp4"));
}

#[tokio::test]
async fn upload_file_reports_missing_file() {
    let server = MockServer::start().await;
    let err = client(&server)
        .upload_file("/definitely/not/here.mp4", "video/mp4")
        .await
        .unwrap_err();
    assert!(matches!(err, LipSyncError::Io(_)));
    assert_eq!(request_count(&server).await, 0);
}
