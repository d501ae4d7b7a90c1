use super::*;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::ConversionStatus;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    conversion_session::{ConversionPolicy, ConversionSessionController},
    timer::TokioTimer,
};

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<String>>>,
    job_statuses: Arc<Mutex<VecDeque<&'static str>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
}

impl MockState {
    async fn log(&self, line: String) {
        self.requests.lock().await.push(line);
    }
}

fn pack_json(id: i64) -> Value {
    json!({
        "id": id,
        "originalFilename": "faithful-32x.zip",
        "storageFilename": format!("{id}-faithful-32x.zip"),
        "size": 52_428_800u64,
        "uploadDate": "2024-05-01T10:15:30.123456",
        "fileHash": "3f786850e387550fdab836ed7e6dc881de23001b",
        "converted": false,
        "targetVersion": null,
        "originalPack": null
    })
}

fn converted_json(id: i64, source: i64, version: &str, pack_format: u32) -> Value {
    json!({
        "id": id,
        "originalFilename": "faithful-32x.zip",
        "storageFilename": format!("{id}-converted-{version}.zip"),
        "size": 51_000_000u64,
        "uploadDate": "2024-05-01T10:20:00",
        "fileHash": "89e6c98d92887913cadf06b2adb97f26cde4849b",
        "converted": true,
        "targetVersion": version,
        "originalPack": { "id": source },
        "packFormat": pack_format
    })
}

async fn list_packs(State(state): State<MockState>) -> Json<Value> {
    state.log("GET /api/resourcepacks".into()).await;
    Json(json!([pack_json(42), converted_json(99, 42, "1.19", 9)]))
}

async fn get_pack(State(state): State<MockState>, Path(id): Path<i64>) -> Response {
    state.log(format!("GET /api/resourcepacks/{id}")).await;
    if id == 42 {
        Json(pack_json(42)).into_response()
    } else {
        (StatusCode::NOT_FOUND, "Resource pack not found\n").into_response()
    }
}

async fn delete_pack(State(state): State<MockState>, Path(id): Path<i64>) -> Response {
    state.log(format!("DELETE /api/resourcepacks/{id}")).await;
    if id == 42 {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn pack_hash(State(state): State<MockState>, Path(id): Path<i64>) -> String {
    state.log(format!("GET /api/resourcepacks/{id}/hash")).await;
    "3f786850e387550fdab836ed7e6dc881de23001b\n".to_string()
}

async fn list_conversions(State(state): State<MockState>, Path(id): Path<i64>) -> Json<Value> {
    state
        .log(format!("GET /api/resourcepacks/{id}/conversions"))
        .await;
    Json(json!([
        converted_json(98, id, "1.18", 8),
        converted_json(99, id, "1.19", 9)
    ]))
}

#[derive(serde::Deserialize)]
struct ConvertQuery {
    version: Option<String>,
}

async fn start_conversion(
    State(state): State<MockState>,
    Path(id): Path<i64>,
    Query(query): Query<ConvertQuery>,
) -> Response {
    let version = query.version.unwrap_or_default();
    state
        .log(format!("POST /api/resourcepacks/{id}/convert?version={version}"))
        .await;
    if version == "9.9" {
        return (StatusCode::BAD_REQUEST, "Unsupported target version: 9.9").into_response();
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "id": 7,
            "status": "PENDING",
            "targetVersion": version,
            "createdAt": "2024-05-01T10:16:00"
        })),
    )
        .into_response()
}

async fn conversion_job(State(state): State<MockState>, Path(job_id): Path<i64>) -> Json<Value> {
    state
        .log(format!("GET /api/resourcepacks/conversions/{job_id}"))
        .await;
    let status = {
        let mut statuses = state.job_statuses.lock().await;
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or("COMPLETED")
        } else {
            statuses.front().copied().unwrap_or("COMPLETED")
        }
    };
    let mut job = json!({
        "id": job_id,
        "status": status,
        "targetVersion": "1.19",
        "consoleLog": "Converting pack\n"
    });
    if status == "COMPLETED" {
        job["completedAt"] = json!("2024-05-01T10:17:42.5");
    }
    Json(job)
}

async fn upload_pack(State(state): State<MockState>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map(|b| b.len()).unwrap_or_default();
        state.log(format!("POST /api/resourcepacks {filename}")).await;
        state
            .uploads
            .lock()
            .await
            .push((filename.clone(), content_type, bytes));
        if filename == "aborted.zip" {
            return StatusCode::NO_CONTENT.into_response();
        }
        let mut record = pack_json(43);
        record["originalFilename"] = json!(filename);
        record["size"] = json!(bytes);
        return (StatusCode::CREATED, Json(record)).into_response();
    }
    (StatusCode::BAD_REQUEST, "Please select a file to upload").into_response()
}

async fn spawn_mock_server(state: MockState) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/api/resourcepacks", get(list_packs).post(upload_pack))
        .route(
            "/api/resourcepacks/conversions/:job_id",
            get(conversion_job),
        )
        .route("/api/resourcepacks/:id", get(get_pack).delete(delete_pack))
        .route("/api/resourcepacks/:id/hash", get(pack_hash))
        .route("/api/resourcepacks/:id/conversions", get(list_conversions))
        .route("/api/resourcepacks/:id/convert", post(start_conversion))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/"))
}

#[tokio::test]
async fn decodes_pack_listing_and_single_pack() -> Result<()> {
    let state = MockState::default();
    let base_url = spawn_mock_server(state.clone()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;
    assert!(!api.base_url().ends_with('/'));

    let packs = api.list_packs().await?;
    assert_eq!(packs.len(), 2);
    assert!(!packs[0].converted);
    assert!(packs[1].is_conversion_of(PackId(42)));
    assert_eq!(packs[1].pack_format, Some(9));

    let pack = api.get_pack(PackId(42)).await?;
    assert_eq!(pack.storage_filename, "42-faithful-32x.zip");
    assert_eq!(pack.size, 52_428_800);
    Ok(())
}

#[tokio::test]
async fn missing_pack_keeps_status_and_plain_text_body() -> Result<()> {
    let base_url = spawn_mock_server(MockState::default()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let err = api.get_pack(PackId(5)).await.expect_err("missing pack");
    assert_eq!(err.status(), Some(404));
    match err {
        ApiClientError::Status(status) => {
            assert_eq!(status.code, shared::error::ErrorCode::NotFound);
            assert_eq!(status.message, "Resource pack not found");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = api.delete_pack(PackId(5)).await.expect_err("missing pack");
    assert_eq!(err.status(), Some(404));
    api.delete_pack(PackId(42)).await?;
    Ok(())
}

#[tokio::test]
async fn pack_hash_is_returned_without_trailing_whitespace() -> Result<()> {
    let base_url = spawn_mock_server(MockState::default()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let hash = api.pack_hash(PackId(42)).await?;
    assert_eq!(hash, "3f786850e387550fdab836ed7e6dc881de23001b");
    Ok(())
}

#[tokio::test]
async fn conversion_request_carries_version_as_query_parameter() -> Result<()> {
    let state = MockState::default();
    let base_url = spawn_mock_server(state.clone()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let version = VersionString::parse("1.20.4")?;
    let job = api.start_conversion(PackId(42), &version).await?;
    assert_eq!(job.id, JobId(7));
    assert_eq!(job.status, ConversionStatus::Pending);
    assert_eq!(job.target_version, "1.20.4");
    assert!(job.created_at.is_some());

    assert_eq!(
        state.requests.lock().await.clone(),
        vec!["POST /api/resourcepacks/42/convert?version=1.20.4".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn rejected_conversion_surfaces_server_text() -> Result<()> {
    let base_url = spawn_mock_server(MockState::default()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let version = VersionString::parse("9.9")?;
    let err = api
        .start_conversion(PackId(42), &version)
        .await
        .expect_err("rejected version");
    assert_eq!(err.status(), Some(400));
    assert!(err.to_string().contains("Unsupported target version: 9.9"));
    Ok(())
}

#[tokio::test]
async fn upload_sends_zip_as_multipart_file_part() -> Result<()> {
    let state = MockState::default();
    let base_url = spawn_mock_server(state.clone()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let upload = PackUpload::new("my-pack.zip", b"PK\x03\x04fake".to_vec())?;
    let record = api.upload_pack(upload).await?;
    assert_eq!(record.original_filename, "my-pack.zip");
    assert_eq!(record.size, 8);

    let uploads = state.uploads.lock().await.clone();
    assert_eq!(
        uploads,
        vec![("my-pack.zip".to_string(), "application/zip".to_string(), 8)]
    );
    Ok(())
}

#[tokio::test]
async fn upload_through_trait_object_keeps_filename_and_mime() -> Result<()> {
    let state = MockState::default();
    let base_url = spawn_mock_server(state.clone()).await?;
    let api: Arc<dyn ResourcePackApi> = Arc::new(HttpResourcePackApi::new(&base_url)?);

    let upload = PackUpload::new("Faithful 64x.ZIP", vec![0x50, 0x4b, 0x05, 0x06])?;
    let record = api.upload_pack(upload).await?;
    assert_eq!(record.id, PackId(43));
    assert_eq!(record.original_filename, "Faithful 64x.ZIP");

    assert_eq!(
        state.uploads.lock().await.clone(),
        vec![(
            "Faithful 64x.ZIP".to_string(),
            "application/zip".to_string(),
            4
        )]
    );
    assert_eq!(
        state.requests.lock().await.clone(),
        vec!["POST /api/resourcepacks Faithful 64x.ZIP".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn aborted_upload_is_not_mistaken_for_a_stored_pack() -> Result<()> {
    let base_url = spawn_mock_server(MockState::default()).await?;
    let api = HttpResourcePackApi::new(&base_url)?;

    let upload = PackUpload::new("aborted.zip", b"PK".to_vec())?;
    let err = api.upload_pack(upload).await.expect_err("aborted upload");
    assert!(matches!(
        err,
        ApiClientError::Decode {
            context: "upload_pack",
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() -> Result<()> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let api = HttpResourcePackApi::new(&format!("http://{addr}"))?;
    let err = api.list_packs().await.expect_err("nothing listening");
    assert!(matches!(err, ApiClientError::Transport(_)), "{err}");
    assert_eq!(err.status(), None);
    Ok(())
}

#[test]
fn base_url_validation() {
    assert_eq!(
        normalize_base_url(" http://localhost:8080/ ").expect("valid"),
        "http://localhost:8080"
    );
    assert_eq!(
        normalize_base_url("https://packs.example.org/backend/").expect("valid"),
        "https://packs.example.org/backend"
    );
    for bad in [
        "localhost:8080",
        "ftp://packs.example.org",
        "http://packs.example.org/?x=1",
        "http://packs.example.org/#top",
        "",
    ] {
        assert!(
            matches!(
                normalize_base_url(bad),
                Err(ApiClientError::InvalidBaseUrl { .. })
            ),
            "{bad} should be rejected"
        );
    }
}

#[tokio::test]
async fn controller_runs_a_full_conversion_over_http() -> Result<()> {
    let state = MockState::default();
    state
        .job_statuses
        .lock()
        .await
        .extend(["PENDING", "IN_PROGRESS", "COMPLETED"]);
    let base_url = spawn_mock_server(state.clone()).await?;
    let api: Arc<dyn ResourcePackApi> = Arc::new(HttpResourcePackApi::new(&base_url)?);

    let session = ConversionSessionController::new_with_dependencies(
        api,
        Arc::new(TokioTimer),
        ConversionPolicy {
            poll_interval: Duration::from_millis(10),
            ..ConversionPolicy::default()
        },
        PackId(42),
    );
    session.start_conversion("1.19").await?;
    let settled =
        tokio::time::timeout(Duration::from_secs(5), session.wait_until_settled()).await?;

    assert_eq!(settled.converted_pack().map(|pack| pack.id), Some(PackId(99)));
    assert_eq!(settled.polls, 3);
    let job = settled.job.expect("final job");
    assert_eq!(job.status, ConversionStatus::Completed);
    assert!(job.completed_at.is_some());

    let requests = state.requests.lock().await.clone();
    assert_eq!(
        requests,
        vec![
            "POST /api/resourcepacks/42/convert?version=1.19".to_string(),
            "GET /api/resourcepacks/conversions/7".to_string(),
            "GET /api/resourcepacks/conversions/7".to_string(),
            "GET /api/resourcepacks/conversions/7".to_string(),
            "GET /api/resourcepacks/42/conversions".to_string(),
        ]
    );
    Ok(())
}
