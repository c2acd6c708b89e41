//! HTTP surface.
//!
//! Field names in the JSON envelopes (`IPFS`, `S3`, `IpfsData`, ...) are part
//! of the public interface and are kept exactly as clients expect them.

mod extract;

pub use extract::{ApiError, FormFields};

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use stores::{ContentRecord, ContentStoreError};
use tracing::Instrument;

use crate::orchestrator::{Blob, Compensation, CreateError, DualStore, Retrieval};

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<DualStore>,
    pub max_upload_bytes: usize,
    pub started: Instant,
}

impl WebState {
    pub fn new(store: Arc<DualStore>, max_upload_bytes: usize) -> Self {
        Self {
            store,
            max_upload_bytes,
            started: Instant::now(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/getFile", get(get_file))
        .route("/deleteFile", delete(delete_file))
        .layer(DefaultBodyLimit::max(limit))
        .layer(middleware::from_fn(continue_trace))
        .with_state(state)
}

/// Wrap each request in a span, parented to the caller's `traceparent` when
/// one is sent.
async fn continue_trace(req: Request, next: Next) -> Response {
    let traceparent = req
        .headers()
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let span = crate::span_with_parent!(
        traceparent.as_deref(),
        "http.request",
        http.method = %req.method(),
        http.path = %req.uri().path()
    );

    next.run(req).instrument(span).await
}

#[derive(Debug, Serialize)]
struct IpfsData {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Name")]
    name: String,
    /// Decimal string, as the node reports it.
    #[serde(rename = "Size")]
    size: String,
}

impl IpfsData {
    fn new(record: &ContentRecord, fallback_name: &str) -> Self {
        Self {
            hash: record.identifier.to_string(),
            name: record.name.clone().unwrap_or_else(|| fallback_name.to_string()),
            size: record.size.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    #[serde(rename = "S3")]
    s3: bool,
    #[serde(rename = "IPFS")]
    ipfs: bool,
    #[serde(rename = "IpfsData", skip_serializing_if = "Option::is_none")]
    ipfs_data: Option<IpfsData>,
    #[serde(rename = "Message", skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "Rollback", skip_serializing_if = "Option::is_none")]
    rollback: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetResponse {
    #[serde(rename = "Url", skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    /// Base64 of the content, in inline read mode.
    #[serde(rename = "Buffer", skip_serializing_if = "Option::is_none")]
    buffer: Option<String>,
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size")]
    size: u64,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    #[serde(rename = "IPFS")]
    ipfs: bool,
    #[serde(rename = "S3")]
    s3: bool,
    #[serde(rename = "Message")]
    message: String,
}

fn backend_error(message: String) -> Response {
    (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "Message": message }))).into_response()
}

/// Static description of the API
async fn serve_root(State(state): State<WebState>) -> impl IntoResponse {
    let gateway = &state.store.options().gateway_url;
    Json(serde_json::json!({
        "Welcome": "This is a CRUD to handle an IPFS node and S3 storage",
        "IMPORTANT": "Arguments are submitted as form-data in the request body; getFile and deleteFile also accept the query string",
        "Endpoints": {
            "/upload": {
                "Methods": "POST",
                "Arguments": { "file": "<File>", "name": "<Any name>", "mime": "<File_Type> (may be empty)" },
                "respond": {
                    "IPFS": true,
                    "S3": true,
                    "IpfsData": { "Hash": "<CID>", "Name": "<name>", "Size": "<Size>" }
                }
            },
            "/getFile": {
                "Methods": "GET",
                "Arguments": { "cid": "<CID>" },
                "respond": {
                    "Url": format!("{gateway}/ipfs/<CID>"),
                    "Key": "<CID>",
                    "Size": "<Size>"
                }
            },
            "/deleteFile": {
                "Methods": "DELETE",
                "Arguments": { "cid": "<CID>", "mime": "<File_Type> (optional)" },
                "respond": {
                    "IPFS": true,
                    "S3": true,
                    "Message": "The file has been removed from IPFS node and S3 storage"
                }
            },
            "/health": {
                "Methods": "GET",
                "Arguments": {},
                "respond": { "status": "ok", "version": "<version>", "uptime_secs": "<seconds>" }
            }
        }
    }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

/// Read the upload form: `file` (required), `mime` (required, may be empty)
/// and `name` (falls back to the file part's filename).
async fn read_upload(mut multipart: Multipart) -> Result<Blob, ApiError> {
    let mut data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut name: Option<String> = None;
    let mut mime: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                data = Some(field.bytes().await?);
            }
            "name" => name = Some(field.text().await?),
            "mime" => mime = Some(field.text().await?),
            _ => {}
        }
    }

    let data = data.ok_or(ApiError::InputMissing("file"))?;
    let mime = mime.ok_or(ApiError::InputMissing("mime"))?;
    let name = name
        .filter(|n| !n.is_empty())
        .or(file_name.filter(|n| !n.is_empty()))
        .ok_or(ApiError::InputMissing("name"))?;

    Ok(Blob { data, name, mime })
}

#[tracing::instrument(name = "http.upload", skip(state, multipart))]
async fn upload(
    State(state): State<WebState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::Form {
        status: e.status(),
        message: e.body_text(),
    })?;
    let blob = read_upload(multipart).await?;
    let name = blob.name.clone();

    let response = match state.store.create(blob).await {
        Ok(created) => (
            StatusCode::OK,
            Json(UploadResponse {
                s3: true,
                ipfs: true,
                ipfs_data: Some(IpfsData::new(&created.record, &name)),
                message: None,
                rollback: None,
            }),
        ),
        Err(CreateError::ContentStore(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(UploadResponse {
                s3: false,
                ipfs: false,
                ipfs_data: None,
                message: Some(format!("IPFS add failed: {e}")),
                rollback: None,
            }),
        ),
        Err(CreateError::ObjectStore {
            record,
            key,
            source,
            compensation,
        }) => {
            let rollback = match compensation {
                Compensation::NotAttempted => None,
                other => Some(other.to_string()),
            };
            (
                StatusCode::BAD_GATEWAY,
                Json(UploadResponse {
                    s3: false,
                    ipfs: true,
                    ipfs_data: Some(IpfsData::new(&record, &name)),
                    message: Some(format!("S3 upload of {key} failed: {source}")),
                    rollback,
                }),
            )
        }
    };

    Ok(response.into_response())
}

#[tracing::instrument(name = "http.get_file", skip(state, fields))]
async fn get_file(State(state): State<WebState>, fields: FormFields) -> Result<Response, ApiError> {
    let id = fields.identifier()?;

    let found = match state.store.read(&id).await {
        Ok(found) => found,
        Err(ContentStoreError::NotFound(_)) => {
            return Ok((StatusCode::NOT_FOUND, "file not found").into_response());
        }
        Err(e) => return Ok(backend_error(format!("IPFS lookup failed: {e}"))),
    };

    let (url, buffer) = match found.retrieval {
        Retrieval::Url(url) => (Some(url), None),
        Retrieval::Inline(bytes) => (None, Some(base64::engine::general_purpose::STANDARD.encode(bytes))),
    };

    Ok(Json(GetResponse {
        url,
        buffer,
        key: found.identifier.into_inner(),
        size: found.size,
    })
    .into_response())
}

#[tracing::instrument(name = "http.delete_file", skip(state, fields))]
async fn delete_file(State(state): State<WebState>, fields: FormFields) -> Result<Response, ApiError> {
    let id = fields.identifier()?;
    let mime = fields.get("mime").filter(|m| !m.is_empty());

    let response = match state.store.delete(&id, mime).await {
        Ok(report) => {
            let status = if report.is_complete() {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                Json(DeleteResponse {
                    ipfs: report.content_ok(),
                    s3: report.objects_ok(),
                    message: report.message(),
                }),
            )
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(DeleteResponse {
                ipfs: false,
                s3: false,
                message: format!("IPFS unpin failed: {e}"),
            }),
        ),
    };

    Ok(response.into_response())
}
