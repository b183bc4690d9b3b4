//! Upload HTTP route.
//!
//! `POST /upload` takes a multipart form with a `file` field and an optional
//! `format` field naming the target format, runs the upload through the
//! conversion pipeline and answers with a download URL.

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::conversion::{SpreadsheetFormat, UploadError, UploadedFile};
use crate::server::metrics;
use crate::server::state::{GuardedPipeline, ServerState};

/// Room for multipart boundaries and the small text fields on top of the file.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_name: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

fn error_response(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details: details.into(),
        }),
    )
        .into_response()
}

fn reject(reason: &str, status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    metrics::record_upload_rejected(reason);
    error_response(status, error, details)
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /upload - Convert an uploaded spreadsheet (multipart/form-data)
///
/// The request is handled on its own task, so a client that goes away
/// mid-request still gets its conversion finished and its job directory
/// removed.
async fn upload_file(State(pipeline): State<GuardedPipeline>, multipart: Multipart) -> Response {
    let job_id = Uuid::new_v4().to_string();

    let job = tokio::spawn(handle_upload(pipeline, job_id.clone(), multipart));
    match job.await {
        Ok(response) => response,
        Err(e) => {
            error!("Job {}: upload task failed: {}", job_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Upload processing failed",
            )
        }
    }
}

async fn handle_upload(
    pipeline: GuardedPipeline,
    job_id: String,
    multipart: Multipart,
) -> Response {
    let response = receive_and_convert(&pipeline, &job_id, multipart).await;

    // The pipeline cleans up after itself; this covers requests that never
    // reached it.
    if let Err(e) = pipeline.store().discard(&job_id).await {
        warn!("Job {}: failed to remove job directory: {}", job_id, e);
    }

    response
}

async fn receive_and_convert(
    pipeline: &GuardedPipeline,
    job_id: &str,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<UploadedFile> = None;
    let mut target: Option<SpreadsheetFormat> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return reject("malformed", e.status(), "validation_error", e.body_text());
            }
        };

        match field.name().unwrap_or("") {
            "file" if upload.is_none() => match store_field(pipeline, job_id, field).await {
                Ok(stored) => upload = Some(stored),
                Err(response) => return response,
            },
            "file" => debug!("Job {}: ignoring extra file field", job_id),
            "format" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) => {
                        return reject("malformed", e.status(), "validation_error", e.body_text());
                    }
                };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                match SpreadsheetFormat::from_extension(value) {
                    Some(format) => target = Some(format),
                    None => {
                        return reject(
                            "bad_format",
                            StatusCode::BAD_REQUEST,
                            "validation_error",
                            format!("Unknown target format: {}", value),
                        );
                    }
                }
            }
            other => debug!("Job {}: ignoring field {:?}", job_id, other),
        }
    }

    let Some(upload) = upload else {
        return reject(
            "missing_file",
            StatusCode::BAD_REQUEST,
            "validation_error",
            "No file uploaded",
        );
    };

    debug!(
        "Job {}: received {} ({:#})",
        job_id,
        upload.original_name,
        byte_unit::Byte::from(upload.size)
    );

    match pipeline.run(job_id, upload, target).await {
        Ok(converted) => {
            info!("Job {}: available at {}", job_id, converted.download_url);
            Json(UploadResponse {
                message: "File converted successfully".to_string(),
                file_name: converted.file_name,
                download_url: converted.download_url,
            })
            .into_response()
        }
        Err(e) => {
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            error_response(status, e.category(), e.details())
        }
    }
}

/// Streams the file field into the job directory.
async fn store_field(
    pipeline: &GuardedPipeline,
    job_id: &str,
    mut field: Field<'_>,
) -> Result<UploadedFile, Response> {
    let filename = match field.file_name() {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            return Err(reject(
                "missing_file",
                StatusCode::BAD_REQUEST,
                "validation_error",
                "No filename provided",
            ));
        }
    };
    let declared_mime = field.content_type().map(|s| s.to_string());

    let mut pending = pipeline
        .store()
        .begin(job_id, &filename, declared_mime)
        .await
        .map_err(upload_error_response)?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => pending
                .write_chunk(&chunk)
                .await
                .map_err(upload_error_response)?,
            Ok(None) => break,
            Err(e) => {
                let reason = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    "too_large"
                } else {
                    "malformed"
                };
                return Err(reject(reason, e.status(), "validation_error", e.body_text()));
            }
        }
    }

    pending.finish().await.map_err(upload_error_response)
}

fn upload_error_response(e: UploadError) -> Response {
    match e {
        UploadError::FileTooLarge(_) => reject(
            "too_large",
            StatusCode::PAYLOAD_TOO_LARGE,
            "validation_error",
            e.to_string(),
        ),
        UploadError::InvalidFilename(_) => reject(
            "invalid_filename",
            StatusCode::BAD_REQUEST,
            "validation_error",
            e.to_string(),
        ),
        UploadError::Io(io) => {
            warn!("Failed to store upload: {}", io);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "filesystem_error",
                "Failed to store upload",
            )
        }
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn upload_routes(max_upload_bytes: u64) -> Router<ServerState> {
    let body_limit = max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);
    Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
}
