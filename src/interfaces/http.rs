//! REST surface over [`BatchService`].
//!
//! | route                        | success | errors             |
//! |------------------------------|---------|--------------------|
//! | `POST /batches`              | 201     | 422 with issues    |
//! | `GET /batches/:id`           | 200     | 404                |
//! | `PUT /batches/:id/items`     | 200     | 404, 409, 422      |
//! | `POST /batches/:id/execute`  | 200     | 404, 409, 422      |
//! | `POST /batches/:id/pause`    | 200     | 404, 409           |
//! | `POST /batches/:id/resume`   | 200     | 404, 409           |
//! | `POST /batches/:id/cancel`   | 200     | 404, 409           |

use crate::application::service::{BatchService, ExecuteRequest, JobSnapshot};
use crate::domain::instruction::PaymentInstruction;
use crate::domain::job::{JobId, JobStatus};
use crate::error::{BatchError, Result};
use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct ItemsRequest {
    pub items: Vec<PaymentInstruction>,
}

pub fn router(service: Arc<BatchService>) -> Router {
    Router::new()
        .route("/batches", post(submit_batch))
        .route("/batches/:id", get(get_batch))
        .route("/batches/:id/items", put(amend_batch))
        .route("/batches/:id/execute", post(execute_batch))
        .route("/batches/:id/pause", post(pause_batch))
        .route("/batches/:id/resume", post(resume_batch))
        .route("/batches/:id/cancel", post(cancel_batch))
        .layer(Extension(service))
}

/// Serves the API until the listener fails.
pub async fn serve(listener: TcpListener, service: Arc<BatchService>) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "REST API listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let BatchError::Validation(issues) = &self {
            body["issues"] = json!(issues);
        }
        (status, Json(body)).into_response()
    }
}

fn parse_id(id: &str) -> std::result::Result<JobId, Response> {
    id.parse().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "message": format!("job {id} not found"),
            })),
        )
            .into_response()
    })
}

/// Validation outcome of submit/amend: a job left in `Draft` is a 422 whose
/// body still carries the job, so the caller gets its id and the issues.
fn validated(snapshot: JobSnapshot, success: StatusCode) -> Response {
    let status = if snapshot.job.status == JobStatus::Draft {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        success
    };
    (status, Json(snapshot)).into_response()
}

fn respond(result: Result<JobSnapshot>) -> Response {
    match result {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn submit_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Json(body): Json<ItemsRequest>,
) -> Response {
    match service.submit(body.items).await {
        Ok(snapshot) => validated(snapshot, StatusCode::CREATED),
        Err(err) => err.into_response(),
    }
}

pub async fn get_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
) -> Response {
    match parse_id(&id) {
        Ok(job_id) => respond(service.get_status(job_id).await),
        Err(response) => response,
    }
}

pub async fn amend_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
    Json(body): Json<ItemsRequest>,
) -> Response {
    let job_id = match parse_id(&id) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };
    match service.amend(job_id, body.items).await {
        Ok(snapshot) => validated(snapshot, StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

/// The body is optional; an empty body executes immediately with the
/// default concurrency limit.
pub async fn execute_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let job_id = match parse_id(&id) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };
    let request = if body.is_empty() {
        ExecuteRequest::default()
    } else {
        match serde_json::from_slice::<ExecuteRequest>(&body) {
            Ok(request) => request,
            Err(err) => return BatchError::from(err).into_response(),
        }
    };
    respond(service.execute(job_id, request).await)
}

pub async fn pause_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
) -> Response {
    match parse_id(&id) {
        Ok(job_id) => respond(service.pause(job_id).await),
        Err(response) => response,
    }
}

pub async fn resume_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
) -> Response {
    match parse_id(&id) {
        Ok(job_id) => respond(service.resume(job_id).await),
        Err(response) => response,
    }
}

pub async fn cancel_batch(
    Extension(service): Extension<Arc<BatchService>>,
    Path(id): Path<String>,
) -> Response {
    match parse_id(&id) {
        Ok(job_id) => respond(service.cancel(job_id).await),
        Err(response) => response,
    }
}
