//! Route handlers.

use super::error::ApiError;
use super::AppState;
use crate::error::ServiceError;
use crate::job::ConversionJob;
use crate::path::ResourcePath;
use crate::pipeline::inference::HealthError;
use axum::extract::{Form, FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// `POST /ocr` form fields. The `*_s3_path` spellings are accepted too.
#[derive(Debug, Deserialize)]
pub struct OcrForm {
    #[serde(default, alias = "input_s3_path")]
    pub input_path: Option<String>,
    #[serde(default, alias = "output_s3_path")]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Artifacts {
    pub markdown: String,
    pub json: String,
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub message: String,
    pub content: String,
    pub output_path: String,
    pub artifacts: Artifacts,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub workers: usize,
    pub jobs: Vec<ConversionJob>,
}

/// `POST /ocr` fields from either an urlencoded or a `multipart/form-data`
/// body (`curl -d` and `curl -F` respectively).
pub struct OcrFields(pub OcrForm);

impl<S> FromRequest<S> for OcrFields
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.trim_start()
                    .to_ascii_lowercase()
                    .starts_with("multipart/form-data")
            });
        if !multipart {
            let Form(form) = Form::<OcrForm>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Self(form));
        }

        let mut body = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let mut form = OcrForm {
            input_path: None,
            output_path: None,
        };
        while let Some(field) = body
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let slot = match field.name() {
                Some("input_path" | "input_s3_path") => &mut form.input_path,
                Some("output_path" | "output_s3_path") => &mut form.output_path,
                _ => continue,
            };
            *slot = Some(
                field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?,
            );
        }
        Ok(Self(form))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Convert one remote document and wait for the result.
pub async fn submit_ocr(
    State(state): State<AppState>,
    OcrFields(form): OcrFields,
) -> Result<Json<OcrResponse>, ApiError> {
    let input = non_blank(form.input_path).ok_or(ServiceError::MissingField("input_path"))?;
    let input = ResourcePath::parse(&input)?;
    let output = match non_blank(form.output_path) {
        Some(out) => ResourcePath::parse(&out)?,
        None => input.clone(),
    };

    let handle = state.dispatcher.submit(input.clone(), output)?;
    info!("Admitted job {} for {}", handle.id(), input);

    let out = handle.wait(state.wait_budget).await?;

    Ok(Json(OcrResponse {
        message: "OCR completed successfully".to_string(),
        content: out.markdown,
        output_path: out.output_path.to_string(),
        artifacts: Artifacts {
            markdown: out.markdown_path.to_string(),
            json: out.json_path.to_string(),
        },
        job_id: out.job_id.to_string(),
    }))
}

/// Proxy the inference backend's health endpoint.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.backend.health().await {
        Ok(h) => {
            let status = StatusCode::from_u16(h.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut resp = (status, h.body).into_response();
            if let Some(ct) = h.content_type.and_then(|c| HeaderValue::from_str(&c).ok()) {
                resp.headers_mut().insert(CONTENT_TYPE, ct);
            }
            resp
        }
        Err(e) => {
            let status = match e {
                HealthError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
                HealthError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
                HealthError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Health probe failed: {}", e);
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "pdf2md-server is running" }))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        workers: state.dispatcher.workers(),
        jobs: state.dispatcher.snapshots(),
    })
}
