//! Request handlers for the merge endpoints

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::classify::DocumentKind;
use crate::merge::SectionBreak;
use crate::package::{MergeReport, MergeResult};
use crate::pipeline::{MergeRequest, ProgressCallback};

pub const HEADER_JOB_ID: &str = "x-job-id";
pub const HEADER_MEMBER_COUNT: &str = "x-member-count";
pub const HEADER_WARNING_COUNT: &str = "x-warning-count";
pub const HEADER_PAGE_COUNT: &str = "x-page-count";
pub const HEADER_SECTION_COUNT: &str = "x-section-count";

/// Field names that carry the archive, in preference order over other file fields
const ARCHIVE_FIELDS: &[&str] = &["file", "data", "archive"];

// ============================================================
// Service info
// ============================================================

#[derive(Serialize)]
struct ServiceIndex {
    service: &'static str,
    version: &'static str,
    endpoints: Vec<&'static str>,
}

pub(super) async fn index() -> impl IntoResponse {
    Json(ServiceIndex {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /health",
            "POST /file-merger/merge/",
            "POST /column-merger/merge-columns/",
        ],
    })
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

pub(super) async fn health() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================
// Upload parsing
// ============================================================

/// Parsed multipart form
#[derive(Debug, Default)]
struct MergeUpload {
    archive: Option<Vec<u8>>,
    archive_name: Option<String>,
    /// Archive came from one of [`ARCHIVE_FIELDS`]
    named_field: bool,
    output_filename: Option<String>,
    doc_type: Option<DocumentKind>,
    section_break: Option<SectionBreak>,
    json: bool,
}

impl MergeUpload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);

            if ARCHIVE_FIELDS.contains(&name.as_str()) {
                if upload.named_field {
                    continue;
                }
                let bytes = field.bytes().await?;
                upload.archive = Some(bytes.to_vec());
                upload.archive_name = file_name;
                upload.named_field = true;
                continue;
            }
            if file_name.is_some() {
                if upload.archive.is_none() {
                    let bytes = field.bytes().await?;
                    upload.archive = Some(bytes.to_vec());
                    upload.archive_name = file_name;
                }
                continue;
            }

            let value = field.text().await?;
            let value = value.trim();
            match name.as_str() {
                "output_filename" if !value.is_empty() => upload.output_filename = Some(value.to_string()),
                "type" if !value.is_empty() => {
                    upload.doc_type = Some(value.parse().map_err(ApiError::bad_request)?);
                }
                "section_break" if !value.is_empty() => {
                    upload.section_break = Some(value.parse().map_err(ApiError::bad_request)?);
                }
                "response" => upload.json = value.eq_ignore_ascii_case("json"),
                _ => debug!(field = %name, "Ignoring form field"),
            }
        }

        Ok(upload)
    }

    fn into_request(self) -> Result<(MergeRequest, bool), ApiError> {
        let archive = self
            .archive
            .ok_or_else(|| ApiError::bad_request("No archive file in request (expected field 'file')"))?;
        let request = MergeRequest {
            archive,
            archive_name: self.archive_name,
            output_name: self.output_filename,
            declared_type: self.doc_type,
            section_break: self.section_break,
        };
        Ok((request, self.json))
    }
}

// ============================================================
// Job execution
// ============================================================

/// Progress sink for a request-bound job
struct JobProgress {
    job_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl ProgressCallback for JobProgress {
    fn on_step_start(&self, step: &str) {
        debug!(job_id = %self.job_id, step, "Stage started");
    }

    fn on_step_complete(&self, step: &str, message: &str) {
        debug!(job_id = %self.job_id, step, message, "Stage complete");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Flags the job cancelled when the request future is dropped early
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn run_job(state: &AppState, job_id: Uuid, request: MergeRequest) -> Result<MergeResult, ApiError> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancelled));
    let progress = JobProgress { job_id, cancelled };

    let pipeline = Arc::clone(&state.pipeline);
    let span = tracing::Span::current();
    let result = tokio::task::spawn_blocking(move || span.in_scope(|| pipeline.run(request, &progress)))
        .await
        .map_err(|e| ApiError::internal(format!("merge worker failed: {e}")))??;
    Ok(result)
}

async fn handle(state: AppState, upload: MergeUpload) -> Result<Response, ApiError> {
    let job_id = Uuid::new_v4();
    let span = info_span!("merge_job", %job_id);

    async move {
        let (request, json) = upload.into_request()?;
        info!(
            bytes = request.archive.len(),
            archive = request.archive_name.as_deref().unwrap_or("-"),
            "Merge request received"
        );
        let result = run_job(&state, job_id, request).await?;
        Ok::<Response, ApiError>(if json {
            json_response(job_id, &result)
        } else {
            binary_response(job_id, result)
        })
    }
    .instrument(span)
    .await
}

pub(super) async fn merge_files(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let upload = MergeUpload::read(multipart).await?;
    handle(state, upload).await
}

pub(super) async fn merge_columns(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let mut upload = MergeUpload::read(multipart).await?;
    if upload.doc_type == Some(DocumentKind::Pdf) {
        return Err(ApiError::bad_request("Column merging accepts DOCX members only"));
    }
    upload.doc_type = Some(DocumentKind::Docx);
    upload.section_break = Some(SectionBreak::Continuous);
    handle(state, upload).await
}

// ============================================================
// Responses
// ============================================================

/// JSON variant of a successful merge
#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub report: MergeReport,
    pub artifact_base64: String,
}

fn json_response(job_id: Uuid, result: &MergeResult) -> Response {
    Json(MergeResponse {
        job_id,
        report: result.report(),
        artifact_base64: STANDARD.encode(&result.artifact),
    })
    .into_response()
}

fn binary_response(job_id: Uuid, result: MergeResult) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(result.media_type()));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&result.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    insert_count(&mut headers, HEADER_JOB_ID, job_id);
    insert_count(&mut headers, HEADER_MEMBER_COUNT, result.member_count);
    insert_count(&mut headers, HEADER_WARNING_COUNT, result.warnings.len());
    if let Some(pages) = result.page_count {
        insert_count(&mut headers, HEADER_PAGE_COUNT, pages);
    }
    if let Some(sections) = result.section_count {
        insert_count(&mut headers, HEADER_SECTION_COUNT, sections);
    }
    let mut response = Response::new(Body::from(result.artifact));
    *response.headers_mut() = headers;
    response
}

fn insert_count(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();
    if ascii == file_name {
        return format!("attachment; filename=\"{file_name}\"");
    }

    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // TC-WEB-005: Plain ASCII names are quoted as-is
    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("merged_document.pdf"),
            "attachment; filename=\"merged_document.pdf\""
        );
    }

    // TC-WEB-006: Non-ASCII names get a fallback and an encoded form
    #[test]
    fn test_content_disposition_utf8() {
        let value = content_disposition("第1章.docx");
        assert!(value.starts_with("attachment; filename=\"_1_.docx\""));
        assert!(value.ends_with("filename*=UTF-8''%E7%AC%AC1%E7%AB%A0.docx"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    // TC-WEB-007: Missing archive is a client error
    #[test]
    fn test_upload_without_archive() {
        let upload = MergeUpload {
            output_filename: Some("book".to_string()),
            ..MergeUpload::default()
        };
        let err = upload.into_request().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    // TC-WEB-008: Upload fields flow into the request
    #[test]
    fn test_upload_into_request() {
        let upload = MergeUpload {
            archive: Some(vec![1, 2]),
            archive_name: Some("chapters.zip".to_string()),
            named_field: true,
            output_filename: Some("book".to_string()),
            doc_type: Some(DocumentKind::Docx),
            section_break: Some(SectionBreak::Continuous),
            json: true,
        };
        let (request, json) = upload.into_request().unwrap();
        assert!(json);
        assert_eq!(request.archive, vec![1, 2]);
        assert_eq!(request.archive_name.as_deref(), Some("chapters.zip"));
        assert_eq!(request.output_name.as_deref(), Some("book"));
        assert_eq!(request.declared_type, Some(DocumentKind::Docx));
        assert_eq!(request.section_break, Some(SectionBreak::Continuous));
    }

    // TC-WEB-009: Dropping the guard cancels the job
    #[test]
    fn test_cancel_on_drop() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let progress = JobProgress {
            job_id: Uuid::new_v4(),
            cancelled: Arc::clone(&cancelled),
        };
        {
            let _guard = CancelOnDrop(Arc::clone(&cancelled));
            assert!(!progress.is_cancelled());
        }
        assert!(progress.is_cancelled());
    }
}
