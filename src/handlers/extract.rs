use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::BytesRejection,
        Multipart, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::Json,
};
use bytes::BytesMut;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::request_id;
use crate::models::{
    declares_pdf, AnalyzeImageResponse, ExtractionResult, ProcessedFile, PDF_MIME_TYPE,
};

/// Part names the browser client and curl users send the PDF under.
const PDF_FIELDS: &[&str] = &["pdf", "file"];
const IMAGE_FIELDS: &[&str] = &["image", "file"];
const MULTIPART_MIME_TYPE: &str = "multipart/form-data";

pub async fn extract_images_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<ExtractionResult>> {
    let start = Instant::now();
    let request_id = request_id(&headers);

    info!(request_id = %request_id, "Starting PDF extraction request");

    let mut multipart = multipart.map_err(|rejection| {
        warn!(request_id = %request_id, rejection = %rejection, "Request is not a multipart upload");
        AppError::InvalidContentType {
            found: content_type_of(&headers),
            expected: MULTIPART_MIME_TYPE,
        }
    })?;

    let limit_mb = state.config.max_file_size_mb;
    let file = match read_single_file(
        &mut multipart,
        PDF_FIELDS,
        state.config.max_file_size_bytes(),
        limit_mb,
        ensure_pdf_part,
    )
    .await
    {
        Ok(file) => {
            info!(
                request_id = %request_id,
                file_name = %file.name,
                file_size = file.size,
                "File extracted from multipart form"
            );
            file
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Failed to extract file from multipart");
            return Err(e);
        }
    };

    let result = run_extraction(&state, file, &request_id).await?;

    info!(
        request_id = %request_id,
        total_time_ms = start.elapsed().as_millis() as u64,
        total_images = result.total_images,
        "Request completed successfully"
    );

    Ok(Json(result))
}

// Alternative handler for direct binary upload
pub async fn extract_binary_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<ExtractionResult>> {
    let start = Instant::now();
    let request_id = request_id(&headers);
    let limit_mb = state.config.max_file_size_mb;

    info!(request_id = %request_id, "Starting binary PDF extraction request");

    // Check content type
    let content_type = content_type_of(&headers);
    if !declares_pdf("", Some(content_type.as_str())) {
        warn!(
            request_id = %request_id,
            content_type = %content_type,
            "Invalid content type for binary upload"
        );
        return Err(AppError::InvalidContentType {
            found: content_type,
            expected: PDF_MIME_TYPE,
        });
    }

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::FileTooLarge { limit_mb }
        } else {
            AppError::invalid_file(format!("Failed to read request body: {}", rejection))
        }
    })?;

    if body.is_empty() {
        warn!(request_id = %request_id, "Empty body received");
        return Err(AppError::MissingFile);
    }

    let file = ProcessedFile::new("uploaded.pdf".to_string(), body)
        .with_mime_type(PDF_MIME_TYPE.to_string());

    info!(
        request_id = %request_id,
        file_size = file.size,
        "Processing binary PDF"
    );

    let result = run_extraction(&state, file, &request_id).await?;

    info!(
        request_id = %request_id,
        total_time_ms = start.elapsed().as_millis() as u64,
        total_images = result.total_images,
        "Binary request completed successfully"
    );

    Ok(Json(result))
}

/// Reports dimensions, format and mode of a single uploaded image.
pub async fn analyze_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<AnalyzeImageResponse>> {
    let request_id = request_id(&headers);

    info!(request_id = %request_id, "Starting image analysis request");

    let mut multipart = multipart.map_err(|_| AppError::InvalidContentType {
        found: content_type_of(&headers),
        expected: MULTIPART_MIME_TYPE,
    })?;

    let file = read_single_file(
        &mut multipart,
        IMAGE_FIELDS,
        state.config.max_file_size_bytes(),
        state.config.max_file_size_mb,
        ensure_image_part,
    )
    .await?;

    let image = tokio::time::timeout(
        state.config.request_timeout(),
        state.processor.analyze_image(file),
    )
    .await??;

    image.validate()?;

    info!(
        request_id = %request_id,
        format = %image.format,
        width = image.width,
        height = image.height,
        "Image analysis completed"
    );

    Ok(Json(AnalyzeImageResponse {
        success: true,
        image,
    }))
}

async fn run_extraction(
    state: &AppState,
    file: ProcessedFile,
    request_id: &str,
) -> AppResult<ExtractionResult> {
    let limit = state.config.max_file_size_bytes();
    if file.size > limit {
        warn!(
            request_id = %request_id,
            file_size = file.size,
            max_size = limit,
            "File size exceeds limit"
        );
        return Err(AppError::FileTooLarge {
            limit_mb: state.config.max_file_size_mb,
        });
    }

    let report = match tokio::time::timeout(
        state.config.request_timeout(),
        state.processor.extract_images(file),
    )
    .await
    {
        Ok(outcome) => outcome?,
        Err(elapsed) => {
            warn!(
                request_id = %request_id,
                timeout_seconds = state.config.request_timeout_seconds,
                "PDF processing exceeded its deadline"
            );
            return Err(elapsed.into());
        }
    };

    for skipped in &report.skipped {
        debug!(
            request_id = %request_id,
            image_index = skipped.index,
            page = skipped.page,
            reason = %skipped.reason,
            "Image omitted from response"
        );
    }

    if let Err(e) = report.result.validate() {
        error!(request_id = %request_id, error = %e, "Refusing to return inconsistent result");
        return Err(e);
    }

    info!(
        request_id = %request_id,
        pages = report.pages,
        images = report.result.total_images,
        skipped = report.skipped.len(),
        processing_time_ms = report.processing_time_ms,
        "PDF processing completed successfully"
    );

    Ok(report.result)
}

/// Reads the one file part of a multipart body. The part's declared type is
/// checked by `check` before any of its bytes are read, and reading stops as
/// soon as the body grows past `max_bytes`.
async fn read_single_file<F>(
    multipart: &mut Multipart,
    accepted_fields: &[&str],
    max_bytes: usize,
    limit_mb: usize,
    check: F,
) -> AppResult<ProcessedFile>
where
    F: Fn(&str, Option<&str>) -> AppResult<()>,
{
    let read_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::FileTooLarge { limit_mb }
        } else {
            AppError::invalid_file(format!("Failed to read multipart field: {}", e.body_text()))
        }
    };

    let mut file: Option<ProcessedFile> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
        let field_name = field.name().unwrap_or("").to_string();
        let is_file_part =
            field.file_name().is_some() || accepted_fields.contains(&field_name.as_str());
        if !is_file_part {
            debug!(field = %field_name, "Ignoring non-file form field");
            continue;
        }
        if file.is_some() {
            return Err(AppError::TooManyFiles);
        }

        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        check(&file_name, content_type.as_deref())?;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(read_error)? {
            if buffer.len() + chunk.len() > max_bytes {
                return Err(AppError::FileTooLarge { limit_mb });
            }
            buffer.extend_from_slice(&chunk);
        }

        if buffer.is_empty() {
            return Err(AppError::invalid_file("File is empty"));
        }

        let mut processed = ProcessedFile::new(file_name, buffer.freeze());
        if let Some(mime_type) = content_type {
            processed = processed.with_mime_type(mime_type);
        }

        tracing::debug!(
            "Extracted file: {} ({} bytes, type: {:?})",
            processed.name,
            processed.size,
            processed.mime_type
        );

        file = Some(processed);
    }

    file.ok_or(AppError::MissingFile)
}

fn ensure_pdf_part(file_name: &str, content_type: Option<&str>) -> AppResult<()> {
    if declares_pdf(file_name, content_type) {
        Ok(())
    } else {
        Err(AppError::InvalidContentType {
            found: content_type.unwrap_or("none").to_string(),
            expected: PDF_MIME_TYPE,
        })
    }
}

fn ensure_image_part(_file_name: &str, content_type: Option<&str>) -> AppResult<()> {
    match content_type {
        None => Ok(()),
        Some(mime) if mime.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
        // curl and some browsers fall back to this for unknown extensions
        Some(mime) if mime.trim().eq_ignore_ascii_case("application/octet-stream") => Ok(()),
        Some(mime) => Err(AppError::InvalidContentType {
            found: mime.to_string(),
            expected: "image/*",
        }),
    }
}

fn content_type_of(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or("none")
        .to_string()
}
