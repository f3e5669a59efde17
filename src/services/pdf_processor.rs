use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lopdf::{Document, ObjectId};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, DecodeError};
use crate::models::{DecoderSupport, ExtractedImage, ExtractionResult, ProcessedFile};
use crate::services::image_probe;
use crate::services::resource_walker::{discover_images, DiscoveredImage};
use crate::services::stream_decoder::{self, DecodeLimits};

/// Extracts embedded raster images from PDF uploads.
///
/// Stateless apart from its limits, so one instance is shared by all
/// requests. Every call parses its own document and decodes images on the
/// blocking pool, at most `worker_threads` at a time.
#[derive(Debug, Clone)]
pub struct PdfProcessor {
    worker_threads: usize,
    limits: DecodeLimits,
}

/// An image that was discovered but could not be decoded.
#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub index: usize,
    pub id: ObjectId,
    pub page: u32,
    pub reason: String,
}

#[derive(Debug)]
pub struct ExtractionReport {
    pub result: ExtractionResult,
    pub skipped: Vec<SkippedImage>,
    pub pages: usize,
    pub processing_time_ms: u64,
}

impl PdfProcessor {
    pub fn new(worker_threads: usize, limits: DecodeLimits) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
            limits,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.worker_threads,
            DecodeLimits {
                max_image_pixels: config.max_image_pixels,
            },
        )
    }

    pub async fn extract_images(&self, file: ProcessedFile) -> AppResult<ExtractionReport> {
        let start = Instant::now();

        tracing::info!(
            "Starting PDF image extraction for file: {} ({} bytes)",
            file.name,
            file.size
        );

        if file.is_empty() {
            return Err(AppError::invalid_file("File is empty"));
        }
        if !file.has_pdf_signature() {
            return Err(AppError::invalid_pdf("file does not start with a %PDF- header"));
        }

        let content = file.content.clone();
        let (doc, discovered) = tokio::task::spawn_blocking(move || {
            let doc = Document::load_mem(&content)?;
            let discovered = discover_images(&doc);
            Ok::<_, lopdf::Error>((doc, discovered))
        })
        .await
        .map_err(|e| AppError::invalid_pdf(format!("PDF structure could not be parsed: {}", e)))?
        .map_err(|e| AppError::invalid_pdf(format!("PDF structure could not be parsed: {}", e)))?;

        let pages = doc.get_pages().len();
        debug!(
            pages,
            discovered = discovered.len(),
            "PDF parsed, decoding discovered images"
        );

        let (images, skipped) = self.decode_all(Arc::new(doc), discovered).await;
        let result = ExtractionResult::new(images, skipped.len());
        let processing_time_ms = start.elapsed().as_millis() as u64;

        info!(
            pages,
            extracted = result.total_images,
            skipped = skipped.len(),
            processing_time_ms,
            "PDF image extraction completed"
        );

        Ok(ExtractionReport {
            result,
            skipped,
            pages,
            processing_time_ms,
        })
    }

    async fn decode_all(
        &self,
        doc: Arc<Document>,
        discovered: Vec<DiscoveredImage>,
    ) -> (Vec<ExtractedImage>, Vec<SkippedImage>) {
        let permits = Arc::new(Semaphore::new(self.worker_threads));
        // Dropping this future (request timeout, client gone) aborts the
        // tasks in the set; the guard stops blocking jobs that already left it.
        let cancel = CancelOnDrop::new();
        let mut tasks = JoinSet::new();
        let total = discovered.len();

        for target in discovered {
            let doc = Arc::clone(&doc);
            let permits = Arc::clone(&permits);
            let cancelled = cancel.flag();
            let limits = self.limits;

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(permit) => {
                        let job = target.clone();
                        tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            if cancelled.load(Ordering::Relaxed) {
                                return Err(DecodeError::Cancelled);
                            }
                            decode_one(&doc, &job, &limits)
                        })
                        .await
                        .unwrap_or_else(|e| Err(DecodeError::Worker(e.to_string())))
                    }
                    Err(e) => Err(DecodeError::Worker(e.to_string())),
                };
                (target, outcome)
            });
        }

        let mut finished = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => finished.push(entry),
                Err(e) => error!(error = %e, "Image decode task was lost"),
            }
        }
        // workers finish in any order
        finished.sort_by_key(|(target, _)| target.index);

        let mut images = Vec::with_capacity(finished.len());
        let mut skipped = Vec::new();
        for (target, outcome) in finished {
            match outcome {
                Ok(image) => images.push(image),
                Err(e) => {
                    warn!(
                        image_index = target.index,
                        object_id = ?target.id,
                        page = target.page,
                        resource = %target.name,
                        reason = %e,
                        "Skipping image that could not be decoded"
                    );
                    skipped.push(SkippedImage {
                        index: target.index,
                        id: target.id,
                        page: target.page,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (images, skipped)
    }

    /// Describes a standalone image upload without re-encoding it.
    pub async fn analyze_image(&self, file: ProcessedFile) -> AppResult<ExtractedImage> {
        if file.is_empty() {
            return Err(AppError::invalid_file("File is empty"));
        }

        let name = file.name.clone();
        let content = file.content;
        let header = tokio::task::spawn_blocking({
            let content = content.clone();
            move || image_probe::probe(&content)
        })
        .await
        .map_err(|e| AppError::processing(format!("image probe failed: {}", e)))?
        .map_err(|e| AppError::InvalidImage {
            message: e.to_string(),
        })?;

        debug!(
            file_name = %name,
            format = %header.kind,
            mode = %header.mode,
            width = header.width,
            height = header.height,
            "Analyzed uploaded image"
        );

        Ok(ExtractedImage::new(
            name,
            header.width,
            header.height,
            header.kind.name(),
            header.mode.as_str(),
            &content,
        ))
    }

    pub fn decoder_support(&self) -> DecoderSupport {
        DecoderSupport {
            passthrough: vec!["DCTDecode".to_string(), "JPXDecode".to_string()],
            reconstructed: vec![
                "DeviceGray".to_string(),
                "DeviceRGB".to_string(),
                "DeviceCMYK".to_string(),
                "ICCBased".to_string(),
                "Indexed".to_string(),
                "ImageMask".to_string(),
            ],
            stream_filters: vec![
                "FlateDecode".to_string(),
                "LZWDecode".to_string(),
                "ASCIIHexDecode".to_string(),
                "ASCII85Decode".to_string(),
                "RunLengthDecode".to_string(),
            ],
        }
    }
}

/// Raises a shared flag when dropped.
#[derive(Debug)]
pub struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Default for CancelOnDrop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn decode_one(
    doc: &Document,
    target: &DiscoveredImage,
    limits: &DecodeLimits,
) -> Result<ExtractedImage, DecodeError> {
    let stream = doc.get_object(target.id)?.as_stream()?;
    let decoded = stream_decoder::decode_image(doc, stream, limits)?;
    let header = decoded.header;

    let filename = format!(
        "embedded_image_{}_{}.{}",
        target.page,
        target.index + 1,
        header.kind.extension()
    );

    debug!(
        image_index = target.index,
        file_name = %filename,
        format = %header.kind,
        mode = %header.mode,
        payload_bytes = decoded.payload.len(),
        "Decoded embedded image"
    );

    // Only the encoded preview outlives this call; the payload buffer is
    // dropped here.
    Ok(ExtractedImage::new(
        filename,
        header.width,
        header.height,
        header.kind.name(),
        header.mode.as_str(),
        &decoded.payload,
    ))
}
