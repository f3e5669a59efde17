use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One embedded image as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mode: String,
    pub file_size: usize,
    pub aspect_ratio: String,
    pub base64: String,
}

impl ExtractedImage {
    /// Builds the entry from the exact payload bytes; `file_size` and
    /// `base64` always describe the same buffer.
    pub fn new(
        filename: String,
        width: u32,
        height: u32,
        format: impl Into<String>,
        mode: impl Into<String>,
        payload: &[u8],
    ) -> Self {
        Self {
            filename,
            width,
            height,
            format: format.into(),
            mode: mode.into(),
            file_size: payload.len(),
            aspect_ratio: aspect_ratio(width, height),
            base64: STANDARD.encode(payload),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.filename.trim().is_empty() {
            return Err(AppError::malformed("image entry has an empty filename"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(AppError::malformed(format!(
                "{} has degenerate dimensions {}x{}",
                self.filename, self.width, self.height
            )));
        }
        let decoded = STANDARD.decode(self.base64.as_bytes()).map_err(|e| {
            AppError::malformed(format!("{} carries invalid base64: {}", self.filename, e))
        })?;
        if decoded.len() != self.file_size {
            return Err(AppError::malformed(format!(
                "{} reports file_size {} but its payload is {} bytes",
                self.filename,
                self.file_size,
                decoded.len()
            )));
        }
        let expected_ratio = aspect_ratio(self.width, self.height);
        if self.aspect_ratio != expected_ratio {
            return Err(AppError::malformed(format!(
                "{} reports aspect ratio {} but {}x{} reduces to {}",
                self.filename, self.aspect_ratio, self.width, self.height, expected_ratio
            )));
        }
        Ok(())
    }
}

/// Response body of the extract endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub message: String,
    pub images: Vec<ExtractedImage>,
    pub total_images: usize,
}

impl ExtractionResult {
    /// Assembles a successful result. `skipped` counts images that were
    /// discovered but could not be decoded.
    pub fn new(images: Vec<ExtractedImage>, skipped: usize) -> Self {
        let message = summary_message(images.len(), skipped);
        let total_images = images.len();
        Self {
            success: true,
            message,
            images,
            total_images,
        }
    }

    /// Checks the invariants a consumer relies on before the value crosses
    /// a process boundary.
    pub fn validate(&self) -> AppResult<()> {
        if self.total_images != self.images.len() {
            return Err(AppError::malformed(format!(
                "total_images is {} but {} images are present",
                self.total_images,
                self.images.len()
            )));
        }
        if !self.success && !self.images.is_empty() {
            return Err(AppError::malformed("a failed result must not carry images"));
        }

        let mut filenames = HashSet::with_capacity(self.images.len());
        for image in &self.images {
            image.validate()?;
            if !filenames.insert(image.filename.as_str()) {
                return Err(AppError::malformed(format!(
                    "duplicate filename {}",
                    image.filename
                )));
            }
        }
        Ok(())
    }

    /// Parses an extraction payload received from another service and
    /// rejects anything that is not a well-formed result.
    pub fn from_json(payload: &[u8]) -> AppResult<Self> {
        let result: ExtractionResult = serde_json::from_slice(payload)?;
        result.validate()?;
        Ok(result)
    }
}

fn summary_message(extracted: usize, skipped: usize) -> String {
    match (extracted, skipped) {
        (0, 0) => "No embedded images found in PDF".to_string(),
        (n, 0) => format!("Successfully extracted {} {}", n, plural(n, "image", "images")),
        (n, m) => format!(
            "Successfully extracted {} {} (skipped {} that could not be decoded)",
            n,
            plural(n, "image", "images"),
            m
        ),
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Reduces `width:height` by the greatest common divisor, e.g. 1920x1080
/// becomes `16:9`.
pub fn aspect_ratio(width: u32, height: u32) -> String {
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeImageResponse {
    pub success: bool,
    pub image: ExtractedImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
    pub timestamp: i64,
    pub uptime_seconds: u64,
    pub decoders: DecoderSupport,
    pub rate_limiting: RateLimitStats,
}

/// What the extractor can turn into previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderSupport {
    pub passthrough: Vec<String>,
    pub reconstructed: Vec<String>,
    pub stream_filters: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub available_permits: usize,
}
