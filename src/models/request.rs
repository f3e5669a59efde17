use bytes::Bytes;

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// How far into the upload the `%PDF-` marker may appear. Some producers
/// prepend a few bytes of garbage before the header.
const PDF_HEADER_SEARCH_WINDOW: usize = 1024;

/// A single uploaded file, held in memory for the lifetime of one request.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub name: String,
    pub size: usize,
    pub content: Bytes,
    pub mime_type: Option<String>,
}

impl ProcessedFile {
    pub fn new(name: String, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let size = content.len();
        Self {
            name,
            size,
            content,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: String) -> Self {
        self.mime_type = Some(mime_type);
        self
    }

    pub fn has_pdf_signature(&self) -> bool {
        let window = &self.content[..self.content.len().min(PDF_HEADER_SEARCH_WINDOW)];
        window.windows(5).any(|w| w == b"%PDF-")
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// True when the declared content type is `application/pdf`. Parameters
/// such as `; charset=binary` are ignored. Without a declared type the file
/// name has to carry the `.pdf` extension.
pub fn declares_pdf(file_name: &str, content_type: Option<&str>) -> bool {
    match content_type {
        Some(mime) => is_pdf_mime(mime),
        None => file_name.to_lowercase().ends_with(".pdf"),
    }
}

pub fn is_pdf_mime(mime: &str) -> bool {
    mime.split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(PDF_MIME_TYPE))
        .unwrap_or(false)
}
