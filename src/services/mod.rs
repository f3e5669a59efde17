pub mod image_probe;
pub mod pdf_processor;
pub mod resource_walker;
pub mod stream_decoder;

pub use image_probe::{ColorMode, ImageHeader, ImageKind};
pub use pdf_processor::{CancelOnDrop, ExtractionReport, PdfProcessor, SkippedImage};
pub use resource_walker::{discover_images, DiscoveredImage};
pub use stream_decoder::{DecodeLimits, DecodedImage};
