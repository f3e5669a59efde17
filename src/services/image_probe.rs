//! Byte-level identification of image payloads.
//!
//! The reported format always comes from the payload's signature, never from
//! the PDF filter that carried it. JPEG and JPEG 2000 are probed by reading
//! their headers only, so a multi-megapixel scan costs a few hundred bytes of
//! parsing rather than a full decode.

use std::fmt;

use image::{ColorType, GenericImageView};

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Jpeg,
    Jpeg2000,
    Png,
    Gif,
    Tiff,
    Bmp,
    Webp,
}

impl ImageKind {
    pub fn name(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "JPEG",
            ImageKind::Jpeg2000 => "JPEG2000",
            ImageKind::Png => "PNG",
            ImageKind::Gif => "GIF",
            ImageKind::Tiff => "TIFF",
            ImageKind::Bmp => "BMP",
            ImageKind::Webp => "WEBP",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Jpeg2000 => "jp2",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Tiff => "tiff",
            ImageKind::Bmp => "bmp",
            ImageKind::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel structure of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Bilevel,
    Grayscale,
    GrayscaleAlpha,
    Rgb,
    Rgba,
    Cmyk,
    Indexed,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Bilevel => "Bilevel",
            ColorMode::Grayscale => "Grayscale",
            ColorMode::GrayscaleAlpha => "GrayscaleAlpha",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
            ColorMode::Cmyk => "CMYK",
            ColorMode::Indexed => "Indexed",
        }
    }

    /// The mode after an alpha channel has been attached.
    pub fn with_alpha(self) -> ColorMode {
        match self {
            ColorMode::Bilevel | ColorMode::Grayscale | ColorMode::GrayscaleAlpha => {
                ColorMode::GrayscaleAlpha
            }
            _ => ColorMode::Rgba,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
}

pub fn sniff_format(bytes: &[u8]) -> Option<ImageKind> {
    const JP2_SIGNATURE: &[u8] = &[0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageKind::Png)
    } else if bytes.starts_with(JP2_SIGNATURE) || bytes.starts_with(&[0xFF, 0x4F, 0xFF, 0x51]) {
        Some(ImageKind::Jpeg2000)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some(ImageKind::Tiff)
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else if bytes.starts_with(b"BM") && bytes.len() > 26 {
        Some(ImageKind::Bmp)
    } else {
        None
    }
}

/// Identifies the payload and reads its dimensions and colour mode.
pub fn probe(bytes: &[u8]) -> Result<ImageHeader, DecodeError> {
    let kind = sniff_format(bytes).ok_or(DecodeError::UnrecognizedFormat)?;
    let header = match kind {
        ImageKind::Jpeg => probe_jpeg(bytes)?,
        ImageKind::Jpeg2000 => probe_jpeg2000(bytes)?,
        other => probe_with_codec(bytes, other)?,
    };
    if header.width == 0 || header.height == 0 {
        return Err(DecodeError::InvalidDimensions {
            width: header.width as i64,
            height: header.height as i64,
        });
    }
    Ok(header)
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn truncated(what: &str) -> DecodeError {
    DecodeError::Corrupt(format!("{} ends before its header is complete", what))
}

/// Walks JPEG marker segments up to the first start-of-frame.
fn probe_jpeg(bytes: &[u8]) -> Result<ImageHeader, DecodeError> {
    let mut pos = 2;
    loop {
        if bytes.get(pos) != Some(&0xFF) {
            return Err(DecodeError::Corrupt(format!(
                "expected JPEG marker at offset {}",
                pos
            )));
        }
        while bytes.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *bytes.get(pos).ok_or_else(|| truncated("JPEG"))?;
        pos += 1;

        match marker {
            // standalone markers carry no length
            0x01 | 0xD0..=0xD8 => continue,
            0xD9 | 0xDA => {
                return Err(DecodeError::Corrupt(
                    "JPEG has no frame header before its scan data".to_string(),
                ))
            }
            _ => {}
        }

        let segment_len = be_u16(bytes, pos).ok_or_else(|| truncated("JPEG"))? as usize;
        if segment_len < 2 {
            return Err(DecodeError::Corrupt(format!(
                "JPEG segment 0x{:02X} has invalid length {}",
                marker, segment_len
            )));
        }

        let is_frame_header =
            (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame_header {
            let height = be_u16(bytes, pos + 3).ok_or_else(|| truncated("JPEG"))?;
            let width = be_u16(bytes, pos + 5).ok_or_else(|| truncated("JPEG"))?;
            let components = *bytes.get(pos + 7).ok_or_else(|| truncated("JPEG"))?;
            let mode = match components {
                1 => ColorMode::Grayscale,
                3 => ColorMode::Rgb,
                // CMYK and YCCK both end up as four ink channels
                4 => ColorMode::Cmyk,
                n => {
                    return Err(DecodeError::UnsupportedColorSpace(format!(
                        "JPEG with {} components",
                        n
                    )))
                }
            };
            return Ok(ImageHeader {
                kind: ImageKind::Jpeg,
                width: width as u32,
                height: height as u32,
                mode,
            });
        }

        pos += segment_len;
    }
}

fn probe_jpeg2000(bytes: &[u8]) -> Result<ImageHeader, DecodeError> {
    if bytes.starts_with(&[0xFF, 0x4F]) {
        return probe_j2k_codestream(bytes);
    }

    // JP2 container: a flat sequence of boxes, the header box nests `ihdr`.
    let mut pos = 0;
    while pos + 8 <= bytes.len() {
        let declared = be_u32(bytes, pos).ok_or_else(|| truncated("JP2 box"))? as u64;
        let box_type = &bytes[pos + 4..pos + 8];
        let (header_len, box_len) = match declared {
            0 => (8, (bytes.len() - pos) as u64),
            1 => {
                let high = be_u32(bytes, pos + 8).ok_or_else(|| truncated("JP2 box"))? as u64;
                let low = be_u32(bytes, pos + 12).ok_or_else(|| truncated("JP2 box"))? as u64;
                (16, (high << 32) | low)
            }
            n => (8, n),
        };
        if box_len < header_len as u64 {
            return Err(DecodeError::Corrupt("JP2 box shorter than its header".to_string()));
        }
        let content_start = pos + header_len;
        let content_end = pos.saturating_add(box_len as usize).min(bytes.len());

        match box_type {
            b"jp2h" => {
                if let Some(header) = find_ihdr(&bytes[content_start..content_end])? {
                    return Ok(header);
                }
            }
            b"jp2c" => return probe_j2k_codestream(&bytes[content_start..content_end]),
            _ => {}
        }
        pos = content_end;
        if content_end == bytes.len() {
            break;
        }
    }

    Err(DecodeError::Corrupt(
        "JP2 file has neither an image header nor a codestream".to_string(),
    ))
}

fn find_ihdr(header_box: &[u8]) -> Result<Option<ImageHeader>, DecodeError> {
    let mut pos = 0;
    while pos + 8 <= header_box.len() {
        let len = be_u32(header_box, pos).ok_or_else(|| truncated("JP2 header"))? as usize;
        if &header_box[pos + 4..pos + 8] == b"ihdr" {
            let height = be_u32(header_box, pos + 8).ok_or_else(|| truncated("JP2 ihdr"))?;
            let width = be_u32(header_box, pos + 12).ok_or_else(|| truncated("JP2 ihdr"))?;
            let components = be_u16(header_box, pos + 16).ok_or_else(|| truncated("JP2 ihdr"))?;
            return Ok(Some(ImageHeader {
                kind: ImageKind::Jpeg2000,
                width,
                height,
                mode: mode_for_components(components)?,
            }));
        }
        if len < 8 {
            break;
        }
        pos += len;
    }
    Ok(None)
}

fn probe_j2k_codestream(bytes: &[u8]) -> Result<ImageHeader, DecodeError> {
    if !bytes.starts_with(&[0xFF, 0x4F, 0xFF, 0x51]) {
        return Err(DecodeError::Corrupt(
            "JPEG 2000 codestream does not start with SOC/SIZ".to_string(),
        ));
    }
    // SIZ body starts right after the two markers
    let siz = 4;
    let x_size = be_u32(bytes, siz + 4).ok_or_else(|| truncated("JPEG 2000 SIZ"))?;
    let y_size = be_u32(bytes, siz + 8).ok_or_else(|| truncated("JPEG 2000 SIZ"))?;
    let x_offset = be_u32(bytes, siz + 12).ok_or_else(|| truncated("JPEG 2000 SIZ"))?;
    let y_offset = be_u32(bytes, siz + 16).ok_or_else(|| truncated("JPEG 2000 SIZ"))?;
    let components = be_u16(bytes, siz + 36).ok_or_else(|| truncated("JPEG 2000 SIZ"))?;

    Ok(ImageHeader {
        kind: ImageKind::Jpeg2000,
        width: x_size.saturating_sub(x_offset),
        height: y_size.saturating_sub(y_offset),
        mode: mode_for_components(components)?,
    })
}

fn mode_for_components(components: u16) -> Result<ColorMode, DecodeError> {
    match components {
        1 => Ok(ColorMode::Grayscale),
        2 => Ok(ColorMode::GrayscaleAlpha),
        3 => Ok(ColorMode::Rgb),
        4 => Ok(ColorMode::Rgba),
        n => Err(DecodeError::UnsupportedColorSpace(format!(
            "JPEG 2000 with {} components",
            n
        ))),
    }
}

fn probe_with_codec(bytes: &[u8], kind: ImageKind) -> Result<ImageHeader, DecodeError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = decoded.dimensions();
    let mode = match decoded.color() {
        ColorType::L8 | ColorType::L16 => ColorMode::Grayscale,
        ColorType::La8 | ColorType::La16 => ColorMode::GrayscaleAlpha,
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => ColorMode::Rgba,
        _ => ColorMode::Rgb,
    };
    Ok(ImageHeader {
        kind,
        width,
        height,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOI, an APP0 stub, then a baseline SOF0 frame header.
    fn jpeg_header(width: u16, height: u16, components: u8) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        let sof_len = 8 + 3 * components as u16;
        bytes.extend_from_slice(&[0xFF, 0xC0]);
        bytes.extend_from_slice(&sof_len.to_be_bytes());
        bytes.push(8);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.push(components);
        for id in 0..components {
            bytes.extend_from_slice(&[id + 1, 0x11, 0x00]);
        }
        bytes
    }

    #[test]
    fn probes_cmyk_jpeg_from_frame_header() {
        let header = probe(&jpeg_header(640, 480, 4)).unwrap();
        assert_eq!(header.kind, ImageKind::Jpeg);
        assert_eq!((header.width, header.height), (640, 480));
        assert_eq!(header.mode, ColorMode::Cmyk);
    }

    #[test]
    fn probes_grayscale_jpeg() {
        let header = probe(&jpeg_header(32, 16, 1)).unwrap();
        assert_eq!(header.mode, ColorMode::Grayscale);
    }

    #[test]
    fn truncated_jpeg_is_corrupt() {
        let mut bytes = jpeg_header(10, 10, 3);
        bytes.truncate(12);
        assert!(matches!(probe(&bytes), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn zero_height_jpeg_is_rejected() {
        assert!(matches!(
            probe(&jpeg_header(10, 0, 3)),
            Err(DecodeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn probes_j2k_codestream() {
        let mut bytes = vec![0xFF, 0x4F, 0xFF, 0x51];
        bytes.extend_from_slice(&41u16.to_be_bytes()); // Lsiz
        bytes.extend_from_slice(&0u16.to_be_bytes()); // Rsiz
        for value in [1030u32, 780, 30, 20, 1030, 780, 0, 0] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes.extend_from_slice(&3u16.to_be_bytes());

        let header = probe(&bytes).unwrap();
        assert_eq!(header.kind, ImageKind::Jpeg2000);
        assert_eq!((header.width, header.height), (1000, 760));
        assert_eq!(header.mode, ColorMode::Rgb);
    }

    #[test]
    fn probes_jp2_container_ihdr() {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
        // jp2h box wrapping a 22-byte ihdr box
        bytes.extend_from_slice(&30u32.to_be_bytes());
        bytes.extend_from_slice(b"jp2h");
        bytes.extend_from_slice(&22u32.to_be_bytes());
        bytes.extend_from_slice(b"ihdr");
        bytes.extend_from_slice(&200u32.to_be_bytes());
        bytes.extend_from_slice(&300u32.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&[7, 7, 0, 0]);

        let header = probe(&bytes).unwrap();
        assert_eq!((header.width, header.height), (300, 200));
        assert_eq!(header.mode, ColorMode::Grayscale);
    }

    #[test]
    fn unknown_bytes_are_unrecognized() {
        assert!(sniff_format(b"hello, world").is_none());
        assert!(matches!(probe(b"hello"), Err(DecodeError::UnrecognizedFormat)));
    }
}
