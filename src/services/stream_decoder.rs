//! Turns an image XObject stream into a displayable payload.
//!
//! Streams whose last filter is an image codec (DCT, JPX) are passed through
//! byte-for-byte once the transport filters in front of them are undone.
//! Everything else is raw samples and gets rebuilt from the image dictionary
//! and written out as PNG.

use std::borrow::Cow;
use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageOutputFormat, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};
use weezl::{decode::Decoder as LzwDecoder, BitOrder, LzwStatus};

use crate::error::DecodeError;
use crate::services::image_probe::{self, ColorMode, ImageHeader, ImageKind};
use crate::services::resource_walker::resolve;

/// Bytes allowed per pixel when sizing decompression buffers: four 16-bit
/// channels.
const MAX_BYTES_PER_PIXEL: u64 = 8;

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_image_pixels: u64,
}

impl DecodeLimits {
    fn max_stream_bytes(&self) -> u64 {
        self.max_image_pixels.saturating_mul(MAX_BYTES_PER_PIXEL)
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_image_pixels: 100_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub header: ImageHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    Dct,
    Jpx,
}

impl Filter {
    fn from_name(name: &[u8]) -> Result<Self, DecodeError> {
        match name {
            b"FlateDecode" | b"Fl" => Ok(Filter::Flate),
            b"LZWDecode" | b"LZW" => Ok(Filter::Lzw),
            b"ASCIIHexDecode" | b"AHx" => Ok(Filter::AsciiHex),
            b"ASCII85Decode" | b"A85" => Ok(Filter::Ascii85),
            b"RunLengthDecode" | b"RL" => Ok(Filter::RunLength),
            b"DCTDecode" | b"DCT" => Ok(Filter::Dct),
            b"JPXDecode" => Ok(Filter::Jpx),
            other => Err(DecodeError::UnsupportedFilter(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// Result of undoing the transport filters of a stream.
enum StreamData<'a> {
    /// Still encoded by an image codec; the bytes are a complete image file.
    Encoded(Cow<'a, [u8]>),
    /// Plain samples.
    Samples(Cow<'a, [u8]>),
}

#[derive(Debug, Clone)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        palette: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

/// Decodes one image XObject into the bytes that will be shown to the user.
pub fn decode_image(
    doc: &Document,
    stream: &Stream,
    limits: &DecodeLimits,
) -> Result<DecodedImage, DecodeError> {
    match undo_transport_filters(doc, stream, limits)? {
        StreamData::Encoded(bytes) => {
            passthrough(doc, &stream.dict, bytes.into_owned(), limits)
        }
        StreamData::Samples(samples) => reconstruct(doc, &stream.dict, &samples, limits),
    }
}

fn passthrough(
    doc: &Document,
    dict: &Dictionary,
    payload: Vec<u8>,
    limits: &DecodeLimits,
) -> Result<DecodedImage, DecodeError> {
    let mut header = image_probe::probe(&payload)?;

    // A four-channel JPEG 2000 is only CMYK when the PDF says so.
    if header.kind == ImageKind::Jpeg2000
        && header.mode == ColorMode::Rgba
        && matches!(color_space_of(doc, dict, limits, 0), Ok(ColorSpace::Cmyk))
    {
        header.mode = ColorMode::Cmyk;
    }

    if let Ok((declared_width, declared_height)) = dimensions(doc, dict) {
        if (declared_width, declared_height) != (header.width, header.height) {
            debug!(
                declared_width,
                declared_height,
                actual_width = header.width,
                actual_height = header.height,
                "Image dictionary disagrees with the encoded image, using encoded size"
            );
        }
    }

    Ok(DecodedImage { header, payload })
}

fn stream_filters(
    doc: &Document,
    dict: &Dictionary,
) -> Result<Vec<(Filter, Option<Dictionary>)>, DecodeError> {
    let names: Vec<&[u8]> = match dict.get(b"Filter").map(|f| resolve(doc, f)) {
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match resolve(doc, item) {
                Object::Name(name) => Some(name.as_slice()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let parms: Vec<Option<Dictionary>> = match dict.get(b"DecodeParms").map(|p| resolve(doc, p)) {
        Ok(Object::Dictionary(parms)) => vec![Some(parms.clone())],
        Ok(Object::Array(items)) => items
            .iter()
            .map(|item| resolve(doc, item).as_dict().ok().cloned())
            .collect(),
        _ => Vec::new(),
    };

    let mut filters = Vec::with_capacity(names.len());
    for (i, name) in names.into_iter().enumerate() {
        filters.push((Filter::from_name(name)?, parms.get(i).cloned().flatten()));
    }
    Ok(filters)
}

fn undo_transport_filters<'a>(
    doc: &Document,
    stream: &'a Stream,
    limits: &DecodeLimits,
) -> Result<StreamData<'a>, DecodeError> {
    let filters = stream_filters(doc, &stream.dict)?;
    let mut data: Cow<'a, [u8]> = Cow::Borrowed(&stream.content);

    for (position, (filter, parms)) in filters.iter().enumerate() {
        let decoded = match filter {
            Filter::Flate => {
                let inflated = inflate(&data, limits.max_stream_bytes())?;
                apply_predictor(inflated, parms.as_ref())?
            }
            Filter::Lzw => {
                let early_change = parms
                    .as_ref()
                    .map_or(1, |p| parm_int(p, b"EarlyChange", 1))
                    != 0;
                let expanded = lzw_decode(&data, early_change, limits.max_stream_bytes())?;
                apply_predictor(expanded, parms.as_ref())?
            }
            Filter::AsciiHex => ascii_hex_decode(&data)?,
            Filter::Ascii85 => ascii85_decode(&data)?,
            Filter::RunLength => run_length_decode(&data)?,
            Filter::Dct | Filter::Jpx if position + 1 == filters.len() => {
                return Ok(StreamData::Encoded(data));
            }
            Filter::Dct | Filter::Jpx => {
                return Err(DecodeError::Corrupt(format!(
                    "{:?} must be the last filter in the chain",
                    filter
                )));
            }
        };
        data = Cow::Owned(decoded);
    }

    // No codec filter: some producers still embed whole image files. A
    // dictionary that describes its samples is never one of those.
    let describes_samples = stream.dict.has(b"BitsPerComponent")
        || stream.dict.has(b"ColorSpace")
        || is_image_mask(doc, &stream.dict);
    if !describes_samples && image_probe::sniff_format(&data).is_some() {
        return Ok(StreamData::Encoded(data));
    }

    Ok(StreamData::Samples(data))
}

/// Decodes a stream that must hold plain samples (soft masks, palettes).
fn decode_samples(
    doc: &Document,
    stream: &Stream,
    limits: &DecodeLimits,
) -> Result<Vec<u8>, DecodeError> {
    match undo_transport_filters(doc, stream, limits)? {
        StreamData::Samples(data) => Ok(data.into_owned()),
        StreamData::Encoded(_) => Err(DecodeError::UnsupportedFilter(
            "image codec in an auxiliary stream".to_string(),
        )),
    }
}

fn inflate(data: &[u8], limit: u64) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let mut decoder = ZlibDecoder::new(data).take(limit.saturating_add(1));
    if let Err(e) = decoder.read_to_end(&mut out) {
        // Truncated or checksum-less zlib data is common; keep what inflated.
        if out.is_empty() {
            return Err(DecodeError::Corrupt(format!("FlateDecode: {}", e)));
        }
        warn!(error = %e, recovered_bytes = out.len(), "Flate stream ended early, using partial data");
    }
    if out.len() as u64 > limit {
        return Err(DecodeError::StreamTooLarge { limit });
    }
    Ok(out)
}

fn lzw_decode(data: &[u8], early_change: bool, limit: u64) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = if early_change {
        LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        LzwDecoder::new(BitOrder::Msb, 8)
    };
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut input = data;

    loop {
        let result = decoder.decode_bytes(input, &mut chunk);
        input = &input[result.consumed_in..];
        out.extend_from_slice(&chunk[..result.consumed_out]);
        if out.len() as u64 > limit {
            return Err(DecodeError::StreamTooLarge { limit });
        }
        match result.status {
            Ok(LzwStatus::Done) | Ok(LzwStatus::NoProgress) => break,
            Ok(LzwStatus::Ok) if result.consumed_in == 0 && result.consumed_out == 0 => break,
            Ok(LzwStatus::Ok) => {}
            Err(e) if out.is_empty() => {
                return Err(DecodeError::Corrupt(format!("LZWDecode: {}", e)));
            }
            Err(e) => {
                warn!(error = %e, recovered_bytes = out.len(), "LZW stream is damaged, using partial data");
                break;
            }
        }
    }
    Ok(out)
}

fn parm_int(parms: &Dictionary, key: &[u8], default: i64) -> i64 {
    parms
        .get(key)
        .ok()
        .and_then(|v| v.as_i64().ok())
        .unwrap_or(default)
}

fn apply_predictor(data: Vec<u8>, parms: Option<&Dictionary>) -> Result<Vec<u8>, DecodeError> {
    let Some(parms) = parms else {
        return Ok(data);
    };
    let predictor = parm_int(parms, b"Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }

    let colors = parm_int(parms, b"Colors", 1);
    let bpc = parm_int(parms, b"BitsPerComponent", 8);
    let columns = parm_int(parms, b"Columns", 1);
    if !(1..=32).contains(&colors) || ![1, 2, 4, 8, 16].contains(&bpc) || columns < 1 {
        return Err(DecodeError::Corrupt(format!(
            "predictor parameters out of range: Colors {} BitsPerComponent {} Columns {}",
            colors, bpc, columns
        )));
    }
    let (colors, bpc) = (colors as usize, bpc as usize);
    let bytes_per_pixel = ((colors * bpc + 7) / 8).max(1);

    // Columns comes straight from the file; size the row before trusting it.
    let row_len = usize::try_from(columns)
        .ok()
        .and_then(|columns| columns.checked_mul(colors * bpc))
        .and_then(|bits| bits.checked_add(7))
        .map(|bits| bits / 8)
        .filter(|&row_len| row_len <= data.len())
        .ok_or_else(|| {
            DecodeError::Corrupt(format!(
                "predictor row of {} columns is longer than the {} byte stream",
                columns,
                data.len()
            ))
        })?;

    match predictor {
        2 if bpc == 8 => Ok(tiff_unpredict(data, row_len, bytes_per_pixel)),
        2 => Err(DecodeError::Corrupt(format!(
            "TIFF predictor with {} bits per component",
            bpc
        ))),
        10..=15 => png_unpredict(&data, row_len, bytes_per_pixel),
        other => Err(DecodeError::Corrupt(format!("unknown predictor {}", other))),
    }
}

fn tiff_unpredict(mut data: Vec<u8>, row_len: usize, bpp: usize) -> Vec<u8> {
    if row_len == 0 {
        return data;
    }
    for row in data.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    data
}

fn png_unpredict(data: &[u8], row_len: usize, bpp: usize) -> Result<Vec<u8>, DecodeError> {
    let stride = row_len + 1;
    let rows = data.len() / stride;
    let mut out = vec![0u8; rows * row_len];
    let mut previous = vec![0u8; row_len];

    for r in 0..rows {
        let source = &data[r * stride..(r + 1) * stride];
        let filter_type = source[0];
        let raw = &source[1..];
        let row = &mut out[r * row_len..(r + 1) * row_len];

        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match filter_type {
                0 => raw[i],
                1 => raw[i].wrapping_add(left),
                2 => raw[i].wrapping_add(up),
                3 => raw[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => raw[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(DecodeError::Corrupt(format!(
                        "unknown PNG row filter {}",
                        other
                    )))
                }
            };
        }
        previous.copy_from_slice(row);
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn ascii_hex_decode(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in data {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        let nibble = (byte as char)
            .to_digit(16)
            .ok_or_else(|| DecodeError::Corrupt(format!("ASCIIHexDecode: invalid byte 0x{:02X}", byte)))?
            as u8;
        match pending.take() {
            Some(high) => out.push(high << 4 | nibble),
            None => pending = Some(nibble),
        }
    }
    if let Some(high) = pending {
        out.push(high << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut out = Vec::with_capacity(body.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut filled = 0;

    for &byte in body {
        match byte {
            b'~' => break,
            b if b.is_ascii_whitespace() => continue,
            b'z' if filled == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[filled] = byte - b'!';
                filled += 1;
                if filled == 5 {
                    out.extend_from_slice(&ascii85_group(&group)?);
                    filled = 0;
                }
            }
            other => {
                return Err(DecodeError::Corrupt(format!(
                    "ASCII85Decode: invalid byte 0x{:02X}",
                    other
                )))
            }
        }
    }

    if filled == 1 {
        return Err(DecodeError::Corrupt("ASCII85Decode: dangling final byte".to_string()));
    }
    if filled > 1 {
        for slot in group.iter_mut().skip(filled) {
            *slot = b'u' - b'!';
        }
        let decoded = ascii85_group(&group)?;
        out.extend_from_slice(&decoded[..filled - 1]);
    }
    Ok(out)
}

fn ascii85_group(group: &[u8; 5]) -> Result<[u8; 4], DecodeError> {
    let value = group.iter().fold(0u64, |acc, &digit| acc * 85 + digit as u64);
    let value = u32::try_from(value)
        .map_err(|_| DecodeError::Corrupt("ASCII85Decode: group overflow".to_string()))?;
    Ok(value.to_be_bytes())
}

fn run_length_decode(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;
    while pos < data.len() {
        let length = data[pos];
        pos += 1;
        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let run = data.get(pos..pos + count).ok_or_else(|| {
                    DecodeError::Corrupt("RunLengthDecode: literal run past end".to_string())
                })?;
                out.extend_from_slice(run);
                pos += count;
            }
            _ => {
                let value = *data.get(pos).ok_or_else(|| {
                    DecodeError::Corrupt("RunLengthDecode: repeat run past end".to_string())
                })?;
                out.extend(std::iter::repeat(value).take(257 - length as usize));
                pos += 1;
            }
        }
    }
    Ok(out)
}

fn int_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key).map(|v| resolve(doc, v)) {
        Ok(Object::Integer(value)) => Some(*value),
        Ok(Object::Real(value)) => Some(*value as i64),
        _ => None,
    }
}

fn dimensions(doc: &Document, dict: &Dictionary) -> Result<(u32, u32), DecodeError> {
    let width = int_entry(doc, dict, b"Width").ok_or(DecodeError::MissingEntry("Width"))?;
    let height = int_entry(doc, dict, b"Height").ok_or(DecodeError::MissingEntry("Height"))?;
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(DecodeError::InvalidDimensions { width, height }),
    }
}

fn color_space_of(
    doc: &Document,
    dict: &Dictionary,
    limits: &DecodeLimits,
    depth: usize,
) -> Result<ColorSpace, DecodeError> {
    let space = dict
        .get(b"ColorSpace")
        .map_err(|_| DecodeError::MissingEntry("ColorSpace"))?;
    parse_color_space(doc, space, limits, depth)
}

fn parse_color_space(
    doc: &Document,
    space: &Object,
    limits: &DecodeLimits,
    depth: usize,
) -> Result<ColorSpace, DecodeError> {
    if depth > 4 {
        return Err(DecodeError::UnsupportedColorSpace("nested too deeply".to_string()));
    }

    match resolve(doc, space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorSpace::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
            other => Err(DecodeError::UnsupportedColorSpace(
                String::from_utf8_lossy(other).into_owned(),
            )),
        },
        Object::Array(items) => {
            let family = items
                .first()
                .map(|f| resolve(doc, f))
                .and_then(|f| f.as_name().ok())
                .ok_or_else(|| DecodeError::UnsupportedColorSpace("empty array".to_string()))?;
            match family {
                b"CalGray" => Ok(ColorSpace::Gray),
                b"CalRGB" | b"Lab" => Ok(ColorSpace::Rgb),
                b"ICCBased" => {
                    let profile = items
                        .get(1)
                        .map(|p| resolve(doc, p))
                        .and_then(|p| p.as_stream().ok())
                        .ok_or(DecodeError::MissingEntry("ICCBased profile"))?;
                    match int_entry(doc, &profile.dict, b"N") {
                        Some(1) => Ok(ColorSpace::Gray),
                        Some(3) => Ok(ColorSpace::Rgb),
                        Some(4) => Ok(ColorSpace::Cmyk),
                        other => Err(DecodeError::UnsupportedColorSpace(format!(
                            "ICCBased with N={:?}",
                            other
                        ))),
                    }
                }
                b"Indexed" | b"I" => parse_indexed(doc, items, limits, depth),
                other => Err(DecodeError::UnsupportedColorSpace(
                    String::from_utf8_lossy(other).into_owned(),
                )),
            }
        }
        other => Err(DecodeError::UnsupportedColorSpace(format!("{:?}", other))),
    }
}

fn parse_indexed(
    doc: &Document,
    items: &[Object],
    limits: &DecodeLimits,
    depth: usize,
) -> Result<ColorSpace, DecodeError> {
    if items.len() < 4 {
        return Err(DecodeError::UnsupportedColorSpace(
            "Indexed needs base, hival and lookup".to_string(),
        ));
    }
    let base = parse_color_space(doc, &items[1], limits, depth + 1)?;
    if matches!(base, ColorSpace::Indexed { .. }) {
        return Err(DecodeError::UnsupportedColorSpace("Indexed over Indexed".to_string()));
    }
    let hival = match resolve(doc, &items[2]) {
        Object::Integer(v) => (*v).clamp(0, 255) as usize,
        _ => return Err(DecodeError::MissingEntry("Indexed hival")),
    };
    let palette = match resolve(doc, &items[3]) {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(stream) => decode_samples(doc, stream, limits)?,
        _ => return Err(DecodeError::MissingEntry("Indexed lookup")),
    };

    let needed = (hival + 1) * base.components();
    if palette.len() < needed {
        return Err(DecodeError::Truncated {
            expected: needed,
            actual: palette.len(),
        });
    }
    Ok(ColorSpace::Indexed {
        base: Box::new(base),
        hival,
        palette,
    })
}

/// Unpacks rows of `bpc`-bit samples into one byte per sample. Rows are
/// padded to a byte boundary. With `scale`, sub-byte samples are stretched
/// to the full 0-255 range; palette indices are left as they are.
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bpc: u8,
    scale: bool,
) -> Result<Vec<u8>, DecodeError> {
    let samples_per_row = width as usize * components;
    let row_bytes = (samples_per_row * bpc as usize + 7) / 8;
    let expected = row_bytes * height as usize;
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let mut out = Vec::with_capacity(samples_per_row * height as usize);
    for row in data[..expected].chunks_exact(row_bytes) {
        match bpc {
            8 => out.extend_from_slice(&row[..samples_per_row]),
            16 => out.extend(row.chunks_exact(2).take(samples_per_row).map(|pair| pair[0])),
            1 | 2 | 4 => {
                let per_byte = 8 / bpc as usize;
                let mask = (1u8 << bpc) - 1;
                let factor = if scale { 255 / mask } else { 1 };
                for i in 0..samples_per_row {
                    let shift = 8 - bpc as usize * (i % per_byte + 1);
                    let value = (row[i / per_byte] >> shift) & mask;
                    out.push(value * factor);
                }
            }
            other => return Err(DecodeError::UnsupportedBitDepth(other as i64)),
        }
    }
    Ok(out)
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(samples.len() / 4 * 3);
    for px in samples.chunks_exact(4) {
        let k = 255 - px[3] as u16;
        for &ink in &px[..3] {
            rgb.push(((255 - ink as u16) * k / 255) as u8);
        }
    }
    rgb
}

fn pixels_to_image(
    space: &ColorSpace,
    samples: Vec<u8>,
    width: u32,
    height: u32,
) -> Result<DynamicImage, DecodeError> {
    let buffer_error = || DecodeError::Corrupt("sample buffer does not match image size".to_string());
    match space {
        ColorSpace::Gray => GrayImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(buffer_error),
        ColorSpace::Rgb => RgbImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(buffer_error),
        ColorSpace::Cmyk => RgbImage::from_raw(width, height, cmyk_to_rgb(&samples))
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(buffer_error),
        ColorSpace::Indexed {
            base,
            hival,
            palette,
        } => {
            let n = base.components();
            let mut expanded = Vec::with_capacity(samples.len() * n);
            for &index in &samples {
                let entry = (index as usize).min(*hival) * n;
                expanded.extend_from_slice(&palette[entry..entry + n]);
            }
            pixels_to_image(base, expanded, width, height)
        }
    }
}

fn is_decode_inverted(doc: &Document, dict: &Dictionary) -> bool {
    match dict.get(b"Decode").map(|d| resolve(doc, d)) {
        Ok(Object::Array(range)) if range.len() >= 2 => {
            matches!((number(&range[0]), number(&range[1])), (Some(l), Some(h)) if l > h)
        }
        _ => false,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        _ => None,
    }
}

fn is_image_mask(doc: &Document, dict: &Dictionary) -> bool {
    matches!(
        dict.get(b"ImageMask").map(|m| resolve(doc, m)),
        Ok(Object::Boolean(true))
    )
}

fn reconstruct(
    doc: &Document,
    dict: &Dictionary,
    data: &[u8],
    limits: &DecodeLimits,
) -> Result<DecodedImage, DecodeError> {
    let (width, height) = dimensions(doc, dict)?;
    let pixels = width as u64 * height as u64;
    if pixels > limits.max_image_pixels {
        return Err(DecodeError::TooLarge {
            pixels,
            limit: limits.max_image_pixels,
        });
    }

    let is_stencil = is_image_mask(doc, dict);
    let bpc = if is_stencil {
        1
    } else {
        int_entry(doc, dict, b"BitsPerComponent").unwrap_or(8)
    };
    let bpc = match bpc {
        1 | 2 | 4 | 8 | 16 => bpc as u8,
        other => return Err(DecodeError::UnsupportedBitDepth(other)),
    };
    let space = if is_stencil {
        ColorSpace::Gray
    } else {
        color_space_of(doc, dict, limits, 0)?
    };

    let indexed = matches!(space, ColorSpace::Indexed { .. });
    let mut samples = unpack_samples(data, width, height, space.components(), bpc, !indexed)?;
    if space.components() == 1 && !indexed && is_decode_inverted(doc, dict) {
        samples.iter_mut().for_each(|s| *s = 255 - *s);
    }

    let mut mode = match &space {
        _ if indexed => ColorMode::Indexed,
        ColorSpace::Gray if bpc == 1 => ColorMode::Bilevel,
        ColorSpace::Gray => ColorMode::Grayscale,
        ColorSpace::Rgb => ColorMode::Rgb,
        ColorSpace::Cmyk => ColorMode::Cmyk,
        ColorSpace::Indexed { .. } => ColorMode::Indexed,
    };
    let mut image = pixels_to_image(&space, samples, width, height)?;

    if let Some(alpha) = soft_mask(doc, dict, width, height, limits) {
        image = attach_alpha(image, alpha, width, height)?;
        mode = mode.with_alpha();
    }

    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageOutputFormat::Png)?;

    Ok(DecodedImage {
        header: ImageHeader {
            kind: ImageKind::Png,
            width,
            height,
            mode,
        },
        payload: encoded.into_inner(),
    })
}

fn soft_mask(
    doc: &Document,
    dict: &Dictionary,
    width: u32,
    height: u32,
    limits: &DecodeLimits,
) -> Option<Vec<u8>> {
    let mask_id = match dict.get(b"SMask") {
        Ok(Object::Reference(id)) => *id,
        _ => return None,
    };
    match decode_soft_mask(doc, mask_id, width, height, limits) {
        Ok(alpha) => Some(alpha),
        Err(e) => {
            warn!(object_id = ?mask_id, error = %e, "Ignoring undecodable soft mask");
            None
        }
    }
}

fn decode_soft_mask(
    doc: &Document,
    mask_id: ObjectId,
    width: u32,
    height: u32,
    limits: &DecodeLimits,
) -> Result<Vec<u8>, DecodeError> {
    let stream = doc.get_object(mask_id)?.as_stream()?;
    let (mask_width, mask_height) = dimensions(doc, &stream.dict)?;
    if (mask_width, mask_height) != (width, height) {
        return Err(DecodeError::Corrupt(format!(
            "soft mask is {}x{}, image is {}x{}",
            mask_width, mask_height, width, height
        )));
    }
    let bpc = match int_entry(doc, &stream.dict, b"BitsPerComponent").unwrap_or(8) {
        b @ (1 | 2 | 4 | 8 | 16) => b as u8,
        other => return Err(DecodeError::UnsupportedBitDepth(other)),
    };
    let data = decode_samples(doc, stream, limits)?;
    unpack_samples(&data, width, height, 1, bpc, true)
}

fn attach_alpha(
    image: DynamicImage,
    alpha: Vec<u8>,
    width: u32,
    height: u32,
) -> Result<DynamicImage, DecodeError> {
    let buffer_error = || DecodeError::Corrupt("alpha channel does not match image size".to_string());
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut interleaved = Vec::with_capacity(alpha.len() * 2);
            for (luma, a) in gray.into_raw().into_iter().zip(alpha) {
                interleaved.extend_from_slice(&[luma, a]);
            }
            GrayAlphaImage::from_raw(width, height, interleaved)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(buffer_error)
        }
        other => {
            let rgb = other.to_rgb8().into_raw();
            let mut interleaved = Vec::with_capacity(alpha.len() * 4);
            for (px, a) in rgb.chunks_exact(3).zip(alpha) {
                interleaved.extend_from_slice(&[px[0], px[1], px[2], a]);
            }
            RgbaImage::from_raw(width, height, interleaved)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(buffer_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn png_predictor_up_and_sub_rows() {
        // two rows of three bytes: row 0 uses Sub, row 1 uses Up
        let data = [1, 10, 5, 5, 2, 1, 1, 1];
        let out = png_unpredict(&data, 3, 1).unwrap();
        assert_eq!(out, vec![10, 15, 20, 11, 16, 21]);
    }

    #[test]
    fn png_predictor_rejects_unknown_row_filter() {
        assert!(png_unpredict(&[9, 0, 0], 2, 1).is_err());
    }

    fn predictor_parms(columns: i64) -> Dictionary {
        lopdf::dictionary! {
            "Predictor" => 12,
            "Colors" => 1,
            "BitsPerComponent" => 8,
            "Columns" => columns,
        }
    }

    #[test]
    fn predictor_rejects_rows_longer_than_the_stream() {
        let parms = predictor_parms(1 << 42);
        let err = apply_predictor(vec![0, 1, 2, 3], Some(&parms)).unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));

        let parms = predictor_parms(i64::MAX);
        assert!(apply_predictor(vec![0; 16], Some(&parms)).is_err());
    }

    #[test]
    fn predictor_rejects_invalid_bit_depth() {
        let mut parms = predictor_parms(2);
        parms.set("BitsPerComponent", 3i64);
        assert!(apply_predictor(vec![0; 6], Some(&parms)).is_err());
    }

    #[test]
    fn predictor_accepts_well_formed_rows() {
        let parms = predictor_parms(3);
        let out = apply_predictor(vec![1, 10, 5, 5, 2, 1, 1, 1], Some(&parms)).unwrap();
        assert_eq!(out, vec![10, 15, 20, 11, 16, 21]);
    }

    #[test]
    fn lzw_decodes_early_change_streams() {
        let text = b"-----A---B-----A---B-----A---B".repeat(20);
        let encoded = weezl::encode::Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(&text)
            .unwrap();
        assert_eq!(lzw_decode(&encoded, true, 1 << 20).unwrap(), text);
    }

    #[test]
    fn lzw_decodes_without_early_change() {
        let text = b"abababababababababab".repeat(10);
        let encoded = weezl::encode::Encoder::new(BitOrder::Msb, 8)
            .encode(&text)
            .unwrap();
        assert_eq!(lzw_decode(&encoded, false, 1 << 20).unwrap(), text);
    }

    #[test]
    fn lzw_output_is_capped() {
        let zeros = vec![0u8; 100_000];
        let encoded = weezl::encode::Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(&zeros)
            .unwrap();
        assert!(matches!(
            lzw_decode(&encoded, true, 1_000),
            Err(DecodeError::StreamTooLarge { limit: 1_000 })
        ));
    }

    #[test]
    fn ascii85_round_trip_of_known_text() {
        assert_eq!(ascii85_decode(b"<~87cURDZ~>").unwrap(), b"Hello");
        assert_eq!(ascii85_decode(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn ascii_hex_ignores_whitespace_and_pads() {
        assert_eq!(ascii_hex_decode(b"48 65 6c\n6C 6f 7>").unwrap(), b"Hello\x70");
    }

    #[test]
    fn run_length_literal_and_repeat() {
        let data = [2, b'a', b'b', b'c', 254, b'z', 128];
        assert_eq!(run_length_decode(&data).unwrap(), b"abczzz");
    }

    #[test]
    fn unpack_one_bit_rows_are_byte_padded() {
        // 3 pixels wide: 0b101xxxxx then 0b010xxxxx
        let data = [0b1010_0000, 0b0100_0000];
        let out = unpack_samples(&data, 3, 2, 1, 1, true).unwrap();
        assert_eq!(out, vec![255, 0, 255, 0, 255, 0]);
    }

    #[test]
    fn unpack_detects_truncated_samples() {
        let err = unpack_samples(&[0u8; 5], 2, 2, 3, 8, true).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { expected: 12, actual: 5 }));
    }

    #[test]
    fn cmyk_conversion_maps_pure_inks() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0]), vec![255, 255, 255]);
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255]), vec![0, 0, 0]);
        assert_eq!(cmyk_to_rgb(&[255, 0, 0, 0]), vec![0, 255, 255]);
    }
}
