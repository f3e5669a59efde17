//! PDF fixtures built in memory with lopdf.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use flate2::{write::ZlibEncoder, Compression};
use image::ImageOutputFormat;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

pub struct PdfFixture {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfFixture {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn add_stream(&mut self, mut stream: Stream) -> ObjectId {
        stream.allows_compression = false;
        self.doc.add_object(Object::Stream(stream))
    }

    /// A page whose `/Resources /XObject` maps each name to an object.
    pub fn add_page(&mut self, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        self.add_page_with_resources(Some(dictionary! {
            "XObject" => xobject_dict(xobjects),
        }))
    }

    pub fn add_page_with_resources(&mut self, resources: Option<Dictionary>) -> ObjectId {
        let content = Stream::new(dictionary! {}, b"q 100 0 0 100 0 0 cm Q".to_vec());
        let content_id = self.doc.add_object(Object::Stream(content));

        let mut page = dictionary! {
            "Type" => Object::Name(b"Page".to_vec()),
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
        };
        if let Some(resources) = resources {
            page.set("Resources", resources);
        }
        let page_id = self.doc.add_object(page);
        self.kids.push(Object::Reference(page_id));
        page_id
    }

    /// A form XObject that draws the given XObjects.
    pub fn add_form(&mut self, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        let form = Stream::new(
            dictionary! {
                "Type" => Object::Name(b"XObject".to_vec()),
                "Subtype" => Object::Name(b"Form".to_vec()),
                "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
                "Resources" => dictionary! {
                    "XObject" => xobject_dict(xobjects),
                },
            },
            b"q 100 0 0 100 0 0 cm /Im0 Do Q".to_vec(),
        );
        self.add_stream(form)
    }

    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.doc.add_object(object)
    }

    /// A page with no resources of its own whose only annotation shows
    /// `normal_appearance` as its `/AP /N` entry.
    pub fn add_page_with_annotation(&mut self, normal_appearance: Object) -> ObjectId {
        let annotation = self.doc.add_object(dictionary! {
            "Type" => Object::Name(b"Annot".to_vec()),
            "Subtype" => Object::Name(b"Stamp".to_vec()),
            "Rect" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "AP" => dictionary! {
                "N" => normal_appearance,
            },
        });
        let page_id = self.add_page_with_resources(None);
        if let Ok(Object::Dictionary(page)) = self.doc.get_object_mut(page_id) {
            page.set("Annots", vec![Object::Reference(annotation)]);
        }
        page_id
    }

    /// A coloured tiling pattern whose cell draws the given XObjects.
    pub fn add_tiling_pattern(&mut self, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        let pattern = Stream::new(
            dictionary! {
                "Type" => Object::Name(b"Pattern".to_vec()),
                "PatternType" => 1,
                "PaintType" => 1,
                "TilingType" => 1,
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "XStep" => 10,
                "YStep" => 10,
                "Resources" => dictionary! {
                    "XObject" => xobject_dict(xobjects),
                },
            },
            b"q 10 0 0 10 0 0 cm /Im0 Do Q".to_vec(),
        );
        self.add_stream(pattern)
    }

    /// Serializes the document. `root_resources` lands on the page tree
    /// root so pages without their own `/Resources` inherit it.
    pub fn finish_with(mut self, root_resources: Option<Dictionary>) -> Vec<u8> {
        let mut pages = dictionary! {
            "Type" => Object::Name(b"Pages".to_vec()),
            "Count" => Object::Integer(self.kids.len() as i64),
            "Kids" => self.kids,
        };
        if let Some(resources) = root_resources {
            pages.set("Resources", resources);
        }
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => Object::Name(b"Catalog".to_vec()),
            "Pages" => Object::Reference(self.pages_id),
        });
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buf = Vec::new();
        self.doc.save_to(&mut buf).unwrap();
        buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.finish_with(None)
    }
}

pub fn xobject_dict(xobjects: &[(&str, ObjectId)]) -> Dictionary {
    let mut dict = Dictionary::new();
    for (name, id) in xobjects {
        dict.set(*name, Object::Reference(*id));
    }
    dict
}

fn image_dict(width: u32, height: u32, color_space: Object, bpc: i64) -> Dictionary {
    dictionary! {
        "Type" => Object::Name(b"XObject".to_vec()),
        "Subtype" => Object::Name(b"Image".to_vec()),
        "Width" => Object::Integer(width as i64),
        "Height" => Object::Integer(height as i64),
        "ColorSpace" => color_space,
        "BitsPerComponent" => Object::Integer(bpc),
    }
}

pub fn make_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7) as u8, (y * 5) as u8, 128])
    });
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, ImageOutputFormat::Jpeg(85))
        .unwrap();
    bytes.into_inner()
}

pub fn make_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 200]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Just enough of a JPEG for its frame header to be read: SOI, an APP0
/// stub and a baseline SOF0 with the given component count.
pub fn jpeg_header_only(width: u16, height: u16, components: u8) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
    bytes.extend_from_slice(&[0xFF, 0xC0]);
    bytes.extend_from_slice(&(8 + 3 * components as u16).to_be_bytes());
    bytes.push(8);
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.push(components);
    for id in 0..components {
        bytes.extend_from_slice(&[id + 1, 0x11, 0x00]);
    }
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

fn zlib_fast(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn dct_stream(jpeg: Vec<u8>, width: u32, height: u32, color_space: &str) -> Stream {
    let mut dict = image_dict(width, height, Object::Name(color_space.as_bytes().to_vec()), 8);
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    Stream::new(dict, jpeg)
}

pub fn jpeg_stream(width: u32, height: u32) -> Stream {
    dct_stream(make_jpeg(width, height), width, height, "DeviceRGB")
}

/// Claims to be DCT but carries no JPEG at all.
pub fn corrupt_dct_stream() -> Stream {
    dct_stream(b"definitely not a jpeg".to_vec(), 10, 10, "DeviceRGB")
}

pub fn flate_rgb_stream(width: u32, height: u32) -> Stream {
    let samples: Vec<u8> = (0..width * height)
        .flat_map(|i| [(i % 256) as u8, 64, 192])
        .collect();
    let mut dict = image_dict(width, height, Object::Name(b"DeviceRGB".to_vec()), 8);
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    Stream::new(dict, zlib(&samples))
}

pub fn raw_gray_stream(width: u32, height: u32) -> Stream {
    let samples = vec![127u8; (width * height) as usize];
    Stream::new(
        image_dict(width, height, Object::Name(b"DeviceGray".to_vec()), 8),
        samples,
    )
}

pub fn bilevel_stream(width: u32, height: u32) -> Stream {
    let row_bytes = (width as usize + 7) / 8;
    let samples = vec![0b1010_1010u8; row_bytes * height as usize];
    Stream::new(
        image_dict(width, height, Object::Name(b"DeviceGray".to_vec()), 1),
        samples,
    )
}

pub fn raw_cmyk_stream(width: u32, height: u32) -> Stream {
    let samples: Vec<u8> = (0..width * height).flat_map(|_| [0u8, 255, 255, 0]).collect();
    Stream::new(
        image_dict(width, height, Object::Name(b"DeviceCMYK".to_vec()), 8),
        zlib(&samples),
    )
    .with_filter("FlateDecode")
}

/// Two-colour palette over DeviceRGB, one index byte per pixel.
pub fn indexed_stream(width: u32, height: u32) -> Stream {
    let color_space = Object::Array(vec![
        Object::Name(b"Indexed".to_vec()),
        Object::Name(b"DeviceRGB".to_vec()),
        Object::Integer(1),
        Object::String(vec![255, 0, 0, 0, 0, 255], StringFormat::Hexadecimal),
    ]);
    let samples: Vec<u8> = (0..width * height).map(|i| (i % 2) as u8).collect();
    Stream::new(image_dict(width, height, color_space, 8), samples)
}

/// An RGB image whose soft mask has already been stored as `mask_id`.
pub fn rgb_with_smask_stream(width: u32, height: u32, mask_id: ObjectId) -> Stream {
    let samples = vec![200u8; (width * height * 3) as usize];
    let mut dict = image_dict(width, height, Object::Name(b"DeviceRGB".to_vec()), 8);
    dict.set("SMask", Object::Reference(mask_id));
    Stream::new(dict, samples)
}

/// Flate gray samples whose `/DecodeParms` claim a PNG predictor over
/// `columns` pixels per row.
pub fn predicted_gray_stream(width: u32, height: u32, columns: i64) -> Stream {
    let mut rows = Vec::new();
    for _ in 0..height {
        rows.push(0u8);
        rows.extend(std::iter::repeat(90u8).take(width as usize));
    }
    let mut dict = image_dict(width, height, Object::Name(b"DeviceGray".to_vec()), 8);
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    dict.set(
        "DecodeParms",
        dictionary! {
            "Predictor" => 12,
            "Colors" => 1,
            "BitsPerComponent" => 8,
            "Columns" => columns,
        },
    );
    Stream::new(dict, zlib(&rows))
}

/// Gray samples compressed with LZW, early change on (the PDF default).
pub fn lzw_gray_stream(width: u32, height: u32) -> Stream {
    let samples: Vec<u8> = (0..width * height).map(|i| (i * 3 % 256) as u8).collect();
    let encoded = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
        .encode(&samples)
        .unwrap();
    Stream::new(
        image_dict(width, height, Object::Name(b"DeviceGray".to_vec()), 8),
        encoded,
    )
    .with_filter("LZWDecode")
}

/// A stencil mask: `/ImageMask true` with no colour space or bit depth.
pub fn stencil_stream(width: u32, height: u32, samples: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => Object::Name(b"XObject".to_vec()),
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => Object::Integer(width as i64),
            "Height" => Object::Integer(height as i64),
            "ImageMask" => true,
        },
        samples,
    )
}

/// Indexed image whose 256-entry RGB palette is a Flate stream stored as
/// `palette_id` (see [`palette_stream`]).
pub fn indexed_with_palette_stream(width: u32, height: u32, palette_id: ObjectId) -> Stream {
    let color_space = Object::Array(vec![
        Object::Name(b"Indexed".to_vec()),
        Object::Name(b"DeviceRGB".to_vec()),
        Object::Integer(255),
        Object::Reference(palette_id),
    ]);
    let samples: Vec<u8> = (0..width * height).map(|i| (i % 256) as u8).collect();
    Stream::new(image_dict(width, height, color_space, 8), samples)
}

pub fn palette_stream() -> Stream {
    let palette: Vec<u8> = (0..=255u8).flat_map(|i| [i, 255 - i, 0]).collect();
    Stream::new(dictionary! {}, zlib(&palette)).with_filter("FlateDecode")
}

/// Bilevel fax data we do not decode.
pub fn ccitt_stream(width: u32, height: u32) -> Stream {
    let mut dict = image_dict(width, height, Object::Name(b"DeviceGray".to_vec()), 1);
    dict.set("Filter", Object::Name(b"CCITTFaxDecode".to_vec()));
    Stream::new(dict, vec![0u8; 16])
}

trait WithFilter {
    fn with_filter(self, name: &str) -> Self;
}

impl WithFilter for Stream {
    fn with_filter(mut self, name: &str) -> Self {
        self.dict.set("Filter", Object::Name(name.as_bytes().to_vec()));
        self
    }
}

/// One page with `count` distinct JPEG images.
pub fn pdf_with_jpegs(count: usize) -> Vec<u8> {
    let mut pdf = PdfFixture::new();
    let mut names = Vec::new();
    for i in 0..count {
        let id = pdf.add_stream(jpeg_stream(40 + i as u32 * 8, 30));
        names.push((format!("Im{}", i), id));
    }
    let refs: Vec<(&str, ObjectId)> = names.iter().map(|(n, id)| (n.as_str(), *id)).collect();
    pdf.add_page(&refs);
    pdf.finish()
}

/// One page with `count` large, highly compressible RGB images. Each is
/// slow to re-encode, which keeps an extraction busy for a while.
pub fn pdf_with_large_images(count: usize, width: u32, height: u32) -> Vec<u8> {
    let compressed = zlib_fast(&vec![0u8; (width * height * 3) as usize]);
    let mut pdf = PdfFixture::new();
    let mut names = Vec::new();
    for i in 0..count {
        let mut dict = image_dict(width, height, Object::Name(b"DeviceRGB".to_vec()), 8);
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        let id = pdf.add_stream(Stream::new(dict, compressed.clone()));
        names.push((format!("Im{}", i), id));
    }
    let refs: Vec<(&str, ObjectId)> = names.iter().map(|(n, id)| (n.as_str(), *id)).collect();
    pdf.add_page(&refs);
    pdf.finish()
}

/// A page with text only.
pub fn pdf_without_images() -> Vec<u8> {
    let mut pdf = PdfFixture::new();
    pdf.add_page_with_resources(Some(dictionary! {
        "Font" => dictionary! {
            "F1" => dictionary! {
                "Type" => Object::Name(b"Font".to_vec()),
                "Subtype" => Object::Name(b"Type1".to_vec()),
                "BaseFont" => Object::Name(b"Helvetica".to_vec()),
            },
        },
    }));
    pdf.finish()
}
