//! Native image streams from a page's XObject resources, via lopdf.
//!
//! Images whose filter is itself a file format (JPEG, JPEG 2000, JBIG2,
//! CCITT) are returned byte-for-byte. Raw sample data (unfiltered, Flate or
//! LZW) in Gray/RGB/CMYK/ICCBased/Indexed colour is re-encoded as PNG.
//! Layouts with no standalone file representation (Lab, Separation, exotic
//! filter chains) are returned as their stored bytes with
//! [`ImageEncoding::Raw`].
//!
//! Only images referenced directly from the page's resources are visited;
//! images nested inside form XObjects are not.

use super::{DocumentError, EmbeddedImage, ImageEncoding};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use tracing::{debug, warn};

/// Page-tree depth searched for inherited `/Resources`.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Embedded images on `page_id`, in resource-dictionary order.
///
/// # Errors
/// [`DocumentError::Page`] if the page's resources are unreadable;
/// [`DocumentError::Image`] for the first malformed image stream.
pub fn page_images(doc: &Document, page_id: ObjectId) -> Result<Vec<EmbeddedImage>, DocumentError> {
    let Some(resources) = page_resources(doc, page_id).map_err(DocumentError::Page)? else {
        return Ok(Vec::new());
    };
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Ok(Vec::new());
    };
    let xobjects = resolve(doc, xobjects)
        .and_then(|o| o.as_dict().map_err(|_| "/XObject is not a dictionary".to_string()))
        .map_err(DocumentError::Page)?;

    let mut images = Vec::new();
    for (name, value) in xobjects.iter() {
        let index = images.len() + 1;
        let stream = match resolve(doc, value) {
            Ok(Object::Stream(stream)) => stream,
            Ok(_) => continue,
            Err(detail) => return Err(DocumentError::Image { index, detail }),
        };
        if !is_image(&stream.dict) {
            continue;
        }

        let image =
            decode_image(doc, stream).map_err(|detail| DocumentError::Image { index, detail })?;
        if image.encoding == ImageEncoding::Raw {
            warn!(
                "Image {} (/{}) has no portable encoding; keeping stored bytes",
                index,
                String::from_utf8_lossy(name)
            );
        }
        debug!(
            "Image {}: {}x{} {}",
            index, image.width, image.height, image.encoding
        );
        images.push(image);
    }
    Ok(images)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, String> {
    match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| format!("dangling reference {} {} R: {e}", id.0, id.1)),
        other => Ok(other),
    }
}

/// The page's own `/Resources`, or the nearest ancestor's.
fn page_resources(doc: &Document, page_id: ObjectId) -> Result<Option<&Dictionary>, String> {
    let mut node = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page object unreadable: {e}"))?;

    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?
                .as_dict()
                .map(Some)
                .map_err(|_| "/Resources is not a dictionary".to_string());
        }
        match node.get(b"Parent") {
            Ok(parent) => {
                node = resolve(doc, parent)?
                    .as_dict()
                    .map_err(|_| "/Parent is not a dictionary".to_string())?;
            }
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image"))
}

fn integer(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<Option<i64>, String> {
    let Ok(obj) = dict.get(key) else {
        return Ok(None);
    };
    match resolve(doc, obj)? {
        Object::Integer(v) => Ok(Some(*v)),
        Object::Real(v) => Ok(Some(*v as i64)),
        _ => Err(format!("/{} is not a number", String::from_utf8_lossy(key))),
    }
}

fn dimension(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<u32, String> {
    let name = String::from_utf8_lossy(key);
    match integer(doc, dict, key)? {
        Some(v) if v > 0 && v <= i64::from(u32::MAX) => Ok(v as u32),
        Some(v) => Err(format!("invalid /{name} {v}")),
        None => Err(format!("missing /{name}")),
    }
}

fn filters(doc: &Document, dict: &Dictionary) -> Result<Vec<Vec<u8>>, String> {
    let Ok(obj) = dict.get(b"Filter") else {
        return Ok(Vec::new());
    };
    match resolve(doc, obj)? {
        Object::Null => Ok(Vec::new()),
        Object::Name(name) => Ok(vec![name.clone()]),
        Object::Array(items) => items
            .iter()
            .map(|item| {
                resolve(doc, item)?
                    .as_name()
                    .map(<[u8]>::to_vec)
                    .map_err(|_| "/Filter array holds a non-name".to_string())
            })
            .collect(),
        _ => Err("invalid /Filter".to_string()),
    }
}

fn passthrough_encoding(filter: &[u8]) -> Option<ImageEncoding> {
    match filter {
        b"DCTDecode" | b"DCT" => Some(ImageEncoding::Jpeg),
        b"JPXDecode" => Some(ImageEncoding::Jpx),
        b"JBIG2Decode" => Some(ImageEncoding::Jbig2),
        b"CCITTFaxDecode" | b"CCF" => Some(ImageEncoding::Ccitt),
        _ => None,
    }
}

fn decode_image(doc: &Document, stream: &Stream) -> Result<EmbeddedImage, String> {
    let dict = &stream.dict;
    let width = dimension(doc, dict, b"Width")?;
    let height = dimension(doc, dict, b"Height")?;
    if stream.content.is_empty() {
        return Err("empty image stream".to_string());
    }

    let filters = filters(doc, dict)?;
    let raw = || EmbeddedImage {
        bytes: stream.content.clone(),
        encoding: ImageEncoding::Raw,
        width,
        height,
    };

    let samples = match filters.as_slice() {
        [] => stream.content.clone(),
        [only] => {
            if let Some(encoding) = passthrough_encoding(only) {
                return Ok(EmbeddedImage {
                    bytes: stream.content.clone(),
                    encoding,
                    width,
                    height,
                });
            }
            match only.as_slice() {
                b"FlateDecode" | b"Fl" | b"LZWDecode" | b"LZW" => stream
                    .decompressed_content()
                    .map_err(|e| format!("decompression failed: {e}"))?,
                _ => return Ok(raw()),
            }
        }
        _ => return Ok(raw()),
    };

    let image_mask = dict
        .get(b"ImageMask")
        .and_then(Object::as_bool)
        .unwrap_or(false);
    let (model, bpc) = if image_mask {
        (ColorModel::Gray, 1)
    } else {
        let Ok(cs) = dict.get(b"ColorSpace") else {
            return Ok(raw());
        };
        let Some(model) = color_model(doc, cs, 0)? else {
            return Ok(raw());
        };
        let bpc = integer(doc, dict, b"BitsPerComponent")?.unwrap_or(8);
        (model, bpc)
    };
    let bpc = match bpc {
        1 | 2 | 4 | 8 | 16 => bpc as u32,
        other => return Err(format!("invalid /BitsPerComponent {other}")),
    };

    let image = to_raster(&model, width, height, bpc, &samples)?;
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;

    Ok(EmbeddedImage {
        bytes,
        encoding: ImageEncoding::Png,
        width,
        height,
    })
}

// ── Colour ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorModel>, palette: Vec<u8> },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }
}

/// Ok(None) for colour spaces with no lossless RGB mapping here.
fn color_model(doc: &Document, obj: &Object, depth: usize) -> Result<Option<ColorModel>, String> {
    let family = |name: &[u8]| match name {
        b"DeviceGray" | b"CalGray" | b"G" => Some(ColorModel::Gray),
        b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorModel::Rgb),
        b"DeviceCMYK" | b"CMYK" => Some(ColorModel::Cmyk),
        _ => None,
    };

    match resolve(doc, obj)? {
        Object::Name(name) => Ok(family(name)),
        Object::Array(items) => {
            let Some(head) = items.first() else {
                return Err("empty /ColorSpace array".to_string());
            };
            let head = resolve(doc, head)?
                .as_name()
                .map_err(|_| "/ColorSpace array does not start with a name".to_string())?;
            match head {
                b"ICCBased" => {
                    let profile = items
                        .get(1)
                        .ok_or("ICCBased without profile stream")
                        .map_err(str::to_string)
                        .and_then(|o| resolve(doc, o))?
                        .as_stream()
                        .map_err(|_| "ICCBased profile is not a stream".to_string())?;
                    Ok(match integer(doc, &profile.dict, b"N")? {
                        Some(1) => Some(ColorModel::Gray),
                        Some(3) => Some(ColorModel::Rgb),
                        Some(4) => Some(ColorModel::Cmyk),
                        _ => None,
                    })
                }
                b"Indexed" | b"I" if depth == 0 => {
                    if items.len() < 4 {
                        return Err("Indexed colour space needs 4 entries".to_string());
                    }
                    let Some(base) = color_model(doc, &items[1], depth + 1)? else {
                        return Ok(None);
                    };
                    let palette = match resolve(doc, &items[3])? {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(s) if s.dict.get(b"Filter").is_err() => s.content.clone(),
                        Object::Stream(s) => s
                            .decompressed_content()
                            .map_err(|e| format!("Indexed lookup table undecodable: {e}"))?,
                        _ => return Err("invalid Indexed lookup table".to_string()),
                    };
                    Ok(Some(ColorModel::Indexed {
                        base: Box::new(base),
                        palette,
                    }))
                }
                other => Ok(family(other)),
            }
        }
        _ => Err("invalid /ColorSpace".to_string()),
    }
}

/// Unpack packed samples into one value per component (row-padded to bytes).
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    comps: usize,
    bpc: u32,
) -> Result<Vec<u16>, String> {
    let overflow =
        || format!("image dimensions overflow: {width}x{height}x{comps} at {bpc} bpc");
    let per_row = width.checked_mul(comps).ok_or_else(overflow)?;
    let row_bytes = per_row
        .checked_mul(bpc as usize)
        .ok_or_else(overflow)?
        .div_ceil(8);
    let needed = row_bytes.checked_mul(height).ok_or_else(overflow)?;
    let sample_count = per_row.checked_mul(height).ok_or_else(overflow)?;
    if data.len() < needed {
        return Err(format!(
            "sample data too short: {} bytes, expected {}",
            data.len(),
            needed
        ));
    }

    let mut out = Vec::with_capacity(sample_count);
    for row in data[..needed].chunks_exact(row_bytes) {
        for s in 0..per_row {
            let value = match bpc {
                8 => u16::from(row[s]),
                16 => u16::from_be_bytes([row[2 * s], row[2 * s + 1]]),
                _ => {
                    let bit = s * bpc as usize;
                    let shift = 8 - bpc as usize - bit % 8;
                    u16::from((row[bit / 8] >> shift) & ((1u8 << bpc) - 1))
                }
            };
            out.push(value);
        }
    }
    Ok(out)
}

fn scale(value: u16, bpc: u32) -> u8 {
    let max = (1u32 << bpc) - 1;
    (u32::from(value) * 255 / max) as u8
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let inv = |v: u8| u32::from(255 - v) * u32::from(255 - k) / 255;
    [inv(c) as u8, inv(m) as u8, inv(y) as u8]
}

fn to_raster(
    model: &ColorModel,
    width: u32,
    height: u32,
    bpc: u32,
    data: &[u8],
) -> Result<DynamicImage, String> {
    let samples = unpack_samples(data, width as usize, height as usize, model.components(), bpc)?;
    let shape_err = || "pixel buffer does not match dimensions".to_string();

    match model {
        ColorModel::Gray => {
            let px = samples.iter().map(|&v| scale(v, bpc)).collect();
            GrayImage::from_raw(width, height, px)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(shape_err)
        }
        ColorModel::Rgb => {
            let px = samples.iter().map(|&v| scale(v, bpc)).collect();
            RgbImage::from_raw(width, height, px)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(shape_err)
        }
        ColorModel::Cmyk => {
            let px = samples
                .chunks_exact(4)
                .flat_map(|p| {
                    cmyk_to_rgb(
                        scale(p[0], bpc),
                        scale(p[1], bpc),
                        scale(p[2], bpc),
                        scale(p[3], bpc),
                    )
                })
                .collect();
            RgbImage::from_raw(width, height, px)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(shape_err)
        }
        ColorModel::Indexed { base, palette } => {
            let stride = base.components();
            let entry = |i: usize, c: usize| palette.get(i * stride + c).copied().unwrap_or(0);
            let px = samples
                .iter()
                .flat_map(|&v| {
                    let i = usize::from(v);
                    match base.as_ref() {
                        ColorModel::Gray => {
                            let g = entry(i, 0);
                            [g, g, g]
                        }
                        ColorModel::Cmyk => {
                            cmyk_to_rgb(entry(i, 0), entry(i, 1), entry(i, 2), entry(i, 3))
                        }
                        _ => [entry(i, 0), entry(i, 1), entry(i, 2)],
                    }
                })
                .collect();
            RgbImage::from_raw(width, height, px)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(shape_err)
        }
    }
}
