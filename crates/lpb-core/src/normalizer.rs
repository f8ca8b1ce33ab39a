//! Image normalization for the 4x6 inch label.
//!
//! Decodes whatever the chat platform delivered, downscales it to fit the
//! label's pixel box and re-encodes it as PNG (alpha or palette sources) or
//! JPEG (everything else).

use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::FilterType,
    ColorType, DynamicImage, ImageFormat,
};
use tracing::debug;

use crate::{errors::Error, Result};

pub const LABEL_WIDTH_INCHES: u32 = 4;
pub const LABEL_HEIGHT_INCHES: u32 = 6;
/// Assumed print resolution.
pub const IMAGE_DPI: u32 = 300;

pub const LABEL_WIDTH_PX: u32 = LABEL_WIDTH_INCHES * IMAGE_DPI;
pub const LABEL_HEIGHT_PX: u32 = LABEL_HEIGHT_INCHES * IMAGE_DPI;

const JPEG_QUALITY: u8 = 90;

/// Output encoding chosen by the normalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormatTag {
    Png,
    Jpeg,
}

impl ImageFormatTag {
    /// Lowercase tag, also used as the temp file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormatTag::Png => "png",
            ImageFormatTag::Jpeg => "jpeg",
        }
    }
}

/// An image re-encoded to fit the label.
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormatTag,
    pub width: u32,
    pub height: u32,
}

/// Fit `width`x`height` inside `max_width`x`max_height`, preserving aspect ratio.
///
/// Never upscales. The limiting axis lands exactly on the box edge; the other
/// axis is rounded to the nearest pixel.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }

    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width), u64::from(max_height));

    if w * mh >= h * mw {
        let scaled_h = ((h * mw + w / 2) / w).clamp(1, mh);
        (max_width, scaled_h as u32)
    } else {
        let scaled_w = ((w * mh + h / 2) / h).clamp(1, mw);
        (scaled_w as u32, max_height)
    }
}

/// Decode, fit to the label box and re-encode.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedImage> {
    let source_format = image::guess_format(bytes).map_err(Error::ImageDecode)?;
    let decoded =
        image::load_from_memory_with_format(bytes, source_format).map_err(Error::ImageDecode)?;
    let palette = is_palette_indexed(bytes, source_format);

    let (src_w, src_h) = (decoded.width(), decoded.height());
    let (dst_w, dst_h) = fit_within(src_w, src_h, LABEL_WIDTH_PX, LABEL_HEIGHT_PX);
    let resized = if (dst_w, dst_h) == (src_w, src_h) {
        decoded
    } else {
        decoded.resize_exact(dst_w, dst_h, FilterType::Lanczos3)
    };

    let format = if resized.color().has_alpha() || palette {
        ImageFormatTag::Png
    } else {
        ImageFormatTag::Jpeg
    };

    debug!(
        source = ?source_format,
        src_w,
        src_h,
        dst_w,
        dst_h,
        output = format.extension(),
        "normalized image"
    );

    let bytes = encode(&resized, format)?;
    Ok(NormalizedImage {
        bytes,
        format,
        width: dst_w,
        height: dst_h,
    })
}

fn encode(img: &DynamicImage, format: ImageFormatTag) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ImageFormatTag::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
                .map_err(Error::ImageEncode)?;
        }
        ImageFormatTag::Png => {
            // PNG has no float sample formats.
            let img = match img.color() {
                ColorType::Rgb32F | ColorType::Rgba32F => {
                    DynamicImage::ImageRgba8(img.to_rgba8())
                }
                _ => img.clone(),
            };
            img.write_with_encoder(PngEncoder::new(&mut out))
                .map_err(Error::ImageEncode)?;
        }
    }
    Ok(out)
}

/// Whether the encoded source stores indexed colour.
///
/// Decoders expand palettes to RGB(A), so this looks at the container:
/// PNG colour type 3 in the IHDR chunk, or any GIF.
fn is_palette_indexed(bytes: &[u8], format: ImageFormat) -> bool {
    const PNG_COLOR_TYPE_OFFSET: usize = 25;
    const PNG_INDEXED: u8 = 3;

    match format {
        ImageFormat::Png => {
            bytes.get(12..16) == Some(b"IHDR".as_slice())
                && bytes.get(PNG_COLOR_TYPE_OFFSET) == Some(&PNG_INDEXED)
        }
        ImageFormat::Gif => true,
        _ => false,
    }
}
