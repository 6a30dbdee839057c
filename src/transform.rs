use crate::config::OutputFormat;
use crate::EdgeError;
use image::{DynamicImage, GenericImageView};

pub mod params;

pub use params::TransformParams;

/// Full pipeline: decode, resize, re-encode into the normalized format.
///
/// Pure and free of shared state, so concurrent calls are safe. Identical
/// input bytes and params always produce identical output bytes.
pub fn transform(bytes: &[u8], params: &TransformParams) -> Result<Vec<u8>, EdgeError> {
    let img = decode_image(bytes)?;
    let resized = resize_image(img, params.width, params.height);
    encode_image(&resized, params.format, params.effective_quality())
}

/// Decodes raw image bytes into memory-resident representation.
///
/// The format is detected from magic bytes, never from the origin's
/// content-type.
///
/// # Errors
/// Returns `EdgeError::InvalidInput` if the format cannot be detected or the
/// data is corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EdgeError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| EdgeError::InvalidInput(format!("unrecognized image: {}", e)))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| EdgeError::InvalidInput(format!("undecodable {:?} image: {}", guessed, e)))?;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(EdgeError::InvalidInput("image has zero dimensions".into()));
    }
    Ok(img)
}

/// Resizes an image using "exact box" semantics.
///
/// # Behavior
/// - Both specified: resize to exactly `w x h` (aspect ratio may change)
/// - Only width: scale height proportionally
/// - Only height: scale width proportionally
/// - Neither: return original
///
/// Every dimension is clamped to at least 1 pixel.
pub fn resize_image(img: DynamicImage, w: Option<u32>, h: Option<u32>) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();

    let (target_w, target_h) = match (w, h) {
        (None, None) => return img,
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(orig_h, w, orig_w)),
        (None, Some(h)) => (scale(orig_w, h, orig_h), h),
    };
    let (target_w, target_h) = (target_w.max(1), target_h.max(1));

    if (target_w, target_h) == (orig_w, orig_h) {
        return img;
    }

    // Lanczos3 provides best quality for downsampling
    img.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
}

// side * (to / from), rounded to nearest
fn scale(side: u32, to: u32, from: u32) -> u32 {
    let scaled = (side as f64 * to as f64 / from as f64).round();
    (scaled as u32).max(1)
}

/// Encodes an image with quality control.
///
/// WebP is encoded lossy through libwebp. Sources with an alpha channel keep
/// it; everything else is flattened to RGB.
pub fn encode_image(img: &DynamicImage, fmt: OutputFormat, quality: u8) -> Result<Vec<u8>, EdgeError> {
    let q = quality.clamp(1, 100) as f32;

    match fmt {
        OutputFormat::WebP => {
            let encoded = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                let (w, h) = rgba.dimensions();
                webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode_simple(false, q)
            } else {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_simple(false, q)
            };
            encoded
                .map(|mem| mem.to_vec())
                .map_err(|e| EdgeError::InvalidInput(format!("webp encode failed: {:?}", e)))
        }
    }
}
