//! Raster operations: decode, fit-and-pad, pre-normalization, PNG encode.
//!
//! All resizing goes through [`fit_and_pad`], the one operation shared by
//! every derivative: shrink-only aspect-preserving resize (Lanczos3),
//! centered paste onto a fixed-size canvas, with the source's own alpha
//! channel acting as the paste mask. Independent-axis stretching — the
//! defect in the oldest variant of this pipeline — is structurally
//! impossible here because target dimensions always come from
//! [`fit_within`](super::calculations::fit_within).

use super::calculations::{center_offset, exceeds, fit_within};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Decode(image::ImageError),
    #[error("encode failed: {0}")]
    Encode(image::ImageError),
}

/// Fully opaque white, the pre-normalization canvas fill.
pub const OPAQUE_WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Fully transparent, the thumbnail/icon canvas fill.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Decode an image from raw bytes, sniffing the format.
pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    image::load_from_memory(bytes).map_err(ImagingError::Decode)
}

/// Encode as PNG into memory.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(ImagingError::Encode)?;
    Ok(buffer.into_inner())
}

/// Write an RGBA canvas to disk as PNG.
pub fn save_png(img: &RgbaImage, path: &Path) -> Result<(), ImagingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(ImagingError::Encode)?;
    std::fs::write(path, buffer.into_inner())?;
    Ok(())
}

/// Shrink the image to fit inside `bounds` (never upscaling), then paste it
/// centered on a canvas of exactly `bounds`, filled with `fill`.
pub fn fit_and_pad(img: &DynamicImage, bounds: (u32, u32), fill: Rgba<u8>) -> RgbaImage {
    let source_dims = (img.width(), img.height());
    let target_dims = fit_within(source_dims, bounds);

    let content = if target_dims == source_dims {
        img.to_rgba8()
    } else {
        img.resize_exact(target_dims.0, target_dims.1, FilterType::Lanczos3)
            .to_rgba8()
    };

    let mut canvas = RgbaImage::from_pixel(bounds.0, bounds.1, fill);
    let (x, y) = center_offset(target_dims, bounds);
    image::imageops::overlay(&mut canvas, &content, x, y);
    canvas
}

/// Bound the cost of background removal: images larger than `bounds` in
/// either dimension are shrunk (aspect preserved, no cropping) and centered
/// on an opaque white canvas of exactly `bounds`. Smaller images pass
/// through untouched.
pub fn pre_normalize(img: DynamicImage, bounds: (u32, u32)) -> DynamicImage {
    if !exceeds((img.width(), img.height()), bounds) {
        return img;
    }
    DynamicImage::ImageRgba8(fit_and_pad(&img, bounds, OPAQUE_WHITE))
}
