//! Fill / fit / stretch scaling for stills and video frames.
//!
//! Everything works on 4-byte pixels without looking at channel order, so
//! the same code scales RGBA stills and BGRA video frames.

use anyhow::{Context, Result};
use common::ScaleMode;
use fast_image_resize as fr;
use image::{ImageBuffer, Rgba, RgbaImage};

/// Filter used for stills and thumbnails
pub const STILL_FILTER: fr::FilterType = fr::FilterType::Lanczos3;

/// Cheaper filter for per-frame video scaling
pub const FRAME_FILTER: fr::FilterType = fr::FilterType::Bilinear;

/// Largest size with the same aspect ratio that fits in `max_width`x`max_height`.
///
/// Never upscales and never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Scale `image` to the target size using `mode`
pub fn scale_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    mode: ScaleMode,
    filter: fr::FilterType,
) -> Result<RgbaImage> {
    if image.dimensions() == (target_width, target_height) {
        return Ok(image.clone());
    }

    match mode {
        ScaleMode::Fill => fill_image(image, target_width, target_height, filter),
        ScaleMode::Fit => fit_image(image, target_width, target_height, filter),
        ScaleMode::Stretch => resize(image, target_width, target_height, filter),
    }
}

/// Scale a raw 4-byte-per-pixel frame, keeping its channel order
pub fn scale_frame(
    data: &[u8],
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
    mode: ScaleMode,
) -> Result<Vec<u8>> {
    if (width, height) == (target_width, target_height) {
        return Ok(data.to_vec());
    }

    let frame: RgbaImage = ImageBuffer::from_raw(width, height, data.to_vec())
        .context("Frame data does not match its dimensions")?;
    let scaled = scale_image(&frame, target_width, target_height, mode, FRAME_FILTER)?;
    Ok(scaled.into_raw())
}

/// Scale to fill entire output (may crop)
fn fill_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: fr::FilterType,
) -> Result<RgbaImage> {
    let (img_width, img_height) = image.dimensions();
    let target_ratio = target_width as f32 / target_height as f32;
    let img_ratio = img_width as f32 / img_height as f32;

    let (scale_width, scale_height) = if target_ratio > img_ratio {
        let scale = target_width as f32 / img_width as f32;
        (target_width, ((img_height as f32 * scale) as u32).max(target_height))
    } else {
        let scale = target_height as f32 / img_height as f32;
        (((img_width as f32 * scale) as u32).max(target_width), target_height)
    };

    let resized = resize(image, scale_width, scale_height, filter)?;
    if scale_width == target_width && scale_height == target_height {
        return Ok(resized);
    }

    let x_offset = (scale_width - target_width) / 2;
    let y_offset = (scale_height - target_height) / 2;
    Ok(
        image::imageops::crop_imm(&resized, x_offset, y_offset, target_width, target_height)
            .to_image(),
    )
}

/// Scale to fit within output, letterboxed on black
fn fit_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: fr::FilterType,
) -> Result<RgbaImage> {
    let (img_width, img_height) = image.dimensions();
    let target_ratio = target_width as f32 / target_height as f32;
    let img_ratio = img_width as f32 / img_height as f32;

    let (scale_width, scale_height) = if target_ratio > img_ratio {
        let scale = target_height as f32 / img_height as f32;
        (((img_width as f32 * scale) as u32).clamp(1, target_width), target_height)
    } else {
        let scale = target_width as f32 / img_width as f32;
        (target_width, ((img_height as f32 * scale) as u32).clamp(1, target_height))
    };

    log::trace!(
        "Fit {}x{} into {}x{} as {}x{}",
        img_width,
        img_height,
        target_width,
        target_height,
        scale_width,
        scale_height
    );

    let resized = resize(image, scale_width, scale_height, filter)?;

    let mut output = ImageBuffer::from_pixel(target_width, target_height, Rgba([0, 0, 0, 255]));
    let x_offset = (target_width - scale_width) / 2;
    let y_offset = (target_height - scale_height) / 2;
    image::imageops::overlay(&mut output, &resized, x_offset as i64, y_offset as i64);

    Ok(output)
}

/// Resize with fast_image_resize
pub fn resize(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: fr::FilterType,
) -> Result<RgbaImage> {
    let (src_width, src_height) = image.dimensions();
    if (src_width, src_height) == (target_width, target_height) {
        return Ok(image.clone());
    }

    let src = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        image.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .context("Failed to create source image")?;

    let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter)),
        )
        .context("Failed to resize image")?;

    ImageBuffer::from_raw(target_width, target_height, dst.into_vec())
        .context("Failed to create output image buffer")
}

/// Convert RGBA to ARGB8888 as laid out in memory on little-endian (B, G, R, A)
pub fn rgba_to_argb8888(rgba: &RgbaImage) -> Vec<u8> {
    let mut argb = Vec::with_capacity(rgba.len());
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        argb.extend_from_slice(&[b, g, r, a]);
    }
    argb
}
