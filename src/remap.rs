//! Software reference renderer
//!
//! Draws what the projection mesh draws, without a GPU: every output pixel
//! is mapped to the destination plane, projected into each lens and the
//! first lens that sees it is sampled with bilinear interpolation. Pixels no
//! lens can see are left black. This is how a frame can be produced and
//! saved from the command line.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::Point;
use crate::lens::MeshMode;
use crate::mesh::MeshError;
use crate::projection::FisheyeProjector;
use crate::raw_image::{ImageError, RawImage};

/// Errors from the reference renderer
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("cannot render {what} of size {width}x{height}")]
    EmptyImage {
        what: &'static str,
        width: usize,
        height: usize,
    },
}

/// Render `source` through the lens layout into a `width` x `height` frame
pub fn render(
    source: &RawImage,
    mode: &MeshMode,
    width: usize,
    height: usize,
    tolerance: f64,
) -> Result<RawImage, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::EmptyImage {
            what: "output",
            width,
            height,
        });
    }
    if source.width() == 0 || source.height() == 0 {
        return Err(RenderError::EmptyImage {
            what: "source",
            width: source.width(),
            height: source.height(),
        });
    }
    mode.validate()?;

    let projectors: Vec<FisheyeProjector> = mode
        .lenses()
        .into_iter()
        .map(|lens| FisheyeProjector::new(lens, tolerance))
        .collect();

    let format = source.format();
    let channels = format.bytes_per_pixel();
    let frame_size = format
        .frame_size(width, height)
        .ok_or(ImageError::TooLarge { width, height })?;
    let dst_stride = width * channels;

    info!(
        "Rendering {}x{} {} frame from {}x{} source with {} lens(es)",
        width,
        height,
        format,
        source.width(),
        source.height(),
        projectors.len()
    );

    let mut pixels = vec![0u8; frame_size];
    pixels
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(row, line)| {
            // Image rows run top to bottom, the plane's y axis points up
            let y = 1.0 - 2.0 * (row as f64 + 0.5) / height as f64;

            for col in 0..width {
                let x = -1.0 + 2.0 * (col as f64 + 0.5) / width as f64;

                let Some([u, v]) = projectors.iter().find_map(|p| p.project(x, y)) else {
                    continue;
                };

                let (sx, sy) = Point::new(u, v).to_pixels(source.width(), source.height());
                let pixel = bilinear_sample(source, sx - 0.5, sy - 0.5);

                let offset = col * channels;
                line[offset..offset + channels].copy_from_slice(&pixel[..channels]);
            }
        });

    debug!("Rendered {} bytes", pixels.len());
    Ok(RawImage::new(pixels, width, height, format)?)
}

/// Sample `image` at a pixel-space position, clamped to the image
///
/// Pixel centres sit at integer coordinates. Only the first
/// `bytes_per_pixel` entries of the result are meaningful.
#[inline]
fn bilinear_sample(image: &RawImage, x: f64, y: f64) -> [u8; 4] {
    let (width, height) = (image.width(), image.height());
    let channels = image.format().bytes_per_pixel();
    let data = image.data();
    let stride = image.stride();

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let (left, top) = (x.floor() as usize, y.floor() as usize);
    let right = (left + 1).min(width - 1);
    let bottom = (top + 1).min(height - 1);
    let (tx, ty) = (x - left as f64, y - top as f64);

    let texel = |col: usize, row: usize, c: usize| data[row * stride + col * channels + c] as f64;

    let mut out = [0u8; 4];
    for (c, value) in out.iter_mut().enumerate().take(channels) {
        let upper = texel(left, top, c) + (texel(right, top, c) - texel(left, top, c)) * tx;
        let lower = texel(left, bottom, c) + (texel(right, bottom, c) - texel(left, bottom, c)) * tx;
        *value = (upper + (lower - upper) * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}
