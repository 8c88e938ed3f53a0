//! Built-in BMP codec
//!
//! Only the fixed-offset fields of the 54-byte header are read. Pixel data
//! keeps BMP's stored order: rows run bottom to top and channels stay BGR,
//! so decoded images are tagged `bgr24`. Rows padded to four bytes are
//! unpadded when the declared image size says so.
//!
//! The encoder writes standard bottom-up files with padded rows.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::{Codec, DecodeRequest};
use crate::raw_image::{rgb_to_bgr, ImageError, PixelFormat, RawImage};

/// File header plus BITMAPINFOHEADER
pub const BMP_HEADER_SIZE: usize = 54;

const MAGIC: &[u8; 2] = b"BM";
const DATA_OFFSET_FIELD: usize = 0x0A;
const WIDTH_FIELD: usize = 0x12;
const HEIGHT_FIELD: usize = 0x16;
const IMAGE_SIZE_FIELD: usize = 0x22;

const INFO_HEADER_SIZE: u32 = 40;
const BITS_PER_PIXEL: u16 = 24;
/// 72 DPI
const PIXELS_PER_METER: u32 = 2835;

/// BMP reader and writer that needs no subprocess
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpCodec;

/// Header fields after defaults were applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BmpLayout {
    width: usize,
    height: usize,
    data_offset: usize,
    image_size: usize,
}

#[inline]
fn read_u32(header: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ])
}

/// Parse the header of a complete BMP file
fn parse_header(bytes: &[u8]) -> Result<BmpLayout, String> {
    if bytes.len() < BMP_HEADER_SIZE {
        return Err(format!(
            "header needs {} bytes, file has {}",
            BMP_HEADER_SIZE,
            bytes.len()
        ));
    }

    if &bytes[0..2] != MAGIC {
        return Err(format!(
            "bad magic {:#04x} {:#04x}, expected \"BM\"",
            bytes[0], bytes[1]
        ));
    }

    let width = read_u32(bytes, WIDTH_FIELD) as usize;
    let height = read_u32(bytes, HEIGHT_FIELD) as usize;
    let mut data_offset = read_u32(bytes, DATA_OFFSET_FIELD) as usize;
    let mut image_size = read_u32(bytes, IMAGE_SIZE_FIELD) as usize;

    if width == 0 || height == 0 {
        return Err(format!("empty image {}x{}", width, height));
    }

    // Some encoders leave these two fields zeroed
    if data_offset == 0 {
        data_offset = BMP_HEADER_SIZE;
    }
    if image_size == 0 {
        image_size = PixelFormat::Bgr24
            .frame_size(width, height)
            .ok_or_else(|| format!("dimensions {}x{} overflow", width, height))?;
    }

    Ok(BmpLayout {
        width,
        height,
        data_offset,
        image_size,
    })
}

/// Bytes per stored row of 24-bit pixels, padded to four bytes
fn padded_row(width: usize) -> Option<usize> {
    Some(width.checked_mul(3)?.checked_add(3)? & !3)
}

/// Split a BMP file into its layout and unpadded pixel rows
fn parse_bmp(bytes: &[u8]) -> Result<(BmpLayout, Vec<u8>), String> {
    let layout = parse_header(bytes)?;
    let overflow = || format!("dimensions {}x{} overflow", layout.width, layout.height);

    let end = layout
        .data_offset
        .checked_add(layout.image_size)
        .ok_or_else(|| "pixel data range overflows".to_string())?;
    let payload = bytes.get(layout.data_offset..end).ok_or_else(|| {
        format!(
            "truncated pixel data: {} bytes declared at offset {}, file has {}",
            layout.image_size,
            layout.data_offset,
            bytes.len()
        )
    })?;

    let expected = PixelFormat::Bgr24
        .frame_size(layout.width, layout.height)
        .ok_or_else(overflow)?;
    let row = layout.width * 3;
    if payload.len() == expected {
        return Ok((layout, payload.to_vec()));
    }

    let stride = padded_row(layout.width).ok_or_else(overflow)?;
    if stride.checked_mul(layout.height) == Some(payload.len()) {
        let pixels = payload
            .chunks_exact(stride)
            .flat_map(|line| &line[..row])
            .copied()
            .collect();
        return Ok((layout, pixels));
    }

    Err(format!(
        "pixel data is {} bytes, {}x{} BGR needs {} ({} with padded rows)",
        payload.len(),
        layout.width,
        layout.height,
        expected,
        stride.saturating_mul(layout.height)
    ))
}

/// Serialize top-down 24-bit BGR pixels as a bottom-up BMP
fn write_bmp(width: usize, height: usize, bgr: &[u8]) -> Result<Vec<u8>, String> {
    if width == 0 || height == 0 {
        return Err(format!("cannot write empty image {}x{}", width, height));
    }

    let too_large = || format!("{}x{} image is too large for BMP", width, height);
    let row = width * 3;
    let stride = padded_row(width).ok_or_else(too_large)?;
    let payload_len = stride.checked_mul(height).ok_or_else(too_large)?;
    let image_size = u32::try_from(payload_len).map_err(|_| too_large())?;
    let file_size = image_size
        .checked_add(BMP_HEADER_SIZE as u32)
        .ok_or_else(too_large)?;
    let width_field = u32::try_from(width).map_err(|_| too_large())?;
    let height_field = u32::try_from(height).map_err(|_| too_large())?;

    let mut out = Vec::with_capacity(BMP_HEADER_SIZE + payload_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&(BMP_HEADER_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&width_field.to_le_bytes());
    out.extend_from_slice(&height_field.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&BITS_PER_PIXEL.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&image_size.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&[0; 8]);
    debug_assert_eq!(out.len(), BMP_HEADER_SIZE);

    let padding = [0u8; 3];
    for line in bgr.chunks_exact(row).rev() {
        out.extend_from_slice(line);
        out.extend_from_slice(&padding[..stride - row]);
    }
    Ok(out)
}

impl Codec for BmpCodec {
    fn name(&self) -> &'static str {
        "bmp"
    }

    fn bottom_up(&self) -> bool {
        true
    }

    fn decode(&self, path: &Path, request: &DecodeRequest) -> Result<RawImage, ImageError> {
        let bytes = fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let (layout, payload) = parse_bmp(&bytes).map_err(|reason| ImageError::Format {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!(
            "Read BMP {:?}: {}x{}, {} bytes at offset {}",
            path, layout.width, layout.height, layout.image_size, layout.data_offset
        );

        // Size and format come from the file
        if let Some((width, height)) = request.dimensions() {
            if (width, height) != (layout.width, layout.height) {
                warn!(
                    "Ignoring requested size {}x{} for {:?}, the file is {}x{}",
                    width, height, path, layout.width, layout.height
                );
            }
        }
        if request.format != PixelFormat::Bgr24 {
            debug!(
                "{:?} decodes as bgr24, not the requested {}",
                path, request.format
            );
        }

        RawImage::new(
            payload,
            layout.width,
            layout.height,
            PixelFormat::Bgr24,
        )
    }

    fn encode(&self, image: &RawImage, path: &Path) -> Result<(), ImageError> {
        let format_error = |reason: String| ImageError::Format {
            path: path.to_path_buf(),
            reason,
        };

        let swizzled;
        let bgr = match image.format() {
            PixelFormat::Bgr24 => image.data(),
            PixelFormat::Rgb24 => {
                swizzled = rgb_to_bgr(image.data());
                &swizzled[..]
            }
            other => {
                return Err(format_error(format!(
                    "built-in BMP encoder writes 24-bit pixels only, got {}",
                    other
                )))
            }
        };

        let bytes = write_bmp(image.width(), image.height(), bgr).map_err(format_error)?;
        fs::write(path, bytes).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Wrote BMP {:?}: {}x{}", path, image.width(), image.height());
        Ok(())
    }
}
