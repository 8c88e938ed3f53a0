//! Raw interleaved pixel buffers
//!
//! A [`RawImage`] is a tightly packed, 8-bit interleaved pixel buffer with
//! its dimensions and pixel format. It is filled by a [`Codec`] (built-in
//! BMP or an external transcoder process) or wrapped around caller bytes,
//! e.g. a framebuffer readback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::codec::{BmpCodec, Codec, DecodeRequest};

/// Errors raised while producing or consuming a [`RawImage`]
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pixel buffer holds {actual} bytes but {width}x{height} {format} needs {expected}")]
    BufferSize {
        width: usize,
        height: usize,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("{width}x{height} image is too large to address")]
    TooLarge { width: usize, height: usize },
    #[error("cannot reinterpret {from} data as {to}: pixel sizes differ")]
    FormatMismatch { from: PixelFormat, to: PixelFormat },
    #[error("decoding {path:?} needs explicit width and height")]
    MissingDimensions { path: PathBuf },
    #[error("transcoder {program:?} not found: {reason}")]
    TranscoderNotFound { program: String, reason: String },
    #[error("failed to spawn transcoder {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transcoder for {path:?} timed out after {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("transcoder for {path:?} exited with {status}: {stderr}")]
    Transcoder {
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("transcoder produced {actual} bytes for {path:?}, expected {expected}")]
    ByteCount {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("failed to start subprocess runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// Supported interleaved pixel formats, named after the transcoder tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
    Rgba,
    Gray,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Gray => 1,
        }
    }

    /// Tag understood by the external transcoder
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Gray => "gray",
        }
    }

    /// Byte size of a `width` x `height` frame, `None` on overflow
    pub fn frame_size(&self, width: usize, height: usize) -> Option<usize> {
        width
            .checked_mul(height)?
            .checked_mul(self.bytes_per_pixel())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" => Ok(PixelFormat::Rgb24),
            "bgr24" => Ok(PixelFormat::Bgr24),
            "rgba" => Ok(PixelFormat::Rgba),
            "gray" => Ok(PixelFormat::Gray),
            other => Err(format!("unknown pixel format '{}'", other)),
        }
    }
}

/// Immutable pixel buffer with dimensions and format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
    format: PixelFormat,
}

impl RawImage {
    /// Wrap caller-supplied pixels, checking the buffer size
    pub fn new(
        pixels: Vec<u8>,
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        let expected = format
            .frame_size(width, height)
            .ok_or(ImageError::TooLarge { width, height })?;

        if pixels.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                format,
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            pixels,
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row, without padding
    pub fn stride(&self) -> usize {
        self.width * self.format.bytes_per_pixel()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.pixels
    }

    /// Read a BMP file with the built-in parser
    pub fn load_from_bmp(path: &Path) -> Result<Self, ImageError> {
        BmpCodec.decode(path, &DecodeRequest::default())
    }

    /// Decode any container to 8-bit RGB at the given size
    pub fn load_from_file(
        path: &Path,
        width: usize,
        height: usize,
        codec: &dyn Codec,
    ) -> Result<Self, ImageError> {
        codec.decode(path, &DecodeRequest::new(width, height, PixelFormat::Rgb24))
    }

    /// Encode the buffer with its own pixel format
    pub fn save_to_file(&self, path: &Path, codec: &dyn Codec) -> Result<(), ImageError> {
        codec.encode(self, path)
    }

    /// Encode the buffer, declaring its bytes as `format`
    pub fn save_with_format(
        &self,
        format: PixelFormat,
        path: &Path,
        codec: &dyn Codec,
    ) -> Result<(), ImageError> {
        if format == self.format {
            return codec.encode(self, path);
        }
        codec.encode(&self.clone().reinterpret(format)?, path)
    }

    /// Relabel the pixel format without touching the bytes
    pub fn reinterpret(self, format: PixelFormat) -> Result<Self, ImageError> {
        if format.bytes_per_pixel() != self.format.bytes_per_pixel() {
            return Err(ImageError::FormatMismatch {
                from: self.format,
                to: format,
            });
        }
        Ok(Self { format, ..self })
    }

    /// Same pixels with the row order reversed
    pub fn flip_rows(&self) -> Self {
        let stride = self.stride();
        let pixels = if stride == 0 {
            Vec::new()
        } else {
            self.pixels.chunks_exact(stride).rev().flatten().copied().collect()
        };

        Self {
            pixels,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Swap red and blue channels of an RGB24/BGR24 image
    pub fn swap_red_blue(&self) -> Result<Self, ImageError> {
        let format = match self.format {
            PixelFormat::Rgb24 => PixelFormat::Bgr24,
            PixelFormat::Bgr24 => PixelFormat::Rgb24,
            other => {
                return Err(ImageError::FormatMismatch {
                    from: other,
                    to: PixelFormat::Bgr24,
                })
            }
        };

        Ok(Self {
            pixels: rgb_to_bgr(&self.pixels),
            width: self.width,
            height: self.height,
            format,
        })
    }
}

/// Convert RGB24 to BGR24 (and back)
pub(crate) fn rgb_to_bgr(rgb: &[u8]) -> Vec<u8> {
    let mut bgr = Vec::with_capacity(rgb.len());
    for chunk in rgb.chunks_exact(3) {
        bgr.push(chunk[2]);
        bgr.push(chunk[1]);
        bgr.push(chunk[0]);
    }
    bgr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_size() {
        let image = RawImage::new(vec![0; 12], 2, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(image.width(), 2);
        assert_eq!(image.height(), 2);
        assert_eq!(image.stride(), 6);
        assert_eq!(image.data().len(), 12);

        let err = RawImage::new(vec![0; 11], 2, 2, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(
            err,
            ImageError::BufferSize {
                expected: 12,
                actual: 11,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_size_overflow() {
        assert_eq!(PixelFormat::Rgba.frame_size(4, 4), Some(64));
        assert_eq!(PixelFormat::Rgb24.frame_size(usize::MAX, 2), None);
        assert!(matches!(
            RawImage::new(Vec::new(), usize::MAX, 2, PixelFormat::Gray),
            Err(ImageError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_format_tags() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba,
            PixelFormat::Gray,
        ] {
            assert_eq!(format.name().parse::<PixelFormat>().unwrap(), format);
        }
        assert_eq!("RGB24".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb24);
        assert!("yuv420p".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_rgb_to_bgr() {
        let rgb = vec![1, 2, 3, 4, 5, 6];
        let bgr = rgb_to_bgr(&rgb);
        assert_eq!(bgr, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_swap_red_blue() {
        let image = RawImage::new(vec![10, 20, 30], 1, 1, PixelFormat::Rgb24).unwrap();
        let swapped = image.swap_red_blue().unwrap();
        assert_eq!(swapped.format(), PixelFormat::Bgr24);
        assert_eq!(swapped.data(), &[30, 20, 10]);

        let gray = RawImage::new(vec![7], 1, 1, PixelFormat::Gray).unwrap();
        assert!(gray.swap_red_blue().is_err());
    }

    #[test]
    fn test_flip_rows() {
        let image = RawImage::new(vec![1, 2, 3, 4], 2, 2, PixelFormat::Gray).unwrap();
        assert_eq!(image.flip_rows().data(), &[3, 4, 1, 2]);
        assert_eq!(image.flip_rows().flip_rows(), image);

        let empty = RawImage::new(Vec::new(), 0, 3, PixelFormat::Rgb24).unwrap();
        assert_eq!(empty.flip_rows(), empty);
    }

    #[test]
    fn test_reinterpret() {
        let image = RawImage::new(vec![1, 2, 3], 1, 1, PixelFormat::Bgr24).unwrap();
        let relabeled = image.clone().reinterpret(PixelFormat::Rgb24).unwrap();
        assert_eq!(relabeled.format(), PixelFormat::Rgb24);
        assert_eq!(relabeled.data(), image.data());
        assert!(image.reinterpret(PixelFormat::Rgba).is_err());
    }
}
