//! Image codecs
//!
//! Decoding and encoding go through the [`Codec`] trait. BMP has a built-in
//! parser; every other container is handed to an external transcoder
//! process that streams raw interleaved pixels over its standard I/O.

mod bmp;
mod external;

pub use bmp::{BmpCodec, BMP_HEADER_SIZE};
pub use external::ExternalCodec;

use std::path::Path;
use tracing::debug;

use crate::config::{BmpBackend, CodecConfig};
use crate::raw_image::{ImageError, PixelFormat, RawImage};

/// What the caller expects a decode to produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeRequest {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub format: PixelFormat,
}

impl DecodeRequest {
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            format,
        }
    }

    /// Both dimensions, if given
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.width.zip(self.height)
    }
}

/// Reads and writes [`RawImage`]s from and to files
pub trait Codec {
    fn name(&self) -> &'static str;

    /// Decode `path` into a [`RawImage`]
    ///
    /// Codecs that take dimensions and format from the file itself may not
    /// honour the request; the returned image carries what was decoded.
    fn decode(&self, path: &Path, request: &DecodeRequest) -> Result<RawImage, ImageError>;

    fn encode(&self, image: &RawImage, path: &Path) -> Result<(), ImageError>;

    /// Whether decoded rows come out bottom row first
    fn bottom_up(&self) -> bool {
        false
    }
}

/// Picks a codec by file extension
#[derive(Debug)]
pub struct CodecRegistry {
    bmp: BmpCodec,
    external: ExternalCodec,
    bmp_backend: BmpBackend,
}

impl CodecRegistry {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            bmp: BmpCodec,
            external: ExternalCodec::new(config),
            bmp_backend: config.bmp,
        }
    }

    /// Codec responsible for `path`
    pub fn codec_for(&self, path: &Path) -> &dyn Codec {
        let is_bmp = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("bmp"))
            .unwrap_or(false);

        let codec: &dyn Codec = if is_bmp && self.bmp_backend == BmpBackend::Builtin {
            &self.bmp
        } else {
            &self.external
        };
        debug!("Using {} codec for {:?}", codec.name(), path);
        codec
    }

    pub fn external(&self) -> &ExternalCodec {
        &self.external
    }

    /// Decode `path` with rows in stored order
    pub fn load(&self, path: &Path, request: &DecodeRequest) -> Result<RawImage, ImageError> {
        self.codec_for(path).decode(path, request)
    }

    /// Decode `path` with the top row first, whatever the codec stores
    pub fn load_upright(
        &self,
        path: &Path,
        request: &DecodeRequest,
    ) -> Result<RawImage, ImageError> {
        let codec = self.codec_for(path);
        let image = codec.decode(path, request)?;
        if codec.bottom_up() {
            debug!("Flipping {:?} to top-down row order", path);
            return Ok(image.flip_rows());
        }
        Ok(image)
    }

    pub fn save(&self, image: &RawImage, path: &Path) -> Result<(), ImageError> {
        self.codec_for(path).encode(image, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_by_extension() {
        let registry = CodecRegistry::new(&CodecConfig::default());
        assert_eq!(registry.codec_for(Path::new("pano.bmp")).name(), "bmp");
        assert_eq!(registry.codec_for(Path::new("PANO.BMP")).name(), "bmp");
        assert_eq!(registry.codec_for(Path::new("pano.jpg")).name(), "external");
        assert_eq!(registry.codec_for(Path::new("pano")).name(), "external");
    }

    #[test]
    fn test_bmp_routed_externally() {
        let config = CodecConfig {
            bmp: BmpBackend::External,
            ..Default::default()
        };
        let registry = CodecRegistry::new(&config);
        assert_eq!(registry.codec_for(Path::new("pano.bmp")).name(), "external");
    }

    #[test]
    fn test_bmp_round_trip_is_upright() {
        // 5x2 needs padded rows; top row red, bottom row blue
        let mut rgb = Vec::new();
        for _ in 0..5 {
            rgb.extend_from_slice(&[255, 0, 0]);
        }
        for _ in 0..5 {
            rgb.extend_from_slice(&[0, 0, 255]);
        }
        let image = RawImage::new(rgb, 5, 2, PixelFormat::Rgb24).unwrap();

        let registry = CodecRegistry::new(&CodecConfig::default());
        let path = std::env::temp_dir().join(format!("fishmesh-registry-{}.bmp", std::process::id()));
        registry.save(&image, &path).unwrap();
        let stored = registry.load(&path, &DecodeRequest::default()).unwrap();
        let upright = registry.load_upright(&path, &DecodeRequest::default()).unwrap();
        std::fs::remove_file(&path).ok();

        // Stored order starts with the bottom (blue) row, in BGR
        assert_eq!(&stored.data()[..3], &[255, 0, 0]);
        assert_eq!(upright.format(), PixelFormat::Bgr24);
        assert_eq!(upright.swap_red_blue().unwrap(), image);
    }

    #[tokio::test]
    async fn test_registry_lives_in_async_context() {
        let registry = CodecRegistry::new(&CodecConfig::default());
        assert_eq!(registry.external().program(), "ffmpeg");
        drop(registry);
    }

    #[test]
    fn test_request_dimensions() {
        assert_eq!(DecodeRequest::default().dimensions(), None);
        assert_eq!(
            DecodeRequest::new(4, 2, PixelFormat::Rgb24).dimensions(),
            Some((4, 2))
        );
    }
}
