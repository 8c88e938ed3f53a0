//! fishmesh - fisheye to panorama projection meshes
//!
//! Generates tessellated meshes whose UVs unwrap one or two fisheye images
//! into an equirectangular panorama, and moves raw pixel buffers in and out
//! of image files through built-in or external codecs.

pub mod codec;
pub mod config;
pub mod lens;
pub mod mesh;
pub mod projection;
pub mod raw_image;
pub mod remap;

pub use codec::{BmpCodec, Codec, CodecRegistry, DecodeRequest, ExternalCodec};
pub use config::{Config, Point};
pub use lens::{AspectScale, FishLensDescriptor, LensRotation, MeshMode};
pub use mesh::{generate, MeshError, MeshGrid};
pub use projection::{FisheyeProjector, DEFAULT_CONE_TOLERANCE, SENTINEL_UV};
pub use raw_image::{ImageError, PixelFormat, RawImage};
