//! Configuration management for fishmesh

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::lens::{AspectScale, FishLensDescriptor, LensRotation, MeshMode};
use crate::mesh::MeshError;
use crate::projection::DEFAULT_CONE_TOLERANCE;

/// A 2D point in UV space (0.0 to 1.0 spans the source texture)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert to pixel coordinates
    pub fn to_pixels(&self, width: usize, height: usize) -> (f64, f64) {
        (self.x * width as f64, self.y * height as f64)
    }
}

/// Mesh resolution and edge handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    pub x_steps: usize,
    pub y_steps: usize,
    /// Slack past the fisheye circle edge before a sample is dropped
    #[serde(default = "default_cone_tolerance")]
    pub cone_tolerance: f64,
}

fn default_cone_tolerance() -> f64 {
    DEFAULT_CONE_TOLERANCE
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            x_steps: 250,
            y_steps: 250,
            cone_tolerance: DEFAULT_CONE_TOLERANCE,
        }
    }
}

/// One lens, with angles in degrees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LensConfig {
    pub field_of_view_deg: f64,
    #[serde(default)]
    pub pitch_deg: f64,
    #[serde(default)]
    pub yaw_deg: f64,
    #[serde(default)]
    pub roll_deg: f64,
    pub center: Point,
    #[serde(default)]
    pub aspect_scale: AspectScale,
}

impl Default for LensConfig {
    fn default() -> Self {
        // A single 220 degree circular fisheye filling the frame
        Self {
            field_of_view_deg: 220.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            roll_deg: 0.0,
            center: Point::new(0.5, 0.5),
            aspect_scale: AspectScale::default(),
        }
    }
}

impl LensConfig {
    /// Front and back hemispheres packed side by side in one frame
    pub fn dual_pair() -> [LensConfig; 2] {
        let front = LensConfig {
            field_of_view_deg: 180.0,
            center: Point::new(0.25, 0.5),
            aspect_scale: AspectScale::new(0.5, 1.0),
            ..Default::default()
        };
        let back = LensConfig {
            roll_deg: 180.0,
            center: Point::new(0.75, 0.5),
            ..front.clone()
        };
        [front, back]
    }

    pub fn to_descriptor(&self) -> FishLensDescriptor {
        FishLensDescriptor::new(
            self.center,
            LensRotation::new(
                self.pitch_deg.to_radians(),
                self.yaw_deg.to_radians(),
                self.roll_deg.to_radians(),
            ),
            self.field_of_view_deg.to_radians(),
            self.aspect_scale,
        )
    }
}

/// How `.bmp` paths are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BmpBackend {
    /// Parse and write BMP in-process
    #[default]
    Builtin,
    /// Treat BMP like any other container
    External,
}

/// External transcoder settings
///
/// Argument templates may use `{input}`, `{output}`, `{width}`, `{height}`
/// and `{format}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodecConfig {
    pub program: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub bmp: BmpBackend,
    #[serde(default = "default_decode_args")]
    pub decode_args: Vec<String>,
    #[serde(default = "default_encode_args")]
    pub encode_args: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_decode_args() -> Vec<String> {
    [
        "-v", "error", "-nostdin", "-i", "{input}", "-frames:v", "1",
        "-vf", "scale={width}:{height}", "-f", "rawvideo", "-pix_fmt", "{format}", "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_encode_args() -> Vec<String> {
    [
        "-v", "error", "-f", "rawvideo", "-pix_fmt", "{format}", "-s", "{width}x{height}",
        "-i", "pipe:0", "-y", "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout_ms: default_timeout_ms(),
            bmp: BmpBackend::default(),
            decode_args: default_decode_args(),
            encode_args: default_encode_args(),
        }
    }
}

/// Software render output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderConfig {
    pub width: usize,
    pub height: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub mesh: MeshConfig,

    #[serde(default = "default_lenses")]
    pub lenses: Vec<LensConfig>,

    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

fn default_lenses() -> Vec<LensConfig> {
    vec![LensConfig::default()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mesh: MeshConfig::default(),
            lenses: default_lenses(),
            codec: CodecConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration for a side-by-side dual fisheye source
    pub fn dual_fisheye() -> Self {
        Self {
            lenses: LensConfig::dual_pair().to_vec(),
            ..Default::default()
        }
    }

    /// Lens layout described by the `lenses` list
    pub fn mesh_mode(&self) -> Result<MeshMode, MeshError> {
        let descriptors: Vec<FishLensDescriptor> =
            self.lenses.iter().map(LensConfig::to_descriptor).collect();
        let mode = MeshMode::from_lenses(&descriptors)?;
        mode.validate()?;
        Ok(mode)
    }

    /// Read and parse an existing configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config in {:?}", path))
    }

    fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.mesh_mode().context("Invalid lens layout")?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            return Ok(config);
        }

        let config = Self::load(path)?;
        tracing::info!(
            "Loaded configuration from {:?} ({} lens(es), {}x{} mesh)",
            path,
            config.lenses.len(),
            config.mesh.x_steps,
            config.mesh.y_steps
        );
        Ok(config)
    }

    /// Write the configuration as TOML, creating missing directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {:?}", dir))?,
            _ => {}
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::debug!("Saved configuration to {:?}", path);
        Ok(())
    }
}
