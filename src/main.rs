//! fishmesh - fisheye to panorama projection tool
//!
//! Generates projection meshes for single and dual fisheye sources and
//! renders panoramas on the CPU using the same projection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fishmesh::codec::{CodecRegistry, DecodeRequest};
use fishmesh::config::Config;
use fishmesh::mesh;
use fishmesh::raw_image::PixelFormat;
use fishmesh::remap;

/// fishmesh - fisheye to panorama projection meshes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "fishmesh.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    InitConfig {
        /// Use the side-by-side dual fisheye preset
        #[arg(long)]
        dual: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate the projection mesh and write it as JSON
    Mesh {
        /// Output JSON path
        #[arg(short, long, default_value = "mesh.json")]
        output: PathBuf,

        /// Grid steps along x (overrides config)
        #[arg(long)]
        x_steps: Option<usize>,

        /// Grid steps along y (overrides config)
        #[arg(long)]
        y_steps: Option<usize>,
    },

    /// Render a panorama from a fisheye source on the CPU
    Render {
        /// Source image
        #[arg(short, long)]
        input: PathBuf,

        /// Decode width for externally decoded sources
        #[arg(long)]
        input_width: Option<usize>,

        /// Decode height for externally decoded sources
        #[arg(long)]
        input_height: Option<usize>,

        /// Destination image
        #[arg(short, long)]
        output: PathBuf,

        /// Output width (overrides config)
        #[arg(long)]
        width: Option<usize>,

        /// Output height (overrides config)
        #[arg(long)]
        height: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("fishmesh v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::InitConfig { dual, force } => init_config(&args.config, dual, force),
        Command::Mesh {
            output,
            x_steps,
            y_steps,
        } => {
            let config = Config::load_or_create(&args.config)?;
            write_mesh(&config, &output, x_steps, y_steps)
        }
        Command::Render {
            input,
            input_width,
            input_height,
            output,
            width,
            height,
        } => {
            let config = Config::load_or_create(&args.config)?;
            let request = DecodeRequest {
                width: input_width,
                height: input_height,
                format: PixelFormat::Rgb24,
            };
            render_panorama(&config, &input, request, &output, width, height)
        }
    }
}

fn init_config(path: &Path, dual: bool, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists, pass --force to overwrite", path);
    }

    let config = if dual {
        Config::dual_fisheye()
    } else {
        Config::default()
    };
    config.save(path)
}

fn write_mesh(
    config: &Config,
    output: &Path,
    x_steps: Option<usize>,
    y_steps: Option<usize>,
) -> Result<()> {
    let mode = config.mesh_mode().context("Invalid lens configuration")?;
    let x_steps = x_steps.unwrap_or(config.mesh.x_steps);
    let y_steps = y_steps.unwrap_or(config.mesh.y_steps);

    let grid = mesh::generate(&mode, x_steps, y_steps, config.mesh.cone_tolerance)
        .context("Failed to generate mesh")?;

    info!(
        "Mesh {}x{}: {} vertices, {} triangles",
        x_steps,
        y_steps,
        grid.vertex_count(),
        grid.triangle_count()
    );
    for lens in 0..grid.uv_sets().len() {
        info!(
            "Lens {}: {} of {} samples outside the cone",
            lens,
            grid.sentinel_count(lens),
            grid.vertex_count()
        );
    }

    let json = serde_json::to_string(&grid).context("Failed to serialize mesh")?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write mesh to {:?}", output))?;

    info!("Wrote mesh to {:?}", output);
    Ok(())
}

fn render_panorama(
    config: &Config,
    input: &Path,
    request: DecodeRequest,
    output: &Path,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<()> {
    let mode = config.mesh_mode().context("Invalid lens configuration")?;
    let codecs = CodecRegistry::new(&config.codec);

    let source = codecs
        .load_upright(input, &request)
        .with_context(|| format!("Failed to load source image {:?}", input))?;
    info!(
        "Source: {}x{} {}",
        source.width(),
        source.height(),
        source.format()
    );

    let width = width.unwrap_or(config.render.width);
    let height = height.unwrap_or(config.render.height);
    let frame = remap::render(&source, &mode, width, height, config.mesh.cone_tolerance)
        .context("Failed to render panorama")?;

    codecs
        .save(&frame, output)
        .with_context(|| format!("Failed to save panorama to {:?}", output))?;

    info!("Wrote {}x{} panorama to {:?}", width, height, output);
    Ok(())
}
