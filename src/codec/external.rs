//! External transcoder codec
//!
//! Arbitrary containers are decoded and encoded by a transcoder process
//! (ffmpeg by default). Raw interleaved pixels travel over the child's
//! stdout (decode) or stdin (encode) with no framing; the declared pixel
//! format and dimensions are passed on the command line.
//!
//! Every call runs under a timeout. Children are killed when their handle
//! is dropped, so no error path leaves a process behind. No runtime is held
//! between calls: inside a tokio runtime the call is driven on it, outside
//! one a short-lived current-thread runtime is built.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

use super::{Codec, DecodeRequest};
use crate::config::CodecConfig;
use crate::raw_image::{ImageError, RawImage};

/// Values substituted into argument templates
struct Substitutions<'a> {
    input: Option<&'a Path>,
    output: Option<&'a Path>,
    width: usize,
    height: usize,
    format: &'static str,
}

impl Substitutions<'_> {
    fn expand(&self, template: &[String]) -> Vec<OsString> {
        template
            .iter()
            .map(|arg| match (arg.as_str(), self.input, self.output) {
                // Bare paths are passed through so non-UTF-8 names survive
                ("{input}", Some(input), _) => input.as_os_str().to_os_string(),
                ("{output}", _, Some(output)) => output.as_os_str().to_os_string(),
                _ => OsString::from(self.replace(arg)),
            })
            .collect()
    }

    fn replace(&self, arg: &str) -> String {
        let mut out = arg
            .replace("{width}", &self.width.to_string())
            .replace("{height}", &self.height.to_string())
            .replace("{format}", self.format);
        if let Some(input) = self.input {
            out = out.replace("{input}", &input.to_string_lossy());
        }
        if let Some(output) = self.output {
            out = out.replace("{output}", &output.to_string_lossy());
        }
        out
    }
}

/// Codec that shells out to a transcoder process
///
/// The blocking [`Codec`] methods work with or without a surrounding tokio
/// runtime. Async callers can use [`ExternalCodec::decode_async`] and
/// [`ExternalCodec::encode_async`] directly.
#[derive(Debug, Clone)]
pub struct ExternalCodec {
    program: String,
    decode_args: Vec<String>,
    encode_args: Vec<String>,
    timeout: Duration,
}

impl ExternalCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            program: config.program.clone(),
            decode_args: config.decode_args.clone(),
            encode_args: config.encode_args.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Locate the transcoder binary on PATH (or check an explicit path)
    fn resolve_program(&self) -> Result<PathBuf, ImageError> {
        which::which(&self.program).map_err(|e| ImageError::TranscoderNotFound {
            program: self.program.clone(),
            reason: e.to_string(),
        })
    }

    fn timed_out(&self, path: &Path) -> ImageError {
        ImageError::Timeout {
            path: path.to_path_buf(),
            timeout: self.timeout,
        }
    }

    /// Decode `path` into raw pixels of the requested size and format
    pub async fn decode_async(
        &self,
        path: &Path,
        request: &DecodeRequest,
    ) -> Result<RawImage, ImageError> {
        let (width, height) = request
            .dimensions()
            .ok_or_else(|| ImageError::MissingDimensions {
                path: path.to_path_buf(),
            })?;
        let format = request.format;
        let expected = format
            .frame_size(width, height)
            .ok_or(ImageError::TooLarge { width, height })?;

        let program = self.resolve_program()?;
        let args = Substitutions {
            input: Some(path),
            output: None,
            width,
            height,
            format: format.name(),
        }
        .expand(&self.decode_args);

        info!(
            "Decoding {:?} with {} to {}x{} {}",
            path, self.program, width, height, format
        );
        debug!("Transcoder arguments: {:?}", args);

        let spawned = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = spawned.map_err(|source| ImageError::Spawn { program, source })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // One byte past the frame is enough to detect an overrun
        let limit = (expected as u64).saturating_add(1);
        let run = async {
            let (pixels, stderr) = tokio::try_join!(
                read_stream(stdout, limit, expected),
                read_stream(stderr, u64::MAX, 0),
            )?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((pixels, status, stderr))
        };

        let (pixels, status, stderr) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| self.timed_out(path))?
            .map_err(|source| ImageError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if pixels.len() > expected {
            return Err(ImageError::ByteCount {
                path: path.to_path_buf(),
                expected,
                actual: pixels.len(),
            });
        }

        if !status.success() {
            return Err(ImageError::Transcoder {
                path: path.to_path_buf(),
                status,
                stderr: diagnostics(&stderr),
            });
        }

        if pixels.len() < expected {
            return Err(ImageError::ByteCount {
                path: path.to_path_buf(),
                expected,
                actual: pixels.len(),
            });
        }

        RawImage::new(pixels, width, height, format)
    }

    /// Encode `image` into `path`, declaring its own format and size
    pub async fn encode_async(&self, image: &RawImage, path: &Path) -> Result<(), ImageError> {
        let program = self.resolve_program()?;
        let args = Substitutions {
            input: None,
            output: Some(path),
            width: image.width(),
            height: image.height(),
            format: image.format().name(),
        }
        .expand(&self.encode_args);

        info!(
            "Encoding {}x{} {} to {:?} with {}",
            image.width(),
            image.height(),
            image.format(),
            path,
            self.program
        );
        debug!("Transcoder arguments: {:?}", args);

        let spawned = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = spawned.map_err(|source| ImageError::Spawn { program, source })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let run = async {
            // A write error (e.g. broken pipe) is reported after the exit status
            let (written, stderr) = tokio::join!(
                write_stream(stdin, image.data()),
                read_stream(stderr, u64::MAX, 0),
            );
            let stderr = stderr?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((written, status, stderr))
        };

        let (written, status, stderr) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| self.timed_out(path))?
            .map_err(|source| ImageError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !status.success() {
            return Err(ImageError::Transcoder {
                path: path.to_path_buf(),
                status,
                stderr: diagnostics(&stderr),
            });
        }

        written.map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Drive a subprocess future to completion from blocking code
fn block_on<F>(future: F) -> Result<F::Output, ImageError>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        // A current-thread runtime cannot block in place
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| block_on_private(future))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        }),
        Err(_) => block_on_private(future),
    }
}

/// Run on a short-lived runtime owned by the calling thread
fn block_on_private<F: Future>(future: F) -> Result<F::Output, ImageError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ImageError::Runtime)?;
    Ok(runtime.block_on(future))
}

/// Read a child stream to its end, stopping after `limit` bytes
async fn read_stream<R>(stream: Option<R>, limit: u64, capacity: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(capacity);
    if let Some(stream) = stream {
        stream.take(limit).read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Write all of `data` into a child stream, then close it
async fn write_stream<W>(stream: Option<W>, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if let Some(mut stream) = stream {
        stream.write_all(data).await?;
        stream.shutdown().await?;
    }
    Ok(())
}

fn diagnostics(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).trim().to_string()
}

impl Codec for ExternalCodec {
    fn name(&self) -> &'static str {
        "external"
    }

    fn decode(&self, path: &Path, request: &DecodeRequest) -> Result<RawImage, ImageError> {
        block_on(self.decode_async(path, request))?
    }

    fn encode(&self, image: &RawImage, path: &Path) -> Result<(), ImageError> {
        block_on(self.encode_async(image, path))?
    }
}
