//! # Format Conversion Boundary
//!
//! The service accepts arbitrary audio containers (OGG, MP3, WAV, ...) but
//! the model consumes one format only: mono 16 kHz uncompressed WAV. The
//! conversion is delegated to an external tool behind the narrow
//! [`AudioConverter`] trait so the request handler never knows whether the
//! implementation shells out or decodes natively.
//!
//! The shipped implementation invokes the ffmpeg CLI as a subprocess. A
//! non-zero exit status is the converter's only failure signal for bad
//! input; its stderr is captured for the server log.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::process::Command;

/// Sample rate the recognizer expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Channel count the recognizer expects.
pub const TARGET_CHANNELS: u8 = 1;

/// Failure modes of the external converter.
#[derive(Debug)]
pub enum ConvertError {
    /// The converter binary could not be started at all
    Spawn(std::io::Error),

    /// The converter ran and reported failure via its exit status
    Failed {
        status: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Spawn(e) => write!(f, "failed to start converter: {}", e),
            ConvertError::Failed { status, stderr } => write!(
                f,
                "converter exited with status {:?}: {}",
                status,
                stderr.trim()
            ),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Narrow interface over the external format-conversion step.
///
/// Implementations write a mono 16 kHz WAV to `output` from whatever bytes
/// sit at `input`, or fail with diagnostics. Nothing else.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConvertError>;
}

/// Converter backed by the ffmpeg CLI.
pub struct FfmpegConverter {
    binary: String,
}

impl FfmpegConverter {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }

    /// Use a non-default binary path. Tests point this at /bin/false and
    /// friends to exercise failure handling without real media files.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let result = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ar", "16000"])
            .args(["-ac", "1"])
            .args(["-f", "wav"])
            .arg(output)
            .output()
            .await
            .map_err(ConvertError::Spawn)?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            return Err(ConvertError::Failed {
                status: result.status.code(),
                stderr,
            });
        }

        tracing::debug!(
            "Converted {:?} -> {:?} ({} kHz mono WAV)",
            input,
            output,
            TARGET_SAMPLE_RATE / 1000
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scratch::ScratchFile;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let converter = FfmpegConverter::with_binary("/nonexistent/ffmpeg");
        let input = ScratchFile::allocate("ogg");
        let output = ScratchFile::allocate("wav");
        std::fs::write(input.path(), b"not audio").unwrap();

        let err = converter
            .convert(input.path(), output.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_error() {
        // `false` exits 1 without reading its arguments
        let converter = FfmpegConverter::with_binary("false");
        let input = ScratchFile::allocate("ogg");
        let output = ScratchFile::allocate("wav");
        std::fs::write(input.path(), b"not audio").unwrap();

        let err = converter
            .convert(input.path(), output.path())
            .await
            .unwrap_err();
        match err {
            ConvertError::Failed { status, .. } => assert_eq!(status, Some(1)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_error_display_includes_stderr() {
        let err = ConvertError::Failed {
            status: Some(1),
            stderr: "Invalid data found when processing input\n".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("Invalid data found"));
        assert!(rendered.contains("status Some(1)"));
    }
}
