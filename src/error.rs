use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Non-fatal conditions surfaced alongside a usable result.
///
/// The pipeline's policy is to keep going where it can: a zero-frame video,
/// an unreadable candidate, or out-of-range mask parameters degrade the run
/// instead of aborting it. Callers decide whether to escalate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("video reports zero decodable frames")]
    ZeroFrameCount,

    #[error("cannot satisfy target of {target} frames from {available}; extracting every frame")]
    TargetUnreachable { target: usize, available: u64 },

    #[error("crop margins must lie in [0, 1], got (top={top}, bottom={bottom}, left={left}, right={right})")]
    CropFactorOutOfRange {
        top: f32,
        bottom: f32,
        left: f32,
        right: f32,
    },

    #[error("circle mask radius must be positive, got {0}")]
    NonPositiveRadius(f32),

    #[error("skipping unreadable frame {}: {reason}", .path.display())]
    UnreadableFrame { path: PathBuf, reason: String },
}

/// Result of an operation that may have succeeded with reservations.
///
/// Fatal failures are plain `Err` values; this type only distinguishes a
/// clean success from a degraded one.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Degraded(T, Vec<Warning>),
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        if warnings.is_empty() {
            Outcome::Success(value)
        } else {
            Outcome::Degraded(value, warnings)
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(v) | Outcome::Degraded(v, _) => v,
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        match self {
            Outcome::Success(_) => &[],
            Outcome::Degraded(_, w) => w,
        }
    }

    pub fn into_parts(self) -> (T, Vec<Warning>) {
        match self {
            Outcome::Success(v) => (v, Vec::new()),
            Outcome::Degraded(v, w) => (v, w),
        }
    }

    pub fn into_value(self) -> T {
        self.into_parts().0
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(..))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Degraded(v, w) => Outcome::Degraded(f(v), w),
        }
    }

    /// Emits every warning through the `log` facade.
    pub fn log_warnings(&self) {
        for warning in self.warnings() {
            log::warn!("{warning}");
        }
    }
}

/// Failure to obtain a frame count from the external probe tool.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("no integer frame count in probe output: {output:?}")]
    UnparseableOutput { output: String },
}

/// Fatal pipeline failures. Everything recoverable travels as a [`Warning`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Transcode { status: ExitStatus, stderr: String },

    #[error("no frames found in {}", .0.display())]
    NoFrames(PathBuf),

    #[error("frame path has no file name: {}", .0.display())]
    InvalidFramePath(PathBuf),

    #[error("mask parameters rejected: {0}")]
    MaskParameters(Warning),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
