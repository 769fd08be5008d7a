//! Adaptive frame extraction and selection for 3D reconstruction pipelines.
//!
//! Probes a source video, extracts a uniformly time-spaced candidate set at
//! a downscale pyramid with visibility masks, scores every candidate for
//! sharpness and inter-frame motion, and reduces the set to a target count
//! with even temporal coverage.

pub mod error;
pub mod features;
pub mod mask;
pub mod scoring;
pub mod selector;
pub mod settings;
pub mod sharpness;
pub mod video;

pub use error::{Outcome, PipelineError, ProbeError, Warning};
pub use mask::CropFactor;
pub use scoring::{CandidateFrame, ScoringConfig, MIN_FEATURE_MATCHES, MOTION_SCORE_CUTOFF};
pub use selector::{distribute_evenly, SelectionConfig, TargetSpec};
pub use settings::{ToolPaths, ToolSettings};
pub use video::{ExtractionConfig, ExtractionOutput, DEFAULT_TARGET_FRAMES};
