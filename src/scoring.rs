//! Per-candidate quality scoring over an extracted frame directory.
//!
//! Sharpness is a pure per-frame function and motion depends only on the
//! adjacent pair, so both passes fan out over the rayon pool. An unreadable
//! frame is skipped with a warning rather than aborting the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::GrayImage;
use rayon::prelude::*;

use crate::error::{Outcome, Warning};
use crate::features::{detect_features, motion_score, FeatureSet};
use crate::sharpness::variance_of_laplacian;

/// Motion scores at or below this are treated as a static/near-duplicate
/// frame and the candidate is dropped before any quota logic runs.
pub const MOTION_SCORE_CUTOFF: f64 = 0.2;

/// Fewer descriptor matches than this count as no evidence of motion.
pub const MIN_FEATURE_MATCHES: usize = 8;

/// Tunables for the scoring pass. Immutable; passed into each call.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Inclusive motion-score exclusion threshold.
    pub motion_cutoff: f64,
    /// Minimum descriptor matches for a motion score to count.
    pub min_matches: usize,
    /// FAST-9 corner detection threshold.
    pub fast_threshold: u8,
    /// Keypoint budget per frame, strongest first.
    pub max_keypoints: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            motion_cutoff: MOTION_SCORE_CUTOFF,
            min_matches: MIN_FEATURE_MATCHES,
            fast_threshold: 32,
            max_keypoints: 500,
        }
    }
}

/// A scored frame. Immutable once created; `index` is the temporal ordinal
/// from the extraction/listing order.
#[derive(Debug, Clone)]
pub struct CandidateFrame {
    pub index: usize,
    pub path: PathBuf,
    pub sharpness: f64,
    /// Directional score against the preceding frame; 0 for the first frame
    /// of the sequence.
    pub motion: f64,
}

/// Lists the frame files of a directory in temporal (filename) order.
///
/// Extraction names frames with a fixed-width zero-padded pattern, so
/// lexicographic order is temporal order.
pub fn list_frames(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    frames.sort();
    Ok(frames)
}

struct FrameMetrics {
    sharpness: f64,
    features: FeatureSet,
    max_dim: u32,
}

/// Scores every readable frame for sharpness and inter-frame motion.
///
/// Frames are scored only against their immediate predecessor in `paths`;
/// never across capture sequences. A pair whose predecessor was unreadable
/// scores motion 0, which the cutoff later drops.
pub fn score_frames(paths: &[PathBuf], config: &ScoringConfig) -> Outcome<Vec<CandidateFrame>> {
    log::info!("calculating quality scores for {} frames", paths.len());

    let metrics: Vec<Result<FrameMetrics, String>> = paths
        .par_iter()
        .map(|path| {
            let gray: GrayImage = image::open(path).map_err(|e| e.to_string())?.to_luma8();
            let (width, height) = gray.dimensions();
            Ok(FrameMetrics {
                sharpness: variance_of_laplacian(&gray),
                features: detect_features(&gray, config.fast_threshold, config.max_keypoints),
                max_dim: width.max(height),
            })
        })
        .collect();

    let motions: Vec<f64> = (0..metrics.len())
        .into_par_iter()
        .map(|i| {
            if i == 0 {
                return 0.0;
            }
            match (&metrics[i - 1], &metrics[i]) {
                (Ok(prev), Ok(curr)) => motion_score(
                    &prev.features,
                    &curr.features,
                    prev.max_dim.max(curr.max_dim),
                    config.min_matches,
                ),
                _ => 0.0,
            }
        })
        .collect();

    let mut warnings = Vec::new();
    let mut candidates = Vec::with_capacity(paths.len());
    for (index, (path, metric)) in paths.iter().zip(metrics).enumerate() {
        match metric {
            Ok(metric) => candidates.push(CandidateFrame {
                index,
                path: path.clone(),
                sharpness: metric.sharpness,
                motion: motions[index],
            }),
            Err(reason) => warnings.push(Warning::UnreadableFrame {
                path: path.clone(),
                reason,
            }),
        }
    }

    Outcome::new(candidates, warnings)
}

/// Drops candidates whose motion score is at or below the cutoff.
///
/// The first frame always scores 0 and is therefore always dropped; so is
/// any frame with too little feature evidence.
pub fn motion_filter(candidates: Vec<CandidateFrame>, cutoff: f64) -> Vec<CandidateFrame> {
    let before = candidates.len();
    let kept: Vec<CandidateFrame> = candidates
        .into_iter()
        .filter(|c| c.motion > cutoff)
        .collect();
    log::debug!(
        "motion filter kept {} of {} candidates (cutoff {cutoff})",
        kept.len(),
        before
    );
    kept
}
