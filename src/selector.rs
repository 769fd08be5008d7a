//! Reduction of a scored candidate set to an evenly distributed,
//! quality-ranked subset.
//!
//! Candidates are split into contiguous temporal groups, the selection
//! budget is split into per-group quotas with the same exact-sum allocator,
//! and each group contributes its sharpest survivors. Even temporal coverage
//! comes from the grouping, not from the scores.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Outcome, PipelineError};
use crate::scoring::{list_frames, motion_filter, score_frames, CandidateFrame, ScoringConfig};

/// Grouping controls for a selection run. Immutable; passed into each call.
#[derive(Debug, Clone, Default)]
pub struct SelectionConfig {
    /// Explicit group count; derived from the target and `scalar` when
    /// omitted.
    pub group_count: Option<usize>,
    /// Granularity control: `group_count = max(1, target / 2^(scalar-1))`.
    /// Larger values produce fewer, coarser groups.
    pub scalar: u32,
}

/// Selection budget, either absolute or relative to the candidate total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSpec {
    Count(usize),
    Percent(f32),
}

impl TargetSpec {
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            TargetSpec::Count(count) => count,
            TargetSpec::Percent(percent) => (total as f32 * (percent / 100.0)) as usize,
        }
    }
}

/// Splits `total` into `groups` non-negative integers that sum exactly to
/// `total`, each within 1 of the ideal `total / groups`.
///
/// Running-remainder accumulation, kept in integer arithmetic (remainder in
/// units of `1/groups`) so the exact-sum invariant cannot be lost to float
/// drift on long inputs.
pub fn distribute_evenly(total: usize, groups: usize) -> Vec<usize> {
    if groups == 0 {
        return Vec::new();
    }

    let base = total / groups;
    let fraction = total % groups;
    let mut accumulated = 0usize;
    let mut distribution = vec![base; groups];
    for slot in distribution.iter_mut() {
        accumulated += fraction;
        while accumulated >= groups {
            *slot += 1;
            accumulated -= groups;
        }
    }
    distribution
}

fn derived_group_count(target_count: usize, scalar: u32) -> usize {
    // A scalar beyond the bit width degrades to a single group instead of
    // overflowing the shift.
    let shift = scalar.max(1) - 1;
    target_count.checked_shr(shift).unwrap_or(0).max(1)
}

/// Selects the top frames per temporal group, by descending
/// `(sharpness, motion)`.
///
/// A quota larger than its group keeps the whole group, so the kept set may
/// be smaller than `target_count`; that is expected, not an error. The
/// returned set preserves temporal order.
pub fn filter_sharpest(
    candidates: &[CandidateFrame],
    target_count: usize,
    config: &SelectionConfig,
) -> Vec<CandidateFrame> {
    let group_count = config
        .group_count
        .unwrap_or_else(|| derived_group_count(target_count, config.scalar));

    if !candidates.is_empty() {
        let ratio = target_count as f64 / candidates.len() as f64;
        log::info!(
            "requested {target_count} of {} candidates ({:.1}%) across {group_count} group{}",
            candidates.len(),
            ratio * 100.0,
            if group_count == 1 { "" } else { "s" }
        );
    }

    let group_sizes = distribute_evenly(candidates.len(), group_count);
    let quotas = distribute_evenly(target_count, group_count);

    let mut kept = Vec::with_capacity(target_count.min(candidates.len()));
    let mut offset = 0;
    for (size, quota) in group_sizes.into_iter().zip(quotas) {
        let mut group: Vec<&CandidateFrame> = candidates[offset..offset + size].iter().collect();
        group.sort_by(|a, b| {
            b.sharpness
                .total_cmp(&a.sharpness)
                .then(b.motion.total_cmp(&a.motion))
        });
        group.truncate(quota);
        group.sort_by_key(|c| c.index);
        kept.extend(group.into_iter().cloned());
        offset += size;
    }
    kept
}

/// Materializes a kept set on disk.
///
/// With a distinct output directory the kept files are copied and the source
/// is left untouched; otherwise every non-kept file is deleted from the
/// source in place. The kept set is fully known before the first removal, so
/// a failure during scoring can never leave a partially deleted directory.
pub fn materialize(
    input_dir: &Path,
    output_dir: Option<&Path>,
    all_frames: &[PathBuf],
    kept: &[CandidateFrame],
) -> Result<usize, PipelineError> {
    if let Some(output_dir) = output_dir {
        fs::create_dir_all(output_dir)?;
        if fs::canonicalize(output_dir)? != fs::canonicalize(input_dir)? {
            for frame in kept {
                let file_name = frame
                    .path
                    .file_name()
                    .ok_or_else(|| PipelineError::InvalidFramePath(frame.path.clone()))?;
                fs::copy(&frame.path, output_dir.join(file_name))?;
            }
            return Ok(kept.len());
        }
    }

    let retained: HashSet<&Path> = kept.iter().map(|c| c.path.as_path()).collect();
    for path in all_frames {
        if !retained.contains(path.as_path()) {
            fs::remove_file(path)?;
        }
    }
    Ok(kept.len())
}

/// Full selection pass over a frame directory: list, score, motion-filter,
/// select, materialize. Returns the retained frame count.
pub fn curate_directory(
    input_dir: &Path,
    output_dir: Option<&Path>,
    target: TargetSpec,
    scoring: &ScoringConfig,
    selection: &SelectionConfig,
) -> Result<Outcome<usize>, PipelineError> {
    let frames = list_frames(input_dir)?;
    let target_count = target.resolve(frames.len());

    let (scored, warnings) = score_frames(&frames, scoring).into_parts();
    let candidates = motion_filter(scored, scoring.motion_cutoff);
    let kept = filter_sharpest(&candidates, target_count, selection);

    let retained = materialize(input_dir, output_dir, &frames, &kept)?;
    log::info!("retained {retained} sharpest frames");
    Ok(Outcome::new(retained, warnings))
}
