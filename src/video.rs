//! Frame probing and adaptive extraction via the external FFmpeg tools.
//!
//! Both calls are blocking subprocess invocations; callers wanting a bound
//! on runtime should wrap them with a timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Outcome, PipelineError, ProbeError, Warning};
use crate::mask::{self, CropFactor};
use crate::settings::ToolPaths;

/// Good default candidate budget for a reconstruction dataset.
pub const DEFAULT_TARGET_FRAMES: usize = 300;

/// Parameters for one extraction run. Immutable; constructed once per video.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Candidate frames to aim for when subsampling.
    pub target_frame_count: usize,
    /// Downscale pyramid depth; level 0 is always produced.
    pub num_downscales: u32,
    /// Crop margins for the visibility mask.
    pub crop_factor: CropFactor,
    /// Radial mask radius as a fraction of the half-diagonal.
    pub percent_radius: f32,
    /// Abort on invalid mask parameters instead of degrading.
    pub strict_mask: bool,
    /// Treat a zero probed frame count as fatal instead of degrading.
    pub fail_on_empty_video: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            target_frame_count: DEFAULT_TARGET_FRAMES,
            num_downscales: 0,
            crop_factor: CropFactor::default(),
            percent_radius: 1.0,
            strict_mask: false,
            fail_on_empty_video: false,
        }
    }
}

/// Where an extraction run put its artifacts.
#[derive(Debug)]
pub struct ExtractionOutput {
    /// Frame directories, base resolution first.
    pub frame_dirs: Vec<PathBuf>,
    /// Visibility mask at base resolution, if one was needed.
    pub mask_path: Option<PathBuf>,
    /// Frames written at the base level.
    pub frames_extracted: usize,
}

/// Counts the decodable frames of a video by asking ffprobe to count
/// packets on the first video stream.
pub fn probe_frame_count(ffprobe: &Path, video: &Path) -> Result<u64, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=nb_read_packets",
            "-of",
            "csv=p=0",
        ])
        .arg(video)
        .output()
        .map_err(|source| ProbeError::Spawn {
            tool: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            tool: ffprobe.display().to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_first_integer(&stdout).ok_or_else(|| ProbeError::UnparseableOutput {
        output: stdout.trim().to_string(),
    })
}

fn parse_first_integer(text: &str) -> Option<u64> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|token| !token.is_empty())?
        .parse()
        .ok()
}

/// One planned ffmpeg invocation: filter graph plus per-level directories.
#[derive(Debug, PartialEq)]
struct ExtractionPlan {
    filtergraph: String,
    level_dirs: Vec<PathBuf>,
    spacing: u64,
}

impl ExtractionPlan {
    fn extracts_all(&self) -> bool {
        self.spacing <= 1
    }
}

/// Builds the filter graph for one run.
///
/// `spacing = floor(N / T)`; when it exceeds 1 a periodic `thumbnail` filter
/// keeps one representative frame per window and `setpts` renumbers the
/// survivors monotonically. Otherwise the target cannot be met by
/// subsampling and every frame passes through. The stream is then split into
/// one branch per pyramid level and each branch scaled by `1/2^i`.
fn plan_extraction(num_frames: u64, config: &ExtractionConfig, output_dir: &Path) -> ExtractionPlan {
    let target = config.target_frame_count.max(1) as u64;
    let spacing = num_frames / target;

    let select = if spacing > 1 {
        format!("thumbnail={spacing},setpts=N/TB,")
    } else {
        String::new()
    };

    let levels = config.num_downscales + 1;
    let split: String = (0..levels).map(|i| format!("[t{i}]")).collect();
    let scales: Vec<String> = (0..levels)
        .map(|i| {
            let factor = 1u32 << i;
            format!("[t{i}]scale=iw/{factor}:ih/{factor}[out{i}]")
        })
        .collect();
    let filtergraph = format!("{select}split={levels}{split};{}", scales.join(";"));

    let level_dirs = (0..levels)
        .map(|i| {
            if i == 0 {
                output_dir.to_path_buf()
            } else {
                PathBuf::from(format!("{}_{}", output_dir.display(), 1u32 << i))
            }
        })
        .collect();

    ExtractionPlan {
        filtergraph,
        level_dirs,
        spacing,
    }
}

/// Extracts an evenly time-spaced (or complete) frame sequence at every
/// pyramid level, then builds the visibility mask beside the base level.
///
/// A zero probed frame count and an unreachable subsampling target degrade
/// the run rather than failing it; producing no frames at all is fatal.
pub fn extract_frames(
    tools: &ToolPaths,
    video: &Path,
    output_dir: &Path,
    config: &ExtractionConfig,
) -> Result<Outcome<ExtractionOutput>, PipelineError> {
    let mut warnings = Vec::new();

    let num_frames = probe_frame_count(&tools.ffprobe, video)?;
    log::info!("video has {num_frames} frames: {}", video.display());
    if num_frames == 0 {
        if config.fail_on_empty_video {
            return Err(PipelineError::NoFrames(video.to_path_buf()));
        }
        warnings.push(Warning::ZeroFrameCount);
    }

    let plan = plan_extraction(num_frames, config, output_dir);
    if plan.extracts_all() {
        warnings.push(Warning::TargetUnreachable {
            target: config.target_frame_count,
            available: num_frames,
        });
    } else {
        log::info!(
            "extracting ~{} frames at intervals of {}",
            num_frames.div_ceil(plan.spacing),
            plan.spacing
        );
    }

    for dir in &plan.level_dirs {
        fs::create_dir_all(dir)?;
    }

    let mut cmd = Command::new(&tools.ffmpeg);
    cmd.arg("-y")
        .arg("-i")
        .arg(video)
        .args(["-vsync", "vfr", "-filter_complex"])
        .arg(&plan.filtergraph);
    for (i, dir) in plan.level_dirs.iter().enumerate() {
        cmd.arg("-map")
            .arg(format!("[out{i}]"))
            .arg(dir.join("frame_%05d.png"));
    }

    let output = cmd.output().map_err(PipelineError::Spawn)?;
    if !output.status.success() {
        return Err(PipelineError::Transcode {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let frames_extracted = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .count();
    if frames_extracted == 0 {
        return Err(PipelineError::NoFrames(output_dir.to_path_buf()));
    }

    let mask_outcome = mask::save_mask(
        output_dir,
        config.num_downscales,
        config.crop_factor,
        config.percent_radius,
        config.strict_mask,
    )?;
    let (mask_path, mask_warnings) = mask_outcome.into_parts();
    warnings.extend(mask_warnings);
    if let Some(path) = &mask_path {
        log::info!("saved mask to {}", path.display());
    }

    Ok(Outcome::new(
        ExtractionOutput {
            frame_dirs: plan.level_dirs,
            mask_path,
            frames_extracted,
        },
        warnings,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_integer_from_probe_output() {
        assert_eq!(parse_first_integer("1432\n"), Some(1432));
        assert_eq!(parse_first_integer("stream,1432,extra"), Some(1432));
        assert_eq!(parse_first_integer("0"), Some(0));
        assert_eq!(parse_first_integer(""), None);
        assert_eq!(parse_first_integer("N/A"), None);
    }

    #[test]
    fn subsampling_plan_uses_periodic_thumbnail_filter() {
        let config = ExtractionConfig::default();
        let plan = plan_extraction(3000, &config, Path::new("frames"));
        assert_eq!(plan.spacing, 10);
        assert!(!plan.extracts_all());
        assert_eq!(
            plan.filtergraph,
            "thumbnail=10,setpts=N/TB,split=1[t0];[t0]scale=iw/1:ih/1[out0]"
        );
        assert_eq!(plan.level_dirs, vec![PathBuf::from("frames")]);
    }

    #[test]
    fn short_video_plan_extracts_every_frame() {
        let config = ExtractionConfig::default();
        let plan = plan_extraction(200, &config, Path::new("frames"));
        assert_eq!(plan.spacing, 0);
        assert!(plan.extracts_all());
        assert_eq!(plan.filtergraph, "split=1[t0];[t0]scale=iw/1:ih/1[out0]");
    }

    #[test]
    fn spacing_of_exactly_one_also_extracts_every_frame() {
        let config = ExtractionConfig::default();
        let plan = plan_extraction(599, &config, Path::new("frames"));
        assert_eq!(plan.spacing, 1);
        assert!(plan.extracts_all());
    }

    #[test]
    fn pyramid_plan_splits_and_scales_every_level() {
        let config = ExtractionConfig {
            num_downscales: 2,
            ..ExtractionConfig::default()
        };
        let plan = plan_extraction(3000, &config, Path::new("out/images"));
        assert_eq!(
            plan.filtergraph,
            "thumbnail=10,setpts=N/TB,split=3[t0][t1][t2];\
             [t0]scale=iw/1:ih/1[out0];[t1]scale=iw/2:ih/2[out1];[t2]scale=iw/4:ih/4[out2]"
        );
        assert_eq!(
            plan.level_dirs,
            vec![
                PathBuf::from("out/images"),
                PathBuf::from("out/images_2"),
                PathBuf::from("out/images_4"),
            ]
        );
    }
}
