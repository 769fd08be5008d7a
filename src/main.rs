use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use frameprep::mask::CropFactor;
use frameprep::scoring::ScoringConfig;
use frameprep::selector::{curate_directory, SelectionConfig, TargetSpec};
use frameprep::settings::{ToolPaths, ToolSettings};
use frameprep::video::{extract_frames, probe_frame_count, ExtractionConfig, DEFAULT_TARGET_FRAMES};

#[derive(Parser)]
#[command(name = "frameprep", version, about = "Prepare video frames for 3D reconstruction")]
struct Cli {
    /// Worker threads for the scoring pool (defaults to all cores).
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Override the ffmpeg binary.
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Override the ffprobe binary.
    #[arg(long, global = true)]
    ffprobe: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the decodable frame count of a video.
    Probe { video: PathBuf },

    /// Extract evenly spaced candidate frames and visibility masks.
    Extract {
        video: PathBuf,
        #[command(flatten)]
        extract: ExtractArgs,
    },

    /// Reduce a frame directory to its sharpest, well-distributed subset.
    Select {
        input: PathBuf,
        #[command(flatten)]
        select: SelectArgs,
    },

    /// Extract then select: the full preparation pipeline.
    Run {
        video: PathBuf,
        #[command(flatten)]
        extract: ExtractArgs,
        #[command(flatten)]
        select: SelectArgs,
    },
}

#[derive(Args)]
struct ExtractArgs {
    /// Directory for base-resolution frames.
    #[arg(short, long)]
    output: PathBuf,

    /// Candidate frame budget for subsampling.
    #[arg(long, default_value_t = DEFAULT_TARGET_FRAMES)]
    candidates: usize,

    /// Downscale pyramid depth.
    #[arg(long, default_value_t = 0)]
    downscales: u32,

    /// Crop margins as top,bottom,left,right fractions.
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropFactor>,

    /// Radial mask radius as a fraction of the half-diagonal.
    #[arg(long, default_value_t = 1.0)]
    radius: f32,

    /// Reject invalid mask parameters instead of proceeding with them.
    #[arg(long)]
    strict_mask: bool,

    /// Fail on a zero probed frame count instead of continuing.
    #[arg(long)]
    strict_probe: bool,
}

#[derive(Args)]
struct SelectArgs {
    /// Copy kept frames here instead of deleting in place.
    #[arg(long)]
    keep_into: Option<PathBuf>,

    /// Absolute number of frames to keep.
    #[arg(long, conflicts_with = "percent")]
    target: Option<usize>,

    /// Percentage of candidates to keep.
    #[arg(long)]
    percent: Option<f32>,

    /// Explicit group count (derived from target and scalar when omitted).
    #[arg(long)]
    groups: Option<usize>,

    /// Grouping granularity; larger means fewer, coarser groups.
    #[arg(long, default_value_t = 1)]
    scalar: u32,

    /// Inclusive motion-score cutoff for the near-duplicate filter.
    #[arg(long, default_value_t = frameprep::MOTION_SCORE_CUTOFF)]
    motion_cutoff: f64,

    /// Minimum feature matches for a motion score to count.
    #[arg(long, default_value_t = frameprep::MIN_FEATURE_MATCHES)]
    min_matches: usize,
}

fn parse_crop(raw: &str) -> Result<CropFactor, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Err("expected four comma-separated fractions: top,bottom,left,right".into());
    }
    let mut margins = [0.0f32; 4];
    for (slot, part) in margins.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| format!("invalid crop fraction {part:?}: {e}"))?;
    }
    Ok(CropFactor::new(margins[0], margins[1], margins[2], margins[3]))
}

impl SelectArgs {
    fn target_spec(&self) -> Result<TargetSpec> {
        match (self.target, self.percent) {
            (Some(count), None) => Ok(TargetSpec::Count(count)),
            (None, Some(percent)) => Ok(TargetSpec::Percent(percent)),
            (None, None) => bail!("one of --target or --percent is required"),
            (Some(_), Some(_)) => bail!("--target and --percent are mutually exclusive"),
        }
    }

    fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            motion_cutoff: self.motion_cutoff,
            min_matches: self.min_matches,
            ..ScoringConfig::default()
        }
    }

    fn selection_config(&self) -> SelectionConfig {
        SelectionConfig {
            group_count: self.groups,
            scalar: self.scalar,
        }
    }
}

fn extraction_config(args: &ExtractArgs) -> ExtractionConfig {
    ExtractionConfig {
        target_frame_count: args.candidates,
        num_downscales: args.downscales,
        crop_factor: args.crop.unwrap_or_default(),
        percent_radius: args.radius,
        strict_mask: args.strict_mask,
        fail_on_empty_video: args.strict_probe,
    }
}

fn resolve_tools(cli: &Cli) -> Result<ToolPaths> {
    let settings = ToolSettings::load().unwrap_or_default();
    let mut tools = ToolPaths::resolve(&settings);
    if let Some(ffmpeg) = &cli.ffmpeg {
        tools.ffmpeg = ffmpeg.clone();
    }
    if let Some(ffprobe) = &cli.ffprobe {
        tools.ffprobe = ffprobe.clone();
    }
    Ok(tools)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads.unwrap_or_else(num_cpus::get))
        .build_global()
        .context("failed to configure worker pool")?;

    let tools = resolve_tools(&cli)?;

    match &cli.command {
        Command::Probe { video } => {
            let count = probe_frame_count(&tools.ffprobe, video)?;
            println!("{count}");
        }
        Command::Extract { video, extract } => {
            let outcome = extract_frames(&tools, video, &extract.output, &extraction_config(extract))?;
            outcome.log_warnings();
            log::info!(
                "extracted {} frames into {}",
                outcome.value().frames_extracted,
                extract.output.display()
            );
        }
        Command::Select { input, select } => {
            let outcome = curate_directory(
                input,
                select.keep_into.as_deref(),
                select.target_spec()?,
                &select.scoring_config(),
                &select.selection_config(),
            )?;
            outcome.log_warnings();
            println!("{}", outcome.value());
        }
        Command::Run {
            video,
            extract,
            select,
        } => {
            let extraction = extract_frames(&tools, video, &extract.output, &extraction_config(extract))?;
            extraction.log_warnings();

            let outcome = curate_directory(
                &extract.output,
                select.keep_into.as_deref(),
                select.target_spec()?,
                &select.scoring_config(),
                &select.selection_config(),
            )?;
            outcome.log_warnings();
            log::info!("pipeline complete: {} frames retained", outcome.value());
        }
    }

    Ok(())
}
