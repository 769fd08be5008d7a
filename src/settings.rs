//! Persisted tool settings and FFmpeg discovery.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// User-configurable overrides, stored under the platform config directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSettings {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

impl ToolSettings {
    fn settings_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        let app_dir = config_dir.join("frameprep");
        fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("settings.json"))
    }

    /// Load settings from disk, creating defaults on first run.
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;
        if !path.exists() {
            let settings = Self::default();
            settings.save()?;
            return Ok(settings);
        }

        let contents = fs::read_to_string(&path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path()?;
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }
}

/// Resolved, ready-to-invoke tool locations.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    /// Resolution order: explicit setting, then known install locations,
    /// then the bare command name for PATH lookup.
    pub fn resolve(settings: &ToolSettings) -> Self {
        let (detected_ffmpeg, detected_ffprobe) = detect_tool_paths();
        Self {
            ffmpeg: settings
                .ffmpeg_path
                .clone()
                .or(detected_ffmpeg)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe: settings
                .ffprobe_path
                .clone()
                .or(detected_ffprobe)
                .unwrap_or_else(|| PathBuf::from("ffprobe")),
        }
    }
}

/// Detects common FFmpeg installation locations.
pub fn detect_tool_paths() -> (Option<PathBuf>, Option<PathBuf>) {
    let mut ffmpeg_path = None;
    let mut ffprobe_path = None;

    #[cfg(target_os = "macos")]
    let known_locations = [
        "/opt/homebrew/bin/ffmpeg", // Apple Silicon Homebrew
        "/usr/local/bin/ffmpeg",    // Intel Homebrew
        "/opt/local/bin/ffmpeg",    // MacPorts
    ];

    #[cfg(target_os = "linux")]
    let known_locations = ["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg", "/snap/bin/ffmpeg"];

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    let known_locations: [&str; 0] = [];

    for location in known_locations {
        let ffmpeg = PathBuf::from(location);
        let ffprobe = PathBuf::from(location.replace("ffmpeg", "ffprobe"));
        if ffmpeg.exists() && ffprobe.exists() {
            ffmpeg_path = Some(ffmpeg);
            ffprobe_path = Some(ffprobe);
            break;
        }
    }

    // Fall back to whatever PATH offers.
    if ffmpeg_path.is_none() && Command::new("ffmpeg").arg("-version").output().is_ok() {
        ffmpeg_path = Some(PathBuf::from("ffmpeg"));
    }
    if ffprobe_path.is_none() && Command::new("ffprobe").arg("-version").output().is_ok() {
        ffprobe_path = Some(PathBuf::from("ffprobe"));
    }

    (ffmpeg_path, ffprobe_path)
}
