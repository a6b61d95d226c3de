//! Filter configuration
//!
//! Persisted as JSON; every field has a default so partial files load.
//! The detector section is handed to the detection worker by value when the
//! filter starts; later changes to it apply on the next start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detect::MAX_FACES;
use crate::error::{MaskError, Result};

/// Detection worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Width of the downscaled luma image fed to the detector
    pub detect_width: u32,
    /// Minimum time per detection iteration (rate limit)
    pub speed_limit_ms: u64,
    pub max_faces: usize,
    /// Tracked faces unmatched for longer than this are dropped
    pub max_frames_lost: u32,
    /// Sleep when no frame is waiting
    pub idle_sleep_ms: u64,
    /// Sleep after skipping a duplicate frame
    pub duplicate_sleep_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detect_width: 320,
            speed_limit_ms: 30,
            max_faces: MAX_FACES,
            max_frames_lost: 5,
            idle_sleep_ms: 16,
            duplicate_sleep_ms: 1,
        }
    }
}

/// Scene loader worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub poll_interval_ms: u64,
    /// Demo mode stops enumerating after this many scenes
    pub demo_max_scenes: usize,
    /// Glob (relative to the demo folder) selecting scene files
    pub demo_pattern: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 33,
            demo_max_scenes: 400,
            demo_pattern: "**/*.json".to_string(),
        }
    }
}

/// Timed alert: intro scene, main mask, outro scene.
///
/// Only visible when `draw_mask` is off; the main mask then shows for
/// `duration` seconds after each trigger and the filter passes video through
/// once the alert is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Turning this on (or starting with it on) triggers the alert
    pub activate: bool,
    /// Seconds from trigger to end of the outro
    pub duration: f32,
    pub do_intro: bool,
    pub do_outro: bool,
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            activate: false,
            duration: 10.0,
            do_intro: false,
            do_outro: false,
            intro: None,
            outro: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Scene file to overlay; None = pass-through
    pub scene: Option<PathBuf>,
    pub demo_mode: bool,
    pub demo_folder: Option<PathBuf>,
    /// Seconds each demo scene stays on screen
    pub demo_interval: f32,
    pub draw_mask: bool,
    pub draw_morph_lines: bool,
    pub alpha: f32,
    /// One-shot: rewind the active scene's animation
    #[serde(skip)]
    pub rewind: bool,
    /// Interval between "still waiting" warnings while workers stop
    pub shutdown_warn_ms: u64,
    pub alert: AlertConfig,
    pub detector: DetectorConfig,
    pub loader: LoaderConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            scene: None,
            demo_mode: false,
            demo_folder: None,
            demo_interval: 5.0,
            draw_mask: true,
            draw_morph_lines: false,
            alpha: 1.0,
            rewind: false,
            shutdown_warn_ms: 1000,
            alert: AlertConfig::default(),
            detector: DetectorConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| MaskError::io(path, e))?;
        let config: FilterConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| MaskError::io(path, e))
    }

    /// Demo folder, only when demo mode is on.
    pub fn active_demo_folder(&self) -> Option<&Path> {
        if self.demo_mode { self.demo_folder.as_deref() } else { None }
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.detect_width == 0 {
            return Err(MaskError::Config("detector.detect_width must be > 0".into()));
        }
        if d.max_faces == 0 || d.max_faces > MAX_FACES {
            return Err(MaskError::Config(format!(
                "detector.max_faces must be in 1..={}",
                MAX_FACES
            )));
        }
        if self.loader.poll_interval_ms == 0 {
            return Err(MaskError::Config("loader.poll_interval_ms must be > 0".into()));
        }
        if self.loader.demo_max_scenes == 0 {
            return Err(MaskError::Config("loader.demo_max_scenes must be > 0".into()));
        }
        if !(self.demo_interval > 0.0) {
            return Err(MaskError::Config("demo_interval must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(MaskError::Config("alpha must be within 0..=1".into()));
        }
        if !(self.alert.duration > 0.0) {
            return Err(MaskError::Config("alert.duration must be positive".into()));
        }
        Ok(())
    }
}
