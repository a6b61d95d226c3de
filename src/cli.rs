use clap::Parser;
use std::path::PathBuf;

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "GPU:      headless (in-memory)\n",
    "Detector: brightness blobs (synthetic)\n",
    "Target:   ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless face mask host: runs the overlay pipeline over synthetic video
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Scene description (JSON) to overlay
    #[arg(value_name = "SCENE")]
    pub scene: Option<PathBuf>,

    /// Cycle through every scene found in this folder
    #[arg(short = 'd', long = "demo", value_name = "DIR")]
    pub demo_folder: Option<PathBuf>,

    /// Show the mask only as a timed alert lasting this many seconds
    #[arg(short = 'a', long = "alert", value_name = "SECONDS")]
    pub alert: Option<f32>,

    /// Number of video frames to run
    #[arg(short = 'n', long = "frames", value_name = "N", default_value_t = 300)]
    pub frames: u32,

    /// Video frame rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = 30.0)]
    pub fps: f32,

    /// Video width in pixels
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long = "height", value_name = "PX", default_value_t = 360)]
    pub height: u32,

    /// Filter settings (JSON); defaults to facemask.json in the config dir if present
    #[arg(short = 's', long = "settings", value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Run as fast as possible instead of pacing frames at --fps
    #[arg(long = "unpaced")]
    pub unpaced: bool,

    /// Enable debug logging to file (default: facemask.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["facemask"]).unwrap();
        assert!(args.scene.is_none());
        assert_eq!(args.frames, 300);
        assert_eq!((args.width, args.height), (640, 360));
        assert!(args.log_file.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_log_flag_with_and_without_path() {
        let args = Args::try_parse_from(["facemask", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));

        let args = Args::try_parse_from(["facemask", "-vv", "--log", "run.log", "mask.json"]).unwrap();
        assert_eq!(args.log_file, Some(Some(PathBuf::from("run.log"))));
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.scene, Some(PathBuf::from("mask.json")));
    }

    #[test]
    fn test_alert_duration() {
        let args = Args::try_parse_from(["facemask", "--alert", "4.5", "mask.json"]).unwrap();
        assert_eq!(args.alert, Some(4.5));
        assert!(Args::try_parse_from(["facemask"]).unwrap().alert.is_none());
    }
}
