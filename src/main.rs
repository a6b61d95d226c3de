use facemask::cli::Args;
use facemask::config::FilterConfig;
use facemask::core::FaceMaskFilter;
use facemask::detect::SyntheticDetector;
use facemask::gfx::{GraphicsContext, GraphicsDevice, HeadlessDevice};
use facemask::paths::{self, PathConfig};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, trace};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Moving bright square on a dark background, standing in for a face.
struct SyntheticVideo {
    width: u32,
    height: u32,
}

impl SyntheticVideo {
    /// Frames per full circle of the square.
    const PERIOD: u32 = 120;

    fn frame(&self, n: u32) -> Vec<u8> {
        let (w, h) = (self.width as i64, self.height as i64);
        let mut pixels = vec![40u8; (w * h * 4) as usize];

        let angle = (n % Self::PERIOD) as f32 / Self::PERIOD as f32 * TAU;
        let radius = h as f32 / 4.0;
        let cx = w / 2 + (angle.cos() * radius) as i64;
        let cy = h / 2 + (angle.sin() * radius) as i64;
        let half = (h / 10).max(2);

        for y in (cy - half).max(0)..(cy + half).min(h) {
            for x in (cx - half).max(0)..(cx + half).min(w) {
                let i = ((y * w + x) * 4) as usize;
                pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        pixels
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| paths::data_file("facemask.log", path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging, respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Settings file (explicit, or facemask.json in the config dir), then CLI overrides.
fn load_config(args: &Args, path_config: &PathConfig) -> Result<FilterConfig> {
    let settings = args.settings.clone().or_else(|| {
        let default = paths::config_file("facemask.json", path_config);
        default.exists().then_some(default)
    });

    let mut config = match &settings {
        Some(path) => {
            info!("Settings: {}", path.display());
            FilterConfig::load(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?
        }
        None => FilterConfig::default(),
    };

    if args.scene.is_some() {
        config.scene = args.scene.clone();
    }
    if let Some(folder) = &args.demo_folder {
        config.demo_mode = true;
        config.demo_folder = Some(folder.clone());
    }
    if let Some(seconds) = args.alert {
        config.draw_mask = false;
        config.alert.activate = true;
        config.alert.duration = seconds;
    }
    Ok(config)
}

fn run(args: &Args, config: FilterConfig) -> Result<()> {
    anyhow::ensure!(args.fps > 0.0, "--fps must be positive");
    anyhow::ensure!(args.width > 0 && args.height > 0, "video size must be non-zero");

    let gpu = Arc::new(GraphicsContext::new());
    let headless = Arc::new(HeadlessDevice::new(Arc::clone(&gpu)));
    let device: Arc<dyn GraphicsDevice> = headless.clone();

    let mut filter = FaceMaskFilter::new(config, Arc::clone(&gpu), device, Box::new(SyntheticDetector::default()))
        .context("Failed to create filter")?;

    let video = SyntheticVideo { width: args.width, height: args.height };
    let source = {
        let _gpu = gpu.enter();
        headless
            .upload_rgba(args.width, args.height, video.frame(0))
            .context("Failed to create source texture")?
    };

    let dt = 1.0 / args.fps;
    let frame_time = Duration::from_secs_f32(dt);
    let report_every = (args.fps.round() as u32).max(1);
    let started = Instant::now();

    for n in 0..args.frames {
        let frame_start = Instant::now();
        filter.tick(dt);

        let draws = {
            let guard = gpu.enter();
            headless
                .write_rgba(source, &video.frame(n))
                .context("Failed to update source texture")?;
            filter.render(&guard, source)
        };
        trace!("Frame {}: {} draw calls", n, draws);

        if n % report_every == 0 {
            info!(
                "Frame {}: {} face(s), scene {:?}",
                n,
                filter.tracked_faces().len(),
                filter.active_scene_name()
            );
        }
        if !args.unpaced {
            thread::sleep(frame_time.saturating_sub(frame_start.elapsed()));
        }
    }

    if let Some(failed) = filter.last_failed() {
        println!("Scene failed to load: {}", failed);
    }
    let stats = filter.stats();
    let report = filter.shutdown(Some(gpu.enter()));
    {
        let _gpu = gpu.enter();
        headless.destroy(source);
    }

    println!("{} frames in {:.2?}", args.frames, started.elapsed());
    println!("{}", stats);
    println!("workers:    {} joined after {:.2?}", report.joined, report.waited);
    println!(
        "gpu:        {} draw calls, {} live objects, {} context violations",
        headless.draw_calls(),
        headless.live_objects(),
        headless.context_violations()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    info!("Facemask headless host starting...");
    debug!("Command-line args: {:?}", args);

    let config = load_config(&args, &path_config)?;
    run(&args, config)
}
