//! Face mask filter instance: the host-facing side of the pipeline
//!
//! Owns the shared pipeline pieces, the two worker threads, the overlay
//! render target and the alert timeline. Host callbacks (`tick`, `render`, `activate`/`deactivate`,
//! `show`/`hide`, `update`) run on the host's thread and never block: every
//! access to state shared with a worker is a try-lock that degrades to
//! skipping the sub-step.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use glam::Mat4;
use log::{debug, info, trace, warn};
use uuid::Uuid;

use super::alert::{AlertFrame, AlertTimeline, Segment};
use super::detection_worker::{spawn_detection_worker, DetectionControl, DetectionPipeline};
use super::frame_slot::{FrameSlot, MorphHint, Timestamp};
use super::lifecycle::{shutdown_workers, ShutdownReport, WorkerHandle};
use super::locks::try_lock;
use super::morph_gate::MorphGate;
use super::resource_cache::{CacheableKind, ResourceCache, ResourceHandle};
use super::result_ring::{ResultRing, RingRead};
use super::scene_loader::{spawn_scene_loader, LoaderCommand, LoaderShared, SceneState};
use super::stats::{PipelineStats, StatsSnapshot};
use crate::config::FilterConfig;
use crate::detect::{DetectionResults, FaceDetector, Triangulation};
use crate::error::Result;
use crate::gfx::effect::{DEFAULT_EFFECT, DEFAULT_EFFECT_SOURCE};
use crate::gfx::texture::FALLBACK_TEXTURE;
use crate::gfx::{
    ColorFormat, DrawCall, Effect, GraphicsContext, GraphicsDevice, GraphicsGuard, RawHandle, RenderTarget,
};
use crate::scene::{LoadContext, Scene};

/// Vertices of the full-frame background quad.
const QUAD_VERTICES: usize = 6;

/// Faces and mesh the render thread currently draws with.
#[derive(Debug, Default)]
struct Tracking {
    faces: DetectionResults,
    triangulation: Triangulation,
    /// Timestamp of the applied results
    timestamp: Option<Timestamp>,
}

pub struct FaceMaskFilter {
    id: Uuid,
    config: FilterConfig,
    gpu: Arc<GraphicsContext>,
    device: Arc<dyn GraphicsDevice>,
    cache: Arc<ResourceCache>,
    slot: Arc<FrameSlot>,
    ring: Arc<ResultRing>,
    morph_gate: Arc<MorphGate>,
    scenes: Arc<Mutex<SceneState>>,
    stats: Arc<PipelineStats>,
    control: Arc<DetectionControl>,
    loader_tx: Sender<LoaderCommand>,
    workers: Vec<WorkerHandle>,
    tracking: Tracking,
    overlay: Option<RenderTarget>,
    default_effect: Option<Effect>,
    alert: AlertTimeline,
    /// Alert state computed by the last tick
    alert_frame: AlertFrame,
    alert_pending: bool,
    active: bool,
    visible: bool,
    rewind_pending: bool,
    shut_down: bool,
}

impl std::fmt::Debug for FaceMaskFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceMaskFilter")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("visible", &self.visible)
            .field("workers", &self.workers.len())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl FaceMaskFilter {
    /// Create the instance: register shared GPU resources, start both workers.
    ///
    /// The detector configuration is copied into the detection worker here;
    /// later `update` calls do not change it.
    pub fn new(
        config: FilterConfig,
        gpu: Arc<GraphicsContext>,
        device: Arc<dyn GraphicsDevice>,
        detector: Box<dyn FaceDetector>,
    ) -> Result<Self> {
        config.validate()?;
        let (loader_tx, loader_rx) = unbounded();

        // Built before anything can fail so Drop tears down partial setup
        let mut filter = Self {
            id: Uuid::new_v4(),
            config,
            gpu,
            device,
            cache: Arc::new(ResourceCache::new()),
            slot: Arc::new(FrameSlot::new()),
            ring: Arc::new(ResultRing::new()),
            morph_gate: Arc::new(MorphGate::new()),
            scenes: Arc::new(Mutex::new(SceneState::default())),
            stats: Arc::new(PipelineStats::new()),
            control: Arc::new(DetectionControl::new()),
            loader_tx,
            workers: Vec::new(),
            tracking: Tracking::default(),
            overlay: None,
            default_effect: None,
            alert: AlertTimeline::new(),
            alert_frame: AlertFrame::ALWAYS_ON,
            alert_pending: false,
            active: true,
            visible: true,
            rewind_pending: false,
            shut_down: false,
        };

        {
            let gpu = Arc::clone(&filter.gpu);
            let guard = gpu.enter();
            filter.register_shared_resources(&guard)?;
        }
        filter.control.set_build_lines(filter.config.draw_morph_lines);

        let pipeline = DetectionPipeline {
            slot: Arc::clone(&filter.slot),
            ring: Arc::clone(&filter.ring),
            morph_gate: Arc::clone(&filter.morph_gate),
            stats: Arc::clone(&filter.stats),
            control: Arc::clone(&filter.control),
            gpu: Arc::clone(&filter.gpu),
            device: Arc::clone(&filter.device),
        };
        let detect = spawn_detection_worker(filter.config.detector.clone(), detector, pipeline)?;
        filter.workers.push(detect);

        let shared = LoaderShared {
            state: Arc::clone(&filter.scenes),
            morph_gate: Arc::clone(&filter.morph_gate),
            stats: Arc::clone(&filter.stats),
            load: LoadContext {
                gpu: Arc::clone(&filter.gpu),
                device: Arc::clone(&filter.device),
                cache: Arc::clone(&filter.cache),
            },
        };
        let loader = spawn_scene_loader(filter.config.loader.clone(), loader_rx, shared)?;
        filter.workers.push(loader);

        filter.send(LoaderCommand::SetScene(filter.config.scene.clone()));
        filter.send(LoaderCommand::SetIntro(filter.config.alert.intro.clone()));
        filter.send(LoaderCommand::SetOutro(filter.config.alert.outro.clone()));
        filter.alert_pending = filter.config.alert.activate;
        filter.send(LoaderCommand::SetDemoFolder(
            filter.config.active_demo_folder().map(|p| p.to_path_buf()),
        ));

        info!("Filter {} created", filter.id);
        Ok(filter)
    }

    /// 1x1 white fallback texture, default effect, overlay target.
    fn register_shared_resources(&mut self, gpu: &GraphicsGuard<'_>) -> Result<()> {
        let white = self
            .device
            .create_texture_with_data(1, 1, ColorFormat::Rgba8, &[255; 4])?;
        self.cache.add_permanent(
            CacheableKind::Texture,
            FALLBACK_TEXTURE,
            ResourceHandle::from_device(white, &self.device),
        );

        let effect = self.device.create_effect(DEFAULT_EFFECT, DEFAULT_EFFECT_SOURCE)?;
        self.cache.add_permanent(
            CacheableKind::Effect,
            DEFAULT_EFFECT,
            ResourceHandle::from_device(effect, &self.device),
        );
        self.default_effect = Effect::default_effect(&self.cache);

        self.overlay = Some(RenderTarget::new(ColorFormat::Rgba8, gpu, &self.device)?);
        debug!("Filter {}: shared resources registered", self.id);
        Ok(())
    }

    fn send(&self, command: LoaderCommand) {
        if self.loader_tx.send(command).is_err() {
            warn!("Filter {}: scene loader is gone", self.id);
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Faces the last render drew with.
    pub fn tracked_faces(&self) -> &DetectionResults {
        &self.tracking.faces
    }

    /// Name of the scene being drawn. None if none, or the loader is busy.
    pub fn active_scene_name(&self) -> Option<String> {
        let state = try_lock(&self.scenes)?;
        state.active_scene().map(|s| s.name().to_string())
    }

    /// Animation time of the scene being drawn.
    pub fn active_scene_time(&self) -> Option<f32> {
        let state = try_lock(&self.scenes)?;
        state.active_scene().map(|s| s.animation().time())
    }

    /// Path of the last scene that failed to load.
    pub fn last_failed(&self) -> Option<String> {
        let state = try_lock(&self.scenes)?;
        state.last_failed().map(str::to_string)
    }

    /// Restart the alert timeline on the next tick.
    pub fn trigger_alert(&mut self) {
        self.alert_pending = true;
    }

    /// Seconds since the alert was last triggered.
    pub fn alert_elapsed(&self) -> Option<f32> {
        self.alert.elapsed()
    }

    /// True while the alert timeline is over and the mask is not always on.
    fn alert_finished(&self) -> bool {
        !self.config.draw_mask && self.alert.is_finished(self.config.alert.duration)
    }

    /// Video tick: opens the publication gate, advances the alert timeline
    /// and scene animations.
    pub fn tick(&mut self, dt: f32) {
        self.slot.mark_ticked();

        let scenes = Arc::clone(&self.scenes);
        let Some(mut state) = try_lock(&scenes) else {
            trace!("Filter {}: scene state busy, tick skipped", self.id);
            return;
        };
        if self.config.demo_mode {
            state.tick_demo(dt, self.config.demo_interval);
        }

        if self.alert_pending {
            self.alert_pending = false;
            self.alert.trigger();
            if let Some(scene) = state.active_scene_mut() {
                scene.rewind();
            }
            if let Some(intro) = state.intro_mut() {
                intro.rewind();
            }
            if let Some(outro) = state.outro_mut() {
                outro.rewind();
            }
            debug!("Filter {}: alert triggered", self.id);
        }

        let alert = &self.config.alert;
        let intro = state.intro().filter(|_| alert.do_intro).map(Segment::of);
        let outro = state.outro().filter(|_| alert.do_outro).map(Segment::of);
        self.alert_frame = if self.config.draw_mask {
            AlertFrame::ALWAYS_ON
        } else {
            self.alert.frame(alert.duration, intro, outro)
        };
        self.alert.advance(dt);

        let frame = self.alert_frame;
        if let Some(scene) = state.active_scene_mut() {
            if self.rewind_pending {
                scene.rewind();
                self.rewind_pending = false;
            }
            scene.animation_mut().set_alpha(self.config.alpha * frame.mask_alpha);
            if frame.mask_active {
                scene.tick(dt);
            }
        }
        if frame.intro_active {
            if let Some(intro) = state.intro_mut() {
                intro.tick(dt);
            }
        }
        if frame.outro_active {
            if let Some(outro) = state.outro_mut() {
                outro.tick(dt);
            }
        }
    }

    /// Draw `source` with the overlay on top. Must run inside the GPU context.
    ///
    /// Publishes the frame for detection (first call after a tick only),
    /// adopts the newest detection results, then draws. Returns the number
    /// of draw calls issued; 0 means the filter passed the video through.
    pub fn render(&mut self, gpu: &GraphicsGuard<'_>, source: RawHandle) -> usize {
        if self.shut_down || !self.active || !self.visible {
            return 0;
        }
        if self.alert_finished() {
            if self.tracking.timestamp.is_some() || !self.tracking.faces.is_empty() {
                debug!("Filter {}: alert over, passing video through", self.id);
                self.reset_tracking();
            }
            return 0;
        }
        let Some((width, height)) = self.device.texture_size(source) else {
            warn!("Filter {}: source {:?} is not a texture", self.id, source);
            return 0;
        };

        let scenes = Arc::clone(&self.scenes);
        let state = try_lock(&scenes);
        let active_scene = state.as_ref().and_then(|s| s.active_scene());

        self.publish_frame(gpu, source, state.is_some(), active_scene);
        self.update_faces();

        let background = self
            .tracking
            .timestamp
            .and_then(|ts| self.slot.capture_for(ts))
            .unwrap_or(source);

        let (Some(overlay), Some(effect)) = (&self.overlay, &self.default_effect) else {
            return 0;
        };
        let Some(pass) = overlay.begin(width, height) else {
            return 0;
        };
        pass.draw(&DrawCall {
            effect: effect.raw(),
            texture: Some(background),
            transform: Mat4::IDENTITY,
            vertex_count: QUAD_VERTICES,
            alpha: 1.0,
        });

        let mut draws = 1;
        let frame = self.alert_frame;
        if frame.mask_alpha > 0.0 {
            if let Some(scene) = active_scene {
                draws += scene.render(&pass, &self.tracking.faces, &self.tracking.triangulation);
            }
        }
        if let Some(state) = state.as_ref() {
            let no_mesh = Triangulation::default();
            if let Some(intro) = state.intro().filter(|_| frame.intro_active) {
                draws += intro.render(&pass, &self.tracking.faces, &no_mesh);
            }
            if let Some(outro) = state.outro().filter(|_| frame.outro_active) {
                draws += outro.render(&pass, &self.tracking.faces, &no_mesh);
            }
        }
        draws
    }

    fn publish_frame(
        &self,
        gpu: &GraphicsGuard<'_>,
        source: RawHandle,
        scenes_readable: bool,
        scene: Option<&Scene>,
    ) {
        let hint = match scene.and_then(Scene::morph_data) {
            _ if !scenes_readable => MorphHint::Keep,
            Some(morph) => MorphHint::Update(morph),
            None => MorphHint::Invalidate,
        };

        let ticked = self.slot.is_ticked();
        let published = self.slot.publish(
            gpu,
            self.device.as_ref(),
            source,
            hint,
            Timestamp::now(),
            self.config.detector.detect_width,
        );
        if published {
            self.stats.record_frame_published();
        } else if ticked {
            self.stats.record_frame_dropped();
        }
    }

    /// Adopt the newest completed result slot, if any.
    fn update_faces(&mut self) {
        let Some(_gate) = self.morph_gate.try_enter() else {
            self.stats.record_stale_tick();
            return;
        };

        match self.ring.try_read_latest(self.tracking.timestamp) {
            RingRead::Fresh(mut latest) => {
                self.tracking
                    .faces
                    .correlate_and_update_from(&latest.detections, self.config.detector.max_frames_lost);
                if let Some(triangulation) = latest.triangulation.as_mut() {
                    self.tracking.triangulation.take_buffers_from(triangulation);
                    if !self.config.draw_morph_lines {
                        self.tracking.triangulation.destroy_line_buffer();
                    }
                }
                self.tracking.timestamp = Some(latest.timestamp);
                self.stats.record_result_applied();
            }
            RingRead::Busy | RingRead::Unchanged => self.stats.record_stale_tick(),
            RingRead::Empty => {}
        }
    }

    fn reset_tracking(&mut self) {
        self.ring.reset();
        self.slot.reset();
        self.tracking = Tracking::default();
        self.control.request_reset();
    }

    pub fn activate(&mut self) {
        debug!("Filter {}: activate", self.id);
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        debug!("Filter {}: deactivate", self.id);
        self.active = false;
        self.reset_tracking();
    }

    pub fn show(&mut self) {
        debug!("Filter {}: show", self.id);
        self.visible = true;
    }

    pub fn hide(&mut self) {
        debug!("Filter {}: hide", self.id);
        self.visible = false;
        self.reset_tracking();
    }

    /// Apply new settings. Scene and demo changes go to the loader.
    pub fn update(&mut self, config: FilterConfig) -> Result<()> {
        config.validate()?;

        if config.scene != self.config.scene {
            self.send(LoaderCommand::SetScene(config.scene.clone()));
        }
        if config.alert.intro != self.config.alert.intro {
            self.send(LoaderCommand::SetIntro(config.alert.intro.clone()));
        }
        if config.alert.outro != self.config.alert.outro {
            self.send(LoaderCommand::SetOutro(config.alert.outro.clone()));
        }
        if config.alert.activate && !self.config.alert.activate {
            self.alert_pending = true;
        }
        if config.active_demo_folder() != self.config.active_demo_folder() {
            self.send(LoaderCommand::SetDemoFolder(config.active_demo_folder().map(|p| p.to_path_buf())));
        }
        if config.detector != self.config.detector {
            info!("Filter {}: detector settings take effect on next start", self.id);
        }
        if config.rewind {
            self.rewind_pending = true;
        }
        self.control.set_build_lines(config.draw_morph_lines);

        self.config = FilterConfig { rewind: false, ..config };
        Ok(())
    }

    /// Tear the instance down.
    ///
    /// `held` is the caller's GPU guard, if it is inside the context; it is
    /// released so the workers can finish. A caller inside the context must
    /// pass its guard here; dropping the filter there skips the teardown.
    /// Safe to call more than once.
    pub fn shutdown(&mut self, held: Option<GraphicsGuard<'_>>) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;
        info!("Filter {}: shutting down", self.id);

        let warn_every = Duration::from_millis(self.config.shutdown_warn_ms);
        let report = shutdown_workers(&mut self.workers, held, warn_every);

        let gpu = Arc::clone(&self.gpu);
        let guard = gpu.enter();
        match try_lock(&self.scenes) {
            Some(mut state) => state.unload_all(&guard),
            None => warn!("Filter {}: scene state still held, leaving it to the cache flush", self.id),
        }
        if !self.slot.destroy_capture(&guard, self.device.as_ref()) {
            warn!("Filter {}: frame slot still held, capture texture leaked", self.id);
        }
        if let Some(overlay) = self.overlay.take() {
            overlay.destroy(&guard);
        }
        self.default_effect = None;
        self.tracking = Tracking::default();

        let flushed = self.cache.destroy();
        drop(guard);
        let cache_stats = self.cache.stats();
        info!(
            "Filter {}: shut down, {} cached resources flushed (hit rate {:.1}%, {} collisions)",
            self.id,
            flushed,
            cache_stats.hit_rate() * 100.0,
            cache_stats.collisions()
        );
        report
    }
}

impl Drop for FaceMaskFilter {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        if self.gpu.is_held_by_current_thread() {
            // Entering again would deadlock; workers still get the stop request
            warn!(
                "Filter {} dropped inside the GPU context; call shutdown(Some(guard)) first. GPU objects leaked",
                self.id
            );
            for worker in &self.workers {
                worker.request_stop();
            }
            self.shut_down = true;
            return;
        }
        self.shutdown(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, DetectorConfig, LoaderConfig};
    use crate::detect::SyntheticDetector;
    use crate::gfx::HeadlessDevice;
    use std::fs;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    const W: u32 = 64;
    const H: u32 = 48;

    struct Host {
        dir: TempDir,
        gpu: Arc<GraphicsContext>,
        headless: Arc<HeadlessDevice>,
        source: RawHandle,
    }

    fn frame_with_square(x0: u32, y0: u32) -> Vec<u8> {
        let mut pixels = vec![0u8; (W * H * 4) as usize];
        for y in y0..y0 + 12 {
            for x in x0..x0 + 12 {
                let i = ((y * W + x) * 4) as usize;
                pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        pixels
    }

    fn host() -> Host {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("skin.png"), [1u8, 2, 3, 4]).unwrap();
        let scene = r#"{ "name": "mask", "duration": 10.0, "resources": {
            "skin": { "type": "texture", "file": "skin.png" },
            "mat": { "type": "material", "texture": "skin" },
            "head": { "type": "model", "material": "mat", "vertices": 6 }
        } }"#;
        fs::write(dir.path().join("mask.json"), scene).unwrap();

        let gpu = Arc::new(GraphicsContext::new());
        let headless = Arc::new(HeadlessDevice::new(Arc::clone(&gpu)));
        let source = {
            let _g = gpu.enter();
            headless.upload_rgba(W, H, frame_with_square(20, 16)).unwrap()
        };
        Host { dir, gpu, headless, source }
    }

    impl Host {
        fn scene_path(&self) -> PathBuf {
            self.dir.path().join("mask.json")
        }

        fn config(&self) -> FilterConfig {
            FilterConfig {
                scene: Some(self.scene_path()),
                shutdown_warn_ms: 2000,
                detector: DetectorConfig { speed_limit_ms: 1, idle_sleep_ms: 1, ..DetectorConfig::default() },
                loader: LoaderConfig { poll_interval_ms: 1, ..LoaderConfig::default() },
                ..FilterConfig::default()
            }
        }

        fn filter(&self, config: FilterConfig) -> FaceMaskFilter {
            let device: Arc<dyn GraphicsDevice> = self.headless.clone();
            FaceMaskFilter::new(config, Arc::clone(&self.gpu), device, Box::new(SyntheticDetector::default()))
                .unwrap()
        }

        /// One host frame: tick then render inside the GPU context.
        fn frame(&self, filter: &mut FaceMaskFilter) -> usize {
            filter.tick(1.0 / 30.0);
            let gpu = self.gpu.enter();
            filter.render(&gpu, self.source)
        }

        fn run_until(&self, filter: &mut FaceMaskFilter, cond: impl Fn(&FaceMaskFilter, usize) -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                let draws = self.frame(filter);
                if cond(filter, draws) {
                    return true;
                }
                thread::sleep(Duration::from_millis(2));
            }
            false
        }

        /// Short one-shot intro and outro scenes next to mask.json.
        fn write_alert_scenes(&self) -> AlertConfig {
            for name in ["intro", "outro"] {
                let scene = format!(
                    r#"{{ "name": "{}", "duration": 0.3, "loop": false, "intro_fade": 0.1, "resources": {{
                        "skin": {{ "type": "texture", "file": "skin.png" }},
                        "mat": {{ "type": "material", "texture": "skin" }},
                        "ring": {{ "type": "model", "material": "mat", "vertices": 3 }}
                    }} }}"#,
                    name
                );
                fs::write(self.dir.path().join(format!("{}.json", name)), scene).unwrap();
            }
            AlertConfig {
                duration: 1.0,
                do_intro: true,
                do_outro: true,
                intro: Some(self.dir.path().join("intro.json")),
                outro: Some(self.dir.path().join("outro.json")),
                ..AlertConfig::default()
            }
        }

        fn destroy_source(&self) {
            let _g = self.gpu.enter();
            self.headless.destroy(self.source);
        }
    }

    #[test]
    fn test_pipeline_tracks_face_and_draws_mask() {
        let h = host();
        let mut filter = h.filter(h.config());

        // Background quad plus one model for the tracked face
        assert!(h.run_until(&mut filter, |f, draws| f.tracked_faces().len() == 1 && draws == 2));
        assert_eq!(filter.active_scene_name().as_deref(), Some("mask"));

        let stats = filter.stats();
        assert!(stats.frames_published >= 1);
        assert!(stats.results_applied >= 1);
        assert_eq!(stats.scenes_loaded, 1);

        let report = filter.shutdown(Some(h.gpu.enter()));
        assert_eq!(report.joined, 2);

        h.destroy_source();
        assert_eq!(h.headless.live_objects(), 0);
        assert_eq!(h.headless.context_violations(), 0);
        assert_eq!(h.headless.double_destroys(), 0);
    }

    #[test]
    fn test_permanent_resources_registered() {
        let h = host();
        let filter = h.filter(FilterConfig { scene: None, ..h.config() });
        assert!(filter.cache().is_permanent(CacheableKind::Texture, FALLBACK_TEXTURE));
        assert!(filter.cache().is_permanent(CacheableKind::Effect, DEFAULT_EFFECT));
        drop(filter);

        h.destroy_source();
        assert_eq!(h.headless.live_objects(), 0);
    }

    #[test]
    fn test_hidden_filter_passes_through_and_resets() {
        let h = host();
        let mut filter = h.filter(h.config());
        assert!(h.run_until(&mut filter, |f, _| !f.tracked_faces().is_empty()));

        filter.hide();
        assert!(filter.tracked_faces().is_empty());
        assert_eq!(h.frame(&mut filter), 0);

        let published = filter.stats().frames_published;
        h.frame(&mut filter);
        assert_eq!(filter.stats().frames_published, published);

        filter.show();
        assert!(h.run_until(&mut filter, |f, _| !f.tracked_faces().is_empty()));
    }

    #[test]
    fn test_deactivate_skips_render() {
        let h = host();
        let mut filter = h.filter(FilterConfig { scene: None, ..h.config() });
        filter.deactivate();
        assert!(!filter.is_active());
        assert_eq!(h.frame(&mut filter), 0);
        assert_eq!(filter.stats().frames_published, 0);

        filter.activate();
        assert_eq!(h.frame(&mut filter), 1);
        assert_eq!(filter.stats().frames_published, 1);
    }

    #[test]
    fn test_render_without_tick_does_not_publish() {
        let h = host();
        let mut filter = h.filter(FilterConfig { scene: None, ..h.config() });
        let gpu = h.gpu.enter();
        assert_eq!(filter.render(&gpu, h.source), 1);
        drop(gpu);
        let stats = filter.stats();
        assert_eq!(stats.frames_published, 0);
        assert_eq!(stats.frames_dropped, 0);
    }

    #[test]
    fn test_update_switches_and_clears_scene() {
        let h = host();
        let mut filter = h.filter(FilterConfig { scene: None, ..h.config() });
        assert!(filter.active_scene_name().is_none());

        filter.update(h.config()).unwrap();
        assert!(h.run_until(&mut filter, |f, _| f.active_scene_name().is_some()));

        filter.update(FilterConfig { scene: None, ..h.config() }).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut cleared = false;
        while Instant::now() < deadline && !cleared {
            cleared = try_lock(&filter.scenes).is_some_and(|s| s.active_scene().is_none());
            thread::sleep(Duration::from_millis(2));
        }
        assert!(cleared);
    }

    #[test]
    fn test_missing_scene_is_reported() {
        let h = host();
        let missing = h.dir.path().join("nope.json");
        let mut filter = h.filter(FilterConfig { scene: Some(missing.clone()), ..h.config() });
        assert!(h.run_until(&mut filter, |f, _| f.last_failed().is_some()));
        assert_eq!(filter.last_failed(), Some(missing.display().to_string()));
        // Video still passes through with the background quad
        assert_eq!(h.frame(&mut filter), 1);
    }

    #[test]
    fn test_rewind_is_one_shot() {
        let h = host();
        let mut filter = h.filter(h.config());
        assert!(h.run_until(&mut filter, |f, _| f.active_scene_time().is_some_and(|t| t > 0.1)));

        filter.update(FilterConfig { rewind: true, ..h.config() }).unwrap();
        assert!(!filter.config().rewind);
        assert!(h.run_until(&mut filter, |f, _| f.active_scene_time().is_some_and(|t| t < 0.1)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let h = host();
        let device: Arc<dyn GraphicsDevice> = h.headless.clone();
        let bad = FilterConfig { alpha: 2.0, ..h.config() };
        let err = FaceMaskFilter::new(bad, Arc::clone(&h.gpu), device, Box::new(SyntheticDetector::default()));
        assert!(err.is_err());

        let mut filter = h.filter(FilterConfig { scene: None, ..h.config() });
        let zero_width = DetectorConfig { detect_width: 0, ..DetectorConfig::default() };
        assert!(filter.update(FilterConfig { detector: zero_width, ..h.config() }).is_err());
        assert!(filter.config().scene.is_none());
    }

    #[test]
    fn test_shutdown_twice_is_safe() {
        let h = host();
        let mut filter = h.filter(h.config());
        let first = filter.shutdown(None);
        assert_eq!(first.joined, 2);
        assert_eq!(filter.shutdown(None), ShutdownReport::default());

        // Host callbacks after teardown are no-ops
        assert_eq!(h.frame(&mut filter), 0);
        drop(filter);
        h.destroy_source();
        assert_eq!(h.headless.live_objects(), 0);
        assert_eq!(h.headless.double_destroys(), 0);
    }

    /// Tick (skipping ticks lost to the loader) until the alert clock reaches `t`.
    fn tick_until(filter: &mut FaceMaskFilter, t: f32) {
        for _ in 0..10_000 {
            if filter.alert_elapsed().is_some_and(|e| e >= t) {
                return;
            }
            filter.tick(1.0 / 30.0);
        }
        panic!("alert clock stuck at {:?}", filter.alert_elapsed());
    }

    #[test]
    fn test_alert_runs_intro_mask_outro_then_passes_through() {
        let h = host();
        let alert = h.write_alert_scenes();
        let mut filter = h.filter(FilterConfig { draw_mask: false, alert, ..h.config() });

        // Never triggered: video passes through untouched
        assert_eq!(h.frame(&mut filter), 0);
        assert!(h.run_until(&mut filter, |f, _| {
            try_lock(&f.scenes).is_some_and(|s| s.intro().is_some() && s.outro().is_some() && s.active_scene().is_some())
        }));

        filter.trigger_alert();
        tick_until(&mut filter, 0.01);
        let frame = filter.alert_frame;
        assert!(frame.intro_active && !frame.outro_active);
        assert!(!frame.mask_active);
        assert_eq!(frame.mask_alpha, 0.0);

        tick_until(&mut filter, 0.6);
        let frame = filter.alert_frame;
        assert!(!frame.intro_active && !frame.outro_active);
        assert!(frame.mask_active);
        assert_eq!(frame.mask_alpha, 1.0);
        assert!(h.frame(&mut filter) >= 1);

        tick_until(&mut filter, 0.85);
        assert!(filter.alert_frame.outro_active);

        tick_until(&mut filter, 1.1);
        assert_eq!(h.frame(&mut filter), 0);
        assert!(filter.tracked_faces().is_empty());
    }

    #[test]
    fn test_enabling_alert_in_update_triggers_once() {
        let h = host();
        let mut filter = h.filter(FilterConfig { scene: None, draw_mask: false, ..h.config() });
        assert!(filter.alert_elapsed().is_none());

        let on = FilterConfig {
            scene: None,
            draw_mask: false,
            alert: AlertConfig { activate: true, ..AlertConfig::default() },
            ..h.config()
        };
        filter.update(on.clone()).unwrap();
        tick_until(&mut filter, 0.2);

        // Already on: no retrigger
        filter.update(on).unwrap();
        filter.tick(1.0 / 30.0);
        assert!(filter.alert_elapsed().is_some_and(|e| e >= 0.2));
    }

    #[test]
    fn test_always_on_mask_ignores_alert_clock() {
        let h = host();
        let mut filter = h.filter(FilterConfig { scene: None, ..h.config() });
        filter.tick(1.0 / 30.0);
        assert_eq!(filter.alert_frame, AlertFrame::ALWAYS_ON);
        assert_eq!(h.frame(&mut filter), 1);
    }

    #[test]
    fn test_drop_inside_context_does_not_deadlock() {
        let h = host();
        let filter = h.filter(FilterConfig { scene: None, ..h.config() });
        let gpu = h.gpu.enter();
        drop(filter);
        assert!(h.gpu.is_held_by_current_thread());
        drop(gpu);
    }
}
