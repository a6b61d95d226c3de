//! Background scene loader
//!
//! Receives the wanted scenes (main, alert intro/outro) and demo folder over
//! a channel and reconciles the
//! shared [`SceneState`] with it, one try-locked pass per poll interval:
//! unload what is no longer wanted (inside the GPU context), load what is
//! missing. A failed load is recorded and not retried until the wanted path
//! changes. The render thread never waits on any of this.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, info, warn};

use super::lifecycle::{catch_iteration, WorkerFlags, WorkerHandle};
use super::locks::try_lock;
use super::morph_gate::MorphGate;
use super::stats::PipelineStats;
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::gfx::GraphicsGuard;
use crate::scene::{LoadContext, Scene};

/// Messages from the filter to the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderCommand {
    SetScene(Option<PathBuf>),
    SetIntro(Option<PathBuf>),
    SetOutro(Option<PathBuf>),
    SetDemoFolder(Option<PathBuf>),
}

/// One loaded (or failed) scene file.
#[derive(Debug, Default)]
struct SceneSlot {
    scene: Option<Scene>,
    /// Path `scene` (or the failed attempt) belongs to
    path: Option<PathBuf>,
}

impl SceneSlot {
    fn unload(&mut self, gpu: &GraphicsGuard<'_>) {
        if let Some(scene) = self.scene.take() {
            scene.unload(gpu);
        }
        self.path = None;
    }
}

/// Scenes visible to the render thread.
#[derive(Debug, Default)]
pub struct SceneState {
    current: SceneSlot,
    intro: SceneSlot,
    outro: SceneSlot,
    last_failed: Option<String>,
    demo: Vec<Scene>,
    demo_folder: Option<PathBuf>,
    demo_index: usize,
    demo_elapsed: f32,
}

impl SceneState {
    /// Scene to draw: the current demo scene in demo mode, else the loaded one.
    pub fn active_scene(&self) -> Option<&Scene> {
        self.demo.get(self.demo_index).or(self.current.scene.as_ref())
    }

    pub fn active_scene_mut(&mut self) -> Option<&mut Scene> {
        match self.demo.get_mut(self.demo_index) {
            Some(scene) => Some(scene),
            None => self.current.scene.as_mut(),
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.path.as_deref()
    }

    /// Alert intro scene.
    pub fn intro(&self) -> Option<&Scene> {
        self.intro.scene.as_ref()
    }

    pub fn intro_mut(&mut self) -> Option<&mut Scene> {
        self.intro.scene.as_mut()
    }

    /// Alert outro scene.
    pub fn outro(&self) -> Option<&Scene> {
        self.outro.scene.as_ref()
    }

    pub fn outro_mut(&mut self) -> Option<&mut Scene> {
        self.outro.scene.as_mut()
    }

    /// Last scene file that failed to load.
    pub fn last_failed(&self) -> Option<&str> {
        self.last_failed.as_deref()
    }

    pub fn demo_len(&self) -> usize {
        self.demo.len()
    }

    pub fn demo_index(&self) -> usize {
        self.demo_index
    }

    /// Advance the demo timer; switches (and rewinds) the next scene every
    /// `interval` seconds.
    pub fn tick_demo(&mut self, dt: f32, interval: f32) {
        if self.demo.is_empty() {
            return;
        }
        self.demo_elapsed += dt;
        if self.demo_elapsed >= interval {
            self.demo_elapsed = 0.0;
            self.demo_index = (self.demo_index + 1) % self.demo.len();
            if let Some(scene) = self.demo.get_mut(self.demo_index) {
                scene.rewind();
            }
            debug!("Demo: switched to scene {}", self.demo_index);
        }
    }

    /// Drop every scene (instance teardown).
    pub fn unload_all(&mut self, gpu: &GraphicsGuard<'_>) {
        self.current.unload(gpu);
        self.intro.unload(gpu);
        self.outro.unload(gpu);
        for scene in self.demo.drain(..) {
            scene.unload(gpu);
        }
        self.demo_folder = None;
        self.demo_index = 0;
    }
}

/// What the loader shares with the filter.
#[derive(Clone)]
pub struct LoaderShared {
    pub state: Arc<Mutex<SceneState>>,
    pub morph_gate: Arc<MorphGate>,
    pub stats: Arc<PipelineStats>,
    pub load: LoadContext,
}

pub fn spawn_scene_loader(
    config: LoaderConfig,
    commands: Receiver<LoaderCommand>,
    shared: LoaderShared,
) -> Result<WorkerHandle> {
    let loader = SceneLoader {
        config,
        commands,
        shared,
        wanted_scene: None,
        wanted_intro: None,
        wanted_outro: None,
        wanted_demo: None,
    };
    WorkerHandle::spawn("loader", move |flags| loader.run(flags))
}

struct SceneLoader {
    config: LoaderConfig,
    commands: Receiver<LoaderCommand>,
    shared: LoaderShared,
    wanted_scene: Option<PathBuf>,
    wanted_intro: Option<PathBuf>,
    wanted_outro: Option<PathBuf>,
    wanted_demo: Option<PathBuf>,
}

impl SceneLoader {
    fn run(mut self, flags: &WorkerFlags) {
        info!("Scene loader running (poll {} ms)", self.config.poll_interval_ms);
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        while flags.is_running() {
            self.drain_commands();
            if catch_iteration("loader", || self.iteration(flags)).is_none() {
                self.shared.stats.record_worker_panic();
            }
            thread::sleep(poll);
        }
        debug!("Scene loader leaving loop");
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(LoaderCommand::SetScene(path)) => self.wanted_scene = path,
                Ok(LoaderCommand::SetIntro(path)) => self.wanted_intro = path,
                Ok(LoaderCommand::SetOutro(path)) => self.wanted_outro = path,
                Ok(LoaderCommand::SetDemoFolder(folder)) => self.wanted_demo = folder,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn iteration(&self, flags: &WorkerFlags) {
        let Some(mut state) = try_lock(&self.shared.state) else {
            return;
        };
        let SceneState { current, intro, outro, last_failed, .. } = &mut *state;
        self.sync_slot(current, &self.wanted_scene, last_failed);
        self.sync_slot(intro, &self.wanted_intro, last_failed);
        self.sync_slot(outro, &self.wanted_outro, last_failed);
        self.sync_demo(&mut state, flags);
    }

    /// Unload `slot` if it no longer matches `wanted`, then load `wanted`.
    fn sync_slot(&self, slot: &mut SceneSlot, wanted: &Option<PathBuf>, last_failed: &mut Option<String>) {
        if slot.path == *wanted {
            return;
        }
        let lc = &self.shared.load;

        if let Some(old) = slot.scene.as_ref() {
            info!("Unloading scene '{}'", old.name());
            let gpu = lc.gpu.enter();
            slot.unload(&gpu);
        }
        slot.path = None;
        *last_failed = None;

        let Some(path) = wanted.clone() else {
            return;
        };
        let _loading = self.shared.morph_gate.begin_loading();
        match Scene::load(&path, lc) {
            Ok(scene) => {
                slot.scene = Some(scene);
                self.shared.stats.record_scene_loaded();
            }
            Err(e) => {
                warn!("Failed to load scene {}: {}", path.display(), e);
                *last_failed = Some(path.display().to_string());
                self.shared.stats.record_scene_failure();
            }
        }
        slot.path = Some(path);
    }

    fn sync_demo(&self, state: &mut SceneState, flags: &WorkerFlags) {
        if state.demo_folder == self.wanted_demo {
            return;
        }
        let lc = &self.shared.load;

        if !state.demo.is_empty() {
            info!("Demo: unloading {} scenes", state.demo.len());
            let gpu = lc.gpu.enter();
            for scene in state.demo.drain(..) {
                scene.unload(&gpu);
            }
        }
        state.demo_folder = None;
        state.demo_index = 0;
        state.demo_elapsed = 0.0;

        let Some(folder) = self.wanted_demo.clone() else {
            return;
        };
        let files = demo_files(&folder, &self.config.demo_pattern, self.config.demo_max_scenes);
        let _loading = self.shared.morph_gate.begin_loading();
        for file in files {
            if !flags.is_running() {
                break;
            }
            match Scene::load(&file, lc) {
                Ok(scene) => {
                    state.demo.push(scene);
                    self.shared.stats.record_scene_loaded();
                }
                Err(e) => {
                    warn!("Demo: failed to load {}: {}", file.display(), e);
                    state.last_failed = Some(file.display().to_string());
                    self.shared.stats.record_scene_failure();
                }
            }
            thread::yield_now();
        }
        info!("Demo mode: {} scenes from {}", state.demo.len(), folder.display());
        state.demo_folder = Some(folder);
    }
}

/// Scene files under `folder` matching `pattern`, sorted, at most `cap`.
fn demo_files(folder: &Path, pattern: &str, cap: usize) -> Vec<PathBuf> {
    let full = folder.join(pattern);
    let Some(full) = full.to_str() else {
        warn!("Demo: non-UTF-8 folder {}", folder.display());
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = match glob::glob(full) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            warn!("Demo: bad pattern {}: {}", full, e);
            return Vec::new();
        }
    };
    files.sort();
    if files.len() > cap {
        debug!("Demo: {} scenes found, keeping {}", files.len(), cap);
        files.truncate(cap);
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::shutdown_workers;
    use crate::core::locks::lock;
    use crate::core::resource_cache::ResourceCache;
    use crate::gfx::{GraphicsContext, GraphicsDevice, HeadlessDevice};
    use crossbeam_channel::{unbounded, Sender};
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn scene_json(texture: &str) -> String {
        format!(
            r#"{{ "resources": {{
                "skin": {{ "type": "texture", "file": "{}" }},
                "mat": {{ "type": "material", "texture": "skin" }},
                "head": {{ "type": "model", "material": "mat", "vertices": 6 }}
            }} }}"#,
            texture
        )
    }

    struct Rig {
        dir: TempDir,
        headless: Arc<HeadlessDevice>,
        shared: LoaderShared,
        tx: Sender<LoaderCommand>,
        workers: Vec<WorkerHandle>,
    }

    fn rig(config: LoaderConfig) -> Rig {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.png"), [1u8, 2, 3, 4]).unwrap();
        fs::write(dir.path().join("b.png"), [5u8, 6, 7, 8]).unwrap();
        fs::write(dir.path().join("a.json"), scene_json("a.png")).unwrap();
        fs::write(dir.path().join("b.json"), scene_json("b.png")).unwrap();

        let gpu = Arc::new(GraphicsContext::new());
        let headless = Arc::new(HeadlessDevice::new(Arc::clone(&gpu)));
        let device: Arc<dyn GraphicsDevice> = headless.clone();
        let shared = LoaderShared {
            state: Arc::new(Mutex::new(SceneState::default())),
            morph_gate: Arc::new(MorphGate::new()),
            stats: Arc::new(PipelineStats::new()),
            load: LoadContext { gpu, device, cache: Arc::new(ResourceCache::new()) },
        };
        let (tx, rx) = unbounded();
        let workers = vec![spawn_scene_loader(config, rx, shared.clone()).unwrap()];
        Rig { dir, headless, shared, tx, workers }
    }

    fn fast() -> LoaderConfig {
        LoaderConfig { poll_interval_ms: 1, ..LoaderConfig::default() }
    }

    impl Rig {
        fn wait(&self, cond: impl Fn(&SceneState) -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                if cond(&lock(&self.shared.state)) {
                    return true;
                }
                thread::sleep(Duration::from_millis(2));
            }
            false
        }

        fn stop(mut self) -> Arc<HeadlessDevice> {
            shutdown_workers(&mut self.workers, None, Duration::from_secs(2));
            let gpu = self.shared.load.gpu.enter();
            lock(&self.shared.state).unload_all(&gpu);
            drop(gpu);
            self.headless
        }
    }

    #[test]
    fn test_loads_configured_scene() {
        let r = rig(fast());
        let path = r.dir.path().join("a.json");
        r.tx.send(LoaderCommand::SetScene(Some(path.clone()))).unwrap();

        assert!(r.wait(|s| s.active_scene().is_some()));
        assert_eq!(lock(&r.shared.state).current_path(), Some(path.as_path()));

        let headless = r.stop();
        assert_eq!(headless.live_objects(), 0);
        assert_eq!(headless.context_violations(), 0);
    }

    #[test]
    fn test_changing_scene_unloads_old_one() {
        let r = rig(fast());
        let a = r.dir.path().join("a.json");
        let b = r.dir.path().join("b.json");
        r.tx.send(LoaderCommand::SetScene(Some(a))).unwrap();
        assert!(r.wait(|s| s.active_scene().is_some()));

        r.tx.send(LoaderCommand::SetScene(Some(b.clone()))).unwrap();
        assert!(r.wait(|s| s.current_path() == Some(b.as_path()) && s.active_scene().is_some()));
        // Only b's texture is alive
        assert_eq!(r.headless.live_objects(), 1);

        r.tx.send(LoaderCommand::SetScene(None)).unwrap();
        assert!(r.wait(|s| s.active_scene().is_none() && s.current_path().is_none()));
        assert_eq!(r.headless.live_objects(), 0);

        let headless = r.stop();
        assert_eq!(headless.context_violations(), 0);
    }

    #[test]
    fn test_intro_and_outro_load_alongside_main_scene() {
        let r = rig(fast());
        let a = r.dir.path().join("a.json");
        let b = r.dir.path().join("b.json");
        r.tx.send(LoaderCommand::SetScene(Some(a.clone()))).unwrap();
        r.tx.send(LoaderCommand::SetIntro(Some(b.clone()))).unwrap();
        r.tx.send(LoaderCommand::SetOutro(Some(a))).unwrap();

        assert!(r.wait(|s| s.active_scene().is_some() && s.intro().is_some() && s.outro().is_some()));
        // Main and outro share a's texture through the cache
        assert_eq!(r.headless.live_objects(), 2);

        r.tx.send(LoaderCommand::SetIntro(None)).unwrap();
        assert!(r.wait(|s| s.intro().is_none()));
        {
            let state = lock(&r.shared.state);
            assert!(state.active_scene().is_some());
            assert!(state.outro().is_some());
        }
        assert_eq!(r.headless.live_objects(), 1);

        let headless = r.stop();
        assert_eq!(headless.live_objects(), 0);
        assert_eq!(headless.context_violations(), 0);
    }

    #[test]
    fn test_failed_load_is_recorded_once() {
        let r = rig(fast());
        let missing = r.dir.path().join("missing.json");
        r.tx.send(LoaderCommand::SetScene(Some(missing.clone()))).unwrap();

        assert!(r.wait(|s| s.last_failed().is_some()));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(r.shared.stats.snapshot().scene_failures, 1);
        {
            let state = lock(&r.shared.state);
            assert!(state.active_scene().is_none());
            assert_eq!(state.last_failed(), Some(missing.display().to_string().as_str()));
        }
        r.stop();
    }

    #[test]
    fn test_demo_mode_is_capped_and_clears() {
        let r = rig(LoaderConfig { demo_max_scenes: 1, ..fast() });
        r.tx.send(LoaderCommand::SetDemoFolder(Some(r.dir.path().to_path_buf()))).unwrap();
        assert!(r.wait(|s| s.demo_len() == 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(lock(&r.shared.state).demo_len(), 1);

        r.tx.send(LoaderCommand::SetDemoFolder(None)).unwrap();
        assert!(r.wait(|s| s.demo_len() == 0));
        assert_eq!(r.headless.live_objects(), 0);
        r.stop();
    }

    #[test]
    fn test_demo_cycles_on_interval() {
        let r = rig(fast());
        r.tx.send(LoaderCommand::SetDemoFolder(Some(r.dir.path().to_path_buf()))).unwrap();
        assert!(r.wait(|s| s.demo_len() == 2));
        {
            let mut state = lock(&r.shared.state);
            assert_eq!(state.demo_index(), 0);
            state.tick_demo(0.6, 1.0);
            assert_eq!(state.demo_index(), 0);
            state.tick_demo(0.6, 1.0);
            assert_eq!(state.demo_index(), 1);
            state.tick_demo(1.0, 1.0);
            assert_eq!(state.demo_index(), 0);
            assert!(state.active_scene().is_some());
        }
        r.stop();
    }

    #[test]
    fn test_empty_demo_never_advances() {
        let mut state = SceneState::default();
        state.tick_demo(10.0, 1.0);
        assert_eq!(state.demo_index(), 0);
        assert!(state.active_scene().is_none());
    }

    #[test]
    fn test_demo_files_sorted_and_capped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["c.json", "a.json", "nested/b.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let all = demo_files(dir.path(), "**/*.json", 400);
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(demo_files(dir.path(), "**/*.json", 2).len(), 2);
    }
}
