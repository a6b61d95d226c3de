//! Overlay scene: loaded GPU resources plus live animation state
//!
//! A scene is built off the render thread by the loader worker and then
//! handed over whole. Its GPU objects come from the shared resource cache, so
//! dropping a scene releases cache references and must happen inside the GPU
//! context (see [`Scene::unload`]).

pub mod animation;
pub mod document;

pub use animation::Animation;
pub use document::{ResourceDoc, ResourceId, SceneDocument};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};
use log::{debug, info};
use uuid::Uuid;

use crate::core::resource_cache::ResourceCache;
use crate::detect::{DetectionResults, MorphData, Triangulation};
use crate::error::{MaskError, Result};
use crate::gfx::{DrawCall, Effect, GraphicsContext, GraphicsDevice, GraphicsGuard, RawHandle, RenderTargetOp, Texture};

/// Every loaded morph gets a fresh version so snapshots can be ordered.
static MORPH_VERSION: AtomicU64 = AtomicU64::new(1);

/// What a scene needs to create its GPU objects.
#[derive(Clone)]
pub struct LoadContext {
    pub gpu: Arc<GraphicsContext>,
    pub device: Arc<dyn GraphicsDevice>,
    pub cache: Arc<ResourceCache>,
}

#[derive(Debug)]
enum Resource {
    Texture(Texture),
    Effect(Effect),
    Material {
        effect: Option<ResourceId>,
        texture: Option<ResourceId>,
    },
    Model {
        material: ResourceId,
        vertex_count: usize,
    },
    Morph,
}

#[derive(Debug)]
pub struct Scene {
    id: Uuid,
    path: PathBuf,
    name: String,
    resources: Vec<Resource>,
    default_effect: Option<Effect>,
    fallback_texture: Option<Texture>,
    animation: Animation,
    intro_duration: f32,
    intro_fade: Option<f32>,
    morph: Option<MorphData>,
}

impl Scene {
    /// Load a scene file, creating GPU objects through the cache.
    ///
    /// Enters the GPU context once per object, never for the whole load.
    pub fn load(path: &Path, lc: &LoadContext) -> Result<Self> {
        let doc = SceneDocument::from_file(path)?;
        let label = path.display().to_string();
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut resources = Vec::with_capacity(doc.resources.len());
        let mut morph = None;
        if let Err(e) = build_resources(&doc, base, &label, lc, &mut resources, &mut morph) {
            // Partially built objects still hold cache references
            let _gpu = lc.gpu.enter();
            resources.clear();
            return Err(e);
        }

        let name = if doc.name.is_empty() {
            path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        } else {
            doc.name.clone()
        };
        info!("Loaded scene '{}' ({} resources) from {}", name, resources.len(), label);

        Ok(Self {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            name,
            resources,
            default_effect: Effect::default_effect(&lc.cache),
            fallback_texture: Texture::fallback(&lc.cache),
            animation: Animation::new(doc.duration, doc.looping),
            intro_duration: doc.intro_duration.unwrap_or(doc.duration),
            intro_fade: doc.intro_fade,
            morph,
        })
    }

    /// Drop the scene inside the GPU context.
    pub fn unload(self, _gpu: &GraphicsGuard<'_>) {
        debug!("Unloading scene '{}' ({})", self.name, self.id);
        drop(self);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn animation(&self) -> &Animation {
        &self.animation
    }

    pub fn animation_mut(&mut self) -> &mut Animation {
        &mut self.animation
    }

    pub fn tick(&mut self, dt: f32) {
        self.animation.tick(dt);
    }

    pub fn rewind(&mut self) {
        self.animation.rewind();
    }

    /// Seconds this scene covers when played as an alert intro or outro.
    pub fn intro_duration(&self) -> f32 {
        self.intro_duration
    }

    pub fn intro_fade(&self) -> Option<f32> {
        self.intro_fade
    }

    /// Morph snapshot, if this scene deforms the face mesh.
    pub fn morph_data(&self) -> Option<&MorphData> {
        self.morph.as_ref()
    }

    pub fn model_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| matches!(r, Resource::Model { .. }))
            .count()
    }

    fn effect_of(&self, id: Option<ResourceId>) -> Option<RawHandle> {
        match id.and_then(|id| self.resources.get(id.0)) {
            Some(Resource::Effect(fx)) => Some(fx.raw()),
            _ => self.default_effect.as_ref().map(Effect::raw),
        }
    }

    fn texture_of(&self, id: Option<ResourceId>) -> Option<RawHandle> {
        match id.and_then(|id| self.resources.get(id.0)) {
            Some(Resource::Texture(tex)) => Some(tex.raw()),
            _ => self.fallback_texture.as_ref().map(Texture::raw),
        }
    }

    /// Draw every model once per tracked face, plus the morphed face mesh.
    ///
    /// Returns the number of draw calls issued.
    pub fn render(
        &self,
        pass: &RenderTargetOp<'_>,
        faces: &DetectionResults,
        triangulation: &Triangulation,
    ) -> usize {
        let alpha = self.animation.alpha();
        if alpha <= 0.0 {
            return 0;
        }

        let mut draws = 0;
        for face in faces {
            if !face.pose.is_valid() {
                continue;
            }
            let transform = face.pose.to_mat4();
            for resource in &self.resources {
                let Resource::Model { material, vertex_count } = resource else {
                    continue;
                };
                let Some(Resource::Material { effect, texture }) = self.resources.get(material.0) else {
                    continue;
                };
                let Some(effect) = self.effect_of(*effect) else {
                    continue;
                };
                pass.draw(&DrawCall {
                    effect,
                    texture: self.texture_of(*texture),
                    transform,
                    vertex_count: *vertex_count,
                    alpha,
                });
                draws += 1;
            }
        }

        if self.morph.is_some() && !triangulation.is_empty() {
            if let Some(effect) = self.default_effect.as_ref().map(Effect::raw) {
                pass.draw(&DrawCall {
                    effect,
                    texture: None,
                    transform: Mat4::IDENTITY,
                    vertex_count: triangulation.indices.len(),
                    alpha,
                });
                draws += 1;
            }
        }
        draws
    }
}

fn build_resources(
    doc: &SceneDocument,
    base: &Path,
    label: &str,
    lc: &LoadContext,
    out: &mut Vec<Resource>,
    morph: &mut Option<MorphData>,
) -> Result<()> {
    for (name, res) in &doc.resources {
        let built = match res {
            ResourceDoc::Texture { file } => {
                let gpu = lc.gpu.enter();
                Resource::Texture(Texture::from_file(&base.join(file), &gpu, &lc.device, &lc.cache)?)
            }
            ResourceDoc::Effect { file: Some(file), .. } => {
                let gpu = lc.gpu.enter();
                Resource::Effect(Effect::from_file(&base.join(file), &gpu, &lc.device, &lc.cache)?)
            }
            ResourceDoc::Effect { file: None, source: Some(source) } => {
                let key = format!("{}#{}", label, name);
                let gpu = lc.gpu.enter();
                Resource::Effect(Effect::from_source(&key, source, &gpu, &lc.device, &lc.cache)?)
            }
            ResourceDoc::Effect { file: None, source: None } => {
                return Err(MaskError::scene(label, format!("effect '{}' has no source", name)));
            }
            ResourceDoc::Material { effect, texture } => Resource::Material {
                effect: effect
                    .as_deref()
                    .map(|e| doc.resolve_kind(e, "effect", label))
                    .transpose()?,
                texture: texture
                    .as_deref()
                    .map(|t| doc.resolve_kind(t, "texture", label))
                    .transpose()?,
            },
            ResourceDoc::Model { material, vertices } => Resource::Model {
                material: doc.resolve_kind(material, "material", label)?,
                vertex_count: *vertices,
            },
            ResourceDoc::Morph { deltas } => {
                let deltas = deltas.iter().map(|d| Vec3::from_array(*d)).collect();
                *morph = Some(MorphData::new(MORPH_VERSION.fetch_add(1, Ordering::Relaxed), deltas));
                Resource::Morph
            }
        };
        debug!("Scene {}: built {} '{}'", label, res.kind_name(), name);
        out.push(built);
    }
    Ok(())
}
