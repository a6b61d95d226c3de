//! JSON scene description
//!
//! ```json
//! {
//!   "name": "horns",
//!   "duration": 2.0,
//!   "loop": true,
//!   "intro_duration": 1.5,
//!   "intro_fade": 0.25,
//!   "resources": {
//!     "skin":  { "type": "texture", "file": "skin.png" },
//!     "fx":    { "type": "effect", "file": "lit.effect" },
//!     "mat":   { "type": "material", "effect": "fx", "texture": "skin" },
//!     "horns": { "type": "model", "material": "mat", "vertices": 240 },
//!     "shape": { "type": "morph", "deltas": [[0.0, 0.1, 0.0]] }
//!   }
//! }
//! ```
//!
//! Resources refer to each other by name. After parsing, names resolve to
//! [`ResourceId`] indices into `resources` (document order).

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MaskError, Result};

/// Index of a resource inside its owning document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceDoc {
    Texture {
        file: String,
    },
    Effect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Material {
        /// Falls back to the shared default effect when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        texture: Option<String>,
    },
    Model {
        material: String,
        vertices: usize,
    },
    Morph {
        deltas: Vec<[f32; 3]>,
    },
}

impl ResourceDoc {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceDoc::Texture { .. } => "texture",
            ResourceDoc::Effect { .. } => "effect",
            ResourceDoc::Material { .. } => "material",
            ResourceDoc::Model { .. } => "model",
            ResourceDoc::Morph { .. } => "morph",
        }
    }
}

fn default_duration() -> f32 {
    1.0
}

fn default_loop() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default)]
    pub name: String,
    /// Animation length in seconds
    #[serde(default = "default_duration")]
    pub duration: f32,
    #[serde(default = "default_loop", rename = "loop")]
    pub looping: bool,
    /// Length of the scene when played as an alert intro/outro (default: `duration`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_duration: Option<f32>,
    /// Cross-fade with the main mask at the intro/outro boundary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_fade: Option<f32>,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDoc>,
}

impl SceneDocument {
    pub fn from_json(json: &str, scene: &str) -> Result<Self> {
        let doc: SceneDocument = serde_json::from_str(json)?;
        doc.validate(scene)?;
        Ok(doc)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| MaskError::io(path, e))?;
        Self::from_json(&json, &path.display().to_string())
    }

    pub fn resolve(&self, name: &str) -> Option<ResourceId> {
        self.resources.get_index_of(name).map(ResourceId)
    }

    pub fn get(&self, id: ResourceId) -> Option<(&str, &ResourceDoc)> {
        self.resources.get_index(id.0).map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve a reference, checking the target's kind.
    pub fn resolve_kind(&self, name: &str, kind: &str, scene: &str) -> Result<ResourceId> {
        let id = self
            .resolve(name)
            .ok_or_else(|| MaskError::scene(scene, format!("unknown resource '{}'", name)))?;
        match self.get(id) {
            Some((_, doc)) if doc.kind_name() == kind => Ok(id),
            Some((_, doc)) => Err(MaskError::scene(
                scene,
                format!("'{}' is a {}, expected {}", name, doc.kind_name(), kind),
            )),
            None => Err(MaskError::scene(scene, format!("unknown resource '{}'", name))),
        }
    }

    fn validate(&self, scene: &str) -> Result<()> {
        if !(self.duration > 0.0) {
            return Err(MaskError::scene(scene, "duration must be positive"));
        }
        if self.intro_duration.is_some_and(|d| !(d > 0.0)) {
            return Err(MaskError::scene(scene, "intro_duration must be positive"));
        }
        if self.intro_fade.is_some_and(|f| !(f >= 0.0)) {
            return Err(MaskError::scene(scene, "intro_fade must not be negative"));
        }
        for (name, doc) in &self.resources {
            match doc {
                ResourceDoc::Effect { file: None, source: None } => {
                    return Err(MaskError::scene(scene, format!("effect '{}' has neither file nor source", name)));
                }
                ResourceDoc::Material { effect, texture } => {
                    if let Some(effect) = effect {
                        self.resolve_kind(effect, "effect", scene)?;
                    }
                    if let Some(texture) = texture {
                        self.resolve_kind(texture, "texture", scene)?;
                    }
                }
                ResourceDoc::Model { material, .. } => {
                    self.resolve_kind(material, "material", scene)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
