//! Detector collaborator interface and the data it exchanges with the pipeline

use glam::Vec3;

use super::results::DetectionResults;
use crate::error::Result;

/// Downscaled 8-bit luma frame handed to the detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectImage {
    pub width: u32,
    pub height: u32,
    /// Row-major, stride == width
    pub pixels: Vec<u8>,
}

impl DetectImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }
}

/// Versioned morph-target snapshot taken from the active scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MorphData {
    version: u64,
    valid: bool,
    /// Per-landmark offsets applied when triangulating
    pub deltas: Vec<Vec3>,
}

impl MorphData {
    pub fn new(version: u64, deltas: Vec<Vec3>) -> Self {
        Self { version, valid: true, deltas }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_newer_than(&self, other: &MorphData) -> bool {
        self.version > other.version
    }

    /// Mark as "no morphable scene": the detector triangulates without offsets.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.deltas.clear();
    }
}

/// Face mesh produced for morph rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triangulation {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Wireframe index buffer, only when requested
    pub lines: Option<Vec<u32>>,
}

impl Triangulation {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Move the buffers out of `other`, leaving it empty.
    pub fn take_buffers_from(&mut self, other: &mut Triangulation) {
        self.vertices = std::mem::take(&mut other.vertices);
        self.indices = std::mem::take(&mut other.indices);
        self.lines = other.lines.take();
    }

    pub fn destroy_line_buffer(&mut self) {
        self.lines = None;
    }
}

/// Opaque face detector.
///
/// Called only from the detection worker, one call at a time.
pub trait FaceDetector: Send {
    /// Find face bounding boxes.
    fn detect(&mut self, image: &DetectImage) -> Result<DetectionResults>;

    /// Fill landmark points for each face.
    fn landmarks(&mut self, image: &DetectImage, faces: &mut DetectionResults) -> Result<()>;

    /// Estimate head pose for each face.
    fn pose(&mut self, faces: &mut DetectionResults) -> Result<()>;

    /// Build the morph mesh for the current faces.
    fn triangulate(
        &mut self,
        morph: &MorphData,
        faces: &DetectionResults,
        build_lines: bool,
    ) -> Result<Triangulation>;

    /// Forget tracking state (filter hidden or deactivated).
    fn reset(&mut self);
}
