//! Per-face detection results and frame-to-frame identity tracking

use glam::{Mat4, Quat, Vec2, Vec3};

use super::kalman::ScalarKalman;

/// Maximum faces tracked per frame.
pub const MAX_FACES: usize = 8;

/// Landmark points per face.
pub const NUM_LANDMARKS: usize = 68;

/// Integer bounding box in detect-image pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.left + self.right) as f32 * 0.5,
            (self.top + self.bottom) as f32 * 0.5,
        )
    }
}

/// Head pose: rotation plus translation in normalized view space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self { rotation: Quat::IDENTITY, translation: Vec3::ZERO }
    }
}

impl Pose {
    /// Pose with zero translation means "not estimated".
    pub fn is_valid(&self) -> bool {
        self.translation != Vec3::ZERO
    }

    pub fn distance_to(&self, other: &Pose) -> f32 {
        self.translation.distance(other.translation)
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One tracked face.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub bounds: Rect,
    pub landmarks: Vec<Vec2>,
    pub pose: Pose,
    /// Matched by the latest correlation pass
    pub matched: bool,
    /// Consecutive correlation passes without a match
    pub frames_lost: u32,
    filters: Vec<ScalarKalman>,
}

impl DetectionResult {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            landmarks: Vec::new(),
            pose: Pose::default(),
            matched: false,
            frames_lost: 0,
            filters: Vec::new(),
        }
    }

    pub fn position(&self) -> Vec2 {
        self.bounds.center()
    }

    pub fn distance_to(&self, other: &DetectionResult) -> f32 {
        self.position().distance(other.position())
    }

    /// Take bounds and pose from a fresh detection, smoothing landmarks.
    pub fn update_from(&mut self, fresh: &DetectionResult) {
        self.bounds = fresh.bounds;
        self.pose = fresh.pose;

        if self.filters.len() != fresh.landmarks.len() * 2 {
            self.filters = vec![ScalarKalman::default(); fresh.landmarks.len() * 2];
        }
        self.landmarks.clear();
        for (i, point) in fresh.landmarks.iter().enumerate() {
            let x = self.filters[i * 2].update(point.x);
            let y = self.filters[i * 2 + 1].update(point.y);
            self.landmarks.push(Vec2::new(x, y));
        }
    }
}

/// Bounded list of faces for one frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionResults {
    faces: Vec<DetectionResult>,
}

impl DetectionResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a face. Returns false (and drops it) when full.
    pub fn push(&mut self, face: DetectionResult) -> bool {
        if self.faces.len() >= MAX_FACES {
            return false;
        }
        self.faces.push(face);
        true
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn clear(&mut self) {
        self.faces.clear();
    }

    pub fn truncate(&mut self, len: usize) {
        self.faces.truncate(len);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionResult> {
        self.faces.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, DetectionResult> {
        self.faces.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&DetectionResult> {
        self.faces.get(index)
    }

    /// Index of the closest face not yet matched this pass.
    fn find_closest_unmatched(&self, face: &DetectionResult) -> Option<usize> {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.matched)
            .min_by(|(_, a), (_, b)| a.distance_to(face).total_cmp(&b.distance_to(face)))
            .map(|(i, _)| i)
    }

    /// Merge a fresh frame of detections into the tracked set.
    ///
    /// Greedy: each fresh face in order claims the nearest unclaimed tracked
    /// face. Fresh faces with nothing left to claim become new tracks.
    /// Tracks left unclaimed age by one frame and are dropped after
    /// `max_frames_lost`.
    pub fn correlate_and_update_from(&mut self, fresh: &DetectionResults, max_frames_lost: u32) {
        for face in &mut self.faces {
            face.matched = false;
        }

        for new_face in &fresh.faces {
            match self.find_closest_unmatched(new_face) {
                Some(i) => {
                    let tracked = &mut self.faces[i];
                    tracked.update_from(new_face);
                    tracked.matched = true;
                    tracked.frames_lost = 0;
                }
                None => {
                    let mut track = DetectionResult::new(new_face.bounds);
                    track.update_from(new_face);
                    track.matched = true;
                    if !self.push(track) {
                        break;
                    }
                }
            }
        }

        for face in &mut self.faces {
            if !face.matched {
                face.frames_lost += 1;
            }
        }
        self.faces.retain(|f| f.frames_lost <= max_frames_lost);
    }
}

impl<'a> IntoIterator for &'a DetectionResults {
    type Item = &'a DetectionResult;
    type IntoIter = std::slice::Iter<'a, DetectionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.faces.iter()
    }
}
