//! Detector collaborator: face detection interface, per-face results and
//! identity tracking across frames.

pub mod detector;
pub mod kalman;
pub mod results;
pub mod synthetic;

pub use detector::{DetectImage, FaceDetector, MorphData, Triangulation};
pub use kalman::ScalarKalman;
pub use results::{DetectionResult, DetectionResults, MAX_FACES, NUM_LANDMARKS, Pose, Rect};
pub use synthetic::SyntheticDetector;
