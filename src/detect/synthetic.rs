//! Brightness-blob detector
//!
//! Treats every connected region of bright luma pixels as a face. Good enough
//! to drive the whole pipeline from synthetic video without a vision stack.

use std::f32::consts::TAU;

use glam::{Quat, Vec2, Vec3};
use log::trace;

use super::detector::{DetectImage, FaceDetector, MorphData, Triangulation};
use super::results::{DetectionResult, DetectionResults, Rect, NUM_LANDMARKS};
use crate::error::{MaskError, Result};

#[derive(Debug, Clone)]
pub struct SyntheticDetector {
    threshold: u8,
    min_area: usize,
    frame_size: Option<(u32, u32)>,
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self::new(200, 4)
    }
}

impl SyntheticDetector {
    pub fn new(threshold: u8, min_area: usize) -> Self {
        Self { threshold, min_area, frame_size: None }
    }

    /// Bounding boxes of 4-connected bright regions, in scan order.
    fn blobs(&self, image: &DetectImage) -> Vec<Rect> {
        let (w, h) = (image.width as usize, image.height as usize);
        let mut seen = vec![false; w * h];
        let mut found = Vec::new();
        let mut stack = Vec::new();

        for start in 0..w * h {
            if seen[start] || image.pixels[start] < self.threshold {
                continue;
            }
            seen[start] = true;
            stack.push(start);
            let (mut l, mut t, mut r, mut b) = (usize::MAX, usize::MAX, 0, 0);
            let mut area = 0;

            while let Some(i) = stack.pop() {
                let (x, y) = (i % w, i / w);
                l = l.min(x);
                t = t.min(y);
                r = r.max(x);
                b = b.max(y);
                area += 1;

                let mut visit = |j: usize| {
                    if !seen[j] && image.pixels[j] >= self.threshold {
                        seen[j] = true;
                        stack.push(j);
                    }
                };
                if x > 0 {
                    visit(i - 1);
                }
                if x + 1 < w {
                    visit(i + 1);
                }
                if y > 0 {
                    visit(i - w);
                }
                if y + 1 < h {
                    visit(i + w);
                }
            }

            if area >= self.min_area {
                found.push(Rect::new(l as i32, t as i32, r as i32 + 1, b as i32 + 1));
            }
        }
        found
    }
}

impl FaceDetector for SyntheticDetector {
    fn detect(&mut self, image: &DetectImage) -> Result<DetectionResults> {
        if image.pixels.len() != (image.width * image.height) as usize {
            return Err(MaskError::Detector(format!(
                "image buffer {} bytes does not match {}x{}",
                image.pixels.len(),
                image.width,
                image.height
            )));
        }
        self.frame_size = Some((image.width, image.height));

        let mut faces = DetectionResults::new();
        for rect in self.blobs(image) {
            if !faces.push(DetectionResult::new(rect)) {
                break;
            }
        }
        trace!("SyntheticDetector: {} face(s)", faces.len());
        Ok(faces)
    }

    fn landmarks(&mut self, _image: &DetectImage, faces: &mut DetectionResults) -> Result<()> {
        for face in faces.iter_mut() {
            let center = face.bounds.center();
            let radius = Vec2::new(face.bounds.width() as f32, face.bounds.height() as f32) * 0.5;
            face.landmarks = (0..NUM_LANDMARKS)
                .map(|i| {
                    let a = i as f32 / NUM_LANDMARKS as f32 * TAU;
                    center + Vec2::new(a.cos(), a.sin()) * radius
                })
                .collect();
        }
        Ok(())
    }

    fn pose(&mut self, faces: &mut DetectionResults) -> Result<()> {
        let Some((w, h)) = self.frame_size else {
            return Err(MaskError::Detector("pose requested before detect".into()));
        };
        for face in faces.iter_mut() {
            let c = face.bounds.center();
            let size = face.bounds.width().max(1) as f32 / w as f32;
            face.pose.rotation = Quat::IDENTITY;
            face.pose.translation = Vec3::new(
                c.x / w as f32 * 2.0 - 1.0,
                1.0 - c.y / h as f32 * 2.0,
                -1.0 / size,
            );
        }
        Ok(())
    }

    fn triangulate(
        &mut self,
        morph: &MorphData,
        faces: &DetectionResults,
        build_lines: bool,
    ) -> Result<Triangulation> {
        let mut tri = Triangulation::default();
        let mut lines = Vec::new();

        for face in faces {
            if face.landmarks.is_empty() {
                continue;
            }
            let base = tri.vertices.len() as u32;
            let center = face.bounds.center();
            tri.vertices.push(center.extend(0.0));

            let use_deltas = morph.is_valid() && morph.deltas.len() == face.landmarks.len();
            for (i, p) in face.landmarks.iter().enumerate() {
                let offset = if use_deltas { morph.deltas[i] } else { Vec3::ZERO };
                tri.vertices.push(p.extend(0.0) + offset);
            }

            // Fan around the center vertex
            let ring = face.landmarks.len() as u32;
            for i in 0..ring {
                let a = base + 1 + i;
                let b = base + 1 + (i + 1) % ring;
                tri.indices.extend_from_slice(&[base, a, b]);
                if build_lines {
                    lines.extend_from_slice(&[a, b]);
                }
            }
        }

        if build_lines {
            tri.lines = Some(lines);
        }
        Ok(tri)
    }

    fn reset(&mut self) {
        self.frame_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Black image with bright squares at the given top-left corners.
    fn image_with_squares(w: u32, h: u32, squares: &[(u32, u32)], side: u32) -> DetectImage {
        let mut pixels = vec![0u8; (w * h) as usize];
        for &(sx, sy) in squares {
            for y in sy..sy + side {
                for x in sx..sx + side {
                    pixels[(y * w + x) as usize] = 255;
                }
            }
        }
        DetectImage::new(w, h, pixels)
    }

    #[test]
    fn test_finds_each_blob() {
        let mut det = SyntheticDetector::default();
        let img = image_with_squares(64, 32, &[(4, 4), (40, 10)], 6);
        let faces = det.detect(&img).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces.get(0).unwrap().bounds, Rect::new(4, 4, 10, 10));
        assert_eq!(faces.get(1).unwrap().bounds, Rect::new(40, 10, 46, 16));
    }

    #[test]
    fn test_ignores_specks() {
        let mut det = SyntheticDetector::new(200, 10);
        let img = image_with_squares(16, 16, &[(2, 2)], 2);
        assert!(det.detect(&img).unwrap().is_empty());
    }

    #[test]
    fn test_full_pipeline_produces_mesh() {
        let mut det = SyntheticDetector::default();
        let img = image_with_squares(32, 32, &[(8, 8)], 8);
        let mut faces = det.detect(&img).unwrap();
        det.landmarks(&img, &mut faces).unwrap();
        det.pose(&mut faces).unwrap();

        let face = faces.get(0).unwrap();
        assert_eq!(face.landmarks.len(), NUM_LANDMARKS);
        assert!(face.pose.is_valid());

        let tri = det.triangulate(&MorphData::default(), &faces, true).unwrap();
        assert_eq!(tri.vertices.len(), NUM_LANDMARKS + 1);
        assert_eq!(tri.indices.len(), NUM_LANDMARKS * 3);
        assert_eq!(tri.lines.as_ref().map(Vec::len), Some(NUM_LANDMARKS * 2));
    }

    #[test]
    fn test_morph_deltas_offset_vertices() {
        let mut det = SyntheticDetector::default();
        let img = image_with_squares(32, 32, &[(8, 8)], 8);
        let mut faces = det.detect(&img).unwrap();
        det.landmarks(&img, &mut faces).unwrap();

        let morph = MorphData::new(1, vec![Vec3::Z; NUM_LANDMARKS]);
        let tri = det.triangulate(&morph, &faces, false).unwrap();
        assert!(tri.vertices[1..].iter().all(|v| v.z == 1.0));
        assert!(tri.lines.is_none());
    }

    #[test]
    fn test_pose_before_detect_fails() {
        let mut det = SyntheticDetector::default();
        let mut faces = DetectionResults::new();
        assert!(det.pose(&mut faces).is_err());
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let mut det = SyntheticDetector::default();
        let img = DetectImage::new(4, 4, vec![0; 3]);
        assert!(det.detect(&img).is_err());
    }
}
