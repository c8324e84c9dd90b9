//! 2-D object detection seam.
//!
//! Real deployments plug a neural detector in behind [`ObjectDetector`].
//! [`ColorBlobDetector`] finds uniformly coloured objects and is enough for
//! synthetic scenes and calibration markers.

use armsight_types::{ColorImage, Detection};
use serde::{Deserialize, Serialize};

/// Produces the 2-D detections of one frame.
pub trait ObjectDetector: Send {
    fn detect(&mut self, image: &ColorImage) -> Vec<Detection>;
}

/// One class recognised by colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorClass {
    pub name: String,
    pub rgb: [u8; 3],
    /// Max per-channel absolute difference.
    pub tolerance: u8,
}

impl ColorClass {
    pub fn new(name: impl Into<String>, rgb: [u8; 3], tolerance: u8) -> Self {
        Self {
            name: name.into(),
            rgb,
            tolerance,
        }
    }

    fn matches(&self, px: &[u8]) -> bool {
        self.rgb
            .iter()
            .zip(px)
            .all(|(c, p)| c.abs_diff(*p) <= self.tolerance)
    }
}

/// Reports the bounding box of all pixels matching each class colour.
#[derive(Debug, Clone, Default)]
pub struct ColorBlobDetector {
    classes: Vec<ColorClass>,
    /// Blobs with fewer matching pixels are ignored.
    pub min_pixels: usize,
}

impl ColorBlobDetector {
    pub fn new(classes: Vec<ColorClass>) -> Self {
        Self {
            classes,
            min_pixels: 20,
        }
    }

    pub fn classes(&self) -> &[ColorClass] {
        &self.classes
    }
}

impl ObjectDetector for ColorBlobDetector {
    fn detect(&mut self, image: &ColorImage) -> Vec<Detection> {
        let mut out = Vec::new();
        for class in &self.classes {
            let mut count = 0usize;
            let (mut min_u, mut min_v) = (u32::MAX, u32::MAX);
            let (mut max_u, mut max_v) = (0u32, 0u32);

            for (i, px) in image.data.chunks_exact(3).enumerate() {
                if !class.matches(px) {
                    continue;
                }
                let u = (i % image.width as usize) as u32;
                let v = (i / image.width as usize) as u32;
                count += 1;
                min_u = min_u.min(u);
                min_v = min_v.min(v);
                max_u = max_u.max(u);
                max_v = max_v.max(v);
            }

            if count < self.min_pixels.max(1) {
                continue;
            }
            out.push(Detection {
                name: class.name.clone(),
                pixel_center: ((min_u + max_u) / 2, (min_v + max_v) / 2),
                bbox: (max_u - min_u + 1, max_v - min_v + 1),
            });
        }
        out
    }
}
