//! Image containers handed from camera drivers to the perception pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArmError, SyncPose};

/// An RGB24 colour image in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl ColorImage {
    /// Wrap raw RGB24 bytes, checking the buffer length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ArmError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(ArmError::HardwareFault {
                component: "color_image".to_string(),
                details: format!("expected {expected} bytes, got {}", data.len()),
            });
        }
        Ok(Self { width, height, data })
    }

    /// A uniformly filled image.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, data }
    }

    /// Overwrite one pixel; out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, u: u32, v: u32, rgb: [u8; 3]) {
        if u < self.width && v < self.height {
            let i = (v as usize * self.width as usize + u as usize) * 3;
            self.data[i..i + 3].copy_from_slice(&rgb);
        }
    }

    /// ITU-R BT.601 luma of the pixel at `(u, v)`.
    pub fn luma(&self, u: u32, v: u32) -> f32 {
        let i = (v as usize * self.width as usize + u as usize) * 3;
        0.299 * self.data[i] as f32 + 0.587 * self.data[i + 1] as f32 + 0.114 * self.data[i + 2] as f32
    }
}

/// A depth image with one value per pixel, already converted to metres.
///
/// A value of `0.0` means "no return" as reported by most depth sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthMap {
    /// Wrap metre values, checking the buffer length.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, ArmError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(ArmError::HardwareFault {
                component: "depth_map".to_string(),
                details: format!("expected {expected} samples, got {}", data.len()),
            });
        }
        Ok(Self { width, height, data })
    }

    /// A depth map where every pixel reads `meters`.
    pub fn filled(width: u32, height: u32, meters: f32) -> Self {
        Self {
            width,
            height,
            data: vec![meters; width as usize * height as usize],
        }
    }

    /// Depth at `(u, v)` in metres, or `None` outside the image.
    pub fn get(&self, u: i64, v: i64) -> Option<f32> {
        if u < 0 || v < 0 || u >= self.width as i64 || v >= self.height as i64 {
            return None;
        }
        Some(self.data[v as usize * self.width as usize + u as usize])
    }

    /// Overwrite one sample; out-of-bounds writes are ignored.
    pub fn set(&mut self, u: u32, v: u32, meters: f32) {
        if u < self.width && v < self.height {
            let w = self.width as usize;
            self.data[v as usize * w + u as usize] = meters;
        }
    }
}

/// A colour + depth pair together with the end-effector pose captured at the
/// same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFrame {
    pub color: ColorImage,
    pub depth: DepthMap,
    /// `None` when the motion driver could not report a pose at capture time.
    pub pose: Option<SyncPose>,
    pub captured_at: DateTime<Utc>,
}
