//! `DepthCamera` trait for RGB-D capture hardware.

use armsight_types::{ArmError, Point3, SyncedFrame};

/// An RGB-D camera that delivers colour and depth as one synchronised pair.
pub trait DepthCamera: Send {
    /// Stable identifier for this camera, e.g. `"d435_world"`.
    fn id(&self) -> &str;

    /// Capture the next colour + depth pair.
    ///
    /// Returns `Ok(None)` when no new frame is ready yet; that is routine and
    /// the caller simply tries again on its next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::HardwareFault`] if the device is disconnected or
    /// the frame buffers cannot be read.
    fn capture(&mut self) -> Result<Option<SyncedFrame>, ArmError>;

    /// Latest accelerometer reading in the camera frame, if the device has an
    /// IMU.  Used for tilt correction.
    fn gravity(&self) -> Option<Point3> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armsight_types::{ColorImage, DepthMap};
    use chrono::Utc;

    struct MockCamera {
        ticks: u32,
    }

    impl DepthCamera for MockCamera {
        fn id(&self) -> &str {
            "mock_rgbd"
        }

        fn capture(&mut self) -> Result<Option<SyncedFrame>, ArmError> {
            self.ticks += 1;
            if self.ticks % 2 == 1 {
                return Ok(None);
            }
            Ok(Some(SyncedFrame {
                color: ColorImage::filled(2, 2, [0, 0, 0]),
                depth: DepthMap::filled(2, 2, 0.5),
                pose: None,
                captured_at: Utc::now(),
            }))
        }
    }

    #[test]
    fn mock_camera_alternates_between_empty_and_ready() {
        let mut cam = MockCamera { ticks: 0 };
        assert_eq!(cam.id(), "mock_rgbd");
        assert!(cam.capture().unwrap().is_none());
        let frame = cam.capture().unwrap().unwrap();
        assert_eq!(frame.depth.get(1, 1), Some(0.5));
        assert!(cam.gravity().is_none());
    }
}
