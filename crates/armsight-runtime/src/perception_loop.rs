//! [`PerceptionLoop`] – the producer side of the perception snapshot.
//!
//! Each tick:
//!
//! 1. **Capture** – pull one synchronised colour + depth pair.  No frame yet
//!    is routine and the tick is skipped; a capture error is logged and the
//!    loop keeps going.
//! 2. **Detect** – run the [`ObjectDetector`] on the colour image.
//! 3. **Refine** – lift detections to the robot base through the
//!    [`CoordinateBridge`], feeding the camera IMU into tilt correction.
//! 4. **Score** – compute the focus score.
//! 5. **Publish** – atomically replace the [`PerceptionHub`] snapshot and
//!    emit a `PerceptionUpdate` event.
//!
//! [`PerceptionLoop::spawn`] runs the ticks on a dedicated thread at a fixed
//! interval until the returned [`PerceptionHandle`] is stopped or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use armsight_hal::DepthCamera;
use armsight_middleware::{EventBus, PerceptionHub, PerceptionSnapshot, Topic};
use armsight_perception::focus::{SIMULATED_FOCUS_SCORE, centre_roi, laplacian_variance_roi};
use armsight_perception::{CoordinateBridge, ObjectDetector};
use armsight_types::{ArmError, ColorImage, DeploymentMode, Event, EventPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

const EVENT_SOURCE: &str = "armsight-runtime::perception";

/// How the focus score of a frame is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Fixed score; the simulated camera is always sharp.
    Constant(f32),
    /// Laplacian variance over a centred window covering `roi_fraction` of
    /// each image dimension.
    Laplacian { roi_fraction: f32 },
}

impl FocusMode {
    pub fn for_deployment(mode: DeploymentMode) -> Self {
        match mode {
            DeploymentMode::Simulation => FocusMode::Constant(SIMULATED_FOCUS_SCORE),
            DeploymentMode::Hardware => FocusMode::Laplacian { roi_fraction: 0.5 },
        }
    }

    pub fn score(&self, image: &ColorImage) -> f32 {
        match *self {
            FocusMode::Constant(score) => score,
            FocusMode::Laplacian { roi_fraction } => {
                laplacian_variance_roi(image, centre_roi(image.width, image.height, roi_fraction))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerceptionLoopConfig {
    pub interval_ms: u64,
    pub focus: FocusMode,
}

impl Default for PerceptionLoopConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            focus: FocusMode::for_deployment(DeploymentMode::Simulation),
        }
    }
}

/// Camera → detector → bridge → snapshot pipeline.
pub struct PerceptionLoop {
    config: PerceptionLoopConfig,
    camera: Box<dyn DepthCamera>,
    detector: Box<dyn ObjectDetector>,
    bridge: CoordinateBridge,
    hub: PerceptionHub,
    bus: Option<EventBus>,
}

impl PerceptionLoop {
    pub fn new(
        config: PerceptionLoopConfig,
        camera: Box<dyn DepthCamera>,
        detector: Box<dyn ObjectDetector>,
        bridge: CoordinateBridge,
        hub: PerceptionHub,
    ) -> Self {
        Self {
            config,
            camera,
            detector,
            bridge,
            hub,
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn bridge_mut(&mut self) -> &mut CoordinateBridge {
        &mut self.bridge
    }

    /// Run one capture-to-publish cycle.
    ///
    /// Returns the published sequence number, or `None` when the camera had
    /// no frame ready.
    ///
    /// # Errors
    ///
    /// Propagates capture failures from the camera.
    pub fn tick(&mut self) -> Result<Option<u64>, ArmError> {
        let Some(frame) = self.camera.capture()? else {
            return Ok(None);
        };

        if let Some(accel) = self.camera.gravity() {
            let source = self.bridge.source();
            self.bridge.projector_mut(source).set_gravity(accel);
        }

        let detections = self.detector.detect(&frame.color);
        let refined = self.bridge.refine(&detections, &frame.depth, frame.pose);
        let focus_score = self.config.focus.score(&frame.color);
        let source = self.bridge.source();
        debug!(
            detected = detections.len(),
            refined = refined.len(),
            focus_score,
            "perception tick"
        );

        let count = refined.len();
        let mut snapshot = PerceptionSnapshot::new(refined, focus_score, source);
        snapshot.captured_at = frame.captured_at;
        let sequence = self.hub.publish(snapshot);

        if let Some(bus) = &self.bus {
            let event = Event::new(
                EVENT_SOURCE,
                EventPayload::PerceptionUpdate {
                    source,
                    detections: count,
                    focus_score,
                },
            );
            // Nobody listening is fine.
            let _ = bus.publish_to(Topic::Perception, event);
        }
        Ok(Some(sequence))
    }

    /// Move the loop onto its own thread.
    pub fn spawn(mut self) -> PerceptionHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        let camera_id = self.camera.id().to_string();

        let join = thread::spawn(move || {
            info!(camera = %camera_id, interval_ms = interval.as_millis() as u64, "perception loop started");
            while !flag.load(Ordering::SeqCst) {
                let started = Instant::now();
                if let Err(e) = self.tick() {
                    error!(camera = %camera_id, error = %e, "perception tick failed");
                }
                let elapsed = started.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                } else {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "perception tick overran interval");
                }
            }
            info!(camera = %camera_id, "perception loop stopped");
        });

        PerceptionHandle {
            stop,
            join: Some(join),
        }
    }
}

/// Owner of a running [`PerceptionLoop`] thread.  Dropping it stops the
/// loop and waits for the thread.
pub struct PerceptionHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PerceptionHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            error!("perception thread panicked");
        }
    }
}

impl Drop for PerceptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armsight_perception::{BridgeConfig, ColorBlobDetector, ColorClass, ProjectionFrame, Projector};
    use armsight_types::{DepthMap, Point3, SyncedFrame};
    use chrono::Utc;
    use std::sync::Mutex;

    /// World-frame projector that reports `(u, v, depth_cm)`.
    struct PixelProjector {
        gravity: Arc<Mutex<Option<Point3>>>,
    }

    impl Projector for PixelProjector {
        fn frame(&self) -> ProjectionFrame {
            ProjectionFrame::World
        }
        fn pixel_to_3d(&mut self, _: &str, u: f32, v: f32, d: f32) -> Option<Point3> {
            Some(Point3::new(u, v, d * 100.0))
        }
        fn pixel_to_view(&self, u: f32, v: f32, d: f32) -> Point3 {
            Point3::new(u, v, -d * 100.0)
        }
        fn reset_filters(&mut self) {}
        fn set_gravity(&mut self, accel: Point3) {
            if let Ok(mut g) = self.gravity.lock() {
                *g = Some(accel);
            }
        }
    }

    /// Camera returning `None`, then an error, then a red square forever.
    struct ScriptedCamera {
        calls: u32,
    }

    impl DepthCamera for ScriptedCamera {
        fn id(&self) -> &str {
            "scripted"
        }
        fn capture(&mut self) -> Result<Option<SyncedFrame>, ArmError> {
            self.calls += 1;
            match self.calls {
                1 => Ok(None),
                2 => Err(ArmError::HardwareFault {
                    component: "scripted".into(),
                    details: "usb reset".into(),
                }),
                _ => {
                    let mut color = ColorImage::filled(40, 40, [0, 0, 0]);
                    for v in 10..20 {
                        for u in 10..20 {
                            color.set_pixel(u, v, [255, 0, 0]);
                        }
                    }
                    Ok(Some(SyncedFrame {
                        color,
                        depth: DepthMap::filled(40, 40, 0.5),
                        pose: None,
                        captured_at: Utc::now(),
                    }))
                }
            }
        }
        fn gravity(&self) -> Option<Point3> {
            Some(Point3::new(0.0, 9.8, 0.0))
        }
    }

    fn pipeline(hub: PerceptionHub) -> (PerceptionLoop, Arc<Mutex<Option<Point3>>>) {
        let gravity = Arc::new(Mutex::new(None));
        let world = Box::new(PixelProjector { gravity: gravity.clone() });
        let wrist = Box::new(PixelProjector {
            gravity: Arc::new(Mutex::new(None)),
        });
        let bridge = CoordinateBridge::new(BridgeConfig::default(), world, wrist);
        let detector = ColorBlobDetector::new(vec![ColorClass::new("bottle", [255, 0, 0], 10)]);
        let config = PerceptionLoopConfig {
            interval_ms: 5,
            focus: FocusMode::Constant(42.0),
        };
        let lp = PerceptionLoop::new(
            config,
            Box::new(ScriptedCamera { calls: 0 }),
            Box::new(detector),
            bridge,
            hub,
        );
        (lp, gravity)
    }

    #[test]
    fn tick_skips_missing_frames_and_surfaces_errors() {
        let hub = PerceptionHub::new();
        let (mut lp, _) = pipeline(hub.clone());
        assert_eq!(lp.tick().unwrap(), None);
        assert!(lp.tick().is_err());
        assert_eq!(hub.latest().sequence, 0);
    }

    #[test]
    fn tick_publishes_refined_detections() {
        let hub = PerceptionHub::new();
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Perception);
        let (lp, gravity) = pipeline(hub.clone());
        let mut lp = lp.with_bus(bus);
        let _ = lp.tick();
        let _ = lp.tick();
        assert_eq!(lp.tick().unwrap(), Some(1));

        let snap = hub.latest();
        assert_eq!(snap.focus_score, 42.0);
        let bottle = snap.find("bottle").expect("bottle refined");
        assert_eq!(bottle.pixel_center, (14, 14));
        assert!(bottle.position.z > 0.0);
        assert_eq!(*gravity.lock().unwrap(), Some(Point3::new(0.0, 9.8, 0.0)));

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::PerceptionUpdate { detections: 1, .. }
        ));
    }

    #[test]
    fn spawned_loop_keeps_running_past_errors_and_stops() {
        let hub = PerceptionHub::new();
        let (lp, _) = pipeline(hub.clone());
        let handle = lp.spawn();
        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.latest().sequence < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(hub.latest().sequence >= 3);
        assert!(handle.is_running());
        handle.stop();
        let seq = hub.latest().sequence;
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hub.latest().sequence, seq);
    }

    #[test]
    fn laplacian_focus_prefers_texture() {
        let flat = ColorImage::filled(20, 20, [128, 128, 128]);
        let mut checker = flat.clone();
        for v in 0..20 {
            for u in 0..20 {
                if (u + v) % 2 == 0 {
                    checker.set_pixel(u, v, [255, 255, 255]);
                }
            }
        }
        let mode = FocusMode::Laplacian { roi_fraction: 0.5 };
        assert_eq!(mode.score(&flat), 0.0);
        assert!(mode.score(&checker) > 100.0);
        assert_eq!(FocusMode::for_deployment(DeploymentMode::Simulation).score(&flat), 100.0);
    }
}
