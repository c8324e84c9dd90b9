//! Robust object depth from a bounding box.
//!
//! Convex objects show their near surface to the sensor, so the median of
//! the visible samples sits in front of the grasp centre.  Adding one
//! standard deviation pushes the estimate back toward the volumetric centre:
//! flat objects have almost no spread, round ones get a larger correction.
//!
//! ```text
//! bbox ┌──────────────┐   margin = 30 % of the box on each side
//!      │   ┌──────┐   │   only the inner 40 % is sampled
//!      │   │ ROI  │   │
//!      │   └──────┘   │   depth = median(valid) + std(valid)
//!      └──────────────┘
//! ```

use armsight_types::DepthMap;

/// Extracts a single metres-depth per detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSampler {
    /// Fraction of the box trimmed from every side before sampling.
    pub roi_margin: f32,
    /// Samples must be strictly above this (metres).
    pub min_depth: f32,
    /// Samples must be strictly below this (metres).
    pub max_depth: f32,
}

impl Default for DepthSampler {
    fn default() -> Self {
        Self {
            roi_margin: 0.3,
            min_depth: 0.1,
            max_depth: 3.0,
        }
    }
}

impl DepthSampler {
    /// Estimate the depth of the object whose box is centred at `center`
    /// with size `bbox`, both in pixels.
    ///
    /// Falls back to the raw centre pixel when the ROI holds no sample in
    /// range.  Returns `None` when the final value is not above
    /// [`min_depth`](Self::min_depth); the detection should then be dropped.
    pub fn sample(&self, depth: &DepthMap, center: (u32, u32), bbox: (u32, u32)) -> Option<f32> {
        let valid = self.roi_samples(depth, center, bbox);

        let estimate = if valid.is_empty() {
            depth.get(center.0 as i64, center.1 as i64).unwrap_or(0.0)
        } else {
            let (median, std) = median_and_std(valid);
            (median + std) as f32
        };

        (estimate.is_finite() && estimate > self.min_depth).then_some(estimate)
    }

    fn roi_samples(&self, depth: &DepthMap, center: (u32, u32), bbox: (u32, u32)) -> Vec<f64> {
        let (u, v) = (center.0 as i64, center.1 as i64);
        let (w, h) = (bbox.0 as i64, bbox.1 as i64);
        let margin_w = (bbox.0 as f32 * self.roi_margin) as i64;
        let margin_h = (bbox.1 as f32 * self.roi_margin) as i64;

        let u_min = (u - w / 2 + margin_w).max(0);
        let u_max = (u + w / 2 - margin_w).min(depth.width as i64);
        let v_min = (v - h / 2 + margin_h).max(0);
        let v_max = (v + h / 2 - margin_h).min(depth.height as i64);

        let mut samples = Vec::new();
        for row in v_min..v_max {
            for col in u_min..u_max {
                if let Some(d) = depth.get(col, row)
                    && d > self.min_depth
                    && d < self.max_depth
                {
                    samples.push(d as f64);
                }
            }
        }
        samples
    }
}

/// Median (mean of the middle pair for even counts) and population
/// standard deviation.  `values` must be non-empty.
fn median_and_std(mut values: Vec<f64>) -> (f64, f64) {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    (median, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100x100 map with a 20x20 box at (50, 50).  The sampled ROI is the
    /// 8x8 block `[46, 54)` on both axes.
    fn scene(roi_fill: impl Fn(u32, u32) -> f32) -> DepthMap {
        let mut map = DepthMap::filled(100, 100, 5.0);
        for v in 40..60 {
            for u in 40..60 {
                // Rim of the box: inside the bbox but outside the ROI.
                map.set(u, v, 0.2);
            }
        }
        for v in 46..54 {
            for u in 46..54 {
                map.set(u, v, roi_fill(u, v));
            }
        }
        map
    }

    #[test]
    fn estimate_is_median_plus_population_std() {
        let map = scene(|u, _| if u % 2 == 0 { 0.5 } else { 0.7 });
        let d = DepthSampler::default().sample(&map, (50, 50), (20, 20)).unwrap();
        // 32 x 0.5 and 32 x 0.7: median 0.6, std 0.1
        assert!((d - 0.7).abs() < 1e-5, "got {d}");
    }

    #[test]
    fn flat_patch_has_no_spread() {
        let map = scene(|_, _| 0.42);
        let d = DepthSampler::default().sample(&map, (50, 50), (20, 20)).unwrap();
        assert!((d - 0.42).abs() < 1e-6);
    }

    #[test]
    fn odd_count_uses_middle_sample() {
        let (median, std) = median_and_std(vec![3.0, 1.0, 2.0]);
        assert!((median - 2.0).abs() < 1e-12);
        assert!((std - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_roi_falls_back_to_centre_pixel() {
        let map = scene(|_, _| 3.5);
        let d = DepthSampler::default().sample(&map, (50, 50), (20, 20)).unwrap();
        assert!((d - 3.5).abs() < 1e-6);
    }

    #[test]
    fn all_invalid_patch_is_dropped() {
        let map = scene(|_, _| 0.0);
        assert!(DepthSampler::default().sample(&map, (50, 50), (20, 20)).is_none());
    }

    #[test]
    fn box_clipped_at_image_edge_still_samples() {
        let map = DepthMap::filled(10, 10, 0.8);
        let d = DepthSampler::default().sample(&map, (0, 0), (10, 10)).unwrap();
        assert!((d - 0.8).abs() < 1e-6);
    }

    #[test]
    fn tiny_box_uses_centre_pixel() {
        let mut map = DepthMap::filled(10, 10, 0.0);
        map.set(5, 5, 0.9);
        // 1x1 box: margin 0, half 0, so the ROI is empty.
        let d = DepthSampler::default().sample(&map, (5, 5), (1, 1)).unwrap();
        assert!((d - 0.9).abs() < 1e-6);
    }
}
