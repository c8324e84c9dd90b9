//! Image sharpness, used by auto-focus and the confidence proxy.

use armsight_types::ColorImage;

/// Score reported by the simulated camera, which is always in focus.
pub const SIMULATED_FOCUS_SCORE: f32 = 100.0;

/// Variance of the 4-neighbour Laplacian over the grayscale image.
///
/// Higher is sharper. Images smaller than 3x3 score `0.0`.
pub fn laplacian_variance(image: &ColorImage) -> f32 {
    laplacian_variance_roi(image, (0, 0, image.width, image.height))
}

/// Same as [`laplacian_variance`] restricted to `(x, y, w, h)`, clipped to
/// the image.
pub fn laplacian_variance_roi(image: &ColorImage, roi: (u32, u32, u32, u32)) -> f32 {
    let (x0, y0, w, h) = roi;
    let x1 = x0.saturating_add(w).min(image.width);
    let y1 = y0.saturating_add(h).min(image.height);
    if x1 < x0 + 3 || y1 < y0 + 3 {
        return 0.0;
    }

    let mut values = Vec::with_capacity(((x1 - x0 - 2) * (y1 - y0 - 2)) as usize);
    for v in (y0 + 1)..(y1 - 1) {
        for u in (x0 + 1)..(x1 - 1) {
            let lap = image.luma(u - 1, v)
                + image.luma(u + 1, v)
                + image.luma(u, v - 1)
                + image.luma(u, v + 1)
                - 4.0 * image.luma(u, v);
            values.push(lap as f64);
        }
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    var as f32
}

/// Centred square-ish window covering `fraction` of each dimension.
pub fn centre_roi(width: u32, height: u32, fraction: f32) -> (u32, u32, u32, u32) {
    let f = fraction.clamp(0.0, 1.0);
    let w = (width as f32 * f) as u32;
    let h = (height as f32 * f) as u32;
    ((width - w) / 2, (height - h) / 2, w, h)
}
