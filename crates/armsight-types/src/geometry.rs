//! Small fixed-size geometry primitives shared by every layer.
//!
//! Positions are expressed in centimetres unless a field says otherwise.

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Point3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D point or displacement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f32 {
        self.sub(other).norm()
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_squared(self, other: Self) -> f32 {
        let d = self.sub(other);
        d.dot(d)
    }

    /// Distance measured in the horizontal (x, y) plane only.
    pub fn horizontal_distance(self, other: Self) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Round every component to `decimals` places.
    pub fn rounded(self, decimals: i32) -> Self {
        let f = 10f32.powi(decimals);
        Self::new(
            (self.x * f).round() / f,
            (self.y * f).round() / f,
            (self.z * f).round() / f,
        )
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Build from the `[x, y, z, w]` ordering most simulators and pose
    /// messages use.
    pub const fn from_xyzw(xyzw: [f32; 4]) -> Self {
        Self::new(xyzw[3], xyzw[0], xyzw[1], xyzw[2])
    }

    /// The identity rotation.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Point3) -> Point3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Point3::new(rotated.x, rotated.y, rotated.z)
    }

    /// `true` when every component is within `eps` of the identity rotation.
    pub fn is_identity(self, eps: f32) -> bool {
        self.x.abs() < eps && self.y.abs() < eps && self.z.abs() < eps && (self.w - 1.0).abs() < eps
    }

    /// `true` when the quaternion carries no usable orientation: either the
    /// exact identity a driver reports when it has no IMU/kinematics data,
    /// or the all-zero value of an uninitialised message.
    pub fn is_degenerate(self) -> bool {
        let all_zero = self.w == 0.0 && self.x == 0.0 && self.y == 0.0 && self.z == 0.0;
        all_zero || self.is_identity(1e-4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    #[test]
    fn horizontal_distance_ignores_z() {
        let a = Point3::new(3.0, 4.0, 100.0);
        assert!((a.horizontal_distance(Point3::zero()) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn rounded_keeps_two_decimals() {
        let p = Point3::new(1.23456, -7.891, 0.005).rounded(2);
        assert!((p.x - 1.23).abs() < 1e-6);
        assert!((p.y + 7.89).abs() < 1e-6);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Point3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < 1e-5, "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < 1e-5);
    }

    #[test]
    fn from_xyzw_reorders_components() {
        let q = Quaternion::from_xyzw([0.1, 0.2, 0.3, 0.9]);
        assert_eq!(q, Quaternion::new(0.9, 0.1, 0.2, 0.3));
    }

    #[test]
    fn degenerate_detection() {
        assert!(Quaternion::identity().is_degenerate());
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).is_degenerate());
        assert!(!Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2).is_degenerate());
    }
}
