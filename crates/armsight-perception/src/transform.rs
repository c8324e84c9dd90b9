//! Rigid transforms and fixed axis remappings between camera, end-effector,
//! and world frames.
//!
//! # Example
//!
//! ```rust
//! use armsight_perception::transform::{BasisChange, Transform3D};
//! use armsight_types::{Point3, Quaternion};
//!
//! // A point 10 cm in front of the wrist camera (view space looks down -Z).
//! let local = BasisChange::VIEW_TO_END_EFFECTOR.apply(Point3::new(0.0, 0.0, -10.0));
//! assert_eq!(local, Point3::new(0.0, 0.0, 10.0));
//!
//! let ee = Transform3D::new(Point3::new(20.0, 0.0, 15.0), Quaternion::identity());
//! assert_eq!(ee.apply(local), Point3::new(20.0, 0.0, 25.0));
//! ```

use armsight_types::{Point3, Quaternion};

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Point3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Point3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Point3::zero(), Quaternion::identity())
    }

    /// Map a point from frame B into frame A.
    pub fn apply(&self, p: Point3) -> Point3 {
        self.rotation.rotate(p).add(self.translation)
    }

    /// Compose two transforms: if `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        Self::new(translated, self.rotation.mul(other.rotation))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BasisChange
// ────────────────────────────────────────────────────────────────────────────

/// A fixed signed-permutation matrix that relabels axes between two frames
/// sharing an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasisChange {
    /// Row-major; each row has exactly one non-zero entry of ±1.
    pub rows: [[i8; 3]; 3],
}

impl BasisChange {
    /// OpenGL-style camera view axes (x right, y up, z toward the viewer) to
    /// the gripper's local frame, given how the wrist camera is bolted on:
    ///
    /// ```text
    /// local.x = -view.y
    /// local.y = -view.x
    /// local.z = -view.z
    /// ```
    pub const VIEW_TO_END_EFFECTOR: Self = Self {
        rows: [[0, -1, 0], [-1, 0, 0], [0, 0, -1]],
    };

    pub const IDENTITY: Self = Self {
        rows: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
    };

    pub fn apply(&self, p: Point3) -> Point3 {
        let row = |r: [i8; 3]| r[0] as f32 * p.x + r[1] as f32 * p.y + r[2] as f32 * p.z;
        Point3::new(row(self.rows[0]), row(self.rows[1]), row(self.rows[2]))
    }

    /// +1 for a right-handed relabelling, -1 for a mirror.
    pub fn determinant(&self) -> i8 {
        let m = self.rows;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }
}
