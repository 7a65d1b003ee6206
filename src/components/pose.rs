use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A rigid transform: a rotation followed by a translation.
///
/// This is the pose representation that crosses every boundary in the crate:
/// objects report their pose with it, the simulation backend consumes it, and
/// the grasp solve produces target poses in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation component
    pub rotation: Quat,
    /// Translation component
    pub translation: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// The identity pose
    pub const IDENTITY: Pose = Pose {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };

    /// Create a pose from a rotation and a translation
    pub fn new(rotation: Quat, translation: Vec3) -> Pose {
        Pose {
            rotation,
            translation,
        }
    }

    /// Create a pose with no rotation
    pub fn from_translation(translation: Vec3) -> Pose {
        Pose {
            rotation: Quat::IDENTITY,
            translation,
        }
    }

    /// Transform a point from this pose's local space into world space
    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// Transform a world-space point into this pose's local space
    #[inline]
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.translation)
    }
}
