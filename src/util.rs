use glam::{Quat, Vec3};
use rapier3d::na;

use crate::components::Pose;

#[inline]
/// Convert a [`Pose`] into a [`rapier3d::na::Isometry3`]
pub fn isometry_from_pose(pose: &Pose) -> na::Isometry3<f32> {
    let r = pose.rotation;
    let t = pose.translation;
    let translation = na::Translation3::new(t.x, t.y, t.z);

    let rotation: na::UnitQuaternion<f32> =
        na::UnitQuaternion::new_unchecked([r.x, r.y, r.z, r.w].into());

    na::Isometry3::from_parts(translation, rotation)
}

#[inline]
/// Decompose a [`rapier3d::na::Isometry3`] into a [`Pose`]
pub fn pose_from_isometry(i: &na::Isometry3<f32>) -> Pose {
    Pose {
        rotation: Quat::from_array(i.rotation.quaternion().coords.data.0[0]),
        translation: glam_vec_from_na(&i.translation.vector),
    }
}

#[inline]
/// Convert a [`glam::Vec3`] into a [`rapier3d::na::Vector3`]
pub fn na_vector_from_glam(v: Vec3) -> na::Vector3<f32> {
    [v.x, v.y, v.z].into()
}

#[inline]
/// Convert a [`rapier3d::na::Vector3`] into a [`glam::Vec3`]
pub fn glam_vec_from_na(v: &na::Vector3<f32>) -> Vec3 {
    [v.x, v.y, v.z].into()
}

#[inline]
/// Convert a [`glam::Vec3`] into a [`rapier3d::na::Point3`]
pub fn na_point_from_glam(v: Vec3) -> na::Point3<f32> {
    na::Point3::new(v.x, v.y, v.z)
}

/// Interpolate between two poses
pub fn lerp_slerp(a: &Pose, b: &Pose, s: f32) -> Pose {
    Pose {
        rotation: a.rotation.slerp(b.rotation, s),
        translation: a.translation.lerp(b.translation, s),
    }
}
