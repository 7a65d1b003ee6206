use std::hash::{Hash, Hasher};
use std::mem::discriminant;

use glam::Vec3;

use crate::components::Pose;

/// Geometry description for an interactable object's simulation
/// representation.
///
/// This is a closed set: backends match on it exhaustively, and new geometry
/// is added by extending the enum rather than by subclassing. Equality and
/// hashing are bitwise so that identical descriptions can share one pooled
/// backend handle.
#[derive(Debug, Clone)]
pub enum ShapeDescription {
    /// A sphere centred on the object origin
    Sphere {
        /// Sphere radius in metres
        radius: f32,
    },
    /// An axis-aligned box given as half extents
    Cuboid {
        /// Half extents along each local axis
        half_extents: Vec3,
    },
    /// A capsule along the local Y axis
    Capsule {
        /// Half the distance between the cap centres
        half_height: f32,
        /// Capsule radius
        radius: f32,
    },
    /// The convex hull of a point cloud
    ConvexHull {
        /// Points the hull is taken over, in local space
        points: Vec<Vec3>,
    },
    /// A compound of child shapes at local poses
    Compound {
        /// Child shapes with their local poses
        parts: Vec<(Pose, ShapeDescription)>,
    },
}

fn vec3_bits(v: Vec3) -> [u32; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

fn pose_bits(pose: &Pose) -> [u32; 7] {
    let r = pose.rotation;
    let t = pose.translation;
    [
        r.x.to_bits(),
        r.y.to_bits(),
        r.z.to_bits(),
        r.w.to_bits(),
        t.x.to_bits(),
        t.y.to_bits(),
        t.z.to_bits(),
    ]
}

impl PartialEq for ShapeDescription {
    fn eq(&self, other: &Self) -> bool {
        use ShapeDescription::*;
        match (self, other) {
            (Sphere { radius: a }, Sphere { radius: b }) => a.to_bits() == b.to_bits(),
            (Cuboid { half_extents: a }, Cuboid { half_extents: b }) => {
                vec3_bits(*a) == vec3_bits(*b)
            }
            (
                Capsule {
                    half_height: ah,
                    radius: ar,
                },
                Capsule {
                    half_height: bh,
                    radius: br,
                },
            ) => ah.to_bits() == bh.to_bits() && ar.to_bits() == br.to_bits(),
            (ConvexHull { points: a }, ConvexHull { points: b }) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(pa, pb)| vec3_bits(*pa) == vec3_bits(*pb))
            }
            (Compound { parts: a }, Compound { parts: b }) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((pose_a, shape_a), (pose_b, shape_b))| {
                        pose_bits(pose_a) == pose_bits(pose_b) && shape_a == shape_b
                    })
            }
            _ => false,
        }
    }
}

impl Eq for ShapeDescription {}

impl Hash for ShapeDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            ShapeDescription::Sphere { radius } => radius.to_bits().hash(state),
            ShapeDescription::Cuboid { half_extents } => vec3_bits(*half_extents).hash(state),
            ShapeDescription::Capsule {
                half_height,
                radius,
            } => {
                half_height.to_bits().hash(state);
                radius.to_bits().hash(state);
            }
            ShapeDescription::ConvexHull { points } => {
                points.len().hash(state);
                for point in points {
                    vec3_bits(*point).hash(state);
                }
            }
            ShapeDescription::Compound { parts } => {
                parts.len().hash(state);
                for (pose, shape) in parts {
                    pose_bits(pose).hash(state);
                    shape.hash(state);
                }
            }
        }
    }
}
