//! Least-squares rigid alignment of corresponding point sets.
//!
//! Given pairs `(local, world)` the solver finds the rotation and translation
//! minimising `Σ w·‖R·local + t − world‖²` — the Kabsch/Procrustes fit. The
//! grasp solve feeds it the contact points captured at grasp-begin against
//! the hand's current bone positions; the resulting transform is the pose
//! delta a grasped object should follow.

use glam::{Quat, Vec3};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Singular values below this fraction of the largest are treated as zero
/// when deciding whether the correspondences pin down a rotation.
const RANK_EPSILON: f64 = 1.0e-9;

/// An accumulating weighted rigid-fit solver.
///
/// One instance is meant to be reused across solves to avoid allocation:
/// call [`reset`](KabschSolver::reset), feed correspondences with
/// [`add_point`](KabschSolver::add_point), then [`solve`](KabschSolver::solve).
/// Accumulation happens in `f64` so repeated solves over jittering input stay
/// stable. Inputs are never mutated and solving is deterministic for
/// identical input order.
#[derive(Debug, Clone)]
pub struct KabschSolver {
    total_weight: f64,
    point_count: usize,
    local_sum: Vector3<f64>,
    world_sum: Vector3<f64>,
    cross_sum: Matrix3<f64>,
}

impl Default for KabschSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KabschSolver {
    /// Create an empty solver
    pub fn new() -> KabschSolver {
        KabschSolver {
            total_weight: 0.0,
            point_count: 0,
            local_sum: Vector3::zeros(),
            world_sum: Vector3::zeros(),
            cross_sum: Matrix3::zeros(),
        }
    }

    /// Clear all accumulated correspondences
    pub fn reset(&mut self) {
        *self = KabschSolver::new();
    }

    /// Number of correspondences accumulated since the last reset
    pub fn len(&self) -> usize {
        self.point_count
    }

    /// True if no correspondences have been accumulated
    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    /// Add one correspondence.
    ///
    /// `weight` scales this pair's influence; callers that trust all points
    /// equally pass `1.0`. Non-positive weights contribute nothing.
    pub fn add_point(&mut self, local: Vec3, world: Vec3, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let w = weight as f64;
        let l = Vector3::new(local.x as f64, local.y as f64, local.z as f64);
        let d = Vector3::new(world.x as f64, world.y as f64, world.z as f64);

        self.total_weight += w;
        self.point_count += 1;
        self.local_sum += w * l;
        self.world_sum += w * d;
        self.cross_sum += w * l * d.transpose();
    }

    /// Solve for the rigid transform mapping the local points onto the world
    /// points.
    ///
    /// Degenerate sets — no points, fewer than three, or points that do not
    /// pin down a rotation (collinear or coincident) — fall back to identity
    /// rotation with the weighted-centroid-difference translation. The solver
    /// never produces NaN.
    pub fn solve(&self) -> (Quat, Vec3) {
        if self.total_weight <= 0.0 {
            return (Quat::IDENTITY, Vec3::ZERO);
        }

        let local_centroid = self.local_sum / self.total_weight;
        let world_centroid = self.world_sum / self.total_weight;

        let rotation = if self.point_count >= 3 {
            let covariance =
                self.cross_sum - self.total_weight * local_centroid * world_centroid.transpose();
            best_rotation(&covariance)
        } else {
            None
        };

        match rotation {
            Some(r) => {
                let translation = world_centroid - r * local_centroid;
                (quat_from_na(&r), vec_from_na(&translation))
            }
            None => (
                Quat::IDENTITY,
                vec_from_na(&(world_centroid - local_centroid)),
            ),
        }
    }
}

/// The proper rotation maximising alignment for the given covariance, or
/// `None` when the covariance does not have the rank to determine one.
fn best_rotation(covariance: &Matrix3<f64>) -> Option<UnitQuaternion<f64>> {
    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // A rotation needs two independent directions; collinear point sets
    // leave an axis unconstrained.
    let largest = svd.singular_values.max();
    if largest <= 0.0 {
        return None;
    }
    let rank = svd
        .singular_values
        .iter()
        .filter(|s| **s > largest * RANK_EPSILON)
        .count();
    if rank < 2 {
        return None;
    }

    let mut rotation_matrix = v_t.transpose() * u.transpose();

    // det(R) = -1 means the fit found a reflection; flip the sign of the
    // last column of V to land back on a proper rotation.
    if rotation_matrix.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_matrix = v * u.transpose();
    }

    Some(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(rotation_matrix),
    ))
}

fn quat_from_na(q: &UnitQuaternion<f64>) -> Quat {
    let c = q.quaternion().coords;
    Quat::from_xyzw(c.x as f32, c.y as f32, c.z as f32, c.w as f32).normalize()
}

fn vec_from_na(v: &Vector3<f64>) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}
