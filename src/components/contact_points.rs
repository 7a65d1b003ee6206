use glam::Vec3;

use crate::components::{Hand, Pose};
use crate::{NUM_BONES, NUM_FINGERS};

/// The set of object-local contact positions captured when a hand begins a
/// grasp. One slot per finger bone.
///
/// Captured once at grasp-begin and never recomputed: the solve keeps
/// targeting the same relative grip for the whole lifetime of the grasp.
#[derive(Debug, Clone)]
pub struct HandPointCollection {
    locals: [Vec3; NUM_FINGERS * NUM_BONES],
}

impl HandPointCollection {
    fn new() -> HandPointCollection {
        HandPointCollection {
            locals: [Vec3::ZERO; NUM_FINGERS * NUM_BONES],
        }
    }

    /// Capture the hand's bone joint positions in the object's local space.
    pub fn capture(&mut self, object_pose: &Pose, hand: &Hand) {
        for (f, finger) in hand.fingers.iter().enumerate() {
            for (b, bone) in finger.bones.iter().enumerate() {
                self.locals[index(f, b)] = object_pose.inverse_transform_point(bone.position);
            }
        }
    }

    /// The captured object-local position of a finger bone
    pub fn local_position(&self, finger: usize, bone: usize) -> Vec3 {
        self.locals[index(finger, bone)]
    }

    /// The captured position of a finger bone, back in world space at the
    /// given object pose
    pub fn world_position(&self, object_pose: &Pose, finger: usize, bone: usize) -> Vec3 {
        object_pose.transform_point(self.locals[index(finger, bone)])
    }
}

fn index(finger: usize, bone: usize) -> usize {
    finger * NUM_BONES + bone
}

/// Free list for contact point collections.
///
/// Grasps begin and end constantly, so collections are acquired at
/// grasp-begin and handed back on release or timeout. Ownership transfers
/// explicitly; in practice the pool holds about as many entries as there are
/// hands.
#[derive(Debug, Default)]
pub struct HandPointPool {
    free: Vec<HandPointCollection>,
}

impl HandPointPool {
    /// Take a collection from the pool, allocating only if the pool is empty
    pub fn acquire(&mut self) -> HandPointCollection {
        self.free.pop().unwrap_or_else(HandPointCollection::new)
    }

    /// Hand a collection back for reuse
    pub fn release(&mut self, collection: HandPointCollection) {
        self.free.push(collection);
    }
}
