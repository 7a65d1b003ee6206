use glam::Vec3;

use crate::{NUM_BONES, NUM_FINGERS};

/// A component that represents the "side" or "handedness" that a hand is on.
/// Classifier state is bucketed by this, never by hand id.
#[derive(Debug, PartialEq, Clone, Copy, Eq, PartialOrd, Ord)]
pub enum Handedness {
    /// Left hand side
    Left,
    /// Right hand side
    Right,
}

/// One segment of a tracked finger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bone {
    /// World position of the segment's end joint
    pub position: Vec3,
    /// World direction the segment points in
    pub direction: Vec3,
}

/// A tracked finger: tip data plus its four bone segments, knuckle to tip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Finger {
    /// World position of the fingertip
    pub tip_position: Vec3,
    /// World direction the finger points in
    pub direction: Vec3,
    /// Signed curl amount, supplied by the tracking source
    pub curl: f32,
    /// The finger's bone segments
    pub bones: [Bone; NUM_BONES],
}

/// A hand as reported by the tracking stream for a single frame.
///
/// Ids are assigned by the tracking source and may be reassigned when
/// tracking is lost and regained; never key long-lived state on them without
/// going through the manager's re-association logic.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    /// Tracking-source id
    pub id: u32,
    /// Which side this hand is on
    pub handedness: Handedness,
    /// The hand's fingers. The thumb is always the first slot.
    pub fingers: [Finger; NUM_FINGERS],
}

impl Hand {
    /// Shortcut helper to create a left hand with all fingers at the origin
    pub fn left(id: u32) -> Hand {
        Hand {
            id,
            handedness: Handedness::Left,
            fingers: Default::default(),
        }
    }

    /// Shortcut helper to create a right hand with all fingers at the origin
    pub fn right(id: u32) -> Hand {
        Hand {
            id,
            handedness: Handedness::Right,
            fingers: Default::default(),
        }
    }

    /// The thumb descriptor
    pub fn thumb(&self) -> &Finger {
        &self.fingers[0]
    }
}

/// One frame of the tracking stream: an ordered list of hands.
///
/// Hand order within the frame is the order they are processed in each tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Frame id, monotonically increasing at the tracking source
    pub id: u64,
    /// Timestamp in seconds on the tracking service's own clock
    pub timestamp: f64,
    /// The hands visible this frame
    pub hands: Vec<Hand>,
}
