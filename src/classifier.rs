//! Heuristic grab classification.
//!
//! Turns per-finger proximity and curl into a discrete "is this hand
//! grasping this object" verdict, with enough hysteresis that a momentarily
//! loosened grip does not flicker between grasp and release. Classification
//! is reported up to the orchestrator, never applied here.

use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::backend::InstanceHandle;
use crate::components::{Hand, Handedness};
use crate::NUM_FINGERS;

/// Tunable thresholds for the grab heuristic.
///
/// The thumb gets its own radius and stickiness: it opposes the other
/// fingers, so a looser bound keeps grips from dropping while the thumb rolls
/// across the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierParameters {
    /// Extra reach, in metres, a non-thumb probe keeps while it is inside
    pub finger_stickiness: f32,
    /// Extra reach the thumb probe keeps while it is inside
    pub thumb_stickiness: f32,
    /// Upper bound on finger curl for a grasping finger
    pub max_curl: f32,
    /// Lower bound on finger curl for a grasping finger
    pub min_curl: f32,
    /// Contact radius for non-thumb fingertips, in metres
    pub finger_radius: f32,
    /// Contact radius for the thumb tip, in metres
    pub thumb_radius: f32,
    /// Seconds after a release during which the same pair may not re-grasp
    pub grab_cooldown: f32,
}

impl Default for ClassifierParameters {
    fn default() -> Self {
        ClassifierParameters {
            finger_stickiness: 0.0,
            thumb_stickiness: 0.05,
            max_curl: 0.65,
            min_curl: -0.1,
            finger_radius: 0.01,
            thumb_radius: 0.015,
            grab_cooldown: 0.2,
        }
    }
}

/// Per (handedness, object) classifier state. Created lazily on the first
/// evaluation of a pair, dropped when the object's instance is forgotten.
#[derive(Debug, Clone)]
struct PairState {
    probe_inside: [bool; NUM_FINGERS],
    prev_grabbing: bool,
    cooldown: f32,
}

impl PairState {
    fn new(params: &ClassifierParameters) -> PairState {
        PairState {
            probe_inside: [false; NUM_FINGERS],
            prev_grabbing: false,
            // Starts expired so a fresh pair may grasp immediately.
            cooldown: params.grab_cooldown,
        }
    }
}

/// The grab classifier.
///
/// Keeps one state bucket per handedness so left and right hands never share
/// hysteresis or cooldowns, keyed by the object's stable instance handle.
/// The classifier performs no geometry itself: proximity comes in through an
/// opaque oracle supplied per evaluation.
#[derive(Debug, Default)]
pub struct GrabClassifier {
    params: ClassifierParameters,
    left: HashMap<InstanceHandle, PairState>,
    right: HashMap<InstanceHandle, PairState>,
}

impl GrabClassifier {
    /// Create a classifier with the given thresholds
    pub fn new(params: ClassifierParameters) -> GrabClassifier {
        GrabClassifier {
            params,
            left: HashMap::new(),
            right: HashMap::new(),
        }
    }

    /// The current thresholds
    pub fn params(&self) -> &ClassifierParameters {
        &self.params
    }

    /// Replace the thresholds. Existing pair state is kept.
    pub fn set_params(&mut self, params: ClassifierParameters) {
        self.params = params;
    }

    /// Evaluate one hand/object pair.
    ///
    /// `within` is the proximity oracle: it answers whether the candidate
    /// object is within `radius` metres of `point`. `dt` advances this
    /// pair's cooldown.
    pub fn evaluate(
        &mut self,
        hand: &Hand,
        instance: InstanceHandle,
        dt: f32,
        mut within: impl FnMut(Vec3, f32) -> bool,
    ) -> bool {
        let params = self.params;
        let state = self
            .bucket_mut(hand.handedness)
            .entry(instance)
            .or_insert_with(|| PairState::new(&params));

        for (i, finger) in hand.fingers.iter().enumerate() {
            let (radius, stickiness) = if i == 0 {
                (params.thumb_radius, params.thumb_stickiness)
            } else {
                (params.finger_radius, params.finger_stickiness)
            };
            // A probe that was inside keeps its stickiness margin, so a
            // slight separation does not immediately flip the verdict.
            let reach = if state.probe_inside[i] {
                radius + stickiness
            } else {
                radius
            };
            let curled = finger.curl >= params.min_curl && finger.curl <= params.max_curl;
            state.probe_inside[i] = curled && within(finger.tip_position, reach);
        }

        let mut is_grabbing =
            state.probe_inside[0] && state.probe_inside[1..].iter().any(|inside| *inside);

        // A running cooldown suppresses re-grasp of the pair, so classifier
        // noise right after a release cannot re-trigger it.
        if state.cooldown < params.grab_cooldown {
            state.cooldown += dt;
            if !state.prev_grabbing {
                is_grabbing = false;
            }
        }
        if state.prev_grabbing && !is_grabbing {
            state.cooldown = 0.0;
        }

        state.prev_grabbing = is_grabbing;
        is_grabbing
    }

    /// Drop all state for an object's instance, in both buckets
    pub fn forget_instance(&mut self, instance: InstanceHandle) {
        self.left.remove(&instance);
        self.right.remove(&instance);
    }

    /// Drop every pair's state
    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    fn bucket_mut(&mut self, handedness: Handedness) -> &mut HashMap<InstanceHandle, PairState> {
        match handedness {
            Handedness::Left => &mut self.left,
            Handedness::Right => &mut self.right,
        }
    }
}
