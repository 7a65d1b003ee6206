//! The collaborator interface objects implement to take part in the
//! simulation.
//!
//! The orchestrator pulls creation and update info from objects and pushes
//! notifications back. Callbacks are fallible: an object whose callback
//! errors is marked misbehaving and force-unregistered at the end of the
//! tick rather than aborting the tick for the rest of the scene, so a
//! default `Ok(())` is provided wherever an object has nothing to do.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use crate::backend::{InstanceHandle, InstanceResults, UpdateInfo};
use crate::components::{Hand, Pose, ShapeDescription};
use crate::registry::ObjectHandle;

/// Which dispatch a holding callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPhase {
    /// Dispatched during the physics tick; twice when a grasp began mid-tick
    Physics,
    /// Dispatched at render rate via `update_graphics`
    Graphics,
}

/// Creation-time information pulled from an object when its simulation
/// representation is created.
#[derive(Debug, Clone)]
pub struct CreationInfo {
    /// The object's collision geometry
    pub shape: ShapeDescription,
    /// Where the object currently is
    pub pose: Pose,
    /// Kinematic objects are moved by poses, never by forces
    pub kinematic: bool,
    /// Whether gravity applies to the object
    pub gravity_enabled: bool,
}

/// An object registered for interaction.
///
/// All notifications run synchronously inside the tick, in a fixed order;
/// implementations must not call back into the manager.
pub trait Interactable {
    /// Pull the information needed to create the simulation representation
    fn creation_info(&mut self) -> Result<CreationInfo>;

    /// Pull the object's per-tick update: pose, velocities, accumulated
    /// acceleration requests and what to apply this tick
    fn update_info(&mut self) -> Result<UpdateInfo>;

    /// The object was registered with a manager
    fn notify_registered(&mut self, handle: ObjectHandle) -> Result<()> {
        let _ = handle;
        Ok(())
    }

    /// The object was unregistered and will receive no further callbacks
    fn notify_unregistered(&mut self) -> Result<()> {
        Ok(())
    }

    /// The object's simulation representation was created
    fn notify_instance_created(&mut self, instance: InstanceHandle) -> Result<()> {
        let _ = instance;
        Ok(())
    }

    /// The object's simulation representation was destroyed
    fn notify_instance_destroyed(&mut self) -> Result<()> {
        Ok(())
    }

    /// A tick is starting. `clock` is the manager's simulated time in
    /// seconds; deadline-based effects should be checked here.
    fn notify_pre_solve(&mut self, clock: f64) -> Result<()> {
        let _ = clock;
        Ok(())
    }

    /// The tick's dispatches are done
    fn notify_post_solve(&mut self) -> Result<()> {
        Ok(())
    }

    /// A hand began grasping this object
    fn notify_hand_grasped(&mut self, hand: &Hand) -> Result<()> {
        let _ = hand;
        Ok(())
    }

    /// A hand released this object
    fn notify_hand_released(&mut self, hand: &Hand) -> Result<()> {
        let _ = hand;
        Ok(())
    }

    /// A grasping hand lost tracking; the grasp is preserved while the hand
    /// is suspended
    fn notify_hand_lost_tracking(&mut self, hand: &Hand) -> Result<()> {
        let _ = hand;
        Ok(())
    }

    /// A suspended grasping hand was re-associated with fresh tracking data
    /// under a new id
    fn notify_hand_regained_tracking(&mut self, hand: &Hand, old_id: u32) -> Result<()> {
        let _ = (hand, old_id);
        Ok(())
    }

    /// A suspended grasping hand exceeded its suspension deadline; the grasp
    /// was force-released
    fn notify_hand_timeout(&mut self, hand: &Hand) -> Result<()> {
        let _ = hand;
        Ok(())
    }

    /// The hands currently holding this object, in frame order. Suspended
    /// hands do not appear.
    fn notify_hands_hold(&mut self, hands: &[&Hand], phase: HoldPhase) -> Result<()> {
        let _ = (hands, phase);
        Ok(())
    }

    /// The solved follow transform for this tick. Whether to apply it as a
    /// kinematic move or by velocity tracking is the object's own policy.
    fn notify_solved_pose(&mut self, target: Pose) -> Result<()> {
        let _ = target;
        Ok(())
    }

    /// Per-instance results read back from the simulation backend
    fn notify_simulation_results(&mut self, results: &InstanceResults) -> Result<()> {
        let _ = results;
        Ok(())
    }
}

/// Shared handle to a registered object.
///
/// The manager and the host application both hold one; interior mutability
/// is safe because the whole engine is single-threaded and callbacks never
/// re-enter the manager.
pub type ObjectRef = Rc<RefCell<dyn Interactable>>;
