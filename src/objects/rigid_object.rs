//! The default interactable: a rigid object that follows solved poses
//! kinematically while grasped and behaves like a plain dynamic body
//! otherwise.

use anyhow::Result;
use glam::Vec3;

use crate::backend::{InstanceResults, ResultFlags, UpdateFlags, UpdateInfo};
use crate::components::{Hand, Pose, ShapeDescription};
use crate::interactable::{CreationInfo, HoldPhase, Interactable};
use crate::util::lerp_slerp;

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Timed ease of the graphics pose back to the simulated pose after a
/// release. Checked once per tick; no hidden reentrancy during teardown.
struct GraphicReturn {
    started_at: f64,
    from: Pose,
}

/// A rigid interactable object.
///
/// While grasped the object turns kinematic and applies solved poses
/// directly; on the final release it restores the configured kinematic flag
/// and applies throw handling: the release velocity is scaled, and a fast
/// throw disables contact briefly so the object does not immediately collide
/// with the hand that threw it.
///
/// The object keeps a separate graphics pose. It tracks the simulated pose
/// rigidly while held and eases back to it after a release, which hides the
/// divergence a grasp can introduce between the two.
pub struct RigidObject {
    shape: ShapeDescription,
    pose: Pose,
    graphic_pose: Pose,
    kinematic: bool,
    use_gravity: bool,
    contact_enabled: bool,

    linear_velocity: Vec3,
    angular_velocity: Vec3,
    accumulated_linear_acceleration: Vec3,
    accumulated_angular_acceleration: Vec3,
    teleported: bool,
    received_velocity_update: bool,

    grasping_hands: usize,
    kinematic_before_grasp: bool,

    /// Multiplier applied to the release velocity of a throw
    pub throw_velocity_scale: f32,
    /// Speed past which contact is disabled for a moment after release
    pub contact_disable_speed: f32,
    /// How long contact stays disabled after a fast throw, in seconds
    pub contact_enable_delay: f32,
    /// How long the graphics pose takes to ease home after a release
    pub graphic_return_time: f32,

    clock: f64,
    last_solve_clock: Option<f64>,
    contact_enable_at: Option<f64>,
    graphic_return: Option<GraphicReturn>,
}

impl RigidObject {
    /// Create a dynamic, gravity-affected object with the given geometry
    pub fn new(shape: ShapeDescription) -> RigidObject {
        RigidObject {
            shape,
            pose: Pose::IDENTITY,
            graphic_pose: Pose::IDENTITY,
            kinematic: false,
            use_gravity: true,
            contact_enabled: true,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            accumulated_linear_acceleration: Vec3::ZERO,
            accumulated_angular_acceleration: Vec3::ZERO,
            teleported: false,
            received_velocity_update: false,
            grasping_hands: 0,
            kinematic_before_grasp: false,
            throw_velocity_scale: 1.0,
            contact_disable_speed: 0.4,
            contact_enable_delay: 0.1,
            graphic_return_time: 0.25,
            clock: 0.0,
            last_solve_clock: None,
            contact_enable_at: None,
            graphic_return: None,
        }
    }

    /// Set the starting pose
    pub fn with_pose(mut self, pose: Pose) -> RigidObject {
        self.pose = pose;
        self.graphic_pose = pose;
        self
    }

    /// Set whether the object is kinematic when not grasped
    pub fn with_kinematic(mut self, kinematic: bool) -> RigidObject {
        self.kinematic = kinematic;
        self
    }

    /// Set whether gravity applies when not grasped
    pub fn with_gravity(mut self, use_gravity: bool) -> RigidObject {
        self.use_gravity = use_gravity;
        self
    }

    /// The simulated pose
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// The graphics pose; may briefly diverge from the simulated pose
    pub fn graphic_pose(&self) -> Pose {
        self.graphic_pose
    }

    /// Move the object outright. Call
    /// [`notify_teleported`](RigidObject::notify_teleported) as well if the
    /// move is discontinuous.
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    /// The current linear velocity
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    /// Overwrite the current velocities
    pub fn set_velocities(&mut self, linear: Vec3, angular: Vec3) {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
    }

    /// Whether pushing is currently enabled for this object
    pub fn contact_enabled(&self) -> bool {
        self.contact_enabled
    }

    /// True while at least one hand is grasping the object
    pub fn is_grasped(&self) -> bool {
        self.grasping_hands > 0
    }

    /// Add a linear acceleration request for this tick. Use this instead of
    /// touching velocities directly while the object is simulated.
    pub fn add_linear_acceleration(&mut self, acceleration: Vec3) {
        self.accumulated_linear_acceleration += acceleration;
    }

    /// Add an angular acceleration request for this tick
    pub fn add_angular_acceleration(&mut self, acceleration: Vec3) {
        self.accumulated_angular_acceleration += acceleration;
    }

    /// Must be called whenever the object is moved discontinuously, so the
    /// simulation does not interpolate velocity across the jump
    pub fn notify_teleported(&mut self) {
        self.teleported = true;
    }

    fn end_one_grasp(&mut self) {
        self.grasping_hands = self.grasping_hands.saturating_sub(1);
        if self.grasping_hands > 0 {
            return;
        }

        self.kinematic = self.kinematic_before_grasp;
        self.last_solve_clock = None;

        // Throw handling: scale the release velocity, and after a fast
        // throw keep the hand from immediately batting the object again.
        self.linear_velocity *= self.throw_velocity_scale;
        let speed = self.linear_velocity.length();
        if self.contact_enabled && speed >= self.contact_disable_speed {
            self.contact_enabled = false;
            self.contact_enable_at = Some(self.clock + self.contact_enable_delay as f64);
        }

        self.graphic_return = Some(GraphicReturn {
            started_at: self.clock,
            from: self.graphic_pose,
        });
    }
}

impl Interactable for RigidObject {
    fn creation_info(&mut self) -> Result<CreationInfo> {
        Ok(CreationInfo {
            shape: self.shape.clone(),
            pose: self.pose,
            kinematic: self.kinematic,
            gravity_enabled: self.use_gravity,
        })
    }

    fn update_info(&mut self) -> Result<UpdateInfo> {
        let mut flags = UpdateFlags::empty();
        if !self.teleported {
            flags |= UpdateFlags::VELOCITY_ENABLED;
        }
        // A contact-resolved velocity from last tick already accounts for
        // pushing; do not stack acceleration requests on top of it.
        let had_velocity_update = self.received_velocity_update;
        self.received_velocity_update = false;
        if self.contact_enabled && !self.kinematic && self.grasping_hands == 0 && !had_velocity_update
        {
            flags |= UpdateFlags::APPLY_ACCELERATION;
        }
        if self.use_gravity {
            flags |= UpdateFlags::GRAVITY_ENABLED;
        }

        Ok(UpdateInfo {
            pose: self.pose,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            linear_acceleration: self.accumulated_linear_acceleration,
            angular_acceleration: self.accumulated_angular_acceleration,
            flags,
        })
    }

    fn notify_pre_solve(&mut self, clock: f64) -> Result<()> {
        self.clock = clock;

        if let Some(enable_at) = self.contact_enable_at {
            if clock >= enable_at {
                self.contact_enabled = true;
                self.contact_enable_at = None;
            }
        }

        if let Some(graphic_return) = &self.graphic_return {
            let elapsed = (clock - graphic_return.started_at) as f32;
            let t = (elapsed / self.graphic_return_time.max(f32::EPSILON)).clamp(0.0, 1.0);
            self.graphic_pose = lerp_slerp(&graphic_return.from, &self.pose, smoothstep(t));
            if t >= 1.0 {
                self.graphic_return = None;
            }
        }
        Ok(())
    }

    fn notify_post_solve(&mut self) -> Result<()> {
        self.accumulated_linear_acceleration = Vec3::ZERO;
        self.accumulated_angular_acceleration = Vec3::ZERO;
        self.teleported = false;
        Ok(())
    }

    fn notify_hand_grasped(&mut self, _hand: &Hand) -> Result<()> {
        if self.grasping_hands == 0 {
            // A grasp always drives the object kinematically.
            self.kinematic_before_grasp = self.kinematic;
            self.kinematic = true;
            self.graphic_return = None;
        }
        self.grasping_hands += 1;
        Ok(())
    }

    fn notify_hand_released(&mut self, _hand: &Hand) -> Result<()> {
        self.end_one_grasp();
        Ok(())
    }

    fn notify_hand_timeout(&mut self, _hand: &Hand) -> Result<()> {
        self.end_one_grasp();
        Ok(())
    }

    fn notify_hand_regained_tracking(&mut self, _hand: &Hand, _old_id: u32) -> Result<()> {
        // The hand may reappear far from where it vanished.
        self.notify_teleported();
        Ok(())
    }

    fn notify_hands_hold(&mut self, _hands: &[&Hand], phase: HoldPhase) -> Result<()> {
        if phase == HoldPhase::Graphics && self.grasping_hands > 0 {
            self.graphic_pose = self.pose;
        }
        Ok(())
    }

    fn notify_solved_pose(&mut self, target: Pose) -> Result<()> {
        // Estimate velocities from the pose delta so a release inherits the
        // hand's motion (that is what makes throwing work).
        if let Some(last) = self.last_solve_clock {
            let dt = (self.clock - last) as f32;
            if dt > 0.0 {
                self.linear_velocity = (target.translation - self.pose.translation) / dt;
            }
        }
        self.last_solve_clock = Some(self.clock);

        self.pose = target;
        self.graphic_pose = target;
        Ok(())
    }

    fn notify_simulation_results(&mut self, results: &InstanceResults) -> Result<()> {
        if results.flags.contains(ResultFlags::VELOCITIES) && self.contact_enabled {
            self.linear_velocity = results.linear_velocity;
            self.angular_velocity = results.angular_velocity;
            self.received_velocity_update = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Hand;

    fn object() -> RigidObject {
        RigidObject::new(ShapeDescription::Sphere { radius: 0.1 })
    }

    #[test]
    fn grasp_turns_the_object_kinematic() {
        let mut object = object();
        assert!(!object.kinematic);

        object.notify_hand_grasped(&Hand::left(1)).unwrap();
        assert!(object.kinematic);
        assert!(object.is_grasped());

        // A second hand joins and leaves; still kinematic.
        object.notify_hand_grasped(&Hand::right(2)).unwrap();
        object.notify_hand_released(&Hand::right(2)).unwrap();
        assert!(object.kinematic);

        object.notify_hand_released(&Hand::left(1)).unwrap();
        assert!(!object.kinematic);
        assert!(!object.is_grasped());
    }

    #[test]
    fn fast_throw_disables_contact_until_the_deadline() {
        let mut object = object();
        object.notify_pre_solve(1.0).unwrap();
        object.notify_hand_grasped(&Hand::left(1)).unwrap();
        object.set_velocities(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO);
        object.notify_hand_released(&Hand::left(1)).unwrap();
        assert!(!object.contact_enabled());

        // Before the deadline contact stays off; after it comes back.
        object.notify_pre_solve(1.05).unwrap();
        assert!(!object.contact_enabled());
        object.notify_pre_solve(1.2).unwrap();
        assert!(object.contact_enabled());
    }

    #[test]
    fn slow_release_keeps_contact_enabled() {
        let mut object = object();
        object.notify_hand_grasped(&Hand::left(1)).unwrap();
        object.set_velocities(Vec3::new(0.1, 0.0, 0.0), Vec3::ZERO);
        object.notify_hand_released(&Hand::left(1)).unwrap();
        assert!(object.contact_enabled());
    }

    #[test]
    fn graphics_pose_eases_home_after_release() {
        let mut object = object();
        object.notify_pre_solve(0.0).unwrap();
        object.notify_hand_grasped(&Hand::left(1)).unwrap();

        // While held the graphics pose tracks the solved pose.
        let held = Pose::from_translation(Vec3::new(0.0, 1.0, 0.0));
        object.notify_solved_pose(held).unwrap();
        assert_eq!(object.graphic_pose().translation, held.translation);

        // Release, then pull the simulated pose back to the origin.
        object.notify_hand_released(&Hand::left(1)).unwrap();
        object.set_pose(Pose::IDENTITY);

        object.notify_pre_solve(0.1).unwrap();
        let mid = object.graphic_pose().translation.y;
        assert!(mid > 0.0 && mid < 1.0);

        object.notify_pre_solve(0.3).unwrap();
        assert!(object.graphic_pose().translation.y.abs() < 1e-6);
    }

    #[test]
    fn teleport_clears_the_velocity_flag_for_one_tick() {
        let mut object = object();
        object.notify_teleported();

        let info = object.update_info().unwrap();
        assert!(!info.flags.contains(UpdateFlags::VELOCITY_ENABLED));

        object.notify_post_solve().unwrap();
        let info = object.update_info().unwrap();
        assert!(info.flags.contains(UpdateFlags::VELOCITY_ENABLED));
    }

    #[test]
    fn accelerations_accumulate_and_clear() {
        let mut object = object();
        object.add_linear_acceleration(Vec3::new(1.0, 0.0, 0.0));
        object.add_linear_acceleration(Vec3::new(0.5, 0.0, 0.0));

        let info = object.update_info().unwrap();
        assert_eq!(info.linear_acceleration, Vec3::new(1.5, 0.0, 0.0));
        assert!(info.flags.contains(UpdateFlags::APPLY_ACCELERATION));

        object.notify_post_solve().unwrap();
        let info = object.update_info().unwrap();
        assert_eq!(info.linear_acceleration, Vec3::ZERO);
    }

    #[test]
    fn grasped_objects_do_not_request_accelerations() {
        let mut object = object();
        object.notify_hand_grasped(&Hand::left(1)).unwrap();
        object.add_linear_acceleration(Vec3::X);

        let info = object.update_info().unwrap();
        assert!(!info.flags.contains(UpdateFlags::APPLY_ACCELERATION));
    }

    #[test]
    fn solved_poses_estimate_release_velocity() {
        let mut object = object();
        object.notify_pre_solve(1.0).unwrap();
        object.notify_hand_grasped(&Hand::left(1)).unwrap();
        object.notify_solved_pose(Pose::IDENTITY).unwrap();

        // 0.1 m in 0.1 s: one metre per second.
        object.notify_pre_solve(1.1).unwrap();
        object
            .notify_solved_pose(Pose::from_translation(Vec3::new(0.1, 0.0, 0.0)))
            .unwrap();
        assert!((object.linear_velocity().x - 1.0).abs() < 1e-3);
    }
}
