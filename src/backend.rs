//! The abstract boundary to the external simulation engine.
//!
//! Everything the engine needs from a simulation — shape descriptions and
//! instances, hand colliders, stepping, per-instance results, proximity
//! queries — goes through [`SimulationBackend`]. The backend may live out of
//! process: every call is fallible and reports an explicit status, and the
//! core never assumes a call succeeded.

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::components::{Hand, Pose, ShapeDescription};

/// Opaque handle to a pooled shape description owned by the backend.
///
/// Identical geometry may share one description across many instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptionHandle(pub u64);

/// Opaque handle to a shape instance owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(pub u64);

/// Status codes reported by backend calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The handle does not name a live backend resource
    #[error("the handle does not name a live backend resource")]
    InvalidHandle,
    /// An argument was rejected by the backend
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The resource still has live references and cannot be destroyed
    #[error("resources still reference this handle")]
    ReferencesRemain,
    /// The scene has not been created
    #[error("the scene has not been created")]
    NotEnabled,
    /// The scene has already been created
    #[error("the scene has already been created")]
    AlreadyEnabled,
    /// The backend failed for a reason of its own
    #[error("backend failure: {0}")]
    Failed(String),
}

/// Global scene settings, pushed to the backend on enable and on change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Gravity applied to gravity-enabled instances
    pub gravity: Vec3,
    /// Allow the simulation to modify object velocities when pushing
    pub contact_enabled: bool,
    /// Allow object positions to be modified by grasping
    pub grasping_enabled: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            contact_enabled: true,
            grasping_enabled: true,
        }
    }
}

bitflags! {
    /// Flags attached to a shape instance update.
    pub struct UpdateFlags: u32 {
        /// Trust the reported velocities; cleared for one tick after a
        /// teleport so the simulation does not interpolate across the jump
        const VELOCITY_ENABLED = 0b0001;
        /// Apply the accumulated acceleration requests this tick
        const APPLY_ACCELERATION = 0b0010;
        /// The instance is affected by gravity
        const GRAVITY_ENABLED = 0b0100;
    }
}

bitflags! {
    /// Flags describing which fields of an instance result carry data.
    pub struct ResultFlags: u32 {
        /// The velocity fields hold a contact-resolved update
        const VELOCITIES = 0b0001;
        /// The penetration field is meaningful
        const MAX_HAND_DEPTH = 0b0010;
    }
}

/// Creation-time description of a shape instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateInfo {
    /// Kinematic instances are moved only by explicit poses, never by forces
    pub kinematic: bool,
    /// Whether the instance is affected by gravity
    pub gravity_enabled: bool,
}

/// Per-tick state pushed to the backend for one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateInfo {
    /// The instance's current pose
    pub pose: Pose,
    /// Current linear velocity
    pub linear_velocity: Vec3,
    /// Current angular velocity
    pub angular_velocity: Vec3,
    /// Accumulated linear acceleration request
    pub linear_acceleration: Vec3,
    /// Accumulated angular acceleration request
    pub angular_acceleration: Vec3,
    /// What to apply this tick
    pub flags: UpdateFlags,
}

impl Default for UpdateInfo {
    fn default() -> Self {
        UpdateInfo {
            pose: Pose::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_acceleration: Vec3::ZERO,
            angular_acceleration: Vec3::ZERO,
            flags: UpdateFlags::VELOCITY_ENABLED,
        }
    }
}

/// Per-tick results read back from the backend for one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceResults {
    /// The instance these results belong to
    pub instance: InstanceHandle,
    /// Which fields carry data
    pub flags: ResultFlags,
    /// Contact-resolved linear velocity
    pub linear_velocity: Vec3,
    /// Contact-resolved angular velocity
    pub angular_velocity: Vec3,
    /// Deepest hand penetration into the instance this tick, in metres
    pub max_hand_depth: f32,
}

/// The simulation backend contract.
///
/// Implementations own the simulation-side representation of every shape
/// instance and of the tracked hands, and are driven synchronously once per
/// tick by the orchestrator.
pub trait SimulationBackend {
    /// Create the scene. Fails with [`BackendError::AlreadyEnabled`] if one
    /// exists.
    fn create_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError>;

    /// Destroy the scene and the backend's hand state. Fails with
    /// [`BackendError::ReferencesRemain`] while instances or descriptions are
    /// still alive.
    fn destroy_scene(&mut self) -> Result<(), BackendError>;

    /// Push changed global settings to the live scene.
    fn update_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError>;

    /// Intern a shape description, returning a shareable handle.
    fn create_description(
        &mut self,
        shape: &ShapeDescription,
    ) -> Result<DescriptionHandle, BackendError>;

    /// Drop a shape description. Fails with
    /// [`BackendError::ReferencesRemain`] while instances still use it.
    fn destroy_description(&mut self, description: DescriptionHandle) -> Result<(), BackendError>;

    /// Instantiate a described shape in the scene.
    fn create_shape(
        &mut self,
        description: DescriptionHandle,
        pose: &Pose,
        info: &CreateInfo,
    ) -> Result<InstanceHandle, BackendError>;

    /// Remove an instance from the scene.
    fn destroy_shape(&mut self, instance: InstanceHandle) -> Result<(), BackendError>;

    /// Push one instance's per-tick update.
    fn update_shape(
        &mut self,
        instance: InstanceHandle,
        info: &UpdateInfo,
    ) -> Result<(), BackendError>;

    /// Replace the backend's view of the tracked hands for this tick.
    fn update_hands(&mut self, hands: &[Hand]) -> Result<(), BackendError>;

    /// Advance the simulation by `dt` seconds.
    fn step(&mut self, dt: f32) -> Result<(), BackendError>;

    /// Collect per-instance results for the tick just stepped. The buffer is
    /// cleared and refilled so callers can recycle it.
    fn instance_results(
        &mut self,
        results: &mut Vec<InstanceResults>,
    ) -> Result<(), BackendError>;

    /// Whether the instance's geometry is within `radius` metres of `point`.
    fn proximity(
        &self,
        instance: InstanceHandle,
        point: Vec3,
        radius: f32,
    ) -> Result<bool, BackendError>;
}
