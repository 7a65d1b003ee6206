//! In-process simulation backend built on [`rapier3d`].
//!
//! One rigid body and collider per shape instance, plus a kinematic ball
//! collider per tracked finger bone so hands push objects through the normal
//! contact pipeline. Proximity queries for the grab classifier are answered
//! by point projection against the instance's collider.

use std::collections::{BTreeMap, HashMap};

use rapier3d::math::Isometry;
use rapier3d::na::Matrix3x1;
use rapier3d::parry::query::PointQuery;
use rapier3d::prelude::*;

use crate::backend::{
    BackendError, CreateInfo, DescriptionHandle, InstanceHandle, InstanceResults, ResultFlags,
    SceneConfig, SimulationBackend, UpdateFlags, UpdateInfo,
};
use crate::components::{Hand, Pose, ShapeDescription};
use crate::util::{glam_vec_from_na, isometry_from_pose, na_point_from_glam, na_vector_from_glam};
use crate::{NUM_BONES, NUM_FINGERS};

/// Collision group for object shape instances
pub const OBJECT_COLLISION_GROUP: Group = Group::GROUP_1;
/// Collision group for hand bone colliders
pub const HAND_COLLISION_GROUP: Group = Group::GROUP_2;

/// Radius of the ball collider standing in for one finger bone
const BONE_RADIUS: f32 = 0.01;

struct InstanceState {
    body: RigidBodyHandle,
    collider: ColliderHandle,
    description: DescriptionHandle,
    kinematic: bool,
}

struct HandState {
    bodies: Vec<RigidBodyHandle>,
}

/// The in-process rapier backend.
pub struct PhysicsContext {
    /// The rapier pipeline
    pub physics_pipeline: PhysicsPipeline,
    gravity: Matrix3x1<f32>,
    /// Scene query acceleration structure
    pub query_pipeline: QueryPipeline,
    /// All colliders, objects and hand bones alike
    pub colliders: ColliderSet,
    /// Broad phase state
    pub broad_phase: BroadPhase,
    /// Narrow phase state; hand contact depths are read from here
    pub narrow_phase: NarrowPhase,
    /// All rigid bodies
    pub rigid_bodies: RigidBodySet,
    /// Island manager
    pub island_manager: IslandManager,
    /// Integration parameters; `dt` is set from the step call
    pub integration_parameters: IntegrationParameters,
    /// Impulse joints (unused, required by the pipeline)
    pub impulse_joints: ImpulseJointSet,
    /// Multibody joints (unused, required by the pipeline)
    pub multibody_joints: MultibodyJointSet,
    /// Continuous collision detection solver
    pub ccd_solver: CCDSolver,

    scene: Option<SceneConfig>,
    descriptions: HashMap<DescriptionHandle, (SharedShape, usize)>,
    next_description: u64,
    instances: BTreeMap<InstanceHandle, InstanceState>,
    next_instance: u64,
    hands: BTreeMap<u32, HandState>,
}

impl Default for PhysicsContext {
    fn default() -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = 1. / 72.;

        PhysicsContext {
            physics_pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, -9.81, 0.0],
            query_pipeline: QueryPipeline::new(),
            colliders: ColliderSet::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_bodies: RigidBodySet::new(),
            island_manager: IslandManager::new(),
            integration_parameters,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            scene: None,
            descriptions: HashMap::new(),
            next_description: 1,
            instances: BTreeMap::new(),
            next_instance: 1,
            hands: BTreeMap::new(),
        }
    }
}

impl PhysicsContext {
    fn require_scene(&self) -> Result<&SceneConfig, BackendError> {
        self.scene.as_ref().ok_or(BackendError::NotEnabled)
    }

    fn remove_body(&mut self, body: RigidBodyHandle) {
        self.rigid_bodies.remove(
            body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    fn remove_hand(&mut self, id: u32) {
        if let Some(hand) = self.hands.remove(&id) {
            for body in hand.bodies {
                self.remove_body(body);
            }
        }
    }

    fn build_shape(shape: &ShapeDescription) -> Result<SharedShape, BackendError> {
        match shape {
            ShapeDescription::Sphere { radius } => {
                if *radius <= 0.0 {
                    return Err(BackendError::InvalidArgument(
                        "sphere radius must be positive".to_string(),
                    ));
                }
                Ok(SharedShape::ball(*radius))
            }
            ShapeDescription::Cuboid { half_extents } => {
                if half_extents.min_element() <= 0.0 {
                    return Err(BackendError::InvalidArgument(
                        "cuboid half extents must be positive".to_string(),
                    ));
                }
                Ok(SharedShape::cuboid(
                    half_extents.x,
                    half_extents.y,
                    half_extents.z,
                ))
            }
            ShapeDescription::Capsule {
                half_height,
                radius,
            } => {
                if *half_height <= 0.0 || *radius <= 0.0 {
                    return Err(BackendError::InvalidArgument(
                        "capsule dimensions must be positive".to_string(),
                    ));
                }
                Ok(SharedShape::capsule(
                    point![0.0, -*half_height, 0.0],
                    point![0.0, *half_height, 0.0],
                    *radius,
                ))
            }
            ShapeDescription::ConvexHull { points } => {
                let points: Vec<_> = points.iter().map(|p| na_point_from_glam(*p)).collect();
                SharedShape::convex_hull(&points).ok_or_else(|| {
                    BackendError::InvalidArgument("degenerate convex hull".to_string())
                })
            }
            ShapeDescription::Compound { parts } => {
                if parts.is_empty() {
                    return Err(BackendError::InvalidArgument(
                        "compound shape needs at least one part".to_string(),
                    ));
                }
                let mut shapes = Vec::with_capacity(parts.len());
                for (pose, part) in parts {
                    shapes.push((isometry_from_pose(pose), Self::build_shape(part)?));
                }
                Ok(SharedShape::compound(shapes))
            }
        }
    }
}

impl SimulationBackend for PhysicsContext {
    fn create_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError> {
        if self.scene.is_some() {
            return Err(BackendError::AlreadyEnabled);
        }
        self.gravity = na_vector_from_glam(config.gravity);
        self.scene = Some(*config);
        Ok(())
    }

    fn destroy_scene(&mut self) -> Result<(), BackendError> {
        self.require_scene()?;
        if !self.instances.is_empty() || !self.descriptions.is_empty() {
            return Err(BackendError::ReferencesRemain);
        }

        let hand_ids: Vec<u32> = self.hands.keys().copied().collect();
        for id in hand_ids {
            self.remove_hand(id);
        }
        self.scene = None;
        Ok(())
    }

    fn update_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError> {
        self.require_scene()?;
        self.gravity = na_vector_from_glam(config.gravity);
        self.scene = Some(*config);
        Ok(())
    }

    fn create_description(
        &mut self,
        shape: &ShapeDescription,
    ) -> Result<DescriptionHandle, BackendError> {
        self.require_scene()?;
        let built = Self::build_shape(shape)?;

        let handle = DescriptionHandle(self.next_description);
        self.next_description += 1;
        self.descriptions.insert(handle, (built, 0));
        Ok(handle)
    }

    fn destroy_description(&mut self, description: DescriptionHandle) -> Result<(), BackendError> {
        match self.descriptions.get(&description) {
            None => Err(BackendError::InvalidHandle),
            Some((_, count)) if *count > 0 => Err(BackendError::ReferencesRemain),
            Some(_) => {
                self.descriptions.remove(&description);
                Ok(())
            }
        }
    }

    fn create_shape(
        &mut self,
        description: DescriptionHandle,
        pose: &Pose,
        info: &CreateInfo,
    ) -> Result<InstanceHandle, BackendError> {
        self.require_scene()?;
        let (shape, count) = self
            .descriptions
            .get_mut(&description)
            .ok_or(BackendError::InvalidHandle)?;
        let shape = shape.clone();
        *count += 1;

        let body_type = if info.kinematic {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };
        let body = RigidBodyBuilder::new(body_type)
            .position(isometry_from_pose(pose))
            .gravity_scale(if info.gravity_enabled { 1.0 } else { 0.0 })
            .build();
        let body_handle = self.rigid_bodies.insert(body);

        let handle = InstanceHandle(self.next_instance);
        self.next_instance += 1;

        let collider = ColliderBuilder::new(shape)
            .collision_groups(InteractionGroups::new(
                OBJECT_COLLISION_GROUP,
                OBJECT_COLLISION_GROUP | HAND_COLLISION_GROUP,
            ))
            .user_data(handle.0 as u128)
            .density(1.0)
            .build();
        let collider_handle =
            self.colliders
                .insert_with_parent(collider, body_handle, &mut self.rigid_bodies);

        self.instances.insert(
            handle,
            InstanceState {
                body: body_handle,
                collider: collider_handle,
                description,
                kinematic: info.kinematic,
            },
        );
        Ok(handle)
    }

    fn destroy_shape(&mut self, instance: InstanceHandle) -> Result<(), BackendError> {
        let state = self
            .instances
            .remove(&instance)
            .ok_or(BackendError::InvalidHandle)?;
        if let Some((_, count)) = self.descriptions.get_mut(&state.description) {
            *count = count.saturating_sub(1);
        }
        self.remove_body(state.body);
        Ok(())
    }

    fn update_shape(
        &mut self,
        instance: InstanceHandle,
        info: &UpdateInfo,
    ) -> Result<(), BackendError> {
        let state = self
            .instances
            .get(&instance)
            .ok_or(BackendError::InvalidHandle)?;
        let body = self
            .rigid_bodies
            .get_mut(state.body)
            .ok_or(BackendError::InvalidHandle)?;

        let target = isometry_from_pose(&info.pose);
        if state.kinematic {
            if info.flags.contains(UpdateFlags::VELOCITY_ENABLED) {
                body.set_next_kinematic_position(target);
            } else {
                // Teleport: jump without generating interpolated velocity.
                body.set_position(target, true);
            }
            return Ok(());
        }

        // Dynamic bodies are authoritative in-process; the reported
        // velocities are for backends that keep their own ghost copy. Only a
        // teleport overrides the simulated pose.
        if !info.flags.contains(UpdateFlags::VELOCITY_ENABLED) {
            body.set_position(target, true);
        }

        if info.flags.contains(UpdateFlags::APPLY_ACCELERATION) {
            let dt = self.integration_parameters.dt;
            let linvel = *body.linvel() + na_vector_from_glam(info.linear_acceleration) * dt;
            let angvel = *body.angvel() + na_vector_from_glam(info.angular_acceleration) * dt;
            body.set_linvel(linvel, true);
            body.set_angvel(angvel, true);
        }

        body.set_gravity_scale(
            if info.flags.contains(UpdateFlags::GRAVITY_ENABLED) {
                1.0
            } else {
                0.0
            },
            false,
        );
        Ok(())
    }

    fn update_hands(&mut self, hands: &[Hand]) -> Result<(), BackendError> {
        self.require_scene()?;

        // Drop hands that stopped appearing.
        let stale: Vec<u32> = self
            .hands
            .keys()
            .filter(|id| !hands.iter().any(|hand| hand.id == **id))
            .copied()
            .collect();
        for id in stale {
            self.remove_hand(id);
        }

        for hand in hands {
            if !self.hands.contains_key(&hand.id) {
                let mut bodies = Vec::with_capacity(NUM_FINGERS * NUM_BONES);
                for finger in &hand.fingers {
                    for bone in &finger.bones {
                        let position = bone.position;
                        let body = RigidBodyBuilder::new(RigidBodyType::KinematicPositionBased)
                            .position(Isometry::translation(position.x, position.y, position.z))
                            .build();
                        let body_handle = self.rigid_bodies.insert(body);
                        let collider = ColliderBuilder::ball(BONE_RADIUS)
                            .collision_groups(InteractionGroups::new(
                                HAND_COLLISION_GROUP,
                                OBJECT_COLLISION_GROUP,
                            ))
                            .user_data(hand.id as u128)
                            .build();
                        self.colliders.insert_with_parent(
                            collider,
                            body_handle,
                            &mut self.rigid_bodies,
                        );
                        bodies.push(body_handle);
                    }
                }
                self.hands.insert(hand.id, HandState { bodies });
                continue;
            }

            let state = &self.hands[&hand.id];
            let mut slot = 0;
            for finger in &hand.fingers {
                for bone in &finger.bones {
                    if let Some(body) = self.rigid_bodies.get_mut(state.bodies[slot]) {
                        let position = bone.position;
                        body.set_next_kinematic_position(Isometry::translation(
                            position.x, position.y, position.z,
                        ));
                    }
                    slot += 1;
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, dt: f32) -> Result<(), BackendError> {
        self.require_scene()?;
        if dt <= 0.0 {
            return Err(BackendError::InvalidArgument(
                "step dt must be positive".to_string(),
            ));
        }
        self.integration_parameters.dt = dt;

        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );

        self.query_pipeline
            .update(&self.rigid_bodies, &self.colliders);
        Ok(())
    }

    fn instance_results(
        &mut self,
        results: &mut Vec<InstanceResults>,
    ) -> Result<(), BackendError> {
        let scene = *self.require_scene()?;
        results.clear();

        for (&handle, state) in &self.instances {
            let body = self
                .rigid_bodies
                .get(state.body)
                .ok_or(BackendError::InvalidHandle)?;

            let mut max_hand_depth = 0.0_f32;
            let mut touched_by_hand = false;
            for pair in self.narrow_phase.contacts_with(state.collider) {
                let other = if pair.collider1 == state.collider {
                    pair.collider2
                } else {
                    pair.collider1
                };
                let other_groups = self.colliders[other].collision_groups();
                if !other_groups.memberships.intersects(HAND_COLLISION_GROUP) {
                    continue;
                }
                for manifold in &pair.manifolds {
                    for point in &manifold.points {
                        if point.dist < 0.0 {
                            touched_by_hand = true;
                            max_hand_depth = max_hand_depth.max(-point.dist);
                        }
                    }
                }
            }

            let mut flags = ResultFlags::empty();
            if touched_by_hand {
                flags |= ResultFlags::MAX_HAND_DEPTH;
                if scene.contact_enabled && !state.kinematic {
                    flags |= ResultFlags::VELOCITIES;
                }
            }

            results.push(InstanceResults {
                instance: handle,
                flags,
                linear_velocity: glam_vec_from_na(body.linvel()),
                angular_velocity: glam_vec_from_na(body.angvel()),
                max_hand_depth,
            });
        }
        Ok(())
    }

    fn proximity(
        &self,
        instance: InstanceHandle,
        point: glam::Vec3,
        radius: f32,
    ) -> Result<bool, BackendError> {
        let state = self
            .instances
            .get(&instance)
            .ok_or(BackendError::InvalidHandle)?;
        let collider = self
            .colliders
            .get(state.collider)
            .ok_or(BackendError::InvalidHandle)?;

        let distance = collider.shape().distance_to_point(
            collider.position(),
            &na_point_from_glam(point),
            true,
        );
        Ok(distance <= radius)
    }
}
