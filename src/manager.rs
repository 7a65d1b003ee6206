//! The orchestrator.
//!
//! [`InteractionManager`] drives one simulation step per physics tick, in a
//! fixed stage order: pre-solve notifications, holding callbacks,
//! representation updates, hand/tracking advancement and classification,
//! grasp solving, result dispatch, a second holding pass if any grasp began
//! this tick, then post-solve notifications and misbehaving-object reaping.
//! No reordering is safe: later stages assume the side effects of earlier
//! ones.
//!
//! Collaborator faults never abort a tick. A callback that errors gets its
//! object queued for forced unregistration at the end of the tick, and the
//! rest of the scene carries on. Caller-contract violations (double
//! registration, unknown handles) are hard errors instead.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::backend::{CreateInfo, InstanceHandle, InstanceResults, SceneConfig, SimulationBackend};
use crate::classifier::{ClassifierParameters, GrabClassifier};
use crate::components::{Frame, Hand, HandPointCollection, HandPointPool, Pose};
use crate::interactable::{HoldPhase, Interactable, ObjectRef};
use crate::kabsch::KabschSolver;
use crate::registry::{ObjectHandle, Registry, ShapeDescriptionPool};
use crate::{FeathertopError, FeathertopResult};

/// Manager configuration. Plain data; serializable so hosts can persist it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Global scene settings pushed to the backend
    pub scene: SceneConfig,
    /// Grab classifier thresholds
    pub classifier: ClassifierParameters,
    /// Seconds a grasping hand may stay untracked before timing out
    pub max_suspension_time: f32,
    /// Fixed simulation timestep, in seconds
    pub timestep: f32,
    /// Skip simulation without destroying any state
    pub paused: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            scene: SceneConfig::default(),
            classifier: ClassifierParameters::default(),
            max_suspension_time: 0.5,
            timestep: 1. / 72.,
            paused: false,
        }
    }
}

/// The grasp a tracked hand currently holds.
struct Grasp {
    object: ObjectHandle,
    points: HandPointCollection,
    user_forced: bool,
}

/// Tracking status of a hand the manager knows about.
enum TrackingState {
    Tracked,
    /// Unseen; the grasp is dropped once the deadline passes.
    Suspended { deadline: f64 },
}

/// A persistent record of a hand as it interacts with objects.
struct TrackedHand {
    hand: Hand,
    last_update: f64,
    state: TrackingState,
    grasp: Option<Grasp>,
}

impl TrackedHand {
    fn new(hand: Hand, now: f64) -> TrackedHand {
        TrackedHand {
            hand,
            last_update: now,
            state: TrackingState::Tracked,
            grasp: None,
        }
    }

    fn update(&mut self, hand: &Hand, now: f64) {
        self.hand = hand.clone();
        self.last_update = now;
        self.state = TrackingState::Tracked;
    }

    fn is_suspended(&self) -> bool {
        matches!(self.state, TrackingState::Suspended { .. })
    }
}

/// One hand's classification for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Contact,
    Grasp(InstanceHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseKind {
    Released,
    Timeout,
}

/// The core manager: registry of interactable objects, per-hand grasp state
/// machine, and the per-tick orchestration that ties hands, classifier,
/// solver and backend together.
pub struct InteractionManager {
    backend: Box<dyn SimulationBackend>,
    config: ManagerConfig,
    enabled: bool,
    /// Simulated time in seconds, advanced by one timestep per tick.
    clock: f64,

    registry: Registry,
    pool: ShapeDescriptionPool,
    point_pool: HandPointPool,
    solver: KabschSolver,
    classifier: GrabClassifier,

    hands: BTreeMap<u32, TrackedHand>,
    /// Objects grasped by at least one hand, in grasp order.
    grasped: Vec<ObjectHandle>,
    misbehaving: Vec<ObjectHandle>,

    order_scratch: Vec<ObjectHandle>,
    results_scratch: Vec<InstanceResults>,
    ids_scratch: Vec<u32>,
}

impl InteractionManager {
    /// Create a manager over the given backend. The manager starts disabled;
    /// call [`enable`](InteractionManager::enable) before ticking it.
    pub fn new(backend: Box<dyn SimulationBackend>, config: ManagerConfig) -> InteractionManager {
        InteractionManager {
            classifier: GrabClassifier::new(config.classifier),
            backend,
            config,
            enabled: false,
            clock: 0.0,
            registry: Registry::default(),
            pool: ShapeDescriptionPool::default(),
            point_pool: HandPointPool::default(),
            solver: KabschSolver::new(),
            hands: BTreeMap::new(),
            grasped: Vec::new(),
            misbehaving: Vec::new(),
            order_scratch: Vec::new(),
            results_scratch: Vec::new(),
            ids_scratch: Vec::new(),
        }
    }

    /// Create the backend scene and the simulation representation of every
    /// registered object. Objects registered while the manager was disabled
    /// get their deferred representations here.
    pub fn enable(&mut self) -> FeathertopResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.backend.create_scene(&self.config.scene)?;
        self.enabled = true;

        debug_assert_eq!(
            self.registry.instance_count(),
            0,
            "there should not be any instances before the creation step"
        );

        let mut order = std::mem::take(&mut self.order_scratch);
        self.registry.collect_order(&mut order);
        for &handle in &order {
            if let Err(error) = self.create_representation(handle) {
                tracing::warn!(
                    ?error,
                    "failed to create a simulation representation; scheduling forced unregistration"
                );
                self.misbehave(handle);
            }
        }
        self.order_scratch = order;
        Ok(())
    }

    /// Release every grasp, destroy every simulation representation and tear
    /// the scene down. Objects stay registered; the next
    /// [`enable`](InteractionManager::enable) recreates their
    /// representations. Teardown is best-effort and always completes.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }

        let holders: Vec<u32> = self
            .hands
            .iter()
            .filter(|(_, tracked)| tracked.grasp.is_some())
            .map(|(&id, _)| id)
            .collect();
        for id in holders {
            self.release_grasp(id, ReleaseKind::Released);
        }
        self.reap_misbehaving();

        self.hands.clear();
        self.grasped.clear();
        self.classifier.clear();

        let mut order = std::mem::take(&mut self.order_scratch);
        self.registry.collect_order(&mut order);
        for &handle in &order {
            if let Err(error) = self.destroy_representation(handle) {
                tracing::warn!(
                    ?error,
                    "failed to destroy a simulation representation during disable"
                );
            }
        }
        self.order_scratch = order;

        debug_assert_eq!(
            self.registry.instance_count(),
            0,
            "all instances should have been destroyed"
        );

        self.pool.clear(self.backend.as_mut());
        if let Err(error) = self.backend.destroy_scene() {
            tracing::warn!(?error, "failed to destroy the backend scene");
        }
        self.enabled = false;
    }

    /// Register an object, creating its simulation representation
    /// immediately when the manager is enabled and deferring it to the next
    /// enable otherwise.
    ///
    /// Registering the same object twice is a caller bug and fails with
    /// [`FeathertopError::AlreadyRegistered`].
    pub fn register(&mut self, object: ObjectRef) -> FeathertopResult<ObjectHandle> {
        if self.registry.find(&object).is_some() {
            return Err(FeathertopError::AlreadyRegistered);
        }

        let handle = self.registry.insert(object.clone());
        if let Err(error) = object.borrow_mut().notify_registered(handle) {
            self.misbehave(handle);
            return Err(FeathertopError::Other(error));
        }

        if self.enabled {
            self.create_representation(handle)?;
        }
        Ok(handle)
    }

    /// Unregister an object: release it from any hand holding it
    /// (best-effort, so teardown always completes), destroy its simulation
    /// representation and notify it.
    ///
    /// Unregistering an object that is not registered is a caller bug and
    /// fails with [`FeathertopError::NotRegistered`].
    pub fn unregister(&mut self, handle: ObjectHandle) -> FeathertopResult<()> {
        if !self.registry.contains(handle) {
            return Err(FeathertopError::NotRegistered);
        }

        let holders: Vec<u32> = self
            .hands
            .iter()
            .filter(|(_, tracked)| {
                tracked
                    .grasp
                    .as_ref()
                    .map_or(false, |grasp| grasp.object == handle)
            })
            .map(|(&id, _)| id)
            .collect();
        for id in holders {
            self.release_grasp(id, ReleaseKind::Released);
        }

        if let Err(error) = self.destroy_representation(handle) {
            // Only log, so the object still gets told it was unregistered.
            tracing::warn!(
                ?error,
                "failed to destroy the simulation representation during unregistration"
            );
        }

        let entry = self
            .registry
            .remove(handle)
            .expect("presence checked above");
        entry
            .object
            .borrow_mut()
            .notify_unregistered()
            .map_err(FeathertopError::Other)?;
        Ok(())
    }

    /// Run one simulation tick against the given tracking frame.
    pub fn update(&mut self, frame: &Frame) -> FeathertopResult<()> {
        if !self.enabled {
            return Err(FeathertopError::NotEnabled);
        }
        if self.config.paused {
            return Ok(());
        }
        self.clock += self.config.timestep as f64;

        let clock = self.clock;
        self.dispatch_all(|object| object.notify_pre_solve(clock));

        self.dispatch_hands_holding(frame, HoldPhase::Physics);

        self.update_representations();

        self.backend.update_hands(&frame.hands)?;
        self.backend.step(self.config.timestep)?;

        let any_grasp_began = self.update_state_changes(frame);

        self.solve_grasps(frame);

        self.dispatch_results();

        // A grasp that began mid-tick gets its first holding callback before
        // the tick ends, so the object does not visibly lag a frame.
        if any_grasp_began {
            self.dispatch_hands_holding(frame, HoldPhase::Physics);
        }

        self.dispatch_all(|object| object.notify_post_solve());
        self.reap_misbehaving();
        Ok(())
    }

    /// Dispatch the graphics-phase holding callbacks and reap misbehaving
    /// objects. The render-rate counterpart of
    /// [`update`](InteractionManager::update).
    pub fn update_graphics(&mut self, frame: &Frame) -> FeathertopResult<()> {
        if !self.enabled {
            return Err(FeathertopError::NotEnabled);
        }
        if self.config.paused {
            return Ok(());
        }
        self.dispatch_hands_holding(frame, HoldPhase::Graphics);
        self.reap_misbehaving();
        Ok(())
    }

    /// Force a hand to grasp the given object. The grasp short-circuits
    /// classification and only ends through
    /// [`release_hand`](InteractionManager::release_hand),
    /// [`release_object`](InteractionManager::release_object) or a tracking
    /// timeout.
    pub fn grasp_with_hand(&mut self, hand_id: u32, object: ObjectHandle) -> FeathertopResult<()> {
        if !self.registry.contains(object) {
            return Err(FeathertopError::NotRegistered);
        }
        if !self.hands.contains_key(&hand_id) {
            return Err(FeathertopError::UnknownHand(hand_id));
        }

        let current = self
            .hands
            .get(&hand_id)
            .and_then(|tracked| tracked.grasp.as_ref())
            .map(|grasp| grasp.object);
        match current {
            Some(held) if held == object => {
                if let Some(grasp) = self
                    .hands
                    .get_mut(&hand_id)
                    .and_then(|tracked| tracked.grasp.as_mut())
                {
                    grasp.user_forced = true;
                }
            }
            Some(_) => {
                self.release_grasp(hand_id, ReleaseKind::Released);
                self.begin_grasp(hand_id, object, true);
            }
            None => self.begin_grasp(hand_id, object, true),
        }
        Ok(())
    }

    /// Force a hand to release whatever it is holding. Returns true only if
    /// something was released.
    pub fn release_hand(&mut self, hand_id: u32) -> bool {
        self.release_grasp(hand_id, ReleaseKind::Released)
    }

    /// Force an object to be released by every hand holding it. Returns true
    /// only if at least one hand was holding it.
    pub fn release_object(&mut self, object: ObjectHandle) -> bool {
        let holders: Vec<u32> = self
            .hands
            .iter()
            .filter(|(_, tracked)| {
                tracked
                    .grasp
                    .as_ref()
                    .map_or(false, |grasp| grasp.object == object)
            })
            .map(|(&id, _)| id)
            .collect();

        let mut released = false;
        for id in holders {
            released |= self.release_grasp(id, ReleaseKind::Released);
        }
        released
    }

    /// The object a hand is currently grasping, if any
    pub fn try_get_grasped_object(&self, hand_id: u32) -> Option<ObjectHandle> {
        self.hands
            .get(&hand_id)
            .and_then(|tracked| tracked.grasp.as_ref())
            .map(|grasp| grasp.object)
    }

    /// Objects currently grasped by at least one hand, in grasp order
    pub fn grasped_objects(&self) -> &[ObjectHandle] {
        &self.grasped
    }

    /// True if any object is currently being grasped
    pub fn is_any_object_grasped(&self) -> bool {
        !self.grasped.is_empty()
    }

    /// Number of currently registered objects
    pub fn registered_object_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether the handle names a currently registered object
    pub fn is_registered(&self, handle: ObjectHandle) -> bool {
        self.registry.contains(handle)
    }

    /// Whether the manager knows a hand under this id
    pub fn has_tracked_hand(&self, hand_id: u32) -> bool {
        self.hands.contains_key(&hand_id)
    }

    /// Whether the hand is currently suspended (grasping but unseen)
    pub fn is_hand_suspended(&self, hand_id: u32) -> bool {
        self.hands
            .get(&hand_id)
            .map_or(false, |tracked| tracked.is_suspended())
    }

    /// Whether the manager is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Simulated time in seconds
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// The current configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Toggle contact (pushing) and push the change to the backend
    pub fn set_contact_enabled(&mut self, enabled: bool) {
        self.config.scene.contact_enabled = enabled;
        self.push_scene_config();
    }

    /// Toggle grasping and push the change to the backend
    pub fn set_grasping_enabled(&mut self, enabled: bool) {
        self.config.scene.grasping_enabled = enabled;
        self.push_scene_config();
    }

    /// Change gravity and push the change to the backend
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.scene.gravity = gravity;
        self.push_scene_config();
    }

    /// Change how long a grasping hand may stay untracked. Hands already
    /// suspended keep the deadline recorded at suspension time.
    pub fn set_max_suspension_time(&mut self, seconds: f32) {
        self.config.max_suspension_time = seconds;
    }

    /// Pause or resume simulation without destroying any state
    pub fn set_paused(&mut self, paused: bool) {
        self.config.paused = paused;
    }

    /// Replace the classifier thresholds
    pub fn set_classifier_parameters(&mut self, params: ClassifierParameters) {
        self.config.classifier = params;
        self.classifier.set_params(params);
    }

    fn push_scene_config(&mut self) {
        if self.enabled {
            if let Err(error) = self.backend.update_scene(&self.config.scene) {
                tracing::warn!(?error, "failed to push scene settings to the backend");
            }
        }
    }

    fn misbehave(&mut self, handle: ObjectHandle) {
        if !self.misbehaving.contains(&handle) {
            self.misbehaving.push(handle);
        }
    }

    /// Run a callback against one object, containing any fault.
    fn with_object<F>(&mut self, handle: ObjectHandle, f: F) -> bool
    where
        F: FnOnce(&mut dyn Interactable) -> anyhow::Result<()>,
    {
        let object = match self.registry.get(handle) {
            Some(entry) => entry.object.clone(),
            None => return false,
        };
        let result = f(&mut *object.borrow_mut());
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    ?error,
                    "object callback failed; scheduling forced unregistration"
                );
                self.misbehave(handle);
                false
            }
        }
    }

    fn dispatch_all<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut dyn Interactable) -> anyhow::Result<()>,
    {
        let mut order = std::mem::take(&mut self.order_scratch);
        self.registry.collect_order(&mut order);
        for &handle in &order {
            self.with_object(handle, |object| f(object));
        }
        self.order_scratch = order;
    }

    fn create_representation(&mut self, handle: ObjectHandle) -> FeathertopResult<()> {
        let object = match self.registry.get(handle) {
            Some(entry) => entry.object.clone(),
            None => return Err(FeathertopError::NotRegistered),
        };

        let info = object
            .borrow_mut()
            .creation_info()
            .map_err(FeathertopError::Other)?;
        let create = CreateInfo {
            kinematic: info.kinematic,
            gravity_enabled: info.gravity_enabled,
        };

        let description = self.pool.acquire(self.backend.as_mut(), &info.shape)?;
        let instance = match self.backend.create_shape(description, &info.pose, &create) {
            Ok(instance) => instance,
            Err(error) => {
                if let Err(release_error) = self.pool.release(self.backend.as_mut(), description) {
                    tracing::warn!(
                        ?release_error,
                        "failed to release a pooled description after a creation failure"
                    );
                }
                return Err(error.into());
            }
        };

        if let Some(entry) = self.registry.get_mut(handle) {
            entry.description = Some(description);
            entry.pose = info.pose;
        }
        self.registry.bind_instance(handle, instance);

        object
            .borrow_mut()
            .notify_instance_created(instance)
            .map_err(FeathertopError::Other)?;
        Ok(())
    }

    fn destroy_representation(&mut self, handle: ObjectHandle) -> FeathertopResult<()> {
        let (object, description) = match self.registry.get(handle) {
            Some(entry) => (entry.object.clone(), entry.description),
            None => return Ok(()),
        };

        let instance = self.registry.unbind_instance(handle);
        if let Some(entry) = self.registry.get_mut(handle) {
            entry.description = None;
        }

        let mut first_error: Option<FeathertopError> = None;
        if let Some(instance) = instance {
            self.classifier.forget_instance(instance);
            if let Err(error) = self.backend.destroy_shape(instance) {
                first_error.get_or_insert(error.into());
            }
        }
        if let Some(description) = description {
            if let Err(error) = self.pool.release(self.backend.as_mut(), description) {
                first_error.get_or_insert(error.into());
            }
        }

        if instance.is_some() {
            if let Err(error) = object.borrow_mut().notify_instance_destroyed() {
                first_error.get_or_insert(FeathertopError::Other(error));
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn update_representations(&mut self) {
        let mut order = std::mem::take(&mut self.order_scratch);
        self.registry.collect_order(&mut order);

        for &handle in &order {
            let (object, instance) = match self.registry.get(handle) {
                Some(entry) => match entry.instance {
                    Some(instance) => (entry.object.clone(), instance),
                    None => continue,
                },
                None => continue,
            };

            let info = match object.borrow_mut().update_info() {
                Ok(info) => info,
                Err(error) => {
                    tracing::warn!(
                        ?error,
                        "object update pull failed; scheduling forced unregistration"
                    );
                    self.misbehave(handle);
                    continue;
                }
            };

            if let Some(entry) = self.registry.get_mut(handle) {
                entry.pose = info.pose;
            }

            if let Err(error) = self.backend.update_shape(instance, &info) {
                tracing::warn!(
                    ?error,
                    "backend rejected a shape update; scheduling forced unregistration"
                );
                self.misbehave(handle);
            }
        }
        self.order_scratch = order;
    }

    fn dispatch_hands_holding(&mut self, frame: &Frame, phase: HoldPhase) {
        let grasped: Vec<ObjectHandle> = self.grasped.clone();
        let mut holding: Vec<&Hand> = Vec::new();

        for object in grasped {
            holding.clear();
            for hand in &frame.hands {
                let is_holding = self
                    .hands
                    .get(&hand.id)
                    .and_then(|tracked| tracked.grasp.as_ref())
                    .map_or(false, |grasp| grasp.object == object);
                if is_holding {
                    holding.push(hand);
                }
            }
            self.with_object(object, |o| o.notify_hands_hold(&holding, phase));
        }
    }

    fn update_state_changes(&mut self, frame: &Frame) -> bool {
        let mut any_grasp_began = false;

        for hand in &frame.hands {
            let mut forced: Option<Classification> = None;

            if !self.hands.contains_key(&hand.id) {
                // An unseen id first tries to adopt a suspended hand of the
                // same handedness. First match in ascending id order wins.
                let adopt = self
                    .hands
                    .iter()
                    .find(|(_, tracked)| {
                        tracked.is_suspended() && tracked.hand.handedness == hand.handedness
                    })
                    .map(|(&id, _)| id);

                if let Some(old_id) = adopt {
                    let mut adopted = self.hands.remove(&old_id).expect("id from iteration");
                    let object = adopted.grasp.as_ref().map(|grasp| grasp.object);

                    if let Some(object) = object {
                        if !self.with_object(object, |o| {
                            o.notify_hand_regained_tracking(hand, old_id)
                        }) {
                            // The object faulted; drop the stale record and
                            // let the reap deal with the object itself.
                            if let Some(grasp) = adopted.grasp.take() {
                                self.forget_grasp_bookkeeping(old_id, grasp);
                            }
                            continue;
                        }

                        // The grasp survives under the new id: move the
                        // grasping-hand record over and force this tick's
                        // classification so the classifier is not consulted.
                        if let Some(entry) = self.registry.get_mut(object) {
                            for id in entry.grasping_hands.iter_mut() {
                                if *id == old_id {
                                    *id = hand.id;
                                }
                            }
                        }
                        forced = Some(
                            self.registry
                                .get(object)
                                .and_then(|entry| entry.instance)
                                .map(Classification::Grasp)
                                .unwrap_or(Classification::Contact),
                        );
                    }

                    adopted.update(hand, self.clock);
                    self.hands.insert(hand.id, adopted);
                } else {
                    self.hands
                        .insert(hand.id, TrackedHand::new(hand.clone(), self.clock));
                }
            }

            if let Some(tracked) = self.hands.get_mut(&hand.id) {
                tracked.update(hand, self.clock);
            }

            let user_forced = self
                .hands
                .get(&hand.id)
                .and_then(|tracked| tracked.grasp.as_ref())
                .map_or(false, |grasp| grasp.user_forced);
            if user_forced {
                // A user-forced grasp only ends through the release API or a
                // timeout; classification is short-circuited entirely.
                continue;
            }

            let classification = forced.unwrap_or_else(|| self.classify(hand));
            match classification {
                Classification::Grasp(instance) => {
                    match self.registry.resolve_instance(instance) {
                        Some(object) => {
                            let already_holding = self
                                .hands
                                .get(&hand.id)
                                .map_or(false, |tracked| tracked.grasp.is_some());
                            if !already_holding {
                                any_grasp_began = true;
                                self.begin_grasp(hand.id, object, false);
                            }
                        }
                        None => {
                            tracing::error!(
                                ?instance,
                                "received a grasp verdict for an unknown instance handle"
                            );
                        }
                    }
                }
                Classification::Contact => {
                    let holding = self
                        .hands
                        .get(&hand.id)
                        .map_or(false, |tracked| tracked.grasp.is_some());
                    if holding {
                        self.release_grasp(hand.id, ReleaseKind::Released);
                    }
                }
            }
        }

        self.sweep_unseen_hands();
        any_grasp_began
    }

    /// Suspend or remove hands that stopped appearing in frames.
    fn sweep_unseen_hands(&mut self) {
        self.ids_scratch.clear();
        for (&id, tracked) in &self.hands {
            if self.clock - tracked.last_update > 0.0 {
                self.ids_scratch.push(id);
            }
        }

        let stale = std::mem::take(&mut self.ids_scratch);
        for &id in &stale {
            let (grasping, suspended, deadline, hand, object) = {
                let tracked = self.hands.get(&id).expect("id collected above");
                let deadline = match tracked.state {
                    TrackingState::Suspended { deadline } => deadline,
                    TrackingState::Tracked => {
                        tracked.last_update + self.config.max_suspension_time as f64
                    }
                };
                (
                    tracked.grasp.is_some(),
                    tracked.is_suspended(),
                    deadline,
                    tracked.hand.clone(),
                    tracked.grasp.as_ref().map(|grasp| grasp.object),
                )
            };

            // Hands that hold nothing are dropped as soon as they go unseen.
            if !grasping {
                self.hands.remove(&id);
                continue;
            }

            if !suspended {
                if let Some(tracked) = self.hands.get_mut(&id) {
                    tracked.state = TrackingState::Suspended { deadline };
                }
                if let Some(object) = object {
                    self.with_object(object, |o| o.notify_hand_lost_tracking(&hand));
                }
            }

            if self.clock >= deadline {
                self.release_grasp(id, ReleaseKind::Timeout);
                self.hands.remove(&id);
            }
        }
        self.ids_scratch = stale;
        self.ids_scratch.clear();
    }

    fn classify(&mut self, hand: &Hand) -> Classification {
        if !self.config.scene.grasping_enabled {
            return Classification::Contact;
        }
        let dt = self.config.timestep;

        // A hand that is already holding something only re-evaluates that
        // pair; other objects are not candidates until it lets go.
        let held = self
            .hands
            .get(&hand.id)
            .and_then(|tracked| tracked.grasp.as_ref())
            .map(|grasp| grasp.object);
        if let Some(object) = held {
            let instance = match self.registry.get(object).and_then(|entry| entry.instance) {
                Some(instance) => instance,
                None => return Classification::Contact,
            };
            return if self.evaluate_pair(hand, instance, dt) {
                Classification::Grasp(instance)
            } else {
                Classification::Contact
            };
        }

        let mut order = std::mem::take(&mut self.order_scratch);
        self.registry.collect_order(&mut order);

        let mut result = Classification::Contact;
        for &handle in &order {
            let instance = match self.registry.get(handle).and_then(|entry| entry.instance) {
                Some(instance) => instance,
                None => continue,
            };
            if self.evaluate_pair(hand, instance, dt) {
                result = Classification::Grasp(instance);
                break;
            }
        }
        self.order_scratch = order;
        result
    }

    fn evaluate_pair(&mut self, hand: &Hand, instance: InstanceHandle, dt: f32) -> bool {
        let backend = &*self.backend;
        self.classifier.evaluate(hand, instance, dt, |point, radius| {
            match backend.proximity(instance, point, radius) {
                Ok(hit) => hit,
                Err(error) => {
                    tracing::warn!(?error, "proximity query failed; treating as out of range");
                    false
                }
            }
        })
    }

    fn begin_grasp(&mut self, hand_id: u32, object: ObjectHandle, user_forced: bool) {
        let pose = match self.registry.get(object) {
            Some(entry) => entry.pose,
            None => return,
        };
        let hand = match self.hands.get(&hand_id) {
            Some(tracked) => tracked.hand.clone(),
            None => return,
        };

        // The contact points are captured once here and never recomputed;
        // they are what keeps the grip consistent for the grasp's lifetime.
        let mut points = self.point_pool.acquire();
        points.capture(&pose, &hand);

        if let Some(entry) = self.registry.get_mut(object) {
            if !entry.is_grasped() {
                self.grasped.push(object);
            }
            entry.grasping_hands.push(hand_id);
        }
        if let Some(tracked) = self.hands.get_mut(&hand_id) {
            tracked.grasp = Some(Grasp {
                object,
                points,
                user_forced,
            });
        }

        self.with_object(object, |o| o.notify_hand_grasped(&hand));
    }

    fn release_grasp(&mut self, hand_id: u32, kind: ReleaseKind) -> bool {
        let grasp = match self.hands.get_mut(&hand_id) {
            Some(tracked) => match tracked.grasp.take() {
                Some(grasp) => {
                    tracked.state = TrackingState::Tracked;
                    grasp
                }
                None => return false,
            },
            None => return false,
        };
        let hand = self
            .hands
            .get(&hand_id)
            .map(|tracked| tracked.hand.clone())
            .expect("present above");

        let object = grasp.object;
        self.forget_grasp_bookkeeping(hand_id, grasp);

        self.with_object(object, |o| match kind {
            ReleaseKind::Released => o.notify_hand_released(&hand),
            ReleaseKind::Timeout => o.notify_hand_timeout(&hand),
        });
        true
    }

    /// Remove one hand's grasp from the object-side bookkeeping and return
    /// the contact points to the pool.
    fn forget_grasp_bookkeeping(&mut self, hand_id: u32, grasp: Grasp) {
        let object = grasp.object;
        let mut still_grasped = false;
        if let Some(entry) = self.registry.get_mut(object) {
            entry.grasping_hands.retain(|id| *id != hand_id);
            still_grasped = entry.is_grasped();
        }
        if !still_grasped {
            self.grasped.retain(|other| *other != object);
        }
        self.point_pool.release(grasp.points);
    }

    fn solve_grasps(&mut self, frame: &Frame) {
        let grasped: Vec<ObjectHandle> = self.grasped.clone();

        for object in grasped {
            let pose = match self.registry.get(object) {
                Some(entry) => entry.pose,
                None => continue,
            };

            let solver = &mut self.solver;
            solver.reset();

            let hands = &self.hands;
            for hand in &frame.hands {
                let points = match hands
                    .get(&hand.id)
                    .and_then(|tracked| tracked.grasp.as_ref())
                    .filter(|grasp| grasp.object == object)
                {
                    Some(grasp) => &grasp.points,
                    None => continue,
                };

                for (f, finger) in hand.fingers.iter().enumerate() {
                    for (b, bone) in finger.bones.iter().enumerate() {
                        // Solve in object-centred space so the result is a
                        // delta on the current pose.
                        let captured = points.world_position(&pose, f, b);
                        solver.add_point(
                            captured - pose.translation,
                            bone.position - pose.translation,
                            1.0,
                        );
                    }
                }
            }

            if self.solver.is_empty() {
                // Every holder is suspended; the object keeps its pose.
                continue;
            }

            let (rotation, translation) = self.solver.solve();
            let target = Pose::new(
                (rotation * pose.rotation).normalize(),
                pose.translation + translation,
            );
            self.with_object(object, |o| o.notify_solved_pose(target));
        }
    }

    fn dispatch_results(&mut self) {
        let mut results = std::mem::take(&mut self.results_scratch);

        match self.backend.instance_results(&mut results) {
            Ok(()) => {
                for index in 0..results.len() {
                    let result = results[index];
                    match self.registry.resolve_instance(result.instance) {
                        Some(handle) => {
                            self.with_object(handle, |o| o.notify_simulation_results(&result));
                        }
                        None => {
                            tracing::error!(
                                instance = ?result.instance,
                                "received results for an unknown instance handle"
                            );
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!(?error, "failed to collect simulation results");
            }
        }
        self.results_scratch = results;
    }

    fn reap_misbehaving(&mut self) {
        if self.misbehaving.is_empty() {
            return;
        }
        let misbehaving = std::mem::take(&mut self.misbehaving);
        for handle in misbehaving {
            if !self.registry.contains(handle) {
                continue;
            }
            if let Err(error) = self.unregister(handle) {
                tracing::warn!(?error, "failed to forcibly unregister a misbehaving object");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use anyhow::bail;
    use glam::Vec3;

    use crate::backend::{BackendError, DescriptionHandle, ResultFlags, UpdateInfo};
    use crate::components::ShapeDescription;
    use crate::interactable::CreationInfo;

    const DT: f32 = 1.0 / 72.0;

    #[derive(Default)]
    struct BackendState {
        scene: Option<SceneConfig>,
        descriptions: HashMap<DescriptionHandle, (ShapeDescription, usize)>,
        next_description: u64,
        instances: BTreeMap<InstanceHandle, (DescriptionHandle, Pose)>,
        next_instance: u64,
        hands: Vec<Hand>,
        steps: usize,
    }

    /// Scripted in-memory backend; shares state with the test through an Rc
    /// so assertions can look inside after the manager takes ownership.
    #[derive(Clone, Default)]
    struct TestBackend {
        state: Rc<RefCell<BackendState>>,
    }

    impl SimulationBackend for TestBackend {
        fn create_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            if state.scene.is_some() {
                return Err(BackendError::AlreadyEnabled);
            }
            state.scene = Some(*config);
            Ok(())
        }

        fn destroy_scene(&mut self) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            if state.scene.is_none() {
                return Err(BackendError::NotEnabled);
            }
            if !state.instances.is_empty() || !state.descriptions.is_empty() {
                return Err(BackendError::ReferencesRemain);
            }
            state.scene = None;
            state.hands.clear();
            Ok(())
        }

        fn update_scene(&mut self, config: &SceneConfig) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            if state.scene.is_none() {
                return Err(BackendError::NotEnabled);
            }
            state.scene = Some(*config);
            Ok(())
        }

        fn create_description(
            &mut self,
            shape: &ShapeDescription,
        ) -> Result<DescriptionHandle, BackendError> {
            let mut state = self.state.borrow_mut();
            if state.scene.is_none() {
                return Err(BackendError::NotEnabled);
            }
            state.next_description += 1;
            let handle = DescriptionHandle(state.next_description);
            state.descriptions.insert(handle, (shape.clone(), 0));
            Ok(handle)
        }

        fn destroy_description(
            &mut self,
            description: DescriptionHandle,
        ) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            match state.descriptions.get(&description) {
                None => Err(BackendError::InvalidHandle),
                Some((_, count)) if *count > 0 => Err(BackendError::ReferencesRemain),
                Some(_) => {
                    state.descriptions.remove(&description);
                    Ok(())
                }
            }
        }

        fn create_shape(
            &mut self,
            description: DescriptionHandle,
            pose: &Pose,
            _info: &CreateInfo,
        ) -> Result<InstanceHandle, BackendError> {
            let mut state = self.state.borrow_mut();
            match state.descriptions.get_mut(&description) {
                None => return Err(BackendError::InvalidHandle),
                Some((_, count)) => *count += 1,
            }
            state.next_instance += 1;
            let handle = InstanceHandle(state.next_instance);
            state.instances.insert(handle, (description, *pose));
            Ok(handle)
        }

        fn destroy_shape(&mut self, instance: InstanceHandle) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            let (description, _) = state
                .instances
                .remove(&instance)
                .ok_or(BackendError::InvalidHandle)?;
            if let Some((_, count)) = state.descriptions.get_mut(&description) {
                *count = count.saturating_sub(1);
            }
            Ok(())
        }

        fn update_shape(
            &mut self,
            instance: InstanceHandle,
            info: &UpdateInfo,
        ) -> Result<(), BackendError> {
            let mut state = self.state.borrow_mut();
            match state.instances.get_mut(&instance) {
                None => Err(BackendError::InvalidHandle),
                Some((_, pose)) => {
                    *pose = info.pose;
                    Ok(())
                }
            }
        }

        fn update_hands(&mut self, hands: &[Hand]) -> Result<(), BackendError> {
            self.state.borrow_mut().hands = hands.to_vec();
            Ok(())
        }

        fn step(&mut self, _dt: f32) -> Result<(), BackendError> {
            self.state.borrow_mut().steps += 1;
            Ok(())
        }

        fn instance_results(
            &mut self,
            results: &mut Vec<InstanceResults>,
        ) -> Result<(), BackendError> {
            results.clear();
            let state = self.state.borrow();
            for &instance in state.instances.keys() {
                results.push(InstanceResults {
                    instance,
                    flags: ResultFlags::empty(),
                    linear_velocity: Vec3::ZERO,
                    angular_velocity: Vec3::ZERO,
                    max_hand_depth: 0.0,
                });
            }
            Ok(())
        }

        fn proximity(
            &self,
            instance: InstanceHandle,
            point: Vec3,
            radius: f32,
        ) -> Result<bool, BackendError> {
            let state = self.state.borrow();
            let (description, pose) = state
                .instances
                .get(&instance)
                .ok_or(BackendError::InvalidHandle)?;
            let shape_radius = match state.descriptions.get(description) {
                Some((ShapeDescription::Sphere { radius }, _)) => *radius,
                _ => 0.0,
            };
            Ok((point - pose.translation).length() - shape_radius <= radius)
        }
    }

    /// Records every notification it receives; can be told to fail on one.
    #[derive(Default)]
    struct TestObject {
        radius: f32,
        pose: Pose,
        events: Vec<String>,
        fail_on: Option<&'static str>,
        solved: Vec<Pose>,
        holds: usize,
    }

    impl TestObject {
        fn new(radius: f32) -> Rc<RefCell<TestObject>> {
            Rc::new(RefCell::new(TestObject {
                radius,
                ..Default::default()
            }))
        }

        fn record(&mut self, event: String) -> anyhow::Result<()> {
            let failing = self.fail_on.map_or(false, |name| event.starts_with(name));
            self.events.push(event);
            if failing {
                bail!("forced failure");
            }
            Ok(())
        }

        fn count(&self, event: &str) -> usize {
            self.events.iter().filter(|other| *other == event).count()
        }
    }

    impl Interactable for TestObject {
        fn creation_info(&mut self) -> anyhow::Result<CreationInfo> {
            self.record("creation_info".to_string())?;
            Ok(CreationInfo {
                shape: ShapeDescription::Sphere {
                    radius: self.radius,
                },
                pose: self.pose,
                kinematic: false,
                gravity_enabled: false,
            })
        }

        fn update_info(&mut self) -> anyhow::Result<UpdateInfo> {
            if self.fail_on == Some("update_info") {
                bail!("forced failure");
            }
            Ok(UpdateInfo {
                pose: self.pose,
                ..Default::default()
            })
        }

        fn notify_registered(&mut self, _handle: ObjectHandle) -> anyhow::Result<()> {
            self.record("registered".to_string())
        }

        fn notify_unregistered(&mut self) -> anyhow::Result<()> {
            self.record("unregistered".to_string())
        }

        fn notify_pre_solve(&mut self, _clock: f64) -> anyhow::Result<()> {
            if self.fail_on == Some("pre_solve") {
                bail!("forced failure");
            }
            Ok(())
        }

        fn notify_hand_grasped(&mut self, _hand: &Hand) -> anyhow::Result<()> {
            self.record("grasped".to_string())
        }

        fn notify_hand_released(&mut self, _hand: &Hand) -> anyhow::Result<()> {
            self.record("released".to_string())
        }

        fn notify_hand_lost_tracking(&mut self, _hand: &Hand) -> anyhow::Result<()> {
            self.record("lost_tracking".to_string())
        }

        fn notify_hand_regained_tracking(
            &mut self,
            _hand: &Hand,
            old_id: u32,
        ) -> anyhow::Result<()> {
            self.record(format!("regained_tracking:{old_id}"))
        }

        fn notify_hand_timeout(&mut self, _hand: &Hand) -> anyhow::Result<()> {
            self.record("timeout".to_string())
        }

        fn notify_hands_hold(&mut self, _hands: &[&Hand], phase: HoldPhase) -> anyhow::Result<()> {
            if phase == HoldPhase::Physics {
                self.holds += 1;
            }
            Ok(())
        }

        fn notify_solved_pose(&mut self, target: Pose) -> anyhow::Result<()> {
            self.solved.push(target);
            self.pose = target;
            Ok(())
        }
    }

    fn test_config() -> ManagerConfig {
        let mut config = ManagerConfig::default();
        // Generous probe radii keep the scripted hands simple.
        config.classifier.finger_radius = 0.05;
        config.classifier.thumb_radius = 0.05;
        config
    }

    fn test_manager() -> (InteractionManager, TestBackend) {
        let backend = TestBackend::default();
        let mut manager = InteractionManager::new(Box::new(backend.clone()), test_config());
        manager.enable().unwrap();
        (manager, backend)
    }

    /// Thumb and index resting on a 10 cm sphere at the origin, curled
    /// enough to grip, with bone joints spread around the grip.
    fn gripping_hand(id: u32) -> Hand {
        let mut hand = Hand::left(id);
        for (f, finger) in hand.fingers.iter_mut().enumerate() {
            finger.curl = 0.3;
            finger.tip_position = Vec3::new(1.0, 1.0, 1.0);
            for (b, bone) in finger.bones.iter_mut().enumerate() {
                bone.position = Vec3::new(
                    0.12 + 0.02 * f as f32,
                    0.03 * b as f32,
                    0.01 * ((f + b) % 3) as f32,
                );
            }
        }
        hand.fingers[0].tip_position = Vec3::new(0.1, 0.0, 0.0);
        hand.fingers[1].tip_position = Vec3::new(0.0, 0.1, 0.0);
        hand
    }

    fn open_hand(id: u32) -> Hand {
        let mut hand = Hand::left(id);
        for finger in hand.fingers.iter_mut() {
            finger.curl = 0.3;
            finger.tip_position = Vec3::new(1.0, 1.0, 1.0);
        }
        hand
    }

    fn translated(mut hand: Hand, delta: Vec3) -> Hand {
        for finger in hand.fingers.iter_mut() {
            finger.tip_position += delta;
            for bone in finger.bones.iter_mut() {
                bone.position += delta;
            }
        }
        hand
    }

    fn frame(hands: Vec<Hand>) -> Frame {
        Frame {
            id: 0,
            timestamp: 0.0,
            hands,
        }
    }

    #[test]
    fn double_registration_fails() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);

        let handle = manager.register(object.clone()).unwrap();
        assert!(manager.is_registered(handle));
        assert!(matches!(
            manager.register(object),
            Err(FeathertopError::AlreadyRegistered)
        ));
        assert_eq!(manager.registered_object_count(), 1);
    }

    #[test]
    fn unregister_requires_registration() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        manager.unregister(handle).unwrap();
        assert_eq!(object.borrow().count("unregistered"), 1);
        assert!(matches!(
            manager.unregister(handle),
            Err(FeathertopError::NotRegistered)
        ));
        assert_eq!(manager.registered_object_count(), 0);
    }

    #[test]
    fn registration_while_disabled_defers_instance_creation() {
        let backend = TestBackend::default();
        let mut manager = InteractionManager::new(Box::new(backend.clone()), test_config());

        let object = TestObject::new(0.1);
        let handle = manager.register(object).unwrap();
        assert!(backend.state.borrow().instances.is_empty());

        manager.enable().unwrap();
        assert_eq!(backend.state.borrow().instances.len(), 1);

        manager.disable();
        assert!(backend.state.borrow().instances.is_empty());
        assert!(backend.state.borrow().descriptions.is_empty());
        assert!(backend.state.borrow().scene.is_none());
        assert!(manager.is_registered(handle));

        // Enable again: the representation comes back.
        manager.enable().unwrap();
        assert_eq!(backend.state.borrow().instances.len(), 1);
    }

    #[test]
    fn identical_shapes_share_a_pooled_description() {
        let (mut manager, backend) = test_manager();
        let first = manager.register(TestObject::new(0.1)).unwrap();
        let second = manager.register(TestObject::new(0.1)).unwrap();
        let third = manager.register(TestObject::new(0.25)).unwrap();

        assert_eq!(backend.state.borrow().descriptions.len(), 2);
        assert_eq!(backend.state.borrow().instances.len(), 3);

        manager.unregister(first).unwrap();
        assert_eq!(backend.state.borrow().descriptions.len(), 2);

        manager.unregister(second).unwrap();
        assert_eq!(backend.state.borrow().descriptions.len(), 1);

        manager.unregister(third).unwrap();
        assert!(backend.state.borrow().descriptions.is_empty());
    }

    #[test]
    fn update_requires_enable() {
        let backend = TestBackend::default();
        let mut manager = InteractionManager::new(Box::new(backend), test_config());
        assert!(matches!(
            manager.update(&frame(vec![])),
            Err(FeathertopError::NotEnabled)
        ));
    }

    #[test]
    fn hand_grasps_and_holds_object() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();

        assert_eq!(manager.try_get_grasped_object(1), Some(handle));
        assert!(manager.is_any_object_grasped());
        assert_eq!(manager.grasped_objects(), &[handle]);
        assert_eq!(object.borrow().count("grasped"), 1);
        // The grasp began mid-tick, so the object got its first holding
        // callback before the tick ended.
        assert!(object.borrow().holds >= 1);
    }

    #[test]
    fn suspension_preserves_grasp_until_timeout() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));

        // One tick without the hand: suspended, still grasping.
        manager.update(&frame(vec![])).unwrap();
        assert!(manager.is_hand_suspended(1));
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));
        assert_eq!(object.borrow().count("lost_tracking"), 1);
        assert_eq!(object.borrow().count("timeout"), 0);

        // Run past the suspension deadline.
        for _ in 0..45 {
            manager.update(&frame(vec![])).unwrap();
        }
        assert!(!manager.has_tracked_hand(1));
        assert!(!manager.is_any_object_grasped());
        assert_eq!(object.borrow().count("timeout"), 1);
        assert_eq!(object.borrow().count("released"), 0);

        // The timeout fired exactly once; further empty ticks change nothing.
        for _ in 0..5 {
            manager.update(&frame(vec![])).unwrap();
        }
        assert_eq!(object.borrow().count("timeout"), 1);
    }

    #[test]
    fn reassociation_adopts_a_suspended_hand() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        manager.update(&frame(vec![])).unwrap();
        assert!(manager.is_hand_suspended(1));

        // A brand-new id of the same handedness shows up. Its fingers do not
        // even satisfy the classifier; the grasp survives anyway because
        // re-association forces the verdict.
        manager.update(&frame(vec![open_hand(7)])).unwrap();

        assert!(!manager.has_tracked_hand(1));
        assert!(manager.has_tracked_hand(7));
        assert!(!manager.is_hand_suspended(7));
        assert_eq!(manager.try_get_grasped_object(7), Some(handle));
        assert_eq!(object.borrow().count("regained_tracking:1"), 1);
        assert_eq!(object.borrow().count("timeout"), 0);
    }

    #[test]
    fn multiple_hands_grasp_one_object() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        let mut right = gripping_hand(2);
        right.handedness = crate::components::Handedness::Right;

        manager
            .update(&frame(vec![gripping_hand(1), right.clone()]))
            .unwrap();
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));
        assert_eq!(manager.try_get_grasped_object(2), Some(handle));
        assert_eq!(manager.grasped_objects().len(), 1);
        assert_eq!(object.borrow().count("grasped"), 2);

        // The right hand lets go; the object stays grasped by the left.
        let mut right_open = open_hand(2);
        right_open.handedness = crate::components::Handedness::Right;
        manager
            .update(&frame(vec![gripping_hand(1), right_open]))
            .unwrap();
        assert_eq!(manager.try_get_grasped_object(2), None);
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));
        assert!(manager.is_any_object_grasped());
        assert_eq!(object.borrow().count("released"), 1);
    }

    #[test]
    fn user_forced_grasp_short_circuits_classification() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        assert!(matches!(
            manager.grasp_with_hand(1, handle),
            Err(FeathertopError::UnknownHand(1))
        ));

        manager.update(&frame(vec![open_hand(1)])).unwrap();
        manager.grasp_with_hand(1, handle).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));

        // The hand still is not anywhere near the object, yet the grasp
        // persists through further ticks.
        for _ in 0..5 {
            manager.update(&frame(vec![open_hand(1)])).unwrap();
        }
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));

        assert!(manager.release_hand(1));
        manager.update(&frame(vec![open_hand(1)])).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), None);
        assert!(!manager.release_hand(1));
    }

    #[test]
    fn grasp_with_hand_requires_registration() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object).unwrap();
        manager.unregister(handle).unwrap();

        manager.update(&frame(vec![open_hand(1)])).unwrap();
        assert!(matches!(
            manager.grasp_with_hand(1, handle),
            Err(FeathertopError::NotRegistered)
        ));
    }

    #[test]
    fn misbehaving_object_is_reaped_without_stopping_the_tick() {
        let (mut manager, _) = test_manager();
        let good = TestObject::new(0.1);
        let bad = TestObject::new(0.25);
        bad.borrow_mut().fail_on = Some("pre_solve");

        let good_handle = manager.register(good.clone()).unwrap();
        let bad_handle = manager.register(bad.clone()).unwrap();

        manager.update(&frame(vec![])).unwrap();

        assert!(manager.is_registered(good_handle));
        assert!(!manager.is_registered(bad_handle));
        assert_eq!(bad.borrow().count("unregistered"), 1);

        // The survivor still works: a hand can grasp it next tick.
        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), Some(good_handle));
    }

    #[test]
    fn solved_pose_follows_the_hand() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        manager.register(object.clone()).unwrap();

        let hand = gripping_hand(1);
        manager.update(&frame(vec![hand.clone()])).unwrap();
        assert!(manager.try_get_grasped_object(1).is_some());
        // The begin tick solves against unmoved bones: a no-op delta.
        assert!(!object.borrow().solved.is_empty());

        // Move the whole hand a little; the solve should reproduce the
        // translation exactly (pure-translation correspondence).
        let delta = Vec3::new(0.02, 0.0, 0.0);
        manager
            .update(&frame(vec![translated(hand, delta)]))
            .unwrap();

        let solved = *object.borrow().solved.last().unwrap();
        assert!((solved.translation - delta).length() < 1e-4);
        assert!(solved.rotation.angle_between(glam::Quat::IDENTITY) < 0.01);
    }

    #[test]
    fn disabled_grasping_blocks_grasps() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        manager.register(object).unwrap();
        manager.set_grasping_enabled(false);

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), None);
        assert!(!manager.is_any_object_grasped());
    }

    #[test]
    fn paused_manager_skips_simulation() {
        let (mut manager, backend) = test_manager();
        manager.register(TestObject::new(0.1)).unwrap();
        manager.set_paused(true);

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert!(!manager.has_tracked_hand(1));
        assert_eq!(backend.state.borrow().steps, 0);

        manager.set_paused(false);
        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert!(manager.has_tracked_hand(1));
        assert_eq!(backend.state.borrow().steps, 1);
    }

    #[test]
    fn release_object_forces_release_from_all_hands() {
        let (mut manager, _) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        let mut right = gripping_hand(2);
        right.handedness = crate::components::Handedness::Right;
        manager
            .update(&frame(vec![gripping_hand(1), right]))
            .unwrap();
        assert_eq!(manager.grasped_objects().len(), 1);

        assert!(manager.release_object(handle));
        assert!(!manager.is_any_object_grasped());
        assert_eq!(manager.try_get_grasped_object(1), None);
        assert_eq!(manager.try_get_grasped_object(2), None);
        assert_eq!(object.borrow().count("released"), 2);
        assert!(!manager.release_object(handle));
    }

    #[test]
    fn ungrasping_hands_are_dropped_as_soon_as_they_vanish() {
        let (mut manager, _) = test_manager();
        manager.register(TestObject::new(0.1)).unwrap();

        manager.update(&frame(vec![open_hand(1)])).unwrap();
        assert!(manager.has_tracked_hand(1));

        manager.update(&frame(vec![])).unwrap();
        assert!(!manager.has_tracked_hand(1));
        assert!(!manager.is_hand_suspended(1));
    }

    #[test]
    fn config_roundtrips_through_serde() {
        let config = test_config();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn unregistering_a_grasped_object_releases_it_first() {
        let (mut manager, backend) = test_manager();
        let object = TestObject::new(0.1);
        let handle = manager.register(object.clone()).unwrap();

        manager.update(&frame(vec![gripping_hand(1)])).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), Some(handle));

        manager.unregister(handle).unwrap();
        assert_eq!(manager.try_get_grasped_object(1), None);
        assert!(!manager.is_any_object_grasped());
        assert_eq!(object.borrow().count("released"), 1);
        assert_eq!(object.borrow().count("unregistered"), 1);
        assert!(backend.state.borrow().instances.is_empty());
    }
}
