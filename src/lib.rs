#![deny(missing_docs)]

//! G'day, and welcome to Feathertop! 👋
//!
//! Feathertop is a frame-driven interaction engine for hand tracking: once
//! per physics tick it works out which registered objects each tracked hand
//! is grasping, tolerates brief tracking loss without dropping a held object,
//! and computes the rigid transform a grasped object should follow from the
//! hand's finger bones.
//!
//! The engine itself never touches a renderer or resolves contact forces —
//! it drives an abstract simulation backend (an in-process
//! [`rapier3d`]-backed one ships in [`contexts`]) and talks to objects
//! through the [`interactable::Interactable`] collaborator interface.

pub use glam;
pub use nalgebra;
pub use rapier3d;

pub use classifier::{ClassifierParameters, GrabClassifier};
pub use feathertop_error::FeathertopError;
pub use kabsch::KabschSolver;
pub use manager::{InteractionManager, ManagerConfig};
pub use registry::ObjectHandle;

/// The abstract simulation backend the engine drives each tick
pub mod backend;
/// Turns finger proximity and curl into discrete grasp verdicts
pub mod classifier;
/// Components are data that describe hands, poses, shapes and contact points
pub mod components;
/// Contexts are wrappers around some external state that the engine will interact with
pub mod contexts;
mod feathertop_error;
/// The interface objects implement to take part in the simulation
pub mod interactable;
/// The accumulating rigid-fit solver behind the grasp solve
pub mod kabsch;
/// The orchestrator that drives one simulation step per physics tick
pub mod manager;
/// Ready-made [`interactable::Interactable`] implementations
pub mod objects;
/// Bookkeeping for registered objects and pooled shape descriptions
pub mod registry;
/// Kitchen sink utility functions
pub mod util;

/// Feathertop result type
pub type FeathertopResult<T> = std::result::Result<T, FeathertopError>;

/// Fingers per tracked hand
pub const NUM_FINGERS: usize = 5;

/// Bone segments per finger
pub const NUM_BONES: usize = 4;

/// Contact correspondences a single hand contributes to a grasp solve
pub const POINTS_PER_HAND: usize = NUM_FINGERS * NUM_BONES;
