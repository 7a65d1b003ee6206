//! Contexts are wrappers around the external state the engine drives each
//! tick: the physics simulation and the hand-tracking stream.
pub mod physics_context;
pub mod tracking_context;

pub use physics_context::PhysicsContext;
pub use tracking_context::{TrackingConfig, TrackingContext};
