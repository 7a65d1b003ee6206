//! Ready-made [`Interactable`](crate::interactable::Interactable)
//! implementations.
pub mod rigid_object;

pub use rigid_object::RigidObject;
