use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the interaction engine.
///
/// Caller-contract violations (double registration, operating on unknown
/// handles) are hard errors here. Collaborator faults are contained at the
/// dispatch site instead and never surface through this enum.
#[derive(Error, Debug)]
pub enum FeathertopError {
    /// The object is already registered with this manager
    #[error("the object is already registered with this manager")]
    AlreadyRegistered,
    /// The object is not registered with this manager
    #[error("the object is not registered with this manager")]
    NotRegistered,
    /// The hand id is unknown to this manager
    #[error("no tracked hand with id {0}")]
    UnknownHand(u32),
    /// The manager has not been enabled
    #[error("the manager is not enabled")]
    NotEnabled,
    /// A backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A collaborator fault surfaced through the registration API
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
