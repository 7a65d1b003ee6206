//! Bookkeeping for registered objects.
//!
//! Objects live in an arena keyed by stable generational handles, so
//! lifetime is explicit and nothing depends on reference identity. The
//! registry also owns the instance-handle lookup (which must stay in lockstep
//! with the backend) and the pooled shape descriptions shared between
//! objects of identical geometry.

use std::collections::HashMap;
use std::rc::Rc;

use generational_arena::{Arena, Index};

use crate::backend::{BackendError, DescriptionHandle, InstanceHandle, SimulationBackend};
use crate::components::{Pose, ShapeDescription};
use crate::interactable::ObjectRef;

/// Stable handle to a registered object.
///
/// Assigned at registration; once the object is unregistered the handle goes
/// stale and is rejected rather than resolving to a newer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(Index);

/// One registered object and the engine-side bookkeeping that travels with it.
pub(crate) struct ObjectEntry {
    pub(crate) object: ObjectRef,
    pub(crate) description: Option<DescriptionHandle>,
    pub(crate) instance: Option<InstanceHandle>,
    /// Ids of the hands grasping this object, in grasp order.
    pub(crate) grasping_hands: Vec<u32>,
    /// The object's pose as of the last pull.
    pub(crate) pose: Pose,
}

impl ObjectEntry {
    pub(crate) fn is_grasped(&self) -> bool {
        !self.grasping_hands.is_empty()
    }
}

/// The set of registered objects.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Arena<ObjectEntry>,
    /// Registration order; the object iteration order for every dispatch.
    order: Vec<ObjectHandle>,
    by_instance: HashMap<InstanceHandle, ObjectHandle>,
}

impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// The handle this exact object is registered under, if it is.
    pub(crate) fn find(&self, object: &ObjectRef) -> Option<ObjectHandle> {
        self.order.iter().copied().find(|handle| {
            self.entries
                .get(handle.0)
                .map_or(false, |entry| Rc::ptr_eq(&entry.object, object))
        })
    }

    pub(crate) fn insert(&mut self, object: ObjectRef) -> ObjectHandle {
        let handle = ObjectHandle(self.entries.insert(ObjectEntry {
            object,
            description: None,
            instance: None,
            grasping_hands: Vec::new(),
            pose: Pose::IDENTITY,
        }));
        self.order.push(handle);
        handle
    }

    pub(crate) fn remove(&mut self, handle: ObjectHandle) -> Option<ObjectEntry> {
        let entry = self.entries.remove(handle.0)?;
        self.order.retain(|other| *other != handle);
        if let Some(instance) = entry.instance {
            self.by_instance.remove(&instance);
        }
        Some(entry)
    }

    pub(crate) fn contains(&self, handle: ObjectHandle) -> bool {
        self.entries.contains(handle.0)
    }

    pub(crate) fn get(&self, handle: ObjectHandle) -> Option<&ObjectEntry> {
        self.entries.get(handle.0)
    }

    pub(crate) fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut ObjectEntry> {
        self.entries.get_mut(handle.0)
    }

    /// Copy the registration order into `out` so the caller can dispatch
    /// while mutating entries.
    pub(crate) fn collect_order(&self, out: &mut Vec<ObjectHandle>) {
        out.clear();
        out.extend_from_slice(&self.order);
    }

    /// Associate a live backend instance with an object. O(1) lookups both
    /// ways from here on.
    pub(crate) fn bind_instance(&mut self, handle: ObjectHandle, instance: InstanceHandle) {
        if let Some(entry) = self.entries.get_mut(handle.0) {
            entry.instance = Some(instance);
            self.by_instance.insert(instance, handle);
        }
    }

    /// Drop the instance association, returning the instance if there was one.
    pub(crate) fn unbind_instance(&mut self, handle: ObjectHandle) -> Option<InstanceHandle> {
        let instance = self.entries.get_mut(handle.0)?.instance.take()?;
        self.by_instance.remove(&instance);
        Some(instance)
    }

    pub(crate) fn resolve_instance(&self, instance: InstanceHandle) -> Option<ObjectHandle> {
        self.by_instance.get(&instance).copied()
    }

    /// Number of live instance associations. Zero after every full teardown.
    pub(crate) fn instance_count(&self) -> usize {
        self.by_instance.len()
    }
}

/// Pooled, reference-counted shape descriptions.
///
/// Identical geometry shares one backend description handle; the handle is
/// destroyed when its last user unregisters or the manager is disabled.
#[derive(Default)]
pub(crate) struct ShapeDescriptionPool {
    by_shape: HashMap<ShapeDescription, DescriptionHandle>,
    refs: HashMap<DescriptionHandle, usize>,
}

impl ShapeDescriptionPool {
    /// Intern `shape`, creating the backend description on first use.
    pub(crate) fn acquire(
        &mut self,
        backend: &mut dyn SimulationBackend,
        shape: &ShapeDescription,
    ) -> Result<DescriptionHandle, BackendError> {
        if let Some(&handle) = self.by_shape.get(shape) {
            *self.refs.entry(handle).or_insert(0) += 1;
            return Ok(handle);
        }

        let handle = backend.create_description(shape)?;
        self.by_shape.insert(shape.clone(), handle);
        self.refs.insert(handle, 1);
        Ok(handle)
    }

    /// Release one use of a description; the backend description is
    /// destroyed when the last use goes away.
    pub(crate) fn release(
        &mut self,
        backend: &mut dyn SimulationBackend,
        handle: DescriptionHandle,
    ) -> Result<(), BackendError> {
        let count = self
            .refs
            .get_mut(&handle)
            .ok_or(BackendError::InvalidHandle)?;
        *count -= 1;
        if *count == 0 {
            self.refs.remove(&handle);
            self.by_shape.retain(|_, other| *other != handle);
            backend.destroy_description(handle)?;
        }
        Ok(())
    }

    /// Drop every pooled description, best-effort. Used on disable, where
    /// teardown must always complete.
    pub(crate) fn clear(&mut self, backend: &mut dyn SimulationBackend) {
        for (&handle, _) in self.refs.iter() {
            if let Err(error) = backend.destroy_description(handle) {
                tracing::warn!(?error, "failed to destroy pooled shape description");
            }
        }
        self.refs.clear();
        self.by_shape.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
