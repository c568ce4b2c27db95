// in-memory component data model implementing the subject boundary
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::core::error::{MappingError, ResourceError, Result};
use crate::core::model::{Component, Face, Instance, Parameter, SubjectSource, Volume};
use crate::core::types::{ResourceHandle, Subject, SubjectId, SubjectKind};

/// Reference model used by embedders without their own store and by tests.
///
/// Ids are assigned per kind, starting at 1, so a component and a parameter may
/// share a numeric id. Records are never removed.
#[derive(Debug, Default)]
pub struct ComponentGraph {
    components: FxHashMap<SubjectId, Component>,
    instances: FxHashMap<SubjectId, Instance>,
    volumes: FxHashMap<SubjectId, Volume>,
    faces: FxHashMap<SubjectId, Face>,
    parameters: FxHashMap<SubjectId, Parameter>,
    //handles whose model cannot be loaded, with the reason reported on open
    failing_resources: FxHashMap<ResourceHandle, String>,
    open_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn expect_subject(&self, subject: Subject) -> Result<()> {
        if self.contains(subject) {
            Ok(())
        } else {
            Err(MappingError::SubjectNotFound(subject))
        }
    }

    pub fn add_component(&mut self, mut component: Component) -> SubjectId {
        let id = self.components.len() as SubjectId + 1;
        component.id = id;
        self.components.insert(id, component);
        id
    }

    /// Nest `child` under `parent`, keeping the parent's children ordered by
    /// slot. Equal slots keep insertion order.
    pub fn add_child(&mut self, parent: SubjectId, child: SubjectId) -> Result<()> {
        self.expect_subject(Subject::component(parent))?;
        let slot = self
            .components
            .get(&child)
            .map(|c| c.slot.clone())
            .ok_or(MappingError::SubjectNotFound(Subject::component(child)))?;

        let position = {
            let siblings = &self.components[&parent].children;
            siblings
                .iter()
                .position(|id| self.components[id].slot > slot)
                .unwrap_or(siblings.len())
        };

        if let Some(p) = self.components.get_mut(&parent) {
            p.children.insert(position, child);
        }
        Ok(())
    }

    pub fn add_reference(&mut self, from: SubjectId, to: SubjectId) -> Result<()> {
        self.expect_subject(Subject::component(to))?;
        let c = self
            .components
            .get_mut(&from)
            .ok_or(MappingError::SubjectNotFound(Subject::component(from)))?;
        if !c.references.contains(&to) {
            c.references.push(to);
        }
        Ok(())
    }

    pub fn add_instance(&mut self, component: SubjectId, mut instance: Instance) -> Result<SubjectId> {
        self.expect_subject(Subject::component(component))?;
        let id = self.instances.len() as SubjectId + 1;
        instance.id = id;
        instance.component = component;
        self.instances.insert(id, instance);
        if let Some(c) = self.components.get_mut(&component) {
            c.instances.push(id);
        }
        Ok(id)
    }

    pub fn add_parameter(&mut self, owner: Subject, mut parameter: Parameter) -> Result<SubjectId> {
        self.expect_subject(owner)?;
        let id = self.parameters.len() as SubjectId + 1;
        parameter.id = id;

        match owner.kind {
            SubjectKind::Component => {
                if let Some(c) = self.components.get_mut(&owner.id) {
                    c.parameters.push(id);
                }
            }
            SubjectKind::Instance => {
                if let Some(i) = self.instances.get_mut(&owner.id) {
                    i.parameters.push(id);
                }
            }
            _ => return Err(MappingError::InvalidOwner(owner)),
        }

        self.parameters.insert(id, parameter);
        Ok(id)
    }

    /// Add a volume and associate it with `instance`.
    pub fn add_volume(&mut self, instance: SubjectId, mut volume: Volume) -> Result<SubjectId> {
        self.expect_subject(Subject::instance(instance))?;
        let id = self.volumes.len() as SubjectId + 1;
        volume.id = id;
        volume.instances.push(instance);
        self.volumes.insert(id, volume);
        if let Some(i) = self.instances.get_mut(&instance) {
            i.volumes.push(id);
        }
        Ok(id)
    }

    /// Add a face that is not attached to anything yet.
    pub fn add_face(&mut self, mut face: Face) -> SubjectId {
        let id = self.faces.len() as SubjectId + 1;
        face.id = id;
        self.faces.insert(id, face);
        id
    }

    pub fn attach_face_to_volume(&mut self, volume: SubjectId, face: SubjectId) -> Result<()> {
        self.expect_subject(Subject::face(face))?;
        let v = self
            .volumes
            .get_mut(&volume)
            .ok_or(MappingError::SubjectNotFound(Subject::volume(volume)))?;
        if !v.faces.contains(&face) {
            v.faces.push(face);
        }
        //the face is owned by whatever owns its volume
        let owners = v.instances.clone();
        if let Some(f) = self.faces.get_mut(&face) {
            for instance in owners {
                if !f.instances.contains(&instance) {
                    f.instances.push(instance);
                }
            }
        }
        Ok(())
    }

    pub fn attach_face_to_instance(&mut self, instance: SubjectId, face: SubjectId) -> Result<()> {
        self.expect_subject(Subject::face(face))?;
        let i = self
            .instances
            .get_mut(&instance)
            .ok_or(MappingError::SubjectNotFound(Subject::instance(instance)))?;
        if !i.faces.contains(&face) {
            i.faces.push(face);
        }
        if let Some(f) = self.faces.get_mut(&face) {
            if !f.instances.contains(&instance) {
                f.instances.push(instance);
            }
        }
        Ok(())
    }

    /// Register `hole` as an opening cut into `face`.
    pub fn add_hole(&mut self, face: SubjectId, hole: SubjectId) -> Result<()> {
        self.expect_subject(Subject::face(hole))?;
        let f = self
            .faces
            .get_mut(&face)
            .ok_or(MappingError::SubjectNotFound(Subject::face(face)))?;
        if !f.holes.contains(&hole) {
            f.holes.push(hole);
        }
        Ok(())
    }

    /// Make every later open of `handle` fail with `reason`.
    pub fn fail_resource(&mut self, handle: ResourceHandle, reason: impl Into<String>) {
        self.failing_resources.insert(handle, reason.into());
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Relaxed)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::Relaxed)
    }
}

impl SubjectSource for ComponentGraph {
    fn component(&self, id: SubjectId) -> Option<&Component> {
        self.components.get(&id)
    }

    fn instance(&self, id: SubjectId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    fn volume(&self, id: SubjectId) -> Option<&Volume> {
        self.volumes.get(&id)
    }

    fn face(&self, id: SubjectId) -> Option<&Face> {
        self.faces.get(&id)
    }

    fn parameter(&self, id: SubjectId) -> Option<&Parameter> {
        self.parameters.get(&id)
    }

    fn open_resource(&self, handle: ResourceHandle) -> std::result::Result<(), ResourceError> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);
        match self.failing_resources.get(&handle) {
            Some(reason) => Err(ResourceError::LoadFailed { handle, reason: reason.clone() }),
            None => Ok(()),
        }
    }

    fn release_resource(&self, _handle: ResourceHandle) {
        self.release_calls.fetch_add(1, Ordering::Relaxed);
    }
}
