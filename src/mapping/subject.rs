//! Read-only adapters over the five subject kinds.
//!
//! Each kind exposes a closed vocabulary of properties (what a rule may
//! extract or filter on) and its relations (what a search may walk to). All
//! lookups go through [`SubjectSource`]; geometry-backed subjects open their
//! resource through the [`TraversalState`] first and count as unavailable when
//! that fails.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::core::model::{ParameterValue, SubjectSource};
use crate::core::state::TraversalState;
use crate::core::types::{
    CellValue, FlagSet, ScalarKind, SlotKey, Subject, SubjectId, SubjectKind, TraversalStrategy,
};

/// Property tag shared by property lists and filter predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    Name,
    Id,
    Slot,
    //flag sets, filter only
    Category,
    Volume,
    FloorArea,
    Height,
    FloorElevation,
    CeilingElevation,
    Area,
    Orientation,
    Incline,
    Value,
    Description,
    Unit,
    Min,
    Max,
}

impl Property {
    /// Scalar kind the property yields; used for typed nulls.
    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            Property::Name | Property::Slot | Property::Description | Property::Unit => ScalarKind::Text,
            _ => ScalarKind::Number,
        }
    }

    pub fn is_extractable(self, kind: SubjectKind) -> bool {
        use Property::*;
        match kind {
            SubjectKind::Component => matches!(self, Name | Id | Slot),
            SubjectKind::Volume => matches!(
                self,
                Name | Id | Volume | FloorArea | Height | FloorElevation | CeilingElevation
            ),
            SubjectKind::Face => matches!(self, Name | Id | Area | Orientation | Incline),
            SubjectKind::Instance => matches!(self, Name | Id),
            SubjectKind::Parameter => matches!(self, Name | Id | Value | Description | Unit | Min | Max),
        }
    }

    pub fn is_filterable(self, kind: SubjectKind) -> bool {
        self.is_extractable(kind)
            || (self == Property::Category
                && matches!(kind, SubjectKind::Component | SubjectKind::Instance | SubjectKind::Parameter))
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Raw attribute value as the predicates see it, borrowed from the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attribute<'a> {
    Text(&'a str),
    Number(f64),
    Bool(bool),
    Slot(&'a SlotKey),
    Flags(FlagSet),
    Null(ScalarKind),
}

impl Attribute<'_> {
    pub fn to_cell(&self) -> CellValue {
        match *self {
            Attribute::Text(s) => CellValue::text(s),
            Attribute::Number(v) => CellValue::Number(v),
            Attribute::Bool(b) => CellValue::Bool(b),
            Attribute::Slot(slot) => CellValue::Text(slot.to_string()),
            Attribute::Flags(flags) => CellValue::Number(flags.0 as f64),
            Attribute::Null(kind) => CellValue::Null(kind),
        }
    }
}

fn optional(value: Option<f64>) -> Attribute<'static> {
    value.map_or(Attribute::Null(ScalarKind::Number), Attribute::Number)
}

/// True when the subject exists and, for geometry, its model could be loaded.
pub fn is_available<S: SubjectSource + ?Sized>(source: &S, state: &mut TraversalState, subject: Subject) -> bool {
    match subject.kind {
        SubjectKind::Volume => match source.volume(subject.id) {
            Some(v) => state.ensure_resource(source, v.resource, subject),
            None => false,
        },
        SubjectKind::Face => match source.face(subject.id) {
            Some(f) => state.ensure_resource(source, f.resource, subject),
            None => false,
        },
        _ => source.contains(subject),
    }
}

/// Attribute lookup for filters. `None` means the subject is unavailable;
/// a property the kind does not have yields a typed null.
pub fn attribute<'a, S: SubjectSource + ?Sized>(
    source: &'a S,
    state: &mut TraversalState,
    subject: Subject,
    property: Property,
) -> Option<Attribute<'a>> {
    if !is_available(source, state, subject) {
        return None;
    }
    let missing = Attribute::Null(property.scalar_kind());
    let id = subject.id as f64;

    let attr = match subject.kind {
        SubjectKind::Component => {
            let c = source.component(subject.id)?;
            match property {
                Property::Name => Attribute::Text(&c.name),
                Property::Id => Attribute::Number(id),
                Property::Slot => Attribute::Slot(&c.slot),
                Property::Category => Attribute::Flags(c.category),
                _ => missing,
            }
        }
        SubjectKind::Instance => {
            let i = source.instance(subject.id)?;
            match property {
                Property::Name => Attribute::Text(&i.name),
                Property::Id => Attribute::Number(id),
                Property::Category => Attribute::Flags(i.instance_type),
                _ => missing,
            }
        }
        SubjectKind::Volume => {
            let v = source.volume(subject.id)?;
            match property {
                Property::Name => Attribute::Text(&v.name),
                Property::Id => Attribute::Number(id),
                Property::Volume => optional(v.volume),
                Property::FloorArea => optional(v.floor_area),
                Property::Height => optional(v.height),
                Property::FloorElevation => optional(v.floor_elevation),
                Property::CeilingElevation => optional(v.ceiling_elevation),
                _ => missing,
            }
        }
        SubjectKind::Face => {
            let f = source.face(subject.id)?;
            match property {
                Property::Name => Attribute::Text(&f.name),
                Property::Id => Attribute::Number(id),
                Property::Area => optional(f.area),
                Property::Orientation => optional(f.orientation),
                Property::Incline => optional(f.incline),
                _ => missing,
            }
        }
        SubjectKind::Parameter => {
            let p = source.parameter(subject.id)?;
            match property {
                Property::Name => Attribute::Text(&p.name),
                Property::Id => Attribute::Number(id),
                Property::Value => match &p.value {
                    ParameterValue::Number(v) => Attribute::Number(*v),
                    ParameterValue::Text(s) => Attribute::Text(s),
                    ParameterValue::Bool(b) => Attribute::Bool(*b),
                    ParameterValue::Empty => Attribute::Null(ScalarKind::Number),
                },
                Property::Description => Attribute::Text(&p.description),
                Property::Unit => p.unit.as_deref().map_or(missing, Attribute::Text),
                Property::Min => optional(p.min),
                Property::Max => optional(p.max),
                Property::Category => Attribute::Flags(p.category),
                _ => missing,
            }
        }
    };
    Some(attr)
}

/// Property value for a cell. Total: unavailable subjects and inapplicable
/// properties give a typed null.
pub fn extract<S: SubjectSource + ?Sized>(
    source: &S,
    state: &mut TraversalState,
    subject: Subject,
    property: Property,
) -> CellValue {
    attribute(source, state, subject, property)
        .map(|attr| attr.to_cell())
        .unwrap_or(CellValue::Null(property.scalar_kind()))
}

//order-preserving, duplicate-free collector
struct Collector {
    seen: FxHashSet<Subject>,
    out: Vec<Subject>,
}

impl Collector {
    fn new() -> Self {
        Self { seen: FxHashSet::default(), out: Vec::new() }
    }

    fn push(&mut self, subject: Subject) {
        if self.seen.insert(subject) {
            self.out.push(subject);
        }
    }

    fn extend(&mut self, kind: SubjectKind, ids: &[SubjectId]) {
        for &id in ids {
            self.push(Subject::new(kind, id));
        }
    }
}

fn volume_faces<S: SubjectSource + ?Sized>(source: &S, state: &mut TraversalState, volume: SubjectId, out: &mut Collector) {
    if let Some(v) = source.volume(volume) {
        if state.ensure_resource(source, v.resource, Subject::volume(volume)) {
            out.extend(SubjectKind::Face, &v.faces);
        }
    }
}

fn instance_faces<S: SubjectSource + ?Sized>(source: &S, state: &mut TraversalState, instance: SubjectId, out: &mut Collector) {
    if let Some(i) = source.instance(instance) {
        out.extend(SubjectKind::Face, &i.faces);
        for &v in &i.volumes {
            volume_faces(source, state, v, out);
        }
    }
}

/// Same-kind neighbours a search re-applies its rule to.
///
/// Components follow children (slot order) and references; faces follow their
/// holes. Other kinds have no same-kind relations.
pub fn related<S: SubjectSource + ?Sized>(
    source: &S,
    state: &mut TraversalState,
    subject: Subject,
    strategy: TraversalStrategy,
) -> Vec<Subject> {
    let mut out = Collector::new();
    match subject.kind {
        SubjectKind::Component => {
            if let Some(c) = source.component(subject.id) {
                if strategy.follows_subtree() {
                    out.extend(SubjectKind::Component, &c.children);
                }
                if strategy.follows_references() {
                    out.extend(SubjectKind::Component, &c.references);
                }
            }
        }
        SubjectKind::Face => {
            if strategy.follows_subtree() {
                if let Some(f) = source.face(subject.id) {
                    if state.ensure_resource(source, f.resource, subject) {
                        out.extend(SubjectKind::Face, &f.holes);
                    }
                }
            }
        }
        _ => {}
    }
    out.out
}

/// First search level of a rule of kind `target` started from `origin`.
///
/// The origin itself is never part of the result.
pub fn entries<S: SubjectSource + ?Sized>(
    source: &S,
    state: &mut TraversalState,
    target: SubjectKind,
    origin: Subject,
    strategy: TraversalStrategy,
) -> Vec<Subject> {
    use SubjectKind::*;

    let mut out = Collector::new();
    match (target, origin.kind) {
        (Component, Component) | (Face, Face) => return related(source, state, origin, strategy),
        (Component, Instance) => {
            if let Some(i) = source.instance(origin.id) {
                out.push(Subject::component(i.component));
            }
        }
        (Component, Volume) | (Instance, Volume) => {
            if let Some(v) = source.volume(origin.id) {
                owners(source, target, &v.instances, &mut out);
            }
        }
        (Component, Face) | (Instance, Face) => {
            if let Some(f) = source.face(origin.id) {
                owners(source, target, &f.instances, &mut out);
            }
        }
        (Instance, Component) => {
            if let Some(c) = source.component(origin.id) {
                out.extend(Instance, &c.instances);
            }
        }
        (Volume, Component) => {
            if let Some(c) = source.component(origin.id) {
                for &i in &c.instances {
                    if let Some(inst) = source.instance(i) {
                        out.extend(Volume, &inst.volumes);
                    }
                }
            }
        }
        (Volume, Instance) => {
            if let Some(i) = source.instance(origin.id) {
                out.extend(Volume, &i.volumes);
            }
        }
        (Face, Component) => {
            if let Some(c) = source.component(origin.id) {
                for &i in &c.instances {
                    instance_faces(source, state, i, &mut out);
                }
            }
        }
        (Face, Instance) => instance_faces(source, state, origin.id, &mut out),
        (Face, Volume) => volume_faces(source, state, origin.id, &mut out),
        (Parameter, Component) => {
            if let Some(c) = source.component(origin.id) {
                out.extend(Parameter, &c.parameters);
            }
        }
        (Parameter, Instance) => {
            if let Some(i) = source.instance(origin.id) {
                out.extend(Parameter, &i.parameters);
            }
        }
        _ => {}
    }
    out.out
}

//owning instances, or their components when the target is a component
fn owners<S: SubjectSource + ?Sized>(source: &S, target: SubjectKind, instances: &[SubjectId], out: &mut Collector) {
    for &i in instances {
        match target {
            SubjectKind::Instance => out.push(Subject::instance(i)),
            _ => {
                if let Some(inst) = source.instance(i) {
                    out.push(Subject::component(inst.component));
                }
            }
        }
    }
}
