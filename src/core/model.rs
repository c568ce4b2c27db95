// read-only records of the component data model and the boundary trait the
// engine consumes them through
use serde::{Deserialize, Serialize};

use crate::core::error::ResourceError;
use crate::core::types::{FlagSet, ResourceHandle, SlotKey, Subject, SubjectId, SubjectKind, TaxonomyEntry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: SubjectId,
    pub name: String,
    pub slot: SlotKey,
    pub category: FlagSet,
    //ordered by slot
    pub children: Vec<SubjectId>,
    //may contain cycles
    pub references: Vec<SubjectId>,
    pub instances: Vec<SubjectId>,
    pub parameters: Vec<SubjectId>,
}

impl Component {
    pub fn new(name: impl Into<String>, slot: SlotKey) -> Self {
        Self {
            id: 0, // overwritten by add_component
            name: name.into(),
            slot,
            category: FlagSet::EMPTY,
            children: Vec::new(),
            references: Vec::new(),
            instances: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Component placed in the catch-all slot, as the data model does for
    /// components created without a classification.
    pub fn unclassified(name: impl Into<String>) -> Self {
        Self::new(name, SlotKey::base(TaxonomyEntry::new("default", "Undefined Slot")))
    }

    pub fn with_category(mut self, category: FlagSet) -> Self {
        self.category = category;
        self
    }
}

/// Placement of a component in the geometry model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: SubjectId,
    pub name: String,
    pub component: SubjectId,
    pub instance_type: FlagSet,
    pub parameters: Vec<SubjectId>,
    pub volumes: Vec<SubjectId>,
    pub faces: Vec<SubjectId>,
}

impl Instance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            component: 0, // set by add_instance
            instance_type: FlagSet::EMPTY,
            parameters: Vec::new(),
            volumes: Vec::new(),
            faces: Vec::new(),
        }
    }

    pub fn with_type(mut self, instance_type: FlagSet) -> Self {
        self.instance_type = instance_type;
        self
    }
}

/// Closed space of a geometry model. All measures are computed by the geometry
/// subsystem; `None` means the model has not computed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: SubjectId,
    pub name: String,
    pub resource: ResourceHandle,
    pub volume: Option<f64>,
    pub floor_area: Option<f64>,
    pub height: Option<f64>,
    pub floor_elevation: Option<f64>,
    pub ceiling_elevation: Option<f64>,
    pub faces: Vec<SubjectId>,
    pub instances: Vec<SubjectId>,
}

impl Volume {
    pub fn new(name: impl Into<String>, resource: ResourceHandle) -> Self {
        Self { name: name.into(), resource, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: SubjectId,
    pub name: String,
    pub resource: ResourceHandle,
    pub area: Option<f64>,
    //degrees in [0, 360)
    pub orientation: Option<f64>,
    //signed degrees, 0 = vertical wall
    pub incline: Option<f64>,
    pub holes: Vec<SubjectId>,
    pub instances: Vec<SubjectId>,
}

impl Face {
    pub fn new(name: impl Into<String>, resource: ResourceHandle) -> Self {
        Self { name: name.into(), resource, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Number(f64),
    Text(String),
    Bool(bool),
    #[default]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: SubjectId,
    pub name: String,
    pub value: ParameterValue,
    pub description: String,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub category: FlagSet,
}

impl Parameter {
    pub fn number(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Number(value),
            unit: Some(unit.into()),
            ..Default::default()
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: ParameterValue::Text(value.into()), ..Default::default() }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: FlagSet) -> Self {
        self.category = category;
        self
    }
}

/// Read-only view of a component data model.
///
/// The engine never mutates anything reachable through this trait. Geometry
/// records (volumes, faces) live in externally loaded models: before their
/// attributes are read the engine opens the owning resource once per run and
/// leaves it open; releasing is up to whoever consumed the run's output.
pub trait SubjectSource {
    fn component(&self, id: SubjectId) -> Option<&Component>;
    fn instance(&self, id: SubjectId) -> Option<&Instance>;
    fn volume(&self, id: SubjectId) -> Option<&Volume>;
    fn face(&self, id: SubjectId) -> Option<&Face>;
    fn parameter(&self, id: SubjectId) -> Option<&Parameter>;

    fn open_resource(&self, handle: ResourceHandle) -> Result<(), ResourceError>;

    fn release_resource(&self, _handle: ResourceHandle) {}

    fn contains(&self, subject: Subject) -> bool {
        match subject.kind {
            SubjectKind::Component => self.component(subject.id).is_some(),
            SubjectKind::Instance => self.instance(subject.id).is_some(),
            SubjectKind::Volume => self.volume(subject.id).is_some(),
            SubjectKind::Face => self.face(subject.id).is_some(),
            SubjectKind::Parameter => self.parameter(subject.id).is_some(),
        }
    }
}
