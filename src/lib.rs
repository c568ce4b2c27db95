//! Rule-driven data mapping.
//!
//! Mapping rules walk a component model (components, their instances,
//! volumes, faces and parameters) and write selected attributes of the
//! subjects they match into named 2D sheets. `core` holds the data model and
//! run state, `mapping` the rules, the engine that executes them and the tool
//! that binds rules to root subjects.

pub mod core;
pub mod mapping;

pub use crate::core::error::{MappingError, ResourceError, Result};
pub use crate::core::graph::ComponentGraph;
pub use crate::core::model::{Component, Face, Instance, Parameter, ParameterValue, SubjectSource, Volume};
pub use crate::core::output::MappedOutput;
pub use crate::core::state::{Diagnostic, SheetRange, TraversalState};
pub use crate::core::types::{
    CellValue, GridCoordinate, MappingDirection, ParameterRange, ReferencePoint, Subject, SubjectKind,
    TraversalStrategy,
};
pub use crate::mapping::config::RuleSet;
pub use crate::mapping::engine::execute;
pub use crate::mapping::filter::FilterPredicate;
pub use crate::mapping::rule::{MappingRule, RuleKind};
pub use crate::mapping::subject::Property;
pub use crate::mapping::tool::{MappingTool, MemoryTableSink, TableSink, ToolConfig, ValueTable};
