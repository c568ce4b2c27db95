//! Error types for datamap-core
//!
//! 1. MappingError - configuration, lookup and persistence failures
//! 2. ResourceError - lazily opened geometry/model handles that fail to load
//! 3. Result type alias

use thiserror::Error;

use crate::core::types::{ResourceHandle, Subject, SubjectKind};

/// Result type alias for mapping operations
pub type Result<T> = std::result::Result<T, MappingError>;

#[derive(Error, Debug)]
pub enum MappingError {
    /// Root rules must name the sheet they write to
    #[error("rule '{rule}' is a root rule but has no sheet name")]
    MissingSheetName { rule: String },

    /// Property outside the rule kind's vocabulary
    #[error("rule '{rule}': property {property} is not available on {kind:?} subjects")]
    UnsupportedProperty { rule: String, kind: SubjectKind, property: String },

    /// Filter that can never be evaluated against the rule's subjects
    #[error("rule '{rule}': invalid filter: {reason}")]
    UnsupportedFilter { rule: String, reason: String },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("subject {0} not found in the data model")]
    SubjectNotFound(Subject),

    /// Parameters can only hang off components and instances
    #[error("{0} cannot own parameters")]
    InvalidOwner(Subject),

    #[error("rule {0} is not registered with this tool")]
    UnknownRule(usize),

    /// Malformed rule-set document (TOON/JSON), including negative bounds
    #[error("configuration error: {0}")]
    Config(String),

    #[error("table sink error: {0}")]
    Sink(String),
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Config(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource {0:?} is unknown")]
    NotFound(ResourceHandle),

    #[error("resource {handle:?} failed to load: {reason}")]
    LoadFailed { handle: ResourceHandle, reason: String },
}
