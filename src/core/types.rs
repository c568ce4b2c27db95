// shared value types: ids, grid coordinates, cell values, rule enums
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

pub type SubjectId = u64;
pub type ToolId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    Component,
    Volume,
    Face,
    Instance,
    Parameter,
}

/// Handle to one domain object. Identity is `(kind, id)`, so a component and a
/// parameter with the same numeric id are different subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: SubjectId,
}

impl Subject {
    pub fn new(kind: SubjectKind, id: SubjectId) -> Self {
        Self { kind, id }
    }

    pub fn component(id: SubjectId) -> Self {
        Self::new(SubjectKind::Component, id)
    }

    pub fn volume(id: SubjectId) -> Self {
        Self::new(SubjectKind::Volume, id)
    }

    pub fn face(id: SubjectId) -> Self {
        Self::new(SubjectKind::Face, id)
    }

    pub fn instance(id: SubjectId) -> Self {
        Self::new(SubjectKind::Instance, id)
    }

    pub fn parameter(id: SubjectId) -> Self {
        Self::new(SubjectKind::Parameter, id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// One output cell position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoordinate {
    pub row: i64,
    pub column: i64,
}

impl GridCoordinate {
    pub const ORIGIN: GridCoordinate = GridCoordinate { row: 0, column: 0 };

    pub const fn new(row: i64, column: i64) -> Self {
        Self { row, column }
    }

    pub const fn scale(self, factor: i64) -> Self {
        Self { row: self.row * factor, column: self.column * factor }
    }
}

impl Add for GridCoordinate {
    type Output = GridCoordinate;

    fn add(self, rhs: GridCoordinate) -> GridCoordinate {
        GridCoordinate::new(self.row + rhs.row, self.column + rhs.column)
    }
}

impl AddAssign for GridCoordinate {
    fn add_assign(&mut self, rhs: GridCoordinate) {
        self.row += rhs.row;
        self.column += rhs.column;
    }
}

impl Sub for GridCoordinate {
    type Output = GridCoordinate;

    fn sub(self, rhs: GridCoordinate) -> GridCoordinate {
        GridCoordinate::new(self.row - rhs.row, self.column - rhs.column)
    }
}

impl From<(i64, i64)> for GridCoordinate {
    fn from((row, column): (i64, i64)) -> Self {
        Self::new(row, column)
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Text,
    Number,
    Bool,
}

/// Scalar written into a sheet cell. `Null` keeps the kind of value it stands
/// in for, so consumers can tell an empty unit from an empty number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null(ScalarKind),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            CellValue::Text(_) => ScalarKind::Text,
            CellValue::Number(_) => ScalarKind::Number,
            CellValue::Bool(_) => ScalarKind::Bool,
            CellValue::Null(kind) => *kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Number(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Null(kind) => write!(f, "null<{kind:?}>"),
        }
    }
}

/// Enum-flag set; predicates match on a non-zero overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagSet(pub u32);

impl FlagSet {
    pub const EMPTY: FlagSet = FlagSet(0);

    pub fn intersects(self, other: FlagSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: FlagSet) -> FlagSet {
        FlagSet(self.0 | other.0)
    }
}

/// Controlled-vocabulary tag. Two entries are the same entry when both the
/// taxonomy and the key agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub taxonomy: String,
    pub key: String,
}

impl TaxonomyEntry {
    pub fn new(taxonomy: impl Into<String>, key: impl Into<String>) -> Self {
        Self { taxonomy: taxonomy.into(), key: key.into() }
    }
}

/// Key under which a child component sits in its parent: a taxonomy entry plus
/// an optional free-text extension ("Room" + "2").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub entry: TaxonomyEntry,
    #[serde(default)]
    pub extension: String,
}

impl SlotKey {
    pub fn new(entry: TaxonomyEntry, extension: impl Into<String>) -> Self {
        Self { entry, extension: extension.into() }
    }

    pub fn base(entry: TaxonomyEntry) -> Self {
        Self::new(entry, "")
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extension.is_empty() {
            write!(f, "{}", self.entry.key)
        } else {
            write!(f, "{} {}", self.entry.key, self.extension)
        }
    }
}

/// Externally owned geometry/model handle, opened lazily during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingDirection {
    #[default]
    Horizontal,
    Vertical,
}

impl MappingDirection {
    /// grid step between two consecutive properties of one match
    pub fn step(self) -> GridCoordinate {
        match self {
            MappingDirection::Horizontal => GridCoordinate::new(0, 1),
            MappingDirection::Vertical => GridCoordinate::new(1, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferencePoint {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ReferencePoint {
    /// Base (top-left) cell of an extent of `rows x columns` whose reference
    /// corner sits on `anchor`.
    pub fn base_cell(self, anchor: GridCoordinate, rows: i64, columns: i64) -> GridCoordinate {
        let dr = (rows - 1).max(0);
        let dc = (columns - 1).max(0);
        match self {
            ReferencePoint::TopLeft => anchor,
            ReferencePoint::TopRight => GridCoordinate::new(anchor.row, anchor.column - dc),
            ReferencePoint::BottomLeft => GridCoordinate::new(anchor.row - dr, anchor.column),
            ReferencePoint::BottomRight => GridCoordinate::new(anchor.row - dr, anchor.column - dc),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraversalStrategy {
    Subtree,
    References,
    #[default]
    SubtreeAndReferences,
}

impl TraversalStrategy {
    pub fn follows_subtree(self) -> bool {
        matches!(self, TraversalStrategy::Subtree | TraversalStrategy::SubtreeAndReferences)
    }

    pub fn follows_references(self) -> bool {
        matches!(self, TraversalStrategy::References | TraversalStrategy::SubtreeAndReferences)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterRange {
    #[default]
    SingleValue,
    CurrentRow,
    CurrentColumn,
    Table,
}

impl ParameterRange {
    pub fn is_block(self) -> bool {
        !matches!(self, ParameterRange::SingleValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_arithmetic() {
        let a = GridCoordinate::new(2, 3);
        let b = GridCoordinate::new(1, -1);
        assert_eq!(a + b, GridCoordinate::new(3, 2));
        assert_eq!(a - b, GridCoordinate::new(1, 4));
        assert_eq!(b.scale(3), GridCoordinate::new(3, -3));

        let mut c = a;
        c += b;
        assert_eq!(c, GridCoordinate::new(3, 2));
        assert_eq!(GridCoordinate::from((4, 5)), GridCoordinate::new(4, 5));
    }

    #[test]
    fn reference_point_moves_base_cell_against_extent() {
        let anchor = GridCoordinate::new(10, 10);
        assert_eq!(ReferencePoint::TopLeft.base_cell(anchor, 1, 3), anchor);
        assert_eq!(ReferencePoint::TopRight.base_cell(anchor, 1, 3), GridCoordinate::new(10, 8));
        assert_eq!(ReferencePoint::BottomLeft.base_cell(anchor, 3, 1), GridCoordinate::new(8, 10));
        assert_eq!(ReferencePoint::BottomRight.base_cell(anchor, 2, 4), GridCoordinate::new(9, 7));
        //empty extent never moves the anchor
        assert_eq!(ReferencePoint::BottomRight.base_cell(anchor, 0, 0), anchor);
    }

    #[test]
    fn same_numeric_id_of_different_kinds_is_distinct() {
        assert_ne!(Subject::component(7), Subject::parameter(7));
        assert_eq!(Subject::component(7), Subject::new(SubjectKind::Component, 7));
    }

    #[test]
    fn flag_sets_match_on_overlap_only() {
        assert!(FlagSet(0b0110).intersects(FlagSet(0b0100)));
        assert!(!FlagSet(0b0110).intersects(FlagSet(0b1001)));
        assert!(!FlagSet::EMPTY.intersects(FlagSet(u32::MAX)));
        assert_eq!(FlagSet(1).union(FlagSet(4)), FlagSet(5));
    }

    #[test]
    fn slot_key_display_omits_empty_extension() {
        let entry = TaxonomyEntry::new("arch", "Room");
        assert_eq!(SlotKey::base(entry.clone()).to_string(), "Room");
        assert_eq!(SlotKey::new(entry, "2").to_string(), "Room 2");
    }
}
