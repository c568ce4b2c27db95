//! Mapping rules.
//!
//! A rule selects subjects of one kind, places an ordered list of their
//! properties on a sheet, and carries child rules that run once per match.
//! The five subject kinds share one struct; the kind tag decides which
//! vocabulary the properties and filters are checked against, and only the
//! parameter kind carries a [`ParameterRange`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{MappingError, Result};
use crate::core::types::{
    GridCoordinate, MappingDirection, ParameterRange, ReferencePoint, SubjectKind, ToolId, TraversalStrategy,
};
use crate::mapping::filter::FilterPredicate;
use crate::mapping::subject::Property;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RuleKind {
    #[default]
    Component,
    Volume,
    Face,
    Instance,
    Parameter {
        #[serde(default)]
        range: ParameterRange,
    },
}

impl RuleKind {
    pub fn subject_kind(self) -> SubjectKind {
        match self {
            RuleKind::Component => SubjectKind::Component,
            RuleKind::Volume => SubjectKind::Volume,
            RuleKind::Face => SubjectKind::Face,
            RuleKind::Instance => SubjectKind::Instance,
            RuleKind::Parameter { .. } => SubjectKind::Parameter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingRule {
    pub kind: RuleKind,
    pub name: String,
    /// Required on root rules; child rules without one write to their
    /// parent's sheet.
    pub sheet_name: Option<String>,
    pub mapping_direction: MappingDirection,
    pub reference_point: ReferencePoint,
    pub offset_from_parent: GridCoordinate,
    pub offset_between_matches: GridCoordinate,
    #[serde(with = "bound")]
    pub max_matches: usize,
    #[serde(with = "bound")]
    pub max_depth: usize,
    pub traversal_strategy: TraversalStrategy,
    pub properties: Vec<Property>,
    pub filters: Vec<FilterPredicate>,
    pub child_rules: Vec<MappingRule>,
    #[serde(skip)]
    owner: Option<ToolId>,
}

impl Default for MappingRule {
    fn default() -> Self {
        Self {
            kind: RuleKind::Component,
            name: String::new(),
            sheet_name: None,
            mapping_direction: MappingDirection::Horizontal,
            reference_point: ReferencePoint::TopLeft,
            offset_from_parent: GridCoordinate::ORIGIN,
            offset_between_matches: GridCoordinate::ORIGIN,
            max_matches: 1,
            max_depth: 1,
            traversal_strategy: TraversalStrategy::SubtreeAndReferences,
            properties: Vec::new(),
            filters: Vec::new(),
            child_rules: Vec::new(),
            owner: None,
        }
    }
}

impl MappingRule {
    /// `max_matches` / `max_depth` value meaning "no limit".
    pub const UNBOUNDED: usize = usize::MAX;

    pub fn new(kind: RuleKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), ..Default::default() }
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self::new(RuleKind::Component, name)
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Self::new(RuleKind::Volume, name)
    }

    pub fn face(name: impl Into<String>) -> Self {
        Self::new(RuleKind::Face, name)
    }

    pub fn instance(name: impl Into<String>) -> Self {
        Self::new(RuleKind::Instance, name)
    }

    pub fn parameter(name: impl Into<String>, range: ParameterRange) -> Self {
        Self::new(RuleKind::Parameter { range }, name)
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet_name = Some(sheet.into());
        self
    }

    pub fn with_direction(mut self, direction: MappingDirection) -> Self {
        self.mapping_direction = direction;
        self
    }

    pub fn with_reference_point(mut self, reference_point: ReferencePoint) -> Self {
        self.reference_point = reference_point;
        self
    }

    pub fn with_offset_from_parent(mut self, row: i64, column: i64) -> Self {
        self.offset_from_parent = GridCoordinate::new(row, column);
        self
    }

    pub fn with_offset_between_matches(mut self, row: i64, column: i64) -> Self {
        self.offset_between_matches = GridCoordinate::new(row, column);
        self
    }

    pub fn with_max_matches(mut self, max_matches: usize) -> Self {
        self.max_matches = max_matches;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_strategy(mut self, strategy: TraversalStrategy) -> Self {
        self.traversal_strategy = strategy;
        self
    }

    pub fn with_properties(mut self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_filter(mut self, filter: FilterPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_child(mut self, child: MappingRule) -> Self {
        self.child_rules.push(child);
        self
    }

    pub fn subject_kind(&self) -> SubjectKind {
        self.kind.subject_kind()
    }

    pub fn parameter_range(&self) -> Option<ParameterRange> {
        match self.kind {
            RuleKind::Parameter { range } => Some(range),
            _ => None,
        }
    }

    /// Tool this rule (or the root of its tree) is registered with.
    pub fn owner(&self) -> Option<ToolId> {
        self.owner
    }

    //owner is a back reference only; it is kept in sync by the tool
    pub(crate) fn set_owner(&mut self, owner: Option<ToolId>) {
        let mut stack = vec![self];
        while let Some(rule) = stack.pop() {
            rule.owner = owner;
            stack.extend(rule.child_rules.iter_mut());
        }
    }

    /// Cells one match occupies as `(rows, columns)`.
    pub fn match_extent(&self) -> (i64, i64) {
        let n = self.properties.len() as i64;
        match self.mapping_direction {
            MappingDirection::Horizontal => (n.min(1), n),
            MappingDirection::Vertical => (n, n.min(1)),
        }
    }

    /// Check this rule as a root rule, then its whole child tree.
    pub fn validate(&self) -> Result<()> {
        let mut stack = vec![(self, true)];
        while let Some((rule, is_root)) = stack.pop() {
            rule.validate_own(is_root)?;
            stack.extend(rule.child_rules.iter().map(|child| (child, false)));
        }
        Ok(())
    }

    fn validate_own(&self, is_root: bool) -> Result<()> {
        let kind = self.subject_kind();

        if is_root && self.sheet_name.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(MappingError::MissingSheetName { rule: self.name.clone() });
        }

        if let Some(p) = self.properties.iter().find(|p| !p.is_extractable(kind)) {
            return Err(MappingError::UnsupportedProperty {
                rule: self.name.clone(),
                kind,
                property: p.to_string(),
            });
        }

        for filter in &self.filters {
            if !filter.property.is_filterable(kind) {
                return Err(MappingError::UnsupportedProperty {
                    rule: self.name.clone(),
                    kind,
                    property: filter.property.to_string(),
                });
            }
            if let Some(reason) = filter.shape_error() {
                return Err(MappingError::UnsupportedFilter { rule: self.name.clone(), reason });
            }
        }
        Ok(())
    }
}

/// Serde form of search bounds: a non-negative integer or `"unbounded"`.
///
/// Floats are accepted when they hold an integral value, since some documents
/// carry every number as a double; negative, fractional and non-finite values
/// are rejected.
mod bound {
    use super::*;

    const UNBOUNDED: &str = "unbounded";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Count(u64),
        Float(f64),
        Word(String),
    }

    pub fn serialize<S: Serializer>(value: &usize, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if *value == MappingRule::UNBOUNDED {
            serializer.serialize_str(UNBOUNDED)
        } else {
            serializer.serialize_u64(*value as u64)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
        use serde::de::Error;

        match Repr::deserialize(deserializer)? {
            Repr::Count(n) => usize::try_from(n).map_err(D::Error::custom),
            Repr::Float(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < usize::MAX as f64 => {
                Ok(f as usize)
            }
            Repr::Float(f) => Err(D::Error::custom(format!("invalid bound {f}: expected a non-negative integer"))),
            Repr::Word(w) if w == UNBOUNDED => Ok(MappingRule::UNBOUNDED),
            Repr::Word(w) => Err(D::Error::custom(format!("invalid bound '{w}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CellValue, FlagSet, TaxonomyEntry};
    use crate::mapping::filter::Matcher;

    fn mk_tree() -> MappingRule {
        MappingRule::component("rooms")
            .with_sheet("Rooms")
            .with_offset_from_parent(2, 3)
            .with_offset_between_matches(1, 0)
            .with_max_matches(MappingRule::UNBOUNDED)
            .with_strategy(TraversalStrategy::Subtree)
            .with_properties([Property::Name, Property::Slot])
            .with_filter(FilterPredicate::regex(Property::Name, "Room.*").unwrap())
            .with_filter(FilterPredicate::slot_exact(TaxonomyEntry::new("arch", "Room"), "1"))
            .with_child(
                MappingRule::parameter("params", ParameterRange::Table)
                    .with_properties([Property::Name, Property::Value, Property::Unit]),
            )
            .with_child(MappingRule::volume("spaces").with_properties([Property::Volume]))
    }

    #[test]
    fn defaults_match_the_rule_contract() {
        let rule = MappingRule::component("r");
        assert_eq!(rule.max_matches, 1);
        assert_eq!(rule.max_depth, 1);
        assert_eq!(rule.reference_point, ReferencePoint::TopLeft);
        assert_eq!(rule.traversal_strategy, TraversalStrategy::SubtreeAndReferences);
        assert_eq!(rule.parameter_range(), None);
        assert_eq!(
            MappingRule::parameter("p", ParameterRange::default()).parameter_range(),
            Some(ParameterRange::SingleValue)
        );
    }

    #[test]
    fn clone_is_deep_and_preserves_order() {
        let original = mk_tree();
        let mut copy = original.clone();
        assert_eq!(copy, original);

        assert_eq!(copy.properties, vec![Property::Name, Property::Slot]);
        assert!(matches!(copy.filters[0].matcher, Matcher::Regex(ref p) if p.as_str() == "Room.*"));
        let kinds: Vec<_> = copy.child_rules.iter().map(|r| r.subject_kind()).collect();
        assert_eq!(kinds, vec![SubjectKind::Parameter, SubjectKind::Volume]);

        //mutating the copy's children leaves the original alone
        copy.child_rules[0].properties.clear();
        assert_eq!(original.child_rules[0].properties.len(), 3);
    }

    #[test]
    fn root_rules_need_a_sheet_but_children_inherit() {
        let err = MappingRule::component("nameless").validate().unwrap_err();
        assert!(matches!(err, MappingError::MissingSheetName { ref rule } if rule == "nameless"));

        let blank = MappingRule::component("blank").with_sheet("  ");
        assert!(blank.validate().is_err());

        assert!(mk_tree().validate().is_ok());
    }

    #[test]
    fn properties_outside_the_vocabulary_are_rejected_anywhere_in_the_tree() {
        let rule = MappingRule::component("root")
            .with_sheet("S")
            .with_child(MappingRule::face("faces").with_properties([Property::Area, Property::FloorArea]));

        match rule.validate().unwrap_err() {
            MappingError::UnsupportedProperty { rule, kind, property } => {
                assert_eq!(rule, "faces");
                assert_eq!(kind, SubjectKind::Face);
                assert_eq!(property, "FloorArea");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn filters_are_checked_against_kind_and_matcher_shape() {
        let category_on_face = MappingRule::face("f")
            .with_sheet("S")
            .with_filter(FilterPredicate::any_flag(FlagSet(1)));
        assert!(matches!(
            category_on_face.validate().unwrap_err(),
            MappingError::UnsupportedProperty { .. }
        ));

        let flags_on_name = MappingRule::component("c")
            .with_sheet("S")
            .with_filter(FilterPredicate::new(Property::Name, Matcher::AnyFlag(FlagSet(1))));
        assert!(matches!(flags_on_name.validate().unwrap_err(), MappingError::UnsupportedFilter { .. }));

        let equals_on_name = MappingRule::component("c")
            .with_sheet("S")
            .with_filter(FilterPredicate::equals(Property::Name, CellValue::text("A")));
        assert!(equals_on_name.validate().is_ok());
    }

    #[test]
    fn owner_is_set_on_the_whole_tree() {
        let mut rule = mk_tree();
        rule.set_owner(Some(7));
        assert_eq!(rule.owner(), Some(7));
        assert!(rule.child_rules.iter().all(|c| c.owner() == Some(7)));
        rule.set_owner(None);
        assert_eq!(rule.child_rules[1].owner(), None);
    }

    #[test]
    fn extent_follows_direction() {
        let rule = MappingRule::component("c").with_properties([Property::Name, Property::Id, Property::Slot]);
        assert_eq!(rule.match_extent(), (1, 3));
        assert_eq!(rule.clone().with_direction(MappingDirection::Vertical).match_extent(), (3, 1));
        assert_eq!(MappingRule::component("empty").match_extent(), (0, 0));
    }

    #[test]
    fn bounds_serialize_as_counts_or_unbounded() {
        let rule = MappingRule::component("c").with_max_matches(MappingRule::UNBOUNDED).with_max_depth(3);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["max_matches"], "unbounded");
        assert_eq!(json["max_depth"], 3);

        let back: MappingRule = serde_json::from_value(json).unwrap();
        assert_eq!(back.max_matches, MappingRule::UNBOUNDED);
        assert_eq!(back.max_depth, 3);

        let float: MappingRule = serde_json::from_str(r#"{"max_depth": 2.0}"#).unwrap();
        assert_eq!(float.max_depth, 2);

        assert!(serde_json::from_str::<MappingRule>(r#"{"max_matches": -1}"#).is_err());
        assert!(serde_json::from_str::<MappingRule>(r#"{"max_matches": 1.5}"#).is_err());
        assert!(serde_json::from_str::<MappingRule>(r#"{"max_depth": "lots"}"#).is_err());
    }
}
