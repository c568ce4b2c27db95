// filter predicates: (property, matcher) pairs, AND-combined per rule
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{MappingError, Result};
use crate::core::model::SubjectSource;
use crate::core::state::TraversalState;
use crate::core::types::{CellValue, FlagSet, Subject, TaxonomyEntry};
use crate::mapping::subject::{self, Attribute, Property};

/// Compiled regular expression that must match the whole attribute text.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$"))
            .map_err(|err| MappingError::InvalidPattern { pattern: source.to_string(), source: err })?;
        Ok(Self { source: source.to_string(), regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// How a taxonomy matcher compares against a slot key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotMatch {
    /// compare the taxonomy entry, ignore the free-text extension
    EntryOnly,
    Exact { extension: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Matcher {
    Equals(CellValue),
    Regex(Pattern),
    Taxonomy { entry: TaxonomyEntry, mode: SlotMatch },
    AnyFlag(FlagSet),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub property: Property,
    pub matcher: Matcher,
}

impl FilterPredicate {
    pub fn new(property: Property, matcher: Matcher) -> Self {
        Self { property, matcher }
    }

    pub fn equals(property: Property, value: CellValue) -> Self {
        Self::new(property, Matcher::Equals(value))
    }

    pub fn regex(property: Property, pattern: &str) -> Result<Self> {
        Ok(Self::new(property, Matcher::Regex(Pattern::new(pattern)?)))
    }

    pub fn slot_entry(entry: TaxonomyEntry) -> Self {
        Self::new(Property::Slot, Matcher::Taxonomy { entry, mode: SlotMatch::EntryOnly })
    }

    pub fn slot_exact(entry: TaxonomyEntry, extension: impl Into<String>) -> Self {
        Self::new(
            Property::Slot,
            Matcher::Taxonomy { entry, mode: SlotMatch::Exact { extension: extension.into() } },
        )
    }

    pub fn any_flag(flags: FlagSet) -> Self {
        Self::new(Property::Category, Matcher::AnyFlag(flags))
    }

    /// Why this predicate can never be evaluated, if it can't.
    pub(crate) fn shape_error(&self) -> Option<String> {
        match (&self.matcher, self.property) {
            (Matcher::Taxonomy { .. }, p) if p != Property::Slot => {
                Some(format!("taxonomy matcher needs the Slot property, got {p}"))
            }
            (Matcher::AnyFlag(_), p) if p != Property::Category => {
                Some(format!("flag matcher needs the Category property, got {p}"))
            }
            _ => None,
        }
    }

    pub fn matches_attribute(&self, attr: &Attribute<'_>) -> bool {
        match (&self.matcher, attr) {
            (Matcher::Equals(expected), attr) => {
                let actual = attr.to_cell();
                !actual.is_null() && &actual == expected
            }
            (Matcher::Regex(pattern), Attribute::Text(text)) => pattern.is_match(text),
            (Matcher::Regex(pattern), Attribute::Slot(slot)) => pattern.is_match(&slot.to_string()),
            (Matcher::Taxonomy { entry, mode }, Attribute::Slot(slot)) => {
                slot.entry == *entry
                    && match mode {
                        SlotMatch::EntryOnly => true,
                        SlotMatch::Exact { extension } => slot.extension == *extension,
                    }
            }
            (Matcher::AnyFlag(flags), Attribute::Flags(actual)) => actual.intersects(*flags),
            _ => false,
        }
    }

    pub fn matches<S: SubjectSource + ?Sized>(&self, source: &S, state: &mut TraversalState, subject: Subject) -> bool {
        subject::attribute(source, state, subject, self.property)
            .is_some_and(|attr| self.matches_attribute(&attr))
    }
}

/// AND over `filters`. An empty list matches every available subject; an
/// unavailable subject (missing, or geometry that failed to load) never
/// matches.
pub fn matches_all<S: SubjectSource + ?Sized>(
    filters: &[FilterPredicate],
    source: &S,
    state: &mut TraversalState,
    subject: Subject,
) -> bool {
    if !subject::is_available(source, state, subject) {
        return false;
    }
    filters.iter().all(|f| f.matches(source, state, subject))
}
