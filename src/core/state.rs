// per-run traversal context: cycle guard, occupied range, lazily opened resources
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::core::error::ResourceError;
use crate::core::model::SubjectSource;
use crate::core::types::{GridCoordinate, ResourceHandle, Subject};

/// Id of one rule search (one rule invocation from one origin subject).
pub type SearchId = u32;

/// Bounding box of written cells. An empty range has zero counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRange {
    pub row_start: i64,
    pub column_start: i64,
    pub row_count: i64,
    pub column_count: i64,
}

impl SheetRange {
    pub fn new(row_start: i64, column_start: i64, row_count: i64, column_count: i64) -> Self {
        Self { row_start, column_start, row_count, column_count }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count <= 0 || self.column_count <= 0
    }

    //exclusive ends
    pub fn row_end(&self) -> i64 {
        self.row_start + self.row_count
    }

    pub fn column_end(&self) -> i64 {
        self.column_start + self.column_count
    }

    pub fn contains(&self, coord: GridCoordinate) -> bool {
        !self.is_empty()
            && coord.row >= self.row_start
            && coord.row < self.row_end()
            && coord.column >= self.column_start
            && coord.column < self.column_end()
    }

    /// Grow the range so it covers `coord`.
    pub fn include(&mut self, coord: GridCoordinate) {
        if self.is_empty() {
            *self = SheetRange::new(coord.row, coord.column, 1, 1);
            return;
        }
        let row_start = self.row_start.min(coord.row);
        let column_start = self.column_start.min(coord.column);
        let row_end = self.row_end().max(coord.row + 1);
        let column_end = self.column_end().max(coord.column + 1);
        *self = SheetRange::new(row_start, column_start, row_end - row_start, column_end - column_start);
    }

    pub fn union(&self, other: &SheetRange) -> SheetRange {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let row_start = self.row_start.min(other.row_start);
        let column_start = self.column_start.min(other.column_start);
        let row_end = self.row_end().max(other.row_end());
        let column_end = self.column_end().max(other.column_end());
        SheetRange::new(row_start, column_start, row_end - row_start, column_end - column_start)
    }
}

/// A subject that could not be evaluated because its geometry model failed to
/// load. The subject was treated as non-matching.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub subject: Subject,
    pub resource: ResourceHandle,
    pub error: ResourceError,
}

/// Context of one top-level execution, shared by every rule of the rule tree.
///
/// The visited set is run-wide: once any rule of the tree has visited a
/// subject, no rule of that run visits it again.
#[derive(Debug, Default)]
pub struct TraversalState {
    visited: FxHashSet<Subject>,
    range: SheetRange,
    released_resources: Vec<ResourceHandle>,
    opened: FxHashSet<ResourceHandle>,
    failed: FxHashMap<ResourceHandle, ResourceError>,
    //(subject, handle) pairs already reported
    reported: FxHashSet<(Subject, ResourceHandle)>,
    diagnostics: Vec<Diagnostic>,
    next_search: SearchId,
}

impl TraversalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_search(&mut self) -> SearchId {
        let id = self.next_search;
        self.next_search += 1;
        id
    }

    pub fn search_count(&self) -> u32 {
        self.next_search
    }

    /// Returns false when `subject` was already visited in this run.
    pub fn mark_visited(&mut self, subject: Subject) -> bool {
        self.visited.insert(subject)
    }

    pub fn is_visited(&self, subject: Subject) -> bool {
        self.visited.contains(&subject)
    }

    pub fn record_write(&mut self, coord: GridCoordinate) {
        self.range.include(coord);
    }

    pub fn range(&self) -> SheetRange {
        self.range
    }

    /// Handles opened during the run, in open order. The caller releases them
    /// once it has consumed the output.
    pub fn released_resources(&self) -> &[ResourceHandle] {
        &self.released_resources
    }

    pub fn take_released_resources(&mut self) -> Vec<ResourceHandle> {
        self.opened.clear();
        std::mem::take(&mut self.released_resources)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Make sure the model behind `handle` is loaded before `subject` is read.
    ///
    /// Each handle is opened at most once per run; a failed open is remembered
    /// and every subject depending on it gets exactly one diagnostic, however
    /// often it is asked for.
    pub fn ensure_resource<S: SubjectSource + ?Sized>(
        &mut self,
        source: &S,
        handle: ResourceHandle,
        subject: Subject,
    ) -> bool {
        if self.opened.contains(&handle) {
            return true;
        }

        let error = match self.failed.get(&handle) {
            Some(err) => err.clone(),
            None => match source.open_resource(handle) {
                Ok(()) => {
                    self.opened.insert(handle);
                    self.released_resources.push(handle);
                    return true;
                }
                Err(err) => {
                    tracing::warn!(?handle, %subject, error = %err, "geometry resource failed to load");
                    self.failed.insert(handle, err.clone());
                    err
                }
            },
        };

        if self.reported.insert((subject, handle)) {
            tracing::debug!(?handle, %subject, "skipping subject with unavailable resource");
            self.diagnostics.push(Diagnostic { subject, resource: handle, error });
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ComponentGraph;

    #[test]
    fn range_grows_to_cover_every_write() {
        let mut state = TraversalState::new();
        assert!(state.range().is_empty());

        state.record_write(GridCoordinate::new(2, 3));
        assert_eq!(state.range(), SheetRange::new(2, 3, 1, 1));

        state.record_write(GridCoordinate::new(5, 1));
        assert_eq!(state.range(), SheetRange::new(2, 1, 4, 3));
        assert!(state.range().contains(GridCoordinate::new(4, 2)));
        assert!(!state.range().contains(GridCoordinate::new(6, 2)));
    }

    #[test]
    fn union_ignores_empty_ranges() {
        let a = SheetRange::new(0, 0, 2, 2);
        let b = SheetRange::new(-1, 3, 1, 1);
        assert_eq!(a.union(&SheetRange::default()), a);
        assert_eq!(SheetRange::default().union(&b), b);
        assert_eq!(a.union(&b), SheetRange::new(-1, 0, 3, 4));
    }

    #[test]
    fn subjects_are_visited_once_per_run() {
        let mut state = TraversalState::new();
        let s = Subject::component(1);

        assert_eq!(state.begin_search(), 0);
        assert!(state.mark_visited(s));
        assert_eq!(state.begin_search(), 1);
        //a later search of the same run still sees the subject as visited
        assert!(!state.mark_visited(s));
        assert!(state.is_visited(s));
        assert!(!state.is_visited(Subject::parameter(1)));
        assert_eq!(state.search_count(), 2);
    }

    #[test]
    fn resources_open_once_and_failures_become_diagnostics() {
        let mut g = ComponentGraph::new();
        g.fail_resource(ResourceHandle(2), "corrupt");
        let mut state = TraversalState::new();

        assert!(state.ensure_resource(&g, ResourceHandle(1), Subject::volume(1)));
        assert!(state.ensure_resource(&g, ResourceHandle(1), Subject::volume(2)));
        assert!(!state.ensure_resource(&g, ResourceHandle(2), Subject::face(1)));
        assert!(!state.ensure_resource(&g, ResourceHandle(2), Subject::face(2)));

        assert_eq!(g.open_calls(), 2);
        assert_eq!(state.released_resources(), &[ResourceHandle(1)]);
        assert_eq!(state.diagnostics().len(), 2);
        assert_eq!(state.diagnostics()[1].subject, Subject::face(2));
    }

    #[test]
    fn repeated_checks_of_one_subject_report_once() {
        let mut g = ComponentGraph::new();
        g.fail_resource(ResourceHandle(9), "corrupt");
        let mut state = TraversalState::new();

        for _ in 0..3 {
            assert!(!state.ensure_resource(&g, ResourceHandle(9), Subject::face(1)));
        }
        assert_eq!(g.open_calls(), 1);
        assert_eq!(state.diagnostics().len(), 1);
    }
}
