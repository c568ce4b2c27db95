//! Mapping tool.
//!
//! A tool owns a set of root rules and binds them to root subjects
//! (many-to-many). Executing the tool runs every binding with its own
//! traversal state, merges the outputs in binding order, and hands one
//! rectangular table per sheet to a [`TableSink`].

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::{MappingError, Result};
use crate::core::model::SubjectSource;
use crate::core::output::{MappedOutput, SheetCells};
use crate::core::state::{Diagnostic, SheetRange, TraversalState};
use crate::core::types::{CellValue, GridCoordinate, ResourceHandle, Subject, ToolId};
use crate::mapping::engine;
use crate::mapping::rule::MappingRule;

/// Index of a rule inside its tool.
pub type RuleId = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// run bindings on the rayon pool; the merge stays in binding order
    pub parallel: bool,
}

/// One sheet as a dense block covering every written cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueTable {
    pub name: String,
    pub range: SheetRange,
    /// `cells[r][c]` is the cell at `range.row_start + r, range.column_start + c`
    pub cells: Vec<Vec<Option<CellValue>>>,
}

impl ValueTable {
    pub fn from_sheet(name: &str, sheet: &SheetCells) -> Self {
        let mut range = SheetRange::default();
        for coord in sheet.keys() {
            range.include(*coord);
        }

        let mut cells = vec![vec![None; range.column_count.max(0) as usize]; range.row_count.max(0) as usize];
        for (coord, value) in sheet {
            let row = (coord.row - range.row_start) as usize;
            let column = (coord.column - range.column_start) as usize;
            cells[row][column] = Some(value.clone());
        }
        Self { name: name.to_string(), range, cells }
    }

    pub fn get(&self, coord: GridCoordinate) -> Option<&CellValue> {
        if !self.range.contains(coord) {
            return None;
        }
        let row = (coord.row - self.range.row_start) as usize;
        let column = (coord.column - self.range.column_start) as usize;
        self.cells[row][column].as_ref()
    }
}

/// Where finished tables go.
pub trait TableSink {
    fn store(&mut self, table: ValueTable) -> Result<()>;
}

/// Keeps tables in memory, keyed by sheet name. A later table with the same
/// name replaces the earlier one.
#[derive(Debug, Default)]
pub struct MemoryTableSink {
    tables: BTreeMap<String, ValueTable>,
}

impl MemoryTableSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ValueTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &ValueTable> + '_ {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl TableSink for MemoryTableSink {
    fn store(&mut self, table: ValueTable) -> Result<()> {
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }
}

/// A binding that did not run, with the reason.
#[derive(Debug)]
pub struct PairFailure {
    pub rule: RuleId,
    pub root: Subject,
    pub error: MappingError,
}

#[derive(Debug, Default)]
pub struct ToolReport {
    /// sheet names handed to the sink, in name order
    pub tables: Vec<String>,
    pub failures: Vec<PairFailure>,
    pub diagnostics: Vec<Diagnostic>,
}

struct PairOutcome {
    result: Result<MappedOutput>,
    diagnostics: Vec<Diagnostic>,
    resources: Vec<ResourceHandle>,
}

#[derive(Debug)]
pub struct MappingTool {
    id: ToolId,
    name: String,
    config: ToolConfig,
    rules: Vec<MappingRule>,
    mappings: Vec<(RuleId, Subject)>,
}

impl MappingTool {
    pub fn new(id: ToolId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), config: ToolConfig::default(), rules: Vec::new(), mappings: Vec::new() }
    }

    pub fn with_config(mut self, config: ToolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> ToolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> ToolConfig {
        self.config
    }

    /// Validate `rule` and take ownership of it.
    pub fn add_rule(&mut self, mut rule: MappingRule) -> Result<RuleId> {
        rule.validate()?;
        rule.set_owner(Some(self.id));
        self.rules.push(rule);
        Ok(self.rules.len() - 1)
    }

    /// Remove a rule and its bindings. Later rule ids shift down by one.
    pub fn remove_rule(&mut self, id: RuleId) -> Result<MappingRule> {
        if id >= self.rules.len() {
            return Err(MappingError::UnknownRule(id));
        }
        let mut rule = self.rules.remove(id);
        rule.set_owner(None);

        self.mappings.retain(|(rule_id, _)| *rule_id != id);
        for (rule_id, _) in &mut self.mappings {
            if *rule_id > id {
                *rule_id -= 1;
            }
        }
        Ok(rule)
    }

    /// Swap in a new rule under the same id, keeping its bindings.
    pub fn replace_rule(&mut self, id: RuleId, mut rule: MappingRule) -> Result<MappingRule> {
        if id >= self.rules.len() {
            return Err(MappingError::UnknownRule(id));
        }
        rule.validate()?;
        rule.set_owner(Some(self.id));
        let mut old = std::mem::replace(&mut self.rules[id], rule);
        old.set_owner(None);
        Ok(old)
    }

    pub fn rule(&self, id: RuleId) -> Option<&MappingRule> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Bind `rule` to `root`. Binding the same pair twice is a no-op.
    pub fn add_mapping(&mut self, rule: RuleId, root: Subject) -> Result<()> {
        if rule >= self.rules.len() {
            return Err(MappingError::UnknownRule(rule));
        }
        if !self.mappings.contains(&(rule, root)) {
            self.mappings.push((rule, root));
        }
        Ok(())
    }

    pub fn remove_mapping(&mut self, rule: RuleId, root: Subject) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|pair| *pair != (rule, root));
        self.mappings.len() != before
    }

    pub fn mappings(&self) -> &[(RuleId, Subject)] {
        &self.mappings
    }

    fn run_pair<S: SubjectSource + ?Sized>(&self, rule: RuleId, root: Subject, source: &S) -> PairOutcome {
        let mut state = TraversalState::new();
        let result = engine::execute(&self.rules[rule], root, source, &mut state);
        PairOutcome {
            result,
            diagnostics: state.diagnostics().to_vec(),
            resources: state.take_released_resources(),
        }
    }

    /// Run every binding and store one table per sheet.
    ///
    /// A failing binding is reported and skipped; the others still run. Only
    /// a sink error aborts the call.
    pub fn execute<S: SubjectSource + Sync + ?Sized>(
        &self,
        source: &S,
        sink: &mut dyn TableSink,
    ) -> Result<ToolReport> {
        tracing::info!(
            tool = %self.name,
            rules = self.rules.len(),
            pairs = self.mappings.len(),
            parallel = self.config.parallel,
            "executing mapping tool"
        );

        let outcomes: Vec<PairOutcome> = if self.config.parallel {
            self.mappings
                .par_iter()
                .map(|&(rule, root)| self.run_pair(rule, root, source))
                .collect()
        } else {
            self.mappings
                .iter()
                .map(|&(rule, root)| self.run_pair(rule, root, source))
                .collect()
        };

        let mut merged = MappedOutput::new();
        let mut report = ToolReport::default();
        for (&(rule, root), outcome) in self.mappings.iter().zip(outcomes) {
            match outcome.result {
                Ok(output) => merged.merge_from(output),
                Err(error) => {
                    tracing::warn!(rule = %self.rules[rule].name, %root, %error, "mapping pair failed");
                    report.failures.push(PairFailure { rule, root, error });
                }
            }
            //the pair's output is merged, its models can go
            for handle in outcome.resources {
                source.release_resource(handle);
            }
            report.diagnostics.extend(outcome.diagnostics);
        }

        for name in merged.sheet_names() {
            if let Some(cells) = merged.sheet(name) {
                let table = ValueTable::from_sheet(name, cells);
                tracing::debug!(sheet = name, range = ?table.range, "storing table");
                sink.store(table)?;
                report.tables.push(name.to_string());
            }
        }

        tracing::info!(
            tool = %self.name,
            tables = report.tables.len(),
            failures = report.failures.len(),
            diagnostics = report.diagnostics.len(),
            "mapping tool finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ComponentGraph;
    use crate::core::model::{Component, Instance, Volume};
    use crate::core::types::SubjectId;
    use crate::mapping::subject::Property;

    fn mk_root_with_child(g: &mut ComponentGraph, root: &str, child: &str) -> SubjectId {
        let r = g.add_component(Component::unclassified(root));
        let c = g.add_component(Component::unclassified(child));
        g.add_child(r, c).unwrap();
        r
    }

    fn mk_names(sheet: &str, row: i64, column: i64) -> MappingRule {
        MappingRule::component(format!("names@{row},{column}"))
            .with_sheet(sheet)
            .with_offset_from_parent(row, column)
            .with_properties([Property::Name])
    }

    #[test]
    fn rules_get_and_lose_their_owner() {
        let mut tool = MappingTool::new(4, "tool");
        let id = tool.add_rule(mk_names("S", 0, 0).with_child(MappingRule::volume("v"))).unwrap();
        assert_eq!(tool.rule(id).unwrap().owner(), Some(4));
        assert_eq!(tool.rule(id).unwrap().child_rules[0].owner(), Some(4));

        let old = tool.replace_rule(id, mk_names("T", 1, 1)).unwrap();
        assert_eq!(old.owner(), None);
        assert_eq!(tool.rule(id).unwrap().sheet_name.as_deref(), Some("T"));

        let removed = tool.remove_rule(id).unwrap();
        assert_eq!(removed.owner(), None);
        assert!(tool.rules().is_empty());
    }

    #[test]
    fn invalid_rules_are_refused() {
        let mut tool = MappingTool::new(1, "tool");
        let err = tool.add_rule(MappingRule::component("nameless")).unwrap_err();
        assert!(matches!(err, MappingError::MissingSheetName { .. }));
        assert!(tool.rules().is_empty());

        assert!(matches!(tool.remove_rule(0), Err(MappingError::UnknownRule(0))));
        assert!(matches!(
            tool.add_mapping(3, Subject::component(1)),
            Err(MappingError::UnknownRule(3))
        ));
    }

    #[test]
    fn mappings_are_deduplicated_and_follow_rule_removal() {
        let mut tool = MappingTool::new(1, "tool");
        let a = tool.add_rule(mk_names("S", 0, 0)).unwrap();
        let b = tool.add_rule(mk_names("S", 1, 0)).unwrap();

        tool.add_mapping(a, Subject::component(1)).unwrap();
        tool.add_mapping(a, Subject::component(1)).unwrap();
        tool.add_mapping(b, Subject::component(2)).unwrap();
        assert_eq!(tool.mappings().len(), 2);

        tool.remove_rule(a).unwrap();
        assert_eq!(tool.mappings(), &[(0, Subject::component(2))]);
        assert!(tool.remove_mapping(0, Subject::component(2)));
        assert!(!tool.remove_mapping(0, Subject::component(2)));
    }

    #[test]
    fn roots_writing_one_sheet_share_one_table() {
        let mut g = ComponentGraph::new();
        let a = mk_root_with_child(&mut g, "A", "A1");
        let b = mk_root_with_child(&mut g, "B", "B1");

        let mut tool = MappingTool::new(1, "tool");
        let first = tool.add_rule(mk_names("S", 0, 0)).unwrap();
        let second = tool.add_rule(mk_names("S", 2, 1)).unwrap();
        tool.add_mapping(first, Subject::component(a)).unwrap();
        tool.add_mapping(second, Subject::component(b)).unwrap();

        let mut sink = MemoryTableSink::new();
        let report = tool.execute(&g, &mut sink).unwrap();
        assert_eq!(report.tables, vec!["S".to_string()]);
        assert!(report.failures.is_empty());

        let table = sink.get("S").unwrap();
        assert_eq!(table.range, SheetRange::new(0, 0, 3, 2));
        assert_eq!(table.cells.len(), 3);
        assert!(table.cells.iter().all(|row| row.len() == 2));
        assert_eq!(table.get(GridCoordinate::new(0, 0)), Some(&CellValue::text("A1")));
        assert_eq!(table.get(GridCoordinate::new(2, 1)), Some(&CellValue::text("B1")));
        assert_eq!(table.cells[0][1], None);
        assert_eq!(table.get(GridCoordinate::new(9, 9)), None);
    }

    #[test]
    fn later_pairs_overwrite_earlier_cells() {
        let mut g = ComponentGraph::new();
        let a = mk_root_with_child(&mut g, "A", "A1");
        let b = mk_root_with_child(&mut g, "B", "B1");

        let mut tool = MappingTool::new(1, "tool");
        let rule = tool.add_rule(mk_names("S", 0, 0)).unwrap();
        tool.add_mapping(rule, Subject::component(a)).unwrap();
        tool.add_mapping(rule, Subject::component(b)).unwrap();

        let mut sink = MemoryTableSink::new();
        tool.execute(&g, &mut sink).unwrap();
        assert_eq!(sink.get("S").unwrap().cells, vec![vec![Some(CellValue::text("B1"))]]);
    }

    #[test]
    fn a_missing_root_fails_only_its_pair() {
        let mut g = ComponentGraph::new();
        let a = mk_root_with_child(&mut g, "A", "A1");

        let mut tool = MappingTool::new(1, "tool");
        let rule = tool.add_rule(mk_names("S", 0, 0)).unwrap();
        tool.add_mapping(rule, Subject::component(99)).unwrap();
        tool.add_mapping(rule, Subject::component(a)).unwrap();

        let mut sink = MemoryTableSink::new();
        let report = tool.execute(&g, &mut sink).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].root, Subject::component(99));
        assert!(matches!(report.failures[0].error, MappingError::SubjectNotFound(_)));
        assert_eq!(sink.get("S").unwrap().get(GridCoordinate::ORIGIN), Some(&CellValue::text("A1")));
    }

    #[test]
    fn parallel_execution_matches_sequential() {
        let mut g = ComponentGraph::new();
        let roots: Vec<_> = (0..8)
            .map(|i| mk_root_with_child(&mut g, &format!("R{i}"), &format!("C{i}")))
            .collect();

        let build = |parallel: bool| {
            let mut tool = MappingTool::new(1, "tool").with_config(ToolConfig { parallel });
            for (i, &root) in roots.iter().enumerate() {
                let rule = tool.add_rule(mk_names("S", i as i64, (i % 3) as i64)).unwrap();
                tool.add_mapping(rule, Subject::component(root)).unwrap();
            }
            let last = tool.add_rule(mk_names("S", 0, 0)).unwrap();
            tool.add_mapping(last, Subject::component(roots[7])).unwrap();
            tool
        };

        let mut sequential = MemoryTableSink::new();
        let mut parallel = MemoryTableSink::new();
        build(false).execute(&g, &mut sequential).unwrap();
        build(true).execute(&g, &mut parallel).unwrap();

        assert_eq!(sequential.get("S"), parallel.get("S"));
        assert_eq!(parallel.get("S").unwrap().get(GridCoordinate::ORIGIN), Some(&CellValue::text("C7")));
    }

    #[test]
    fn resources_are_released_after_each_pair() {
        let mut g = ComponentGraph::new();
        let c = g.add_component(Component::unclassified("Building"));
        let i = g.add_instance(c, Instance::new("Placement")).unwrap();
        g.add_volume(i, Volume::new("Kitchen", ResourceHandle(1))).unwrap();
        g.add_volume(i, Volume::new("Hall", ResourceHandle(2))).unwrap();
        g.add_volume(i, Volume::new("Cellar", ResourceHandle(3))).unwrap();
        g.fail_resource(ResourceHandle(3), "unreadable");

        let mut tool = MappingTool::new(1, "tool");
        let rule = tool
            .add_rule(
                MappingRule::volume("spaces")
                    .with_sheet("Volumes")
                    .with_max_matches(MappingRule::UNBOUNDED)
                    .with_offset_between_matches(1, 0)
                    .with_properties([Property::Name]),
            )
            .unwrap();
        tool.add_mapping(rule, Subject::component(c)).unwrap();

        let mut sink = MemoryTableSink::new();
        let report = tool.execute(&g, &mut sink).unwrap();

        assert_eq!(g.open_calls(), 3);
        assert_eq!(g.release_calls(), 2);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(sink.get("Volumes").unwrap().range, SheetRange::new(0, 0, 2, 1));
    }

    struct FailingSink;

    impl TableSink for FailingSink {
        fn store(&mut self, _table: ValueTable) -> Result<()> {
            Err(MappingError::Sink("disk full".into()))
        }
    }

    #[test]
    fn sink_errors_abort_the_run() {
        let mut g = ComponentGraph::new();
        let a = mk_root_with_child(&mut g, "A", "A1");
        let mut tool = MappingTool::new(1, "tool");
        let rule = tool.add_rule(mk_names("S", 0, 0)).unwrap();
        tool.add_mapping(rule, Subject::component(a)).unwrap();

        match tool.execute(&g, &mut FailingSink) {
            Err(MappingError::Sink(msg)) => assert_eq!(msg, "disk full"),
            other => panic!("unexpected result: {:?}", other.map(|r| r.tables)),
        }
    }
}
