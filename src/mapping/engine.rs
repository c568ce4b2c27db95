//! Rule engine.
//!
//! `execute` runs one rule tree against one root subject. Every rule
//! invocation is a *search*: starting from its origin it visits the entry
//! subjects of its kind, places each subject passing its filters, runs its
//! child rules rooted at that match, and re-applies itself to the subject's
//! same-kind relations until `max_depth` hops or `max_matches` matches.
//!
//! One run shares a single visited set and a single depth count across the
//! whole rule tree. A subject visited by any rule is not visited again, and a
//! child rule keeps counting hops from the depth of the match it starts at
//! instead of starting over.
//!
//! The walk is driven by an explicit work stack instead of native recursion,
//! so deep containment chains and deep rule trees only grow a `Vec`. Frames
//! are pushed so the visiting order is the depth-first pre-order of the
//! recursive formulation: a match's child rules finish before the search
//! moves on to the match's descendants.

use crate::core::error::{MappingError, Result};
use crate::core::model::SubjectSource;
use crate::core::output::MappedOutput;
use crate::core::state::{SearchId, TraversalState};
use crate::core::types::{CellValue, GridCoordinate, MappingDirection, ParameterRange, Subject};
use crate::mapping::filter;
use crate::mapping::rule::MappingRule;
use crate::mapping::subject;

enum Frame<'r> {
    //depth: hops below the run's root of this search's entry level
    Search { rule: &'r MappingRule, sheet: &'r str, origin: Subject, anchor: GridCoordinate, depth: usize },
    Visit { search: usize, subject: Subject, depth: usize },
}

struct Search<'r> {
    id: SearchId,
    rule: &'r MappingRule,
    sheet: &'r str,
    //where the next match of this search anchors
    next_anchor: GridCoordinate,
    matches: usize,
}

/// Validate `rule` and run it against `root`, anchored at the rule's
/// `offset_from_parent`.
///
/// Nothing runs when the rule tree is invalid or `root` is unknown. Resources
/// opened on the way are listed in `state.released_resources()` and stay open.
pub fn execute<S: SubjectSource + ?Sized>(
    rule: &MappingRule,
    root: Subject,
    source: &S,
    state: &mut TraversalState,
) -> Result<MappedOutput> {
    rule.validate()?;
    if !source.contains(root) {
        return Err(MappingError::SubjectNotFound(root));
    }

    let sheet = rule.sheet_name.as_deref().unwrap_or_default();
    let anchor = GridCoordinate::ORIGIN + rule.offset_from_parent;
    let mut output = MappedOutput::new();
    execute_at(rule, sheet, root, anchor, source, state, &mut output);
    Ok(output)
}

/// Run `rule` from `origin` with its first match anchored at `anchor`, writing
/// into `output`. No validation; `sheet` is used by every rule of the tree
/// that does not name its own.
pub fn execute_at<'r, S: SubjectSource + ?Sized>(
    rule: &'r MappingRule,
    sheet: &'r str,
    origin: Subject,
    anchor: GridCoordinate,
    source: &S,
    state: &mut TraversalState,
    output: &mut MappedOutput,
) {
    let mut work = vec![Frame::Search { rule, sheet, origin, anchor, depth: 0 }];
    let mut searches: Vec<Search<'r>> = Vec::new();

    while let Some(frame) = work.pop() {
        match frame {
            Frame::Search { rule, sheet, origin, anchor, depth } => {
                if rule.max_matches == 0 {
                    tracing::trace!(rule = %rule.name, "max_matches is 0, skipping search");
                    continue;
                }
                if depth > rule.max_depth {
                    tracing::trace!(rule = %rule.name, %origin, depth, "depth budget spent, skipping search");
                    continue;
                }

                let id = state.begin_search();
                state.mark_visited(origin);
                tracing::debug!(rule = %rule.name, search = id, %origin, sheet, %anchor, depth, "starting rule search");

                let candidates =
                    subject::entries(source, state, rule.subject_kind(), origin, rule.traversal_strategy);

                match rule.parameter_range() {
                    Some(range) if range.is_block() => {
                        place_block(rule, sheet, range, depth, candidates, anchor, source, state, output, &mut work);
                    }
                    _ => {
                        let search = searches.len();
                        searches.push(Search { id, rule, sheet, next_anchor: anchor, matches: 0 });
                        work.extend(
                            candidates
                                .into_iter()
                                .rev()
                                .map(|subject| Frame::Visit { search, subject, depth }),
                        );
                    }
                }
            }
            Frame::Visit { search, subject, depth } => {
                let ctx = &mut searches[search];
                let rule = ctx.rule;
                if ctx.matches >= rule.max_matches || !state.mark_visited(subject) {
                    continue;
                }
                tracing::trace!(rule = %rule.name, %subject, depth, "visiting");

                //descendants go below the child searches so those run first
                if depth < rule.max_depth {
                    let next = subject::related(source, state, subject, rule.traversal_strategy);
                    work.extend(
                        next.into_iter()
                            .rev()
                            .map(|subject| Frame::Visit { search, subject, depth: depth + 1 }),
                    );
                }

                if !filter::matches_all(&rule.filters, source, state, subject) {
                    continue;
                }

                let anchor = ctx.next_anchor;
                let (rows, columns) = rule.match_extent();
                let base = rule.reference_point.base_cell(anchor, rows, columns);
                place_run(rule, ctx.sheet, subject, base, source, state, output);

                ctx.next_anchor = base + rule.offset_between_matches;
                ctx.matches += 1;
                tracing::debug!(
                    rule = %rule.name,
                    search = ctx.id,
                    %subject,
                    %base,
                    matches = ctx.matches,
                    "placed match"
                );

                push_children(rule, ctx.sheet, subject, base, depth, &mut work);
            }
        }
    }
}

fn write_cell(output: &mut MappedOutput, state: &mut TraversalState, sheet: &str, coord: GridCoordinate, value: CellValue) {
    output.write(sheet, coord, value);
    state.record_write(coord);
}

//properties of one match, one grid step apart along the mapping direction
fn place_run<S: SubjectSource + ?Sized>(
    rule: &MappingRule,
    sheet: &str,
    subject: Subject,
    base: GridCoordinate,
    source: &S,
    state: &mut TraversalState,
    output: &mut MappedOutput,
) {
    let step = rule.mapping_direction.step();
    let mut cell = base;
    for &property in &rule.properties {
        let value = subject::extract(source, state, subject, property);
        write_cell(output, state, sheet, cell, value);
        cell += step;
    }
}

//a same-kind child rule starts one hop below the match; other kinds read
//what the match owns at the match's own depth
fn push_children<'r>(
    rule: &'r MappingRule,
    sheet: &'r str,
    subject: Subject,
    base: GridCoordinate,
    depth: usize,
    work: &mut Vec<Frame<'r>>,
) {
    for child in rule.child_rules.iter().rev() {
        let hop = usize::from(child.subject_kind() == subject.kind);
        work.push(Frame::Search {
            rule: child,
            sheet: child.sheet_name.as_deref().unwrap_or(sheet),
            origin: subject,
            anchor: base + child.offset_from_parent,
            depth: depth.saturating_add(hop),
        });
    }
}

/// Grid steps `(between parameters, between properties)` of a block layout.
fn block_steps(range: ParameterRange, direction: MappingDirection) -> (GridCoordinate, GridCoordinate) {
    let down = GridCoordinate::new(1, 0);
    let right = GridCoordinate::new(0, 1);
    match range {
        ParameterRange::CurrentRow => (right, down),
        ParameterRange::CurrentColumn | ParameterRange::SingleValue => (down, right),
        ParameterRange::Table => match direction {
            MappingDirection::Horizontal => (down, right),
            MappingDirection::Vertical => (right, down),
        },
    }
}

/// Place every matching parameter of the origin as one block (one match).
///
/// Row and column modes leave inapplicable values unwritten; table mode
/// writes their typed nulls so the block stays rectangular.
#[allow(clippy::too_many_arguments)]
fn place_block<'r, S: SubjectSource + ?Sized>(
    rule: &'r MappingRule,
    sheet: &'r str,
    range: ParameterRange,
    depth: usize,
    candidates: Vec<Subject>,
    anchor: GridCoordinate,
    source: &S,
    state: &mut TraversalState,
    output: &mut MappedOutput,
    work: &mut Vec<Frame<'r>>,
) {
    let mut parameters = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if state.mark_visited(candidate) && filter::matches_all(&rule.filters, source, state, candidate) {
            parameters.push(candidate);
        }
    }
    if parameters.is_empty() {
        return;
    }

    let (along, across) = block_steps(range, rule.mapping_direction);
    let n = parameters.len() as i64;
    let m = rule.properties.len() as i64;
    let (rows, columns) = if along.row == 1 { (n, m) } else { (m, n) };
    let base = rule.reference_point.base_cell(anchor, rows, columns);
    let keep_nulls = range == ParameterRange::Table;

    for (i, &parameter) in parameters.iter().enumerate() {
        let start = base + along.scale(i as i64);
        for (k, &property) in rule.properties.iter().enumerate() {
            let value = subject::extract(source, state, parameter, property);
            if value.is_null() && !keep_nulls {
                continue;
            }
            write_cell(output, state, sheet, start + across.scale(k as i64), value);
        }
    }
    tracing::debug!(rule = %rule.name, ?range, parameters = parameters.len(), %base, "placed parameter block");

    //last parameter first so the first one's child rules pop first
    for (i, &parameter) in parameters.iter().enumerate().rev() {
        push_children(rule, sheet, parameter, base + along.scale(i as i64), depth, work);
    }
}
