// mapped output: sheet name -> sparse cells
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::core::state::SheetRange;
use crate::core::types::{CellValue, GridCoordinate};

pub type SheetCells = FxHashMap<GridCoordinate, CellValue>;

/// The artifact of a run. Within one sheet a coordinate holds one value; later
/// writes overwrite earlier ones. Sheets are kept in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedOutput {
    sheets: BTreeMap<String, SheetCells>,
}

impl MappedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at `coord`, returning the value it replaced.
    pub fn write(&mut self, sheet: &str, coord: GridCoordinate, value: CellValue) -> Option<CellValue> {
        match self.sheets.get_mut(sheet) {
            Some(cells) => cells.insert(coord, value),
            None => {
                let mut cells = SheetCells::default();
                cells.insert(coord, value);
                self.sheets.insert(sheet.to_string(), cells);
                None
            }
        }
    }

    pub fn get(&self, sheet: &str, coord: GridCoordinate) -> Option<&CellValue> {
        self.sheets.get(sheet).and_then(|cells| cells.get(&coord))
    }

    pub fn sheet(&self, sheet: &str) -> Option<&SheetCells> {
        self.sheets.get(sheet)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.sheets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.values().all(|cells| cells.is_empty())
    }

    pub fn cell_count(&self) -> usize {
        self.sheets.values().map(|cells| cells.len()).sum()
    }

    /// Cells of one sheet in (row, column) order.
    pub fn sorted_cells(&self, sheet: &str) -> Vec<(GridCoordinate, &CellValue)> {
        let mut cells: Vec<_> = self
            .sheets
            .get(sheet)
            .map(|cells| cells.iter().map(|(&c, v)| (c, v)).collect())
            .unwrap_or_default();
        cells.sort_by_key(|(coord, _)| *coord);
        cells
    }

    pub fn sheet_range(&self, sheet: &str) -> SheetRange {
        let mut range = SheetRange::default();
        if let Some(cells) = self.sheets.get(sheet) {
            for coord in cells.keys() {
                range.include(*coord);
            }
        }
        range
    }

    /// Fold `other` into this output; cells of `other` win on collisions.
    pub fn merge_from(&mut self, other: MappedOutput) {
        for (name, cells) in other.sheets {
            match self.sheets.get_mut(&name) {
                Some(existing) => existing.extend(cells),
                None => {
                    self.sheets.insert(name, cells);
                }
            }
        }
    }
}
