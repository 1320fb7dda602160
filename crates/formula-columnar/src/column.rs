#![forbid(unsafe_code)]

use crate::types::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnOptions {
    /// Number of rows reserved each time the column runs out of capacity.
    pub growth_increment: usize,
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            growth_increment: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ColumnError {
    #[error("offset {offset} out of range for column of length {len}")]
    OutOfRange { offset: usize, len: usize },

    #[error("cannot store {actual} value in {expected} column")]
    TypeMismatch {
        expected: ColumnType,
        actual: &'static str,
    },

    #[error("index corrupted: {0}")]
    Corrupt(String),
}

/// Column storage supporting both `offset -> value` ([`project`](Self::project)) and
/// `value -> offsets` ([`deproject`](Self::deproject)) lookups.
///
/// `cells` holds the values in insertion order; `index` is a permutation of `0..len` kept sorted
/// by the referenced cell value. Offsets holding equal values appear in the order they were
/// appended.
#[derive(Clone, Debug)]
pub struct IndexedColumn {
    column_type: ColumnType,
    options: ColumnOptions,
    cells: Vec<Value>,
    index: Vec<usize>,
}

impl IndexedColumn {
    pub fn new(column_type: ColumnType) -> Self {
        Self::with_options(column_type, ColumnOptions::default())
    }

    pub fn with_options(column_type: ColumnType, options: ColumnOptions) -> Self {
        Self {
            column_type,
            options,
            cells: Vec::new(),
            index: Vec::new(),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cells.capacity()
    }

    /// Values in offset order.
    pub fn values(&self) -> &[Value] {
        &self.cells
    }

    /// Offsets ordered by value.
    pub fn sorted_offsets(&self) -> &[usize] {
        &self.index
    }

    pub fn project(&self, offset: usize) -> Result<&Value, ColumnError> {
        self.cells.get(offset).ok_or(ColumnError::OutOfRange {
            offset,
            len: self.cells.len(),
        })
    }

    /// All offsets holding `value`, in index order. Empty when the value is absent.
    pub fn deproject(&self, value: &Value) -> &[usize] {
        match self.search(value) {
            Ok(hit) => {
                let (lo, hi) = self.widen(hit, value);
                &self.index[lo..hi]
            }
            Err(_) => &[],
        }
    }

    pub fn append(&mut self, value: Value) -> Result<usize, ColumnError> {
        self.check_type(&value)?;
        self.grow();

        let offset = self.cells.len();
        let pos = self.insertion_point(&value);
        self.cells.push(value);
        self.index.insert(pos, offset);
        self.debug_check_neighbors(pos);
        Ok(offset)
    }

    pub fn set_value(&mut self, offset: usize, value: Value) -> Result<(), ColumnError> {
        self.check_type(&value)?;
        let old = self.project(offset)?;
        if *old == value {
            self.cells[offset] = value;
            return Ok(());
        }

        let old_pos = self.position_of(offset)?;
        self.index.remove(old_pos);

        let new_pos = self.insertion_point(&value);
        self.index.insert(new_pos, offset);
        self.cells[offset] = value;
        self.debug_check_neighbors(new_pos);
        Ok(())
    }

    /// Remove the most recently appended offset and return its value.
    pub fn pop(&mut self) -> Option<Value> {
        let offset = self.cells.len().checked_sub(1)?;
        // `position_of` only fails on a corrupted index.
        let pos = self.position_of(offset).ok()?;
        self.index.remove(pos);
        self.cells.pop()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.index.clear();
    }

    /// Overwrite every cell with `value`.
    pub fn fill(&mut self, value: Value) -> Result<(), ColumnError> {
        self.check_type(&value)?;
        for cell in &mut self.cells {
            *cell = value.clone();
        }
        // All cells are equal now, so offset order is also value order.
        for (pos, slot) in self.index.iter_mut().enumerate() {
            *slot = pos;
        }
        Ok(())
    }

    /// Verify that `index` is a permutation of `0..len` sorted by cell value.
    pub fn check_invariants(&self) -> Result<(), ColumnError> {
        if self.index.len() != self.cells.len() {
            return Err(ColumnError::Corrupt(format!(
                "index has {} entries for {} cells",
                self.index.len(),
                self.cells.len()
            )));
        }
        let mut seen = vec![false; self.cells.len()];
        for &offset in &self.index {
            match seen.get_mut(offset) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(ColumnError::Corrupt(format!(
                        "offset {offset} is stale or duplicated"
                    )))
                }
            }
        }
        for pair in self.index.windows(2) {
            if self.cells[pair[0]] > self.cells[pair[1]] {
                return Err(ColumnError::Corrupt(format!(
                    "offsets {} and {} are out of order",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    fn check_type(&self, value: &Value) -> Result<(), ColumnError> {
        if self.column_type.accepts(value) {
            Ok(())
        } else {
            Err(ColumnError::TypeMismatch {
                expected: self.column_type,
                actual: value.type_name(),
            })
        }
    }

    fn grow(&mut self) {
        if self.cells.len() == self.cells.capacity() {
            let increment = self.options.growth_increment.max(1);
            self.cells.reserve_exact(increment);
            self.index.reserve_exact(increment);
        }
    }

    /// Binary search on `cells[index[mid]]`. `Ok` is some position holding `value` (not
    /// necessarily the first of its run), `Err` the position where it would sort.
    fn search(&self, value: &Value) -> Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.cells[self.index[mid]].cmp(value) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Expand a search hit to the full `[lo, hi)` run of cells equal to `value`.
    fn widen(&self, hit: usize, value: &Value) -> (usize, usize) {
        let mut lo = hit;
        while lo > 0 && self.cells[self.index[lo - 1]] == *value {
            lo -= 1;
        }
        let mut hi = hit + 1;
        while hi < self.index.len() && self.cells[self.index[hi]] == *value {
            hi += 1;
        }
        (lo, hi)
    }

    /// Sort position for a new entry, after any existing equal values.
    fn insertion_point(&self, value: &Value) -> usize {
        match self.search(value) {
            Ok(hit) => self.widen(hit, value).1,
            Err(pos) => pos,
        }
    }

    /// Position of `offset` inside `index`, found through the run of its current value.
    fn position_of(&self, offset: usize) -> Result<usize, ColumnError> {
        let value = self.project(offset)?;
        let found = self.search(value).ok().and_then(|hit| {
            let (lo, hi) = self.widen(hit, value);
            (lo..hi).find(|&pos| self.index[pos] == offset)
        });
        debug_assert!(found.is_some(), "offset {offset} missing from its value run");
        found.ok_or_else(|| ColumnError::Corrupt(format!("offset {offset} missing from index")))
    }

    fn debug_check_neighbors(&self, pos: usize) {
        debug_assert_eq!(self.index.len(), self.cells.len());
        if pos > 0 {
            debug_assert!(self.cells[self.index[pos - 1]] <= self.cells[self.index[pos]]);
        }
        if pos + 1 < self.index.len() {
            debug_assert!(self.cells[self.index[pos]] <= self.cells[self.index[pos + 1]]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_reserves_fixed_increment() {
        let mut column = IndexedColumn::with_options(
            ColumnType::Number,
            ColumnOptions {
                growth_increment: 8,
            },
        );
        column.append(1.0.into()).unwrap();
        assert!(column.capacity() >= 8);
        for i in 0..20 {
            column.append((i as f64).into()).unwrap();
        }
        assert_eq!(column.len(), 21);
        assert_eq!(column.project(0).unwrap(), &Value::Number(1.0));
        column.check_invariants().unwrap();
    }

    #[test]
    fn set_same_value_keeps_run_order() {
        let mut column = IndexedColumn::new(ColumnType::Number);
        for _ in 0..3 {
            column.append(5.0.into()).unwrap();
        }
        column.set_value(0, 5.0.into()).unwrap();
        assert_eq!(column.deproject(&5.0.into()), &[0, 1, 2]);
    }
}
