//! Indexed column storage for the formula kernel.
//!
//! Every column keeps its values in insertion order together with a sorted permutation of its
//! offsets, so both directions of lookup are cheap:
//! - `project(offset)`: value at a row, O(1).
//! - `deproject(value)`: rows holding a value, O(log n + matches).
//!
//! The index is maintained incrementally on append/update; there is no rebuild step.

#![forbid(unsafe_code)]

mod column;
mod types;

pub use crate::column::{ColumnError, ColumnOptions, IndexedColumn};
pub use crate::types::{ColumnType, Value};
