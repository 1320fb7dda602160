//! Formula-driven columnar kernel.
//!
//! Tables are row identity spaces owned by a [`Schema`]; every column is either stored data or a
//! formula re-evaluated over the rows of its table. Formulas are [`Expr`] trees that are resolved
//! once into [`Node`]s and then evaluated row by row by a [`ColumnEvaluator`] or folded into
//! group accumulators by an [`AggregationEvaluator`]. Product, subset and projection tables grow
//! their rows through [`Schema::populate`].

mod aggregation;
mod error;
mod evaluator;
mod expr;
mod model;
mod node;
mod populate;
mod resolve;
mod schedule;
mod source;
mod variables;

pub use crate::aggregation::{AggregateDefinition, AggregationEvaluator, Aggregator};
pub use crate::error::{EvalError, EvalErrorKind, KernelError, KernelResult};
pub use crate::evaluator::ColumnEvaluator;
pub use crate::expr::{Action, BinaryOp, Expr, ExprKind, UnaryOp};
pub use crate::model::{
    Column, ColumnDefinition, ColumnId, DataType, Schema, SchemaOptions, Table, TableDefinition,
    TableId,
};
pub use crate::node::{Dependencies, Node};
pub use crate::resolve::{resolve, Scope};
pub use crate::schedule::Step;
pub use crate::source::{MemoryRowSource, RowSource};
pub use crate::variables::{VarId, Variable, Variables};

pub use formula_columnar::{ColumnOptions, ColumnType, IndexedColumn, Value};
