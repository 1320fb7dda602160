use crate::error::{EvalError, EvalErrorKind, KernelError, KernelResult};
use crate::expr::Expr;
use crate::model::{ColumnDefinition, ColumnId, DataType, Schema, TableId};
use crate::node::{Dependencies, Node};
use crate::resolve::{resolve, Scope};
use crate::source::RowSource;
use crate::variables::{VarId, Variables};
use formula_columnar::Value;

/// Runs a resolved tree once per row of its input table, with `this` bound to the row.
///
/// When a target column is given, each row's result is written into it. Without a target the
/// evaluator only drives the tree for its side effects (population) or for the caller to inspect
/// [`evaluate_row`](Self::evaluate_row) results.
#[derive(Clone, Debug)]
pub struct ColumnEvaluator {
    input: TableId,
    target: Option<ColumnId>,
    tree: Node,
    variables: Variables,
    this: VarId,
    cursor: usize,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    parallel_min_rows: usize,
}

impl ColumnEvaluator {
    /// Evaluator for a formula column of `schema`.
    pub fn new(schema: &Schema, column: ColumnId) -> KernelResult<Self> {
        let col = schema.column(column);
        let ColumnDefinition::Formula(expr) = col.definition() else {
            return Err(KernelError::InvalidDefinition {
                name: schema.qualified_name(column),
                reason: "column has no formula".to_string(),
            });
        };
        Self::for_expr(schema, col.table(), expr, Some(column))
    }

    pub fn for_expr(
        schema: &Schema,
        input: TableId,
        expr: &Expr,
        target: Option<ColumnId>,
    ) -> KernelResult<Self> {
        let mut variables = Variables::new();
        let this = variables.declare("this", DataType::Table(input));

        let expected = target.map(|c| schema.column(c).data_type());
        let tree = resolve(expr, &Scope::new(schema, &variables), expected)?;
        if let (Some(column), Some(expected), Some(actual)) = (target, expected, tree.data_type())
        {
            if expected != actual {
                return Err(KernelError::TypeMismatch {
                    path: schema.qualified_name(column),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        Ok(Self {
            input,
            target,
            tree,
            variables,
            this,
            cursor: 0,
            parallel_min_rows: schema.options().parallel_min_rows,
        })
    }

    pub fn input(&self) -> TableId {
        self.input
    }

    pub fn target(&self) -> Option<ColumnId> {
        self.target
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Columns and tables the tree touches, plus the target column as a write.
    pub fn dependencies(&self) -> Dependencies {
        let mut deps = self.tree.dependencies();
        deps.writes.extend(self.target);
        deps
    }

    /// Evaluate every row of the input table in ascending offset order.
    ///
    /// The pass covers the rows present when it starts; rows the tree appends to its own input
    /// are left for a later [`next`](Self::next). The first failing row aborts the pass; rows
    /// before it keep their new values.
    pub fn evaluate(&mut self, schema: &mut Schema) -> KernelResult<()> {
        let len = schema.len(self.input);
        log::debug!(
            "evaluating {} over {} rows of {}",
            self.describe(schema),
            len,
            schema.table(self.input).name()
        );

        #[cfg(feature = "parallel")]
        {
            if len >= self.parallel_min_rows && self.is_stable() {
                return self.evaluate_parallel(schema, len);
            }
        }

        self.first();
        self.advance_to(schema, len)
    }

    /// Nothing the tree reads changes while the pass runs, so rows can be evaluated in any order.
    #[cfg(feature = "parallel")]
    fn is_stable(&self) -> bool {
        let deps = self.tree.dependencies();
        deps.is_read_only() && self.target.map_or(true, |t| !deps.reads.contains(&t))
    }

    fn advance_to(&mut self, schema: &mut Schema, end: usize) -> KernelResult<()> {
        while self.cursor < end {
            if self.next(schema)?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Rewind the cursor to the first row.
    pub fn first(&mut self) {
        self.cursor = 0;
    }

    /// Move the cursor past the current last row, so [`next`](Self::next) only visits rows
    /// appended from now on.
    pub fn last(&mut self, schema: &Schema) {
        self.cursor = schema.len(self.input);
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Evaluate the row under the cursor and advance. `None` once past the last row.
    pub fn next(&mut self, schema: &mut Schema) -> KernelResult<Option<usize>> {
        let row = self.cursor;
        if row >= schema.len(self.input) {
            return Ok(None);
        }
        self.evaluate_row(schema, row)?;
        self.cursor = row + 1;
        Ok(Some(row))
    }

    pub fn evaluate_row(&mut self, schema: &mut Schema, row: usize) -> KernelResult<Value> {
        let table = self.input;
        let len = schema.len(table);
        if row >= len {
            return Err(self.row_error(
                schema,
                row,
                formula_columnar::ColumnError::OutOfRange { offset: row, len }.into(),
            ));
        }

        self.variables.set(self.this, Value::Row(row));
        let value = match self.tree.evaluate(schema, &mut self.variables) {
            Ok(value) => value.clone(),
            Err(source) => {
                return Err(KernelError::Row {
                    table: schema.table(table).name().to_string(),
                    row,
                    source,
                })
            }
        };

        if let Some(target) = self.target {
            if let Err(err) = schema.set_value(target, row, value.clone()) {
                return Err(self.row_error(schema, row, err.into()));
            }
        }
        Ok(value)
    }

    /// Drive the tree over records streamed from `source`: each record is appended to the input
    /// table and the new row evaluated. Returns the number of records consumed.
    pub fn evaluate_source(
        &mut self,
        schema: &mut Schema,
        source: &mut dyn RowSource,
    ) -> KernelResult<usize> {
        source.open()?;
        let outcome = self.drain_source(schema, source);
        let closed = source.close();
        let count = outcome?;
        closed?;
        log::debug!(
            "consumed {count} records into {}",
            schema.table(self.input).name()
        );
        Ok(count)
    }

    fn drain_source(
        &mut self,
        schema: &mut Schema,
        source: &mut dyn RowSource,
    ) -> KernelResult<usize> {
        let table_name = schema.table(self.input).name().to_string();
        let columns = source
            .columns()
            .iter()
            .map(|name| {
                schema
                    .column_by_name(self.input, name)
                    .ok_or_else(|| KernelError::UnknownColumn {
                        table: table_name.clone(),
                        column: name.clone(),
                    })
            })
            .collect::<KernelResult<Vec<ColumnId>>>()?;

        self.last(schema);
        let mut count = 0;
        while let Some(record) = source.next()? {
            if record.len() != columns.len() {
                log::warn!(
                    "record {count} for {table_name} has {} fields, expected {}",
                    record.len(),
                    columns.len()
                );
                return Err(KernelError::SchemaMismatch {
                    table: table_name,
                    expected: columns.len(),
                    actual: record.len(),
                });
            }
            let values: Vec<(ColumnId, Value)> = columns.iter().copied().zip(record).collect();
            let end = schema.append_row(self.input, &values)? + 1;
            self.advance_to(schema, end)?;
            count += 1;
        }
        Ok(count)
    }

    #[cfg(feature = "parallel")]
    fn evaluate_parallel(&mut self, schema: &mut Schema, len: usize) -> KernelResult<()> {
        use rayon::prelude::*;

        let shared: &Schema = schema;
        let this = self.this;
        let template = (&self.tree, &self.variables);
        let results: Vec<Result<Value, EvalError>> = (0..len)
            .into_par_iter()
            .map_init(
                || (template.0.clone(), template.1.clone()),
                |(tree, vars), row| {
                    vars.set(this, Value::Row(row));
                    tree.evaluate_read(shared, vars).map(Value::clone)
                },
            )
            .collect();

        // Commit in offset order up to the first failure, as a sequential pass would.
        let table = schema.table(self.input).name().to_string();
        for (row, outcome) in results.into_iter().enumerate() {
            let value = outcome.map_err(|source| KernelError::Row {
                table: table.clone(),
                row,
                source,
            })?;
            if let Some(target) = self.target {
                if let Err(err) = schema.set_value(target, row, value) {
                    return Err(self.row_error(schema, row, err.into()));
                }
            }
            self.cursor = row + 1;
        }
        Ok(())
    }

    fn row_error(&self, schema: &Schema, row: usize, kind: EvalErrorKind) -> KernelError {
        KernelError::Row {
            table: schema.table(self.input).name().to_string(),
            row,
            source: EvalError {
                path: self.tree.path().to_string(),
                kind,
            },
        }
    }

    fn describe(&self, schema: &Schema) -> String {
        match self.target {
            Some(column) => schema.qualified_name(column),
            None => self.tree.path().to_string(),
        }
    }
}
