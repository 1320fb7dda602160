//! Table population: growing a table's rows from its [`TableDefinition`].
//!
//! Every strategy appends through find-before-append on the table's identity columns, so running
//! a population twice does not duplicate rows, and clearing the table first reproduces the same
//! result.
use crate::error::{EvalError, KernelError, KernelResult};
use crate::evaluator::ColumnEvaluator;
use crate::expr::{Action, Expr};
use crate::model::{ColumnId, DataType, Schema, TableDefinition, TableId};
use crate::node::truthy;
use formula_columnar::Value;

impl Schema {
    /// Grow `table` according to its definition. Returns the number of rows appended.
    pub fn populate(&mut self, table: TableId) -> KernelResult<usize> {
        let before = self.len(table);
        match self.table(table).definition().clone() {
            TableDefinition::Stored => return Ok(0),
            TableDefinition::Product { filter } => self.populate_product(table, filter.as_ref())?,
            TableDefinition::Subset { base, predicate } => {
                self.populate_subset(table, base, &predicate)?
            }
            TableDefinition::Projection { generating } => {
                self.populate_projection(table, generating)?
            }
        }
        let appended = self.len(table) - before;
        log::debug!(
            "populated {}: {appended} new rows, {} total",
            self.table(table).name(),
            self.len(table)
        );
        Ok(appended)
    }

    /// Product table over `keys` (`(column name, source table)` pairs), optionally filtered.
    pub fn create_product(
        &mut self,
        name: impl Into<String>,
        keys: &[(&str, TableId)],
        filter: Option<Expr>,
    ) -> KernelResult<TableId> {
        let table = self.create_table(name)?;
        for (column, source) in keys {
            self.create_column(table, *column, DataType::Table(*source), true)?;
        }
        self.set_definition(table, TableDefinition::Product { filter });
        Ok(table)
    }

    /// Subset of `base` linked through a `Super` key column.
    pub fn create_subset(
        &mut self,
        name: impl Into<String>,
        base: TableId,
        predicate: Expr,
    ) -> KernelResult<TableId> {
        let table = self.create_table(name)?;
        self.create_column(table, "Super", DataType::Table(base), true)?;
        self.set_definition(table, TableDefinition::Subset { base, predicate });
        Ok(table)
    }

    /// Group table keyed by `keys`, discovered from `facts` through the tuple expression
    /// `tuple`. The fact column `generating` is created to hold each fact's group row.
    pub fn create_projection(
        &mut self,
        name: impl Into<String>,
        facts: TableId,
        generating: &str,
        keys: &[(&str, DataType)],
        tuple: Expr,
    ) -> KernelResult<TableId> {
        let table = self.create_table(name)?;
        for (column, data_type) in keys {
            self.create_column(table, *column, *data_type, true)?;
        }
        let link = self.create_column(facts, generating, DataType::Table(table), false)?;
        self.set_formula(link, tuple.with_action(Action::Append));
        self.set_definition(table, TableDefinition::Projection { generating: link });
        Ok(table)
    }

    fn populate_product(&mut self, table: TableId, filter: Option<&Expr>) -> KernelResult<()> {
        let keys: Vec<(ColumnId, TableId)> = self
            .table(table)
            .columns()
            .iter()
            .map(|c| self.column(*c))
            .filter(|c| c.is_key())
            .filter_map(|c| c.data_type().table().map(|source| (c.id(), source)))
            .collect();
        if keys.is_empty() {
            return Err(KernelError::InvalidDefinition {
                name: self.table(table).name().to_string(),
                reason: "product table has no key columns referencing other tables".to_string(),
            });
        }

        let mut filter = filter
            .map(|expr| ColumnEvaluator::for_expr(self, table, expr, None))
            .transpose()?;

        let sizes: Vec<usize> = keys.iter().map(|(_, source)| self.len(*source)).collect();
        if sizes.contains(&0) {
            return Ok(());
        }

        let columns: Vec<ColumnId> = keys.iter().map(|(c, _)| *c).collect();
        // Odometer over the sources, last key varying fastest.
        let mut combination = vec![0usize; keys.len()];
        loop {
            let values: Vec<Value> = combination.iter().map(|&row| Value::Row(row)).collect();
            if self.find(table, &columns, &values)?.is_none() {
                let row_values: Vec<(ColumnId, Value)> =
                    columns.iter().copied().zip(values).collect();
                let row = self.append_row(table, &row_values)?;
                if let Some(filter) = filter.as_mut() {
                    let keep = filter.evaluate_row(self, row).and_then(|verdict| {
                        truthy(&verdict).map_err(|kind| KernelError::Row {
                            table: self.table(table).name().to_string(),
                            row,
                            source: EvalError {
                                path: filter.tree().path().to_string(),
                                kind,
                            },
                        })
                    });
                    match keep {
                        Ok(true) => {}
                        Ok(false) => self.pop_row(table),
                        Err(err) => {
                            self.pop_row(table);
                            return Err(err);
                        }
                    }
                }
            }

            let mut digit = keys.len();
            loop {
                if digit == 0 {
                    return Ok(());
                }
                digit -= 1;
                combination[digit] += 1;
                if combination[digit] < sizes[digit] {
                    break;
                }
                combination[digit] = 0;
            }
        }
    }

    fn populate_subset(
        &mut self,
        table: TableId,
        base: TableId,
        predicate: &Expr,
    ) -> KernelResult<()> {
        let supers: Vec<ColumnId> = self
            .table(table)
            .columns()
            .iter()
            .map(|c| self.column(*c))
            .filter(|c| c.is_key() && c.data_type() == DataType::Table(base))
            .map(|c| c.id())
            .collect();
        let [link] = supers.as_slice() else {
            return Err(KernelError::InvalidDefinition {
                name: self.table(table).name().to_string(),
                reason: format!(
                    "subset needs exactly one key column linking to {}, found {}",
                    self.table(base).name(),
                    supers.len()
                ),
            });
        };
        let link = *link;

        let mut evaluator = ColumnEvaluator::for_expr(self, base, predicate, None)?;
        for row in 0..self.len(base) {
            let verdict = evaluator.evaluate_row(self, row)?;
            let keep = truthy(&verdict).map_err(|kind| KernelError::Row {
                table: self.table(base).name().to_string(),
                row,
                source: EvalError {
                    path: evaluator.tree().path().to_string(),
                    kind,
                },
            })?;
            if keep && self.find(table, &[link], &[Value::Row(row)])?.is_none() {
                self.append_row(table, &[(link, Value::Row(row))])?;
            }
        }
        Ok(())
    }

    fn populate_projection(&mut self, table: TableId, generating: ColumnId) -> KernelResult<()> {
        if self.column(generating).data_type() != DataType::Table(table) {
            return Err(KernelError::InvalidDefinition {
                name: self.table(table).name().to_string(),
                reason: format!(
                    "generating column {} does not link to this table",
                    self.qualified_name(generating)
                ),
            });
        }
        let mut evaluator = ColumnEvaluator::new(self, generating)?;
        if !evaluator.dependencies().appends.contains(&table) {
            return Err(KernelError::InvalidDefinition {
                name: self.table(table).name().to_string(),
                reason: format!(
                    "formula of {} never appends to this table",
                    self.qualified_name(generating)
                ),
            });
        }
        evaluator.evaluate(self)
    }
}
