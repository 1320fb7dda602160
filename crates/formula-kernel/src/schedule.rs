use crate::aggregation::AggregationEvaluator;
use crate::error::{KernelError, KernelResult};
use crate::evaluator::ColumnEvaluator;
use crate::model::{ColumnDefinition, ColumnId, Schema, TableDefinition, TableId};
use crate::node::Dependencies;
use std::collections::HashMap;

/// One unit of schema-wide work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Populate(TableId),
    Evaluate(ColumnId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Schema {
    /// Recompute a formula or aggregate column. Aggregates are reset to their neutral element
    /// first, so repeated calls give the same result.
    pub fn evaluate_column(&mut self, column: ColumnId) -> KernelResult<()> {
        match self.column(column).definition() {
            ColumnDefinition::Stored => Ok(()),
            ColumnDefinition::Formula(_) => ColumnEvaluator::new(self, column)?.evaluate(self),
            ColumnDefinition::Aggregate(_) => {
                let mut evaluator = AggregationEvaluator::new(self, column)?;
                evaluator.reset(self)?;
                evaluator.evaluate(self)
            }
        }
    }

    /// Populate every defined table and evaluate every computed column, dependencies first.
    pub fn evaluate_all(&mut self) -> KernelResult<()> {
        for step in self.evaluation_order()? {
            match step {
                Step::Populate(table) => {
                    self.populate(table)?;
                }
                Step::Evaluate(column) => self.evaluate_column(column)?,
            }
        }
        Ok(())
    }

    /// Order in which tables must be populated and columns evaluated so that everything a step
    /// reads is computed before it.
    pub fn evaluation_order(&self) -> KernelResult<Vec<Step>> {
        let mut steps = Vec::new();
        for table in self.tables() {
            if table.definition() != &TableDefinition::Stored {
                steps.push(Step::Populate(table.id()));
            }
        }
        for column in self.columns() {
            if column.is_computed() && self.projection_of(column.id()).is_none() {
                steps.push(Step::Evaluate(column.id()));
            }
        }

        let mut edges = HashMap::new();
        for step in &steps {
            edges.insert(*step, self.step_dependencies(*step)?);
        }

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(steps.len());
        let mut trail = Vec::new();
        for step in &steps {
            self.visit(*step, &edges, &mut marks, &mut trail, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        step: Step,
        edges: &HashMap<Step, Vec<Step>>,
        marks: &mut HashMap<Step, Mark>,
        trail: &mut Vec<Step>,
        order: &mut Vec<Step>,
    ) -> KernelResult<()> {
        match marks.get(&step) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = trail.iter().position(|s| *s == step).unwrap_or(0);
                let mut names: Vec<String> =
                    trail[start..].iter().map(|s| self.step_name(*s)).collect();
                names.push(self.step_name(step));
                return Err(KernelError::DependencyCycle(names.join(" -> ")));
            }
            None => {}
        }

        marks.insert(step, Mark::Visiting);
        trail.push(step);
        for dep in edges.get(&step).map(Vec::as_slice).unwrap_or_default() {
            if *dep != step {
                self.visit(*dep, edges, marks, trail, order)?;
            }
        }
        trail.pop();
        marks.insert(step, Mark::Done);
        order.push(step);
        Ok(())
    }

    fn step_dependencies(&self, step: Step) -> KernelResult<Vec<Step>> {
        let (deps, inputs) = match step {
            Step::Evaluate(column) => {
                let input = self.column(column).table();
                match self.column(column).definition() {
                    ColumnDefinition::Aggregate(_) => {
                        let evaluator = AggregationEvaluator::new(self, column)?;
                        (
                            evaluator.dependencies(),
                            vec![evaluator.facts(), evaluator.groups()],
                        )
                    }
                    _ => (ColumnEvaluator::new(self, column)?.dependencies(), vec![input]),
                }
            }
            Step::Populate(table) => match self.table(table).definition().clone() {
                TableDefinition::Stored => (Dependencies::default(), Vec::new()),
                TableDefinition::Product { filter } => {
                    let sources: Vec<TableId> = self
                        .table(table)
                        .columns()
                        .iter()
                        .filter_map(|c| self.column(*c).data_type().table())
                        .collect();
                    let deps = match filter {
                        Some(expr) => ColumnEvaluator::for_expr(self, table, &expr, None)?
                            .dependencies(),
                        None => Dependencies::default(),
                    };
                    (deps, sources)
                }
                TableDefinition::Subset { base, predicate } => (
                    ColumnEvaluator::for_expr(self, base, &predicate, None)?.dependencies(),
                    vec![base],
                ),
                TableDefinition::Projection { generating } => {
                    let evaluator = ColumnEvaluator::new(self, generating)?;
                    (evaluator.dependencies(), vec![evaluator.input()])
                }
            },
        };

        let mut out = Vec::new();
        for table in inputs {
            if let Some(populate) = self.populating_step(table) {
                out.push(populate);
            }
        }
        for column in deps.reads {
            if let Some(producer) = self.producing_step(column) {
                out.push(producer);
            }
        }
        out.retain(|s| *s != step);
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Step whose completion makes the values of `column` available.
    fn producing_step(&self, column: ColumnId) -> Option<Step> {
        let col = self.column(column);
        if let Some(table) = self.projection_of(column) {
            return Some(Step::Populate(table));
        }
        if col.is_computed() {
            return Some(Step::Evaluate(column));
        }
        self.populating_step(col.table())
    }

    fn populating_step(&self, table: TableId) -> Option<Step> {
        (self.table(table).definition() != &TableDefinition::Stored)
            .then_some(Step::Populate(table))
    }

    /// Table populated through `column` when it is a projection's generating column.
    fn projection_of(&self, column: ColumnId) -> Option<TableId> {
        self.tables()
            .find(|t| match t.definition() {
                TableDefinition::Projection { generating } => *generating == column,
                _ => false,
            })
            .map(|t| t.id())
    }

    fn step_name(&self, step: Step) -> String {
        match step {
            Step::Populate(table) => self.table(table).name().to_string(),
            Step::Evaluate(column) => self.qualified_name(column),
        }
    }
}
