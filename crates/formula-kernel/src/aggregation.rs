use crate::error::{EvalError, EvalErrorKind, KernelError, KernelResult};
use crate::expr::{BinaryOp, Expr, ExprKind};
use crate::model::{ColumnDefinition, ColumnId, DataType, Schema, TableId};
use crate::node::{Dependencies, Node};
use crate::resolve::{resolve, Scope};
use crate::variables::{VarId, Variables};
use formula_columnar::Value;

/// How a measure is folded into the value accumulated for its group.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    /// Updater over the variables `value` (current accumulator) and `measure`. Bare names bind
    /// only to variables; fact columns are reached through `this.[column]`.
    Custom(Expr),
}

impl Aggregator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SUM" => Some(Aggregator::Sum),
            "COUNT" => Some(Aggregator::Count),
            "MIN" => Some(Aggregator::Min),
            "MAX" => Some(Aggregator::Max),
            _ => None,
        }
    }

    /// Accumulator value before the first fact is merged.
    pub fn neutral(&self) -> Value {
        match self {
            Aggregator::Sum | Aggregator::Count => Value::Number(0.0),
            Aggregator::Min | Aggregator::Max | Aggregator::Custom(_) => Value::Null,
        }
    }

    fn updater(&self) -> Expr {
        let value = Expr::var("value");
        let measure = Expr::var("measure");
        match self {
            Aggregator::Sum => Expr::binary(BinaryOp::Add, value, measure),
            Aggregator::Count => Expr::binary(BinaryOp::Add, value, Expr::number(1.0)),
            Aggregator::Min => Expr::binary(BinaryOp::Min, value, measure),
            Aggregator::Max => Expr::binary(BinaryOp::Max, value, measure),
            Aggregator::Custom(expr) => expr.clone(),
        }
    }
}

/// `AGGREGATE(facts = ..., groups = ..., measure = ..., aggregator = ...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateDefinition {
    pub facts: String,
    pub groups: String,
    /// Maps a fact row to its group row. Defaults to the fact column linking to `groups`.
    pub grouping: Option<Expr>,
    pub measure: Expr,
    pub aggregator: Aggregator,
}

impl AggregateDefinition {
    pub fn new(
        facts: impl Into<String>,
        groups: impl Into<String>,
        measure: Expr,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            facts: facts.into(),
            groups: groups.into(),
            grouping: None,
            measure,
            aggregator,
        }
    }

    pub fn with_grouping(mut self, grouping: Expr) -> Self {
        self.grouping = Some(grouping);
        self
    }

    /// Read the definition off an `AGGREGATE(...)` call with named arguments.
    pub fn from_call(expr: &Expr) -> KernelResult<Self> {
        let invalid = |reason: String| KernelError::InvalidCall {
            path: expr.label(),
            reason,
        };
        let ExprKind::Call { method, args, .. } = &expr.kind else {
            return Err(invalid("expected an AGGREGATE call".to_string()));
        };
        if !method.eq_ignore_ascii_case("AGGREGATE") {
            return Err(invalid(format!("expected AGGREGATE, found {method}")));
        }

        let arg = |name: &str| {
            args.iter()
                .find(|a| a.name.as_deref() == Some(name))
                .ok_or_else(|| invalid(format!("missing argument `{name}`")))
        };
        let facts =
            name_of(arg("facts")?).ok_or_else(|| invalid("facts must name a table".into()))?;
        let groups =
            name_of(arg("groups")?).ok_or_else(|| invalid("groups must name a table".into()))?;
        let aggregator_name =
            name_of(arg("aggregator")?).ok_or_else(|| invalid("aggregator must be a name".into()))?;
        let aggregator = Aggregator::from_name(&aggregator_name)
            .ok_or_else(|| invalid(format!("unknown aggregator {aggregator_name}")))?;

        let mut measure = arg("measure")?.clone();
        measure.name = None;
        Ok(Self::new(facts, groups, measure, aggregator))
    }
}

/// Identifier or string literal naming a table/aggregator.
fn name_of(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Value(Value::String(s)) => Some(s.to_string()),
        ExprKind::Call {
            method,
            this: None,
            args,
        } if args.is_empty() => Some(method.clone()),
        _ => None,
    }
}

/// Folds the rows of a fact table into an accumulator column of a group table.
#[derive(Clone, Debug)]
pub struct AggregationEvaluator {
    column: ColumnId,
    facts: TableId,
    groups: TableId,
    group: Node,
    measure: Node,
    updater: Node,
    neutral: Value,
    variables: Variables,
    this: VarId,
    group_var: VarId,
    measure_var: VarId,
    value_var: VarId,
}

impl AggregationEvaluator {
    pub fn new(schema: &Schema, column: ColumnId) -> KernelResult<Self> {
        let col = schema.column(column);
        let ColumnDefinition::Aggregate(def) = col.definition() else {
            return Err(KernelError::InvalidDefinition {
                name: schema.qualified_name(column),
                reason: "column has no aggregate definition".to_string(),
            });
        };

        let facts = schema
            .table_by_name(&def.facts)
            .ok_or_else(|| KernelError::UnknownTable(def.facts.clone()))?;
        let groups = schema
            .table_by_name(&def.groups)
            .ok_or_else(|| KernelError::UnknownTable(def.groups.clone()))?;
        if col.table() != groups {
            return Err(KernelError::InvalidDefinition {
                name: schema.qualified_name(column),
                reason: format!("accumulator must be a column of {}", def.groups),
            });
        }

        let mut variables = Variables::new();
        let this = variables.declare("this", DataType::Table(facts));
        let group_var = variables.declare("group", DataType::Table(groups));
        let measure_var = variables.declare("measure", col.data_type());
        let value_var = variables.declare("value", col.data_type());

        let grouping = match &def.grouping {
            Some(expr) => expr.clone(),
            None => Self::default_grouping(schema, column, facts, groups)?,
        };

        let scope = Scope::new(schema, &variables);
        let group = resolve(&grouping, &scope, Some(DataType::Table(groups)))?;
        if group.data_type() != Some(DataType::Table(groups)) {
            return Err(KernelError::TypeMismatch {
                path: group.path().to_string(),
                expected: def.groups.clone(),
                actual: group
                    .data_type()
                    .map_or_else(|| "untyped".to_string(), |t| t.to_string()),
            });
        }
        let measure = resolve(&def.measure, &scope, None)?;
        // `value` and `measure` are slots here, whatever columns the facts carry.
        let updater = resolve(
            &def.aggregator.updater(),
            &scope.variables_only(),
            Some(col.data_type()),
        )?;

        Ok(Self {
            column,
            facts,
            groups,
            group,
            measure,
            updater,
            neutral: def.aggregator.neutral(),
            variables,
            this,
            group_var,
            measure_var,
            value_var,
        })
    }

    /// `this.[link]` for the single fact column whose rows point into `groups`.
    fn default_grouping(
        schema: &Schema,
        column: ColumnId,
        facts: TableId,
        groups: TableId,
    ) -> KernelResult<Expr> {
        let links: Vec<&str> = schema
            .table(facts)
            .columns()
            .iter()
            .map(|c| schema.column(*c))
            .filter(|c| c.data_type() == DataType::Table(groups))
            .map(|c| c.name())
            .collect();
        match links.as_slice() {
            [link] => Ok(Expr::column(Expr::this(), *link)),
            [] => Err(KernelError::Unresolved {
                path: schema.qualified_name(column),
                name: format!(
                    "link from {} to {}",
                    schema.table(facts).name(),
                    schema.table(groups).name()
                ),
            }),
            many => Err(KernelError::Ambiguous {
                path: schema.qualified_name(column),
                name: schema.table(groups).name().to_string(),
                candidates: many.join(", "),
            }),
        }
    }

    pub fn column(&self) -> ColumnId {
        self.column
    }

    pub fn facts(&self) -> TableId {
        self.facts
    }

    pub fn groups(&self) -> TableId {
        self.groups
    }

    pub fn dependencies(&self) -> Dependencies {
        let mut deps = self.group.dependencies();
        deps.extend(self.measure.dependencies());
        deps.extend(self.updater.dependencies());
        deps.writes.insert(self.column);
        deps
    }

    /// Set every accumulator to the aggregator's neutral element.
    pub fn reset(&self, schema: &mut Schema) -> KernelResult<()> {
        schema.fill(self.column, self.neutral.clone())
    }

    /// Merge every fact row, in offset order, into its group's accumulator.
    ///
    /// Accumulators start from whatever the column holds; call [`reset`](Self::reset) first for
    /// a fresh result. Facts whose group is null are skipped.
    pub fn evaluate(&mut self, schema: &mut Schema) -> KernelResult<()> {
        let len = schema.len(self.facts);
        log::debug!(
            "aggregating {len} facts of {} into {}",
            schema.table(self.facts).name(),
            schema.qualified_name(self.column)
        );

        for fact in 0..len {
            self.merge(schema, fact).map_err(|source| KernelError::Row {
                table: schema.table(self.facts).name().to_string(),
                row: fact,
                source,
            })?;
        }
        Ok(())
    }

    fn merge(&mut self, schema: &mut Schema, fact: usize) -> Result<(), EvalError> {
        self.variables.set(self.this, Value::Row(fact));

        let group = match self.group.evaluate(schema, &mut self.variables)?.clone() {
            Value::Row(g) => g,
            Value::Null => return Ok(()),
            other => {
                return Err(EvalError {
                    path: self.group.path().to_string(),
                    kind: EvalErrorKind::Type(format!("expected a group row, found {other}")),
                })
            }
        };
        self.variables.set(self.group_var, Value::Row(group));

        let measure = self.measure.evaluate(schema, &mut self.variables)?.clone();
        self.variables.set(self.measure_var, measure);

        let fail = |err: KernelError| EvalError {
            path: self.updater.path().to_string(),
            kind: err.into(),
        };
        let old = schema.get_value(self.column, group).map_err(fail)?.clone();
        self.variables.set(self.value_var, old);

        let new = self.updater.evaluate(schema, &mut self.variables)?.clone();
        schema
            .set_value(self.column, group, new)
            .map_err(|err| EvalError {
                path: self.updater.path().to_string(),
                kind: err.into(),
            })
    }
}
