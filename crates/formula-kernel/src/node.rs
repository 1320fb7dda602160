//! Resolved expression trees.
//!
//! A [`Node`] carries bindings fixed at resolution time (column ids, variable slots, operator)
//! and a `result` slot overwritten by every [`Node::evaluate`] call. Nothing is looked up by name
//! while evaluating.
use crate::error::{EvalError, EvalErrorKind};
use crate::expr::{Action, BinaryOp, UnaryOp};
use crate::model::{ColumnId, DataType, Schema, TableId};
use crate::variables::{VarId, Variables};
use formula_columnar::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) path: String,
    pub(crate) data_type: Option<DataType>,
    pub(crate) kind: NodeKind,
    pub(crate) result: Value,
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    Literal(Value),
    Tuple {
        table: TableId,
        action: Action,
        members: Vec<Member>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    ColumnRead {
        column: ColumnId,
        this: Box<Node>,
    },
    ColumnWrite {
        column: ColumnId,
        this: Box<Node>,
        value: Box<Node>,
    },
    ColumnAppend {
        table: TableId,
        column: ColumnId,
        value: Box<Node>,
    },
    VariableRead(VarId),
    VariableWrite {
        var: VarId,
        value: Box<Node>,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub(crate) column: ColumnId,
    pub(crate) key: bool,
    pub(crate) node: Node,
}

/// What a resolved tree touches, for scheduling evaluation passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub reads: BTreeSet<ColumnId>,
    pub writes: BTreeSet<ColumnId>,
    pub appends: BTreeSet<TableId>,
    pub variables: BTreeSet<VarId>,
}

impl Dependencies {
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty() && self.appends.is_empty()
    }

    pub fn extend(&mut self, other: Dependencies) {
        self.reads.extend(other.reads);
        self.writes.extend(other.writes);
        self.appends.extend(other.appends);
        self.variables.extend(other.variables);
    }
}

/// Storage seen by an evaluating tree: writable, or shared read-only for parallel passes.
pub(crate) trait RowStore {
    fn schema(&self) -> &Schema;
    /// The writable schema, or the shared one when this pass may not write.
    fn schema_mut(&mut self) -> Result<&mut Schema, &Schema>;
}

impl RowStore for &Schema {
    fn schema(&self) -> &Schema {
        self
    }

    fn schema_mut(&mut self) -> Result<&mut Schema, &Schema> {
        Err(*self)
    }
}

impl RowStore for &mut Schema {
    fn schema(&self) -> &Schema {
        self
    }

    fn schema_mut(&mut self) -> Result<&mut Schema, &Schema> {
        Ok(&mut **self)
    }
}

type EvalResult<T> = Result<T, EvalErrorKind>;

impl Node {
    /// Slash separated labels from the root of the tree to this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Value produced by the last [`evaluate`](Self::evaluate).
    ///
    /// A READ tuple that finds no matching row produces [`Value::Null`]; there is no separate
    /// not-found offset.
    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn evaluate(
        &mut self,
        schema: &mut Schema,
        vars: &mut Variables,
    ) -> Result<&Value, EvalError> {
        let mut store = schema;
        self.eval_in(&mut store, vars)?;
        Ok(&self.result)
    }

    /// Evaluate without the ability to append or write; such nodes fail with
    /// [`EvalErrorKind::ReadOnly`].
    pub fn evaluate_read(
        &mut self,
        schema: &Schema,
        vars: &mut Variables,
    ) -> Result<&Value, EvalError> {
        let mut store = schema;
        self.eval_in(&mut store, vars)?;
        Ok(&self.result)
    }

    pub fn dependencies(&self) -> Dependencies {
        let mut deps = Dependencies::default();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut Dependencies) {
        match &self.kind {
            NodeKind::Literal(_) => {}
            NodeKind::Tuple {
                table,
                action,
                members,
            } => {
                if *action == Action::Append {
                    deps.appends.insert(*table);
                }
                for member in members {
                    deps.reads.insert(member.column);
                    member.node.collect_dependencies(deps);
                }
            }
            NodeKind::Unary { operand, .. } => operand.collect_dependencies(deps),
            NodeKind::Binary { left, right, .. } => {
                left.collect_dependencies(deps);
                right.collect_dependencies(deps);
            }
            NodeKind::ColumnRead { column, this } => {
                deps.reads.insert(*column);
                this.collect_dependencies(deps);
            }
            NodeKind::ColumnWrite {
                column,
                this,
                value,
            } => {
                deps.writes.insert(*column);
                this.collect_dependencies(deps);
                value.collect_dependencies(deps);
            }
            NodeKind::ColumnAppend {
                table,
                column,
                value,
            } => {
                deps.appends.insert(*table);
                deps.writes.insert(*column);
                value.collect_dependencies(deps);
            }
            NodeKind::VariableRead(var) => {
                deps.variables.insert(*var);
            }
            NodeKind::VariableWrite { var, value } => {
                deps.variables.insert(*var);
                value.collect_dependencies(deps);
            }
        }
    }

    pub(crate) fn eval_in<S: RowStore>(
        &mut self,
        store: &mut S,
        vars: &mut Variables,
    ) -> Result<(), EvalError> {
        let Node {
            path, kind, result, ..
        } = self;
        let fail = |kind: EvalErrorKind| EvalError {
            path: path.clone(),
            kind,
        };

        match kind {
            NodeKind::Literal(value) => *result = value.clone(),
            NodeKind::Unary { op, operand } => {
                operand.eval_in(store, vars)?;
                *result = match op {
                    UnaryOp::Negate => {
                        Value::Number(-coerce_number(&operand.result).map_err(fail)?)
                    }
                };
            }
            NodeKind::Binary { op, left, right } => {
                left.eval_in(store, vars)?;
                // `&&` / `||` short-circuit.
                match op {
                    BinaryOp::And if !truthy(&left.result).map_err(fail)? => {
                        *result = Value::Boolean(false);
                        return Ok(());
                    }
                    BinaryOp::Or if truthy(&left.result).map_err(fail)? => {
                        *result = Value::Boolean(true);
                        return Ok(());
                    }
                    _ => {}
                }
                right.eval_in(store, vars)?;
                *result = eval_binary(*op, &left.result, &right.result).map_err(fail)?;
            }
            NodeKind::ColumnRead { column, this } => {
                this.eval_in(store, vars)?;
                *result = match row_of(&this.result).map_err(fail)? {
                    // Navigating through a missing link yields null.
                    None => Value::Null,
                    Some(row) => store
                        .schema()
                        .get_value(*column, row)
                        .map_err(|e| fail(e.into()))?
                        .clone(),
                };
            }
            NodeKind::ColumnWrite {
                column,
                this,
                value,
            } => {
                this.eval_in(store, vars)?;
                value.eval_in(store, vars)?;
                let row = row_of(&this.result)
                    .map_err(fail)?
                    .ok_or_else(|| fail(EvalErrorKind::NullReference))?;
                let schema = writable(store, |s| s.qualified_name(*column)).map_err(fail)?;
                schema
                    .set_value(*column, row, value.result.clone())
                    .map_err(|e| fail(e.into()))?;
                *result = Value::Row(row);
            }
            NodeKind::ColumnAppend {
                table,
                column,
                value,
            } => {
                value.eval_in(store, vars)?;
                let schema = writable(store, |s| s.qualified_name(*column)).map_err(fail)?;
                let row = schema
                    .append_row(*table, &[(*column, value.result.clone())])
                    .map_err(|e| fail(e.into()))?;
                *result = Value::Row(row);
            }
            NodeKind::VariableRead(var) => *result = vars.get(*var).clone(),
            NodeKind::VariableWrite { var, value } => {
                value.eval_in(store, vars)?;
                vars.set(*var, value.result.clone());
                *result = value.result.clone();
            }
            NodeKind::Tuple {
                table,
                action,
                members,
            } => {
                for member in members.iter_mut() {
                    member.node.eval_in(store, vars)?;
                }
                let any_key = members.iter().any(|m| m.key);
                let (columns, values): (Vec<ColumnId>, Vec<Value>) = members
                    .iter()
                    .filter(|m| m.key || !any_key)
                    .map(|m| (m.column, m.node.result.clone()))
                    .unzip();

                let found = store
                    .schema()
                    .find(*table, &columns, &values)
                    .map_err(|e| fail(e.into()))?;
                *result = match (found, *action) {
                    (Some(row), _) => Value::Row(row),
                    (None, Action::Append) => {
                        let row_values: Vec<(ColumnId, Value)> = members
                            .iter()
                            .map(|m| (m.column, m.node.result.clone()))
                            .collect();
                        let schema = writable(store, |s| s.table(*table).name().to_string())
                            .map_err(fail)?;
                        let row = schema
                            .append_row(*table, &row_values)
                            .map_err(|e| fail(e.into()))?;
                        Value::Row(row)
                    }
                    // Not found: the null row.
                    (None, _) => Value::Null,
                };
            }
        }
        Ok(())
    }
}

fn writable<S: RowStore>(
    store: &mut S,
    target: impl FnOnce(&Schema) -> String,
) -> EvalResult<&mut Schema> {
    store
        .schema_mut()
        .map_err(|schema| EvalErrorKind::ReadOnly(target(schema)))
}

/// Row offset held by a link value; `Null` is the missing row.
pub(crate) fn row_of(value: &Value) -> EvalResult<Option<usize>> {
    match value {
        Value::Row(row) => Ok(Some(*row)),
        Value::Null => Ok(None),
        other => Err(EvalErrorKind::Type(format!(
            "expected a row reference, found {other}"
        ))),
    }
}

/// Truth value of a predicate result. `Null` is false.
pub(crate) fn truthy(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvalErrorKind::Type(format!(
            "expected a boolean, found {other}"
        ))),
    }
}

fn coerce_number(value: &Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Null => Ok(0.0),
        other => Err(EvalErrorKind::Type(format!(
            "cannot use {} {other} as a number",
            other.type_name()
        ))),
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            let l = coerce_number(left)?;
            let r = coerce_number(right)?;
            let out = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                _ if r == 0.0 => return Err(EvalErrorKind::DivisionByZero),
                _ => l / r,
            };
            Ok(Value::Number(out))
        }
        BinaryOp::Min | BinaryOp::Max => {
            // Null is the identity so accumulators can start empty.
            if left.is_null() {
                return Ok(Value::Number(coerce_number(right)?));
            }
            if right.is_null() {
                return Ok(Value::Number(coerce_number(left)?));
            }
            let l = coerce_number(left)?;
            let r = coerce_number(right)?;
            Ok(Value::Number(if op == BinaryOp::Min {
                l.min(r)
            } else {
                l.max(r)
            }))
        }
        BinaryOp::And | BinaryOp::Or => {
            let l = truthy(left)?;
            let r = truthy(right)?;
            Ok(Value::Boolean(if op == BinaryOp::And {
                l && r
            } else {
                l || r
            }))
        }
        _ => Ok(Value::Boolean(compare_values(op, left, right)?)),
    }
}

fn compare_values(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<bool> {
    let cmp = match (left, right) {
        (Value::Number(_) | Value::Null, Value::Number(_) | Value::Null) => {
            let l = coerce_number(left)?;
            let r = coerce_number(right)?;
            l.partial_cmp(&r).ok_or_else(|| {
                EvalErrorKind::Type(format!("cannot compare {left} and {right}"))
            })?
        }
        (Value::String(_), Value::String(_))
        | (Value::Boolean(_), Value::Boolean(_))
        | (Value::Row(_), Value::Row(_)) => left.cmp(right),
        // Equality across types is simply false; ordering is an error.
        _ if matches!(op, BinaryOp::Equals | BinaryOp::NotEquals) => {
            return Ok((op == BinaryOp::NotEquals) != (left == right));
        }
        _ => {
            return Err(EvalErrorKind::Type(format!(
                "cannot compare {left} and {right} with {}",
                op.symbol()
            )))
        }
    };

    Ok(match op {
        BinaryOp::Equals => cmp == Ordering::Equal,
        BinaryOp::NotEquals => cmp != Ordering::Equal,
        BinaryOp::Less => cmp == Ordering::Less,
        BinaryOp::LessEquals => cmp != Ordering::Greater,
        BinaryOp::Greater => cmp == Ordering::Greater,
        _ => cmp != Ordering::Less,
    })
}
