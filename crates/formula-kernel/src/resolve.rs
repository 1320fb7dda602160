use crate::error::{KernelError, KernelResult};
use crate::expr::{Action, BinaryOp, Expr, ExprKind, UnaryOp};
use crate::model::{ColumnId, DataType, Schema, TableId};
use crate::node::{Member, Node, NodeKind};
use crate::variables::Variables;
use formula_columnar::Value;

/// Names visible while resolving: the schema plus the driver's variables.
#[derive(Clone, Copy, Debug)]
pub struct Scope<'a> {
    pub schema: &'a Schema,
    pub variables: &'a Variables,
    /// Whether a bare name may fall back to a column of the `this` row.
    pub implicit_this: bool,
}

impl<'a> Scope<'a> {
    pub fn new(schema: &'a Schema, variables: &'a Variables) -> Self {
        Self {
            schema,
            variables,
            implicit_this: true,
        }
    }

    /// Same names, but bare names only bind to variables. `this.[column]` still works.
    pub fn variables_only(mut self) -> Self {
        self.implicit_this = false;
        self
    }
}

/// Bind every node of `expr` against `scope`.
///
/// `expected` is the type the caller will store the result as; a tuple without a declared type
/// takes its table from it. Either the whole tree resolves or an error naming the offending node
/// path is returned.
pub fn resolve(expr: &Expr, scope: &Scope<'_>, expected: Option<DataType>) -> KernelResult<Node> {
    Resolver { scope }.resolve(expr, expected, "")
}

struct Resolver<'s, 'a> {
    scope: &'s Scope<'a>,
}

impl Resolver<'_, '_> {
    fn resolve(&self, expr: &Expr, expected: Option<DataType>, parent: &str) -> KernelResult<Node> {
        let path = if parent.is_empty() {
            expr.label()
        } else {
            format!("{parent}/{}", expr.label())
        };
        let declared = self.declared_type(expr, &path)?;

        let (kind, data_type) = match &expr.kind {
            ExprKind::Value(value) => {
                let data_type = match (declared, DataType::of_value(value)) {
                    (Some(d), Some(v)) if d != v => {
                        return Err(self.mismatch(&path, d, Some(v)));
                    }
                    (Some(d), _) => Some(d),
                    (None, v) => v,
                };
                (NodeKind::Literal(value.clone()), data_type)
            }
            ExprKind::Tuple(children) => {
                let table = match declared.or(expected) {
                    Some(DataType::Table(t)) => t,
                    Some(other) => {
                        return Err(KernelError::TypeMismatch {
                            path,
                            expected: "a table".to_string(),
                            actual: other.to_string(),
                        })
                    }
                    None => {
                        return Err(KernelError::Unresolved {
                            path,
                            name: "tuple table".to_string(),
                        })
                    }
                };
                if expr.action != Action::Read && expr.action != Action::Append {
                    return Err(KernelError::UnsupportedAction {
                        path,
                        action: expr.action,
                    });
                }
                let members = self.resolve_members(table, children, &path)?;
                (
                    NodeKind::Tuple {
                        table,
                        action: expr.action,
                        members,
                    },
                    Some(DataType::Table(table)),
                )
            }
            ExprKind::Call { method, this, args } => {
                self.resolve_call(expr, method, this.as_deref(), args, &path)?
            }
        };

        if let (Some(d), Some(actual)) = (declared, data_type) {
            if d != actual {
                return Err(self.mismatch(&path, d, Some(actual)));
            }
        }

        Ok(Node {
            path,
            data_type: declared.or(data_type),
            kind,
            result: Value::Null,
        })
    }

    fn declared_type(&self, expr: &Expr, path: &str) -> KernelResult<Option<DataType>> {
        match &expr.declared_type {
            None => Ok(None),
            Some(name) => self
                .scope
                .schema
                .resolve_type(name)
                .map(Some)
                .ok_or_else(|| KernelError::Unresolved {
                    path: path.to_string(),
                    name: name.clone(),
                }),
        }
    }

    fn resolve_members(
        &self,
        table: TableId,
        children: &[Expr],
        path: &str,
    ) -> KernelResult<Vec<Member>> {
        let schema = self.scope.schema;
        if children.is_empty() {
            return Err(KernelError::InvalidCall {
                path: path.to_string(),
                reason: "tuple has no members".to_string(),
            });
        }

        let mut members: Vec<Member> = Vec::with_capacity(children.len());
        for child in children {
            let Some(name) = child.name.as_deref() else {
                return Err(KernelError::Unresolved {
                    path: format!("{path}/{}", child.label()),
                    name: "member name".to_string(),
                });
            };
            let column = schema.column_by_name(table, name).ok_or_else(|| {
                KernelError::Unresolved {
                    path: format!("{path}/{}", child.label()),
                    name: name.to_string(),
                }
            })?;
            if members.iter().any(|m| m.column == column) {
                return Err(KernelError::Ambiguous {
                    path: path.to_string(),
                    name: name.to_string(),
                    candidates: "member listed twice".to_string(),
                });
            }

            let column_ref = schema.column(column);
            let node = self.resolve(child, Some(column_ref.data_type()), path)?;
            if let Some(actual) = node.data_type {
                if actual != column_ref.data_type() {
                    return Err(self.mismatch(&node.path, column_ref.data_type(), Some(actual)));
                }
            }
            members.push(Member {
                column,
                key: column_ref.is_key(),
                node,
            });
        }
        Ok(members)
    }

    fn resolve_call(
        &self,
        expr: &Expr,
        method: &str,
        this: Option<&Expr>,
        args: &[Expr],
        path: &str,
    ) -> KernelResult<(NodeKind, Option<DataType>)> {
        // 1. Operators and built-in functions.
        if this.is_none() {
            if let (Some(op), [left, right]) = (BinaryOp::from_symbol(method), args) {
                let left = self.resolve(left, None, path)?;
                let right = self.resolve(right, None, path)?;
                let data_type = if op.is_arithmetic() {
                    DataType::Number
                } else {
                    DataType::Boolean
                };
                return Ok((
                    NodeKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    Some(data_type),
                ));
            }
            if let ("-", [operand]) = (method, args) {
                let operand = self.resolve(operand, None, path)?;
                return Ok((
                    NodeKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    Some(DataType::Number),
                ));
            }
            if BinaryOp::from_symbol(method).is_some() {
                return Err(KernelError::InvalidCall {
                    path: path.to_string(),
                    reason: format!("`{method}` takes two operands, got {}", args.len()),
                });
            }
        }

        // 2. Column of the table produced by `this`.
        if let Some(this) = this {
            let this_node = self.resolve(this, None, path)?;
            let Some(DataType::Table(table)) = this_node.data_type else {
                return Err(KernelError::TypeMismatch {
                    path: this_node.path.clone(),
                    expected: "a row reference".to_string(),
                    actual: describe(this_node.data_type),
                });
            };
            let column = self
                .scope
                .schema
                .column_by_name(table, method)
                .ok_or_else(|| KernelError::Unresolved {
                    path: path.to_string(),
                    name: method.to_string(),
                })?;
            return self.bind_column(expr, table, column, this_node, args, path);
        }

        // 3. Variables, or a column of the current `this` row when no variable matches.
        let variable = self.scope.variables.lookup(method);
        let implicit = self
            .scope
            .variables
            .lookup("this")
            .filter(|_| self.scope.implicit_this)
            .and_then(|this_var| {
                let table = self.scope.variables.variable(this_var).data_type().table()?;
                let column = self.scope.schema.column_by_name(table, method)?;
                Some((this_var, table, column))
            });

        match (variable, implicit) {
            (Some(_), Some((_, _, column))) => Err(KernelError::Ambiguous {
                path: path.to_string(),
                name: method.to_string(),
                candidates: format!(
                    "variable `{method}` and column {}",
                    self.scope.schema.qualified_name(column)
                ),
            }),
            (Some(var), None) => {
                let data_type = Some(self.scope.variables.variable(var).data_type());
                match (expr.action, args) {
                    (Action::Read, []) => Ok((NodeKind::VariableRead(var), data_type)),
                    (Action::Write | Action::Update, [value]) => {
                        let value = self.resolve(value, data_type, path)?;
                        Ok((
                            NodeKind::VariableWrite {
                                var,
                                value: Box::new(value),
                            },
                            data_type,
                        ))
                    }
                    (Action::Append, _) => Err(KernelError::UnsupportedAction {
                        path: path.to_string(),
                        action: expr.action,
                    }),
                    _ => Err(KernelError::InvalidCall {
                        path: path.to_string(),
                        reason: format!("variable `{method}` called with {} arguments", args.len()),
                    }),
                }
            }
            (None, Some((this_var, table, column))) => {
                let this_node = Node {
                    path: format!("{path}/this"),
                    data_type: Some(DataType::Table(table)),
                    kind: NodeKind::VariableRead(this_var),
                    result: Value::Null,
                };
                self.bind_column(expr, table, column, this_node, args, path)
            }
            (None, None) => Err(KernelError::Unresolved {
                path: path.to_string(),
                name: method.to_string(),
            }),
        }
    }

    fn bind_column(
        &self,
        expr: &Expr,
        table: TableId,
        column: ColumnId,
        this: Node,
        args: &[Expr],
        path: &str,
    ) -> KernelResult<(NodeKind, Option<DataType>)> {
        let column_type = self.scope.schema.column(column).data_type();
        match (expr.action, args) {
            (Action::Read, []) => Ok((
                NodeKind::ColumnRead {
                    column,
                    this: Box::new(this),
                },
                Some(column_type),
            )),
            (Action::Write | Action::Update, [value]) => {
                let value = self.resolve_operand(value, column_type, path)?;
                Ok((
                    NodeKind::ColumnWrite {
                        column,
                        this: Box::new(this),
                        value: Box::new(value),
                    },
                    Some(DataType::Table(table)),
                ))
            }
            (Action::Append, [value]) => {
                let value = self.resolve_operand(value, column_type, path)?;
                Ok((
                    NodeKind::ColumnAppend {
                        table,
                        column,
                        value: Box::new(value),
                    },
                    Some(DataType::Table(table)),
                ))
            }
            _ => Err(KernelError::InvalidCall {
                path: path.to_string(),
                reason: format!(
                    "column {} used as {:?} with {} arguments",
                    self.scope.schema.qualified_name(column),
                    expr.action,
                    args.len()
                ),
            }),
        }
    }

    fn resolve_operand(
        &self,
        value: &Expr,
        column_type: DataType,
        path: &str,
    ) -> KernelResult<Node> {
        let node = self.resolve(value, Some(column_type), path)?;
        match node.data_type {
            Some(actual) if actual != column_type => {
                Err(self.mismatch(&node.path, column_type, Some(actual)))
            }
            _ => Ok(node),
        }
    }

    fn mismatch(&self, path: &str, expected: DataType, actual: Option<DataType>) -> KernelError {
        KernelError::TypeMismatch {
            path: path.to_string(),
            expected: self.type_name(Some(expected)),
            actual: self.type_name(actual),
        }
    }

    fn type_name(&self, data_type: Option<DataType>) -> String {
        match data_type {
            Some(DataType::Table(t)) => self.scope.schema.table(t).name().to_string(),
            other => describe(other),
        }
    }
}

fn describe(data_type: Option<DataType>) -> String {
    data_type.map_or_else(|| "untyped".to_string(), |t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> (Schema, TableId) {
        let mut schema = Schema::new();
        let t = schema.create_table("T").unwrap();
        schema.create_column(t, "a", DataType::Number, false).unwrap();
        (schema, t)
    }

    #[test]
    fn implicit_column_reads_this_row() {
        let (schema, t) = schema();
        let mut vars = Variables::new();
        vars.declare("this", DataType::Table(t));
        let node = resolve(&Expr::var("a"), &Scope::new(&schema, &vars), None).unwrap();
        assert!(matches!(node.kind, NodeKind::ColumnRead { .. }));
        assert_eq!(node.data_type(), Some(DataType::Number));
    }

    #[test]
    fn variable_shadowing_column_is_ambiguous() {
        let (schema, t) = schema();
        let mut vars = Variables::new();
        vars.declare("this", DataType::Table(t));
        vars.declare("a", DataType::Number);
        let err = resolve(&Expr::var("a"), &Scope::new(&schema, &vars), None).unwrap_err();
        assert!(matches!(err, KernelError::Ambiguous { .. }), "{err}");
    }

    #[test]
    fn variables_only_scope_skips_implicit_columns() {
        let (schema, t) = schema();
        let mut vars = Variables::new();
        vars.declare("this", DataType::Table(t));
        let a = vars.declare("a", DataType::Number);
        let scope = Scope::new(&schema, &vars).variables_only();

        let node = resolve(&Expr::var("a"), &scope, None).unwrap();
        assert!(matches!(node.kind, NodeKind::VariableRead(v) if v == a));
        let node = resolve(&Expr::path(&["a"]), &scope, None).unwrap();
        assert!(matches!(node.kind, NodeKind::ColumnRead { .. }));
    }

    #[test]
    fn unknown_name_reports_path() {
        let (schema, t) = schema();
        let mut vars = Variables::new();
        vars.declare("this", DataType::Table(t));
        let expr = Expr::binary(BinaryOp::Add, Expr::number(1.0), Expr::path(&["missing"]));
        let err = resolve(&expr, &Scope::new(&schema, &vars), None).unwrap_err();
        match err {
            KernelError::Unresolved { path, name } => {
                assert_eq!(name, "missing");
                assert_eq!(path, "+/missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
