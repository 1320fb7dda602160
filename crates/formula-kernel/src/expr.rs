//! Unresolved expression trees.
//!
//! An [`Expr`] is plain data as produced by a formula front-end: literals, tuples of named
//! members, and calls. Calls cover operators (`+`, `<=`, `&&`, ...), functions (`MIN`, `MAX`),
//! column access through a `this` child and variable access; which one a call is gets decided
//! once by [`resolve`](crate::resolve()).
use formula_columnar::Value;
use std::fmt;

/// How a node interacts with the storage it binds to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Action {
    #[default]
    Read,
    /// Find-or-append for tuples, append for column calls.
    Append,
    Write,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
    Min,
    Max,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Subtract,
            "*" => BinaryOp::Multiply,
            "/" => BinaryOp::Divide,
            "==" => BinaryOp::Equals,
            "!=" => BinaryOp::NotEquals,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessEquals,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterEquals,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ if symbol.eq_ignore_ascii_case("min") => BinaryOp::Min,
            _ if symbol.eq_ignore_ascii_case("max") => BinaryOp::Max,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Min => "MIN",
            BinaryOp::Max => "MAX",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Min
                | BinaryOp::Max
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    /// Member name when the expression is a child of a tuple.
    pub name: Option<String>,
    /// Declared type name (`Integer`, `String`, a table name, ...).
    pub declared_type: Option<String>,
    pub action: Action,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Value(Value),
    Tuple(Vec<Expr>),
    Call {
        method: String,
        this: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Self {
            name: None,
            declared_type: None,
            action: Action::Read,
            kind,
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::new(ExprKind::Value(value.into()))
    }

    pub fn number(n: f64) -> Self {
        Self::value(n)
    }

    pub fn text(s: &str) -> Self {
        Self::value(s)
    }

    pub fn boolean(b: bool) -> Self {
        Self::value(b)
    }

    pub fn null() -> Self {
        Self::value(Value::Null)
    }

    /// A bare name: a variable, or a column of the current `this` row.
    pub fn var(name: impl Into<String>) -> Self {
        Self::call(name, Vec::new())
    }

    pub fn this() -> Self {
        Self::var("this")
    }

    /// `this.[name]`: member access on the row produced by `this`.
    pub fn column(this: Expr, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Call {
            method: name.into(),
            this: Some(Box::new(this)),
            args: Vec::new(),
        })
    }

    /// Dotted path starting at `this`, e.g. `path(&["Group", "Name"])` is `this.[Group].[Name]`.
    pub fn path(names: &[&str]) -> Self {
        names
            .iter()
            .fold(Self::this(), |acc, name| Self::column(acc, *name))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            method: name.into(),
            this: None,
            args,
        })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::call(op.symbol(), vec![left, right])
    }

    pub fn negate(expr: Expr) -> Self {
        Self::call("-", vec![expr])
    }

    pub fn tuple(members: Vec<Expr>) -> Self {
        Self::new(ExprKind::Tuple(members))
    }

    /// Tuple member `[name] = expr`.
    pub fn member(name: impl Into<String>, expr: Expr) -> Self {
        expr.named(name)
    }

    /// Assignment to a variable: `name = value`.
    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Self::call(name, vec![value]).with_action(Action::Write)
    }

    /// Write `value` into column `name` of the row produced by `this`.
    pub fn store(this: Expr, name: impl Into<String>, value: Expr) -> Self {
        Self::new(ExprKind::Call {
            method: name.into(),
            this: Some(Box::new(this)),
            args: vec![value],
        })
        .with_action(Action::Write)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.declared_type = Some(type_name.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Short label used to build node paths in error messages.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return bracketed(name);
        }
        match &self.kind {
            ExprKind::Value(v) => v.to_string(),
            ExprKind::Tuple(_) => "(())".to_string(),
            ExprKind::Call { method, .. } if BinaryOp::from_symbol(method).is_some() => {
                method.clone()
            }
            ExprKind::Call { method, .. } => bracketed(method),
        }
    }
}

fn bracketed(name: &str) -> String {
    if name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("[{name}]")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = &self.declared_type {
            write!(f, "{} ", bracketed(t))?;
        }
        match &self.kind {
            ExprKind::Value(v) => write!(f, "{v}"),
            ExprKind::Tuple(members) => {
                f.write_str("((")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(name) = &m.name {
                        write!(f, "{} = ", bracketed(name))?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str("))")
            }
            ExprKind::Call { method, this, args } => {
                if let (None, Some(op), [l, r]) =
                    (this, BinaryOp::from_symbol(method), args.as_slice())
                {
                    if !matches!(op, BinaryOp::Min | BinaryOp::Max) {
                        return write!(f, "({l} {method} {r})");
                    }
                }
                if let (None, "-", [operand]) = (this, method.as_str(), args.as_slice()) {
                    return write!(f, "-{operand}");
                }
                if let Some(this) = this {
                    write!(f, "{this}.")?;
                }
                f.write_str(&bracketed(method))?;
                if !args.is_empty() {
                    f.write_str("(")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}
