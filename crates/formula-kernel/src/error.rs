use crate::expr::Action;
use formula_columnar::ColumnError;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}[{column}]")]
    UnknownColumn { table: String, column: String },

    #[error("duplicate table: {table}")]
    DuplicateTable { table: String },

    #[error("duplicate column {table}[{column}]")]
    DuplicateColumn { table: String, column: String },

    #[error("cannot resolve `{name}` at {path}")]
    Unresolved { path: String, name: String },

    #[error("ambiguous binding for `{name}` at {path}: {candidates}")]
    Ambiguous {
        path: String,
        name: String,
        candidates: String,
    },

    #[error("type mismatch at {path}: expected {expected}, found {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("invalid call at {path}: {reason}")]
    InvalidCall { path: String, reason: String },

    #[error("action {action:?} is not supported at {path}")]
    UnsupportedAction { path: String, action: Action },

    #[error("invalid definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("schema mismatch for {table}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("integrity violation in {table}: {matches} rows share the same identity")]
    Integrity { table: String, matches: usize },

    #[error("evaluation of {table} failed at row {row}: {source}")]
    Row {
        table: String,
        row: usize,
        #[source]
        source: EvalError,
    },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("row source error: {0}")]
    Source(String),

    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Failure raised while evaluating a resolved tree, tagged with the path of the failing node.
#[derive(Debug, thiserror::Error)]
#[error("{path}: {kind}")]
pub struct EvalError {
    pub path: String,
    pub kind: EvalErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalErrorKind {
    #[error("type error: {0}")]
    Type(String),

    #[error("dereferenced a null row")]
    NullReference,

    #[error("division by zero")]
    DivisionByZero,

    #[error("read-only evaluation cannot modify {0}")]
    ReadOnly(String),

    #[error(transparent)]
    Column(#[from] ColumnError),

    #[error(transparent)]
    Schema(Box<KernelError>),
}

impl From<KernelError> for EvalErrorKind {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Column(err) => EvalErrorKind::Column(err),
            other => EvalErrorKind::Schema(Box::new(other)),
        }
    }
}
