use crate::error::{KernelError, KernelResult};
use formula_columnar::Value;

/// Cursor over externally supplied records (CSV readers, database result sets, ...).
///
/// Records are positional: value `i` belongs to `columns()[i]`.
pub trait RowSource {
    fn columns(&self) -> &[String];
    fn open(&mut self) -> KernelResult<()>;
    /// Next record, or `None` once the source is exhausted.
    fn next(&mut self) -> KernelResult<Option<Vec<Value>>>;
    fn close(&mut self) -> KernelResult<()>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRowSource {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl MemoryRowSource {
    pub fn new(columns: Vec<impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            position: None,
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }
}

impl RowSource for MemoryRowSource {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn open(&mut self) -> KernelResult<()> {
        self.position = Some(0);
        Ok(())
    }

    fn next(&mut self) -> KernelResult<Option<Vec<Value>>> {
        let Some(position) = self.position.as_mut() else {
            return Err(KernelError::Source("source is not open".to_string()));
        };
        let row = self.rows.get(*position).cloned();
        if row.is_some() {
            *position += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> KernelResult<()> {
        self.position = None;
        Ok(())
    }
}
