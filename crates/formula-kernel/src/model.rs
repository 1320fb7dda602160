use crate::aggregation::AggregateDefinition;
use crate::error::{KernelError, KernelResult};
use crate::expr::Expr;
use formula_columnar::{ColumnOptions, ColumnType, IndexedColumn, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable handle of a table inside the [`Schema`] that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

/// Stable handle of a column inside the [`Schema`] that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl ColumnId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Output type of a column: a primitive, or rows of another table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Number,
    String,
    Boolean,
    Table(TableId),
}

impl DataType {
    pub fn storage_type(self) -> ColumnType {
        match self {
            DataType::Number => ColumnType::Number,
            DataType::String => ColumnType::String,
            DataType::Boolean => ColumnType::Boolean,
            DataType::Table(_) => ColumnType::Row,
        }
    }

    pub fn table(self) -> Option<TableId> {
        match self {
            DataType::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        self.storage_type().accepts(value)
    }

    /// Type of a literal, if it has one on its own.
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(_) => Some(DataType::Number),
            Value::String(_) => Some(DataType::String),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Null | Value::Row(_) => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Number => f.write_str("Number"),
            DataType::String => f.write_str("String"),
            DataType::Boolean => f.write_str("Boolean"),
            DataType::Table(t) => write!(f, "table #{}", t.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    pub column: ColumnOptions,
    /// Minimum input rows before a read-only formula pass is split across the rayon pool.
    pub parallel_min_rows: usize,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            column: ColumnOptions::default(),
            parallel_min_rows: 4096,
        }
    }
}

/// How a table's rows come into existence.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TableDefinition {
    /// Rows are appended by callers or row sources.
    #[default]
    Stored,
    /// Cartesian product of the tables referenced by the key columns, optionally filtered.
    Product { filter: Option<Expr> },
    /// Rows of `base` for which `predicate` holds, linked through the super key column.
    Subset { base: TableId, predicate: Expr },
    /// Distinct key combinations discovered by the generating column of a fact table.
    Projection { generating: ColumnId },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum ColumnDefinition {
    #[default]
    Stored,
    Formula(Expr),
    Aggregate(AggregateDefinition),
}

#[derive(Clone, Debug)]
pub struct Table {
    id: TableId,
    name: String,
    len: usize,
    columns: Vec<ColumnId>,
    definition: TableDefinition,
}

impl Table {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }
}

#[derive(Clone, Debug)]
pub struct Column {
    id: ColumnId,
    name: String,
    table: TableId,
    data_type: DataType,
    key: bool,
    data: IndexedColumn,
    definition: ColumnDefinition,
}

impl Column {
    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table whose rows this column is defined on.
    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether the column is part of the table's identity.
    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn data(&self) -> &IndexedColumn {
        &self.data
    }

    pub fn definition(&self) -> &ColumnDefinition {
        &self.definition
    }

    pub fn is_computed(&self) -> bool {
        !matches!(self.definition, ColumnDefinition::Stored)
    }

    pub fn get_value(&self, offset: usize) -> KernelResult<&Value> {
        Ok(self.data.project(offset)?)
    }
}

/// Arena owning every table and column. Ids are indices minted by this instance only.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    options: SchemaOptions,
    tables: Vec<Table>,
    columns: Vec<Column>,
    table_names: HashMap<String, TableId>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SchemaOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    pub fn create_table(&mut self, name: impl Into<String>) -> KernelResult<TableId> {
        let name = name.into();
        if self.table_names.contains_key(&name) || self.builtin_type(&name).is_some() {
            return Err(KernelError::DuplicateTable { table: name });
        }
        let id = TableId(self.tables.len());
        self.table_names.insert(name.clone(), id);
        self.tables.push(Table {
            id,
            name,
            len: 0,
            columns: Vec::new(),
            definition: TableDefinition::Stored,
        });
        Ok(id)
    }

    /// Add a stored column. Rows that already exist get `Null`.
    pub fn create_column(
        &mut self,
        table: TableId,
        name: impl Into<String>,
        data_type: DataType,
        key: bool,
    ) -> KernelResult<ColumnId> {
        let name = name.into();
        if self.column_by_name(table, &name).is_some() {
            return Err(KernelError::DuplicateColumn {
                table: self.table(table).name.clone(),
                column: name,
            });
        }

        let mut data =
            IndexedColumn::with_options(data_type.storage_type(), self.options.column);
        for _ in 0..self.table(table).len {
            data.append(Value::Null)?;
        }

        let id = ColumnId(self.columns.len());
        self.columns.push(Column {
            id,
            name,
            table,
            data_type,
            key,
            data,
            definition: ColumnDefinition::Stored,
        });
        self.tables[table.0].columns.push(id);
        Ok(id)
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table_by_name(&self, name: &str) -> Option<TableId> {
        self.table_names.get(name).copied()
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[id.0]
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn column_by_name(&self, table: TableId, name: &str) -> Option<ColumnId> {
        self.table(table)
            .columns
            .iter()
            .copied()
            .find(|c| self.columns[c.0].name == name)
    }

    /// Look up a column by table and column name, reporting which part is missing.
    pub fn lookup_column(&self, table: &str, column: &str) -> KernelResult<ColumnId> {
        let table_id = self
            .table_by_name(table)
            .ok_or_else(|| KernelError::UnknownTable(table.to_string()))?;
        self.column_by_name(table_id, column)
            .ok_or_else(|| KernelError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Map a declared type name to a [`DataType`]. Non-primitive names are table names.
    pub fn resolve_type(&self, name: &str) -> Option<DataType> {
        self.builtin_type(name)
            .or_else(|| self.table_by_name(name).map(DataType::Table))
    }

    fn builtin_type(&self, name: &str) -> Option<DataType> {
        match name {
            "Integer" | "Double" | "Decimal" | "Number" => Some(DataType::Number),
            "String" | "Text" => Some(DataType::String),
            "Boolean" | "Bool" => Some(DataType::Boolean),
            _ => None,
        }
    }

    pub fn set_formula(&mut self, column: ColumnId, expr: Expr) {
        self.columns[column.0].definition = ColumnDefinition::Formula(expr);
    }

    pub fn set_aggregate(&mut self, column: ColumnId, definition: AggregateDefinition) {
        self.columns[column.0].definition = ColumnDefinition::Aggregate(definition);
    }

    pub fn set_definition(&mut self, table: TableId, definition: TableDefinition) {
        self.tables[table.0].definition = definition;
    }

    pub fn len(&self, table: TableId) -> usize {
        self.table(table).len
    }

    pub fn get_value(&self, column: ColumnId, offset: usize) -> KernelResult<&Value> {
        let col = self.column(column);
        self.check_offset(col.table, offset)?;
        col.get_value(offset)
    }

    pub fn set_value(&mut self, column: ColumnId, offset: usize, value: Value) -> KernelResult<()> {
        let table = self.column(column).table;
        self.check_offset(table, offset)?;
        self.columns[column.0].data.set_value(offset, value)?;
        Ok(())
    }

    /// Overwrite every cell of a column, e.g. to reset an accumulator.
    pub fn fill(&mut self, column: ColumnId, value: Value) -> KernelResult<()> {
        self.columns[column.0].data.fill(value)?;
        Ok(())
    }

    /// Append one row to `table`. Columns not listed in `values` receive `Null`.
    ///
    /// Either every column grows by one row or, on a type error, none does.
    pub fn append_row(
        &mut self,
        table: TableId,
        values: &[(ColumnId, Value)],
    ) -> KernelResult<usize> {
        for (column, _) in values {
            if self.column(*column).table != table {
                return Err(KernelError::UnknownColumn {
                    table: self.table(table).name.clone(),
                    column: self.column(*column).name.clone(),
                });
            }
        }

        let offset = self.table(table).len;
        let columns = self.table(table).columns.clone();
        for (done, column) in columns.iter().enumerate() {
            let value = values
                .iter()
                .find(|(c, _)| c == column)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            if let Err(err) = self.columns[column.0].data.append(value) {
                for undo in &columns[..done] {
                    self.columns[undo.0].data.pop();
                }
                return Err(err.into());
            }
        }
        self.tables[table.0].len += 1;
        log::trace!("appended row {offset} to {}", self.table(table).name);
        Ok(offset)
    }

    /// Drop the most recently appended row of `table`.
    pub(crate) fn pop_row(&mut self, table: TableId) {
        let Some(len) = self.table(table).len.checked_sub(1) else {
            return;
        };
        for column in self.tables[table.0].columns.clone() {
            self.columns[column.0].data.pop();
        }
        self.tables[table.0].len = len;
    }

    /// Remove every row of `table`, keeping its columns and definition.
    pub fn clear_rows(&mut self, table: TableId) {
        for column in self.tables[table.0].columns.clone() {
            self.columns[column.0].data.clear();
        }
        self.tables[table.0].len = 0;
    }

    /// Offset of the row whose `columns` hold `values`, if any.
    ///
    /// The identity columns are expected to form a functional key; more than one match is an
    /// [`KernelError::Integrity`] error.
    pub fn find(
        &self,
        table: TableId,
        columns: &[ColumnId],
        values: &[Value],
    ) -> KernelResult<Option<usize>> {
        let table_ref = self.table(table);
        if columns.len() != values.len() {
            return Err(KernelError::SchemaMismatch {
                table: table_ref.name.clone(),
                expected: columns.len(),
                actual: values.len(),
            });
        }
        if columns.iter().any(|c| self.column(*c).table != table) {
            return Err(KernelError::InvalidDefinition {
                name: table_ref.name.clone(),
                reason: "lookup uses a column of another table".to_string(),
            });
        }

        // Start from the most selective column and check the rest by projection.
        let Some((pivot, candidates)) = columns
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (c, v))| (i, self.column(*c).data.deproject(v)))
            .min_by_key(|(_, rows)| rows.len())
        else {
            return Ok(None);
        };

        let mut found = None;
        let mut matches = 0usize;
        for &row in candidates {
            let all_equal = columns
                .iter()
                .zip(values)
                .enumerate()
                .filter(|(i, _)| *i != pivot)
                .all(|(_, (c, v))| self.column(*c).data.project(row).is_ok_and(|x| x == v));
            if all_equal {
                matches += 1;
                found.get_or_insert(row);
            }
        }

        if matches > 1 {
            return Err(KernelError::Integrity {
                table: table_ref.name.clone(),
                matches,
            });
        }
        Ok(found)
    }

    /// Human readable `Table[Column]` name.
    pub fn qualified_name(&self, column: ColumnId) -> String {
        let col = self.column(column);
        format!("{}[{}]", self.table(col.table).name, col.name)
    }

    fn check_offset(&self, table: TableId, offset: usize) -> KernelResult<()> {
        let len = self.table(table).len;
        if offset >= len {
            return Err(formula_columnar::ColumnError::OutOfRange { offset, len }.into());
        }
        Ok(())
    }
}
