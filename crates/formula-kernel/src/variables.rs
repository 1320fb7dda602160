use crate::model::DataType;
use formula_columnar::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    data_type: DataType,
    value: Value,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Named single-value slots (`this`, `group`, `measure`, ...) owned by whoever drives a tree.
///
/// Resolved trees refer to slots by [`VarId`], so the same tree can be re-run after the driver
/// updates the values.
#[derive(Clone, Debug, Default)]
pub struct Variables {
    slots: Vec<Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name`, or retype it if it already exists.
    pub fn declare(&mut self, name: impl Into<String>, data_type: DataType) -> VarId {
        let name = name.into();
        if let Some(id) = self.lookup(&name) {
            self.slots[id.0].data_type = data_type;
            return id;
        }
        self.slots.push(Variable {
            name,
            data_type,
            value: Value::Null,
        });
        VarId(self.slots.len() - 1)
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.slots.iter().position(|v| v.name == name).map(VarId)
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.slots[id.0]
    }

    pub fn get(&self, id: VarId) -> &Value {
        &self.slots[id.0].value
    }

    pub fn set(&mut self, id: VarId, value: Value) {
        self.slots[id.0].value = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.slots.iter()
    }
}
