use serde_json::{Map, Value};

/// Root value plus variable bindings for one evaluation. Auto-grow writes
/// into both, so evaluation borrows the context mutably.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    pub root: Value,
    pub variables: Map<String, Value>,
}

impl EvaluationContext {
    pub fn new(root: Value) -> Self {
        Self {
            root,
            variables: Map::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}
