//! Insertion-ordered name bindings for one lexical scope.

use indexmap::IndexMap;

use crate::symbol::Symbol;
use crate::value::Value;

/// A single scope: names mapped to values, iterated in the order the
/// names were first introduced.
#[derive(Default, Debug, Clone)]
pub struct Environment {
    bindings: IndexMap<Symbol, Value>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has(&self, name: &Symbol) -> bool {
        self.bindings.contains_key(name)
    }

    /// Returns the bound value, or [`Value::Undefined`] when the name
    /// is absent.
    #[must_use]
    pub fn get(&self, name: &Symbol) -> Value {
        self.bindings.get(name).cloned().unwrap_or_default()
    }

    /// Inserts or overwrites a binding. An overwritten name keeps its
    /// original position.
    pub fn set(&mut self, name: impl Into<Symbol>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Inserts a binding only if the name is not already bound.
    /// Returns whether the binding was inserted.
    pub fn define(&mut self, name: impl Into<Symbol>, value: Value) -> bool {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            false
        } else {
            self.bindings.insert(name, value);
            true
        }
    }

    /// Copies every binding from `other` into this environment, in
    /// `other`'s order.
    pub fn merge_from(&mut self, other: &Environment) {
        for (name, value) in &other.bindings {
            self.set(name.clone(), value.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Value)> {
        self.bindings.iter()
    }
}
