//! The binding environment: a row's current name→value state as the
//! operation chain pushes it downstream. Cloned (not shared/mutable) across
//! recursive `run()` calls, since each operation only ever adds or shadows
//! bindings for the rows it forwards — see `exec::Operation::run`.

use flowquery_core::Value;
use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Re-binding the same name shadows the previous value from this point
    /// onward, per the binding-environment invariant in §3.
    pub fn with(&self, name: impl Into<String>, value: Value) -> Bindings {
        let mut next = self.clone();
        next.values.insert(name.into(), value);
        next
    }

    pub fn with_many(&self, entries: impl IntoIterator<Item = (String, Value)>) -> Bindings {
        let mut next = self.clone();
        next.values.extend(entries);
        next
    }
}
