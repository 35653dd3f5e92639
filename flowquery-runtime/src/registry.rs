//! Function registry (C6), dispatch half: holds the actual callable
//! implementations — scalar functions, accumulator constructors, and async
//! providers — behind the name/category/arity catalog that
//! `flowquery_core::registry` already exposes to the parser. Modelled as a
//! `Send + Sync` trait-object registry the way the teacher's `ToolDispatcher`
//! exposes tool implementations, made async via `async-trait` since a
//! provider may need to await an external response.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use flowquery_core::{FunctionCategory, Value};
use once_cell::sync::Lazy;

use crate::error::ExecError;

pub type ScalarFn = fn(&[Value]) -> Result<Value, ExecError>;

/// A source of rows for `LOAD`/`CALL`'s async-function form. `generate`
/// returns the whole element sequence; true streaming is left to a future
/// revision (see DESIGN.md). `Value` is `Rc`-backed (cheap clones, no
/// cross-thread sharing), so `generate`'s own future is intentionally not
/// `Send` (`?Send`) even though a provider instance itself is — the
/// executor only ever drives it with a plain `.await` on a single task,
/// never `tokio::spawn`.
#[async_trait(?Send)]
pub trait AsyncProvider: Send + Sync {
    async fn generate(&self, args: &[Value]) -> Result<Vec<Value>, ExecError>;
}

pub trait Accumulator {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError>;
    fn finish(&self) -> Value;
}

/// Constructs a fresh accumulator instance; the `bool` is the `DISTINCT`
/// modifier.
pub type AccumulatorCtor = fn(bool) -> Box<dyn Accumulator>;

#[derive(Default)]
pub struct Registry {
    scalars: HashMap<String, ScalarFn>,
    asyncs: HashMap<String, Arc<dyn AsyncProvider>>,
    aggregates: HashMap<String, AccumulatorCtor>,
}

impl Registry {
    fn empty() -> Self {
        Self::default()
    }

    /// Process-wide registry, built once from the built-in catalog. Mutated
    /// only before execution begins (see §5); reads thereafter never block
    /// on a writer in practice.
    pub fn shared() -> &'static RwLock<Registry> {
        static REGISTRY: Lazy<RwLock<Registry>> =
            Lazy::new(|| RwLock::new(crate::builtins::install(Registry::empty())));
        &REGISTRY
    }

    pub fn register_scalar(&mut self, name: &str, f: ScalarFn) {
        self.scalars.insert(name.to_ascii_lowercase(), f);
    }

    pub fn register_async(&mut self, name: &str, provider: Arc<dyn AsyncProvider>) {
        self.asyncs.insert(name.to_ascii_lowercase(), provider);
    }

    pub fn register_aggregate(&mut self, name: &str, ctor: AccumulatorCtor) {
        self.aggregates.insert(name.to_ascii_lowercase(), ctor);
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarFn> {
        self.scalars.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn async_provider(&self, name: &str) -> Option<Arc<dyn AsyncProvider>> {
        self.asyncs.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn new_accumulator(&self, name: &str, distinct: bool) -> Option<Box<dyn Accumulator>> {
        self.aggregates
            .get(&name.to_ascii_lowercase())
            .map(|ctor| ctor(distinct))
    }

    pub fn is_async_provider(&self, name: &str) -> bool {
        self.asyncs.contains_key(&name.to_ascii_lowercase())
    }

    /// Drops a name from whichever category it was registered under. A
    /// no-op if the name isn't registered.
    pub fn unregister(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();
        self.scalars.remove(&key);
        self.asyncs.remove(&key);
        self.aggregates.remove(&key);
    }

    /// Names of every currently registered function, optionally narrowed to
    /// one category. Sorted for a stable listing, since the three
    /// underlying maps don't preserve registration order.
    pub fn list(&self, category: Option<FunctionCategory>) -> Vec<String> {
        let mut names: Vec<String> = match category {
            Some(FunctionCategory::Scalar) => self.scalars.keys().cloned().collect(),
            Some(FunctionCategory::Async) => self.asyncs.keys().cloned().collect(),
            Some(FunctionCategory::Aggregate) => self.aggregates.keys().cloned().collect(),
            Some(FunctionCategory::Predicate) => Vec::new(),
            None => self
                .scalars
                .keys()
                .chain(self.asyncs.keys())
                .chain(self.aggregates.keys())
                .cloned()
                .collect(),
        };
        names.sort();
        names
    }
}
