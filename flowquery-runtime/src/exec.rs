//! Operation executor (C8): a `Vec<Operation>` from the parser is compiled
//! once into a linked chain of [`OpNode`]s and driven pull-through-push.
//! Each node's `run()` produces zero or more conceptual rows for whatever
//! follows it; the true terminal is an implicit [`SinkNode`] so that a
//! trailing `WHERE`/`LIMIT` after `RETURN` (or a yield-less terminal `CALL`)
//! still gates the row before it is published — see DESIGN.md for why this
//! is execution-equivalent to "WHERE stored inside RETURN".
//!
//! `Limit`'s early-termination is realised as a [`Signal`] threaded back up
//! through the recursive `run()` calls rather than an exception, since Rust
//! has no cheap unwinding primitive for this — a conforming reading of
//! §4.8's "equivalently track an early-termination flag" allowance.
//!
//! Recursive `async fn` calls need boxing; `async-trait` (used the same way
//! here as for the async provider/accumulator traits) erases that into a
//! single object-safe `dyn OpNode`.

use std::collections::HashMap;

use async_trait::async_trait;
use flowquery_core::{Span, Value};
use flowquery_parser::{LoadFormat, LoadSource, Operation, Projection};
use indexmap::IndexMap;

use crate::bindings::Bindings;
use crate::eval::{eval, eval_aggregate_argument, EvalContext};
use crate::error::ExecError;
use crate::registry::{Accumulator, Registry};

pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Stop,
}

/// Shared state for one `Runner::run()` call: the output buffer and the HTTP
/// client used by the built-in URL form of `LOAD`.
pub struct ExecCtx {
    pub rows: Vec<Row>,
    pub http: reqwest::Client,
}

impl ExecCtx {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::new()
    }
}

// `?Send`: bindings and rows carry `Value`, which is `Rc`-backed and so
// never `Send` — the whole chain is always driven by a single `.await`,
// never handed to `tokio::spawn`.
#[async_trait(?Send)]
trait OpNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError>;
    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError>;
}

fn eval_now(expr: &flowquery_parser::Expr, bindings: &Bindings) -> Result<Value, ExecError> {
    let guard = Registry::shared().read().expect("registry lock poisoned");
    let empty = HashMap::new();
    eval(
        expr,
        &EvalContext {
            bindings,
            registry: &guard,
            overrides: &empty,
        },
    )
}

fn build_row(projections: &[Projection], bindings: &Bindings) -> Result<Row, ExecError> {
    let mut row = Row::new();
    for p in projections {
        row.insert(p.alias.clone(), eval_now(&p.expr, bindings)?);
    }
    Ok(row)
}

/// One group bucket: the key's own values (for mappable projections) plus
/// one accumulator per aggregate call site appearing in a reducing
/// projection.
struct Bucket {
    key_values: IndexMap<String, Value>,
    accumulators: HashMap<u32, Box<dyn Accumulator>>,
}

struct AggState {
    projections: Vec<Projection>,
    order: Vec<String>,
    buckets: HashMap<String, Bucket>,
}

impl AggState {
    fn new(projections: Vec<Projection>) -> Self {
        Self {
            projections,
            order: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    fn accumulate(&mut self, bindings: &Bindings) -> Result<(), ExecError> {
        let guard = Registry::shared().read().expect("registry lock poisoned");
        let empty = HashMap::new();
        let ctx = EvalContext {
            bindings,
            registry: &guard,
            overrides: &empty,
        };

        let mut key_values = IndexMap::new();
        for p in &self.projections {
            if !p.expr.contains_aggregate() {
                key_values.insert(p.alias.clone(), eval(&p.expr, &ctx)?);
            }
        }
        let key = Value::map(key_values.clone()).to_canonical_json();

        if !self.buckets.contains_key(&key) {
            self.order.push(key.clone());
            self.buckets.insert(
                key.clone(),
                Bucket {
                    key_values,
                    accumulators: HashMap::new(),
                },
            );
        }
        let bucket = self.buckets.get_mut(&key).expect("bucket just inserted");

        for p in &self.projections {
            if !p.expr.contains_aggregate() {
                continue;
            }
            for node in p.expr.aggregates() {
                let flowquery_parser::Expr::Aggregate { id, name, distinct, arg, .. } = node else {
                    unreachable!("aggregates() only yields Aggregate nodes")
                };
                let acc = bucket.accumulators.entry(*id).or_insert_with(|| {
                    guard
                        .new_accumulator(name, *distinct)
                        .expect("aggregate category already validated at parse time")
                });
                for value in eval_aggregate_argument(arg, &ctx)? {
                    acc.accumulate(value)?;
                }
            }
        }
        Ok(())
    }

    /// Builds the finished row for each bucket, in first-seen key order.
    fn finish_rows(&self) -> Result<Vec<Row>, ExecError> {
        let guard = Registry::shared().read().expect("registry lock poisoned");
        let empty_bindings = Bindings::new();
        let mut out = Vec::with_capacity(self.order.len());
        for key in &self.order {
            let bucket = &self.buckets[key];
            let mut overrides = HashMap::new();
            for (id, acc) in &bucket.accumulators {
                overrides.insert(*id, acc.finish());
            }
            let finish_bindings = empty_bindings.with_many(bucket.key_values.clone());
            let ctx = EvalContext {
                bindings: &finish_bindings,
                registry: &guard,
                overrides: &overrides,
            };
            let mut row = Row::new();
            for p in &self.projections {
                let value = if p.expr.contains_aggregate() {
                    eval(&p.expr, &ctx)?
                } else {
                    bucket.key_values.get(&p.alias).cloned().unwrap_or(Value::Null)
                };
                row.insert(p.alias.clone(), value);
            }
            out.push(row);
        }
        Ok(out)
    }
}

struct SinkNode;

#[async_trait(?Send)]
impl OpNode for SinkNode {
    async fn run(&mut self, _bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if let Some(row) = pending {
            ctx.rows.push(row);
        }
        Ok(Signal::Continue)
    }

    async fn finish(&mut self, _ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        Ok(Signal::Continue)
    }
}

struct WithNode {
    projections: Vec<Projection>,
    agg: Option<AggState>,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for WithNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if let Some(agg) = &mut self.agg {
            agg.accumulate(&bindings)?;
            return Ok(Signal::Continue);
        }
        let mut next_bindings = bindings;
        for p in &self.projections {
            let value = eval_now(&p.expr, &next_bindings)?;
            next_bindings = next_bindings.with(p.alias.clone(), value);
        }
        self.next.run(next_bindings, pending, ctx).await
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if let Some(agg) = self.agg.take() {
            for row in agg.finish_rows()? {
                let bindings = Bindings::new().with_many(row);
                if self.next.run(bindings, None, ctx).await? == Signal::Stop {
                    return Ok(Signal::Stop);
                }
            }
        }
        self.next.finish(ctx).await
    }
}

struct UnwindNode {
    expr: flowquery_parser::Expr,
    alias: String,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for UnwindNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        let value = eval_now(&self.expr, &bindings)?;
        let Value::Seq(items) = value else {
            return Err(ExecError::TypeError {
                op: "UNWIND".to_string(),
                detail: format!("expected an array, got {}", value.type_name()),
            });
        };
        for item in items.iter() {
            let next_bindings = bindings.with(self.alias.clone(), item.clone());
            if self.next.run(next_bindings, pending.clone(), ctx).await? == Signal::Stop {
                return Ok(Signal::Stop);
            }
        }
        Ok(Signal::Continue)
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        self.next.finish(ctx).await
    }
}

struct WhereNode {
    expr: flowquery_parser::Expr,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for WhereNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        let value = eval_now(&self.expr, &bindings)?;
        if value.is_truthy() {
            self.next.run(bindings, pending, ctx).await
        } else {
            Ok(Signal::Continue)
        }
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        self.next.finish(ctx).await
    }
}

struct LimitNode {
    remaining: i64,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for LimitNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if self.remaining <= 0 {
            return Ok(Signal::Stop);
        }
        self.remaining -= 1;
        let exhausted = self.remaining == 0;
        let signal = self.next.run(bindings, pending, ctx).await?;
        if exhausted {
            Ok(Signal::Stop)
        } else {
            Ok(signal)
        }
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        self.next.finish(ctx).await
    }
}

struct ReturnNode {
    projections: Vec<Projection>,
    agg: Option<AggState>,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for ReturnNode {
    async fn run(&mut self, bindings: Bindings, _pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if let Some(agg) = &mut self.agg {
            agg.accumulate(&bindings)?;
            return Ok(Signal::Continue);
        }
        let row = build_row(&self.projections, &bindings)?;
        self.next.run(bindings, Some(row), ctx).await
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        if let Some(agg) = self.agg.take() {
            for row in agg.finish_rows()? {
                if self.next.run(Bindings::new(), Some(row), ctx).await? == Signal::Stop {
                    return Ok(Signal::Stop);
                }
            }
        }
        self.next.finish(ctx).await
    }
}

fn call_result_row(element: &Value) -> Row {
    match element {
        Value::Map(map) => (**map).clone(),
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other.clone());
            row
        }
    }
}

fn bind_yield(bindings: &Bindings, projections: &[Projection], element: &Value) -> Result<Bindings, ExecError> {
    let mut scope = bindings.clone();
    match element {
        Value::Map(map) => {
            for (k, v) in map.iter() {
                scope = scope.with(k.clone(), v.clone());
            }
        }
        other => {
            if projections.len() != 1 {
                return Err(ExecError::ScalarYieldMissingAlias);
            }
            scope = scope.with("value", other.clone());
        }
    }
    let mut result = bindings.clone();
    for p in projections {
        let value = eval_now(&p.expr, &scope)?;
        result = result.with(p.alias.clone(), value);
    }
    Ok(result)
}

struct CallNode {
    provider: String,
    args: Vec<flowquery_parser::Expr>,
    yield_exprs: Option<Vec<Projection>>,
    next: Box<dyn OpNode>,
}

#[async_trait(?Send)]
impl OpNode for CallNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        let arg_values = self
            .args
            .iter()
            .map(|a| eval_now(a, &bindings))
            .collect::<Result<Vec<_>, _>>()?;
        let provider = {
            let guard = Registry::shared().read().expect("registry lock poisoned");
            guard.async_provider(&self.provider)
        }
        .ok_or_else(|| ExecError::UnknownFunction {
            name: self.provider.clone(),
            span: Span::dummy(),
        })?;
        let elements = provider
            .generate(&arg_values)
            .await
            .map_err(|e| wrap_provider_error(&self.provider, e))?;

        for element in &elements {
            match &self.yield_exprs {
                Some(projections) => {
                    let scoped = bind_yield(&bindings, projections, element)?;
                    if self.next.run(scoped, pending.clone(), ctx).await? == Signal::Stop {
                        return Ok(Signal::Stop);
                    }
                }
                None => {
                    let row = call_result_row(element);
                    if self.next.run(bindings.clone(), Some(row), ctx).await? == Signal::Stop {
                        return Ok(Signal::Stop);
                    }
                }
            }
        }
        Ok(Signal::Continue)
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        self.next.finish(ctx).await
    }
}

fn wrap_provider_error(name: &str, err: ExecError) -> ExecError {
    match err {
        ExecError::ProviderFailed { .. } => err,
        other => ExecError::ProviderFailed {
            name: name.to_string(),
            detail: other.to_string(),
        },
    }
}

struct LoadNode {
    format: LoadFormat,
    source: LoadSource,
    headers: Option<flowquery_parser::Expr>,
    post: Option<flowquery_parser::Expr>,
    alias: String,
    next: Box<dyn OpNode>,
}

impl LoadNode {
    async fn fetch(&self, bindings: &Bindings, ctx: &mut ExecCtx) -> Result<Vec<Value>, ExecError> {
        match &self.source {
            LoadSource::AsyncCall { provider, args } => {
                let arg_values = args
                    .iter()
                    .map(|a| eval_now(a, bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                let provider_impl = {
                    let guard = Registry::shared().read().expect("registry lock poisoned");
                    guard.async_provider(provider)
                }
                .ok_or_else(|| ExecError::UnknownFunction {
                    name: provider.clone(),
                    span: Span::dummy(),
                })?;
                provider_impl
                    .generate(&arg_values)
                    .await
                    .map_err(|e| wrap_provider_error(provider, e))
            }
            LoadSource::Url(expr) => {
                let url_value = eval_now(expr, bindings)?;
                let url = match url_value {
                    Value::Str(s) => s.to_string(),
                    other => {
                        return Err(ExecError::TypeError {
                            op: "LOAD".to_string(),
                            detail: format!("FROM target must be a string URL, got {}", other.type_name()),
                        })
                    }
                };
                self.fetch_url(bindings, &url, ctx).await
            }
        }
    }

    async fn fetch_url(&self, bindings: &Bindings, url: &str, ctx: &mut ExecCtx) -> Result<Vec<Value>, ExecError> {
        let body_value = self.post.as_ref().map(|e| eval_now(e, bindings)).transpose()?;
        let headers_value = self.headers.as_ref().map(|e| eval_now(e, bindings)).transpose()?;

        let mut request = match &body_value {
            Some(body) => ctx.http.post(url).body(body.to_canonical_json()),
            None => ctx.http.get(url),
        };

        let mut content_type_set = false;
        if let Some(Value::Map(entries)) = &headers_value {
            for (k, v) in entries.iter() {
                if k.eq_ignore_ascii_case("content-type") {
                    content_type_set = true;
                }
                request = request.header(k.as_str(), v.to_display_string());
            }
        }
        if body_value.is_some() && !content_type_set {
            request = request.header("Content-Type", "application/json");
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecError::LoadFailed { url: url.to_string(), detail: e.to_string() })?;
        let body = response
            .text()
            .await
            .map_err(|e| ExecError::LoadFailed { url: url.to_string(), detail: e.to_string() })?;

        match self.format {
            LoadFormat::Json => {
                let parsed = flowquery_core::json::parse_json(&body).map_err(|e| ExecError::InvalidResponseBody {
                    format: "JSON".to_string(),
                    detail: e.to_string(),
                })?;
                match parsed {
                    Value::Seq(items) => Ok((*items).clone()),
                    other => Ok(vec![other]),
                }
            }
            LoadFormat::Text => Ok(vec![Value::str(body)]),
            LoadFormat::Csv => parse_csv(&body),
        }
    }
}

fn parse_csv(body: &str) -> Result<Vec<Value>, ExecError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| ExecError::InvalidResponseBody { format: "CSV".to_string(), detail: e.to_string() })?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExecError::InvalidResponseBody { format: "CSV".to_string(), detail: e.to_string() })?;
        let mut row = IndexMap::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::str(field.to_string()));
        }
        rows.push(Value::map(row));
    }
    Ok(rows)
}

#[async_trait(?Send)]
impl OpNode for LoadNode {
    async fn run(&mut self, bindings: Bindings, pending: Option<Row>, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        let items = self.fetch(&bindings, ctx).await?;
        for item in items {
            let next_bindings = bindings.with(self.alias.clone(), item);
            if self.next.run(next_bindings, pending.clone(), ctx).await? == Signal::Stop {
                return Ok(Signal::Stop);
            }
        }
        Ok(Signal::Continue)
    }

    async fn finish(&mut self, ctx: &mut ExecCtx) -> Result<Signal, ExecError> {
        self.next.finish(ctx).await
    }
}

/// Compiles the parser's flat `Vec<Operation>` into a linked [`OpNode`]
/// chain, back to front, terminating every path in an implicit
/// [`SinkNode`].
fn compile(ops: Vec<Operation>) -> Box<dyn OpNode> {
    let mut next: Box<dyn OpNode> = Box::new(SinkNode);
    for op in ops.into_iter().rev() {
        next = match op {
            Operation::With { projections, aggregated } => Box::new(WithNode {
                agg: aggregated.then(|| AggState::new(projections.clone())),
                projections,
                next,
            }),
            Operation::Unwind { expr, alias } => Box::new(UnwindNode { expr, alias, next }),
            Operation::Load { format, source, headers, post, alias } => {
                Box::new(LoadNode { format, source, headers, post, alias, next })
            }
            Operation::Call { provider, args, yield_exprs } => {
                Box::new(CallNode { provider, args, yield_exprs, next })
            }
            Operation::Where { expr } => Box::new(WhereNode { expr, next }),
            Operation::Limit { count } => Box::new(LimitNode { remaining: count.max(0), next }),
            Operation::Return { projections, aggregated } => Box::new(ReturnNode {
                agg: aggregated.then(|| AggState::new(projections.clone())),
                projections,
                next,
            }),
        };
    }
    next
}

/// Runs a fully-parsed operation chain to completion, returning the rows
/// its terminal operation published.
pub async fn execute(ops: Vec<Operation>) -> Result<Vec<Row>, ExecError> {
    let mut head = compile(ops);
    let mut ctx = ExecCtx::new();
    head.run(Bindings::new(), None, &mut ctx).await?;
    head.finish(&mut ctx).await?;
    Ok(ctx.rows)
}
