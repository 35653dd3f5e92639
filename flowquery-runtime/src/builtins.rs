//! The built-in function catalog (C9): scalar implementations, aggregate
//! accumulators, and the `fetchJson` async provider, installed into a fresh
//! [`Registry`] by [`install`]. Every entry here has a matching metadata row
//! in `flowquery_core::registry::BUILTIN_FUNCTIONS` — the parser checks
//! arity/category against that table before a call ever reaches these
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;
use flowquery_core::value::deep_eq;
use flowquery_core::{Number, Value};
use indexmap::IndexMap;
use rand::Rng;

use crate::error::ExecError;
use crate::registry::{AsyncProvider, Registry};

pub fn install(mut registry: Registry) -> Registry {
    registry.register_scalar("range", range);
    registry.register_scalar("rand", rand_fn);
    registry.register_scalar("round", round);
    registry.register_scalar("split", split);
    registry.register_scalar("join", join);
    registry.register_scalar("tojson", tojson);
    registry.register_scalar("stringify", stringify);
    registry.register_scalar("replace", replace);
    registry.register_scalar("size", size);
    registry.register_scalar("keys", keys);
    registry.register_scalar("type", type_of);
    registry.register_scalar("functions", functions);
    registry.register_scalar("coalesce", coalesce);
    registry.register_scalar("tointeger", to_integer);
    registry.register_scalar("tofloat", to_float);
    registry.register_scalar("tostring", to_string_fn);
    registry.register_scalar("toboolean", to_boolean);

    registry.register_aggregate("sum", |distinct| Box::new(Sum::new(distinct)));
    registry.register_aggregate("avg", |_| Box::new(Avg::default()));
    registry.register_aggregate("collect", |distinct| Box::new(Collect::new(distinct)));
    registry.register_aggregate("min", |_| Box::new(MinMax::new(true)));
    registry.register_aggregate("max", |_| Box::new(MinMax::new(false)));
    registry.register_aggregate("count", |distinct| Box::new(Count::new(distinct)));

    registry.register_async("fetchjson", Arc::new(FetchJson));

    registry
}

fn arity_error(name: &str, expected: &str, got: usize) -> ExecError {
    ExecError::TypeError {
        op: name.to_string(),
        detail: format!("expects {expected} argument(s), got {got}"),
    }
}

fn type_error(op: &str, detail: impl Into<String>) -> ExecError {
    ExecError::TypeError {
        op: op.to_string(),
        detail: detail.into(),
    }
}

fn as_int(op: &str, v: &Value) -> Result<i64, ExecError> {
    match v {
        Value::Number(n) => Ok(n.as_f64() as i64),
        other => Err(type_error(op, format!("expected a number, got {}", other.type_name()))),
    }
}

fn as_str(op: &str, v: &Value) -> Result<String, ExecError> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(type_error(op, format!("expected a string, got {}", other.type_name()))),
    }
}

fn range(args: &[Value]) -> Result<Value, ExecError> {
    let a = as_int("range", &args[0])?;
    let b = as_int("range", &args[1])?;
    let items = if a <= b {
        (a..=b).map(Value::int).collect()
    } else {
        Vec::new()
    };
    Ok(Value::seq(items))
}

fn rand_fn(_args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::float(rand::thread_rng().gen::<f64>()))
}

fn round(args: &[Value]) -> Result<Value, ExecError> {
    let x = match &args[0] {
        Value::Number(n) => n.as_f64(),
        other => return Err(type_error("round", format!("expected a number, got {}", other.type_name()))),
    };
    let digits = if args.len() > 1 { as_int("round", &args[1])? } else { 0 };
    let factor = 10f64.powi(digits as i32);
    let rounded = (x * factor).round() / factor;
    if digits <= 0 && rounded.fract() == 0.0 {
        Ok(Value::int(rounded as i64))
    } else {
        Ok(Value::float(rounded))
    }
}

fn split(args: &[Value]) -> Result<Value, ExecError> {
    let s = as_str("split", &args[0])?;
    let sep = as_str("split", &args[1])?;
    let parts = if sep.is_empty() {
        s.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        s.split(sep.as_str()).map(Value::str).collect()
    };
    Ok(Value::seq(parts))
}

fn join(args: &[Value]) -> Result<Value, ExecError> {
    let Value::Seq(items) = &args[0] else {
        return Err(type_error("join", format!("expected an array, got {}", args[0].type_name())));
    };
    let sep = as_str("join", &args[1])?;
    let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
    Ok(Value::str(parts.join(&sep)))
}

fn tojson(args: &[Value]) -> Result<Value, ExecError> {
    let s = as_str("tojson", &args[0])?;
    flowquery_core::json::parse_json(&s).map_err(ExecError::from)
}

fn stringify(args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::str(pretty_print(&args[0], 0)))
}

fn pretty_print(value: &Value, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let child_pad = " ".repeat(indent + 3);
    match value {
        Value::Seq(items) if !items.is_empty() => {
            let body: Vec<String> = items
                .iter()
                .map(|v| format!("{child_pad}{}", pretty_print(v, indent + 3)))
                .collect();
            format!("[\n{}\n{pad}]", body.join(",\n"))
        }
        Value::Map(entries) if !entries.is_empty() => {
            let body: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{child_pad}\"{k}\": {}", pretty_print(v, indent + 3)))
                .collect();
            format!("{{\n{}\n{pad}}}", body.join(",\n"))
        }
        other => other.to_canonical_json(),
    }
}

fn replace(args: &[Value]) -> Result<Value, ExecError> {
    let s = as_str("replace", &args[0])?;
    let from = as_str("replace", &args[1])?;
    let to = as_str("replace", &args[2])?;
    Ok(Value::str(s.replace(from.as_str(), &to)))
}

fn size(args: &[Value]) -> Result<Value, ExecError> {
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Seq(items) => items.len(),
        Value::Map(entries) => entries.len(),
        other => return Err(type_error("size", format!("no length for {}", other.type_name()))),
    };
    Ok(Value::int(n as i64))
}

fn keys(args: &[Value]) -> Result<Value, ExecError> {
    let Value::Map(entries) = &args[0] else {
        return Err(type_error("keys", format!("expected a mapping, got {}", args[0].type_name())));
    };
    Ok(Value::seq(entries.keys().map(|k| Value::str(k.as_str())).collect()))
}

fn type_of(args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::str(args[0].type_name()))
}

fn functions(_args: &[Value]) -> Result<Value, ExecError> {
    let items = flowquery_core::registry::BUILTIN_FUNCTIONS
        .iter()
        .map(|meta| {
            let mut m = IndexMap::new();
            m.insert("name".to_string(), Value::str(meta.name));
            m.insert("category".to_string(), Value::str(format!("{:?}", meta.category).to_lowercase()));
            m.insert(
                "arity".to_string(),
                meta.arity.map(|a| Value::int(a as i64)).unwrap_or(Value::Null),
            );
            m.insert("output".to_string(), Value::str(meta.output_schema));
            m.insert("notes".to_string(), Value::str(meta.notes));
            Value::map(m)
        })
        .collect();
    Ok(Value::seq(items))
}

fn coalesce(args: &[Value]) -> Result<Value, ExecError> {
    Ok(args
        .iter()
        .find(|v| !matches!(v, Value::Null))
        .cloned()
        .unwrap_or(Value::Null))
}

fn to_integer(args: &[Value]) -> Result<Value, ExecError> {
    match &args[0] {
        Value::Number(n) => Ok(Value::int(n.as_f64() as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| Value::int(f as i64))
            .map_err(|_| type_error("toInteger", format!("cannot parse '{s}' as a number"))),
        Value::Bool(b) => Ok(Value::int(*b as i64)),
        other => Err(type_error("toInteger", format!("cannot coerce {}", other.type_name()))),
    }
}

fn to_float(args: &[Value]) -> Result<Value, ExecError> {
    match &args[0] {
        Value::Number(n) => Ok(Value::float(n.as_f64())),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| type_error("toFloat", format!("cannot parse '{s}' as a number"))),
        Value::Bool(b) => Ok(Value::float(if *b { 1.0 } else { 0.0 })),
        other => Err(type_error("toFloat", format!("cannot coerce {}", other.type_name()))),
    }
}

fn to_string_fn(args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::str(args[0].to_display_string()))
}

fn to_boolean(args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::Bool(args[0].is_truthy()))
}

struct Sum {
    distinct: bool,
    seen: Vec<Value>,
    int_total: i64,
    float_total: f64,
    is_float: bool,
    text: Option<String>,
    saw_number: bool,
    any: bool,
}

impl Sum {
    fn new(distinct: bool) -> Self {
        Self {
            distinct,
            seen: Vec::new(),
            int_total: 0,
            float_total: 0.0,
            is_float: false,
            text: None,
            saw_number: false,
            any: false,
        }
    }
}

impl crate::registry::Accumulator for Sum {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError> {
        if self.distinct {
            if self.seen.iter().any(|v| deep_eq(v, &value)) {
                return Ok(());
            }
            self.seen.push(value.clone());
        }
        self.any = true;
        match &value {
            Value::Number(Number::Int(i)) => {
                if self.text.is_some() {
                    return Err(ExecError::MixedSumTypes);
                }
                self.saw_number = true;
                self.int_total += i;
            }
            Value::Number(Number::Float(f)) => {
                if self.text.is_some() {
                    return Err(ExecError::MixedSumTypes);
                }
                self.saw_number = true;
                self.is_float = true;
                self.float_total += f;
            }
            Value::Str(s) => {
                if self.saw_number {
                    return Err(ExecError::MixedSumTypes);
                }
                let entry = self.text.get_or_insert_with(String::new);
                entry.push_str(s);
            }
            other => {
                return Err(type_error("sum", format!("cannot sum a value of type {}", other.type_name())));
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        if !self.any {
            return Value::int(0);
        }
        if let Some(text) = &self.text {
            Value::str(text.clone())
        } else if self.is_float {
            Value::float(self.float_total + self.int_total as f64)
        } else {
            Value::int(self.int_total)
        }
    }
}

#[derive(Default)]
struct Avg {
    total: f64,
    count: i64,
}

impl crate::registry::Accumulator for Avg {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError> {
        let Value::Number(n) = value else {
            return Err(type_error("avg", format!("expected a number, got {}", value.type_name())));
        };
        self.total += n.as_f64();
        self.count += 1;
        Ok(())
    }

    fn finish(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::float(self.total / self.count as f64)
        }
    }
}

struct Collect {
    distinct: bool,
    items: Vec<Value>,
}

impl Collect {
    fn new(distinct: bool) -> Self {
        Self { distinct, items: Vec::new() }
    }
}

impl crate::registry::Accumulator for Collect {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError> {
        if self.distinct && self.items.iter().any(|v| deep_eq(v, &value)) {
            return Ok(());
        }
        self.items.push(value);
        Ok(())
    }

    fn finish(&self) -> Value {
        Value::seq(self.items.clone())
    }
}

struct MinMax {
    want_min: bool,
    current: Option<Value>,
}

impl MinMax {
    fn new(want_min: bool) -> Self {
        Self { want_min, current: None }
    }
}

impl crate::registry::Accumulator for MinMax {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError> {
        let Value::Number(candidate) = &value else {
            return Err(type_error("min/max", format!("expected a number, got {}", value.type_name())));
        };
        let replace = match &self.current {
            None => true,
            Some(Value::Number(current)) => {
                if self.want_min {
                    candidate.as_f64() < current.as_f64()
                } else {
                    candidate.as_f64() > current.as_f64()
                }
            }
            Some(_) => false,
        };
        if replace {
            self.current = Some(value);
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

struct Count {
    distinct: bool,
    seen: Vec<Value>,
    total: i64,
}

impl Count {
    fn new(distinct: bool) -> Self {
        Self { distinct, seen: Vec::new(), total: 0 }
    }
}

impl crate::registry::Accumulator for Count {
    fn accumulate(&mut self, value: Value) -> Result<(), ExecError> {
        if self.distinct {
            if self.seen.iter().any(|v| deep_eq(v, &value)) {
                return Ok(());
            }
            self.seen.push(value);
        }
        self.total += 1;
        Ok(())
    }

    fn finish(&self) -> Value {
        Value::int(self.total)
    }
}

struct FetchJson;

#[async_trait(?Send)]
impl AsyncProvider for FetchJson {
    async fn generate(&self, args: &[Value]) -> Result<Vec<Value>, ExecError> {
        let url = as_str("fetchJson", args.first().ok_or_else(|| arity_error("fetchJson", "at least 1", 0))?)?;
        let response = reqwest::get(&url)
            .await
            .map_err(|e| ExecError::LoadFailed { url: url.clone(), detail: e.to_string() })?;
        let body = response
            .text()
            .await
            .map_err(|e| ExecError::LoadFailed { url: url.clone(), detail: e.to_string() })?;
        let value = flowquery_core::json::parse_json(&body).map_err(ExecError::from)?;
        match value {
            Value::Seq(items) => Ok((*items).clone()),
            other => Ok(vec![other]),
        }
    }
}
