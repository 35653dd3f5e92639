//! Expression engine, evaluation half (C5): a post-order walk over the
//! parser's `Expr` tree against a row's bindings and the function registry.

use std::collections::HashMap;

use flowquery_core::{value::deep_eq, Number, Value};
use flowquery_parser::{AggregateArg, BinaryOp, Expr, FStringPart, UnaryOp};

use crate::bindings::Bindings;
use crate::error::ExecError;
use crate::registry::Registry;

/// Per-row evaluation context. `overrides` supplies the finalised value for
/// each aggregate call site during `Return`/`With`'s `finish()` pass (see
/// `exec::Aggregated`); it is empty while evaluating a plain, non-aggregated
/// projection.
pub struct EvalContext<'a> {
    pub bindings: &'a Bindings,
    pub registry: &'a Registry,
    pub overrides: &'a HashMap<u32, Value>,
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, ExecError> {
    match expr {
        Expr::Number(n, _) => Ok(numeric_literal(*n)),
        Expr::String(s, _) => Ok(Value::str(s.clone())),
        Expr::Null(_) => Ok(Value::Null),
        Expr::Reference(name, span) => ctx
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::UndeclaredReference {
                name: name.clone(),
                span: *span,
            }),
        Expr::Array(items, _) => {
            let values = items
                .iter()
                .map(|e| eval(e, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::seq(values))
        }
        Expr::Map(entries, _) => {
            let mut map = indexmap::IndexMap::new();
            for (key, value_expr) in entries {
                map.insert(key.clone(), eval(value_expr, ctx)?);
            }
            Ok(Value::map(map))
        }
        Expr::FString(parts, _) => eval_fstring(parts, ctx),
        Expr::Lookup { target, index, span } => {
            let target = eval(target, ctx)?;
            let index = eval(index, ctx)?;
            eval_lookup(&target, &index, *span)
        }
        Expr::RangeLookup {
            target,
            start,
            end,
            ..
        } => {
            let target = eval(target, ctx)?;
            let start = start.as_ref().map(|e| eval(e, ctx)).transpose()?;
            let end = end.as_ref().map(|e| eval(e, ctx)).transpose()?;
            eval_range_lookup(&target, start.as_ref(), end.as_ref())
        }
        Expr::Unary { op, operand, span } => {
            let value = eval(operand, ctx)?;
            eval_unary(*op, &value, *span)
        }
        Expr::Binary {
            op, left, right, ..
        } => eval_binary(*op, left, right, ctx),
        Expr::IsNull {
            operand, negated, ..
        } => {
            let value = eval(operand, ctx)?;
            let is_null = matches!(value, Value::Null);
            Ok(Value::Bool(is_null != *negated))
        }
        Expr::Case {
            arms, else_branch, ..
        } => {
            for arm in arms {
                if eval(&arm.when, ctx)?.is_truthy() {
                    return eval(&arm.then, ctx);
                }
            }
            eval(else_branch, ctx)
        }
        Expr::Call { id, name, args, span } => {
            if let Some(value) = ctx.overrides.get(id) {
                return Ok(value.clone());
            }
            let values = args
                .iter()
                .map(|a| eval(a, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            match ctx.registry.scalar(name) {
                Some(f) => f(&values),
                None if ctx.registry.is_async_provider(name) => Err(ExecError::TypeError {
                    op: name.clone(),
                    detail: "async functions can only be used in LOAD/CALL, not as a scalar expression"
                        .to_string(),
                }),
                None => Err(ExecError::UnknownFunction {
                    name: name.clone(),
                    span: *span,
                }),
            }
        }
        Expr::Aggregate { id, .. } => ctx
            .overrides
            .get(id)
            .cloned()
            .ok_or_else(|| ExecError::TypeError {
                op: "aggregate".to_string(),
                detail: "aggregate expression evaluated outside of finish()".to_string(),
            }),
    }
}

fn numeric_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 2f64.powi(53) {
        Value::int(n as i64)
    } else {
        Value::float(n)
    }
}

fn eval_fstring(parts: &[FStringPart], ctx: &EvalContext) -> Result<Value, ExecError> {
    let mut out = String::new();
    for part in parts {
        match part {
            FStringPart::Literal(text) => out.push_str(text),
            FStringPart::Expr(expr) => {
                let value = eval(expr, ctx)?;
                out.push_str(&value.to_display_string());
            }
        }
    }
    Ok(Value::str(out))
}

fn eval_lookup(target: &Value, index: &Value, span: flowquery_core::Span) -> Result<Value, ExecError> {
    match (target, index) {
        (Value::Map(map), Value::Str(key)) => Ok(map.get(key.as_ref()).cloned().unwrap_or(Value::Null)),
        (Value::Seq(seq), Value::Number(n)) => {
            let idx = n.as_f64() as i64;
            Ok(resolve_index(seq.len(), idx)
                .and_then(|i| seq.get(i).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        _ => Err(ExecError::TypeError {
            op: "lookup".to_string(),
            detail: format!(
                "cannot index a {} with a {} at line {}, col {}",
                target.type_name(),
                index.type_name(),
                span.line,
                span.col
            ),
        }),
    }
}

fn resolve_index(len: usize, idx: i64) -> Option<usize> {
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved < 0 || resolved as usize >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

fn eval_range_lookup(
    target: &Value,
    start: Option<&Value>,
    end: Option<&Value>,
) -> Result<Value, ExecError> {
    let Value::Seq(seq) = target else {
        if matches!(target, Value::Null) {
            return Ok(Value::Null);
        }
        return Err(ExecError::TypeError {
            op: "range-lookup".to_string(),
            detail: format!("cannot slice a {}", target.type_name()),
        });
    };
    let len = seq.len() as i64;
    let clamp = |i: i64| i.clamp(0, len) as usize;
    let as_index = |v: &Value| match v {
        Value::Number(n) => n.as_f64() as i64,
        _ => 0,
    };
    let start = start.map(as_index).unwrap_or(0);
    let end = end.map(as_index).unwrap_or(len);
    let start = clamp(if start < 0 { start + len } else { start });
    let end = clamp(if end < 0 { end + len } else { end });
    if start >= end {
        return Ok(Value::seq(Vec::new()));
    }
    Ok(Value::seq(seq[start..end].to_vec()))
}

fn eval_unary(op: UnaryOp, value: &Value, span: flowquery_core::Span) -> Result<Value, ExecError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Null) => Ok(Value::Null),
        (UnaryOp::Neg, Value::Number(Number::Int(i))) => Ok(Value::int(-i)),
        (UnaryOp::Neg, Value::Number(Number::Float(f))) => Ok(Value::float(-f)),
        (UnaryOp::Not, other) => Ok(Value::Bool(!other.is_truthy())),
        (UnaryOp::Neg, other) => Err(ExecError::TypeError {
            op: "-".to_string(),
            detail: format!("cannot negate a {} at line {}, col {}", other.type_name(), span.line, span.col),
        }),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &EvalContext) -> Result<Value, ExecError> {
    // AND/OR short-circuit on truthiness before the right side is evaluated.
    if matches!(op, BinaryOp::And) {
        let l = eval(left, ctx)?;
        return if l.is_truthy() { eval(right, ctx) } else { Ok(l) };
    }
    if matches!(op, BinaryOp::Or) {
        let l = eval(left, ctx)?;
        return if l.is_truthy() { Ok(l) } else { eval(right, ctx) };
    }

    let l = eval(left, ctx)?;
    let r = eval(right, ctx)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(value_eq(&l, &r))),
        BinaryOp::NotEq => Ok(Value::Bool(!value_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => eval_ordering(op, &l, &r),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            eval_arithmetic(op, &l, &r)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    deep_eq(a, b)
}

fn eval_ordering(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecError> {
    if matches!(l, Value::Null) || matches!(r, Value::Null) {
        return Ok(Value::Bool(false));
    }
    let ordering = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    use std::cmp::Ordering::*;
    let result = match op {
        BinaryOp::Lt => ordering == Less,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::LtEq => ordering != Greater,
        BinaryOp::GtEq => ordering != Less,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn eval_arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecError> {
    if matches!(l, Value::Null) || matches!(r, Value::Null) {
        return Ok(Value::Null);
    }
    let (Value::Number(a), Value::Number(b)) = (l, r) else {
        return Err(ExecError::TypeError {
            op: format!("{op:?}"),
            detail: format!("cannot apply arithmetic to {} and {}", l.type_name(), r.type_name()),
        });
    };

    if matches!(op, BinaryOp::Div) {
        let rhs = b.as_f64();
        return Ok(if rhs == 0.0 {
            Value::Null
        } else {
            Value::float(a.as_f64() / rhs)
        });
    }
    if matches!(op, BinaryOp::Pow) {
        return Ok(promote_result(a.as_f64().powf(b.as_f64()), a, b));
    }

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                BinaryOp::Add => x.checked_add(*y),
                BinaryOp::Sub => x.checked_sub(*y),
                BinaryOp::Mul => x.checked_mul(*y),
                BinaryOp::Mod => {
                    if *y == 0 {
                        return Ok(Value::Null);
                    }
                    Some(x % y)
                }
                _ => unreachable!(),
            };
            Ok(result.map(Value::int).unwrap_or_else(|| {
                Value::float(match op {
                    BinaryOp::Add => *x as f64 + *y as f64,
                    BinaryOp::Sub => *x as f64 - *y as f64,
                    BinaryOp::Mul => *x as f64 * *y as f64,
                    _ => unreachable!(),
                })
            }))
        }
        _ => {
            let x = a.as_f64();
            let y = b.as_f64();
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Mod => {
                    if y == 0.0 {
                        return Ok(Value::Null);
                    }
                    x % y
                }
                _ => unreachable!(),
            };
            Ok(Value::float(result))
        }
    }
}

fn promote_result(result: f64, a: &Number, b: &Number) -> Value {
    if matches!((a, b), (Number::Int(_), Number::Int(_))) && result.fract() == 0.0 {
        Value::int(result as i64)
    } else {
        Value::float(result)
    }
}

/// Evaluates an aggregate's argument in the non-predicate form (a plain
/// value expression, evaluated once per upstream row against that row's
/// bindings) — used by `exec::Aggregated` while filling buckets.
pub fn eval_aggregate_argument(arg: &AggregateArg, ctx: &EvalContext) -> Result<Vec<Value>, ExecError> {
    match arg {
        AggregateArg::Value(expr) => Ok(vec![eval(expr, ctx)?]),
        AggregateArg::Predicate(pred) => {
            let source = eval(&pred.source, ctx)?;
            let Value::Seq(items) = source else {
                return Err(ExecError::TypeError {
                    op: "IN".to_string(),
                    detail: format!("predicate source must be a sequence, got {}", source.type_name()),
                });
            };
            let mut out = Vec::new();
            for item in items.iter() {
                let scoped = ctx.bindings.with(pred.binding.clone(), item.clone());
                let scoped_ctx = EvalContext {
                    bindings: &scoped,
                    registry: ctx.registry,
                    overrides: ctx.overrides,
                };
                if let Some(filter) = &pred.filter {
                    if !eval(filter, &scoped_ctx)?.is_truthy() {
                        continue;
                    }
                }
                out.push(eval(&pred.projection, &scoped_ctx)?);
            }
            Ok(out)
        }
    }
}
