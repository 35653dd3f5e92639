//! Static catalog of built-in function metadata (C6): the part of the
//! function registry that both the parser (arity checks, aggregate
//! detection) and the runtime (dispatch, the in-language `functions()`
//! catalog) need to agree on. The actual callable implementations —
//! accumulators, async providers — live in `flowquery-runtime::builtins`
//! and are looked up by name against this table, not duplicated here.

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCategory {
    Scalar,
    Aggregate,
    /// Consumed only inside an aggregate's `name IN coll | proj` argument;
    /// never called directly.
    Predicate,
    Async,
}

/// Metadata for one registered function. `arity` is `None` for variadic
/// functions (e.g. `coalesce`); a fixed arity makes a mismatched call count
/// a parse-time error.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub name: &'static str,
    pub category: FunctionCategory,
    pub arity: Option<usize>,
    pub output_schema: &'static str,
    pub notes: &'static str,
}

pub static BUILTIN_FUNCTIONS: Lazy<Vec<FunctionMeta>> = Lazy::new(|| {
    use FunctionCategory::*;
    vec![
        FunctionMeta { name: "range", category: Scalar, arity: Some(2), output_schema: "array", notes: "inclusive integer sequence a..b" },
        FunctionMeta { name: "rand", category: Scalar, arity: Some(0), output_schema: "number", notes: "uniform over [0, 1)" },
        FunctionMeta { name: "round", category: Scalar, arity: None, output_schema: "number", notes: "round(x) or round(x, digits)" },
        FunctionMeta { name: "split", category: Scalar, arity: Some(2), output_schema: "array", notes: "split(s, sep)" },
        FunctionMeta { name: "join", category: Scalar, arity: Some(2), output_schema: "string", notes: "join(arr, sep)" },
        FunctionMeta { name: "tojson", category: Scalar, arity: Some(1), output_schema: "any", notes: "parse a JSON string" },
        FunctionMeta { name: "stringify", category: Scalar, arity: Some(1), output_schema: "string", notes: "canonical JSON, 3-space indent" },
        FunctionMeta { name: "replace", category: Scalar, arity: Some(3), output_schema: "string", notes: "replace-all occurrences" },
        FunctionMeta { name: "size", category: Scalar, arity: Some(1), output_schema: "number", notes: "length of string/array/mapping" },
        FunctionMeta { name: "keys", category: Scalar, arity: Some(1), output_schema: "array", notes: "insertion-ordered keys of a mapping" },
        FunctionMeta { name: "type", category: Scalar, arity: Some(1), output_schema: "string", notes: "number/string/boolean/array/object/null" },
        FunctionMeta { name: "functions", category: Scalar, arity: Some(0), output_schema: "array", notes: "the metadata catalog itself" },
        FunctionMeta { name: "coalesce", category: Scalar, arity: None, output_schema: "any", notes: "first non-null argument" },
        FunctionMeta { name: "tointeger", category: Scalar, arity: Some(1), output_schema: "number", notes: "coerce to integer-valued number" },
        FunctionMeta { name: "tofloat", category: Scalar, arity: Some(1), output_schema: "number", notes: "coerce to floating number" },
        FunctionMeta { name: "tostring", category: Scalar, arity: Some(1), output_schema: "string", notes: "coerce to display string" },
        FunctionMeta { name: "toboolean", category: Scalar, arity: Some(1), output_schema: "boolean", notes: "coerce to boolean via truthiness" },
        FunctionMeta { name: "sum", category: Aggregate, arity: Some(1), output_schema: "number|string", notes: "numeric add or string concat; mixed types fail" },
        FunctionMeta { name: "avg", category: Aggregate, arity: Some(1), output_schema: "number", notes: "null for an empty group" },
        FunctionMeta { name: "collect", category: Aggregate, arity: Some(1), output_schema: "array", notes: "preserves order; DISTINCT dedups by canonical JSON" },
        FunctionMeta { name: "min", category: Aggregate, arity: Some(1), output_schema: "any", notes: "" },
        FunctionMeta { name: "max", category: Aggregate, arity: Some(1), output_schema: "any", notes: "" },
        FunctionMeta { name: "count", category: Aggregate, arity: Some(1), output_schema: "number", notes: "" },
        FunctionMeta { name: "fetchjson", category: Async, arity: None, output_schema: "array|any", notes: "fetchJson(url[, options])" },
    ]
});

/// Case-insensitive metadata lookup.
pub fn lookup(name: &str) -> Option<&'static FunctionMeta> {
    let lower = name.to_ascii_lowercase();
    BUILTIN_FUNCTIONS.iter().find(|f| f.name == lower)
}

pub fn is_aggregate(name: &str) -> bool {
    lookup(name).is_some_and(|f| f.category == FunctionCategory::Aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_case_insensitively() {
        let meta = lookup("ToInteger").expect("tointeger should be registered");
        assert_eq!(meta.category, FunctionCategory::Scalar);
    }

    #[test]
    fn aggregates_are_recognized() {
        assert!(is_aggregate("SUM"));
        assert!(!is_aggregate("range"));
        assert!(!is_aggregate("unknown_fn"));
    }

    #[test]
    fn variadic_functions_have_no_fixed_arity() {
        assert_eq!(lookup("coalesce").unwrap().arity, None);
        assert_eq!(lookup("range").unwrap().arity, Some(2));
    }
}
