//! AST node model (C4): a tree with only downward edges. Nested-aggregate
//! detection and reference resolution both happen by name, not by parent
//! pointer — see `flowquery-parser::expr` for the parsing-time stack that
//! rejects nested aggregates, and `flowquery-runtime::bindings` for how a
//! `Reference` node is resolved at execution.

use flowquery_core::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One chunk of an f-string: either literal text or an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr(Box<Expr>),
}

/// The `name IN coll | proj [WHERE cond]` list-comprehension form. Only
/// legal as the sole argument of an aggregate call.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub binding: String,
    pub source: Box<Expr>,
    pub projection: Box<Expr>,
    pub filter: Option<Box<Expr>>,
    pub span: Span,
}

/// The argument form of an aggregate call: either a plain expression
/// (`sum(x)`) or a predicate comprehension (`sum(n IN xs | n)`).
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateArg {
    Value(Box<Expr>),
    Predicate(Predicate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub when: Expr,
    pub then: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64, Span),
    String(String, Span),
    Null(Span),
    /// A read of a named binding established by `With`/`Unwind`/`Load`/`Call`.
    Reference(String, Span),
    Array(Vec<Expr>, Span),
    /// Mapping literal; keys are evaluated as plain strings (bare
    /// identifiers and quoted strings are both accepted by the parser).
    Map(Vec<(String, Expr)>, Span),
    FString(Vec<FStringPart>, Span),
    Lookup {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    RangeLookup {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
        span: Span,
    },
    Case {
        arms: Vec<CaseArm>,
        else_branch: Box<Expr>,
        span: Span,
    },
    /// A scalar, predicate(-form), or async function call. `id` uniquely
    /// identifies this call site within the whole parsed query and is how
    /// the runtime's aggregate override map addresses a specific aggregate
    /// occurrence during `finish()` (see `flowquery-runtime::exec`).
    Call {
        id: u32,
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// An aggregate call, distinguished from `Call` at parse time because an
    /// aggregate may take the predicate-comprehension argument form and
    /// participates in grouping (see `flowquery-runtime::exec::Aggregated`).
    Aggregate {
        id: u32,
        name: String,
        distinct: bool,
        arg: AggregateArg,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number(_, s)
            | Expr::String(_, s)
            | Expr::Null(s)
            | Expr::Reference(_, s)
            | Expr::Array(_, s)
            | Expr::Map(_, s)
            | Expr::FString(_, s)
            | Expr::Lookup { span: s, .. }
            | Expr::RangeLookup { span: s, .. }
            | Expr::Unary { span: s, .. }
            | Expr::Binary { span: s, .. }
            | Expr::IsNull { span: s, .. }
            | Expr::Case { span: s, .. }
            | Expr::Call { span: s, .. }
            | Expr::Aggregate { span: s, .. } => *s,
        }
    }

    /// Whether this expression's root is a mapping or array literal — the
    /// shape `Where`/`Unwind` validation needs to reject or require.
    pub fn is_collection_literal(&self) -> bool {
        matches!(self, Expr::Array(..) | Expr::Map(..))
    }

    /// Whether the source expression is one of the shapes §4.7 allows to
    /// feed `Unwind` (array literal, reference, lookup, range-lookup, or a
    /// function call — the last is trusted to return a sequence at runtime).
    pub fn is_unwindable_shape(&self) -> bool {
        matches!(
            self,
            Expr::Array(..)
                | Expr::Reference(..)
                | Expr::Lookup { .. }
                | Expr::RangeLookup { .. }
                | Expr::Call { .. }
        )
    }

    /// True if this expression tree contains at least one aggregate call,
    /// i.e. it must be evaluated against a finished group rather than once
    /// per upstream row.
    pub fn contains_aggregate(&self) -> bool {
        !self.aggregates().is_empty()
    }

    /// All aggregate call nodes reachable from this expression, in
    /// left-to-right evaluation order. An aggregate's own argument
    /// sub-expression is not itself scanned for nested aggregates here
    /// (parsing already rejects nesting); this just gathers the occurrence
    /// list the executor walks to build/override group accumulators.
    pub fn aggregates(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_aggregates(&mut out);
        out
    }

    fn collect_aggregates<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Aggregate { .. } => out.push(self),
            Expr::Array(items, _) => items.iter().for_each(|e| e.collect_aggregates(out)),
            Expr::Map(entries, _) => entries.iter().for_each(|(_, e)| e.collect_aggregates(out)),
            Expr::FString(parts, _) => parts.iter().for_each(|p| {
                if let FStringPart::Expr(e) = p {
                    e.collect_aggregates(out);
                }
            }),
            Expr::Lookup { target, index, .. } => {
                target.collect_aggregates(out);
                index.collect_aggregates(out);
            }
            Expr::RangeLookup {
                target, start, end, ..
            } => {
                target.collect_aggregates(out);
                if let Some(s) = start {
                    s.collect_aggregates(out);
                }
                if let Some(e) = end {
                    e.collect_aggregates(out);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_aggregates(out),
            Expr::Binary { left, right, .. } => {
                left.collect_aggregates(out);
                right.collect_aggregates(out);
            }
            Expr::IsNull { operand, .. } => operand.collect_aggregates(out),
            Expr::Case {
                arms, else_branch, ..
            } => {
                for arm in arms {
                    arm.when.collect_aggregates(out);
                    arm.then.collect_aggregates(out);
                }
                else_branch.collect_aggregates(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_aggregates(out)),
            Expr::Number(..) | Expr::String(..) | Expr::Null(_) | Expr::Reference(..) => {}
        }
    }
}

/// One `alias => expr` output column of a `With`/`Unwind`/`Return` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub alias: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    Json,
    Csv,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    /// `FROM <expr>` where `<expr>` evaluates to a URL string.
    Url(Expr),
    /// `FROM provider(args...)` — a registered async provider call.
    AsyncCall { provider: String, args: Vec<Expr> },
}

/// A single top-level clause. The chain is a flat, source-ordered sequence:
/// a `Where`/`Limit` written as a suffix of another clause (`RETURN … WHERE
/// …`) is modelled as its own `Where`/`Limit` entry immediately following
/// that clause, since the two are execution-equivalent (see DESIGN.md).
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    With {
        projections: Vec<Projection>,
        aggregated: bool,
    },
    Unwind {
        expr: Expr,
        alias: String,
    },
    Load {
        format: LoadFormat,
        source: LoadSource,
        headers: Option<Expr>,
        post: Option<Expr>,
        alias: String,
    },
    Call {
        provider: String,
        args: Vec<Expr>,
        yield_exprs: Option<Vec<Projection>>,
    },
    Where {
        expr: Expr,
    },
    Limit {
        count: i64,
    },
    Return {
        projections: Vec<Projection>,
        aggregated: bool,
    },
}
