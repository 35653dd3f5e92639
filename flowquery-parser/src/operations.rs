//! Operation parser (C7): the top-level clause loop, recognising `WITH`,
//! `UNWIND`, `LOAD`, `CALL`, `WHERE`, `LIMIT`, `RETURN`. `WHERE` and `LIMIT`
//! are modelled as their own flat `Operation` entries immediately following
//! the clause they modify (see `ast::Operation`), rather than nested inside
//! it — execution-equivalent, see DESIGN.md.

use flowquery_core::{registry, FunctionCategory};
use flowquery_lexer::TokenKind;

use crate::ast::{Expr, LoadFormat, LoadSource, Operation, Projection};
use crate::cursor::Cursor;
use crate::error::ParseError;
use crate::expr::{expect, parse_expression, unexpected};

pub fn parse_program(cursor: &mut Cursor) -> Result<Vec<Operation>, ParseError> {
    let mut ops = Vec::new();
    let mut seen_return = false;

    loop {
        if cursor.at_eof() {
            break;
        }

        if matches!(cursor.peek(), TokenKind::Return) && seen_return {
            return Err(ParseError::DuplicateReturn {
                span: cursor.peek_span(),
            });
        }

        let op = parse_operation(cursor)?;
        let is_return = matches!(op, Operation::Return { .. });
        let call_needs_yield = matches!(
            &op,
            Operation::Call {
                yield_exprs: None,
                ..
            }
        );
        if is_return {
            seen_return = true;
        }
        ops.push(op);

        loop {
            match cursor.peek() {
                TokenKind::Where => {
                    require_leading_trivia(cursor)?;
                    ops.push(parse_where_suffix(cursor)?);
                }
                TokenKind::Limit => {
                    require_leading_trivia(cursor)?;
                    ops.push(parse_limit_suffix(cursor)?);
                }
                _ => break,
            }
        }

        if cursor.at_eof() {
            break;
        }
        if call_needs_yield {
            return Err(ParseError::CallRequiresYield {
                span: cursor.peek_span(),
            });
        }
        require_leading_trivia(cursor)?;
    }

    validate_terminal(&ops)?;
    Ok(ops)
}

fn require_leading_trivia(cursor: &mut Cursor) -> Result<(), ParseError> {
    if cursor.has_leading_trivia() {
        Ok(())
    } else {
        Err(ParseError::ExpectedWhitespace {
            span: cursor.peek_span(),
        })
    }
}

fn validate_terminal(ops: &[Operation]) -> Result<(), ParseError> {
    let anchor = ops
        .iter()
        .rev()
        .find(|op| !matches!(op, Operation::Where { .. } | Operation::Limit { .. }));
    match anchor {
        Some(Operation::Return { .. }) | Some(Operation::Call { .. }) => Ok(()),
        Some(other) => Err(ParseError::InvalidTerminalOperation {
            span: operation_span(other),
        }),
        None => Err(ParseError::InvalidTerminalOperation {
            span: crate::synthetic_span(),
        }),
    }
}

fn operation_span(op: &Operation) -> flowquery_core::Span {
    match op {
        Operation::With { projections, .. } | Operation::Return { projections, .. } => {
            projections
                .first()
                .map(|p| p.expr.span())
                .unwrap_or_else(crate::synthetic_span)
        }
        Operation::Unwind { expr, .. } => expr.span(),
        Operation::Load { alias: _, .. } => crate::synthetic_span(),
        Operation::Call { .. } => crate::synthetic_span(),
        Operation::Where { expr } => expr.span(),
        Operation::Limit { .. } => crate::synthetic_span(),
    }
}

fn parse_operation(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    match cursor.peek() {
        TokenKind::With => parse_with(cursor),
        TokenKind::Unwind => parse_unwind(cursor),
        TokenKind::Load => parse_load(cursor),
        TokenKind::Call => parse_call_op(cursor),
        TokenKind::Return => parse_return(cursor),
        _ => Err(unexpected(cursor)),
    }
}

/// An alias taken from an explicit `AS name`, or — when absent — inferred:
/// a bare `Reference` borrows its own name, anything else is an error.
fn required_alias(cursor: &mut Cursor, expr: &Expr) -> Result<String, ParseError> {
    if matches!(cursor.peek(), TokenKind::As) {
        cursor.advance();
        expect_identifier(cursor)
    } else if let Expr::Reference(name, _) = expr {
        Ok(name.clone())
    } else {
        Err(ParseError::MissingAlias { span: expr.span() })
    }
}

/// An alias that must be given explicitly via `AS name` regardless of the
/// expression's shape (`UNWIND`, `LOAD`).
fn explicit_alias(cursor: &mut Cursor) -> Result<String, ParseError> {
    if matches!(cursor.peek(), TokenKind::As) {
        cursor.advance();
        expect_identifier(cursor)
    } else {
        Err(ParseError::MissingAlias {
            span: cursor.peek_span(),
        })
    }
}

/// `RETURN`/`YIELD` alias inference: explicit `AS name`, else a bare
/// reference's own name, else the synthesized `expr<i>`.
fn alias_or_default(cursor: &mut Cursor, expr: &Expr, index: usize) -> Result<String, ParseError> {
    if matches!(cursor.peek(), TokenKind::As) {
        cursor.advance();
        expect_identifier(cursor)
    } else if let Expr::Reference(name, _) = expr {
        Ok(name.clone())
    } else {
        Ok(format!("expr{index}"))
    }
}

fn expect_identifier(cursor: &mut Cursor) -> Result<String, ParseError> {
    match cursor.peek().clone() {
        TokenKind::Identifier(name) => {
            cursor.advance();
            Ok(name)
        }
        _ => Err(unexpected(cursor)),
    }
}

fn parse_with(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // With
    let mut projections = Vec::new();
    loop {
        let expr = parse_expression(cursor)?;
        let alias = required_alias(cursor, &expr)?;
        projections.push(Projection { alias, expr });
        if matches!(cursor.peek(), TokenKind::Comma) {
            cursor.advance();
            continue;
        }
        break;
    }
    let aggregated = projections.iter().any(|p| p.expr.contains_aggregate());
    Ok(Operation::With {
        projections,
        aggregated,
    })
}

fn parse_unwind(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Unwind
    let expr = parse_expression(cursor)?;
    if !expr.is_unwindable_shape() {
        return Err(ParseError::UnwindNotSequence { span: expr.span() });
    }
    let alias = explicit_alias(cursor)?;
    Ok(Operation::Unwind { expr, alias })
}

fn parse_call_args(cursor: &mut Cursor) -> Result<Vec<Expr>, ParseError> {
    let mut args = Vec::new();
    if !matches!(cursor.peek(), TokenKind::RParen) {
        loop {
            args.push(parse_expression(cursor)?);
            if matches!(cursor.peek(), TokenKind::Comma) {
                cursor.advance();
                continue;
            }
            break;
        }
    }
    expect(cursor, &TokenKind::RParen)?;
    Ok(args)
}

fn parse_async_call(cursor: &mut Cursor) -> Result<(String, Vec<Expr>), ParseError> {
    let name = expect_identifier(cursor)?;
    expect(cursor, &TokenKind::LParen)?;
    let args = parse_call_args(cursor)?;
    Ok((name, args))
}

fn parse_load(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Load
    let format = match cursor.peek().clone() {
        TokenKind::Json => {
            cursor.advance();
            LoadFormat::Json
        }
        TokenKind::Csv => {
            cursor.advance();
            LoadFormat::Csv
        }
        TokenKind::Text => {
            cursor.advance();
            LoadFormat::Text
        }
        _ => return Err(unexpected(cursor)),
    };
    expect(cursor, &TokenKind::From)?;

    let looks_like_async_provider = match cursor.peek().clone() {
        TokenKind::Identifier(name) => {
            matches!(cursor.peek2(), TokenKind::LParen)
                && registry::lookup(&name).map(|m| m.category) == Some(FunctionCategory::Async)
        }
        _ => false,
    };
    let source = if looks_like_async_provider {
        let (provider, args) = parse_async_call(cursor)?;
        LoadSource::AsyncCall { provider, args }
    } else {
        LoadSource::Url(parse_expression(cursor)?)
    };

    let headers = if matches!(cursor.peek(), TokenKind::Headers) {
        cursor.advance();
        Some(parse_expression(cursor)?)
    } else {
        None
    };
    let post = if matches!(cursor.peek(), TokenKind::Post) {
        cursor.advance();
        Some(parse_expression(cursor)?)
    } else {
        None
    };
    let alias = explicit_alias(cursor)?;
    Ok(Operation::Load {
        format,
        source,
        headers,
        post,
        alias,
    })
}

fn parse_call_op(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Call
    let (provider, args) = parse_async_call(cursor)?;
    let yield_exprs = if matches!(cursor.peek(), TokenKind::Yield) {
        cursor.advance();
        let mut projections = Vec::new();
        let mut index = 0usize;
        loop {
            let expr = parse_expression(cursor)?;
            let alias = alias_or_default(cursor, &expr, index)?;
            index += 1;
            projections.push(Projection { alias, expr });
            if matches!(cursor.peek(), TokenKind::Comma) {
                cursor.advance();
                continue;
            }
            break;
        }
        Some(projections)
    } else {
        None
    };
    Ok(Operation::Call {
        provider,
        args,
        yield_exprs,
    })
}

fn parse_return(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Return
    let mut projections = Vec::new();
    let mut index = 0usize;
    loop {
        let expr = parse_expression(cursor)?;
        let alias = alias_or_default(cursor, &expr, index)?;
        index += 1;
        projections.push(Projection { alias, expr });
        if matches!(cursor.peek(), TokenKind::Comma) {
            cursor.advance();
            continue;
        }
        break;
    }
    let aggregated = projections.iter().any(|p| p.expr.contains_aggregate());
    Ok(Operation::Return {
        projections,
        aggregated,
    })
}

fn parse_where_suffix(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Where
    let expr = parse_expression(cursor)?;
    if expr.is_collection_literal() {
        return Err(ParseError::WhereNotBoolean { span: expr.span() });
    }
    Ok(Operation::Where { expr })
}

fn parse_limit_suffix(cursor: &mut Cursor) -> Result<Operation, ParseError> {
    cursor.advance(); // Limit
    match cursor.peek().clone() {
        TokenKind::Number(n) => {
            cursor.advance();
            Ok(Operation::Limit { count: n as i64 })
        }
        _ => Err(unexpected(cursor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowquery_lexer::tokenize;

    fn parse(src: &str) -> Vec<Operation> {
        let tokens = tokenize(src).unwrap();
        let mut cursor = Cursor::new(tokens);
        parse_program(&mut cursor).unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        let tokens = tokenize(src).unwrap();
        let mut cursor = Cursor::new(tokens);
        parse_program(&mut cursor).unwrap_err()
    }

    #[test]
    fn minimal_return_parses() {
        let ops = parse("RETURN 1 AS one");
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], Operation::Return { projections, .. } if projections[0].alias == "one"));
    }

    #[test]
    fn bare_reference_return_infers_alias() {
        let ops = parse("WITH 1 AS x RETURN x");
        match &ops[1] {
            Operation::Return { projections, .. } => assert_eq!(projections[0].alias, "x"),
            other => panic!("expected Return, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_return_gets_synthetic_alias() {
        let ops = parse("RETURN 1 + 1");
        match &ops[0] {
            Operation::Return { projections, .. } => assert_eq!(projections[0].alias, "expr0"),
            other => panic!("expected Return, got {other:?}"),
        }
    }

    #[test]
    fn with_requires_alias_for_non_reference() {
        let tokens = tokenize("WITH 1 + 1 RETURN 1").unwrap();
        let mut cursor = Cursor::new(tokens);
        let err = parse_program(&mut cursor).unwrap_err();
        assert!(matches!(err, ParseError::MissingAlias { .. }));
    }

    #[test]
    fn where_and_limit_attach_as_flat_entries() {
        let ops = parse("RETURN 1 AS x WHERE x > 0 LIMIT 5");
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[1], Operation::Where { .. }));
        assert!(matches!(ops[2], Operation::Limit { count: 5 }));
    }

    #[test]
    fn where_rejects_collection_literal() {
        let err = parse_err("RETURN 1 AS x WHERE [1, 2]");
        assert!(matches!(err, ParseError::WhereNotBoolean { .. }));
    }

    #[test]
    fn unwind_requires_sequence_shape() {
        let err = parse_err("UNWIND 1 AS x RETURN x");
        assert!(matches!(err, ParseError::UnwindNotSequence { .. }));
    }

    #[test]
    fn duplicate_return_is_rejected() {
        let err = parse_err("RETURN 1 AS x RETURN 2 AS y");
        assert!(matches!(err, ParseError::DuplicateReturn { .. }));
    }

    #[test]
    fn dangling_with_is_an_invalid_terminal() {
        let err = parse_err("WITH 1 AS x");
        assert!(matches!(err, ParseError::InvalidTerminalOperation { .. }));
    }

    #[test]
    fn call_without_yield_must_be_terminal() {
        let err = parse_err("CALL fetchJson(\"http://x\") RETURN value");
        assert!(matches!(err, ParseError::CallRequiresYield { .. }));
    }

    #[test]
    fn call_with_yield_chains_normally() {
        let ops = parse("CALL fetchJson(\"http://x\") YIELD value AS v RETURN v");
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], Operation::Call { yield_exprs: Some(_), .. }));
    }

    #[test]
    fn load_json_url_form_parses() {
        let ops = parse(r#"LOAD JSON FROM "http://example.com/data" AS rows"#);
        match &ops[0] {
            Operation::Load { format, source, alias, .. } => {
                assert_eq!(*format, LoadFormat::Json);
                assert!(matches!(source, LoadSource::Url(_)));
                assert_eq!(alias, "rows");
            }
            other => panic!("expected Load, got {other:?}"),
        }
    }

    #[test]
    fn aggregated_return_is_flagged() {
        let ops = parse("WITH [1, 2, 3] AS xs UNWIND xs AS x RETURN sum(x) AS total");
        match ops.last().unwrap() {
            Operation::Return { aggregated, .. } => assert!(aggregated),
            other => panic!("expected Return, got {other:?}"),
        }
    }
}
