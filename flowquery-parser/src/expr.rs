//! Expression engine, parse half (C5): an operator-precedence ("binding
//! power") climb over the token window, grouped operands, trailing lookup
//! chains, function/aggregate calls, and the `CASE` form.
//!
//! Binding powers double the textual precedence levels and, for a left-
//! associative operator, make the right power one higher than the left so
//! that `parse_bp` stops before consuming another operator at the same
//! level from the right. The exponent `^` reverses that (right power lower
//! than left) to make it right-associative.

use flowquery_core::{registry, Span};
use flowquery_lexer::TokenKind;

use crate::ast::{AggregateArg, BinaryOp, CaseArm, Expr, FStringPart, Predicate, UnaryOp};
use crate::cursor::Cursor;
use crate::error::ParseError;

pub fn parse_expression(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    parse_bp(cursor, 0)
}

pub(crate) fn unexpected(cursor: &mut Cursor) -> ParseError {
    let span = cursor.peek_span();
    ParseError::UnexpectedToken {
        found: format!("{:?}", cursor.peek()),
        span,
    }
}

pub(crate) fn expect(cursor: &mut Cursor, kind: &TokenKind) -> Result<Span, ParseError> {
    let span = cursor.peek_span();
    if cursor.peek() == kind {
        cursor.advance();
        Ok(span)
    } else {
        Err(unexpected(cursor))
    }
}

fn infix_binding_power(kind: &TokenKind) -> Option<(BinaryOp, u8, u8)> {
    use TokenKind::*;
    Some(match kind {
        Or => (BinaryOp::Or, 1, 2),
        And => (BinaryOp::And, 3, 4),
        Eq => (BinaryOp::Eq, 5, 6),
        NotEq => (BinaryOp::NotEq, 5, 6),
        Lt => (BinaryOp::Lt, 5, 6),
        Gt => (BinaryOp::Gt, 5, 6),
        LtEq => (BinaryOp::LtEq, 5, 6),
        GtEq => (BinaryOp::GtEq, 5, 6),
        Plus => (BinaryOp::Add, 7, 8),
        Minus => (BinaryOp::Sub, 7, 8),
        Star => (BinaryOp::Mul, 9, 10),
        Slash => (BinaryOp::Div, 9, 10),
        Percent => (BinaryOp::Mod, 9, 10),
        Caret => (BinaryOp::Pow, 14, 13),
        _ => return None,
    })
}

/// `IS [NOT] NULL` binds at comparison precedence, as a postfix operator.
const IS_NULL_BP: u8 = 5;

/// Unary `-` / `NOT` bind tighter than every binary operator but `^`.
const UNARY_BP: u8 = 11;

fn parse_bp(cursor: &mut Cursor, min_bp: u8) -> Result<Expr, ParseError> {
    let mut lhs = parse_prefix(cursor)?;

    loop {
        if matches!(cursor.peek(), TokenKind::Is) {
            if IS_NULL_BP < min_bp {
                break;
            }
            let is_span = cursor.peek_span();
            cursor.advance();
            let negated = if matches!(cursor.peek(), TokenKind::Not) {
                cursor.advance();
                true
            } else {
                false
            };
            expect(cursor, &TokenKind::Null)?;
            let span = lhs.span().merge(is_span);
            lhs = Expr::IsNull {
                operand: Box::new(lhs),
                negated,
                span,
            };
            continue;
        }

        let Some((op, lbp, rbp)) = infix_binding_power(cursor.peek()) else {
            break;
        };
        if lbp < min_bp {
            break;
        }
        cursor.advance();
        let rhs = parse_bp(cursor, rbp)?;
        let span = lhs.span().merge(rhs.span());
        lhs = Expr::Binary {
            op,
            left: Box::new(lhs),
            right: Box::new(rhs),
            span,
        };
    }

    Ok(lhs)
}

fn parse_prefix(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    match cursor.peek() {
        TokenKind::Not => {
            let span = cursor.peek_span();
            cursor.advance();
            let operand = parse_bp(cursor, UNARY_BP)?;
            let span = span.merge(operand.span());
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            })
        }
        TokenKind::Minus => {
            let span = cursor.peek_span();
            cursor.advance();
            let operand = parse_bp(cursor, UNARY_BP)?;
            let span = span.merge(operand.span());
            Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            })
        }
        _ => parse_postfix_chain(cursor),
    }
}

/// A primary operand followed by zero or more greedy `.name` / `[expr]` /
/// `[expr:expr]` lookups.
fn parse_postfix_chain(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let mut expr = parse_primary(cursor)?;
    loop {
        match cursor.peek() {
            TokenKind::Dot => {
                cursor.advance();
                let name_span = cursor.peek_span();
                let name = match cursor.peek().clone() {
                    TokenKind::Identifier(name) => {
                        cursor.advance();
                        name
                    }
                    _ => return Err(unexpected(cursor)),
                };
                let span = expr.span().merge(name_span);
                expr = Expr::Lookup {
                    target: Box::new(expr),
                    index: Box::new(Expr::String(name, name_span)),
                    span,
                };
            }
            TokenKind::LBracket => {
                let lbracket_span = cursor.peek_span();
                cursor.advance();

                let start = if matches!(cursor.peek(), TokenKind::Colon | TokenKind::RBracket) {
                    None
                } else {
                    Some(Box::new(parse_expression(cursor)?))
                };

                if matches!(cursor.peek(), TokenKind::Colon) {
                    cursor.advance();
                    let end = if matches!(cursor.peek(), TokenKind::RBracket) {
                        None
                    } else {
                        Some(Box::new(parse_expression(cursor)?))
                    };
                    let end_span = expect(cursor, &TokenKind::RBracket)?;
                    let span = expr.span().merge(lbracket_span).merge(end_span);
                    expr = Expr::RangeLookup {
                        target: Box::new(expr),
                        start,
                        end,
                        span,
                    };
                } else {
                    let index = start.ok_or_else(|| unexpected(cursor))?;
                    let end_span = expect(cursor, &TokenKind::RBracket)?;
                    let span = expr.span().merge(lbracket_span).merge(end_span);
                    expr = Expr::Lookup {
                        target: Box::new(expr),
                        index,
                        span,
                    };
                }
            }
            _ => break,
        }
    }
    Ok(expr)
}

fn parse_primary(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let span = cursor.peek_span();
    match cursor.peek().clone() {
        TokenKind::Number(n) => {
            cursor.advance();
            Ok(Expr::Number(n, span))
        }
        TokenKind::String(s) => {
            cursor.advance();
            Ok(Expr::String(s, span))
        }
        TokenKind::Null => {
            cursor.advance();
            Ok(Expr::Null(span))
        }
        TokenKind::FStringSegment(_) => parse_fstring(cursor),
        TokenKind::Identifier(name) => {
            cursor.advance();
            if matches!(cursor.peek(), TokenKind::LParen) {
                parse_call(cursor, name, span)
            } else {
                Ok(Expr::Reference(name, span))
            }
        }
        TokenKind::LParen => {
            cursor.advance();
            let inner = parse_expression(cursor)?;
            expect(cursor, &TokenKind::RParen)?;
            Ok(inner)
        }
        TokenKind::LBrace => parse_map_literal(cursor),
        TokenKind::LBracket => parse_array_literal(cursor),
        TokenKind::Case => parse_case(cursor),
        _ => Err(unexpected(cursor)),
    }
}

fn parse_fstring(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let start_span = cursor.peek_span();
    let mut parts = Vec::new();
    let mut end_span = start_span;
    loop {
        match cursor.peek().clone() {
            TokenKind::FStringSegment(text) => {
                end_span = cursor.peek_span();
                cursor.advance();
                if !text.is_empty() {
                    parts.push(FStringPart::Literal(text));
                }
                if !matches!(cursor.peek(), TokenKind::LBrace) {
                    break;
                }
            }
            _ => break,
        }
        // A literal segment followed by `{` opens a hole; a segment at the
        // tail (no following `{`) ends the f-string — handled above.
        cursor.advance(); // LBrace
        let hole = parse_expression(cursor)?;
        end_span = expect(cursor, &TokenKind::RBrace)?;
        parts.push(FStringPart::Expr(Box::new(hole)));
    }
    Ok(Expr::FString(parts, start_span.merge(end_span)))
}

fn parse_map_literal(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let start_span = cursor.peek_span();
    cursor.advance(); // LBrace
    let mut entries = Vec::new();
    if !matches!(cursor.peek(), TokenKind::RBrace) {
        loop {
            let key = match cursor.peek().clone() {
                TokenKind::Identifier(name) => {
                    cursor.advance();
                    name
                }
                TokenKind::String(s) => {
                    cursor.advance();
                    s
                }
                _ => return Err(unexpected(cursor)),
            };
            expect(cursor, &TokenKind::Colon)?;
            let value = parse_expression(cursor)?;
            entries.push((key, value));
            if matches!(cursor.peek(), TokenKind::Comma) {
                cursor.advance();
                continue;
            }
            break;
        }
    }
    let end_span = expect(cursor, &TokenKind::RBrace)?;
    Ok(Expr::Map(entries, start_span.merge(end_span)))
}

fn parse_array_literal(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let start_span = cursor.peek_span();
    cursor.advance(); // LBracket
    let mut items = Vec::new();
    if !matches!(cursor.peek(), TokenKind::RBracket) {
        loop {
            items.push(parse_expression(cursor)?);
            if matches!(cursor.peek(), TokenKind::Comma) {
                cursor.advance();
                continue;
            }
            break;
        }
    }
    let end_span = expect(cursor, &TokenKind::RBracket)?;
    Ok(Expr::Array(items, start_span.merge(end_span)))
}

fn parse_case(cursor: &mut Cursor) -> Result<Expr, ParseError> {
    let start_span = cursor.peek_span();
    cursor.advance(); // Case
    let mut arms = Vec::new();
    while matches!(cursor.peek(), TokenKind::When) {
        cursor.advance();
        let when = parse_expression(cursor)?;
        expect(cursor, &TokenKind::Then)?;
        let then = parse_expression(cursor)?;
        arms.push(CaseArm { when, then });
    }
    if arms.is_empty() {
        return Err(unexpected(cursor));
    }
    expect(cursor, &TokenKind::Else)?;
    let else_branch = parse_expression(cursor)?;
    let end_span = expect(cursor, &TokenKind::End)?;
    Ok(Expr::Case {
        arms,
        else_branch: Box::new(else_branch),
        span: start_span.merge(end_span),
    })
}

/// Parses the parenthesised argument list of `name(...)`, having already
/// consumed `name`. Dispatches to the predicate-comprehension form when the
/// callee is a registered aggregate and the argument looks like `id IN`.
fn parse_call(cursor: &mut Cursor, name: String, name_span: Span) -> Result<Expr, ParseError> {
    cursor.advance(); // LParen
    let id = cursor.next_id();
    let is_aggregate = registry::is_aggregate(&name);

    if is_aggregate {
        if cursor.in_aggregate() {
            return Err(ParseError::NestedAggregate {
                outer: name,
                span: name_span,
            });
        }
        cursor.enter_aggregate();
        let result = parse_aggregate_body(cursor, id, name, name_span);
        cursor.exit_aggregate();
        return result;
    }

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
    let end_span = expect(cursor, &TokenKind::RParen)?;
    check_arity(&name, args.len(), name_span)?;
    Ok(Expr::Call {
        id,
        name,
        args,
        span: name_span.merge(end_span),
    })
}

fn parse_aggregate_body(
    cursor: &mut Cursor,
    id: u32,
    name: String,
    name_span: Span,
) -> Result<Expr, ParseError> {
    let distinct = if matches!(cursor.peek(), TokenKind::Distinct) {
        cursor.advance();
        true
    } else {
        false
    };

    // Disambiguate `name IN coll | proj` from a plain expression by looking
    // ahead: a predicate form starts with a bare identifier immediately
    // followed by `IN`.
    let is_predicate = matches!(cursor.peek(), TokenKind::Identifier(_))
        && matches!(cursor.peek2(), TokenKind::In);

    let arg = if is_predicate {
        AggregateArg::Predicate(parse_predicate(cursor)?)
    } else {
        AggregateArg::Value(Box::new(parse_expression(cursor)?))
    };

    let end_span = expect(cursor, &TokenKind::RParen)?;
    check_arity(&name, 1, name_span)?;
    Ok(Expr::Aggregate {
        id,
        name,
        distinct,
        arg,
        span: name_span.merge(end_span),
    })
}

fn parse_predicate(cursor: &mut Cursor) -> Result<Predicate, ParseError> {
    let start_span = cursor.peek_span();
    let binding = match cursor.peek().clone() {
        TokenKind::Identifier(name) => {
            cursor.advance();
            name
        }
        _ => return Err(unexpected(cursor)),
    };
    expect(cursor, &TokenKind::In)?;
    let source = parse_bp(cursor, IS_NULL_BP + 1)?; // bind tighter than the pipe
    expect(cursor, &TokenKind::Pipe)?;
    let projection = parse_expression(cursor)?;
    let filter = if matches!(cursor.peek(), TokenKind::Where) {
        cursor.advance();
        Some(Box::new(parse_expression(cursor)?))
    } else {
        None
    };
    let span = start_span.merge(projection.span());
    Ok(Predicate {
        binding,
        source: Box::new(source),
        projection: Box::new(projection),
        filter,
        span,
    })
}

fn check_arity(name: &str, got: usize, span: Span) -> Result<(), ParseError> {
    match registry::lookup(name) {
        None => Err(ParseError::UnknownFunction {
            name: name.to_string(),
            span,
        }),
        Some(meta) => match meta.arity {
            Some(expected) if expected != got => Err(ParseError::ArityMismatch {
                name: name.to_string(),
                expected,
                got,
                span,
            }),
            _ => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowquery_lexer::tokenize;

    fn parse(src: &str) -> Expr {
        let tokens = tokenize(src).unwrap();
        let mut cursor = Cursor::new(tokens);
        parse_expression(&mut cursor).unwrap()
    }

    #[test]
    fn precedence_multiplies_before_adding() {
        let expr = parse("1 + 2 * 3");
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected Add at the root, got {other:?}"),
        }
    }

    #[test]
    fn exponent_is_right_associative() {
        // 2 ^ 3 ^ 2 == 2 ^ (3 ^ 2), not (2 ^ 3) ^ 2
        let expr = parse("2 ^ 3 ^ 2");
        match expr {
            Expr::Binary {
                op: BinaryOp::Pow,
                left,
                right,
                ..
            } => {
                assert!(matches!(*left, Expr::Number(n, _) if n == 2.0));
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("expected Pow at the root, got {other:?}"),
        }
    }

    #[test]
    fn or_binds_looser_than_and() {
        let expr = parse("true AND false OR true");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn function_call_checks_arity() {
        let tokens = tokenize("range(1, 2, 3)").unwrap();
        let mut cursor = Cursor::new(tokens);
        let err = parse_expression(&mut cursor).unwrap_err();
        assert!(matches!(err, ParseError::ArityMismatch { expected: 2, got: 3, .. }));
    }

    #[test]
    fn unknown_function_is_a_parse_error() {
        let tokens = tokenize("notAFunction(1)").unwrap();
        let mut cursor = Cursor::new(tokens);
        let err = parse_expression(&mut cursor).unwrap_err();
        assert!(matches!(err, ParseError::UnknownFunction { .. }));
    }

    #[test]
    fn nested_aggregate_is_rejected() {
        let tokens = tokenize("sum(collect(x))").unwrap();
        let mut cursor = Cursor::new(tokens);
        let err = parse_expression(&mut cursor).unwrap_err();
        assert!(matches!(err, ParseError::NestedAggregate { .. }));
    }

    #[test]
    fn predicate_form_parses_inside_aggregate() {
        let expr = parse("sum(n IN xs | n * 2 WHERE n > 0)");
        match expr {
            Expr::Aggregate { arg: AggregateArg::Predicate(p), .. } => {
                assert_eq!(p.binding, "n");
                assert!(p.filter.is_some());
            }
            other => panic!("expected a predicate-form aggregate, got {other:?}"),
        }
    }

    #[test]
    fn lookup_chain_parses_greedily() {
        let expr = parse("a.b[0][1:2]");
        assert!(matches!(expr, Expr::RangeLookup { .. }));
    }

    #[test]
    fn is_not_null_parses_as_postfix() {
        let expr = parse("a IS NOT NULL");
        match expr {
            Expr::IsNull { negated, .. } => assert!(negated),
            other => panic!("expected IsNull, got {other:?}"),
        }
    }

    #[test]
    fn fstring_builds_alternating_parts() {
        let expr = parse(r#"f"x={a}""#);
        match expr {
            Expr::FString(parts, _) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], FStringPart::Literal(ref s) if s == "x="));
                assert!(matches!(parts[1], FStringPart::Expr(_)));
            }
            other => panic!("expected FString, got {other:?}"),
        }
    }
}
