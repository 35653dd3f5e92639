//! A small recursive-descent JSON reader used by the `tojson` builtin and
//! the built-in JSON `LOAD` path. Produces [`Value`] directly rather than
//! routing through `serde_json::Value` so that numbers land straight into
//! FlowQuery's `Number` fast-path representation.

use indexmap::IndexMap;

use crate::error::JsonError;
use crate::value::{Number, Value};

/// Parse a complete JSON text into a single [`Value`].
pub fn parse_json(input: &str) -> Result<Value, JsonError> {
    let bytes = input.as_bytes();
    let mut pos = skip_whitespace(bytes, 0);
    let (value, next) = parse_value(bytes, pos)?;
    pos = skip_whitespace(bytes, next);
    if pos != bytes.len() {
        return Err(JsonError::TrailingCharacters(pos));
    }
    Ok(value)
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn parse_value(bytes: &[u8], pos: usize) -> Result<(Value, usize), JsonError> {
    let pos = skip_whitespace(bytes, pos);
    match bytes.get(pos) {
        None => Err(JsonError::UnexpectedEof),
        Some(b'n') => parse_literal(bytes, pos, "null", Value::Null),
        Some(b't') => parse_literal(bytes, pos, "true", Value::Bool(true)),
        Some(b'f') => parse_literal(bytes, pos, "false", Value::Bool(false)),
        Some(b'"') => parse_string(bytes, pos).map(|(s, next)| (Value::str(s), next)),
        Some(b'[') => parse_array(bytes, pos),
        Some(b'{') => parse_object(bytes, pos),
        Some(b'-') | Some(b'0'..=b'9') => parse_number(bytes, pos),
        Some(&c) => Err(JsonError::UnexpectedChar(c as char, pos)),
    }
}

fn parse_literal(
    bytes: &[u8],
    pos: usize,
    lit: &str,
    value: Value,
) -> Result<(Value, usize), JsonError> {
    let end = pos + lit.len();
    if bytes.get(pos..end) == Some(lit.as_bytes()) {
        Ok((value, end))
    } else {
        Err(JsonError::UnexpectedChar(bytes[pos] as char, pos))
    }
}

fn parse_number(bytes: &[u8], start: usize) -> Result<(Value, usize), JsonError> {
    let mut pos = start;
    if bytes.get(pos) == Some(&b'-') {
        pos += 1;
    }
    let digits_start = pos;
    while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    if pos == digits_start {
        return Err(JsonError::InvalidNumber(start));
    }
    let mut is_float = false;
    if bytes.get(pos) == Some(&b'.') {
        is_float = true;
        pos += 1;
        let frac_start = pos;
        while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }
        if pos == frac_start {
            return Err(JsonError::InvalidNumber(start));
        }
    }
    if matches!(bytes.get(pos), Some(b'e') | Some(b'E')) {
        is_float = true;
        pos += 1;
        if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
            pos += 1;
        }
        let exp_start = pos;
        while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }
        if pos == exp_start {
            return Err(JsonError::InvalidNumber(start));
        }
    }
    let text =
        std::str::from_utf8(&bytes[start..pos]).map_err(|_| JsonError::InvalidNumber(start))?;
    let number = if is_float {
        Number::Float(text.parse().map_err(|_| JsonError::InvalidNumber(start))?)
    } else {
        match text.parse::<i64>() {
            Ok(i) => Number::Int(i),
            Err(_) => Number::Float(text.parse().map_err(|_| JsonError::InvalidNumber(start))?),
        }
    };
    Ok((Value::Number(number), pos))
}

fn parse_string(bytes: &[u8], start: usize) -> Result<(String, usize), JsonError> {
    debug_assert_eq!(bytes[start], b'"');
    let mut pos = start + 1;
    let mut out = String::new();
    loop {
        match bytes.get(pos) {
            None => return Err(JsonError::UnexpectedEof),
            Some(b'"') => return Ok((out, pos + 1)),
            Some(b'\\') => {
                let esc = *bytes.get(pos + 1).ok_or(JsonError::UnexpectedEof)?;
                match esc {
                    b'"' => out.push('"'),
                    b'\\' => out.push('\\'),
                    b'/' => out.push('/'),
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    b'b' => out.push('\u{8}'),
                    b'f' => out.push('\u{c}'),
                    b'u' => {
                        let hex = bytes
                            .get(pos + 2..pos + 6)
                            .and_then(|b| std::str::from_utf8(b).ok())
                            .ok_or(JsonError::InvalidEscape(pos))?;
                        let code =
                            u32::from_str_radix(hex, 16).map_err(|_| JsonError::InvalidEscape(pos))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        pos += 4;
                    }
                    _ => return Err(JsonError::InvalidEscape(pos)),
                }
                pos += 2;
            }
            Some(&c) => {
                let ch_len = utf8_len(c);
                let s = std::str::from_utf8(&bytes[pos..pos + ch_len])
                    .map_err(|_| JsonError::InvalidEscape(pos))?;
                out.push_str(s);
                pos += ch_len;
            }
        }
    }
}

fn utf8_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

fn parse_array(bytes: &[u8], start: usize) -> Result<(Value, usize), JsonError> {
    let mut pos = skip_whitespace(bytes, start + 1);
    let mut items = Vec::new();
    if bytes.get(pos) == Some(&b']') {
        return Ok((Value::seq(items), pos + 1));
    }
    loop {
        let (value, next) = parse_value(bytes, pos)?;
        items.push(value);
        pos = skip_whitespace(bytes, next);
        match bytes.get(pos) {
            Some(b',') => pos = skip_whitespace(bytes, pos + 1),
            Some(b']') => return Ok((Value::seq(items), pos + 1)),
            _ => return Err(JsonError::UnexpectedChar(bytes.get(pos).copied().unwrap_or(0) as char, pos)),
        }
    }
}

fn parse_object(bytes: &[u8], start: usize) -> Result<(Value, usize), JsonError> {
    let mut pos = skip_whitespace(bytes, start + 1);
    let mut entries = IndexMap::new();
    if bytes.get(pos) == Some(&b'}') {
        return Ok((Value::map(entries), pos + 1));
    }
    loop {
        pos = skip_whitespace(bytes, pos);
        if bytes.get(pos) != Some(&b'"') {
            return Err(JsonError::UnexpectedChar(
                bytes.get(pos).copied().unwrap_or(0) as char,
                pos,
            ));
        }
        let (key, next) = parse_string(bytes, pos)?;
        pos = skip_whitespace(bytes, next);
        if bytes.get(pos) != Some(&b':') {
            return Err(JsonError::UnexpectedChar(
                bytes.get(pos).copied().unwrap_or(0) as char,
                pos,
            ));
        }
        pos = skip_whitespace(bytes, pos + 1);
        let (value, next) = parse_value(bytes, pos)?;
        entries.insert(key, value);
        pos = skip_whitespace(bytes, next);
        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b'}') => return Ok((Value::map(entries), pos + 1)),
            _ => {
                return Err(JsonError::UnexpectedChar(
                    bytes.get(pos).copied().unwrap_or(0) as char,
                    pos,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars() {
        assert_eq!(parse_json("null").unwrap(), Value::Null);
        assert_eq!(parse_json("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_json("42").unwrap(), Value::int(42));
        assert_eq!(parse_json("3.5").unwrap(), Value::float(3.5));
        assert_eq!(parse_json("\"hi\"").unwrap(), Value::str("hi"));
    }

    #[test]
    fn parses_nested_structures() {
        let v = parse_json(r#"{"a":[1,2,{"b":true}]}"#).unwrap();
        assert_eq!(v.to_canonical_json(), r#"{"a":[1,2,{"b":true}]}"#);
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_json("1 2").is_err());
    }
}
