//! Pure string/identifier helpers shared by the lexer and the expression
//! evaluator: quote stripping, comment unwrapping, escape handling, and
//! identifier classification.

/// Strip one layer of matching `"`, `'`, or back-tick quotes from `s`.
///
/// Falls back to stripping a leading quote alone if the trailing character
/// does not match (asymmetric input), rather than refusing to strip at all.
pub fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return s;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if matches!(first, b'"' | b'\'' | b'`') {
        if first == last {
            return &s[1..s.len() - 1];
        }
        return &s[1..];
    }
    s
}

/// Strip a `// ...` or `/* ... */` comment wrapper, returning the inner text.
/// Returns `None` if `s` is not a recognised comment form.
pub fn strip_comment_wrapper(s: &str) -> Option<&str> {
    if let Some(rest) = s.strip_prefix("//") {
        return Some(rest);
    }
    if let Some(rest) = s.strip_prefix("/*") {
        return rest.strip_suffix("*/");
    }
    None
}

/// Unescape `\"`, `\'`, and `` \` `` inside a quoted string body. Any other
/// backslash escape is passed through unchanged (the character after the
/// backslash is kept verbatim, the backslash dropped is only ever the three
/// quote-escaping forms the language defines).
pub fn unescape(body: &str, quote: char) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == quote => {
                    out.push(next);
                    chars.next();
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Collapse `{{` into `{` and `}}` into `}` inside f-string literal chunks.
pub fn collapse_fstring_braces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                out.push('{');
                chars.next();
            }
            '}' if chars.peek() == Some(&'}') => {
                out.push('}');
                chars.next();
            }
            other => out.push(other),
        }
    }
    out
}

/// First character of an identifier: letter or underscore.
pub fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Non-first characters of an identifier: alphanumeric or underscore.
pub fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `s` is a well-formed identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_identifier_start(c) => chars.all(is_identifier_continue),
        _ => false,
    }
}

/// Case-insensitive identifier/keyword comparison.
pub fn ident_eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_quotes_matching() {
        assert_eq!(strip_quotes("\"hi\""), "hi");
        assert_eq!(strip_quotes("'hi'"), "hi");
        assert_eq!(strip_quotes("`hi`"), "hi");
    }

    #[test]
    fn strip_quotes_asymmetric_falls_back_to_leading() {
        assert_eq!(strip_quotes("\"hi"), "hi");
    }

    #[test]
    fn strip_comment_wrapper_line_and_block() {
        assert_eq!(strip_comment_wrapper("// hi"), Some(" hi"));
        assert_eq!(strip_comment_wrapper("/* hi */"), Some(" hi "));
        assert_eq!(strip_comment_wrapper("hi"), None);
    }

    #[test]
    fn unescape_quote_forms() {
        assert_eq!(unescape(r#"a\"b"#, '"'), "a\"b");
        assert_eq!(unescape(r"a\'b", '\''), "a'b");
        assert_eq!(unescape(r"a\\b", '"'), r"a\b");
    }

    #[test]
    fn collapse_braces() {
        assert_eq!(collapse_fstring_braces("{{x}}"), "{x}");
        assert_eq!(collapse_fstring_braces("a{{}}b"), "a{}b");
    }

    #[test]
    fn identifier_predicate() {
        assert!(is_identifier("name"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn identifier_case_insensitive() {
        assert!(ident_eq_ignore_case("RETURN", "return"));
        assert!(!ident_eq_ignore_case("RETURN", "with"));
    }
}
