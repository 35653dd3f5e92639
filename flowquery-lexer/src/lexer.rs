//! Single left-to-right tokenizer scan (C3). Whitespace and comments are
//! kept in the stream; the operation parser consults them to enforce
//! required spacing between adjacent keywords.

use flowquery_core::{strings, Span};
use thiserror::Error;

use crate::keywords::KEYWORDS;
use crate::tokens::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}, col {col}")]
    UnexpectedChar { ch: char, line: usize, col: usize },
    #[error("unterminated string at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("unterminated comment at line {line}, col {col}")]
    UnterminatedComment { line: usize, col: usize },
    #[error("unterminated f-string expression at line {line}, col {col}")]
    UnterminatedInterpolation { line: usize, col: usize },
    #[error("invalid number at line {line}, col {col}")]
    InvalidNumber { line: usize, col: usize },
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    byte_offset: usize,
    /// Tokens already produced but not yet returned — f-strings decompose
    /// into several tokens (segment / brace / hole tokens / brace / …) from
    /// a single dispatch point, so they are queued here and drained first.
    pending: std::collections::VecDeque<Token>,
}

/// Tokenize a complete source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            byte_offset: 0,
            pending: std::collections::VecDeque::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span_from(&self, start_offset: usize, start_line: usize, start_col: usize) -> Span {
        Span::new(start_offset, self.byte_offset, start_line, start_col)
    }

    /// Drive the full scan, returning every token including a trailing `EOF`.
    pub fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(tok) = self.pending.pop_front() {
            return Ok(tok);
        }
        self.scan_plain_token()
    }

    /// Dispatch for every token kind except the f-string entry point; also
    /// used while scanning the contents of an `f"…{ }…"` hole, where nested
    /// f-strings and ordinary punctuation/operands are tokenized the same
    /// way as at the top level.
    fn scan_plain_token(&mut self) -> Result<Token, LexError> {
        let Some(c) = self.current() else {
            return Ok(Token::new(
                TokenKind::Eof,
                self.span_from(self.byte_offset, self.line, self.col),
            ));
        };

        if c.is_whitespace() {
            return self.scan_whitespace();
        }
        if c == '/' && matches!(self.peek_at(1), Some('/') | Some('*')) {
            return self.scan_comment();
        }
        if c.is_ascii_digit() {
            return self.scan_number();
        }
        if c == '"' || c == '\'' || c == '`' {
            return self.scan_string(c);
        }
        if c == 'f' && matches!(self.peek_at(1), Some('"') | Some('\'')) {
            self.scan_fstring()?;
            return Ok(self
                .pending
                .pop_front()
                .expect("scan_fstring always queues at least one segment"));
        }
        if strings::is_identifier_start(c) {
            return self.scan_identifier_or_keyword();
        }
        self.scan_punctuation()
    }

    fn scan_whitespace(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        while self.current().is_some_and(char::is_whitespace) {
            self.advance();
        }
        Ok(Token::new(TokenKind::Whitespace, self.span_from(so, sl, sc)))
    }

    fn scan_comment(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // '/'
        if self.current() == Some('/') {
            while self.current().is_some_and(|c| c != '\n') {
                self.advance();
            }
        } else {
            self.advance(); // '*'
            loop {
                match (self.current(), self.peek_at(1)) {
                    (Some('*'), Some('/')) => {
                        self.advance();
                        self.advance();
                        break;
                    }
                    (None, _) => {
                        return Err(LexError::UnterminatedComment { line: sl, col: sc })
                    }
                    _ => {
                        self.advance();
                    }
                }
            }
        }
        Ok(Token::new(TokenKind::Comment, self.span_from(so, sl, sc)))
    }

    fn scan_number(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let start = self.pos;
        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.current() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.current().is_some_and(|c| c.is_ascii_digit()) {
                while self.current().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }
        let text: String = self.source[start..self.pos].iter().collect();
        let value: f64 = text
            .parse()
            .map_err(|_| LexError::InvalidNumber { line: sl, col: sc })?;
        Ok(Token::new(
            TokenKind::Number(value),
            self.span_from(so, sl, sc),
        ))
    }

    fn scan_string(&mut self, quote: char) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // opening quote
        let mut body = String::new();
        loop {
            match self.current() {
                None => return Err(LexError::UnterminatedString { line: sl, col: sc }),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    body.push('\\');
                    self.advance();
                    if let Some(escaped) = self.current() {
                        body.push(escaped);
                        self.advance();
                    }
                }
                Some(c) => {
                    body.push(c);
                    self.advance();
                }
            }
        }
        let unescaped = strings::unescape(&body, quote);
        Ok(Token::new(
            TokenKind::String(unescaped),
            self.span_from(so, sl, sc),
        ))
    }

    /// Scan one `f"…"` literal into its full token sequence — alternating
    /// `FStringSegment` literal chunks with `{` hole-tokens `}` for each
    /// embedded expression — and queue it onto `self.pending`. `{{`/`}}`
    /// collapse to a literal brace; nested braces inside a hole (e.g. a map
    /// literal) are tracked so the hole's own `}` isn't mistaken for the
    /// one that closes it.
    fn scan_fstring(&mut self) -> Result<(), LexError> {
        let (sl, sc) = (self.line, self.col);
        self.advance(); // 'f'
        let quote = self.advance().expect("checked by caller");
        let mut out = Vec::new();
        loop {
            let (seg_so, seg_sl, seg_sc) = (self.byte_offset, self.line, self.col);
            let mut literal = String::new();
            let hit_closing_quote = loop {
                match self.current() {
                    None => return Err(LexError::UnterminatedString { line: sl, col: sc }),
                    Some(c) if c == quote => {
                        self.advance();
                        break true;
                    }
                    Some('{') if self.peek_at(1) == Some('{') => {
                        literal.push('{');
                        self.advance();
                        self.advance();
                    }
                    Some('}') if self.peek_at(1) == Some('}') => {
                        literal.push('}');
                        self.advance();
                        self.advance();
                    }
                    Some('{') => break false,
                    Some(c) => {
                        literal.push(c);
                        self.advance();
                    }
                }
            };
            out.push(Token::new(
                TokenKind::FStringSegment(literal),
                self.span_from(seg_so, seg_sl, seg_sc),
            ));
            if hit_closing_quote {
                break;
            }

            let (brace_so, brace_sl, brace_sc) = (self.byte_offset, self.line, self.col);
            self.advance(); // '{'
            out.push(Token::new(
                TokenKind::LBrace,
                self.span_from(brace_so, brace_sl, brace_sc),
            ));

            let mut depth: u32 = 0;
            loop {
                let tok = self.scan_plain_token()?;
                match tok.kind {
                    TokenKind::Eof => {
                        return Err(LexError::UnterminatedInterpolation { line: sl, col: sc })
                    }
                    TokenKind::LBrace => {
                        depth += 1;
                        out.push(tok);
                    }
                    TokenKind::RBrace if depth > 0 => {
                        depth -= 1;
                        out.push(tok);
                    }
                    TokenKind::RBrace => {
                        out.push(tok);
                        break;
                    }
                    _ => out.push(tok),
                }
            }
        }
        self.pending.extend(out);
        Ok(())
    }

    fn scan_identifier_or_keyword(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let start = self.pos;
        while self.current().is_some_and(strings::is_identifier_continue) {
            self.advance();
        }
        let chars = &self.source[start..self.pos];
        if let Some(m) = KEYWORDS.longest_match(chars) {
            if m.chars_consumed == chars.len() {
                return Ok(Token::new(m.kind, self.span_from(so, sl, sc)));
            }
        }
        let text: String = chars.iter().collect();
        Ok(Token::new(
            TokenKind::Identifier(text),
            self.span_from(so, sl, sc),
        ))
    }

    fn scan_punctuation(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let c = self.advance().unwrap();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '|' => TokenKind::Pipe,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '=' => TokenKind::Eq,
            '<' => {
                if self.current() == Some('>') {
                    self.advance();
                    TokenKind::NotEq
                } else if self.current() == Some('=') {
                    self.advance();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(LexError::UnexpectedChar {
                    ch: other,
                    line: sl,
                    col: sc,
                })
            }
        };
        Ok(Token::new(kind, self.span_from(so, sl, sc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !k.is_trivia())
            .collect()
    }

    #[test]
    fn tokenizes_simple_return() {
        let ks = kinds("RETURN 1 + 2 AS sum");
        assert_eq!(
            ks,
            vec![
                TokenKind::Return,
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::As,
                TokenKind::Identifier("sum".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keyword_is_not_confused_with_longer_identifier() {
        let ks = kinds("RETURN index");
        assert_eq!(
            ks,
            vec![
                TokenKind::Return,
                TokenKind::Identifier("index".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_comparison_operators() {
        let ks = kinds("a <= b <> c >= d < e > f");
        assert_eq!(
            ks,
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::LtEq,
                TokenKind::Identifier("b".into()),
                TokenKind::NotEq,
                TokenKind::Identifier("c".into()),
                TokenKind::GtEq,
                TokenKind::Identifier("d".into()),
                TokenKind::Lt,
                TokenKind::Identifier("e".into()),
                TokenKind::Gt,
                TokenKind::Identifier("f".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_quoted_strings_with_escapes() {
        let ks = kinds(r#"RETURN "a\"b" AS s"#);
        assert_eq!(ks[1], TokenKind::String("a\"b".to_string()));
    }

    #[test]
    fn preserves_whitespace_and_comments_in_raw_stream() {
        let toks = tokenize("RETURN /* c */ 1").unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Comment));
    }

    #[test]
    fn fstring_decomposes_into_segments_and_holes() {
        let ks = kinds(r#"RETURN f"hi {name}!" AS s"#);
        assert_eq!(
            ks,
            vec![
                TokenKind::Return,
                TokenKind::FStringSegment("hi ".into()),
                TokenKind::LBrace,
                TokenKind::Identifier("name".into()),
                TokenKind::RBrace,
                TokenKind::FStringSegment("!".into()),
                TokenKind::As,
                TokenKind::Identifier("s".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn fstring_collapses_doubled_braces() {
        let ks = kinds(r#"RETURN f"{{x}}""#);
        assert_eq!(
            ks,
            vec![
                TokenKind::Return,
                TokenKind::FStringSegment("{x}".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn fstring_tracks_nested_braces_in_hole() {
        // the hole itself contains a map literal, whose braces must not be
        // mistaken for the hole-closing brace.
        let ks = kinds(r#"RETURN f"v={size({a: 1})}""#);
        assert_eq!(
            ks,
            vec![
                TokenKind::Return,
                TokenKind::FStringSegment("v=".into()),
                TokenKind::LBrace,
                TokenKind::Identifier("size".into()),
                TokenKind::LParen,
                TokenKind::LBrace,
                TokenKind::Identifier("a".into()),
                TokenKind::Colon,
                TokenKind::Number(1.0),
                TokenKind::RBrace,
                TokenKind::RParen,
                TokenKind::RBrace,
                TokenKind::FStringSegment("".into()),
                TokenKind::Eof,
            ]
        );
    }
}
