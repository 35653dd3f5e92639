use flowquery_core::Span;

/// Token kinds for the FlowQuery language. Kinds are disjoint; whitespace and
/// comments are preserved so the parser can enforce keyword-boundary spacing.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    Number(f64),
    /// Original text of a string literal, already unescaped and unquoted.
    String(String),
    Identifier(String),
    /// One chunk of an f-string: literal text between `{` / `}` holes.
    FStringSegment(String),

    // Keywords
    With,
    Unwind,
    Return,
    Load,
    Call,
    Yield,
    Where,
    Limit,
    From,
    As,
    Json,
    Csv,
    Text,
    Headers,
    Post,
    Case,
    When,
    Then,
    Else,
    End,
    Distinct,
    Not,
    And,
    Or,
    Is,
    In,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Pipe,

    // Binary operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    Eof,
}

impl TokenKind {
    /// Whether this token kind represents a FlowQuery keyword (used by the
    /// operation parser to check `expectWhitespaceAndComments` at the right
    /// boundaries, and by the expression parser's operand/operator logic).
    pub fn is_keyword(&self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            With | Unwind
                | Return
                | Load
                | Call
                | Yield
                | Where
                | Limit
                | From
                | As
                | Json
                | Csv
                | Text
                | Headers
                | Post
                | Case
                | When
                | Then
                | Else
                | End
                | Distinct
                | Not
                | And
                | Or
                | Is
                | In
                | Null
        )
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
