//! Keyword trie: case-insensitive, longest-prefix lookup of FlowQuery
//! keywords against an input slice, used by the tokenizer to decide whether
//! an identifier-shaped run of characters is actually a keyword.

use once_cell::sync::Lazy;

use crate::tokens::TokenKind;

#[derive(Default)]
struct Node {
    children: std::collections::HashMap<char, Node>,
    /// Payload stored at an accepting node.
    accept: Option<TokenKind>,
}

pub struct KeywordTrie {
    root: Node,
}

/// Result of a trie lookup: the matched token kind and how many input
/// characters it consumed.
pub struct Match {
    pub kind: TokenKind,
    pub chars_consumed: usize,
}

impl KeywordTrie {
    fn new() -> Self {
        Self {
            root: Node::default(),
        }
    }

    fn insert(&mut self, word: &str, kind: TokenKind) {
        let mut node = &mut self.root;
        for c in word.chars() {
            node = node
                .children
                .entry(c.to_ascii_lowercase())
                .or_insert_with(Node::default);
        }
        node.accept = Some(kind);
    }

    /// Walk `chars` from the start, remembering the longest accepting node
    /// seen. Returns `None` if no prefix of `chars` is a keyword.
    pub fn longest_match(&self, chars: &[char]) -> Option<Match> {
        let mut node = &self.root;
        let mut best: Option<Match> = None;
        for (i, &c) in chars.iter().enumerate() {
            let next = node.children.get(&c.to_ascii_lowercase())?;
            node = next;
            if let Some(kind) = &node.accept {
                best = Some(Match {
                    kind: kind.clone(),
                    chars_consumed: i + 1,
                });
            }
        }
        best
    }
}

pub static KEYWORDS: Lazy<KeywordTrie> = Lazy::new(|| {
    use TokenKind::*;
    let mut trie = KeywordTrie::new();
    let entries: &[(&str, TokenKind)] = &[
        ("with", With),
        ("unwind", Unwind),
        ("return", Return),
        ("load", Load),
        ("call", Call),
        ("yield", Yield),
        ("where", Where),
        ("limit", Limit),
        ("from", From),
        ("as", As),
        ("json", Json),
        ("csv", Csv),
        ("text", Text),
        ("headers", Headers),
        ("post", Post),
        ("case", Case),
        ("when", When),
        ("then", Then),
        ("else", Else),
        ("end", End),
        ("distinct", Distinct),
        ("not", Not),
        ("and", And),
        ("or", Or),
        ("is", Is),
        ("in", In),
        ("null", Null),
    ];
    for (word, kind) in entries {
        trie.insert(word, kind.clone());
    }
    trie
});

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn matches_case_insensitively() {
        let m = KEYWORDS.longest_match(&chars("RETURN 1")).unwrap();
        assert_eq!(m.kind, TokenKind::Return);
        assert_eq!(m.chars_consumed, 6);
    }

    #[test]
    fn returns_longest_accepting_prefix() {
        // "in" is a keyword and a prefix of the identifier "index" — an
        // identifier boundary check happens in the tokenizer, not here; the
        // trie itself should still only report the keyword-length match.
        let m = KEYWORDS.longest_match(&chars("in")).unwrap();
        assert_eq!(m.chars_consumed, 2);
    }

    #[test]
    fn no_match_for_non_keyword() {
        assert!(KEYWORDS.longest_match(&chars("foobar")).is_none());
    }
}
