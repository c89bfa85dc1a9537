//! Tokenizer for preprocessed Tamarin source.

use std::fmt;

use smol_str::SmolStr;

use crate::diagnostics::Diagnostic;
use crate::query::fingerprint::Fingerprint;

pub const KEYWORDS: &[&str] = &[
    "fn", "let", "while", "loop", "if", "else", "return", "break", "true", "false",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Int,
    Keyword,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: SmolStr,
    /// 1-based source line.
    pub line: u32,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
}

impl TokenStream {
    pub fn stable_digest(&self) -> Fingerprint {
        let mut dump = String::new();
        for token in &self.tokens {
            dump.push_str(&token.text);
            dump.push('\u{1f}');
        }
        Fingerprint::of_str(&dump)
    }
}

/// Multi-character punctuation, longest first so `==` wins over `=`.
const PUNCTS: &[&str] = &[
    "->", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "{", "}", ",", ";", ":", "=", "+", "-",
    "*", "/", "<", ">", "!",
];

pub fn tokenize(text: &str) -> (TokenStream, Vec<Diagnostic>) {
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let mut rest = line;
        'line: while !rest.is_empty() {
            let c = rest.chars().next().unwrap();
            if c.is_whitespace() {
                rest = &rest[c.len_utf8()..];
                continue;
            }
            if c.is_ascii_digit() {
                let end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                tokens.push(Token {
                    kind: TokenKind::Int,
                    text: rest[..end].into(),
                    line: line_no,
                });
                rest = &rest[end..];
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                let end = rest
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(rest.len());
                let text = &rest[..end];
                let kind = if KEYWORDS.contains(&text) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Ident
                };
                tokens.push(Token {
                    kind,
                    text: text.into(),
                    line: line_no,
                });
                rest = &rest[end..];
                continue;
            }
            for punct in PUNCTS {
                if let Some(after) = rest.strip_prefix(punct) {
                    tokens.push(Token {
                        kind: TokenKind::Punct,
                        text: (*punct).into(),
                        line: line_no,
                    });
                    rest = after;
                    continue 'line;
                }
            }
            diagnostics
                .push(Diagnostic::error("lex", format!("unexpected character `{c}`")).at_line(line_no));
            rest = &rest[c.len_utf8()..];
        }
    }

    (TokenStream { tokens }, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        let (stream, diags) = tokenize(input);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        stream.tokens.iter().map(|t| t.text.to_string()).collect()
    }

    #[test]
    fn splits_idents_ints_and_puncts() {
        assert_eq!(
            texts("let x1 = 42;"),
            ["let", "x1", "=", "42", ";"]
        );
    }

    #[test]
    fn multi_char_puncts_win() {
        assert_eq!(texts("a <= b -> c == d"), ["a", "<=", "b", "->", "c", "==", "d"]);
    }

    #[test]
    fn keywords_are_classified() {
        let (stream, _) = tokenize("while whilex");
        assert_eq!(stream.tokens[0].kind, TokenKind::Keyword);
        assert_eq!(stream.tokens[1].kind, TokenKind::Ident);
    }

    #[test]
    fn lines_are_tracked() {
        let (stream, _) = tokenize("a\nb\n\nc");
        let lines: Vec<u32> = stream.tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, [1, 2, 4]);
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let (stream, diags) = tokenize("a @ b");
        assert_eq!(diags.len(), 1);
        assert_eq!(stream.tokens.len(), 2);
    }

    #[test]
    fn digest_distinguishes_token_boundaries() {
        let (a, _) = tokenize("ab c");
        let (b, _) = tokenize("a bc");
        assert_ne!(a.stable_digest(), b.stable_digest());
    }
}
