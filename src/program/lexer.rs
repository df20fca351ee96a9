//! Lossless lexer for C-family source text.
//!
//! Every character of the input lands in exactly one token, so concatenating
//! token texts reproduces the source byte-for-byte. Renaming operates on
//! `Ident` tokens only; literals and comments are never touched.

use serde::{Deserialize, Serialize};

/// Lexical class of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Char,
    Punct,
    Comment,
    Whitespace,
}

impl TokenKind {
    /// Whitespace and comments carry no meaning for the model input
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }
}

/// A single lexed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == symbol
    }
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Split source text into tokens
pub fn lex(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        let kind = if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            TokenKind::Whitespace
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            TokenKind::Comment
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            TokenKind::Comment
        } else if c == '"' {
            i = skip_quoted(&chars, i, '"');
            TokenKind::Str
        } else if c == '\'' {
            i = skip_quoted(&chars, i, '\'');
            TokenKind::Char
        } else if is_ident_start(c) {
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() {
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_')
            {
                i += 1;
            }
            TokenKind::Number
        } else {
            i += 1;
            TokenKind::Punct
        };

        tokens.push(Token {
            kind,
            text: chars[start..i].iter().collect(),
        });
    }

    tokens
}

/// Returns the index one past the closing quote. Unterminated literals stop
/// at the end of the line.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .filter(|t| !t.kind.is_trivia())
            .map(|t| t.text.as_str())
            .collect()
    }

    #[test]
    fn test_lex_is_lossless() {
        let src = "int foo(int a,int b){ /* sum */ return a+b; } // done\n";
        let tokens = lex(src);
        let rebuilt: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn test_lex_basic_function() {
        let tokens = lex("int foo(int a,int b){return a+b;}");
        assert_eq!(
            texts(&tokens),
            vec![
                "int", "foo", "(", "int", "a", ",", "int", "b", ")", "{", "return", "a", "+",
                "b", ";", "}"
            ]
        );
    }

    #[test]
    fn test_lex_literals_are_opaque() {
        let tokens = lex(r#"printf("a = %d\n", a); c = 'a';"#);
        let strs: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Str || t.kind == TokenKind::Char)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(strs, vec![r#""a = %d\n""#, "'a'"]);
        assert_eq!(tokens.iter().filter(|t| t.is_ident("a")).count(), 1);
    }

    #[test]
    fn test_lex_unterminated_literal_and_comment() {
        let tokens = lex("s = \"open\nx /* never closed");
        let rebuilt: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, "s = \"open\nx /* never closed");
        assert!(tokens.iter().any(|t| t.is_ident("x")));
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Comment));
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = lex("x = 0x1F + 3.5f;");
        let numbers: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(numbers, vec!["0x1F", "3.5f"]);
    }
}
