//! ═══════════════════════════════════════════════════════════════════════════════
//! PROGRAM — Source Programs, Identifiers, Renaming
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! A program is a lossless token stream. Renaming is scoped to "every
//! occurrence of identifier X", so identifiers are addressed by name and the
//! position map is recomputed from the token stream whenever it is needed.
//!
//!   lexer      — lossless C-family tokenizer
//!   extractor  — per-language identifier extraction (capability interface)
//!   positions  — identifier → word positions, masking
//! ═══════════════════════════════════════════════════════════════════════════════

pub mod extractor;
pub mod lexer;
pub mod positions;

pub use extractor::{CFamilyExtractor, IdentifierExtractor};
pub use lexer::{lex, Token, TokenKind};
pub use positions::{mask_positions, PositionMap, MASK_TOKEN};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════════════
// LANGUAGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Source language of the attacked program. Selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    C,
    Cpp,
    Java,
}

impl Language {
    pub fn name(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }

    /// Identifier extractor for this language
    pub fn extractor(self) -> CFamilyExtractor {
        CFamilyExtractor::new(self)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRAM
// ═══════════════════════════════════════════════════════════════════════════════

/// A source program as a lossless token stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    tokens: Vec<Token>,
}

impl Program {
    pub fn parse(source: &str) -> Self {
        Self {
            tokens: lex(source),
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Original source text (exact, including whitespace and comments)
    pub fn source(&self) -> String {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    /// Code tokens without trivia. Position maps index into this list.
    pub fn words(&self) -> Vec<String> {
        self.tokens
            .iter()
            .filter(|t| !t.kind.is_trivia())
            .map(|t| t.text.clone())
            .collect()
    }

    /// Number of code tokens
    pub fn len(&self) -> usize {
        self.tokens.iter().filter(|t| !t.kind.is_trivia()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Code tokens joined by single spaces; this is what the model sees
    pub fn normalized(&self) -> String {
        self.words().join(" ")
    }

    /// Identifier token texts in source order (with repeats)
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text.as_str())
    }

    pub fn contains_identifier(&self, name: &str) -> bool {
        self.tokens.iter().any(|t| t.is_ident(name))
    }

    pub fn occurrences(&self, name: &str) -> usize {
        self.tokens.iter().filter(|t| t.is_ident(name)).count()
    }

    /// Rename every occurrence of identifier `old` to `new`
    pub fn rename(&self, old: &str, new: &str) -> Program {
        let tokens = self
            .tokens
            .iter()
            .map(|t| {
                if t.is_ident(old) {
                    Token::new(TokenKind::Ident, new)
                } else {
                    t.clone()
                }
            })
            .collect();
        Program { tokens }
    }

    /// Apply several renames simultaneously (`a→b, b→a` swaps names)
    pub fn rename_all<'a, I>(&self, renames: I) -> Program
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let map: HashMap<&str, &str> = renames.into_iter().filter(|(o, n)| o != n).collect();
        if map.is_empty() {
            return self.clone();
        }
        let tokens = self
            .tokens
            .iter()
            .map(|t| match map.get(t.text.as_str()) {
                Some(new) if t.kind == TokenKind::Ident => Token::new(TokenKind::Ident, *new),
                _ => t.clone(),
            })
            .collect();
        Program { tokens }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.tokens {
            f.write_str(&t.text)?;
        }
        Ok(())
    }
}

impl From<&str> for Program {
    fn from(source: &str) -> Self {
        Program::parse(source)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
