//! ═══════════════════════════════════════════════════════════════════════════════
//! SUBSTITUTES — Candidate Replacement Names
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Substitution tables arrive from outside (masked-LM suggestions) as JSON
//! objects `{identifier: [candidate, ...]}`. Order matters: it fixes the
//! greedy and genetic iteration order, so the table keeps insertion order
//! instead of hashing.
//! ═══════════════════════════════════════════════════════════════════════════════

use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::program::lexer::{is_ident_continue, is_ident_start};
use crate::program::{IdentifierExtractor, Program, TokenKind};

/// True if `name` lexes as a single identifier token
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => chars.all(is_ident_continue),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSTITUTION TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered identifier → candidate names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionTable {
    entries: Vec<(String, Vec<String>)>,
}

impl SubstitutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or extend an entry; candidates keep first-seen order without repeats
    pub fn insert<I, S>(&mut self, name: impl Into<String>, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let idx = match self.entries.iter().position(|(n, _)| *n == name) {
            Some(i) => i,
            None => {
                self.entries.push((name, Vec::new()));
                self.entries.len() - 1
            }
        };
        let list = &mut self.entries[idx].1;
        for c in candidates {
            let c = c.into();
            if !list.contains(&c) {
                list.push(c);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries whose key occurs as an identifier in `program`
    pub fn restrict_to(&self, program: &Program) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(n, _)| program.contains_identifier(n))
                .cloned()
                .collect(),
        }
    }

    /// Drop reserved keys, invalid candidates, self-substitutions and
    /// candidates that already name another identifier in the program.
    /// Entries left with no candidates are removed.
    pub fn sanitize(&self, program: &Program, extractor: &dyn IdentifierExtractor) -> Self {
        let existing: Vec<&str> = program
            .tokens()
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text.as_str())
            .collect();

        let entries = self
            .entries
            .iter()
            .filter(|(n, _)| !extractor.is_reserved(n))
            .filter_map(|(n, cands)| {
                let kept: Vec<String> = cands
                    .iter()
                    .filter(|c| {
                        c.as_str() != n.as_str()
                            && is_valid_identifier(c)
                            && !extractor.is_reserved(c)
                            && !existing.contains(&c.as_str())
                    })
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (n.clone(), kept))
            })
            .collect();
        Self { entries }
    }

    /// Union of several tables: keys and candidates in first-seen order
    pub fn merge<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a SubstitutionTable>,
    {
        let mut merged = Self::new();
        for table in tables {
            for (name, cands) in table.iter() {
                merged.insert(name, cands.iter().cloned());
            }
        }
        merged
    }
}

impl<K, V, S> FromIterator<(K, V)> for SubstitutionTable
where
    K: Into<String>,
    V: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

impl Serialize for SubstitutionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, cands) in &self.entries {
            map.serialize_entry(name, cands)?;
        }
        map.end()
    }
}

struct TableVisitor;

impl<'de> Visitor<'de> for TableVisitor {
    type Value = SubstitutionTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of identifier to candidate names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut table = SubstitutionTable::new();
        while let Some((name, cands)) = access.next_entry::<String, Vec<String>>()? {
            table.insert(name, cands);
        }
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for SubstitutionTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TableVisitor)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOCABULARY
// ═══════════════════════════════════════════════════════════════════════════════

/// Global candidate pool for vocabulary-driven MHM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    /// Valid identifiers from `tokens`, deduplicated in first-seen order
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut kept: Vec<String> = Vec::new();
        for t in tokens {
            let t = t.into();
            if is_valid_identifier(&t) && !kept.contains(&t) {
                kept.push(t);
            }
        }
        Self { tokens: kept }
    }

    /// Every identifier token of every program
    pub fn from_programs<'a, I>(programs: I) -> Self
    where
        I: IntoIterator<Item = &'a Program>,
    {
        Self::new(
            programs
                .into_iter()
                .flat_map(|p| p.identifiers().map(str::to_string).collect::<Vec<_>>()),
        )
    }

    /// Up to `n` distinct tokens, uniformly without replacement
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<String> {
        self.tokens.choose_multiple(rng, n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
