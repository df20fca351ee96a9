//! Identifier → word-position map and occurrence masking.

/// Placeholder written over a masked identifier occurrence
pub const MASK_TOKEN: &str = "<unk>";

/// Ordered map from identifier name to the word positions where it occurs.
///
/// Positions index into `Program::words()`. Each position belongs to exactly
/// one identifier, and the map is rebuilt whenever the program changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMap {
    entries: Vec<(String, Vec<usize>)>,
}

impl PositionMap {
    /// Map every name in `names` that occurs in `words`. Absent names and
    /// duplicates are dropped; order follows `names`.
    ///
    /// Matching is textual. Attacks pass only names that occur as
    /// identifier tokens, since renaming never touches literals or punctuation.
    pub fn build<S: AsRef<str>>(words: &[String], names: &[S]) -> Self {
        let mut entries: Vec<(String, Vec<usize>)> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if entries.iter().any(|(n, _)| n == name) {
                continue;
            }
            let positions: Vec<usize> = words
                .iter()
                .enumerate()
                .filter(|(_, w)| w.as_str() == name)
                .map(|(i, _)| i)
                .collect();
            if !positions.is_empty() {
                entries.push((name.to_string(), positions));
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&[usize]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every mapped position, ascending
    pub fn all_positions(&self) -> Vec<usize> {
        let mut all: Vec<usize> = self.entries.iter().flat_map(|(_, p)| p.iter().copied()).collect();
        all.sort_unstable();
        all
    }

    pub fn total_occurrences(&self) -> usize {
        self.entries.iter().map(|(_, p)| p.len()).sum()
    }
}

/// One masked copy of `words` per position, in the order given
pub fn mask_positions(words: &[String], positions: &[usize], placeholder: &str) -> Vec<Vec<String>> {
    positions
        .iter()
        .filter(|&&p| p < words.len())
        .map(|&p| {
            let mut masked = words.to_vec();
            masked[p] = placeholder.to_string();
            masked
        })
        .collect()
}
