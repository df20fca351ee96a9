//! ═══════════════════════════════════════════════════════════════════════════════
//! FEATURE — Oracle Input Encoding
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Turns a candidate program into the fixed-format input the oracle expects:
//! whitespace-normalized text, subword tokens, ids, optional boundary tokens
//! and padding. Oversized input is truncated, never rejected.
//!
//! Features are rebuilt for every oracle call. Renaming can change the
//! subword count of an identifier, so nothing downstream may rely on token
//! offsets surviving a rename.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};

pub const CLS_TOKEN: &str = "<s>";
pub const SEP_TOKEN: &str = "</s>";
pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

const SPECIAL_TOKENS: [&str; 4] = [CLS_TOKEN, SEP_TOKEN, PAD_TOKEN, UNK_TOKEN];

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// Subword tokenizer of the target model
pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Vec<String>;
    fn token_id(&self, token: &str) -> u32;
}

/// Default tokenizer: splits identifiers on `_` and camelCase humps and
/// hashes pieces into a fixed id space. Ids 0..4 belong to special tokens.
#[derive(Debug, Clone)]
pub struct HashingTokenizer {
    pub vocab_size: u32,
}

impl Default for HashingTokenizer {
    fn default() -> Self {
        Self { vocab_size: 50_265 }
    }
}

impl HashingTokenizer {
    fn split_word(word: &str, out: &mut Vec<String>) {
        if SPECIAL_TOKENS.contains(&word) {
            out.push(word.to_string());
            return;
        }
        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut prev_lower = false;
        for c in word.chars() {
            if c == '_' {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.push("_".to_string());
                prev_lower = false;
                continue;
            }
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        for (i, p) in pieces.into_iter().enumerate() {
            if i == 0 {
                out.push(p);
            } else {
                out.push(format!("##{}", p));
            }
        }
    }
}

impl Tokenizer for HashingTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for word in text.split_whitespace() {
            Self::split_word(word, &mut out);
        }
        out
    }

    fn token_id(&self, token: &str) -> u32 {
        if let Some(i) = SPECIAL_TOKENS.iter().position(|s| *s == token) {
            return i as u32;
        }
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in token.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        let span = self.vocab_size.saturating_sub(SPECIAL_TOKENS.len() as u32).max(1);
        SPECIAL_TOKENS.len() as u32 + (hash % span as u64) as u32
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURES
// ═══════════════════════════════════════════════════════════════════════════════

/// Input layout expected by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// Classification: truncate, wrap with `<s> … </s>`, pad to block size
    #[default]
    Bounded,
    /// Generation: plain token stream, no boundary tokens or padding
    Raw,
}

/// One oracle-ready program variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Normalized source text the tokens were built from
    pub text: String,
    pub tokens: Vec<String>,
    pub ids: Vec<u32>,
    /// Ground-truth label when known
    pub label: Option<usize>,
    /// Expected answer a generation oracle scores its output against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Feature {
    /// Number of non-padding tokens
    pub fn effective_len(&self) -> usize {
        self.tokens.iter().filter(|t| t.as_str() != PAD_TOKEN).count()
    }
}

/// Builds features for one oracle
pub struct FeatureBuilder {
    tokenizer: Box<dyn Tokenizer>,
    pub block_size: usize,
    pub layout: FeatureLayout,
}

impl std::fmt::Debug for FeatureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBuilder")
            .field("block_size", &self.block_size)
            .field("layout", &self.layout)
            .finish()
    }
}

impl FeatureBuilder {
    pub fn new(block_size: usize, layout: FeatureLayout) -> Self {
        Self::with_tokenizer(Box::new(HashingTokenizer::default()), block_size, layout)
    }

    pub fn with_tokenizer(tokenizer: Box<dyn Tokenizer>, block_size: usize, layout: FeatureLayout) -> Self {
        Self {
            tokenizer,
            block_size,
            layout,
        }
    }

    /// Encode one program text
    pub fn build(&self, text: &str, label: Option<usize>) -> Feature {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut tokens = self.tokenizer.tokenize(&text);

        if self.layout == FeatureLayout::Bounded {
            tokens.truncate(self.block_size.saturating_sub(2));
            tokens.insert(0, CLS_TOKEN.to_string());
            tokens.push(SEP_TOKEN.to_string());
            while tokens.len() < self.block_size {
                tokens.push(PAD_TOKEN.to_string());
            }
        }

        let ids = tokens.iter().map(|t| self.tokenizer.token_id(t)).collect();
        Feature {
            text,
            tokens,
            ids,
            label,
            reference: None,
        }
    }

    pub fn pad_id(&self) -> u32 {
        self.tokenizer.token_id(PAD_TOKEN)
    }

    pub fn build_batch<S: AsRef<str>>(&self, texts: &[S], label: Option<usize>) -> Vec<Feature> {
        texts.iter().map(|t| self.build(t.as_ref(), label)).collect()
    }
}

/// Re-pad a batch so every feature has the length of the longest one.
/// Only meaningful for the bounded layout; raw batches are left untouched.
pub fn align_batch(batch: &mut [Feature], layout: FeatureLayout, pad_id: u32) {
    if layout == FeatureLayout::Raw {
        return;
    }
    let width = batch.iter().map(|f| f.ids.len()).max().unwrap_or(0);
    for f in batch.iter_mut() {
        while f.ids.len() < width {
            f.ids.push(pad_id);
            f.tokens.push(PAD_TOKEN.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subword_split() {
        let tok = HashingTokenizer::default();
        assert_eq!(tok.tokenize("getValue"), vec!["get", "##Value"]);
        assert_eq!(tok.tokenize("max_len"), vec!["max", "##_", "##len"]);
        assert_eq!(tok.tokenize("<unk> + 1"), vec!["<unk>", "+", "1"]);
    }

    #[test]
    fn test_special_ids_reserved() {
        let tok = HashingTokenizer::default();
        assert_eq!(tok.token_id(CLS_TOKEN), 0);
        assert_eq!(tok.token_id(PAD_TOKEN), 2);
        assert!(tok.token_id("foo") >= 4);
        assert_eq!(tok.token_id("foo"), tok.token_id("foo"));
    }

    #[test]
    fn test_bounded_layout_pads_and_wraps() {
        let fb = FeatureBuilder::new(8, FeatureLayout::Bounded);
        let f = fb.build("int  x =\n1 ;", Some(1));
        assert_eq!(f.text, "int x = 1 ;");
        assert_eq!(f.tokens.len(), 8);
        assert_eq!(f.ids.len(), 8);
        assert_eq!(f.tokens[0], CLS_TOKEN);
        assert_eq!(f.tokens[6], SEP_TOKEN);
        assert_eq!(f.tokens[7], PAD_TOKEN);
        assert_eq!(f.effective_len(), 7);
    }

    #[test]
    fn test_bounded_layout_truncates() {
        let fb = FeatureBuilder::new(4, FeatureLayout::Bounded);
        let f = fb.build("a b c d e f", None);
        assert_eq!(f.tokens, vec![CLS_TOKEN, "a", "b", SEP_TOKEN]);
    }

    #[test]
    fn test_raw_layout_untouched() {
        let fb = FeatureBuilder::new(4, FeatureLayout::Raw);
        let f = fb.build("a b c d e f", None);
        assert_eq!(f.tokens.len(), 6);
    }

    #[test]
    fn test_align_batch() {
        let fb = FeatureBuilder::new(4, FeatureLayout::Raw);
        let mut batch = fb.build_batch(&["a b", "a b c d"], None);
        align_batch(&mut batch, FeatureLayout::Bounded, 2);
        assert!(batch.iter().all(|f| f.ids.len() == 4));
        assert_eq!(batch[0].ids[3], 2);
    }
}
