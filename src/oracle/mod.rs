//! ═══════════════════════════════════════════════════════════════════════════════
//! ORACLE — Black-Box Target Model Interface
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! The attacked model is opaque: it receives a batch of features and returns
//! one prediction per feature, in order. Nothing else about it is assumed.
//!
//! Implementations:
//!   HttpOracle     — remote model behind a JSON endpoint
//!   FnOracle       — closure adapter (scripted oracles in tests)
//!   CountingOracle — wrapper recording calls and evaluated features
//! ═══════════════════════════════════════════════════════════════════════════════

pub mod http;

pub use http::HttpOracle;

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;

use crate::feature::Feature;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for oracle calls
#[derive(Debug, Clone, PartialEq)]
pub enum OracleError {
    /// Network/connection error
    Network(String),
    /// Oracle returned an error or an unreadable response
    Response(String),
    /// Timeout
    Timeout,
    /// Oracle returned the wrong number of predictions
    Shape { expected: usize, got: usize },
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Network(e) => write!(f, "Network error: {}", e),
            OracleError::Response(e) => write!(f, "Response error: {}", e),
            OracleError::Timeout => write!(f, "Request timeout"),
            OracleError::Shape { expected, got } => {
                write!(f, "Expected {} predictions, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for OracleError {}

// ═══════════════════════════════════════════════════════════════════════════════
// PREDICTION
// ═══════════════════════════════════════════════════════════════════════════════

/// One oracle output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPrediction")]
pub struct Prediction {
    /// Class probabilities (classification oracles)
    pub probs: Vec<f64>,
    /// Predicted label (argmax of `probs` for classifiers)
    pub label: usize,
    /// Output quality score (generation oracles)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    /// Generated text, if the oracle produces any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Named quality metrics of the answer (bleu, rouge_l, meteor, ...)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

/// Wire form of a prediction; a missing label is the argmax of `probs`
#[derive(Deserialize)]
struct RawPrediction {
    #[serde(default)]
    probs: Vec<f64>,
    #[serde(default)]
    label: Option<usize>,
    #[serde(default)]
    quality: Option<f64>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
}

impl From<RawPrediction> for Prediction {
    fn from(raw: RawPrediction) -> Self {
        Self {
            label: raw.label.unwrap_or_else(|| argmax(&raw.probs)),
            probs: raw.probs,
            quality: raw.quality,
            answer: raw.answer,
            metrics: raw.metrics,
        }
    }
}

/// Index of the largest value, first on ties; 0 for an empty slice
fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (i, &p)| {
            if p > best.1 {
                (i, p)
            } else {
                best
            }
        })
        .0
}

impl Prediction {
    /// Classifier output; label is the argmax (first on ties)
    pub fn classification(probs: Vec<f64>) -> Self {
        Self {
            label: argmax(&probs),
            probs,
            quality: None,
            answer: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Generation output scored by a quality metric
    pub fn quality(score: f64) -> Self {
        Self {
            probs: Vec::new(),
            label: 0,
            quality: Some(score),
            answer: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Probability of `class`, or the quality score for generation oracles
    pub fn score_for(&self, class: usize) -> f64 {
        match self.quality {
            Some(q) => q,
            None => self.probs.get(class).copied().unwrap_or(0.0),
        }
    }

    /// Score of the predicted label
    pub fn confidence(&self) -> f64 {
        self.score_for(self.label)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A black-box model scored in batches
pub trait Oracle {
    /// Score every feature; the output is order-preserving, one per input
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError>;

    /// Human-readable oracle description
    fn describe(&self) -> String;
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
        (**self).predict(batch)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
        (**self).predict(batch)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Score a batch, skipping the call for an empty batch and checking that the
/// oracle returned exactly one prediction per feature
pub fn query<O: Oracle + ?Sized>(oracle: &O, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let preds = oracle.predict(batch)?;
    if preds.len() != batch.len() {
        return Err(OracleError::Shape {
            expected: batch.len(),
            got: preds.len(),
        });
    }
    Ok(preds)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FN ORACLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Deterministic oracle backed by a per-feature closure
pub struct FnOracle<F> {
    name: String,
    score: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&Feature) -> Prediction,
{
    pub fn new(name: impl Into<String>, score: F) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&Feature) -> Prediction,
{
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
        Ok(batch.iter().map(|f| (self.score)(f)).collect())
    }

    fn describe(&self) -> String {
        format!("fn oracle: {}", self.name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COUNTING ORACLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Wrapper that counts oracle calls and scored features
pub struct CountingOracle<O> {
    inner: O,
    calls: Cell<usize>,
    features: Cell<usize>,
}

impl<O: Oracle> CountingOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
            features: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn features(&self) -> usize {
        self.features.get()
    }

    pub fn reset(&self) {
        self.calls.set(0);
        self.features.set(0);
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Oracle> Oracle for CountingOracle<O> {
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
        self.calls.set(self.calls.get() + 1);
        self.features.set(self.features.get() + batch.len());
        self.inner.predict(batch)
    }

    fn describe(&self) -> String {
        format!("{} (counted)", self.inner.describe())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureBuilder, FeatureLayout};

    struct Short;

    impl Oracle for Short {
        fn predict(&self, _batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
            Ok(vec![Prediction::quality(1.0)])
        }

        fn describe(&self) -> String {
            "short".to_string()
        }
    }

    #[test]
    fn test_classification_argmax() {
        let p = Prediction::classification(vec![0.2, 0.5, 0.3]);
        assert_eq!(p.label, 1);
        assert_eq!(p.confidence(), 0.5);
        assert_eq!(p.score_for(7), 0.0);
    }

    #[test]
    fn test_quality_score() {
        let p = Prediction::quality(0.8).with_answer("sum two ints");
        assert_eq!(p.score_for(3), 0.8);
        assert_eq!(p.answer.as_deref(), Some("sum two ints"));
    }

    #[test]
    fn test_counting_oracle() {
        let fb = FeatureBuilder::new(16, FeatureLayout::Bounded);
        let oracle = CountingOracle::new(FnOracle::new("flat", |_| {
            Prediction::classification(vec![0.9, 0.1])
        }));
        let batch = fb.build_batch(&["a", "b", "c"], None);
        let out = query(&oracle, &batch).unwrap();
        assert_eq!(out.len(), 3);
        assert!(query(&oracle, &[]).unwrap().is_empty());
        assert_eq!(oracle.calls(), 1);
        assert_eq!(oracle.features(), 3);
        assert!(oracle.describe().contains("flat"));
    }

    #[test]
    fn test_shape_mismatch() {
        let fb = FeatureBuilder::new(16, FeatureLayout::Raw);
        let batch = fb.build_batch(&["a", "b"], None);
        let err = query(&Short, &batch).unwrap_err();
        assert_eq!(err, OracleError::Shape { expected: 2, got: 1 });
    }

    #[test]
    fn test_prediction_json() {
        let p: Prediction = serde_json::from_str(r#"{"probs":[0.1,0.9],"label":1}"#).unwrap();
        assert_eq!(p.confidence(), 0.9);
        assert!(p.quality.is_none());
        assert!(p.metrics.is_empty());
    }

    #[test]
    fn test_missing_label_is_argmax() {
        let p: Prediction = serde_json::from_str(r#"{"probs":[0.2,0.8]}"#).unwrap();
        assert_eq!(p.label, 1);
        assert_eq!(p.confidence(), 0.8);

        // An explicit label wins over the probabilities
        let p: Prediction = serde_json::from_str(r#"{"probs":[0.2,0.8],"label":0}"#).unwrap();
        assert_eq!(p.label, 0);
    }

    #[test]
    fn test_metrics_round_trip() {
        let p = Prediction::quality(0.4)
            .with_answer("adds")
            .with_metric("bleu", 0.4)
            .with_metric("rouge_l", 0.55);
        let json = serde_json::to_string(&p).unwrap();
        let back: Prediction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.metrics.get("rouge_l"), Some(&0.55));
    }
}
