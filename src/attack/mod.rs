//! ═══════════════════════════════════════════════════════════════════════════════
//! ATTACK — Identifier-Renaming Adversarial Search
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Every search strategy shares the same frame:
//!
//!   1. Score the unmodified program (baseline).
//!   2. Bail out with AlreadyMispredicted if the baseline disagrees with the
//!      ground truth, or NoAttackableIdentifiers if no substitution-table key
//!      occurs in the program.
//!   3. Search the space of renamings, scoring candidates in batches.
//!   4. Report an AttackResult built once at exit.
//!
//! Strategies:
//!   importance — masking-based per-identifier contribution
//!   greedy     — importance-ranked, best substitute per identifier
//!   genetic    — population of full renaming assignments
//!   mhm        — Metropolis-Hastings random walk over renamings
//!   demo       — greedy over in-context demonstrations, persisted as JSONL
//! ═══════════════════════════════════════════════════════════════════════════════

pub mod demo;
pub mod genetic;
pub mod greedy;
pub mod importance;
pub mod mhm;
pub mod operators;

pub use demo::{DemoAttacker, DemoBundle, DemoExample};
pub use genetic::GeneticAttacker;
pub use greedy::GreedyAttacker;
pub use importance::{ImportanceReport, ImportanceScore};
pub use mhm::{CandidateSource, MhmAttacker, RenameChain, StepRecord, StepStatus};
pub use operators::{Chromosome, ParentSelection};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::feature::{align_batch, FeatureBuilder};
use crate::oracle::{self, Oracle, OracleError, Prediction};
use crate::program::{mask_positions, PositionMap, Program};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// Terminal state of one attack call. Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The model already mispredicts the unperturbed input (−4)
    AlreadyMispredicted,
    /// No substitution-table key occurs in the program (−3)
    NoAttackableIdentifiers,
    /// Budget consumed without meeting the success criterion (−1)
    SearchExhausted,
    /// An adversarial renaming was found (1)
    Succeeded,
}

impl Outcome {
    pub fn code(self) -> i8 {
        match self {
            Outcome::AlreadyMispredicted => -4,
            Outcome::NoAttackableIdentifiers => -3,
            Outcome::SearchExhausted => -1,
            Outcome::Succeeded => 1,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -4 => Some(Outcome::AlreadyMispredicted),
            -3 => Some(Outcome::NoAttackableIdentifiers),
            -1 => Some(Outcome::SearchExhausted),
            1 => Some(Outcome::Succeeded),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Succeeded
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::AlreadyMispredicted => "already-mispredicted",
            Outcome::NoAttackableIdentifiers => "no-attackable-identifiers",
            Outcome::SearchExhausted => "search-exhausted",
            Outcome::Succeeded => "succeeded",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i8::deserialize(deserializer)?;
        Outcome::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown outcome code {}", code)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUCCESS CRITERION
// ═══════════════════════════════════════════════════════════════════════════════

/// Unperturbed oracle output every candidate is compared against
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    /// Label the model predicts for the original program
    pub label: usize,
    /// Score of that label (or quality score for generation oracles)
    pub score: f64,
    pub prediction: Prediction,
}

impl Baseline {
    pub fn new(prediction: Prediction) -> Self {
        Self {
            label: prediction.label,
            score: prediction.confidence(),
            prediction,
        }
    }

    /// Score the original label keeps under a candidate
    pub fn retained(&self, pred: &Prediction) -> f64 {
        pred.score_for(self.label)
    }

    /// Confidence damage done by a candidate (GA fitness, greedy gap)
    pub fn damage(&self, pred: &Prediction) -> f64 {
        self.score - self.retained(pred)
    }
}

/// When an attack counts as successful
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuccessCriterion {
    /// Classification: predicted label differs from the original one
    #[default]
    LabelFlip,
    /// Retained score at or below `ratio × original score`
    ScoreRatio { ratio: f64 },
}

impl SuccessCriterion {
    pub fn is_met(&self, baseline: &Baseline, pred: &Prediction) -> bool {
        match *self {
            SuccessCriterion::LabelFlip => pred.label != baseline.label,
            SuccessCriterion::ScoreRatio { ratio } => {
                baseline.retained(pred) <= baseline.score * ratio
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Search strategy that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackMethod {
    Greedy,
    Ga,
    Mhm,
    MhmRandom,
    Demo,
}

impl AttackMethod {
    pub fn name(self) -> &'static str {
        match self {
            AttackMethod::Greedy => "greedy",
            AttackMethod::Ga => "ga",
            AttackMethod::Mhm => "mhm",
            AttackMethod::MhmRandom => "mhm-random",
            AttackMethod::Demo => "demo",
        }
    }
}

impl fmt::Display for AttackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(AttackMethod::Greedy),
            "ga" | "genetic" => Ok(AttackMethod::Ga),
            "mhm" => Ok(AttackMethod::Mhm),
            "mhm-random" | "mhm_random" => Ok(AttackMethod::MhmRandom),
            "demo" => Ok(AttackMethod::Demo),
            other => Err(format!("unknown attack method: {}", other)),
        }
    }
}

/// One committed rename, original name → final name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub original: String,
    pub replacement: String,
}

/// A program variant and the score its original label retained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProgram {
    pub program: String,
    pub score: f64,
}

/// Everything one attack call reports. Built at exit, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub method: AttackMethod,
    pub outcome: Outcome,
    /// Original source
    pub original: String,
    /// Code-token count of the original
    pub prog_length: usize,
    /// Final program; `None` when the search has nothing to report
    pub adversarial: Option<String>,
    pub true_label: Option<usize>,
    pub original_label: Option<usize>,
    pub adversarial_label: Option<usize>,
    /// Attackable identifiers (substitution keys present in the program)
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Vec<ImportanceScore>>,
    pub nb_changed_var: usize,
    pub nb_changed_pos: usize,
    pub replacements: Vec<Replacement>,
    /// Original score minus the final candidate's retained score
    pub score_delta: Option<f64>,
    /// Greedy: every committed intermediate program, best (lowest score) first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<ScoredProgram>,
    /// MHM: full rename lineage per originally attacked identifier
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rename_chains: Vec<RenameChain>,
    /// MHM: one record per iteration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    /// Demo: quality metrics of the final answer
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl AttackResult {
    pub fn new<S: Subject>(method: AttackMethod, subject: &S, true_label: Option<usize>) -> Self {
        Self {
            method,
            outcome: Outcome::SearchExhausted,
            original: subject.source(),
            prog_length: subject.words().len(),
            adversarial: None,
            true_label,
            original_label: None,
            adversarial_label: None,
            identifiers: Vec::new(),
            importance: None,
            nb_changed_var: 0,
            nb_changed_pos: 0,
            replacements: Vec::new(),
            score_delta: None,
            candidates: Vec::new(),
            rename_chains: Vec::new(),
            steps: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Record final renames and count the positions they touched in the original
    pub fn set_replacements(&mut self, renames: Vec<Replacement>, positions: &PositionMap) {
        self.nb_changed_var = renames.len();
        self.nb_changed_pos = renames
            .iter()
            .map(|r| positions.get(&r.original).map_or(0, |p| p.len()))
            .sum();
        self.replacements = renames;
    }

    /// Fill label and score fields from the final candidate's prediction
    pub fn set_final(&mut self, baseline: &Baseline, pred: &Prediction) {
        self.adversarial_label = Some(pred.label);
        self.score_delta = Some(baseline.damage(pred));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBJECT — what an attack renames
// ═══════════════════════════════════════════════════════════════════════════════

/// Something whose identifiers can be renamed and rendered as model input
pub trait Subject: Clone {
    /// Code tokens; position maps index into this list
    fn words(&self) -> Vec<String>;

    /// Render an edited copy of `words()` as model input
    fn render(&self, words: &[String]) -> String;

    /// Rename every occurrence of identifier `old`
    fn rename(&self, old: &str, new: &str) -> Self;

    /// Apply several renames simultaneously
    fn rename_all(&self, renames: &[(&str, &str)]) -> Self;

    /// True if `name` is already an identifier somewhere in the subject
    fn contains_identifier(&self, name: &str) -> bool;

    /// Source text for reporting
    fn source(&self) -> String;

    fn model_input(&self) -> String {
        self.render(&self.words())
    }

    /// Model input with each listed word position masked, one per position
    fn masked_inputs(&self, positions: &[usize], placeholder: &str) -> Vec<String> {
        mask_positions(&self.words(), positions, placeholder)
            .iter()
            .map(|w| self.render(w))
            .collect()
    }
}

impl Subject for Program {
    fn words(&self) -> Vec<String> {
        Program::words(self)
    }

    fn render(&self, words: &[String]) -> String {
        words.join(" ")
    }

    fn rename(&self, old: &str, new: &str) -> Self {
        Program::rename(self, old, new)
    }

    fn rename_all(&self, renames: &[(&str, &str)]) -> Self {
        Program::rename_all(self, renames.iter().copied())
    }

    fn contains_identifier(&self, name: &str) -> bool {
        Program::contains_identifier(self, name)
    }

    fn source(&self) -> String {
        Program::source(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT — oracle + feature builder + success criterion
// ═══════════════════════════════════════════════════════════════════════════════

/// What every strategy needs to score candidates
pub struct AttackEnv<'a, O: Oracle + ?Sized> {
    pub oracle: &'a O,
    pub features: &'a FeatureBuilder,
    pub success: SuccessCriterion,
    /// Expected answer attached to every feature (generation oracles)
    pub reference: Option<String>,
}

impl<'a, O: Oracle + ?Sized> Clone for AttackEnv<'a, O> {
    fn clone(&self) -> Self {
        Self {
            oracle: self.oracle,
            features: self.features,
            success: self.success,
            reference: self.reference.clone(),
        }
    }
}

impl<'a, O: Oracle + ?Sized> AttackEnv<'a, O> {
    pub fn new(oracle: &'a O, features: &'a FeatureBuilder, success: SuccessCriterion) -> Self {
        Self {
            oracle,
            features,
            success,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    /// Score model inputs in a single oracle call
    pub fn score_texts<T: AsRef<str>>(
        &self,
        texts: &[T],
        label: Option<usize>,
    ) -> Result<Vec<Prediction>, OracleError> {
        let mut batch = self.features.build_batch(texts, label);
        if let Some(reference) = &self.reference {
            for f in batch.iter_mut() {
                f.reference = Some(reference.clone());
            }
        }
        align_batch(&mut batch, self.features.layout, self.features.pad_id());
        oracle::query(self.oracle, &batch)
    }

    /// Score subjects in a single oracle call
    pub fn score_subjects<S: Subject>(
        &self,
        subjects: &[S],
        label: Option<usize>,
    ) -> Result<Vec<Prediction>, OracleError> {
        let texts: Vec<String> = subjects.iter().map(|s| s.model_input()).collect();
        self.score_texts(&texts, label)
    }

    /// Score the unmodified subject
    pub fn baseline<S: Subject>(
        &self,
        subject: &S,
        label: Option<usize>,
    ) -> Result<Baseline, OracleError> {
        let preds = self.score_texts(&[subject.model_input()], label)?;
        preds
            .into_iter()
            .next()
            .map(Baseline::new)
            .ok_or(OracleError::Shape {
                expected: 1,
                got: 0,
            })
    }
}

/// Result of the shared pre-search checks
pub(crate) enum Prepared {
    /// Stop early with a terminal result
    Done(AttackResult, Baseline),
    /// Proceed: baseline plus position map of attackable identifiers
    Ready(Baseline, PositionMap),
}

/// Baseline, misprediction check and attackable-identifier check, in that order
pub(crate) fn prepare<O, S>(
    env: &AttackEnv<'_, O>,
    method: AttackMethod,
    subject: &S,
    table: &crate::substitutes::SubstitutionTable,
    true_label: Option<usize>,
) -> Result<Prepared, OracleError>
where
    O: Oracle + ?Sized,
    S: Subject,
{
    let mut result = AttackResult::new(method, subject, true_label);
    let baseline = env.baseline(subject, true_label)?;
    result.original_label = Some(baseline.label);

    if let Some(truth) = true_label {
        if env.success == SuccessCriterion::LabelFlip && baseline.label != truth {
            return Ok(Prepared::Done(
                result.with_outcome(Outcome::AlreadyMispredicted),
                baseline,
            ));
        }
    }

    // Only identifier tokens are renamed, so only they are attackable
    let names: Vec<&str> = table
        .iter()
        .filter(|(n, cands)| !cands.is_empty() && subject.contains_identifier(n))
        .map(|(n, _)| n)
        .collect();
    let positions = PositionMap::build(&subject.words(), &names);
    if positions.is_empty() {
        return Ok(Prepared::Done(
            result.with_outcome(Outcome::NoAttackableIdentifiers),
            baseline,
        ));
    }
    Ok(Prepared::Ready(baseline, positions))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureLayout;
    use crate::oracle::FnOracle;
    use crate::substitutes::SubstitutionTable;

    #[test]
    fn test_outcome_codes() {
        for o in [
            Outcome::AlreadyMispredicted,
            Outcome::NoAttackableIdentifiers,
            Outcome::SearchExhausted,
            Outcome::Succeeded,
        ] {
            assert_eq!(Outcome::from_code(o.code()), Some(o));
        }
        assert_eq!(Outcome::from_code(0), None);
        assert_eq!(serde_json::to_string(&Outcome::AlreadyMispredicted).unwrap(), "-4");
        assert!(serde_json::from_str::<Outcome>("2").is_err());
    }

    #[test]
    fn test_success_criteria() {
        let baseline = Baseline::new(Prediction::classification(vec![0.8, 0.2]));
        let flipped = Prediction::classification(vec![0.4, 0.6]);
        let weaker = Prediction::classification(vec![0.6, 0.4]);
        assert!(SuccessCriterion::LabelFlip.is_met(&baseline, &flipped));
        assert!(!SuccessCriterion::LabelFlip.is_met(&baseline, &weaker));

        let half = SuccessCriterion::ScoreRatio { ratio: 0.5 };
        assert!(half.is_met(&baseline, &Prediction::classification(vec![0.4, 0.6])));
        assert!(!half.is_met(&baseline, &weaker));
        assert!((baseline.damage(&weaker) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_success_criterion_json() {
        let c: SuccessCriterion = serde_json::from_str(r#"{"score_ratio":{"ratio":0.5}}"#).unwrap();
        assert_eq!(c, SuccessCriterion::ScoreRatio { ratio: 0.5 });
        let c: SuccessCriterion = serde_json::from_str(r#""label_flip""#).unwrap();
        assert_eq!(c, SuccessCriterion::LabelFlip);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("mhm-random".parse::<AttackMethod>(), Ok(AttackMethod::MhmRandom));
        assert_eq!("ga".parse::<AttackMethod>(), Ok(AttackMethod::Ga));
        assert!("beam".parse::<AttackMethod>().is_err());
    }

    #[test]
    fn test_prepare_early_exits() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = FnOracle::new("const", |_| Prediction::classification(vec![0.9, 0.1]));
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int foo(int a,int b){return a+b;}");
        let table: SubstitutionTable = [("a", vec!["x"])].into_iter().collect();

        match prepare(&env, AttackMethod::Greedy, &program, &table, Some(1)).unwrap() {
            Prepared::Done(r, _) => assert_eq!(r.outcome, Outcome::AlreadyMispredicted),
            Prepared::Ready(..) => panic!("expected early exit"),
        }

        let absent: SubstitutionTable = [("zz", vec!["x"])].into_iter().collect();
        match prepare(&env, AttackMethod::Greedy, &program, &absent, Some(0)).unwrap() {
            Prepared::Done(r, _) => assert_eq!(r.outcome, Outcome::NoAttackableIdentifiers),
            Prepared::Ready(..) => panic!("expected early exit"),
        }

        // A literal matches a word but is never renamed
        let literal: SubstitutionTable = [("0", vec!["x"]), ("+", vec!["y"])].into_iter().collect();
        let with_literal = Program::parse("int foo(int a){return a+0;}");
        match prepare(&env, AttackMethod::Greedy, &with_literal, &literal, Some(0)).unwrap() {
            Prepared::Done(r, _) => assert_eq!(r.outcome, Outcome::NoAttackableIdentifiers),
            Prepared::Ready(..) => panic!("expected early exit"),
        }

        match prepare(&env, AttackMethod::Greedy, &program, &table, Some(0)).unwrap() {
            Prepared::Ready(baseline, positions) => {
                assert_eq!(baseline.label, 0);
                assert_eq!(positions.get("a").map(|p| p.len()), Some(2));
            }
            Prepared::Done(..) => panic!("expected search to start"),
        }
    }

    #[test]
    fn test_noop_rename_keeps_score() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = FnOracle::new("len", |f: &crate::feature::Feature| {
            let p = 1.0 / (1.0 + f.effective_len() as f64);
            Prediction::classification(vec![1.0 - p, p])
        });
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int foo(int a,int b){return a+b;}");
        let same = Subject::rename(&program, "a", "a");
        let preds = env.score_subjects(&[program.clone(), same.clone()], None).unwrap();
        assert_eq!(preds[0], preds[1]);
        assert_eq!(program.words().len(), same.words().len());
    }
}
