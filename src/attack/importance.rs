//! Masking-based identifier importance.
//!
//! One oracle call scores one copy of the subject per identifier occurrence,
//! with that occurrence masked, against an already scored baseline. An identifier's importance is the
//! sum, over its occurrences, of the score its masking removes from the
//! baseline label. Summing favours identifiers that occur often.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use super::{AttackEnv, Baseline, Subject};
use crate::oracle::{Oracle, OracleError};
use crate::program::{PositionMap, MASK_TOKEN};

/// Importance of one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceScore {
    pub identifier: String,
    pub score: f64,
}

/// Scores plus the maps they were computed from
#[derive(Debug, Clone)]
pub struct ImportanceReport {
    /// Per identifier, in position-map order
    pub scores: Vec<ImportanceScore>,
    /// Every masked position, ascending
    pub masked_positions: Vec<usize>,
    pub positions: PositionMap,
    pub baseline: Baseline,
}

impl ImportanceReport {
    pub fn get(&self, identifier: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.identifier == identifier)
            .map(|s| s.score)
    }

    /// Descending by score; ties keep position-map order
    pub fn ranked(&self) -> Vec<&ImportanceScore> {
        let mut ranked: Vec<&ImportanceScore> = self.scores.iter().collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked
    }
}

/// Score the importance of every name in `names` that occurs in `subject`
/// as an identifier. Returns `None` when none of them does.
pub fn score<O, S>(
    env: &AttackEnv<'_, O>,
    subject: &S,
    names: &[&str],
    baseline: &Baseline,
    label: Option<usize>,
) -> Result<Option<ImportanceReport>, OracleError>
where
    O: Oracle + ?Sized,
    S: Subject,
{
    let names: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| subject.contains_identifier(n))
        .collect();
    let positions = PositionMap::build(&subject.words(), &names);
    if positions.is_empty() {
        return Ok(None);
    }

    let masked_positions = positions.all_positions();
    let texts = subject.masked_inputs(&masked_positions, MASK_TOKEN);
    let preds = env.score_texts(&texts, label)?;

    let delta_at = |pos: usize| -> f64 {
        masked_positions
            .binary_search(&pos)
            .ok()
            .and_then(|k| preds.get(k))
            .map_or(0.0, |p| baseline.damage(p))
    };

    let scores: Vec<ImportanceScore> = positions
        .iter()
        .map(|(name, occ)| ImportanceScore {
            identifier: name.to_string(),
            score: occ.iter().map(|&p| delta_at(p)).sum(),
        })
        .collect();

    for s in &scores {
        debug!(identifier = %s.identifier, importance = s.score, "importance");
    }

    Ok(Some(ImportanceReport {
        scores,
        masked_positions,
        positions,
        baseline: baseline.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::SuccessCriterion;
    use crate::feature::{Feature, FeatureBuilder, FeatureLayout};
    use crate::oracle::{CountingOracle, FnOracle, Prediction};
    use crate::program::Program;

    /// Confidence drops by 0.1 per masked token
    fn mask_sensitive(f: &Feature) -> Prediction {
        let masked = f.tokens.iter().filter(|t| t.as_str() == MASK_TOKEN).count() as f64;
        let p = 0.9 - 0.1 * masked;
        Prediction::classification(vec![p, 1.0 - p])
    }

    #[test]
    fn test_importance_sums_occurrences() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = CountingOracle::new(FnOracle::new("mask", mask_sensitive));
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int foo(int a,int b){return a+b;}");
        let baseline = env.baseline(&program, None).unwrap();
        oracle.reset();

        let report = score(&env, &program, &["b", "a", "zz"], &baseline, None)
            .unwrap()
            .unwrap();
        // masked copies only, the baseline is not scored again
        assert_eq!(oracle.calls(), 1);
        assert_eq!(oracle.features(), 4);

        let a = report.get("a").unwrap();
        let b = report.get("b").unwrap();
        assert!((a - 0.2).abs() < 1e-9);
        assert!((b - 0.2).abs() < 1e-9);
        assert!(report.get("zz").is_none());

        // Equal scores keep map order
        let ranked: Vec<&str> = report.ranked().iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ranked, vec!["b", "a"]);
    }

    #[test]
    fn test_importance_at_least_single_occurrence() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = FnOracle::new("mask", mask_sensitive);
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int f(int n){ n = n * n; return n; }");
        let baseline = env.baseline(&program, None).unwrap();
        let report = score(&env, &program, &["n"], &baseline, None).unwrap().unwrap();
        let single = report.baseline.score - 0.8;
        assert!(report.get("n").unwrap() >= single);
    }

    #[test]
    fn test_importance_none_when_absent() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = CountingOracle::new(FnOracle::new("mask", mask_sensitive));
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int x;");
        let baseline = env.baseline(&program, None).unwrap();
        oracle.reset();
        assert!(score(&env, &program, &["y"], &baseline, None).unwrap().is_none());
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn test_importance_skips_non_identifier_words() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = CountingOracle::new(FnOracle::new("mask", mask_sensitive));
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let program = Program::parse("int f(int x){return x+0;}");
        let baseline = env.baseline(&program, None).unwrap();
        oracle.reset();

        let report = score(&env, &program, &["0", "+", "x"], &baseline, None)
            .unwrap()
            .unwrap();
        assert_eq!(report.positions.names().collect::<Vec<_>>(), vec!["x"]);
        assert!(report.get("0").is_none());
        assert_eq!(oracle.features(), 2);
    }
}
