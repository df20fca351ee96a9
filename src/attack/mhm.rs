//! ═══════════════════════════════════════════════════════════════════════════════
//! MHM ATTACK — Metropolis-Hastings Walk over Renamings
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! A single chain renames one identifier per iteration:
//!
//!   1. pick an identifier uniformly at random
//!   2. sample up to `n_candidates` replacement names (from its substitutes,
//!      or from a global vocabulary for the random variant), skipping names
//!      that are invalid, reserved or already used in the program
//!   3. score the current program plus every candidate in one call
//!   4. SUCCESS if any candidate meets the success criterion
//!   5. otherwise α = (1 − s_best + ε) / (1 − s_current + ε), where s_best is
//!      the lowest retained score among the candidates
//!   6. REJECT if u > α or α < prob_threshold, else ACCEPT the best candidate
//!
//! Identifiers are tracked through slots: a fixed id (its original name) and
//! a mutable current name, so repeated renames never re-key any map. Each
//! slot keeps its rename chain for reporting the full lineage.
//! ═══════════════════════════════════════════════════════════════════════════════

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

use super::{
    prepare, AttackEnv, AttackMethod, AttackResult, Outcome, Prepared, Replacement, Subject,
};
use crate::config::MhmConfig;
use crate::oracle::{Oracle, OracleError};
use crate::program::IdentifierExtractor;
use crate::substitutes::{is_valid_identifier, SubstitutionTable, Vocabulary};

/// Where candidate names come from
#[derive(Debug, Clone, Copy)]
pub enum CandidateSource<'v> {
    /// Semantics-preserving substitutes of the chosen identifier
    Substitutes,
    /// Any name from a global vocabulary
    Vocabulary(&'v Vocabulary),
}

/// Result of one chain iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Accept,
    Reject,
}

/// Diagnostic record of one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub iteration: usize,
    pub status: StepStatus,
    pub old_name: String,
    /// Best candidate name (also recorded for rejections)
    pub new_name: Option<String>,
    pub old_score: f64,
    pub new_score: Option<f64>,
    pub alpha: Option<f64>,
}

/// Every name an identifier has held, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameChain {
    pub original: String,
    pub names: Vec<String>,
}

impl RenameChain {
    pub fn current(&self) -> &str {
        self.names.last().map_or(self.original.as_str(), |s| s.as_str())
    }
}

/// Metropolis acceptance ratio for moving from `current_score` to `candidate_score`
pub fn acceptance_ratio(candidate_score: f64, current_score: f64, epsilon: f64) -> f64 {
    (1.0 - candidate_score + epsilon) / (1.0 - current_score + epsilon)
}

/// Chain state for one attacked identifier
#[derive(Debug, Clone)]
struct Slot {
    original: String,
    current: String,
    substitutes: Vec<String>,
    chain: Vec<String>,
}

pub struct MhmAttacker<'a, O: Oracle + ?Sized> {
    env: AttackEnv<'a, O>,
    config: MhmConfig,
    extractor: Box<dyn IdentifierExtractor>,
}

impl<'a, O: Oracle + ?Sized> MhmAttacker<'a, O> {
    pub fn new(env: AttackEnv<'a, O>, config: MhmConfig, extractor: Box<dyn IdentifierExtractor>) -> Self {
        Self {
            env,
            config,
            extractor,
        }
    }

    pub fn attack<S, R>(
        &self,
        subject: &S,
        table: &SubstitutionTable,
        true_label: Option<usize>,
        source: CandidateSource<'_>,
        rng: &mut R,
    ) -> Result<AttackResult, OracleError>
    where
        S: Subject,
        R: Rng + ?Sized,
    {
        let env = &self.env;
        let method = match source {
            CandidateSource::Substitutes => AttackMethod::Mhm,
            CandidateSource::Vocabulary(_) => AttackMethod::MhmRandom,
        };
        let (baseline, positions) = match prepare(env, method, subject, table, true_label)? {
            Prepared::Done(result, _) => return Ok(result),
            Prepared::Ready(b, p) => (b, p),
        };

        let mut result = AttackResult::new(method, subject, true_label);
        result.original_label = Some(baseline.label);
        result.identifiers = positions.names().map(str::to_string).collect();

        let mut slots: Vec<Slot> = positions
            .names()
            .map(|name| Slot {
                original: name.to_string(),
                current: name.to_string(),
                substitutes: table.get(name).map(|c| c.to_vec()).unwrap_or_default(),
                chain: Vec::new(),
            })
            .collect();

        let mut current = subject.clone();
        let mut current_pred = baseline.prediction.clone();
        let mut outcome = Outcome::SearchExhausted;

        for iteration in 1..=self.config.max_iter {
            let k = rng.gen_range(0..slots.len());
            let old_name = slots[k].current.clone();

            let sampled: Vec<String> = match source {
                CandidateSource::Substitutes => slots[k]
                    .substitutes
                    .choose_multiple(rng, self.config.n_candidates)
                    .cloned()
                    .collect(),
                CandidateSource::Vocabulary(vocab) => vocab.sample(rng, self.config.n_candidates),
            };
            let names: Vec<String> = sampled
                .into_iter()
                .filter(|c| {
                    *c != old_name
                        && is_valid_identifier(c)
                        && !self.extractor.is_reserved(c)
                        && !current.contains_identifier(c)
                        && !slots.iter().any(|s| s.current == *c)
                })
                .collect();

            if names.is_empty() {
                debug!(iteration, identifier = %old_name, "mhm: no valid candidate");
                result.steps.push(StepRecord {
                    iteration,
                    status: StepStatus::Reject,
                    old_name,
                    new_name: None,
                    old_score: baseline.retained(&current_pred),
                    new_score: None,
                    alpha: None,
                });
                continue;
            }

            let mut candidates = Vec::with_capacity(names.len() + 1);
            candidates.push(current.clone());
            candidates.extend(names.iter().map(|n| current.rename(&old_name, n)));
            let preds = env.score_subjects(&candidates, true_label)?;
            let old_score = baseline.retained(&preds[0]);

            // Success check excludes the unchanged program at index 0
            let hit = (1..preds.len()).find(|&i| env.success.is_met(&baseline, &preds[i]));
            let (status, chosen, alpha) = match hit {
                Some(i) => (StepStatus::Success, i, None),
                None => {
                    let best = (1..preds.len())
                        .min_by(|&a, &b| {
                            baseline
                                .retained(&preds[a])
                                .partial_cmp(&baseline.retained(&preds[b]))
                                .unwrap_or(Ordering::Equal)
                        })
                        .unwrap_or(1);
                    let alpha = acceptance_ratio(
                        baseline.retained(&preds[best]),
                        old_score,
                        self.config.epsilon,
                    );
                    let u: f64 = rng.gen();
                    let status = if u > alpha || alpha < self.config.prob_threshold {
                        StepStatus::Reject
                    } else {
                        StepStatus::Accept
                    };
                    (status, best, Some(alpha))
                }
            };

            let new_name = names[chosen - 1].clone();
            let new_score = baseline.retained(&preds[chosen]);
            debug!(
                iteration,
                status = ?status,
                old = %old_name,
                new = %new_name,
                old_score,
                new_score,
                alpha = alpha.unwrap_or(1.0),
                "mhm step"
            );
            result.steps.push(StepRecord {
                iteration,
                status,
                old_name,
                new_name: Some(new_name.clone()),
                old_score,
                new_score: Some(new_score),
                alpha,
            });

            if status != StepStatus::Reject {
                current = candidates.swap_remove(chosen);
                current_pred = preds[chosen].clone();
                slots[k].chain.push(new_name.clone());
                slots[k].current = new_name;
            }
            if status == StepStatus::Success {
                info!(iteration, "mhm attack succeeded");
                outcome = Outcome::Succeeded;
                break;
            }
        }

        if outcome == Outcome::SearchExhausted {
            info!(iterations = self.config.max_iter, "mhm search exhausted");
        }

        let renames: Vec<Replacement> = slots
            .iter()
            .filter(|s| s.current != s.original)
            .map(|s| Replacement {
                original: s.original.clone(),
                replacement: s.current.clone(),
            })
            .collect();
        result.rename_chains = slots
            .iter()
            .filter(|s| !s.chain.is_empty())
            .map(|s| RenameChain {
                original: s.original.clone(),
                names: s.chain.clone(),
            })
            .collect();
        result.outcome = outcome;
        result.set_replacements(renames, &positions);
        result.set_final(&baseline, &current_pred);
        result.adversarial = Some(current.source());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::SuccessCriterion;
    use crate::feature::{Feature, FeatureBuilder, FeatureLayout};
    use crate::oracle::{CountingOracle, FnOracle, Prediction};
    use crate::program::{Language, Program};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_alpha_is_one_for_equal_scores() {
        for s in [0.0, 0.3, 0.5, 0.999, 1.0] {
            assert_eq!(acceptance_ratio(s, s, 1e-10), 1.0);
        }
        assert!(acceptance_ratio(0.2, 0.8, 1e-10) > 1.0);
        assert!(acceptance_ratio(0.9, 0.5, 1e-10) < 0.95);
    }

    #[test]
    fn test_chain_current() {
        let chain = RenameChain {
            original: "a".to_string(),
            names: vec!["b".to_string(), "c".to_string()],
        };
        assert_eq!(chain.current(), "c");
    }

    #[test]
    fn test_flat_oracle_always_accepts() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = CountingOracle::new(FnOracle::new("flat", |_: &Feature| {
            Prediction::classification(vec![0.9, 0.1])
        }));
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let config = MhmConfig {
            max_iter: 5,
            ..MhmConfig::default()
        };
        let mhm = MhmAttacker::new(env, config, Box::new(Language::C.extractor()));
        let table: SubstitutionTable = [("a", vec!["x", "y", "z"])].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(9);

        let result = mhm
            .attack(
                &Program::parse("int f(int a){return a;}"),
                &table,
                Some(0),
                CandidateSource::Substitutes,
                &mut rng,
            )
            .unwrap();

        assert_eq!(result.outcome, Outcome::SearchExhausted);
        assert_eq!(result.steps.len(), 5);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Accept));
        assert_eq!(result.rename_chains.len(), 1);
        assert_eq!(result.rename_chains[0].names.len(), 5);
        assert_eq!(result.nb_changed_var, 1);
        assert_eq!(result.nb_changed_pos, 2);
        // baseline + one batch per iteration
        assert_eq!(oracle.calls(), 6);
    }

    #[test]
    fn test_worse_candidates_are_rejected() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = FnOracle::new("rename-helps-model", |f: &Feature| {
            if f.text.split_whitespace().any(|w| w == "x" || w == "y") {
                Prediction::classification(vec![0.95, 0.05])
            } else {
                Prediction::classification(vec![0.6, 0.4])
            }
        });
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let config = MhmConfig {
            max_iter: 3,
            ..MhmConfig::default()
        };
        let mhm = MhmAttacker::new(env, config, Box::new(Language::C.extractor()));
        let table: SubstitutionTable = [("a", vec!["x", "y"])].into_iter().collect();
        let program = Program::parse("int f(int a){return a;}");
        let mut rng = StdRng::seed_from_u64(1);

        let result = mhm
            .attack(&program, &table, Some(0), CandidateSource::Substitutes, &mut rng)
            .unwrap();

        assert_eq!(result.outcome, Outcome::SearchExhausted);
        let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![StepStatus::Reject; 3]);
        for step in &result.steps {
            // (1 - 0.95) / (1 - 0.6)
            assert!((step.alpha.unwrap() - 0.125).abs() < 1e-6);
            assert_eq!(step.old_name, "a");
            assert!((step.old_score - 0.6).abs() < 1e-9);
        }
        assert_eq!(result.adversarial.as_deref(), Some("int f(int a){return a;}"));
        assert!(result.replacements.is_empty());
        assert!(result.rename_chains.is_empty());
        assert_eq!(result.nb_changed_var, 0);
    }

    #[test]
    fn test_vocabulary_variant_succeeds() {
        let fb = FeatureBuilder::new(64, FeatureLayout::Bounded);
        let oracle = FnOracle::new("q-flips", |f: &Feature| {
            if f.tokens.iter().any(|t| t == "q") {
                Prediction::classification(vec![0.1, 0.9])
            } else {
                Prediction::classification(vec![0.9, 0.1])
            }
        });
        let env = AttackEnv::new(&oracle, &fb, SuccessCriterion::LabelFlip);
        let mhm = MhmAttacker::new(env, MhmConfig::default(), Box::new(Language::C.extractor()));
        let table: SubstitutionTable = [("a", vec!["x"])].into_iter().collect();
        let vocab = Vocabulary::new(["q", "while", "f"]);
        let mut rng = StdRng::seed_from_u64(0);

        let result = mhm
            .attack(
                &Program::parse("int f(int a){return a;}"),
                &table,
                Some(0),
                CandidateSource::Vocabulary(&vocab),
                &mut rng,
            )
            .unwrap();

        assert_eq!(result.method, AttackMethod::MhmRandom);
        assert_eq!(result.outcome, Outcome::Succeeded);
        assert_eq!(result.adversarial.as_deref(), Some("int f(int q){return q;}"));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.replacements[0].replacement, "q");
    }
}
