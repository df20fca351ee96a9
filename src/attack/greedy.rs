//! Greedy importance-ranked attack.
//!
//! Identifiers are visited from most to least important. For each one, every
//! substitute is tried in a single batch; the first candidate meeting the
//! success criterion ends the attack, otherwise the candidate with the
//! largest confidence drop is committed if it beats leaving the name alone.
//! The running score of the original label therefore never increases.

use std::cmp::Ordering;
use tracing::{debug, info};

use super::importance;
use super::{
    prepare, AttackEnv, AttackMethod, AttackResult, Outcome, Prepared, Replacement, ScoredProgram,
    Subject,
};
use crate::oracle::{Oracle, OracleError, Prediction};
use crate::substitutes::SubstitutionTable;

/// Final state of a greedy search, for callers that keep working with it
#[derive(Debug, Clone)]
pub struct GreedyRun<S> {
    pub result: AttackResult,
    /// Subject with every committed rename applied
    pub current: S,
    /// Oracle output for `current`
    pub prediction: Prediction,
}

pub struct GreedyAttacker<'a, O: Oracle + ?Sized> {
    env: AttackEnv<'a, O>,
}

impl<'a, O: Oracle + ?Sized> GreedyAttacker<'a, O> {
    pub fn new(env: AttackEnv<'a, O>) -> Self {
        Self { env }
    }

    pub fn attack<S: Subject>(
        &self,
        subject: &S,
        table: &SubstitutionTable,
        true_label: Option<usize>,
    ) -> Result<AttackResult, OracleError> {
        Ok(self.run(subject, table, true_label)?.result)
    }

    pub fn run<S: Subject>(
        &self,
        subject: &S,
        table: &SubstitutionTable,
        true_label: Option<usize>,
    ) -> Result<GreedyRun<S>, OracleError> {
        let env = &self.env;
        let (baseline, positions) =
            match prepare(env, AttackMethod::Greedy, subject, table, true_label)? {
                Prepared::Done(result, baseline) => {
                    return Ok(GreedyRun {
                        result,
                        current: subject.clone(),
                        prediction: baseline.prediction,
                    })
                }
                Prepared::Ready(b, p) => (b, p),
            };

        let mut result = AttackResult::new(AttackMethod::Greedy, subject, true_label);
        result.original_label = Some(baseline.label);
        result.identifiers = positions.names().map(str::to_string).collect();

        let names: Vec<&str> = positions.names().collect();
        let report = match importance::score(env, subject, &names, &baseline, true_label)? {
            Some(r) => r,
            None => {
                return Ok(GreedyRun {
                    result: result.with_outcome(Outcome::NoAttackableIdentifiers),
                    current: subject.clone(),
                    prediction: baseline.prediction,
                })
            }
        };
        result.importance = Some(report.scores.clone());

        let mut current = subject.clone();
        let mut current_pred = baseline.prediction.clone();
        let mut current_score = baseline.score;
        let mut renames: Vec<Replacement> = Vec::new();

        for ranked in report.ranked() {
            let name = ranked.identifier.as_str();
            let substitutes: Vec<&String> = table
                .get(name)
                .unwrap_or(&[])
                .iter()
                .filter(|c| c.as_str() != name && !current.contains_identifier(c))
                .collect();
            if substitutes.is_empty() {
                continue;
            }

            let variants: Vec<S> = substitutes.iter().map(|c| current.rename(name, c)).collect();
            let preds = env.score_subjects(&variants, true_label)?;

            if let Some(hit) = preds.iter().position(|p| env.success.is_met(&baseline, p)) {
                renames.push(Replacement {
                    original: name.to_string(),
                    replacement: substitutes[hit].clone(),
                });
                let adversarial = variants[hit].clone();
                let pred = preds[hit].clone();
                info!(
                    identifier = name,
                    replacement = %substitutes[hit],
                    score = baseline.retained(&pred),
                    "greedy attack succeeded"
                );
                result.candidates.push(ScoredProgram {
                    program: adversarial.source(),
                    score: baseline.retained(&pred),
                });
                return Ok(self.finish(
                    result,
                    Outcome::Succeeded,
                    renames,
                    &positions,
                    &baseline,
                    adversarial,
                    pred,
                ));
            }

            let best = preds
                .iter()
                .enumerate()
                .map(|(i, p)| (i, current_score - baseline.retained(p)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

            match best {
                Some((i, gap)) if gap > 0.0 => {
                    let new_score = baseline.retained(&preds[i]);
                    info!(
                        identifier = name,
                        replacement = %substitutes[i],
                        old_score = current_score,
                        new_score,
                        "greedy commit"
                    );
                    renames.push(Replacement {
                        original: name.to_string(),
                        replacement: substitutes[i].clone(),
                    });
                    current = variants[i].clone();
                    current_pred = preds[i].clone();
                    current_score = new_score;
                    result.candidates.push(ScoredProgram {
                        program: current.source(),
                        score: current_score,
                    });
                }
                _ => {
                    debug!(identifier = name, score = current_score, "greedy skip");
                }
            }
        }

        Ok(self.finish(
            result,
            Outcome::SearchExhausted,
            renames,
            &positions,
            &baseline,
            current,
            current_pred,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish<S: Subject>(
        &self,
        mut result: AttackResult,
        outcome: Outcome,
        renames: Vec<Replacement>,
        positions: &crate::program::PositionMap,
        baseline: &super::Baseline,
        current: S,
        pred: Prediction,
    ) -> GreedyRun<S> {
        result.outcome = outcome;
        result.set_replacements(renames, positions);
        result.set_final(baseline, &pred);
        result.adversarial = Some(current.source());
        result
            .candidates
            .sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
        GreedyRun {
            result,
            current,
            prediction: pred,
        }
    }
}
