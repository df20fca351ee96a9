//! ═══════════════════════════════════════════════════════════════════════════════
//! GENETIC ATTACK — Population Search over Renaming Assignments
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! A chromosome assigns every attackable identifier either to itself or to
//! one of its substitutes. The population is seeded with the identity plus
//! one single-rename chromosome per identifier (its most damaging
//! substitute), then evolved for `max(factor × population, min_generations)`
//! generations.
//!
//! Fitness = baseline score − score the original label keeps under the
//! renamed program. Each generation scores one batch of children; the first
//! child meeting the success criterion ends the run. Otherwise each child
//! fitter than the current worst individual replaces it (steady state).
//! ═══════════════════════════════════════════════════════════════════════════════

use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

use super::operators::{crossover, mutate, select_parents, Chromosome};
use super::{
    prepare, AttackEnv, AttackMethod, AttackResult, Baseline, Outcome, Prepared, Replacement,
    Subject,
};
use crate::config::GeneticConfig;
use crate::oracle::{Oracle, OracleError, Prediction};
use crate::program::PositionMap;
use crate::substitutes::SubstitutionTable;

pub struct GeneticAttacker<'a, O: Oracle + ?Sized> {
    env: AttackEnv<'a, O>,
    config: GeneticConfig,
    batch_size: usize,
}

impl<'a, O: Oracle + ?Sized> GeneticAttacker<'a, O> {
    pub fn new(env: AttackEnv<'a, O>, config: GeneticConfig, batch_size: usize) -> Self {
        Self {
            env,
            config,
            batch_size: batch_size.max(1),
        }
    }

    /// Generation budget for a population of `population` individuals
    pub fn generations(&self, population: usize) -> usize {
        (self.config.generation_factor * population).max(self.config.min_generations)
    }

    /// Run the attack. `initial_replace` fixes the seed substitute per
    /// identifier instead of searching for the most damaging one.
    pub fn attack<S, R>(
        &self,
        subject: &S,
        table: &SubstitutionTable,
        true_label: Option<usize>,
        initial_replace: Option<&HashMap<String, String>>,
        rng: &mut R,
    ) -> Result<AttackResult, OracleError>
    where
        S: Subject,
        R: Rng + ?Sized,
    {
        let env = &self.env;
        let (baseline, positions) = match prepare(env, AttackMethod::Ga, subject, table, true_label)? {
            Prepared::Done(result, _) => return Ok(result),
            Prepared::Ready(b, p) => (b, p),
        };

        let mut result = AttackResult::new(AttackMethod::Ga, subject, true_label);
        result.original_label = Some(baseline.label);
        result.identifiers = positions.names().map(str::to_string).collect();

        // Substitutes that would collide with an existing identifier are dropped
        let local: SubstitutionTable = positions
            .names()
            .map(|name| {
                let cands: Vec<String> = table
                    .get(name)
                    .unwrap_or(&[])
                    .iter()
                    .filter(|c| c.as_str() != name && !subject.contains_identifier(c))
                    .cloned()
                    .collect();
                (name, cands)
            })
            .filter(|(_, cands)| !cands.is_empty())
            .collect();
        if local.is_empty() {
            return Ok(result.with_outcome(Outcome::NoAttackableIdentifiers));
        }

        // ── initialisation ──
        let identity = Chromosome::identity(local.names());
        let mut population = vec![identity.clone()];
        for (name, cands) in local.iter() {
            let value = match initial_replace {
                Some(fixed) => fixed
                    .get(name)
                    .filter(|v| cands.contains(v))
                    .cloned()
                    .unwrap_or_else(|| name.to_string()),
                None => self.most_damaging(subject, name, cands, &baseline, true_label)?,
            };
            population.push(identity.with_gene(name, &value));
        }

        let seeds: Vec<S> = population[1..].iter().map(|c| c.apply(subject)).collect();
        let seed_preds = env.score_subjects(&seeds, true_label)?;
        let mut fitness = vec![0.0];
        for (k, pred) in seed_preds.iter().enumerate() {
            if env.success.is_met(&baseline, pred) {
                info!(generation = 0, "genetic attack succeeded at initialisation");
                return Ok(self.succeed(result, &population[k + 1], &seeds[k], pred, &positions, &baseline));
            }
            fitness.push(baseline.damage(pred));
        }

        // ── evolution ──
        let generations = self.generations(population.len());
        debug!(population = population.len(), generations, "genetic search start");

        for generation in 0..generations {
            let children: Vec<Chromosome> = (0..self.batch_size)
                .map(|_| self.breed(rng, &population, &fitness, &local))
                .collect();
            let variants: Vec<S> = children.iter().map(|c| c.apply(subject)).collect();
            let preds = env.score_subjects(&variants, true_label)?;

            if let Some(k) = preds.iter().position(|p| env.success.is_met(&baseline, p)) {
                info!(generation, "genetic attack succeeded");
                return Ok(self.succeed(result, &children[k], &variants[k], &preds[k], &positions, &baseline));
            }

            for (child, pred) in children.into_iter().zip(preds.iter()) {
                let child_fitness = baseline.damage(pred);
                let (worst, worst_fitness) = fitness
                    .iter()
                    .copied()
                    .enumerate()
                    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                    .unwrap_or((0, f64::INFINITY));
                if child_fitness > worst_fitness {
                    population[worst] = child;
                    fitness[worst] = child_fitness;
                }
            }

            debug!(
                generation,
                best = fitness.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                "generation done"
            );
        }

        info!(generations, "genetic search exhausted");
        Ok(result)
    }

    /// Best single substitute for `name` (one batched call), or the name
    /// itself when no substitute lowers the baseline score
    fn most_damaging<S: Subject>(
        &self,
        subject: &S,
        name: &str,
        cands: &[String],
        baseline: &Baseline,
        true_label: Option<usize>,
    ) -> Result<String, OracleError> {
        let variants: Vec<S> = cands.iter().map(|c| subject.rename(name, c)).collect();
        let preds = self.env.score_subjects(&variants, true_label)?;
        let best = preds
            .iter()
            .map(|p| baseline.damage(p))
            .enumerate()
            .filter(|(_, gap)| *gap > 0.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        Ok(match best {
            Some((i, _)) => cands[i].clone(),
            None => name.to_string(),
        })
    }

    /// One child: crossover with the configured probability, else mutation.
    /// Degenerate crossovers fall back to mutating the first parent.
    fn breed<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        population: &[Chromosome],
        fitness: &[f64],
        table: &SubstitutionTable,
    ) -> Chromosome {
        let p: f64 = rng.gen();
        let (i1, i2) = select_parents(rng, fitness, self.config.parent_selection);
        let (parent_1, parent_2) = (&population[i1], &population[i2]);

        if p < self.config.cross_probability {
            if parent_1 == parent_2 {
                return mutate(rng, parent_1, table);
            }
            let (child, _) = crossover(rng, parent_1, parent_2);
            if &child == parent_1 || &child == parent_2 {
                return mutate(rng, parent_1, table);
            }
            child
        } else {
            mutate(rng, parent_1, table)
        }
    }

    fn succeed<S: Subject>(
        &self,
        mut result: AttackResult,
        chromosome: &Chromosome,
        adversarial: &S,
        pred: &Prediction,
        positions: &PositionMap,
        baseline: &Baseline,
    ) -> AttackResult {
        let renames = chromosome
            .changed()
            .into_iter()
            .map(|(k, v)| Replacement {
                original: k.to_string(),
                replacement: v.to_string(),
            })
            .collect();
        result.outcome = Outcome::Succeeded;
        result.set_replacements(renames, positions);
        result.set_final(baseline, pred);
        result.adversarial = Some(adversarial.source());
        result
    }
}
