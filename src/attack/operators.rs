//! Genetic operators over renaming assignments.
//!
//! The random generator is threaded through every operator so a run is
//! reproducible from its seed.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Subject;
use crate::substitutes::SubstitutionTable;

/// Assignment of every attackable identifier to itself or a substitute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chromosome {
    genes: Vec<(String, String)>,
}

impl Chromosome {
    /// Every identifier mapped to itself
    pub fn identity<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            genes: names
                .into_iter()
                .map(|n| {
                    let n = n.into();
                    (n.clone(), n)
                })
                .collect(),
        }
    }

    /// Copy with `name` assigned to `value`
    pub fn with_gene(&self, name: &str, value: &str) -> Self {
        let mut next = self.clone();
        if let Some(gene) = next.genes.iter_mut().find(|(k, _)| k == name) {
            gene.1 = value.to_string();
        }
        next
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.genes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn genes(&self) -> &[(String, String)] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Genes whose value differs from the identifier
    pub fn changed(&self) -> Vec<(&str, &str)> {
        self.genes
            .iter()
            .filter(|(k, v)| k != v)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Render the assignment onto the original subject
    pub fn apply<S: Subject>(&self, subject: &S) -> S {
        subject.rename_all(&self.changed())
    }
}

/// How two parents are drawn from the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentSelection {
    /// Both parents uniformly at random
    #[default]
    Uniform,
    /// Probability proportional to fitness (shifted to be positive)
    FitnessProportional,
}

/// Indices of two parents (possibly the same one twice)
pub fn select_parents<R: Rng + ?Sized>(
    rng: &mut R,
    fitness: &[f64],
    policy: ParentSelection,
) -> (usize, usize) {
    let n = fitness.len().max(1);
    if policy == ParentSelection::FitnessProportional {
        let min = fitness.iter().cloned().fold(f64::INFINITY, f64::min);
        let weights: Vec<f64> = fitness.iter().map(|f| f - min + 1e-6).collect();
        if let Ok(dist) = WeightedIndex::new(&weights) {
            return (dist.sample(rng), dist.sample(rng));
        }
    }
    (rng.gen_range(0..n), rng.gen_range(0..n))
}

/// Single-point crossover: genes before a random cut point are swapped
pub fn crossover<R: Rng + ?Sized>(
    rng: &mut R,
    parent_1: &Chromosome,
    parent_2: &Chromosome,
) -> (Chromosome, Chromosome) {
    let n = parent_1.len().min(parent_2.len());
    if n == 0 {
        return (parent_1.clone(), parent_2.clone());
    }
    let cut = rng.gen_range(0..n);
    let mut child_1 = parent_1.clone();
    let mut child_2 = parent_2.clone();
    for i in 0..cut {
        child_1.genes[i].1 = parent_2.genes[i].1.clone();
        child_2.genes[i].1 = parent_1.genes[i].1.clone();
    }
    (child_1, child_2)
}

/// Reassign one random identifier to one of its substitutes
pub fn mutate<R: Rng + ?Sized>(
    rng: &mut R,
    chromosome: &Chromosome,
    table: &SubstitutionTable,
) -> Chromosome {
    let Some((name, _)) = chromosome.genes.choose(rng) else {
        return chromosome.clone();
    };
    match table.get(name).and_then(|cands| cands.choose(rng)) {
        Some(value) => chromosome.with_gene(name, value),
        None => chromosome.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_identity_has_no_changes() {
        let c = Chromosome::identity(["a", "b"]);
        assert!(c.changed().is_empty());
        let p = Program::parse("int a = b;");
        assert_eq!(c.apply(&p), p);
    }

    #[test]
    fn test_apply_renames_simultaneously() {
        let c = Chromosome::identity(["a", "b"]).with_gene("a", "b").with_gene("b", "a");
        let p = Program::parse("int a = b;");
        assert_eq!(c.apply(&p).source(), "int b = a;");
        assert_eq!(c.changed().len(), 2);
    }

    #[test]
    fn test_crossover_mixes_genes() {
        let mut rng = StdRng::seed_from_u64(3);
        let p1 = Chromosome::identity(["a", "b", "c"]);
        let p2 = Chromosome::identity(["a", "b", "c"])
            .with_gene("a", "x")
            .with_gene("b", "y")
            .with_gene("c", "z");
        for _ in 0..20 {
            let (c1, c2) = crossover(&mut rng, &p1, &p2);
            for i in 0..3 {
                let g1 = &c1.genes()[i].1;
                let g2 = &c2.genes()[i].1;
                assert_ne!(g1, g2);
                assert!(g1 == &p1.genes()[i].1 || g1 == &p2.genes()[i].1);
            }
        }
    }

    #[test]
    fn test_mutate_uses_table() {
        let mut rng = StdRng::seed_from_u64(11);
        let table: SubstitutionTable = [("a", vec!["x"]), ("b", vec!["y"])].into_iter().collect();
        let c = Chromosome::identity(["a", "b"]);
        for _ in 0..10 {
            let m = mutate(&mut rng, &c, &table);
            let changed = m.changed();
            assert_eq!(changed.len(), 1);
            assert!(changed[0] == ("a", "x") || changed[0] == ("b", "y"));
        }
    }

    #[test]
    fn test_select_parents_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let fitness = [0.0, 0.5, 0.1];
        for policy in [ParentSelection::Uniform, ParentSelection::FitnessProportional] {
            for _ in 0..50 {
                let (i, j) = select_parents(&mut rng, &fitness, policy);
                assert!(i < 3 && j < 3);
            }
        }
    }
}
