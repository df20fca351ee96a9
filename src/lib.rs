//! ═══════════════════════════════════════════════════════════════════════════════
//! VARFLIP — Identifier-Renaming Adversarial Attacks on Code Models
//! ═══════════════════════════════════════════════════════════════════════════════
//! Black-box search for semantics-preserving renamings that flip a code
//! model's prediction or degrade its output. Single crate, single binary.
//! ═══════════════════════════════════════════════════════════════════════════════

#![allow(clippy::too_many_arguments)]
#![allow(clippy::new_without_default)]

// ═══════════════════════════════════════════════════════════════════════════════
// FOUNDATION MODULES — programs, substitutes, oracle inputs
// ═══════════════════════════════════════════════════════════════════════════════

pub mod feature;
pub mod program;
pub mod substitutes;

// ═══════════════════════════════════════════════════════════════════════════════
// CORE MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod attack;
pub mod config;
pub mod error;
pub mod export;
pub mod oracle;

// Re-export common types
pub use attack::{
    AttackEnv, AttackMethod, AttackResult, CandidateSource, DemoAttacker, GeneticAttacker,
    GreedyAttacker, MhmAttacker, Outcome, SuccessCriterion,
};
pub use config::AttackConfig;
pub use error::{Result, VarflipError};
pub use feature::{Feature, FeatureBuilder, FeatureLayout};
pub use oracle::{CountingOracle, FnOracle, HttpOracle, Oracle, OracleError, Prediction};
pub use program::{IdentifierExtractor, Language, Program};
pub use substitutes::{SubstitutionTable, Vocabulary};
