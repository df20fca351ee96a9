//! ═══════════════════════════════════════════════════════════════════════════════
//! EXPORT MODULE — JSON Lines Persistence
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Every persisted file is JSON Lines: one complete JSON document per line,
//! appended in a single write and never rewritten.
//!
//! - Input examples for the CLI
//! - Per-example attack records
//! - Adversarial demonstrations and their answers
//!
//! ═══════════════════════════════════════════════════════════════════════════════

pub mod jsonl;

pub use jsonl::{AnswerRecord, AttackInput, AttackRecord, DemoRecord, JsonlSink};
