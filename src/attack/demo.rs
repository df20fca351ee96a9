//! In-context demonstration attack.
//!
//! The attacked input is a set of demonstrations (code plus summary) shown
//! to a generation model ahead of a query. Identifiers are renamed across
//! every demonstration at once, using the union of the per-demonstration
//! substitution tables, with the greedy strategy. Each processed example
//! appends exactly one demonstration record and one answer record, on every
//! exit path.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::greedy::GreedyAttacker;
use super::{AttackEnv, AttackMethod, AttackResult, Subject};
use crate::error::Result;
use crate::export::{AnswerRecord, DemoRecord, JsonlSink};
use crate::oracle::Oracle;
use crate::program::Program;
use crate::substitutes::SubstitutionTable;

/// One demonstration: a snippet and its reference summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demo {
    pub code: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub substitutes: SubstitutionTable,
}

/// A query with the demonstrations that precede it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoExample {
    pub query: String,
    /// Expected answer for the query, if known
    #[serde(default)]
    pub reference: Option<String>,
    pub demos: Vec<Demo>,
}

impl DemoExample {
    /// Union of every demonstration's substitution table
    pub fn merged_substitutes(&self) -> SubstitutionTable {
        SubstitutionTable::merge(self.demos.iter().map(|d| &d.substitutes))
    }
}

/// Demonstrations plus query, rendered as one prompt
#[derive(Debug, Clone, PartialEq)]
pub struct DemoBundle {
    query: String,
    demos: Vec<(Program, String)>,
}

impl DemoBundle {
    pub fn new(example: &DemoExample) -> Self {
        Self {
            query: example.query.clone(),
            demos: example
                .demos
                .iter()
                .map(|d| (Program::parse(&d.code), d.summary.clone()))
                .collect(),
        }
    }

    /// Current source of every demonstration
    pub fn demo_sources(&self) -> Vec<String> {
        self.demos.iter().map(|(p, _)| p.source()).collect()
    }

    fn map_programs(&self, f: impl Fn(&Program) -> Program) -> Self {
        Self {
            query: self.query.clone(),
            demos: self.demos.iter().map(|(p, s)| (f(p), s.clone())).collect(),
        }
    }
}

impl Subject for DemoBundle {
    fn words(&self) -> Vec<String> {
        self.demos.iter().flat_map(|(p, _)| p.words()).collect()
    }

    fn render(&self, words: &[String]) -> String {
        let mut prompt = String::new();
        let mut offset = 0;
        for (program, summary) in &self.demos {
            let end = (offset + program.len()).min(words.len());
            prompt.push_str("Code: ");
            prompt.push_str(&words[offset..end].join(" "));
            prompt.push_str("\nSummary: ");
            prompt.push_str(summary);
            prompt.push_str("\n\n");
            offset = end;
        }
        prompt.push_str("Code: ");
        prompt.push_str(&self.query);
        prompt.push_str("\nSummary:");
        prompt
    }

    fn rename(&self, old: &str, new: &str) -> Self {
        self.map_programs(|p| p.rename(old, new))
    }

    fn rename_all(&self, renames: &[(&str, &str)]) -> Self {
        self.map_programs(|p| p.rename_all(renames.iter().copied()))
    }

    fn contains_identifier(&self, name: &str) -> bool {
        self.demos.iter().any(|(p, _)| p.contains_identifier(name))
    }

    fn source(&self) -> String {
        self.demo_sources().join("\n\n")
    }
}

/// Greedy attack over demonstrations, persisted as JSON Lines
pub struct DemoAttacker<'a, O: Oracle + ?Sized> {
    env: AttackEnv<'a, O>,
    demo_sink: JsonlSink,
    answer_sink: JsonlSink,
}

impl<'a, O: Oracle + ?Sized> DemoAttacker<'a, O> {
    pub fn new(env: AttackEnv<'a, O>, demo_sink: JsonlSink, answer_sink: JsonlSink) -> Self {
        Self {
            env,
            demo_sink,
            answer_sink,
        }
    }

    /// Every prompt scored for `example` carries its reference answer
    pub fn attack(&self, example: &DemoExample) -> Result<AttackResult> {
        let bundle = DemoBundle::new(example);
        let table = example.merged_substitutes();
        let env = self.env.clone().with_reference(example.reference.clone());
        let greedy = GreedyAttacker::new(env);
        let run = greedy.run(&bundle, &table, None)?;

        self.demo_sink.append(&DemoRecord {
            query: example.query.clone(),
            demo: run.current.demo_sources(),
        })?;
        self.answer_sink.append(&AnswerRecord {
            answer: run.prediction.answer.clone(),
            score: run.prediction.confidence(),
            metrics: run.prediction.metrics.clone(),
        })?;

        let mut result = run.result;
        result.method = AttackMethod::Demo;
        result.metrics = run.prediction.metrics;
        info!(outcome = %result.outcome, changed = result.nb_changed_var, "demo attack done");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> DemoExample {
        serde_json::from_str(
            r#"{
                "query": "int sub(int x,int y){return x-y;}",
                "demos": [
                    {"code": "int add(int a,int b){return a+b;}", "summary": "adds", "substitutes": {"a": ["m"]}},
                    {"code": "int neg(int a){return -a;}", "summary": "negates", "substitutes": {"a": ["n"], "b": ["k"]}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_merged_table() {
        let merged = example().merged_substitutes();
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(merged.get("a").unwrap(), &["m".to_string(), "n".to_string()]);
    }

    #[test]
    fn test_bundle_renames_every_demo() {
        let bundle = DemoBundle::new(&example());
        let renamed = bundle.rename("a", "q");
        assert_eq!(
            renamed.demo_sources(),
            vec!["int add(int q,int b){return q+b;}", "int neg(int q){return -q;}"]
        );
        assert!(!renamed.contains_identifier("a"));
    }

    #[test]
    fn test_render_masks_stay_in_their_demo() {
        let bundle = DemoBundle::new(&example());
        let words = bundle.words();
        let first_len = Program::parse("int add(int a,int b){return a+b;}").len();
        assert_eq!(words.len(), first_len + Program::parse("int neg(int a){return -a;}").len());

        let masked = bundle.masked_inputs(&[first_len + 4], "<unk>");
        assert!(masked[0].contains("Code: int neg ( int <unk> )"));
        assert!(masked[0].ends_with("Code: int sub(int x,int y){return x-y;}\nSummary:"));
    }
}
