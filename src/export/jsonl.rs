//! Append-only JSON Lines sink and the record types written through it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::attack::AttackResult;
use crate::error::Result;
use crate::substitutes::SubstitutionTable;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// One program to attack, as read by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackInput {
    #[serde(default)]
    pub id: Option<String>,
    pub code: String,
    /// Ground-truth label (classification)
    #[serde(default)]
    pub label: Option<usize>,
    #[serde(default)]
    pub substitutes: SubstitutionTable,
}

/// Outcome of one processed example
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub result: AttackResult,
}

impl AttackRecord {
    pub fn new(id: Option<String>, result: AttackResult) -> Self {
        Self {
            timestamp: Utc::now(),
            id,
            result,
        }
    }
}

/// Demonstrations shown to the model for one query (possibly renamed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoRecord {
    pub query: String,
    pub demo: Vec<String>,
}

/// Model answer for the persisted demonstrations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answer: Option<String>,
    pub score: f64,
    /// Quality metrics reported by the oracle for `answer`
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only JSON Lines file
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `record` and append it as one line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Every record in the file; blank lines are skipped
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        read_jsonl(&self.path)
    }
}

/// Parse a JSON Lines file
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
