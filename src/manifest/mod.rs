//! Test manifests
//!
//! The pending-file source: an ordered list of `(runner, file)` pairs known
//! before the run starts. The coordinator never discovers files itself.
//!
//! JSON and YAML manifests deserialize as a list of assignments; any other
//! extension is read as plain text, one `runner path` pair per line with
//! `#` comments.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::protocol::{RunnerKind, TestAssignment};

/// Ordered set of assignments for one run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<TestAssignment>,
}

impl Manifest {
    /// Build a manifest, rejecting duplicate `(runner, file)` pairs —
    /// exactly-once accounting needs unique keys
    pub fn new(entries: Vec<TestAssignment>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry) {
                bail!("duplicate manifest entry: {entry}");
            }
        }
        Ok(Self { entries })
    }

    /// Load a manifest from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;

        let entries = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).context("Failed to parse JSON manifest")?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).context("Failed to parse YAML manifest")?
            }
            _ => parse_lines(&content)?,
        };

        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_assignments(self) -> Vec<TestAssignment> {
        self.entries
    }
}

/// Parse the plain-text manifest format
fn parse_lines(content: &str) -> Result<Vec<TestAssignment>> {
    let mut entries = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((tag, file)) = line.split_once(char::is_whitespace) else {
            bail!("manifest line {}: expected `runner path`", number + 1);
        };
        let Some(runner) = RunnerKind::from_str(tag) else {
            bail!("manifest line {}: unknown runner kind `{tag}`", number + 1);
        };

        entries.push(TestAssignment::new(runner, file.trim()));
    }

    Ok(entries)
}
