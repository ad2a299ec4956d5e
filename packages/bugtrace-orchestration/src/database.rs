//! Bug database loading
//!
//! The database is a JSON array of entries:
//!
//! ```json
//! [{"issue": 42, "rev_bug": "abc123", "rev_fix": "def456",
//!   "testcase": "var a = [];\na.length = 4294967295;",
//!   "bld_typ": "debug.linux"}]
//! ```
//!
//! Entries that cannot drive a pass (no `rev_bug`, no way to name the bug,
//! duplicate name) are rejected individually; the rest load normally.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{compile_pattern, NamingConfig};
use crate::error::{ReproError, Result};
use crate::job::Variant;

/// Test the binary is run against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestInput {
    /// Script text, written to a scratch file before each run
    Inline(String),
    /// Test file, relative to the repo dir unless absolute
    File(PathBuf),
}

/// Per-record build command selection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildOverride {
    #[default]
    None,
    /// Verbatim command line (`bld_cmd`)
    Command(String),
    /// Named build type (`bld_typ`), looked up in the build aliases
    Alias(String),
}

/// One loaded, validated database entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugRecord {
    pub id: String,
    pub rev_bug: String,
    pub rev_fix: Option<String>,
    pub input: Option<TestInput>,
    pub build: BuildOverride,
}

impl BugRecord {
    /// Variants to reproduce, bug side first
    pub fn variants(&self) -> Vec<Variant> {
        match self.rev_fix {
            Some(_) => vec![Variant::Bug, Variant::Fix],
            None => vec![Variant::Bug],
        }
    }

    pub fn revision(&self, variant: Variant) -> Option<&str> {
        match variant {
            Variant::Bug => Some(&self.rev_bug),
            Variant::Fix => self.rev_fix.as_deref(),
        }
    }
}

/// Entry that was skipped at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Zero-based position in the JSON array
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IssueNumber {
    Number(u64),
    Text(String),
}

impl IssueNumber {
    fn render(&self) -> String {
        match self {
            IssueNumber::Number(n) => n.to_string(),
            IssueNumber::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    filepath: Option<String>,
    testcase: Option<String>,
    rev_bug: Option<String>,
    rev_fix: Option<String>,
    issue: Option<IssueNumber>,
    bld_cmd: Option<String>,
    bld_typ: Option<String>,
}

/// Derives record ids
///
/// The id comes from the test file name (`regression-test-issue-1234.js` ->
/// `1234`, any other name -> its stem) or else from the issue number
/// (`42` -> `i42`). The configured tag is appended either way.
#[derive(Debug, Clone)]
pub struct RecordIdPolicy {
    file_pattern: Regex,
    tag: String,
}

impl RecordIdPolicy {
    pub fn new(file_pattern: Regex, tag: impl Into<String>) -> Self {
        Self {
            file_pattern,
            tag: tag.into(),
        }
    }

    pub fn from_naming(naming: &NamingConfig) -> Result<Self> {
        let pattern = compile_pattern("naming.id_pattern", &naming.id_pattern)?;
        Ok(Self::new(pattern, naming.tag.clone()))
    }

    fn derive(&self, filepath: Option<&str>, issue: Option<&IssueNumber>) -> Option<String> {
        let base = match (filepath, issue) {
            (Some(filepath), _) => {
                let file_name = Path::new(filepath).file_name()?.to_str()?;
                match self.file_pattern.captures(file_name).and_then(|c| c.get(1)) {
                    Some(id) => id.as_str().to_string(),
                    None => Path::new(file_name).file_stem()?.to_str()?.to_string(),
                }
            }
            (None, Some(issue)) => format!("i{}", issue.render()),
            (None, None) => return None,
        };

        let base = base.trim();
        if base.is_empty() || base.contains(['/', '\\']) || base == "." || base == ".." {
            return None;
        }
        Some(format!("{}{}", base, self.tag))
    }
}

/// Result of loading a database
#[derive(Debug, Default)]
pub struct BugDatabase {
    pub records: Vec<BugRecord>,
    pub rejected: Vec<RejectedEntry>,
}

impl BugDatabase {
    /// Load from a JSON file.
    ///
    /// Fails only when the file cannot be read or is not a JSON array.
    pub fn load(path: impl AsRef<Path>, policy: &RecordIdPolicy) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReproError::database(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, policy)
    }

    pub fn parse(json: &str, policy: &RecordIdPolicy) -> Result<Self> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(json).map_err(ReproError::database)?;

        let mut database = BugDatabase::default();
        let mut seen = HashSet::new();

        for (index, value) in entries.into_iter().enumerate() {
            match Self::validate_entry(value, policy) {
                Ok(record) if !seen.insert(record.id.clone()) => {
                    let reason = format!("duplicate record id '{}'", record.id);
                    warn!(index, %reason, "Rejected bug database entry");
                    database.rejected.push(RejectedEntry { index, reason });
                }
                Ok(record) => {
                    debug!(index, id = %record.id, "Loaded bug record");
                    database.records.push(record);
                }
                Err(reason) => {
                    warn!(index, %reason, "Rejected bug database entry");
                    database.rejected.push(RejectedEntry { index, reason });
                }
            }
        }

        Ok(database)
    }

    /// Keep only records whose id is in `ids`
    pub fn retain_ids(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        self.records.retain(|record| ids.contains(&record.id));
    }

    fn validate_entry(
        value: serde_json::Value,
        policy: &RecordIdPolicy,
    ) -> std::result::Result<BugRecord, String> {
        let raw: RawEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;

        let rev_bug = non_empty(raw.rev_bug).ok_or("missing 'rev_bug'")?;
        let id = policy
            .derive(raw.filepath.as_deref(), raw.issue.as_ref())
            .ok_or("cannot derive a record id: no usable 'filepath' or 'issue'")?;

        let input = match (non_empty(raw.testcase), non_empty(raw.filepath)) {
            (Some(text), _) => Some(TestInput::Inline(text)),
            (None, Some(file)) => Some(TestInput::File(PathBuf::from(file))),
            (None, None) => None,
        };

        let build = match (non_empty(raw.bld_cmd), non_empty(raw.bld_typ)) {
            (Some(command), _) => BuildOverride::Command(command),
            (None, Some(alias)) => BuildOverride::Alias(alias),
            (None, None) => BuildOverride::None,
        };

        Ok(BugRecord {
            id,
            rev_bug,
            rev_fix: non_empty(raw.rev_fix),
            input,
            build,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
