//! Shared typed models used across the indexer, run-history and store layers.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

/// Source languages the import extractor understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    C,
    Cpp,
    Java,
    Kotlin,
    Go,
    Ruby,
    Php,
    Rust,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Rust => "rust",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source files and graphs
// ---------------------------------------------------------------------------

/// Immutable snapshot of one file taken at scan time.
///
/// `path` is repo-relative and POSIX-separated; it is the unique key of the
/// file everywhere in the crate.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: String,
    pub language: Option<Language>,
    pub content: Arc<str>,
    pub content_hash: String,
}

/// One directed import from `from` to a resolved file, or an unresolved
/// target when `resolved` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub from: String,
    pub raw: String,
    pub line_number: usize,
    pub resolved: Option<String>,
}

/// Import target that could not be mapped to a file in the repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedImport {
    pub from: String,
    pub raw: String,
    pub line_number: usize,
}

/// Rooted dependency graph: the root plus every transitively reachable
/// local file, each present exactly once.
#[derive(Clone, Debug)]
pub struct DependencyGraph {
    pub root: String,
    /// Nodes in discovery order, keyed by repo-relative path.
    pub nodes: IndexMap<String, SourceFile>,
    pub edges: Vec<ImportEdge>,
}

impl DependencyGraph {
    /// Sorted paths of every node except the root.
    pub fn dependency_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| **p != self.root)
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn dependency_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn unresolved(&self) -> Vec<UnresolvedImport> {
        self.edges
            .iter()
            .filter(|e| e.resolved.is_none())
            .map(|e| UnresolvedImport {
                from: e.from.clone(),
                raw: e.raw.clone(),
                line_number: e.line_number,
            })
            .collect()
    }
}

/// Digest over a root path and the sorted content hashes of its graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphFingerprint {
    pub root: String,
    pub digest: String,
    pub node_count: usize,
}

/// Per-root result handed to the CI action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerprintReport {
    pub root_file: String,
    pub fingerprint: String,
    pub dependency_count: usize,
    pub dependency_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<UnresolvedImport>,
    #[serde(default)]
    pub test_cases: Vec<String>,
    /// Whether the fingerprint differs from the last stored one. `None` when
    /// no store was consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

/// Status of one root in a batch scan. Exactly one of `report` / `error`
/// is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootScan {
    pub root_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<FingerprintReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RootScan {
    pub fn is_ok(&self) -> bool {
        self.report.is_some()
    }
}

// ---------------------------------------------------------------------------
// Test identities and outcomes
// ---------------------------------------------------------------------------

/// Name used for a root file whose individual test cases are unknown.
pub const FILE_LEVEL_TEST: &str = "*";

/// The unit outcome history and classifications attach to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestIdentity {
    pub root_file: String,
    pub test_name: String,
}

impl TestIdentity {
    pub fn new(root_file: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            root_file: root_file.into(),
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.root_file, self.test_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" => Some(Outcome::Pass),
            "fail" | "failed" => Some(Outcome::Fail),
            _ => None,
        }
    }
}

/// A single observed run. Never mutated once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub identity: TestIdentity,
    pub timestamp_ms: u64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_signature: Option<String>,
    /// Graph fingerprint the test ran against, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    Stable,
    Flaky,
    ConsistentlyFailing,
    InsufficientData,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Stable => "stable",
            Label::Flaky => "flaky",
            Label::ConsistentlyFailing => "consistently-failing",
            Label::InsufficientData => "insufficient-data",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived verdict for one identity; recomputed from outcome history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub identity: TestIdentity,
    pub pass_rate: f64,
    pub sample_count: usize,
    pub passes: usize,
    pub label: Label,
    pub low_confidence: bool,
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Analysis,
    Pr,
}

impl UsageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageKind::Analysis => "analysis",
            UsageKind::Pr => "pr",
        }
    }
}

/// Per-period allowances of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub analyses_per_period: u32,
    pub prs_per_period: u32,
}

impl PlanLimits {
    pub const FREE_TIER: PlanLimits = PlanLimits {
        analyses_per_period: 10,
        prs_per_period: 3,
    };

    pub fn limit_for(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Analysis => self.analyses_per_period,
            UsageKind::Pr => self.prs_per_period,
        }
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self::FREE_TIER
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub account_id: String,
    pub period: String,
    pub analyses_used: u32,
    pub prs_used: u32,
    pub limits: PlanLimits,
}

impl UsageCounter {
    pub fn new(account_id: &str, period: &str, limits: PlanLimits) -> Self {
        Self {
            account_id: account_id.to_string(),
            period: period.to_string(),
            analyses_used: 0,
            prs_used: 0,
            limits,
        }
    }

    pub fn used(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Analysis => self.analyses_used,
            UsageKind::Pr => self.prs_used,
        }
    }

    pub fn remaining(&self, kind: UsageKind) -> u32 {
        self.limits.limit_for(kind).saturating_sub(self.used(kind))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    QuotaExceeded,
    NotFlaky,
    InsufficientData,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::QuotaExceeded => "quota_exceeded",
            DenyReason::NotFlaky => "not_flaky",
            DenyReason::InsufficientData => "insufficient_data",
        }
    }
}

/// Result of a consumption request, with the quota left for that kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Granted {
        kind: UsageKind,
        remaining: u32,
    },
    Denied {
        kind: UsageKind,
        reason: DenyReason,
        remaining: u32,
    },
}

impl GateDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, GateDecision::Granted { .. })
    }
}
