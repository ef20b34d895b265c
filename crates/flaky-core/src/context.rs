//! Explicitly constructed engine state shared by scan workers.
//!
//! A `ScanContext` owns the file cache, resolver, outcome log and usage gate
//! for one repository. Workers borrow it; nothing here is process-global.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::FlakyConfig;
use crate::errors::{FlakyError, FlakyResult};
use crate::indexer::cache::FileCache;
use crate::indexer::pipeline;
use crate::indexer::resolve::{AliasTable, Resolver};
use crate::models::{Classification, OutcomeRecord, RootScan, TestIdentity};
use crate::runs::classifier::{Classifier, ClassifierPolicy};
use crate::runs::gate::{BillingPeriod, FixDecision, UsageGate};
use crate::runs::recorder::{OutcomeRecorder, RecordOutcome};

pub struct ScanContext {
    repo_root: PathBuf,
    config: FlakyConfig,
    policy: ClassifierPolicy,
    cache: FileCache,
    resolver: Resolver,
    recorder: OutcomeRecorder,
    gate: UsageGate,
}

impl ScanContext {
    pub fn new(repo_root: &Path, config: FlakyConfig) -> FlakyResult<Self> {
        if !repo_root.is_dir() {
            return Err(FlakyError::Config(format!(
                "repository root is not a directory: {}",
                repo_root.display()
            )));
        }
        let aliases = AliasTable::from_config(&config.aliases);
        let resolver = Resolver::new(repo_root, aliases);
        info!(
            repo = %repo_root.display(),
            aliases = config.aliases.len(),
            go_module = resolver.go_module().unwrap_or("-"),
            workers = config.workers,
            "scan context ready"
        );
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            policy: config.policy(),
            cache: FileCache::new(repo_root),
            gate: UsageGate::new(config.plan),
            recorder: OutcomeRecorder::new(),
            resolver,
            config,
        })
    }

    /// Build a context from `<repo_root>/.flaky-autopilot.json` (or defaults).
    pub fn load(repo_root: &Path) -> FlakyResult<Self> {
        let config = FlakyConfig::load(repo_root)?;
        Self::new(repo_root, config)
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &FlakyConfig {
        &self.config
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn recorder(&self) -> &OutcomeRecorder {
        &self.recorder
    }

    pub fn gate(&self) -> &UsageGate {
        &self.gate
    }

    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::new(&self.recorder, self.policy)
    }

    // -- conveniences over the components -----------------------------------

    pub fn scan(&self, roots: &[String]) -> Vec<RootScan> {
        pipeline::scan_roots(self, roots)
    }

    pub fn scan_all(&self) -> Vec<RootScan> {
        pipeline::scan_repository(self)
    }

    /// Drop cached file snapshots so the next scan sees fresh content.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn record(&self, record: OutcomeRecord) -> RecordOutcome {
        self.recorder.record(record)
    }

    pub fn classify(&self, identity: &TestIdentity) -> Classification {
        self.classifier().classify(identity)
    }

    /// Classify `identity` and ask the gate for an analysis and a PR.
    pub fn request_fix(&self, account_id: &str, period: &BillingPeriod, identity: &TestIdentity) -> FixDecision {
        let classification = self.classify(identity);
        self.gate.request_fix(account_id, period, &classification)
    }
}
