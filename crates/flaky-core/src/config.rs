//! Repository configuration (`.flaky-autopilot.json`) and environment overrides.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{FlakyError, FlakyResult};
use crate::models::PlanLimits;
use crate::runs::classifier::ClassifierPolicy;

pub const CONFIG_FILE_NAME: &str = ".flaky-autopilot.json";

const DEFAULT_WORKERS: usize = 4;

/// Optional per-field overrides of [`ClassifierPolicy::DEFAULT`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub min_samples: Option<usize>,
    pub flaky_floor: Option<f64>,
    pub stable_floor: Option<f64>,
    pub recent_window: Option<usize>,
    pub low_confidence_margin: Option<f64>,
}

impl PolicyOverrides {
    pub fn apply(&self, base: ClassifierPolicy) -> ClassifierPolicy {
        ClassifierPolicy {
            min_samples: self.min_samples.unwrap_or(base.min_samples),
            flaky_floor: self.flaky_floor.unwrap_or(base.flaky_floor),
            stable_floor: self.stable_floor.unwrap_or(base.stable_floor),
            recent_window: self.recent_window.unwrap_or(base.recent_window),
            low_confidence_margin: self
                .low_confidence_margin
                .unwrap_or(base.low_confidence_margin),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlakyConfig {
    /// Import prefix → directory relative to the repository root.
    pub aliases: IndexMap<String, String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub workers: usize,
    pub exclude_sensitive: bool,
    pub classifier: PolicyOverrides,
    pub plan: PlanLimits,
}

impl Default for FlakyConfig {
    fn default() -> Self {
        Self {
            aliases: IndexMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            workers: DEFAULT_WORKERS,
            exclude_sensitive: true,
            classifier: PolicyOverrides::default(),
            plan: PlanLimits::default(),
        }
    }
}

impl FlakyConfig {
    /// Load `<repo_root>/.flaky-autopilot.json` if present, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(repo_root: &Path) -> FlakyResult<Self> {
        let path = repo_root.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            let parsed = Self::from_json(&content)?;
            if !parsed.aliases.is_empty() {
                info!(count = parsed.aliases.len(), "Aliases detected");
            }
            parsed
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_json(content: &str) -> FlakyResult<Self> {
        serde_json::from_str(content).map_err(|e| FlakyError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(workers) = env_number("FLAKY_WORKERS") {
            self.workers = workers;
        }
        if let Some(min_samples) = env_number("FLAKY_MIN_SAMPLES") {
            self.classifier.min_samples = Some(min_samples);
        }
        self.exclude_sensitive = env_flag("FLAKY_EXCLUDE_SENSITIVE", self.exclude_sensitive);
        self.workers = self.workers.max(1);
    }

    pub fn policy(&self) -> ClassifierPolicy {
        self.classifier.apply(ClassifierPolicy::DEFAULT)
    }
}

/// Truthiness of an environment variable; anything other than
/// `0`/`false`/`no`/`off` counts as set.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

fn env_number(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}
