//! Usage/eligibility gate for AI analyses and fix PRs.
//!
//! Counters live behind a single lock; every consume is one read-modify-write
//! under that lock, so the last unit of a quota is granted exactly once.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{Classification, DenyReason, GateDecision, Label, PlanLimits, UsageCounter, UsageKind};

/// Calendar month a counter belongs to, formatted `YYYY-MM`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingPeriod(String);

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self(format!("{year:04}-{:02}", month.clamp(1, 12)))
    }

    /// Parse `YYYY-MM`.
    pub fn parse(value: &str) -> Option<Self> {
        let (year, month) = value.trim().split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        (1..=12).contains(&month).then(|| Self::new(year, month))
    }

    /// Period containing the given Unix time in milliseconds (UTC).
    pub fn from_unix_ms(ms: u64) -> Self {
        let days = (ms / 86_400_000) as i64;
        // Civil-from-days conversion over 400-year eras.
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);
        Self::new(year as i32, month as u32)
    }

    pub fn current() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::from_unix_ms(ms)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a test with this label may not be sent for fixing, or `None` when it
/// may.
pub fn fix_refusal(label: Label) -> Option<DenyReason> {
    match label {
        Label::Flaky => None,
        Label::InsufficientData => Some(DenyReason::InsufficientData),
        Label::Stable | Label::ConsistentlyFailing => Some(DenyReason::NotFlaky),
    }
}

/// Outcome of [`UsageGate::request_fix`]. `pr` is `None` when the analysis
/// step was denied and no PR was attempted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixDecision {
    pub analysis: GateDecision,
    pub pr: Option<GateDecision>,
}

pub struct UsageGate {
    limits: PlanLimits,
    counters: Mutex<HashMap<String, UsageCounter>>,
}

impl UsageGate {
    pub fn new(limits: PlanLimits) -> Self {
        Self {
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> PlanLimits {
        self.limits
    }

    /// Consume one unit of `kind` for `account_id` in `period`.
    ///
    /// A later period than the stored one starts fresh counters. Requests for
    /// an earlier period are denied without touching the current counters.
    pub fn try_consume(&self, account_id: &str, period: &BillingPeriod, kind: UsageKind) -> GateDecision {
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(account_id.to_string())
            .or_insert_with(|| UsageCounter::new(account_id, period.as_str(), self.limits));

        if counter.period.as_str() < period.as_str() {
            info!(account_id, from = %counter.period, to = %period, "usage period rolled over");
            *counter = UsageCounter::new(account_id, period.as_str(), self.limits);
        } else if counter.period.as_str() > period.as_str() {
            debug!(account_id, requested = %period, current = %counter.period, "stale period");
            return GateDecision::Denied {
                kind,
                reason: DenyReason::QuotaExceeded,
                remaining: 0,
            };
        }

        if counter.remaining(kind) == 0 {
            debug!(account_id, kind = kind.as_str(), "quota exhausted");
            return GateDecision::Denied {
                kind,
                reason: DenyReason::QuotaExceeded,
                remaining: 0,
            };
        }
        match kind {
            UsageKind::Analysis => counter.analyses_used += 1,
            UsageKind::Pr => counter.prs_used += 1,
        }
        GateDecision::Granted {
            kind,
            remaining: counter.remaining(kind),
        }
    }

    /// Gate automated fixing on the classification: only flaky tests may
    /// consume an analysis and then a PR.
    pub fn request_fix(&self, account_id: &str, period: &BillingPeriod, classification: &Classification) -> FixDecision {
        if let Some(reason) = fix_refusal(classification.label) {
            let remaining = self.remaining(account_id, period, UsageKind::Analysis);
            return FixDecision {
                analysis: GateDecision::Denied {
                    kind: UsageKind::Analysis,
                    reason,
                    remaining,
                },
                pr: None,
            };
        }

        let analysis = self.try_consume(account_id, period, UsageKind::Analysis);
        let pr = analysis
            .is_granted()
            .then(|| self.try_consume(account_id, period, UsageKind::Pr));
        FixDecision { analysis, pr }
    }

    /// Units of `kind` still available to `account_id` in `period`.
    pub fn remaining(&self, account_id: &str, period: &BillingPeriod, kind: UsageKind) -> u32 {
        let counters = self.counters.lock();
        match counters.get(account_id) {
            Some(counter) if counter.period.as_str() == period.as_str() => counter.remaining(kind),
            Some(counter) if counter.period.as_str() > period.as_str() => 0,
            _ => self.limits.limit_for(kind),
        }
    }

    pub fn usage(&self, account_id: &str) -> Option<UsageCounter> {
        self.counters.lock().get(account_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::TestIdentity;

    fn classification(label: Label) -> Classification {
        Classification {
            identity: TestIdentity::new("tests/a.test.js", "t"),
            pass_rate: 0.5,
            sample_count: 20,
            passes: 10,
            label,
            low_confidence: false,
        }
    }

    #[test]
    fn test_billing_period_from_unix_ms() {
        assert_eq!(BillingPeriod::from_unix_ms(0).as_str(), "1970-01");
        // 2024-02-29T12:00:00Z
        assert_eq!(BillingPeriod::from_unix_ms(1_709_208_000_000).as_str(), "2024-02");
        // 2026-10-17T00:00:00Z
        assert_eq!(BillingPeriod::from_unix_ms(1_792_195_200_000).as_str(), "2026-10");
        assert_eq!(BillingPeriod::parse("2026-3"), Some(BillingPeriod::new(2026, 3)));
        assert_eq!(BillingPeriod::parse("2026-13"), None);
    }

    #[test]
    fn test_denies_at_limit() {
        let gate = UsageGate::new(PlanLimits::FREE_TIER);
        let period = BillingPeriod::new(2026, 10);
        for expected_remaining in (0..3).rev() {
            assert_eq!(
                gate.try_consume("acct", &period, UsageKind::Pr),
                GateDecision::Granted {
                    kind: UsageKind::Pr,
                    remaining: expected_remaining
                }
            );
        }
        assert_eq!(
            gate.try_consume("acct", &period, UsageKind::Pr),
            GateDecision::Denied {
                kind: UsageKind::Pr,
                reason: DenyReason::QuotaExceeded,
                remaining: 0
            }
        );
        // Analyses are counted separately.
        assert!(gate.try_consume("acct", &period, UsageKind::Analysis).is_granted());
        assert_eq!(gate.remaining("acct", &period, UsageKind::Analysis), 9);
    }

    #[test]
    fn test_period_rollover_resets_and_stale_period_denied() {
        let gate = UsageGate::new(PlanLimits {
            analyses_per_period: 1,
            prs_per_period: 1,
        });
        let october = BillingPeriod::new(2026, 10);
        let november = BillingPeriod::new(2026, 11);
        assert!(gate.try_consume("acct", &october, UsageKind::Analysis).is_granted());
        assert!(!gate.try_consume("acct", &october, UsageKind::Analysis).is_granted());
        assert!(gate.try_consume("acct", &november, UsageKind::Analysis).is_granted());
        assert!(!gate.try_consume("acct", &october, UsageKind::Analysis).is_granted());
        assert_eq!(gate.usage("acct").unwrap().period, "2026-11");
    }

    #[test]
    fn test_concurrent_consumers_never_over_grant() {
        let gate = Arc::new(UsageGate::new(PlanLimits {
            analyses_per_period: 7,
            prs_per_period: 3,
        }));
        let period = BillingPeriod::new(2026, 10);
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let period = period.clone();
                std::thread::spawn(move || gate.try_consume("acct", &period, UsageKind::Analysis).is_granted())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 7);
        assert_eq!(gate.usage("acct").unwrap().analyses_used, 7);
    }

    #[test]
    fn test_request_fix_only_for_flaky() {
        let gate = UsageGate::new(PlanLimits::FREE_TIER);
        let period = BillingPeriod::new(2026, 10);

        for (label, reason) in [
            (Label::Stable, DenyReason::NotFlaky),
            (Label::ConsistentlyFailing, DenyReason::NotFlaky),
            (Label::InsufficientData, DenyReason::InsufficientData),
        ] {
            let decision = gate.request_fix("acct", &period, &classification(label));
            assert_eq!(
                decision.analysis,
                GateDecision::Denied {
                    kind: UsageKind::Analysis,
                    reason,
                    remaining: 10
                }
            );
            assert!(decision.pr.is_none());
        }
        assert!(gate.usage("acct").is_none());

        let decision = gate.request_fix("acct", &period, &classification(Label::Flaky));
        assert!(decision.analysis.is_granted());
        assert_eq!(
            decision.pr,
            Some(GateDecision::Granted {
                kind: UsageKind::Pr,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_request_fix_pr_quota_runs_out_before_analyses() {
        let gate = UsageGate::new(PlanLimits::FREE_TIER);
        let period = BillingPeriod::new(2026, 10);
        let flaky = classification(Label::Flaky);
        let decisions: Vec<FixDecision> = (0..5).map(|_| gate.request_fix("acct", &period, &flaky)).collect();
        let prs = decisions
            .iter()
            .filter(|d| d.pr.is_some_and(|pr| pr.is_granted()))
            .count();
        assert_eq!(prs, 3);
        assert!(decisions.iter().all(|d| d.analysis.is_granted()));
        assert_eq!(gate.remaining("acct", &period, UsageKind::Analysis), 5);
    }
}
