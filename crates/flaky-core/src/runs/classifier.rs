//! Stable / flaky / consistently-failing classification from run outcomes.

use serde::{Deserialize, Serialize};

use crate::models::{Classification, Label, Outcome, TestIdentity};
use crate::runs::recorder::OutcomeRecorder;

const RATE_EPSILON: f64 = 1e-9;

/// Thresholds for [`classify_outcomes`].
///
/// * fewer than `min_samples` runs → insufficient data
/// * all passes → stable, all failures → consistently failing
/// * pass rate ≥ `stable_floor` → stable unless one of the last
///   `recent_window` runs failed, in which case flaky
/// * pass rate ≤ `flaky_floor` → consistently failing unless one of the last
///   `recent_window` runs passed, in which case flaky
/// * anything in between → flaky
///
/// A verdict whose pass rate sits within `low_confidence_margin` inside either
/// floor is flagged low-confidence while fewer than `2 * min_samples` runs
/// back it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPolicy {
    pub min_samples: usize,
    pub flaky_floor: f64,
    pub stable_floor: f64,
    pub recent_window: usize,
    pub low_confidence_margin: f64,
}

impl ClassifierPolicy {
    pub const DEFAULT: ClassifierPolicy = ClassifierPolicy {
        min_samples: 20,
        flaky_floor: 0.05,
        stable_floor: 0.95,
        recent_window: 5,
        low_confidence_margin: 0.05,
    };

    fn is_borderline(&self, pass_rate: f64, samples: usize) -> bool {
        if samples >= self.min_samples.saturating_mul(2) || pass_rate <= 0.0 || pass_rate >= 1.0 {
            return false;
        }
        pass_rate <= self.flaky_floor + self.low_confidence_margin + RATE_EPSILON
            || pass_rate >= self.stable_floor - self.low_confidence_margin - RATE_EPSILON
    }
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn insufficient(identity: &TestIdentity, passes: usize, total: usize) -> Classification {
    Classification {
        identity: identity.clone(),
        pass_rate: if total == 0 { 0.0 } else { passes as f64 / total as f64 },
        sample_count: total,
        passes,
        label: Label::InsufficientData,
        low_confidence: false,
    }
}

/// Classify an ordered (oldest first) outcome sequence.
pub fn classify_outcomes(identity: &TestIdentity, outcomes: &[Outcome], policy: &ClassifierPolicy) -> Classification {
    let total = outcomes.len();
    let passes = outcomes.iter().filter(|o| **o == Outcome::Pass).count();
    if total < policy.min_samples.max(1) {
        return insufficient(identity, passes, total);
    }

    let pass_rate = passes as f64 / total as f64;
    let recent = &outcomes[total.saturating_sub(policy.recent_window)..];
    let label = if passes == total {
        Label::Stable
    } else if passes == 0 {
        Label::ConsistentlyFailing
    } else if pass_rate + RATE_EPSILON >= policy.stable_floor {
        if recent.contains(&Outcome::Fail) {
            Label::Flaky
        } else {
            Label::Stable
        }
    } else if pass_rate <= policy.flaky_floor + RATE_EPSILON {
        if recent.contains(&Outcome::Pass) {
            Label::Flaky
        } else {
            Label::ConsistentlyFailing
        }
    } else {
        Label::Flaky
    };

    Classification {
        identity: identity.clone(),
        pass_rate,
        sample_count: total,
        passes,
        label,
        low_confidence: policy.is_borderline(pass_rate, total),
    }
}

/// Classify from aggregate counts alone; without ordering the edge bands
/// resolve purely by rate.
pub fn classify_rate(identity: &TestIdentity, passes: usize, total: usize, policy: &ClassifierPolicy) -> Classification {
    let passes = passes.min(total);
    if total < policy.min_samples.max(1) {
        return insufficient(identity, passes, total);
    }
    let pass_rate = passes as f64 / total as f64;
    let label = if pass_rate + RATE_EPSILON >= policy.stable_floor {
        Label::Stable
    } else if pass_rate <= policy.flaky_floor + RATE_EPSILON {
        Label::ConsistentlyFailing
    } else {
        Label::Flaky
    };
    Classification {
        identity: identity.clone(),
        pass_rate,
        sample_count: total,
        passes,
        label,
        low_confidence: policy.is_borderline(pass_rate, total),
    }
}

/// Classifies identities from the current epoch of a recorder.
pub struct Classifier<'a> {
    recorder: &'a OutcomeRecorder,
    policy: ClassifierPolicy,
}

impl<'a> Classifier<'a> {
    pub fn new(recorder: &'a OutcomeRecorder, policy: ClassifierPolicy) -> Self {
        Self { recorder, policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    pub fn classify(&self, identity: &TestIdentity) -> Classification {
        let outcomes: Vec<Outcome> = self
            .recorder
            .history(identity, None)
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        classify_outcomes(identity, &outcomes, &self.policy)
    }

    pub fn classify_all(&self) -> Vec<Classification> {
        self.recorder
            .identities()
            .iter()
            .map(|identity| self.classify(identity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutcomeRecord;

    fn id() -> TestIdentity {
        TestIdentity::new("tests/minimum.test.js", "test_minimum_runs")
    }

    fn runs(passes: usize, fails: usize) -> Vec<Outcome> {
        let mut v = vec![Outcome::Pass; passes];
        v.extend(vec![Outcome::Fail; fails]);
        v
    }

    fn label(outcomes: &[Outcome]) -> Label {
        classify_outcomes(&id(), outcomes, &ClassifierPolicy::DEFAULT).label
    }

    #[test]
    fn test_all_pass_is_stable() {
        assert_eq!(label(&runs(20, 0)), Label::Stable);
    }

    #[test]
    fn test_all_fail_is_consistently_failing() {
        let c = classify_outcomes(&id(), &runs(0, 20), &ClassifierPolicy::DEFAULT);
        assert_eq!(c.label, Label::ConsistentlyFailing);
        assert_eq!(c.pass_rate, 0.0);
        assert!(!c.low_confidence);
    }

    #[test]
    fn test_thirty_percent_is_flaky() {
        let c = classify_outcomes(&id(), &runs(6, 14), &ClassifierPolicy::DEFAULT);
        assert_eq!(c.label, Label::Flaky);
        assert!((c.pass_rate - 0.3).abs() < 1e-12);
        assert!(!c.low_confidence);
    }

    #[test]
    fn test_below_minimum_is_insufficient_regardless_of_rate() {
        assert_eq!(label(&runs(19, 0)), Label::InsufficientData);
        assert_eq!(label(&runs(0, 19)), Label::InsufficientData);
        assert_eq!(label(&runs(9, 10)), Label::InsufficientData);
        assert_eq!(label(&[]), Label::InsufficientData);
    }

    #[test]
    fn test_ninety_five_percent_depends_on_recent_window() {
        // Old failure, clean recent window.
        let mut old_failure = vec![Outcome::Fail];
        old_failure.extend(vec![Outcome::Pass; 19]);
        let c = classify_outcomes(&id(), &old_failure, &ClassifierPolicy::DEFAULT);
        assert_eq!(c.label, Label::Stable);
        assert!(c.low_confidence);

        // Same rate, failure among the last five runs.
        let recent_failure = runs(19, 1);
        assert_eq!(label(&recent_failure), Label::Flaky);

        // Identical input, identical verdict.
        for _ in 0..10 {
            assert_eq!(label(&recent_failure), Label::Flaky);
            assert_eq!(label(&old_failure), Label::Stable);
        }
    }

    #[test]
    fn test_five_percent_band_mirrors_stable_band() {
        let mut old_pass = vec![Outcome::Pass];
        old_pass.extend(vec![Outcome::Fail; 19]);
        assert_eq!(label(&old_pass), Label::ConsistentlyFailing);
        assert_eq!(label(&runs(0, 19).into_iter().chain([Outcome::Pass]).collect::<Vec<_>>()), Label::Flaky);
    }

    #[test]
    fn test_borderline_confidence_clears_with_more_samples() {
        // 92% pass rate: flaky, borderline.
        let c = classify_outcomes(&id(), &runs(23, 2), &ClassifierPolicy::DEFAULT);
        assert_eq!(c.label, Label::Flaky);
        assert!(c.low_confidence);
        let c = classify_outcomes(&id(), &runs(46, 4), &ClassifierPolicy::DEFAULT);
        assert_eq!(c.label, Label::Flaky);
        assert!(!c.low_confidence);
    }

    #[test]
    fn test_classify_rate() {
        let p = ClassifierPolicy::DEFAULT;
        assert_eq!(classify_rate(&id(), 19, 20, &p).label, Label::Stable);
        assert_eq!(classify_rate(&id(), 1, 20, &p).label, Label::ConsistentlyFailing);
        assert_eq!(classify_rate(&id(), 10, 20, &p).label, Label::Flaky);
        assert_eq!(classify_rate(&id(), 10, 19, &p).label, Label::InsufficientData);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ClassifierPolicy {
            min_samples: 5,
            ..ClassifierPolicy::DEFAULT
        };
        assert_eq!(classify_outcomes(&id(), &runs(3, 2), &policy).label, Label::Flaky);
    }

    #[test]
    fn test_classifier_reads_recorder_history() {
        let recorder = OutcomeRecorder::new();
        for i in 0..20u64 {
            recorder.record(OutcomeRecord {
                identity: id(),
                timestamp_ms: i,
                outcome: if i % 3 == 0 { Outcome::Fail } else { Outcome::Pass },
                error_signature: None,
                fingerprint: None,
            });
        }
        let classifier = Classifier::new(&recorder, ClassifierPolicy::DEFAULT);
        let c = classifier.classify(&id());
        assert_eq!(c.sample_count, 20);
        assert_eq!(c.passes, 13);
        assert_eq!(c.label, Label::Flaky);
        assert_eq!(classifier.classify_all().len(), 1);
    }
}
