//! Outcome history → classification → fix eligibility, in memory and on disk.

use std::sync::Arc;

use _flaky_core::config::FlakyConfig;
use _flaky_core::context::ScanContext;
use _flaky_core::models::{
    Classification, DenyReason, GateDecision, Label, Outcome, OutcomeRecord, PlanLimits, TestIdentity, UsageKind,
};
use _flaky_core::runs::classifier::classify_outcomes;
use _flaky_core::runs::gate::BillingPeriod;
use _flaky_core::runs::recorder::RecordOutcome;
use _flaky_core::store::database::Database;

fn record(identity: &TestIdentity, ts: u64, outcome: Outcome, fingerprint: &str) -> OutcomeRecord {
    OutcomeRecord {
        identity: identity.clone(),
        timestamp_ms: ts,
        outcome,
        error_signature: (outcome == Outcome::Fail).then(|| "AssertionError: expected 200".to_string()),
        fingerprint: Some(fingerprint.to_string()),
    }
}

/// `passes` passes then `fails` failures, in timestamp order.
fn feed(ctx: &ScanContext, identity: &TestIdentity, passes: u64, fails: u64) {
    for ts in 0..passes + fails {
        let outcome = if ts < passes { Outcome::Pass } else { Outcome::Fail };
        ctx.record(record(identity, ts, outcome, "fp"));
    }
}

fn context_with(config: FlakyConfig) -> (tempfile::TempDir, ScanContext) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ScanContext::new(dir.path(), config).unwrap();
    (dir, ctx)
}

#[test]
fn classifier_bands_through_the_context() {
    let (_dir, ctx) = context_with(FlakyConfig::default());
    let cases = [
        ("all_pass", 20, 0, Label::Stable),
        ("all_fail", 0, 20, Label::ConsistentlyFailing),
        ("thirty_percent", 6, 14, Label::Flaky),
        ("too_few", 19, 0, Label::InsufficientData),
        // Failure is the most recent run.
        ("ninety_five", 19, 1, Label::Flaky),
    ];
    for (name, passes, fails, expected) in cases {
        let id = TestIdentity::new("tests/bands.test.js", name);
        feed(&ctx, &id, passes, fails);
        assert_eq!(ctx.classify(&id).label, expected, "{name}");
    }

    let all = ctx.classifier().classify_all();
    assert_eq!(all.len(), 5);
}

#[test]
fn configured_policy_overrides_defaults() {
    let config = FlakyConfig::from_json(r#"{ "classifier": { "min_samples": 4 } }"#).unwrap();
    let (_dir, ctx) = context_with(config);
    let id = TestIdentity::new("tests/quick.test.js", "quick");
    feed(&ctx, &id, 2, 2);
    assert_eq!(ctx.policy().min_samples, 4);
    assert_eq!(ctx.classify(&id).label, Label::Flaky);
}

#[test]
fn concurrent_fix_requests_respect_pr_quota() {
    let config = FlakyConfig {
        plan: PlanLimits {
            analyses_per_period: 100,
            prs_per_period: 4,
        },
        ..FlakyConfig::default()
    };
    let (_dir, ctx) = context_with(config);
    let ctx = Arc::new(ctx);
    let id = TestIdentity::new("tests/race.test.js", "race");
    feed(&ctx, &id, 10, 10);
    assert_eq!(ctx.classify(&id).label, Label::Flaky);

    let period = BillingPeriod::new(2026, 10);
    let handles: Vec<_> = (0..32)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let id = id.clone();
            let period = period.clone();
            std::thread::spawn(move || ctx.request_fix("acct-1", &period, &id))
        })
        .collect();
    let decisions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let prs = decisions
        .iter()
        .filter(|d| d.pr.is_some_and(|pr| pr.is_granted()))
        .count();
    assert_eq!(prs, 4);
    assert!(decisions.iter().all(|d| d.analysis.is_granted()));

    let usage = ctx.gate().usage("acct-1").unwrap();
    assert_eq!(usage.prs_used, 4);
    assert_eq!(usage.analyses_used, 32);
    // Other accounts are unaffected.
    assert_eq!(ctx.gate().remaining("acct-2", &period, UsageKind::Pr), 4);
}

#[test]
fn stable_test_is_never_sent_for_fixing() {
    let (_dir, ctx) = context_with(FlakyConfig::default());
    let id = TestIdentity::new("tests/ok.test.js", "ok");
    feed(&ctx, &id, 20, 0);
    let decision = ctx.request_fix("acct", &BillingPeriod::new(2026, 10), &id);
    assert_eq!(
        decision.analysis,
        GateDecision::Denied {
            kind: UsageKind::Analysis,
            reason: DenyReason::NotFlaky,
            remaining: 10
        }
    );
    assert!(decision.pr.is_none());
}

#[test]
fn persisted_history_matches_in_memory_history() {
    let (dir, ctx) = context_with(FlakyConfig::default());
    let db = Database::open(&dir.path().join("runs.db")).unwrap();
    let id = TestIdentity::new("tests/persist.test.js", "persist");

    let mut resets = 0;
    for ts in 0..30u64 {
        let fingerprint = if ts < 10 { "old" } else { "new" };
        let outcome = if ts % 4 == 0 { Outcome::Fail } else { Outcome::Pass };
        let rec = record(&id, ts, outcome, fingerprint);
        let on_disk = db.append_outcome(&rec).unwrap();
        let in_memory = ctx.record(rec);
        assert_eq!(on_disk, in_memory);
        if matches!(on_disk, RecordOutcome::EpochReset { .. }) {
            resets += 1;
        }
    }
    assert_eq!(resets, 1);

    // A straggler from the replaced code is logged on both sides but counted on neither.
    let late = record(&id, 30, Outcome::Fail, "old");
    let on_disk = db.append_outcome(&late).unwrap();
    assert_eq!(on_disk, ctx.record(late));
    assert!(matches!(on_disk, RecordOutcome::Stale { .. }));

    let disk: Vec<Outcome> = db.history(&id, None).unwrap().into_iter().map(|r| r.outcome).collect();
    assert_eq!(disk.len(), 20);
    let from_disk = classify_outcomes(&id, &disk, ctx.policy());
    assert_eq!(from_disk, ctx.classify(&id));
    assert_eq!(from_disk.label, Label::Flaky);
}

fn labelled(label: Label) -> Classification {
    Classification {
        identity: TestIdentity::new("tests/persist.test.js", "persist"),
        pass_rate: 0.5,
        sample_count: 20,
        passes: 10,
        label,
        low_confidence: false,
    }
}

#[test]
fn persisted_fix_requests_only_spend_quota_on_flaky_tests() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("runs.db")).unwrap();
    let limits = PlanLimits {
        analyses_per_period: 3,
        prs_per_period: 2,
    };
    let period = BillingPeriod::new(2026, 10);

    for (label, reason) in [
        (Label::Stable, DenyReason::NotFlaky),
        (Label::ConsistentlyFailing, DenyReason::NotFlaky),
        (Label::InsufficientData, DenyReason::InsufficientData),
    ] {
        let decision = db.request_fix("acct", &period, &labelled(label), limits).unwrap();
        assert_eq!(
            decision.analysis,
            GateDecision::Denied {
                kind: UsageKind::Analysis,
                reason,
                remaining: 3
            }
        );
        assert!(decision.pr.is_none());
    }
    let usage = db.usage("acct", period.as_str(), limits).unwrap();
    assert_eq!((usage.analyses_used, usage.prs_used), (0, 0));

    let flaky = labelled(Label::Flaky);
    let decisions: Vec<_> = (0..4)
        .map(|_| db.request_fix("acct", &period, &flaky, limits).unwrap())
        .collect();
    let granted_prs = decisions
        .iter()
        .filter(|d| d.pr.is_some_and(|pr| pr.is_granted()))
        .count();
    assert_eq!(granted_prs, 2);
    // Third analysis is granted but its PR is not; the fourth stops at analysis.
    assert!(decisions[2].analysis.is_granted());
    assert!(decisions[2].pr.is_some_and(|pr| !pr.is_granted()));
    assert!(!decisions[3].analysis.is_granted());
    assert!(decisions[3].pr.is_none());

    let usage = db.usage("acct", period.as_str(), limits).unwrap();
    assert_eq!((usage.analyses_used, usage.prs_used), (3, 2));
}
