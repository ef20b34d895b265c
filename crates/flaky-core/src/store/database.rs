//! SQLite persistence for fingerprints, outcomes and usage counters.
//!
//! Each public method opens its own connection, so a `Database` can be shared
//! freely between threads and several processes can point at the same file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::{FlakyError, FlakyResult};
use crate::models::{
    Classification, DenyReason, FingerprintReport, GateDecision, Outcome, OutcomeRecord, PlanLimits,
    TestIdentity, UsageCounter, UsageKind,
};
use crate::runs::gate::{fix_refusal, BillingPeriod, FixDecision};
use crate::runs::recorder::RecordOutcome;
use crate::store::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Resolve `db_path` (tilde, relative to cwd) and create its parent
    /// directories. The schema is not touched until [`Database::init_schema`].
    pub fn new(db_path: &Path) -> FlakyResult<Self> {
        let expanded = expand_tilde(db_path);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    /// Open, initialise and version-check in one step.
    pub fn open(db_path: &Path) -> FlakyResult<Self> {
        let db = Self::new(db_path)?;
        db.init_schema()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> FlakyResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    pub fn init_schema(&self) -> FlakyResult<()> {
        let conn = self.connect()?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::check_schema_version(&conn)?;
        debug!(path = %self.db_path.display(), "schema ready");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fingerprints
    // -----------------------------------------------------------------------

    pub fn previous_fingerprint(&self, root_file: &str) -> FlakyResult<Option<String>> {
        let conn = self.connect()?;
        let value = conn
            .query_row(
                "SELECT fingerprint FROM fingerprints WHERE root_file = ?1;",
                params![root_file],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store the report's fingerprint and return whether it differs from the
    /// previously stored one. A root seen for the first time counts as
    /// changed.
    pub fn save_fingerprint(&self, report: &FingerprintReport) -> FlakyResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT fingerprint FROM fingerprints WHERE root_file = ?1;",
                params![report.root_file],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO fingerprints(root_file, fingerprint, dependency_count) VALUES (?1, ?2, ?3) \
             ON CONFLICT(root_file) DO UPDATE SET \
                 fingerprint = excluded.fingerprint, \
                 dependency_count = excluded.dependency_count, \
                 updated_at = CURRENT_TIMESTAMP;",
            params![report.root_file, report.fingerprint, report.dependency_count as i64],
        )?;
        tx.commit()?;
        Ok(previous.as_deref() != Some(report.fingerprint.as_str()))
    }

    /// Persist a batch of reports, filling in each report's `changed` flag.
    pub fn record_reports(&self, reports: &mut [FingerprintReport]) -> FlakyResult<usize> {
        let mut changed = 0;
        for report in reports.iter_mut() {
            let differs = self.save_fingerprint(report)?;
            report.changed = Some(differs);
            changed += usize::from(differs);
        }
        info!(roots = reports.len(), changed, "fingerprints stored");
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    /// Append one outcome with the same epoch rules as the in-memory
    /// recorder: a fingerprint the identity never ran against opens a new
    /// epoch, one it already moved past is stored under its old epoch.
    pub fn append_outcome(&self, record: &OutcomeRecord) -> FlakyResult<RecordOutcome> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let identity = &record.identity;

        tx.execute(
            "INSERT INTO identities(root_file, test_name) VALUES (?1, ?2) \
             ON CONFLICT(root_file, test_name) DO NOTHING;",
            params![identity.root_file, identity.test_name],
        )?;
        let (id, stored_fp, current_epoch): (i64, Option<String>, i64) = tx.query_row(
            "SELECT id, fingerprint, epoch FROM identities WHERE root_file = ?1 AND test_name = ?2;",
            params![identity.root_file, identity.test_name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut epoch = current_epoch;
        let mut reset = None;
        let mut stale = None;
        if let Some(fp) = record.fingerprint.as_deref() {
            match stored_fp.as_deref() {
                Some(current) if current == fp => {}
                None => {
                    tx.execute(
                        "UPDATE identities SET fingerprint = ?1 WHERE id = ?2;",
                        params![fp, id],
                    )?;
                    tx.execute(
                        "INSERT OR REPLACE INTO identity_fingerprints(identity_id, fingerprint, epoch) \
                         VALUES (?1, ?2, ?3);",
                        params![id, fp, epoch],
                    )?;
                }
                Some(current) => {
                    let seen: Option<i64> = tx
                        .query_row(
                            "SELECT epoch FROM identity_fingerprints WHERE identity_id = ?1 AND fingerprint = ?2;",
                            params![id, fp],
                            |row| row.get(0),
                        )
                        .optional()?;
                    match seen {
                        Some(old_epoch) => {
                            epoch = old_epoch;
                            stale = Some(current.to_string());
                        }
                        None => {
                            epoch += 1;
                            reset = Some(current.to_string());
                            tx.execute(
                                "UPDATE identities SET fingerprint = ?1, epoch = ?2 WHERE id = ?3;",
                                params![fp, epoch, id],
                            )?;
                            tx.execute(
                                "INSERT INTO identity_fingerprints(identity_id, fingerprint, epoch) \
                                 VALUES (?1, ?2, ?3);",
                                params![id, fp, epoch],
                            )?;
                        }
                    }
                }
            }
        }

        tx.execute(
            "INSERT INTO outcomes(identity_id, epoch, timestamp_ms, outcome, error_signature, fingerprint) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                id,
                epoch,
                record.timestamp_ms as i64,
                record.outcome.as_str(),
                record.error_signature,
                record.fingerprint,
            ],
        )?;
        let epoch_samples: i64 = tx.query_row(
            "SELECT COUNT(*) FROM outcomes WHERE identity_id = ?1 AND epoch = ?2;",
            params![id, epoch],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let fingerprint = record.fingerprint.clone().unwrap_or_default();
        Ok(match (reset, stale) {
            (Some(previous), _) => {
                info!(%identity, %previous, current = %fingerprint, "fingerprint changed; history reset");
                RecordOutcome::EpochReset {
                    previous,
                    current: fingerprint,
                }
            }
            (None, Some(current)) => {
                debug!(%identity, stale = %fingerprint, %current, "outcome for replaced fingerprint");
                RecordOutcome::Stale { fingerprint, current }
            }
            (None, None) => RecordOutcome::Appended {
                epoch_samples: epoch_samples as usize,
            },
        })
    }

    /// Current-epoch outcomes in timestamp order, limited to the last
    /// `window` entries when given.
    pub fn history(&self, identity: &TestIdentity, window: Option<usize>) -> FlakyResult<Vec<OutcomeRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT o.timestamp_ms, o.outcome, o.error_signature, o.fingerprint \
             FROM outcomes o JOIN identities i ON i.id = o.identity_id \
             WHERE i.root_file = ?1 AND i.test_name = ?2 AND o.epoch = i.epoch \
             ORDER BY o.timestamp_ms, o.seq;",
        )?;
        let rows = stmt.query_map(params![identity.root_file, identity.test_name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (ts, outcome, error_signature, fingerprint) = row?;
            let outcome = Outcome::parse(&outcome)
                .ok_or_else(|| FlakyError::Store(format!("unknown outcome {outcome:?}")))?;
            records.push(OutcomeRecord {
                identity: identity.clone(),
                timestamp_ms: ts.max(0) as u64,
                outcome,
                error_signature,
                fingerprint,
            });
        }
        if let Some(window) = window {
            let skip = records.len().saturating_sub(window);
            records.drain(..skip);
        }
        Ok(records)
    }

    pub fn identities(&self) -> FlakyResult<Vec<TestIdentity>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT root_file, test_name FROM identities ORDER BY root_file, test_name;")?;
        let rows = stmt.query_map([], |row| {
            Ok(TestIdentity::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Usage
    // -----------------------------------------------------------------------

    /// Consume one unit with a single conditional update; the row only moves
    /// while `used < quota`, so concurrent processes can never over-grant.
    pub fn try_consume(
        &self,
        account_id: &str,
        period: &str,
        kind: UsageKind,
        limits: PlanLimits,
    ) -> FlakyResult<GateDecision> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO usage(account_id, period, kind, used, quota) VALUES (?1, ?2, ?3, 0, ?4);",
            params![account_id, period, kind.as_str(), limits.limit_for(kind)],
        )?;
        let updated = tx.execute(
            "UPDATE usage SET used = used + 1 \
             WHERE account_id = ?1 AND period = ?2 AND kind = ?3 AND used < quota;",
            params![account_id, period, kind.as_str()],
        )?;
        let (used, quota): (u32, u32) = tx.query_row(
            "SELECT used, quota FROM usage WHERE account_id = ?1 AND period = ?2 AND kind = ?3;",
            params![account_id, period, kind.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        tx.commit()?;

        let remaining = quota.saturating_sub(used);
        Ok(if updated == 1 {
            GateDecision::Granted { kind, remaining }
        } else {
            debug!(account_id, period, kind = kind.as_str(), "quota exhausted");
            GateDecision::Denied {
                kind,
                reason: DenyReason::QuotaExceeded,
                remaining,
            }
        })
    }

    /// Persisted counterpart of [`crate::runs::gate::UsageGate::request_fix`]:
    /// only a flaky classification consumes an analysis, and a PR only
    /// after the analysis was granted.
    pub fn request_fix(
        &self,
        account_id: &str,
        period: &BillingPeriod,
        classification: &Classification,
        limits: PlanLimits,
    ) -> FlakyResult<FixDecision> {
        if let Some(reason) = fix_refusal(classification.label) {
            let usage = self.usage(account_id, period.as_str(), limits)?;
            return Ok(FixDecision {
                analysis: GateDecision::Denied {
                    kind: UsageKind::Analysis,
                    reason,
                    remaining: usage.remaining(UsageKind::Analysis),
                },
                pr: None,
            });
        }
        let analysis = self.try_consume(account_id, period.as_str(), UsageKind::Analysis, limits)?;
        let pr = if analysis.is_granted() {
            Some(self.try_consume(account_id, period.as_str(), UsageKind::Pr, limits)?)
        } else {
            None
        };
        Ok(FixDecision { analysis, pr })
    }

    pub fn usage(&self, account_id: &str, period: &str, limits: PlanLimits) -> FlakyResult<UsageCounter> {
        let conn = self.connect()?;
        let mut counter = UsageCounter::new(account_id, period, limits);
        let mut stmt = conn.prepare("SELECT kind, used FROM usage WHERE account_id = ?1 AND period = ?2;")?;
        let rows = stmt.query_map(params![account_id, period], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        for row in rows {
            match row? {
                (kind, used) if kind == UsageKind::Analysis.as_str() => counter.analyses_used = used,
                (kind, used) if kind == UsageKind::Pr.as_str() => counter.prs_used = used,
                _ => {}
            }
        }
        Ok(counter)
    }
}
