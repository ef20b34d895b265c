//! Append-only outcome log keyed by test identity.
//!
//! Each identity owns its own lock, so appends for different identities never
//! contend and appends for the same identity are serialised. The log also
//! tracks the graph fingerprint an identity currently runs against: an
//! outcome recorded under a fingerprint the identity has never run against
//! opens a new epoch, and only the current epoch is visible to
//! [`OutcomeRecorder::history`]. Late outcomes for a fingerprint that was
//! already replaced are kept in the log under that fingerprint's old epoch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{OutcomeRecord, TestIdentity};

/// What an append did to the identity's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordOutcome {
    Appended { epoch_samples: usize },
    /// The fingerprint changed; earlier outcomes no longer count.
    EpochReset { previous: String, current: String },
    /// Recorded against a fingerprint that has since been replaced. Logged,
    /// never counted.
    Stale { fingerprint: String, current: String },
}

#[derive(Default)]
struct IdentityLog {
    fingerprint: Option<String>,
    epoch: usize,
    /// Last epoch each fingerprint ran in, the current one included.
    seen: HashMap<String, usize>,
    records: Vec<(usize, OutcomeRecord)>,
}

enum Placement {
    Current,
    Reset(String),
    Stale(usize),
}

impl IdentityLog {
    /// Make `fingerprint` current unconditionally, returning the one it
    /// replaced.
    fn open_epoch(&mut self, fingerprint: &str) -> Option<String> {
        let previous = self.fingerprint.replace(fingerprint.to_string());
        if previous.is_some() {
            self.epoch += 1;
        }
        self.seen.insert(fingerprint.to_string(), self.epoch);
        previous
    }

    /// Switch to `fingerprint`, returning the previous one if it differed.
    fn rebase(&mut self, fingerprint: &str) -> Option<String> {
        if self.fingerprint.as_deref() == Some(fingerprint) {
            return None;
        }
        self.open_epoch(fingerprint)
    }

    fn place(&mut self, fingerprint: Option<&str>) -> Placement {
        let Some(fp) = fingerprint else {
            return Placement::Current;
        };
        if self.fingerprint.as_deref() == Some(fp) {
            return Placement::Current;
        }
        if let Some(&epoch) = self.seen.get(fp) {
            return Placement::Stale(epoch);
        }
        match self.open_epoch(fp) {
            Some(previous) => Placement::Reset(previous),
            None => Placement::Current,
        }
    }

    fn epoch(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records
            .iter()
            .filter(move |(epoch, _)| *epoch == self.epoch)
            .map(|(_, record)| record)
    }
}

#[derive(Default)]
pub struct OutcomeRecorder {
    logs: RwLock<HashMap<TestIdentity, Arc<Mutex<IdentityLog>>>>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, identity: &TestIdentity) -> Arc<Mutex<IdentityLog>> {
        if let Some(log) = self.logs.read().get(identity) {
            return Arc::clone(log);
        }
        let mut logs = self.logs.write();
        Arc::clone(logs.entry(identity.clone()).or_default())
    }

    pub fn record(&self, record: OutcomeRecord) -> RecordOutcome {
        let log = self.log_for(&record.identity);
        let mut log = log.lock();

        let placement = log.place(record.fingerprint.as_deref());
        let identity = record.identity.clone();
        let fingerprint = record.fingerprint.clone().unwrap_or_default();
        let epoch = match placement {
            Placement::Stale(epoch) => epoch,
            _ => log.epoch,
        };
        log.records.push((epoch, record));

        match placement {
            Placement::Reset(previous) => {
                info!(%identity, %previous, current = %fingerprint, "fingerprint changed; history reset");
                RecordOutcome::EpochReset {
                    previous,
                    current: fingerprint,
                }
            }
            Placement::Stale(_) => {
                let current = log.fingerprint.clone().unwrap_or_default();
                debug!(%identity, stale = %fingerprint, %current, "outcome for replaced fingerprint");
                RecordOutcome::Stale { fingerprint, current }
            }
            Placement::Current => RecordOutcome::Appended {
                epoch_samples: log.epoch().count(),
            },
        }
    }

    /// Declare the fingerprint an identity now runs against, e.g. right after
    /// a scan. Returns the previous fingerprint if this opened a new epoch.
    pub fn rebase(&self, identity: &TestIdentity, fingerprint: &str) -> Option<String> {
        let previous = self.log_for(identity).lock().rebase(fingerprint);
        if let Some(previous) = &previous {
            info!(%identity, %previous, current = fingerprint, "fingerprint changed; history reset");
        }
        previous
    }

    /// Current-epoch outcomes in timestamp order, limited to the last
    /// `window` entries when given.
    pub fn history(&self, identity: &TestIdentity, window: Option<usize>) -> Vec<OutcomeRecord> {
        let Some(log) = self.logs.read().get(identity).cloned() else {
            return vec![];
        };
        let mut records: Vec<OutcomeRecord> = log.lock().epoch().cloned().collect();
        records.sort_by_key(|r| r.timestamp_ms);
        if let Some(window) = window {
            let skip = records.len().saturating_sub(window);
            records.drain(..skip);
        }
        records
    }

    /// Every outcome ever appended for `identity`, across epochs.
    pub fn full_log(&self, identity: &TestIdentity) -> Vec<OutcomeRecord> {
        self.logs
            .read()
            .get(identity)
            .map(|log| log.lock().records.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    pub fn current_fingerprint(&self, identity: &TestIdentity) -> Option<String> {
        self.logs
            .read()
            .get(identity)
            .and_then(|log| log.lock().fingerprint.clone())
    }

    pub fn identities(&self) -> Vec<TestIdentity> {
        let mut ids: Vec<TestIdentity> = self.logs.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
