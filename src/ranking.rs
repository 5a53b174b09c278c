//! Per-identity win counters.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::game::GameKind;

/// Win counters for one identity. Counters only ever go up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRecord {
    pub roulette: u64,
    pub killspree: u64,
}

impl WinRecord {
    pub fn wins(&self, kind: GameKind) -> u64 {
        match kind {
            GameKind::Roulette => self.roulette,
            GameKind::Killspree => self.killspree,
        }
    }

    pub fn total(&self) -> u64 {
        self.roulette + self.killspree
    }
}

/// Ranking ledger.
///
/// Keyed by identity username. Entries are zero-initialized on first touch,
/// so reads never fail.
pub struct RankingLedger {
    records: DashMap<String, WinRecord>,
}

impl RankingLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Make sure an identity has a (possibly zeroed) entry.
    pub fn ensure(&self, username: &str) {
        self.records.entry(username.to_string()).or_default();
    }

    /// Credit a win. Returns the new count for that kind.
    pub fn record_win(&self, username: &str, kind: GameKind) -> u64 {
        let mut record = self.records.entry(username.to_string()).or_default();
        match kind {
            GameKind::Roulette => {
                record.roulette += 1;
                record.roulette
            }
            GameKind::Killspree => {
                record.killspree += 1;
                record.killspree
            }
        }
    }

    /// Read an identity's counters. Absent identities read as zeroed.
    pub fn get(&self, username: &str) -> WinRecord {
        self.records
            .get(username)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }
}

impl Default for RankingLedger {
    fn default() -> Self {
        Self::new()
    }
}
