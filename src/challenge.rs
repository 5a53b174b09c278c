//! Pending duel offers.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::DuelNetError;
use crate::game::GameKind;

/// A pending duel offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub challenger: u64,
    pub target: u64,
    pub kind: GameKind,
    /// Issue order. Accept/decline resolve the earliest-issued offer when
    /// several target the same session.
    pub seq: u64,
}

/// Challenge errors.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("you cannot challenge yourself")]
    SelfChallenge,
}

impl From<ChallengeError> for DuelNetError {
    fn from(err: ChallengeError) -> Self {
        DuelNetError::invalid_state(err.to_string())
    }
}

/// Challenge broker.
///
/// At most one live offer per ordered (challenger, target) pair; re-issuing
/// overwrites the previous offer for that pair. Entries live until accepted,
/// declined, or purged when either party leaves the lobby or disconnects.
pub struct ChallengeBroker {
    pending: DashMap<(u64, u64), Challenge>,
    seq: AtomicU64,
}

impl ChallengeBroker {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Record an offer. A repeat for the same ordered pair silently replaces
    /// the prior entry (and takes a fresh place in the issue order).
    pub fn issue(
        &self,
        challenger: u64,
        target: u64,
        kind: GameKind,
    ) -> Result<(), ChallengeError> {
        if challenger == target {
            return Err(ChallengeError::SelfChallenge);
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            (challenger, target),
            Challenge {
                challenger,
                target,
                kind,
                seq,
            },
        );
        Ok(())
    }

    pub fn get(&self, challenger: u64, target: u64) -> Option<Challenge> {
        self.pending.get(&(challenger, target)).map(|r| *r.value())
    }

    /// Remove and return the earliest-issued offer targeting a session.
    /// None when nothing pends, which callers treat as a silent no-op.
    pub fn take_earliest_for_target(&self, target: u64) -> Option<Challenge> {
        let earliest = self
            .pending
            .iter()
            .filter(|r| r.target == target)
            .min_by_key(|r| r.seq)
            .map(|r| *r.key())?;
        self.pending.remove(&earliest).map(|(_, c)| c)
    }

    /// Drop every offer where the session is challenger or target. Used when
    /// a session enters a game or disconnects, so no offer ever references a
    /// session outside the lobby.
    pub fn purge_involving(&self, session_id: u64) -> Vec<Challenge> {
        let keys: Vec<(u64, u64)> = self
            .pending
            .iter()
            .filter(|r| r.challenger == session_id || r.target == session_id)
            .map(|r| *r.key())
            .collect();

        keys.iter()
            .filter_map(|k| self.pending.remove(k).map(|(_, c)| c))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ChallengeBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_take() {
        let broker = ChallengeBroker::new();
        broker.issue(1, 2, GameKind::Roulette).unwrap();

        let challenge = broker.take_earliest_for_target(2).unwrap();
        assert_eq!(challenge.challenger, 1);
        assert_eq!(challenge.kind, GameKind::Roulette);
        assert_eq!(broker.pending_count(), 0);

        // Already taken: silent no-op territory.
        assert!(broker.take_earliest_for_target(2).is_none());
    }

    #[test]
    fn test_self_challenge_rejected() {
        let broker = ChallengeBroker::new();
        let result = broker.issue(1, 1, GameKind::Roulette);
        assert!(matches!(result, Err(ChallengeError::SelfChallenge)));
        assert_eq!(broker.pending_count(), 0);
    }

    #[test]
    fn test_repeat_issue_overwrites() {
        let broker = ChallengeBroker::new();
        broker.issue(1, 2, GameKind::Roulette).unwrap();
        broker.issue(1, 2, GameKind::Killspree).unwrap();

        assert_eq!(broker.pending_count(), 1);
        assert_eq!(broker.get(1, 2).unwrap().kind, GameKind::Killspree);
    }

    #[test]
    fn test_earliest_issued_wins_tiebreak() {
        let broker = ChallengeBroker::new();
        broker.issue(1, 3, GameKind::Roulette).unwrap();
        broker.issue(2, 3, GameKind::Killspree).unwrap();

        let first = broker.take_earliest_for_target(3).unwrap();
        assert_eq!(first.challenger, 1);

        let second = broker.take_earliest_for_target(3).unwrap();
        assert_eq!(second.challenger, 2);
    }

    #[test]
    fn test_reissue_moves_to_back_of_line() {
        let broker = ChallengeBroker::new();
        broker.issue(1, 3, GameKind::Roulette).unwrap();
        broker.issue(2, 3, GameKind::Roulette).unwrap();
        // Challenger 1 re-issues: their offer is now the newest.
        broker.issue(1, 3, GameKind::Killspree).unwrap();

        let first = broker.take_earliest_for_target(3).unwrap();
        assert_eq!(first.challenger, 2);
    }

    #[test]
    fn test_purge_involving() {
        let broker = ChallengeBroker::new();
        broker.issue(1, 2, GameKind::Roulette).unwrap();
        broker.issue(3, 1, GameKind::Killspree).unwrap();
        broker.issue(3, 4, GameKind::Roulette).unwrap();

        let purged = broker.purge_involving(1);
        assert_eq!(purged.len(), 2);
        assert_eq!(broker.pending_count(), 1);
        assert!(broker.get(3, 4).is_some());
    }
}
