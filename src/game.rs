//! Duel state machines.
//!
//! Two game kinds, both bound to a dedicated room with exactly two players
//! and both terminal on resolution:
//!
//! - **Roulette**: alternating trigger pulls, one chamber is live
//! - **Killspree**: attack the opponent until their hp is gone
//!
//! The random bullet draw goes through the [`Dice`] trait so callers can fix
//! outcomes deterministically.

use std::fmt;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DuelNetError;

/// Game kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Roulette,
    Killspree,
}

impl GameKind {
    /// Parse a kind name. Anything other than the two known kinds is None.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "roulette" => Some(Self::Roulette),
            "killspree" => Some(Self::Killspree),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roulette => "roulette",
            Self::Killspree => "killspree",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the roulette bullet draw.
pub trait Dice: Send + Sync {
    /// Uniform draw in `[1, chambers]`.
    fn roll(&self, chambers: u8) -> u8;
}

/// Thread-local RNG dice.
pub struct ThreadRngDice;

impl Dice for ThreadRngDice {
    fn roll(&self, chambers: u8) -> u8 {
        rand::thread_rng().gen_range(1..=chambers)
    }
}

/// Dice pinned to one value (for development/testing).
pub struct FixedDice(pub u8);

impl Dice for FixedDice {
    fn roll(&self, _chambers: u8) -> u8 {
        self.0
    }
}

/// Game errors. All of them surface as private replies; none change state.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("no {0} game is running here")]
    WrongGame(GameKind),

    #[error("not your turn")]
    NotYourTurn,

    #[error("you are not part of this game")]
    NotAPlayer,
}

impl From<GameError> for DuelNetError {
    fn from(err: GameError) -> Self {
        DuelNetError::invalid_state(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GameError>;

/// Roulette state: one live chamber, strict turn alternation.
#[derive(Debug)]
pub struct RouletteState {
    /// Position of the live chamber, in `[1, chambers]`.
    pub bullet: u8,
    /// Even turns belong to the first player, odd to the second.
    pub turn_index: u32,
    /// Trigger pulls so far.
    pub click_count: u8,
}

/// Killspree state.
///
/// Attacks are not turn-gated: either player may attack on any action, back
/// to back. Roulette alternates strictly; this one does not.
#[derive(Debug)]
pub struct KillspreeState {
    /// Hit points, indexed like `players`.
    pub hp: [i32; 2],
}

#[derive(Debug)]
enum GameState {
    Roulette(RouletteState),
    Killspree(KillspreeState),
}

/// Outcome of a valid trigger pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Click. The other player is up next.
    Survived { next: u64 },
    /// Bang. The actor is out; the other player wins.
    Shot { winner: u64, loser: u64 },
}

/// Outcome of an attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackOutcome {
    /// The opponent took a hit and is still standing.
    Hit { target: u64, hp_left: i32 },
    /// The opponent is down; the actor wins.
    Defeated { winner: u64, loser: u64 },
}

/// A live duel bound to one game room.
#[derive(Debug)]
pub struct GameSession {
    pub room_id: String,
    pub kind: GameKind,
    /// Challenger first, accepter second. Order fixes roulette turns.
    pub players: [u64; 2],
    state: GameState,
}

impl GameSession {
    pub fn roulette(room_id: impl Into<String>, players: [u64; 2], bullet: u8) -> Self {
        Self {
            room_id: room_id.into(),
            kind: GameKind::Roulette,
            players,
            state: GameState::Roulette(RouletteState {
                bullet,
                turn_index: 0,
                click_count: 0,
            }),
        }
    }

    pub fn killspree(room_id: impl Into<String>, players: [u64; 2], starting_hp: i32) -> Self {
        Self {
            room_id: room_id.into(),
            kind: GameKind::Killspree,
            players,
            state: GameState::Killspree(KillspreeState {
                hp: [starting_hp, starting_hp],
            }),
        }
    }

    pub fn has_player(&self, session_id: u64) -> bool {
        self.players.contains(&session_id)
    }

    /// The other player of the duel.
    pub fn opponent_of(&self, session_id: u64) -> Option<u64> {
        match self.players {
            [a, b] if a == session_id => Some(b),
            [a, b] if b == session_id => Some(a),
            _ => None,
        }
    }

    /// Whose trigger pull it is. None for killspree.
    pub fn current_turn(&self) -> Option<u64> {
        match &self.state {
            GameState::Roulette(s) => Some(self.players[(s.turn_index % 2) as usize]),
            GameState::Killspree(_) => None,
        }
    }

    /// Pull the trigger. Valid only in roulette and only on the actor's turn;
    /// an out-of-turn pull changes nothing.
    pub fn pull(&mut self, actor: u64) -> Result<PullOutcome> {
        let state = match &mut self.state {
            GameState::Roulette(s) => s,
            GameState::Killspree(_) => return Err(GameError::WrongGame(GameKind::Roulette)),
        };

        if !self.players.contains(&actor) {
            return Err(GameError::NotAPlayer);
        }
        if self.players[(state.turn_index % 2) as usize] != actor {
            return Err(GameError::NotYourTurn);
        }

        state.click_count += 1;
        if state.click_count == state.bullet {
            let winner = self.players[((state.turn_index + 1) % 2) as usize];
            Ok(PullOutcome::Shot {
                winner,
                loser: actor,
            })
        } else {
            state.turn_index += 1;
            let next = self.players[(state.turn_index % 2) as usize];
            Ok(PullOutcome::Survived { next })
        }
    }

    /// Attack the opponent. Valid only in killspree; never turn-gated.
    pub fn attack(&mut self, actor: u64) -> Result<AttackOutcome> {
        let state = match &mut self.state {
            GameState::Killspree(s) => s,
            GameState::Roulette(_) => return Err(GameError::WrongGame(GameKind::Killspree)),
        };

        let actor_idx = match self.players.iter().position(|&p| p == actor) {
            Some(idx) => idx,
            None => return Err(GameError::NotAPlayer),
        };
        let target_idx = 1 - actor_idx;

        state.hp[target_idx] -= 1;
        if state.hp[target_idx] <= 0 {
            Ok(AttackOutcome::Defeated {
                winner: actor,
                loser: self.players[target_idx],
            })
        } else {
            Ok(AttackOutcome::Hit {
                target: self.players[target_idx],
                hp_left: state.hp[target_idx],
            })
        }
    }

    /// Remaining hp for a player. None outside killspree.
    pub fn hp_of(&self, session_id: u64) -> Option<i32> {
        match &self.state {
            GameState::Killspree(s) => {
                let idx = self.players.iter().position(|&p| p == session_id)?;
                Some(s.hp[idx])
            }
            GameState::Roulette(_) => None,
        }
    }
}

/// Live sessions keyed by game room id.
pub struct GameSessions {
    sessions: DashMap<String, GameSession>,
}

impl GameSessions {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: GameSession) {
        self.sessions.insert(session.room_id.clone(), session);
    }

    pub fn get(&self, room_id: &str) -> Option<dashmap::mapref::one::Ref<'_, String, GameSession>> {
        self.sessions.get(room_id)
    }

    pub fn get_mut(
        &self,
        room_id: &str,
    ) -> Option<dashmap::mapref::one::RefMut<'_, String, GameSession>> {
        self.sessions.get_mut(room_id)
    }

    /// Remove the session hosted by a room. Called exactly once per duel, at
    /// resolution or forced teardown.
    pub fn remove(&self, room_id: &str) -> Option<GameSession> {
        self.sessions.remove(room_id).map(|(_, s)| s)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for GameSessions {
    fn default() -> Self {
        Self::new()
    }
}
