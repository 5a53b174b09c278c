//! # duelnet
//!
//! Room-based chat server with an embedded duel layer and a ranking ladder.
//!
//! ## Features
//!
//! - **Presence**: connections, login, anonymity and moderation flags
//! - **Rooms**: a permanent lobby plus short-lived game rooms
//! - **Duels**: challenge/accept/decline handshake, russian roulette and
//!   killspree state machines
//! - **Rankings**: per-identity win counters by game kind
//! - **Commands**: typed chat grammar (`/help`, `@user challenge roulette`, ...)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use duelnet::{ChannelBus, Engine};
//!
//! let bus = Arc::new(ChannelBus::new());
//! let engine = Engine::builder()
//!     .admin_account("admin", "admin")
//!     .build(bus.clone());
//!
//! let alice = engine.connect();
//! let outbox = bus.register(alice);
//! engine.login(alice, "alice", "secret")?;
//! engine.handle_line(alice, "@bob challenge roulette")?;
//! ```

pub mod account;
pub mod bus;
pub mod challenge;
pub mod command;
pub mod engine;
pub mod error;
pub mod game;
pub mod ranking;
pub mod room;
pub mod session;
pub mod telemetry;

// Re-exports
pub use account::{Account, Accounts, IdentityProvider};
pub use bus::{ChannelBus, MessageBus, RecordingBus, Target};
pub use challenge::{Challenge, ChallengeBroker};
pub use command::{parse_line, Command, SlashCommand, TargetedAction};
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use error::{DuelNetError, Result};
pub use game::{AttackOutcome, Dice, FixedDice, GameKind, GameSession, PullOutcome, ThreadRngDice};
pub use ranking::{RankingLedger, WinRecord};
pub use room::{Room, RoomDirectory, LOBBY};
pub use session::{Session, SessionRegistry};
pub use telemetry::{init_tracing, TracingConfig};
