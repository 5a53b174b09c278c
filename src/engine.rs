//! The chat and duel engine.
//!
//! One [`Engine`] owns every registry: sessions, accounts, rooms, pending
//! challenges, live games and the ranking ledger. Inbound actions are applied
//! to completion (state first, bus emissions after) so a registry never
//! observes a half-applied action.

use std::sync::Arc;

use serde::Deserialize;

use crate::account::{Account, Accounts, IdentityProvider};
use crate::bus::MessageBus;
use crate::challenge::{Challenge, ChallengeBroker};
use crate::command::{self, Command, ParseError, SlashCommand, TargetedAction};
use crate::error::{DuelNetError, Result};
use crate::game::{
    AttackOutcome, Dice, GameKind, GameSession, GameSessions, PullOutcome, ThreadRngDice,
};
use crate::ranking::RankingLedger;
use crate::room::{RoomDirectory, LOBBY};
use crate::session::SessionRegistry;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Starting hit points per killspree player.
    pub killspree_hp: i32,
    /// Roulette cylinder size; the bullet lands in `[1, chambers]`.
    pub chambers: u8,
    /// Award the remaining player the win when their opponent disconnects
    /// mid-game. Switched off, the duel is discarded with no ranking change.
    pub forfeit_on_disconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            killspree_hp: 3,
            chambers: 6,
            forfeit_on_disconnect: true,
        }
    }
}

/// Owned snapshot of a session, taken at the start of an action so no
/// registry lock is held across bus emissions.
#[derive(Debug, Clone)]
struct SessionView {
    id: u64,
    username: Option<String>,
    room_id: String,
    muted: bool,
    anonymous: bool,
    blocked: bool,
}

impl SessionView {
    fn identity(&self) -> &str {
        self.username.as_deref().unwrap_or("Anonymous")
    }
}

/// Chat and duel engine.
pub struct Engine {
    config: EngineConfig,
    sessions: SessionRegistry,
    accounts: Accounts,
    rooms: RoomDirectory,
    broker: ChallengeBroker,
    games: GameSessions,
    ranking: RankingLedger,
    bus: Arc<dyn MessageBus>,
    dice: Arc<dyn Dice>,
}

impl Engine {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        EngineBuilder::new().build(bus)
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // ==================== Lifecycle ====================

    /// Register a new connection. It starts anonymous, in the lobby.
    pub fn connect(&self) -> u64 {
        let session_id = self.sessions.create(LOBBY);
        // The lobby always exists; this cannot fail.
        let _ = self.rooms.add_member(LOBBY, session_id);
        self.bus.subscribe(LOBBY, session_id);

        tracing::info!(session_id, "connection joined the lobby");
        self.bus
            .emit_to_room(LOBBY, "System: Anonymous joined the lobby.");
        session_id
    }

    /// Bind an account to a connection, registering the username on first
    /// sight. Fails with `Conflict` if another live connection holds the
    /// name, `Unauthorized` on a bad credential.
    pub fn login(&self, session_id: u64, username: &str, credential: &str) -> Result<Account> {
        let view = self.view(session_id)?;

        if let Some(other) = self.sessions.find_by_username(username) {
            if other != view.id {
                return Err(DuelNetError::conflict(format!(
                    "'{username}' is already logged in"
                )));
            }
        }

        let account = self.accounts.verify_or_create(username, credential)?;
        self.ranking.ensure(&account.username);

        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.bind_identity(&account.username);
        }

        tracing::info!(session_id, username, "login");
        self.bus
            .emit_to_connection(session_id, &format!("System: Logged in as {username}."));
        Ok(account)
    }

    /// Tear a connection down: force-resolve its game if it was in one,
    /// purge its pending challenges, leave its room.
    pub fn disconnect(&self, session_id: u64) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        let room_id = session.room_id.clone();
        let name = session.identity().to_string();

        // Broker before room: no offer may outlive either party.
        self.broker.purge_involving(session_id);

        if room_id != LOBBY {
            self.abandon_game(&room_id, session_id, &name);
        } else {
            self.rooms.remove_member(LOBBY, session_id);
            self.bus.unsubscribe(LOBBY, session_id);
            self.bus
                .emit_to_room(LOBBY, &format!("System: {name} disconnected."));
        }

        tracing::info!(session_id, "disconnected");
    }

    /// Handle one inbound chat line. Every error is recovered here and
    /// surfaced as a private reply; only an unknown session propagates.
    pub fn handle_line(&self, session_id: u64, line: &str) -> Result<()> {
        let view = self.view(session_id)?;

        if view.muted {
            self.bus
                .emit_to_connection(session_id, "System: You are muted.");
            return Ok(());
        }

        let parsed = match command::parse_line(line) {
            Ok(parsed) => parsed,
            Err(ParseError::Empty) => return Ok(()),
            Err(err) => {
                self.bus
                    .emit_to_connection(session_id, &format!("System: {err}"));
                return Ok(());
            }
        };

        let result = match parsed {
            Command::Broadcast(text) => {
                self.broadcast(&view, &text);
                Ok(())
            }
            Command::Slash(cmd) => self.handle_slash(&view, cmd),
            Command::Targeted { username, action } => {
                self.handle_targeted(&view, &username, action)
            }
        };

        if let Err(err) = result {
            self.bus
                .emit_to_connection(session_id, &format!("System: {err}"));
        }
        Ok(())
    }

    // ==================== Queries ====================

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.count()
    }

    pub fn game_count(&self) -> usize {
        self.games.count()
    }

    pub fn pending_challenge_count(&self) -> usize {
        self.broker.pending_count()
    }

    /// Room a session currently sits in.
    pub fn room_of(&self, session_id: u64) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.room_id.clone())
    }

    /// Win counters for an identity.
    pub fn wins_of(&self, username: &str) -> crate::ranking::WinRecord {
        self.ranking.get(username)
    }

    // ==================== Dispatch ====================

    fn broadcast(&self, view: &SessionView, text: &str) {
        let name = self.display_name(view);
        self.bus
            .emit_to_room(&view.room_id, &format!("{name}: {text}"));
    }

    fn handle_slash(&self, view: &SessionView, cmd: SlashCommand) -> Result<()> {
        match cmd {
            SlashCommand::Help => {
                let admin = self.is_admin(view);
                self.bus.emit_to_connection(view.id, &help_text(admin));
                Ok(())
            }
            SlashCommand::Anon => self.toggle_anon(view),
            SlashCommand::Rank => self.show_rank(view),
            SlashCommand::Pull => self.pull(view),
            SlashCommand::Attack => self.attack(view),
            SlashCommand::Accept => self.accept(view),
            SlashCommand::Decline => self.decline(view),
            SlashCommand::Kick { username } => self.kick(view, &username),
            SlashCommand::Mute { username } => self.mute(view, &username),
            SlashCommand::Block { username } => self.block(view, &username),
            SlashCommand::RankSet { username, rank } => self.rank_set(view, &username, rank),
            SlashCommand::RankReset { username } => self.rank_set(view, &username, 1),
            SlashCommand::Admin { username } => self.grant_admin(view, &username),
            SlashCommand::Rename { username, new_name } => {
                self.rename(view, &username, &new_name)
            }
        }
    }

    fn handle_targeted(
        &self,
        view: &SessionView,
        username: &str,
        action: TargetedAction,
    ) -> Result<()> {
        if view.blocked {
            return Err(DuelNetError::unauthorized(
                "you are blocked from sending challenges",
            ));
        }

        let target = self
            .sessions
            .find_by_username(username)
            .ok_or_else(|| DuelNetError::not_found(format!("user '{username}'")))?;

        match action {
            TargetedAction::Challenge(kind) => self.challenge(view, target, kind),
            TargetedAction::Pvc(text) => {
                let name = self.display_name(view);
                self.bus
                    .emit_to_connection(target, &format!("[pvc] {name}: {text}"));
                self.bus
                    .emit_to_connection(view.id, &format!("[pvc -> {username}] {text}"));
                Ok(())
            }
        }
    }

    // ==================== Challenges ====================

    fn challenge(&self, view: &SessionView, target: u64, kind: GameKind) -> Result<()> {
        if view.room_id != LOBBY {
            return Err(DuelNetError::invalid_state(
                "challenges can only be issued from the lobby",
            ));
        }
        let target_room = self
            .sessions
            .get(target)
            .map(|s| s.room_id.clone())
            .ok_or_else(|| DuelNetError::not_found("target connection"))?;
        if target_room != LOBBY {
            return Err(DuelNetError::invalid_state(
                "that player is already in a game",
            ));
        }

        self.broker.issue(view.id, target, kind)?;

        let name = self.display_name(view);
        tracing::debug!(challenger = view.id, target, kind = %kind, "challenge issued");
        self.bus.emit_to_connection(
            target,
            &format!("System: {name} challenged you to {kind}. Type /accept or /decline."),
        );
        Ok(())
    }

    /// Accept the earliest pending challenge. Silent no-op when none pends.
    fn accept(&self, view: &SessionView) -> Result<()> {
        let Some(challenge) = self.broker.take_earliest_for_target(view.id) else {
            return Ok(());
        };
        let Challenge {
            challenger, kind, ..
        } = challenge;

        // The offer is only actionable while both sides sit in the lobby.
        if self.sessions.get(challenger).map(|s| s.room_id.clone()) != Some(LOBBY.to_string()) {
            return Ok(());
        }

        // Entering a game invalidates every other offer either party holds.
        self.broker.purge_involving(challenger);
        self.broker.purge_involving(view.id);

        let room_id = self.rooms.create_game_room();
        self.move_to_room(challenger, LOBBY, &room_id);
        self.move_to_room(view.id, LOBBY, &room_id);

        let players = [challenger, view.id];
        let game = match kind {
            GameKind::Roulette => {
                let bullet = self.dice.roll(self.config.chambers);
                GameSession::roulette(&room_id, players, bullet)
            }
            GameKind::Killspree => {
                GameSession::killspree(&room_id, players, self.config.killspree_hp)
            }
        };
        self.games.insert(game);

        tracing::info!(room_id = %room_id, kind = %kind, challenger, target = view.id, "game started");
        self.bus.emit_to_room(
            &room_id,
            &format!("System: Game '{kind}' started in room {room_id}."),
        );
        match kind {
            GameKind::Roulette => self.bus.emit_to_room(
                &room_id,
                "System: Russian Roulette. Type /pull to shoot.",
            ),
            GameKind::Killspree => self
                .bus
                .emit_to_room(&room_id, "System: Killspree. Type /attack to fight."),
        }
        Ok(())
    }

    /// Decline the earliest pending challenge. Silent no-op when none pends.
    fn decline(&self, view: &SessionView) -> Result<()> {
        if let Some(challenge) = self.broker.take_earliest_for_target(view.id) {
            self.bus
                .emit_to_connection(challenge.challenger, "System: Challenge declined.");
        }
        Ok(())
    }

    // ==================== Game actions ====================

    fn pull(&self, view: &SessionView) -> Result<()> {
        let outcome = {
            let mut game = self.games.get_mut(&view.room_id).ok_or_else(|| {
                DuelNetError::invalid_state("no roulette game is running here")
            })?;
            game.pull(view.id)?
        };

        let name = self.display_name(view);
        match outcome {
            PullOutcome::Survived { .. } => {
                self.bus
                    .emit_to_room(&view.room_id, &format!("System: {name} survived."));
            }
            PullOutcome::Shot { winner, .. } => {
                self.bus.emit_to_room(
                    &view.room_id,
                    &format!("System: {name} got shot. Game over."),
                );
                self.resolve(&view.room_id, winner, GameKind::Roulette);
            }
        }
        Ok(())
    }

    fn attack(&self, view: &SessionView) -> Result<()> {
        let outcome = {
            let mut game = self.games.get_mut(&view.room_id).ok_or_else(|| {
                DuelNetError::invalid_state("no killspree game is running here")
            })?;
            game.attack(view.id)?
        };

        let name = self.display_name(view);
        match outcome {
            AttackOutcome::Hit { target, hp_left } => {
                let target_name = self.name_of(target);
                self.bus.emit_to_room(
                    &view.room_id,
                    &format!("System: {name} attacked! {target_name} has {hp_left} HP left."),
                );
            }
            AttackOutcome::Defeated { winner, loser } => {
                let loser_name = self.name_of(loser);
                self.bus.emit_to_room(
                    &view.room_id,
                    &format!("System: {name} attacked! {loser_name} has 0 HP left."),
                );
                self.bus.emit_to_room(
                    &view.room_id,
                    &format!("System: {loser_name} has been defeated!"),
                );
                self.resolve(&view.room_id, winner, GameKind::Killspree);
            }
        }
        Ok(())
    }

    /// Terminal transition: credit the winner, return both players to the
    /// lobby, tear the game room down.
    fn resolve(&self, room_id: &str, winner: u64, kind: GameKind) {
        self.games.remove(room_id);

        let winner_identity = self
            .sessions
            .get(winner)
            .map(|s| s.identity().to_string())
            .unwrap_or_else(|| "Anonymous".to_string());
        let wins = self.ranking.record_win(&winner_identity, kind);

        for member in self.rooms.members_of(room_id) {
            self.move_to_room(member, room_id, LOBBY);
        }
        let _ = self.rooms.destroy_room(room_id);

        tracing::info!(room_id, winner, kind = %kind, wins, "game resolved");
    }

    /// Force-resolve the game a departing session leaves behind.
    fn abandon_game(&self, room_id: &str, departed: u64, departed_name: &str) {
        self.rooms.remove_member(room_id, departed);
        self.bus.unsubscribe(room_id, departed);
        self.bus
            .emit_to_room(room_id, &format!("System: {departed_name} disconnected."));

        let Some(game) = self.games.remove(room_id) else {
            return;
        };
        let Some(opponent) = game.opponent_of(departed) else {
            return;
        };

        if self.config.forfeit_on_disconnect {
            let winner_identity = self
                .sessions
                .get(opponent)
                .map(|s| s.identity().to_string())
                .unwrap_or_else(|| "Anonymous".to_string());
            self.ranking.record_win(&winner_identity, game.kind);
            self.bus.emit_to_room(
                room_id,
                &format!("System: {winner_identity} wins by forfeit."),
            );
        } else {
            self.bus
                .emit_to_room(room_id, "System: The duel was abandoned.");
        }

        for member in self.rooms.members_of(room_id) {
            self.move_to_room(member, room_id, LOBBY);
        }
        let _ = self.rooms.destroy_room(room_id);

        tracing::info!(room_id, departed, "game force-resolved on disconnect");
    }

    // ==================== Commands on self ====================

    fn toggle_anon(&self, view: &SessionView) -> Result<()> {
        let now_anonymous = {
            let mut session = self
                .sessions
                .get_mut(view.id)
                .ok_or_else(|| DuelNetError::not_found("session"))?;
            session.anonymous = !session.anonymous;
            session.anonymous
        };

        let name = if now_anonymous {
            "Anonymous".to_string()
        } else {
            view.identity().to_string()
        };
        self.bus
            .broadcast_all(&format!("System: {name} toggled anonymity."));
        Ok(())
    }

    fn show_rank(&self, view: &SessionView) -> Result<()> {
        if self.is_admin(view) {
            self.bus
                .emit_to_connection(view.id, "System: Admins are beyond ranking.");
            return Ok(());
        }
        let Some(username) = view.username.as_deref().filter(|_| !view.anonymous) else {
            self.bus
                .emit_to_connection(view.id, "System: Anonymous users have no rank.");
            return Ok(());
        };

        let account = self
            .accounts
            .get(username)
            .ok_or_else(|| DuelNetError::not_found(format!("account '{username}'")))?;
        let record = self.ranking.get(username);
        self.bus.emit_to_connection(
            view.id,
            &format!(
                "System: Rank: {} - Roulette: {}, Killspree: {}",
                account.rank, record.roulette, record.killspree
            ),
        );
        Ok(())
    }

    // ==================== Admin commands ====================

    fn kick(&self, view: &SessionView, username: &str) -> Result<()> {
        self.require_admin(view)?;
        let target = self.resolve_live(username)?;

        self.bus
            .emit_to_connection(target, "System: You were kicked.");
        self.disconnect(target);
        self.bus
            .emit_to_connection(view.id, &format!("System: Kicked {username}."));
        Ok(())
    }

    fn mute(&self, view: &SessionView, username: &str) -> Result<()> {
        self.require_admin(view)?;
        let target = self.resolve_live(username)?;

        if let Some(mut session) = self.sessions.get_mut(target) {
            session.muted = true;
        }
        self.bus
            .emit_to_connection(view.id, &format!("System: Muted {username}."));
        Ok(())
    }

    fn block(&self, view: &SessionView, username: &str) -> Result<()> {
        self.require_admin(view)?;
        let target = self.resolve_live(username)?;

        if let Some(mut session) = self.sessions.get_mut(target) {
            session.blocked = true;
        }
        self.bus
            .emit_to_connection(view.id, &format!("System: Blocked {username}."));
        Ok(())
    }

    fn rank_set(&self, view: &SessionView, username: &str, rank: u32) -> Result<()> {
        self.require_admin(view)?;
        self.accounts.set_rank(username, rank)?;
        self.bus
            .emit_to_connection(view.id, &format!("System: Rank updated for {username}."));
        Ok(())
    }

    fn grant_admin(&self, view: &SessionView, username: &str) -> Result<()> {
        self.require_admin(view)?;
        self.accounts.grant_admin(username)?;
        self.bus
            .emit_to_connection(view.id, &format!("System: {username} is now an admin."));
        Ok(())
    }

    fn rename(&self, view: &SessionView, username: &str, new_name: &str) -> Result<()> {
        self.require_admin(view)?;
        if self.sessions.find_by_username(new_name).is_some() {
            return Err(DuelNetError::conflict(format!(
                "'{new_name}' is already logged in"
            )));
        }
        self.accounts.rename(username, new_name)?;

        if let Some(target) = self.sessions.find_by_username(username) {
            if let Some(mut session) = self.sessions.get_mut(target) {
                session.username = Some(new_name.to_string());
            }
            self.bus.emit_to_connection(
                target,
                &format!("System: You are now known as {new_name}."),
            );
        }
        self.bus.emit_to_connection(
            view.id,
            &format!("System: {username} is now known as {new_name}."),
        );
        Ok(())
    }

    // ==================== Helpers ====================

    fn view(&self, session_id: u64) -> Result<SessionView> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| DuelNetError::not_found(format!("session {session_id}")))?;
        Ok(SessionView {
            id: session.id,
            username: session.username.clone(),
            room_id: session.room_id.clone(),
            muted: session.muted,
            anonymous: session.anonymous,
            blocked: session.blocked,
        })
    }

    fn is_admin(&self, view: &SessionView) -> bool {
        view.username
            .as_deref()
            .and_then(|u| self.accounts.get(u))
            .map(|a| a.admin)
            .unwrap_or(false)
    }

    fn require_admin(&self, view: &SessionView) -> Result<()> {
        if self.is_admin(view) {
            Ok(())
        } else {
            Err(DuelNetError::unauthorized("admin command"))
        }
    }

    fn resolve_live(&self, username: &str) -> Result<u64> {
        self.sessions
            .find_by_username(username)
            .ok_or_else(|| DuelNetError::not_found(format!("user '{username}'")))
    }

    /// Rendered name: admin tag beats rank tag, anonymity beats both.
    fn display_name(&self, view: &SessionView) -> String {
        if view.anonymous {
            return "Anonymous".to_string();
        }
        let Some(username) = view.username.as_deref() else {
            return "Anonymous".to_string();
        };
        match self.accounts.get(username) {
            Some(account) if account.admin => format!("[ADMIN]{username}"),
            Some(account) => format!("[{}]{username}", account.rank),
            None => username.to_string(),
        }
    }

    fn name_of(&self, session_id: u64) -> String {
        match self.view(session_id) {
            Ok(view) => self.display_name(&view),
            Err(_) => "Anonymous".to_string(),
        }
    }

    /// Move a session between rooms: directory, session reference and bus
    /// subscription together.
    fn move_to_room(&self, session_id: u64, from: &str, to: &str) {
        let _ = self.rooms.move_member(session_id, from, to);
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.room_id = to.to_string();
        }
        self.bus.unsubscribe(from, session_id);
        self.bus.subscribe(to, session_id);
    }
}

fn help_text(admin: bool) -> String {
    let mut text = String::from(
        "Commands:\n\
         /help - this list\n\
         /anon - toggle anonymous mode\n\
         /rank - show your rank\n\
         @username challenge roulette|killspree - start a duel\n\
         @username pvc <message> - private chat\n\
         /accept, /decline - answer a challenge\n\
         /pull - Russian Roulette\n\
         /attack - Killspree",
    );
    if admin {
        text.push_str(
            "\n\nAdmin commands:\n\
             /kick @user\n\
             /mute @user\n\
             /block @user\n\
             /rank set @user <rank>\n\
             /rank reset @user\n\
             /admin @user\n\
             /rename @user <name>",
        );
    }
    text
}

/// Engine builder.
pub struct EngineBuilder {
    config: EngineConfig,
    dice: Option<Arc<dyn Dice>>,
    admin_account: Option<(String, String)>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            dice: None,
            admin_account: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn killspree_hp(mut self, hp: i32) -> Self {
        self.config.killspree_hp = hp;
        self
    }

    pub fn chambers(mut self, chambers: u8) -> Self {
        self.config.chambers = chambers;
        self
    }

    pub fn forfeit_on_disconnect(mut self, forfeit: bool) -> Self {
        self.config.forfeit_on_disconnect = forfeit;
        self
    }

    /// Inject the bullet-draw source. Defaults to thread-local RNG.
    pub fn dice(mut self, dice: Arc<dyn Dice>) -> Self {
        self.dice = Some(dice);
        self
    }

    /// Pre-register an admin account, so admin commands have a first holder.
    pub fn admin_account(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.admin_account = Some((username.into(), credential.into()));
        self
    }

    pub fn build(self, bus: Arc<dyn MessageBus>) -> Engine {
        let accounts = Accounts::new();
        let ranking = RankingLedger::new();

        if let Some((username, credential)) = &self.admin_account {
            // verify_or_create cannot fail for a fresh registry
            let _ = accounts.verify_or_create(username, credential);
            let _ = accounts.grant_admin(username);
            ranking.ensure(username);
            tracing::warn!(username = %username, "created default admin account");
        }

        Engine {
            config: self.config,
            sessions: SessionRegistry::new(),
            accounts,
            rooms: RoomDirectory::new(),
            broker: ChallengeBroker::new(),
            games: GameSessions::new(),
            ranking,
            bus,
            dice: self.dice.unwrap_or_else(|| Arc::new(ThreadRngDice)),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::game::FixedDice;

    fn engine_with_bus() -> (Engine, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        let engine = Engine::builder()
            .dice(Arc::new(FixedDice(3)))
            .build(bus.clone());
        (engine, bus)
    }

    fn logged_in(engine: &Engine, username: &str) -> u64 {
        let id = engine.connect();
        engine.login(id, username, "pw").unwrap();
        id
    }

    fn start_game(engine: &Engine, a: u64, b: u64, kind: &str) -> String {
        engine
            .handle_line(a, &format!("@{} challenge {kind}", name_of(engine, b)))
            .unwrap();
        engine.handle_line(b, "/accept").unwrap();
        let room = engine.room_of(a).unwrap();
        assert_ne!(room, LOBBY);
        room
    }

    fn name_of(engine: &Engine, id: u64) -> String {
        engine
            .sessions
            .get(id)
            .unwrap()
            .username
            .clone()
            .unwrap()
    }

    #[test]
    fn test_connect_lands_in_lobby() {
        let (engine, bus) = engine_with_bus();
        let id = engine.connect();

        assert_eq!(engine.room_of(id).unwrap(), LOBBY);
        assert_eq!(
            bus.messages_in(LOBBY),
            vec!["System: Anonymous joined the lobby."]
        );
    }

    #[test]
    fn test_login_conflict_for_live_username() {
        let (engine, _bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = engine.connect();

        let err = engine.login(b, "alice", "pw").unwrap_err();
        assert!(matches!(err, DuelNetError::Conflict { .. }));

        // After alice leaves, the name is free again.
        engine.disconnect(a);
        engine.login(b, "alice", "pw").unwrap();
    }

    #[test]
    fn test_login_bad_credential() {
        let (engine, _bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        engine.disconnect(a);

        let b = engine.connect();
        let err = engine.login(b, "alice", "wrong").unwrap_err();
        assert!(matches!(err, DuelNetError::Unauthorized { .. }));
    }

    #[test]
    fn test_broadcast_carries_display_name() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "hello there").unwrap();
        assert_eq!(bus.messages_in(LOBBY), vec!["[1]alice: hello there"]);
    }

    #[test]
    fn test_anonymous_broadcast() {
        let (engine, bus) = engine_with_bus();
        let a = engine.connect();
        bus.clear();

        engine.handle_line(a, "who am i").unwrap();
        assert_eq!(bus.messages_in(LOBBY), vec!["Anonymous: who am i"]);
    }

    #[test]
    fn test_muted_session_cannot_speak() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        engine.sessions.get_mut(a).unwrap().muted = true;
        bus.clear();

        engine.handle_line(a, "hello").unwrap();
        engine.handle_line(a, "/rank").unwrap();

        assert!(bus.messages_in(LOBBY).is_empty());
        assert_eq!(
            bus.messages_to(a),
            vec!["System: You are muted.", "System: You are muted."]
        );
    }

    #[test]
    fn test_unknown_command_is_private_error() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "/dance").unwrap();
        assert!(bus.messages_in(LOBBY).is_empty());
        assert_eq!(bus.messages_to(a), vec!["System: unknown command 'dance'"]);
    }

    #[test]
    fn test_challenge_and_accept_create_game_room() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");

        engine.handle_line(a, "@bob challenge roulette").unwrap();
        assert_eq!(engine.pending_challenge_count(), 1);
        assert!(bus
            .messages_to(b)
            .iter()
            .any(|m| m.contains("challenged you to roulette")));

        engine.handle_line(b, "/accept").unwrap();

        let room = engine.room_of(a).unwrap();
        assert_ne!(room, LOBBY);
        assert_eq!(engine.room_of(b).unwrap(), room);
        assert_eq!(engine.game_count(), 1);
        assert_eq!(engine.pending_challenge_count(), 0);
        assert_eq!(engine.room_count(), 2);
    }

    #[test]
    fn test_challenge_rejects_player_in_game() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        let c = logged_in(&engine, "carol");
        start_game(&engine, a, b, "roulette");
        bus.clear();

        engine.handle_line(c, "@bob challenge roulette").unwrap();
        assert_eq!(engine.pending_challenge_count(), 0);
        assert_eq!(
            bus.messages_to(c),
            vec!["System: invalid state: that player is already in a game"]
        );
    }

    #[test]
    fn test_self_challenge_rejected() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "@alice challenge roulette").unwrap();
        assert_eq!(engine.pending_challenge_count(), 0);
        assert!(bus.messages_to(a)[0].contains("cannot challenge yourself"));
    }

    #[test]
    fn test_decline_notifies_challenger_and_is_idempotent() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");

        engine.handle_line(a, "@bob challenge killspree").unwrap();
        bus.clear();

        engine.handle_line(b, "/decline").unwrap();
        assert_eq!(bus.messages_to(a), vec!["System: Challenge declined."]);
        assert_eq!(engine.pending_challenge_count(), 0);

        // Declining again with nothing pending is a silent no-op.
        bus.clear();
        engine.handle_line(b, "/decline").unwrap();
        assert!(bus.emissions().is_empty());
    }

    #[test]
    fn test_accept_with_nothing_pending_is_noop() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "/accept").unwrap();
        assert!(bus.emissions().is_empty());
        assert_eq!(engine.room_of(a).unwrap(), LOBBY);
    }

    #[test]
    fn test_roulette_full_round() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        let room = start_game(&engine, a, b, "roulette");
        bus.clear();

        // Bullet is fixed at chamber 3: click, click, bang.
        engine.handle_line(a, "/pull").unwrap();
        engine.handle_line(b, "/pull").unwrap();
        engine.handle_line(a, "/pull").unwrap();

        let room_messages = bus.messages_in(&room);
        assert!(room_messages.contains(&"System: [1]alice survived.".to_string()));
        assert!(room_messages.contains(&"System: [1]bob survived.".to_string()));
        assert!(room_messages.contains(&"System: [1]alice got shot. Game over.".to_string()));

        // Bob won, the room is gone, everyone is back in the lobby.
        assert_eq!(engine.wins_of("bob").roulette, 1);
        assert_eq!(engine.wins_of("alice").roulette, 0);
        assert_eq!(engine.room_of(a).unwrap(), LOBBY);
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
        assert_eq!(engine.game_count(), 0);
        assert_eq!(engine.room_count(), 1);
    }

    #[test]
    fn test_roulette_out_of_turn_is_rejected() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        start_game(&engine, a, b, "roulette");
        bus.clear();

        // Bob moves first; it is alice's (the challenger's) turn.
        engine.handle_line(b, "/pull").unwrap();
        assert_eq!(
            bus.messages_to(b),
            vec!["System: invalid state: not your turn"]
        );
        assert_eq!(engine.game_count(), 1);
    }

    #[test]
    fn test_pull_outside_game() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "/pull").unwrap();
        assert_eq!(
            bus.messages_to(a),
            vec!["System: invalid state: no roulette game is running here"]
        );
    }

    #[test]
    fn test_killspree_consecutive_attacks() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        let room = start_game(&engine, a, b, "killspree");
        bus.clear();

        // No turn gating: alice attacks three times in a row.
        engine.handle_line(a, "/attack").unwrap();
        engine.handle_line(a, "/attack").unwrap();
        engine.handle_line(a, "/attack").unwrap();

        let room_messages = bus.messages_in(&room);
        assert!(room_messages
            .contains(&"System: [1]alice attacked! [1]bob has 2 HP left.".to_string()));
        assert!(room_messages
            .contains(&"System: [1]alice attacked! [1]bob has 1 HP left.".to_string()));
        assert!(room_messages
            .contains(&"System: [1]alice attacked! [1]bob has 0 HP left.".to_string()));
        assert!(room_messages.contains(&"System: [1]bob has been defeated!".to_string()));

        assert_eq!(engine.wins_of("alice").killspree, 1);
        assert_eq!(engine.game_count(), 0);
        assert_eq!(engine.room_of(a).unwrap(), LOBBY);
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
    }

    #[test]
    fn test_rank_query_shows_counters() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        engine.ranking.record_win("alice", GameKind::Roulette);
        engine.ranking.record_win("alice", GameKind::Roulette);
        bus.clear();

        engine.handle_line(a, "/rank").unwrap();
        assert_eq!(
            bus.messages_to(a),
            vec!["System: Rank: 1 - Roulette: 2, Killspree: 0"]
        );
    }

    #[test]
    fn test_admin_rank_query_shows_no_counters() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        engine.accounts.grant_admin("alice").unwrap();
        engine.ranking.record_win("alice", GameKind::Roulette);
        bus.clear();

        engine.handle_line(a, "/rank").unwrap();
        assert_eq!(bus.messages_to(a), vec!["System: Admins are beyond ranking."]);
    }

    #[test]
    fn test_anonymous_rank_query() {
        let (engine, bus) = engine_with_bus();
        let a = engine.connect();
        bus.clear();

        engine.handle_line(a, "/rank").unwrap();
        assert_eq!(
            bus.messages_to(a),
            vec!["System: Anonymous users have no rank."]
        );
    }

    #[test]
    fn test_admin_commands_require_admin() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let _b = logged_in(&engine, "bob");
        bus.clear();

        engine.handle_line(a, "/mute @bob").unwrap();
        assert_eq!(
            bus.messages_to(a),
            vec!["System: unauthorized: admin command"]
        );
    }

    #[test]
    fn test_mute_and_kick() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        engine.accounts.grant_admin("alice").unwrap();

        engine.handle_line(a, "/mute @bob").unwrap();
        bus.clear();
        engine.handle_line(b, "chatter").unwrap();
        assert_eq!(bus.messages_to(b), vec!["System: You are muted."]);

        engine.handle_line(a, "/kick @bob").unwrap();
        assert!(bus.messages_to(b).contains(&"System: You were kicked.".to_string()));
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn test_blocked_session_cannot_challenge() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        engine.accounts.grant_admin("alice").unwrap();

        engine.handle_line(a, "/block @bob").unwrap();
        bus.clear();

        engine.handle_line(b, "@alice challenge roulette").unwrap();
        assert_eq!(engine.pending_challenge_count(), 0);
        assert_eq!(
            bus.messages_to(b),
            vec!["System: unauthorized: you are blocked from sending challenges"]
        );
    }

    #[test]
    fn test_rank_set_and_reset() {
        let (engine, _bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let _b = logged_in(&engine, "bob");
        engine.accounts.grant_admin("alice").unwrap();

        engine.handle_line(a, "/rank set @bob 9").unwrap();
        assert_eq!(engine.accounts.get("bob").unwrap().rank, 9);

        engine.handle_line(a, "/rank reset @bob").unwrap();
        assert_eq!(engine.accounts.get("bob").unwrap().rank, 1);
    }

    #[test]
    fn test_grant_admin_and_rename() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        engine.accounts.grant_admin("alice").unwrap();

        engine.handle_line(a, "/admin @bob").unwrap();
        assert!(engine.accounts.get("bob").unwrap().admin);

        engine.handle_line(a, "/rename @bob robert").unwrap();
        assert!(engine.accounts.get("bob").is_none());
        assert!(engine.accounts.get("robert").unwrap().admin);
        assert_eq!(engine.sessions.get(b).unwrap().username.as_deref(), Some("robert"));

        bus.clear();
        engine.handle_line(b, "hi").unwrap();
        assert_eq!(bus.messages_in(LOBBY), vec!["[ADMIN]robert: hi"]);
    }

    #[test]
    fn test_pvc_private_chat() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        bus.clear();

        engine.handle_line(a, "@bob pvc meet me in the lobby").unwrap();
        assert_eq!(
            bus.messages_to(b),
            vec!["[pvc] [1]alice: meet me in the lobby"]
        );
        assert_eq!(
            bus.messages_to(a),
            vec!["[pvc -> bob] meet me in the lobby"]
        );
        assert!(bus.messages_in(LOBBY).is_empty());
    }

    #[test]
    fn test_disconnect_mid_game_forfeits() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        let room = start_game(&engine, a, b, "killspree");
        bus.clear();

        engine.disconnect(a);

        assert!(bus
            .messages_in(&room)
            .contains(&"System: bob wins by forfeit.".to_string()));
        assert_eq!(engine.wins_of("bob").killspree, 1);
        assert_eq!(engine.game_count(), 0);
        assert_eq!(engine.room_count(), 1);
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
    }

    #[test]
    fn test_disconnect_mid_game_without_forfeit() {
        let bus = Arc::new(RecordingBus::new());
        let engine = Engine::builder()
            .dice(Arc::new(FixedDice(3)))
            .forfeit_on_disconnect(false)
            .build(bus.clone());

        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        start_game(&engine, a, b, "killspree");

        engine.disconnect(a);
        assert_eq!(engine.wins_of("bob").killspree, 0);
        assert_eq!(engine.game_count(), 0);
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
    }

    #[test]
    fn test_disconnect_purges_challenges() {
        let (engine, _bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");

        engine.handle_line(a, "@bob challenge roulette").unwrap();
        assert_eq!(engine.pending_challenge_count(), 1);

        engine.disconnect(a);
        assert_eq!(engine.pending_challenge_count(), 0);

        // Accept after the challenger vanished: silent no-op.
        engine.handle_line(b, "/accept").unwrap();
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
    }

    #[test]
    fn test_accept_resolves_earliest_challenge() {
        let (engine, _bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        let b = logged_in(&engine, "bob");
        let c = logged_in(&engine, "carol");

        engine.handle_line(a, "@carol challenge roulette").unwrap();
        engine.handle_line(b, "@carol challenge killspree").unwrap();

        engine.handle_line(c, "/accept").unwrap();

        // Alice issued first, so carol duels alice; bob's offer is purged.
        let room = engine.room_of(c).unwrap();
        assert_eq!(engine.room_of(a).unwrap(), room);
        assert_eq!(engine.room_of(b).unwrap(), LOBBY);
        assert_eq!(engine.pending_challenge_count(), 0);
    }

    #[test]
    fn test_help_plain_vs_admin() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "/help").unwrap();
        assert!(!bus.messages_to(a)[0].contains("Admin commands"));

        engine.accounts.grant_admin("alice").unwrap();
        bus.clear();
        engine.handle_line(a, "/help").unwrap();
        assert!(bus.messages_to(a)[0].contains("Admin commands"));
    }

    #[test]
    fn test_anon_toggle_is_broadcast() {
        let (engine, bus) = engine_with_bus();
        let a = logged_in(&engine, "alice");
        bus.clear();

        engine.handle_line(a, "/anon").unwrap();
        assert_eq!(
            bus.emissions(),
            vec![(
                crate::bus::Target::All,
                "System: Anonymous toggled anonymity.".to_string()
            )]
        );

        bus.clear();
        engine.handle_line(a, "hi").unwrap();
        assert_eq!(bus.messages_in(LOBBY), vec!["Anonymous: hi"]);
    }
}
