//! Inbound line grammar.
//!
//! Every chat line is one of three shapes:
//!
//! - plain text, broadcast to the sender's room
//! - `/command [args]`
//! - `@username challenge <kind>` or `@username pvc <text>`
//!
//! Parsing is separated from execution: this module only produces tagged
//! [`Command`] values, the engine decides what they mean for the current
//! session.

use crate::error::DuelNetError;
use crate::game::GameKind;

/// A parsed chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain message for the sender's current room.
    Broadcast(String),
    /// `/`-prefixed command.
    Slash(SlashCommand),
    /// `@username ...` command routed at another session.
    Targeted {
        username: String,
        action: TargetedAction,
    },
}

/// Slash commands. The admin-only ones are gated at execution, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Anon,
    Rank,
    Pull,
    Attack,
    Accept,
    Decline,
    Kick { username: String },
    Mute { username: String },
    Block { username: String },
    RankSet { username: String, rank: u32 },
    RankReset { username: String },
    Admin { username: String },
    Rename { username: String, new_name: String },
}

/// Actions aimed at another session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetedAction {
    Challenge(GameKind),
    Pvc(String),
}

/// Parse errors. All of them become a private reply to the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown game kind '{0}'")]
    UnknownKind(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("bad argument: {0}")]
    BadArgument(&'static str),
}

impl From<ParseError> for DuelNetError {
    fn from(err: ParseError) -> Self {
        DuelNetError::invalid_state(err.to_string())
    }
}

/// Usernames in arguments may carry the `@` sigil; accept both forms.
fn strip_sigil(arg: &str) -> &str {
    arg.strip_prefix('@').unwrap_or(arg)
}

/// Parse one inbound line.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = line.strip_prefix('/') {
        return parse_slash(rest).map(Command::Slash);
    }

    if let Some(rest) = line.strip_prefix('@') {
        return parse_targeted(rest);
    }

    Ok(Command::Broadcast(line.to_string()))
}

fn parse_slash(rest: &str) -> Result<SlashCommand, ParseError> {
    let mut words = rest.split_whitespace();
    let token = words.next().ok_or(ParseError::MissingArgument("command"))?;

    match token {
        "help" => Ok(SlashCommand::Help),
        "anon" => Ok(SlashCommand::Anon),
        "pull" => Ok(SlashCommand::Pull),
        "attack" => Ok(SlashCommand::Attack),
        "accept" => Ok(SlashCommand::Accept),
        "decline" => Ok(SlashCommand::Decline),
        "rank" => parse_rank(&mut words),
        "kick" => Ok(SlashCommand::Kick {
            username: required_user(&mut words)?,
        }),
        "mute" => Ok(SlashCommand::Mute {
            username: required_user(&mut words)?,
        }),
        "block" => Ok(SlashCommand::Block {
            username: required_user(&mut words)?,
        }),
        "admin" => Ok(SlashCommand::Admin {
            username: required_user(&mut words)?,
        }),
        "rename" => {
            let username = required_user(&mut words)?;
            let new_name = words
                .next()
                .ok_or(ParseError::MissingArgument("new username"))?;
            Ok(SlashCommand::Rename {
                username,
                new_name: new_name.to_string(),
            })
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// `/rank` alone queries; `set` and `reset` are the admin mutations.
fn parse_rank<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<SlashCommand, ParseError> {
    match words.next() {
        None => Ok(SlashCommand::Rank),
        Some("set") => {
            let username = required_user(words)?;
            let rank = words
                .next()
                .ok_or(ParseError::MissingArgument("rank value"))?
                .parse()
                .map_err(|_| ParseError::BadArgument("rank must be a number"))?;
            Ok(SlashCommand::RankSet { username, rank })
        }
        Some("reset") => Ok(SlashCommand::RankReset {
            username: required_user(words)?,
        }),
        Some(_) => Err(ParseError::BadArgument("expected 'set' or 'reset'")),
    }
}

fn parse_targeted(rest: &str) -> Result<Command, ParseError> {
    let mut parts = rest.splitn(2, ' ');
    let username = parts.next().unwrap_or_default();
    if username.is_empty() {
        return Err(ParseError::MissingArgument("username"));
    }
    let tail = parts.next().unwrap_or("").trim();
    if tail.is_empty() {
        return Err(ParseError::MissingArgument("subcommand"));
    }

    let mut words = tail.splitn(2, ' ');
    let sub = words.next().unwrap_or_default();
    let action = match sub {
        "challenge" => {
            let kind_word = words
                .next()
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .ok_or(ParseError::MissingArgument("game kind"))?;
            let kind = GameKind::parse(kind_word)
                .ok_or_else(|| ParseError::UnknownKind(kind_word.to_string()))?;
            TargetedAction::Challenge(kind)
        }
        "pvc" => {
            let text = words.next().map(str::trim).unwrap_or_default();
            if text.is_empty() {
                return Err(ParseError::MissingArgument("message"));
            }
            TargetedAction::Pvc(text.to_string())
        }
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };

    Ok(Command::Targeted {
        username: username.to_string(),
        action,
    })
}

fn required_user<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<String, ParseError> {
    words
        .next()
        .map(|w| strip_sigil(w).to_string())
        .filter(|w| !w.is_empty())
        .ok_or(ParseError::MissingArgument("username"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_broadcast() {
        assert_eq!(
            parse_line("hello everyone").unwrap(),
            Command::Broadcast("hello everyone".to_string())
        );
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_simple_slash_commands() {
        assert_eq!(parse_line("/help").unwrap(), Command::Slash(SlashCommand::Help));
        assert_eq!(parse_line("/anon").unwrap(), Command::Slash(SlashCommand::Anon));
        assert_eq!(parse_line("/pull").unwrap(), Command::Slash(SlashCommand::Pull));
        assert_eq!(parse_line("/attack").unwrap(), Command::Slash(SlashCommand::Attack));
        assert_eq!(parse_line("/accept").unwrap(), Command::Slash(SlashCommand::Accept));
        assert_eq!(parse_line("/decline").unwrap(), Command::Slash(SlashCommand::Decline));
        assert_eq!(parse_line("/rank").unwrap(), Command::Slash(SlashCommand::Rank));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_line("/dance"),
            Err(ParseError::UnknownCommand("dance".to_string()))
        );
    }

    #[test]
    fn test_admin_commands_accept_sigil() {
        assert_eq!(
            parse_line("/kick @bob").unwrap(),
            Command::Slash(SlashCommand::Kick {
                username: "bob".to_string()
            })
        );
        assert_eq!(
            parse_line("/mute bob").unwrap(),
            Command::Slash(SlashCommand::Mute {
                username: "bob".to_string()
            })
        );
    }

    #[test]
    fn test_rank_set_and_reset() {
        assert_eq!(
            parse_line("/rank set @bob 5").unwrap(),
            Command::Slash(SlashCommand::RankSet {
                username: "bob".to_string(),
                rank: 5
            })
        );
        assert_eq!(
            parse_line("/rank reset @bob").unwrap(),
            Command::Slash(SlashCommand::RankReset {
                username: "bob".to_string()
            })
        );
        assert_eq!(
            parse_line("/rank set @bob many"),
            Err(ParseError::BadArgument("rank must be a number"))
        );
        assert_eq!(
            parse_line("/rank up"),
            Err(ParseError::BadArgument("expected 'set' or 'reset'"))
        );
    }

    #[test]
    fn test_rename() {
        assert_eq!(
            parse_line("/rename @bob robert").unwrap(),
            Command::Slash(SlashCommand::Rename {
                username: "bob".to_string(),
                new_name: "robert".to_string()
            })
        );
    }

    #[test]
    fn test_challenge() {
        assert_eq!(
            parse_line("@bob challenge roulette").unwrap(),
            Command::Targeted {
                username: "bob".to_string(),
                action: TargetedAction::Challenge(GameKind::Roulette),
            }
        );
        assert_eq!(
            parse_line("@bob challenge killspree").unwrap(),
            Command::Targeted {
                username: "bob".to_string(),
                action: TargetedAction::Challenge(GameKind::Killspree),
            }
        );
    }

    #[test]
    fn test_challenge_unknown_kind() {
        assert_eq!(
            parse_line("@bob challenge chess"),
            Err(ParseError::UnknownKind("chess".to_string()))
        );
    }

    #[test]
    fn test_pvc() {
        assert_eq!(
            parse_line("@bob pvc psst, over here").unwrap(),
            Command::Targeted {
                username: "bob".to_string(),
                action: TargetedAction::Pvc("psst, over here".to_string()),
            }
        );
        assert_eq!(
            parse_line("@bob pvc"),
            Err(ParseError::MissingArgument("message"))
        );
    }

    #[test]
    fn test_targeted_unknown_subcommand() {
        assert_eq!(
            parse_line("@bob wave"),
            Err(ParseError::UnknownCommand("wave".to_string()))
        );
        assert_eq!(
            parse_line("@bob"),
            Err(ParseError::MissingArgument("subcommand"))
        );
    }
}
