//! In-band bot commands (`!help`, `!ping`, `!info`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    pub enabled: bool,
    pub prefix: String,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Help,
    Ping,
    Info,
}

/// What `!info` reports about the chat a command came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFacts {
    pub name: String,
    pub is_group: bool,
    pub participants: usize,
}

impl BotCommand {
    /// Match a whole message body against the known commands.
    ///
    /// Matching ignores case and surrounding whitespace; anything else after
    /// the command word means it is not a command.
    pub fn parse(prefix: &str, body: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let word = body.trim().strip_prefix(prefix)?;
        match word.to_lowercase().as_str() {
            "help" => Some(Self::Help),
            "ping" => Some(Self::Ping),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    pub fn reply(&self, prefix: &str, chat: &ChatFacts) -> String {
        match self {
            Self::Help => format!(
                "*Available Commands*\n\
                 {prefix}help - Show this message\n\
                 {prefix}ping - Check bot status\n\
                 {prefix}info - Get chat info"
            ),
            Self::Ping => "🤖 Bot is active!".to_string(),
            Self::Info => format!(
                "*Chat Info*\nName: {}\nIsGroup: {}\nParticipants: {}",
                chat.name, chat.is_group, chat.participants
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(BotCommand::parse("!", "!help"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("!", "  !PING "), Some(BotCommand::Ping));
        assert_eq!(BotCommand::parse("!", "!Info"), Some(BotCommand::Info));
    }

    #[test]
    fn test_parse_rejects_other_bodies() {
        assert_eq!(BotCommand::parse("!", "help"), None);
        assert_eq!(BotCommand::parse("!", "!ping now"), None);
        assert_eq!(BotCommand::parse("!", "!unknown"), None);
        assert_eq!(BotCommand::parse("", "!help"), None);
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(BotCommand::parse("/", "/ping"), Some(BotCommand::Ping));
        assert_eq!(BotCommand::parse("/", "!ping"), None);
        let help = BotCommand::Help.reply("/", &ChatFacts {
            name: String::new(),
            is_group: false,
            participants: 1,
        });
        assert!(help.contains("/ping - Check bot status"));
    }

    #[test]
    fn test_info_reply() {
        let facts = ChatFacts {
            name: "Team".to_string(),
            is_group: true,
            participants: 4,
        };
        assert_eq!(
            BotCommand::Info.reply("!", &facts),
            "*Chat Info*\nName: Team\nIsGroup: true\nParticipants: 4"
        );
    }
}
