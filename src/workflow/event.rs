//! Inbound events as the engine sees them, independent of any transport.

use serde::{Deserialize, Serialize};

/// Kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Voice,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Video => "video",
            Self::Voice => "voice",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(Self::Photo),
            "document" | "doc" => Ok(Self::Document),
            "video" => Ok(Self::Video),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// A unit of user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Slash command, stored normalized (`"cancel"`, not `"/Cancel@bot"`).
    Command { name: String },
    /// Token attached to a choice of an earlier prompt.
    Action { token: String },
    Text { content: String },
    Media { kind: MediaKind, reference: String },
}

impl Event {
    /// Build a command event from raw input such as `/newtask@vend_bot`.
    pub fn command(raw: &str) -> Self {
        Self::Command {
            name: normalize_command(raw),
        }
    }

    pub fn action(token: impl Into<String>) -> Self {
        Self::Action {
            token: token.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn media(kind: MediaKind, reference: impl Into<String>) -> Self {
        Self::Media {
            kind,
            reference: reference.into(),
        }
    }

    /// Interpret a choice token. Tokens starting with `/` are commands
    /// (cancel and skip buttons), everything else is an action.
    pub fn from_choice(token: &str) -> Self {
        if token.starts_with('/') {
            Self::command(token)
        } else {
            Self::action(token)
        }
    }

    /// Interpret a free-form chat line: `/x` is a command, anything else text.
    pub fn from_text(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.starts_with('/') && trimmed.len() > 1 {
            Self::command(trimmed)
        } else {
            Self::text(trimmed)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Action { .. } => "action",
            Self::Text { .. } => "text",
            Self::Media { .. } => "media",
        }
    }

    pub fn is_command(&self, name: &str) -> bool {
        matches!(self, Self::Command { name: n } if n == name)
    }
}

/// Strip the leading slash, any `@botname` suffix and arguments; lowercase.
pub fn normalize_command(raw: &str) -> String {
    let word = raw.trim().trim_start_matches('/');
    let word = word.split_whitespace().next().unwrap_or("");
    let word = word.split('@').next().unwrap_or("");
    word.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_normalized() {
        assert_eq!(normalize_command("/NewTask@vend_bot"), "newtask");
        assert_eq!(normalize_command("/cancel please"), "cancel");
        assert_eq!(normalize_command("help"), "help");
    }

    #[test]
    fn slash_tokens_become_commands() {
        assert!(Event::from_choice("/cancel").is_command("cancel"));
        assert_eq!(Event::from_choice("ing:7"), Event::action("ing:7"));
    }

    #[test]
    fn lone_slash_is_text() {
        assert_eq!(Event::from_text("/"), Event::text("/"));
        assert_eq!(Event::from_text("  250 "), Event::text("250"));
        assert!(Event::from_text("/skip").is_command("skip"));
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(Event::action("done")).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["token"], "done");
    }
}
