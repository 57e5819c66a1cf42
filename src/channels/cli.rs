//! CLI channel: stdin/stdout REPL for local operation.
//!
//! Input lines map onto events:
//! `/x` is a command, `!token` taps a choice, `#photo ref` (or `#document`,
//! `#video`, `#voice`) uploads media, anything else is text.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, EventStream, IncomingEvent, Prompt};
use crate::error::ChannelError;
use crate::workflow::event::{Event, MediaKind};

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    /// `user_id` is the external id every stdin event is attributed to.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new("local-user")
    }
}

/// Parse one REPL line. Blank lines yield nothing.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(token) = line.strip_prefix('!') {
        let token = token.trim();
        return (!token.is_empty()).then(|| Event::from_choice(token));
    }
    if let Some(rest) = line.strip_prefix('#') {
        let (kind, reference) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if let Ok(kind) = kind.parse::<MediaKind>() {
            let reference = reference.trim();
            let reference = if reference.is_empty() {
                format!("cli-{}", kind.as_str())
            } else {
                reference.to_string()
            };
            return Some(Event::media(kind, reference));
        }
    }
    Some(Event::from_text(line))
}

/// Render a prompt with numbered choices and their tokens.
pub fn render_prompt(prompt: &Prompt) -> String {
    let mut out = prompt.text.clone();
    let mut n = 0;
    for row in &prompt.choices {
        for choice in row {
            n += 1;
            out.push_str(&format!("\n  {n}. {}  [!{}]", choice.label, choice.token));
        }
    }
    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        let incoming =
                            IncomingEvent::new("cli", &user_id, event).with_user_name("Local user");
                        if tx.send(incoming).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_prompt(&self, _user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        println!("\n{}\n", render_prompt(prompt));
        eprint!("> ");
        Ok(())
    }

    async fn send_notice(&self, _user_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("\n{text}");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Choice;

    #[test]
    fn lines_map_to_events() {
        assert!(parse_line("/bag").unwrap().is_command("bag"));
        assert_eq!(parse_line("!ing:7"), Some(Event::action("ing:7")));
        assert!(parse_line("!/cancel").unwrap().is_command("cancel"));
        assert_eq!(parse_line("  250 "), Some(Event::text("250")));
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("!"), None);
    }

    #[test]
    fn media_lines() {
        assert_eq!(
            parse_line("#photo nozzle.jpg"),
            Some(Event::media(MediaKind::Photo, "nozzle.jpg"))
        );
        assert_eq!(
            parse_line("#doc"),
            Some(Event::media(MediaKind::Document, "cli-document"))
        );
        // Unknown media kinds are plain text.
        assert_eq!(parse_line("#42 left"), Some(Event::text("#42 left")));
    }

    #[test]
    fn prompt_lists_tokens() {
        let prompt = Prompt::new("Pick")
            .row(vec![Choice::new("Coffee", "ing:1")])
            .choice(Choice::cancel());
        let text = render_prompt(&prompt);
        assert!(text.contains("1. Coffee  [!ing:1]"));
        assert!(text.contains("2. ✖️ Cancel  [!/cancel]"));
    }
}
