//! Application protocol carried in WebSocket text frames.
//!
//! Client → server: any UTF-8 text. The exact payload [`HISTORY_COMMAND`]
//! asks for the history snapshot; everything else is a regular message.
//!
//! Server → client: transformed message text, or a JSON array of strings
//! (oldest first) in reply to a history request.

use crate::errors::Result;

/// Reserved payload requesting the recent-message snapshot.
pub const HISTORY_COMMAND: &str = "history";

/// What an inbound text frame asks the server to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundCommand<'a> {
    /// Reply to the sender with the history snapshot.
    History,
    /// Transform, record, and broadcast this message.
    Relay(&'a str),
}

impl<'a> InboundCommand<'a> {
    /// Classify an inbound text payload. Matching is exact (case-sensitive,
    /// no trimming).
    pub fn parse(text: &'a str) -> Self {
        if text == HISTORY_COMMAND {
            Self::History
        } else {
            Self::Relay(text)
        }
    }
}

/// Encode a history snapshot as the JSON array sent to the client.
pub fn encode_history(messages: &[String]) -> Result<String> {
    Ok(serde_json::to_string(messages)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_history_command() {
        assert_eq!(InboundCommand::parse("history"), InboundCommand::History);
    }

    #[test]
    fn parse_regular_message() {
        assert_eq!(InboundCommand::parse("hello"), InboundCommand::Relay("hello"));
    }

    #[test]
    fn history_match_is_exact() {
        assert_eq!(InboundCommand::parse("History"), InboundCommand::Relay("History"));
        assert_eq!(InboundCommand::parse(" history"), InboundCommand::Relay(" history"));
        assert_eq!(InboundCommand::parse("history\n"), InboundCommand::Relay("history\n"));
    }

    #[test]
    fn parse_empty_is_relay() {
        assert_eq!(InboundCommand::parse(""), InboundCommand::Relay(""));
    }

    #[test]
    fn encode_empty_history() {
        assert_eq!(encode_history(&[]).unwrap(), "[]");
    }

    #[test]
    fn encode_history_preserves_order() {
        let json = encode_history(&["a".into(), "b\"q".into()]).unwrap();
        assert_eq!(json, r#"["a","b\"q"]"#);
        let back: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec!["a", "b\"q"]);
    }
}
