//! Text extraction and command grammar.
//!
//! Commands are addressed to the agent by name:
//!
//! ```text
//! Bot, say hello there   -> Say("hello there")
//! bot: jump around       -> Jump
//! BOT say                -> Say("")
//! ```

use crate::wire::ChatPayload;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Say,
    Jump,
    None,
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub argument: Option<String>,
}

impl Command {
    pub fn none() -> Self {
        Self {
            verb: Verb::None,
            argument: None,
        }
    }
}

/// Best-effort plain text of a chat payload. Never fails.
///
/// Structured payloads are flattened in document order: a node contributes
/// its `text`, then each of its `extra` children. When the structured field
/// is missing or does not parse, the plain message is used, then the raw
/// structured string, then the raw frame.
pub fn extract_text(payload: &ChatPayload) -> String {
    if let Some(json) = payload.json_data.as_deref() {
        if let Ok(value) = serde_json::from_str::<Value>(json) {
            let mut text = String::new();
            collect_segments(&value, &mut text);
            return text;
        }
    }

    payload
        .message
        .clone()
        .or_else(|| payload.json_data.clone())
        .unwrap_or_else(|| payload.raw.clone())
}

fn collect_segments(node: &Value, out: &mut String) {
    match node {
        Value::String(text) => out.push_str(text),
        Value::Array(items) => items.iter().for_each(|item| collect_segments(item, out)),
        Value::Object(fields) => {
            if let Some(Value::String(text)) = fields.get("text") {
                out.push_str(text);
            }
            if let Some(Value::Array(extra)) = fields.get("extra") {
                extra.iter().for_each(|item| collect_segments(item, out));
            }
        }
        _ => {}
    }
}

/// Parses `text` as a command addressed to `self_name`.
pub fn parse_command(text: &str, self_name: &str) -> Command {
    let Some(rest) = strip_prefix_ignore_case(text, self_name) else {
        return Command::none();
    };
    let rest = rest.trim_start_matches(|c: char| c == ',' || c == ':' || c.is_whitespace());

    if let Some(after) = strip_prefix_ignore_case(rest, "say") {
        if after.is_empty() {
            return Command {
                verb: Verb::Say,
                argument: Some(String::new()),
            };
        }
        if let Some(argument) = after.strip_prefix(' ') {
            return Command {
                verb: Verb::Say,
                argument: Some(argument.to_string()),
            };
        }
    }

    if strip_prefix_ignore_case(rest, "jump").is_some() {
        return Command {
            verb: Verb::Jump,
            argument: None,
        };
    }

    Command::none()
}

/// Case-insensitive `str::strip_prefix`, compared char by char.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut end = 0;
    for expected in prefix.chars() {
        let actual = text[end..].chars().next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        end += actual.len_utf8();
    }
    Some(&text[end..])
}

/// Case-insensitive substring test.
pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn say(argument: &str) -> Command {
        Command {
            verb: Verb::Say,
            argument: Some(argument.to_string()),
        }
    }

    fn jump() -> Command {
        Command {
            verb: Verb::Jump,
            argument: None,
        }
    }

    #[test]
    fn say_keeps_the_exact_remainder() {
        let cases = [
            ("AgentBot1, say hello!", "hello!"),
            ("agentbot1 say  two spaces ", " two spaces "),
            ("AGENTBOT1:say x", "x"),
            ("AgentBot1,,:  SAY MixedCase", "MixedCase"),
            ("AgentBot1say glued", "glued"),
            ("AgentBot1, say ", ""),
            ("AgentBot1, say", ""),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_command(text, "AgentBot1"), say(expected), "input: {text:?}");
        }
    }

    #[test]
    fn jump_ignores_trailing_text() {
        for text in ["AgentBot1 jump", "agentbot1, JUMP now please", "AgentBot1:jumping"] {
            assert_eq!(parse_command(text, "AgentBot1"), jump(), "input: {text:?}");
        }
    }

    #[test]
    fn anything_else_is_none() {
        for text in [
            "hello AgentBot1, say hi",
            "AgentBot1, sayhello",
            "AgentBot1, dance",
            "Agent",
            "",
        ] {
            assert_eq!(parse_command(text, "AgentBot1"), Command::none(), "input: {text:?}");
        }
    }

    #[test]
    fn prefix_match_handles_multibyte_names() {
        assert_eq!(parse_command("ÉCLAIR, say salut", "éclair"), say("salut"));
        assert_eq!(parse_command("é", "éclair"), Command::none());
    }

    #[test]
    fn extracts_segments_in_document_order() {
        let payload = ChatPayload::structured(r#"{"extra":[{"text":"a"},{"text":"b"}]}"#);
        assert_eq!(extract_text(&payload), "ab");

        let payload = ChatPayload::structured(r#"{"text":"<Steve> ","extra":["hi ",{"text":"there","extra":[{"text":"!"}]}]}"#);
        assert_eq!(extract_text(&payload), "<Steve> hi there!");
    }

    #[test]
    fn extracts_single_text_node() {
        let payload = ChatPayload::structured(r#"{"text":"hello"}"#);
        assert_eq!(extract_text(&payload), "hello");
    }

    #[test]
    fn falls_back_when_structured_payload_is_unusable() {
        let payload = ChatPayload {
            json_data: Some("{not json".to_string()),
            message: Some("plain words".to_string()),
            raw: "{}".to_string(),
        };
        assert_eq!(extract_text(&payload), "plain words");

        let payload = ChatPayload {
            json_data: Some("{not json".to_string()),
            message: None,
            raw: "{}".to_string(),
        };
        assert_eq!(extract_text(&payload), "{not json");

        let payload = ChatPayload {
            json_data: None,
            message: None,
            raw: r#"{"type":"chat","data":{}}"#.to_string(),
        };
        assert_eq!(extract_text(&payload), r#"{"type":"chat","data":{}}"#);
    }

    #[test]
    fn plain_payload_is_used_verbatim() {
        assert_eq!(extract_text(&ChatPayload::plain("just text")), "just text");
    }
}
