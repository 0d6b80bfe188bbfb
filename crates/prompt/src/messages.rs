//! Message assembly from marker-laden rendered text.
//!
//! Role and history markers split the text into messages; media and section
//! markers split each message's text into parts.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use crate::helpers::{MARKER_PREFIX, MARKER_SUFFIX};
use crate::types::{DataArgument, MediaPart, Message, Part, Role};

/// Role and history markers.
static ROLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<<<dotprompt:(?:role:[a-z]+|history)>>>").expect("Invalid role regex")
});

/// Media and section markers.
static PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<<<dotprompt:(?:media:url|section).*?>>>").expect("Invalid part regex")
});

/// Purpose tag given to messages taken from conversation history.
pub const HISTORY_PURPOSE: &str = "history";

/// Turns rendered template text into structured messages.
pub trait MessageAssembler: Send + Sync {
    fn assemble(&self, rendered: &str, data: &DataArgument) -> Vec<Message>;
}

/// The default assembler for `<<<dotprompt:...>>>` markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerAssembler;

impl MessageAssembler for MarkerAssembler {
    fn assemble(&self, rendered: &str, data: &DataArgument) -> Vec<Message> {
        to_messages(rendered, data)
    }
}

/// A message under construction: either text to split into parts, or a
/// finished message copied from history.
enum Source {
    Text { role: Role, text: String },
    History(Message),
}

/// Split `text` on `regex`, keeping the matched markers as separate pieces
/// and dropping whitespace-only pieces.
fn split_keeping_markers<'t>(regex: &Regex, text: &'t str) -> Vec<&'t str> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for m in regex.find_iter(text) {
        pieces.push(&text[last..m.start()]);
        pieces.push(m.as_str());
        last = m.end();
    }
    pieces.push(&text[last..]);

    pieces.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn marker_body(marker: &str) -> &str {
    marker
        .trim_start_matches(MARKER_PREFIX)
        .trim_end_matches(MARKER_SUFFIX)
}

fn history_messages(data: &DataArgument) -> Vec<Message> {
    data.messages
        .iter()
        .flatten()
        .map(|message| {
            let mut message = message.clone();
            message
                .metadata
                .get_or_insert_with(Map::new)
                .insert("purpose".to_string(), json!(HISTORY_PURPOSE));
            message
        })
        .collect()
}

/// Convert a piece of message text into parts.
pub fn to_parts(source: &str) -> Vec<Part> {
    split_keeping_markers(&PART_REGEX, source)
        .into_iter()
        .map(parse_part)
        .collect()
}

fn parse_part(piece: &str) -> Part {
    if !piece.starts_with(MARKER_PREFIX) {
        return Part::text(piece);
    }

    let body = marker_body(piece);
    if let Some(rest) = body.strip_prefix("media:url ") {
        let mut fields = rest.split_whitespace();
        let url = fields.next().unwrap_or_default().to_string();
        let content_type = fields.next().map(str::to_string);
        return Part::Media {
            media: MediaPart { url, content_type },
        };
    }

    if let Some(rest) = body.strip_prefix("section") {
        let mut metadata = Map::new();
        metadata.insert("purpose".to_string(), Value::String(rest.trim().to_string()));
        metadata.insert("pending".to_string(), Value::Bool(true));
        return Part::Pending { metadata };
    }

    Part::text(piece)
}

/// Convert rendered text into messages, expanding history from `data`.
pub fn to_messages(rendered: &str, data: &DataArgument) -> Vec<Message> {
    let mut sources = vec![Source::Text {
        role: Role::User,
        text: String::new(),
    }];
    let mut history_used = false;

    for piece in split_keeping_markers(&ROLE_REGEX, rendered) {
        let body = marker_body(piece);

        if piece.starts_with(MARKER_PREFIX) && body.starts_with("role:") {
            let role = Role::from_name(&body["role:".len()..]);
            match sources.last_mut() {
                Some(Source::Text { role: current, text }) if text.trim().is_empty() => {
                    *current = role;
                }
                _ => sources.push(Source::Text {
                    role,
                    text: String::new(),
                }),
            }
        } else if piece.starts_with(MARKER_PREFIX) && body == "history" {
            history_used = true;
            sources.extend(history_messages(data).into_iter().map(Source::History));
            sources.push(Source::Text {
                role: Role::Model,
                text: String::new(),
            });
        } else {
            match sources.last_mut() {
                Some(Source::Text { text, .. }) => text.push_str(piece),
                _ => sources.push(Source::Text {
                    role: Role::User,
                    text: piece.to_string(),
                }),
            }
        }
    }

    let messages: Vec<Message> = sources
        .into_iter()
        .filter_map(|source| match source {
            Source::History(message) => Some(message),
            Source::Text { role, text } => {
                let parts = to_parts(&text);
                (!parts.is_empty()).then(|| Message::new(role, parts))
            }
        })
        .collect();

    if history_used {
        messages
    } else {
        insert_history(messages, data)
    }
}

/// Insert history before the trailing user message, or append it.
fn insert_history(mut messages: Vec<Message>, data: &DataArgument) -> Vec<Message> {
    let history = history_messages(data);
    if history.is_empty() {
        return messages;
    }

    match messages.last() {
        Some(last) if last.role == Role::User => {
            let at = messages.len() - 1;
            messages.splice(at..at, history);
        }
        _ => messages.extend(history),
    }

    messages
}
