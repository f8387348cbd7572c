//! Event-stream line protocol
//!
//! The upstream conversation endpoint answers with a line-oriented event
//! stream terminated by `[DONE]`. Bytes arrive in chunks that need not
//! align with line boundaries, so `LineBuffer` reassembles complete lines
//! first and `parse_line` runs the protocol state machine on each one.

use serde_json::Value;
use tracing::warn;

use crate::error::BotError;
use crate::upstream::wire::TurnEvent;

/// Buffer for reassembling lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    incomplete: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the complete lines they finish. The
    /// trailing `\n` (and a `\r` before it) is stripped; empty lines are
    /// kept because the protocol treats them as skips, not separators to
    /// hide.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.incomplete.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.incomplete.find('\n') {
            let mut line = self.incomplete[..pos].to_string();
            self.incomplete = self.incomplete[pos + 1..].to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Any partial line left at end of stream.
    pub fn remaining(&self) -> &str {
        &self.incomplete
    }
}

/// Outcome of feeding one line to the state machine
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    /// Nothing usable on this line; keep reading.
    Skip,
    /// Stream terminator reached.
    Done,
    /// A partial assistant turn.
    Event(TurnEvent),
}

/// Run the protocol state machine over a single line.
///
/// Malformed JSON and non-assistant chatter are tolerated (logged and
/// skipped); only an explicit upstream fault line is an error.
pub fn parse_line(line: &str) -> Result<ParsedLine, BotError> {
    if line.eq_ignore_ascii_case("internal server error") {
        warn!(line = %line, "upstream reported an internal fault");
        return Err(BotError::InternalServerError);
    }
    if line.is_empty() {
        return Ok(ParsedLine::Skip);
    }

    let line = line.strip_prefix("data: ").unwrap_or(line);
    if line == "[DONE]" {
        return Ok(ParsedLine::Done);
    }

    let body: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "skipping undecodable stream line");
            return Ok(ParsedLine::Skip);
        }
    };

    let message = &body["message"];
    if message.get("content").is_none() {
        return Ok(ParsedLine::Skip);
    }
    if message["author"]["role"].as_str() != Some("assistant") {
        return Ok(ParsedLine::Skip);
    }

    let (Some(conversation_id), Some(parent_id)) =
        (body["conversation_id"].as_str(), message["id"].as_str())
    else {
        warn!("assistant event missing conversation or message id");
        return Ok(ParsedLine::Skip);
    };

    let metadata = message.get("metadata").cloned().unwrap_or(Value::Null);

    // Metadata attribution wins over the message author when present.
    let author = match metadata.get("author") {
        Some(a) if !a.is_null() => a.clone(),
        _ => message["author"].clone(),
    };

    let text = message["content"]["parts"][0]
        .as_str()
        .unwrap_or_default()
        .to_string();

    Ok(ParsedLine::Event(TurnEvent {
        author,
        message: text,
        conversation_id: conversation_id.to_string(),
        parent_id: parent_id.to_string(),
        model: metadata["model_slug"].as_str().map(str::to_string),
        finish_details: metadata["finish_details"]["type"]
            .as_str()
            .map(str::to_string),
        end_turn: message["end_turn"].as_bool().unwrap_or(true),
        recipient: message["recipient"]
            .as_str()
            .unwrap_or("all")
            .to_string(),
        citations: metadata
            .get("citations")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![])),
    }))
}
