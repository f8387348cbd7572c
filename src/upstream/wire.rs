//! Wire schema for the upstream conversation API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Model used when the caller does not name one
pub const DEFAULT_MODEL: &str = "text-davinci-002-render-sha";

/// Message author on the posting side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub content_type: String,
    pub parts: Vec<String>,
}

/// One message in the outgoing `messages[]` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub id: String,
    pub author: Author,
    pub content: MessageContent,
    pub metadata: Value,
}

impl WireMessage {
    /// Build a text message with a fresh id.
    pub fn text(role: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: Author {
                role: role.to_string(),
            },
            content: MessageContent {
                content_type: "text".to_string(),
                parts: vec![content.to_string()],
            },
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::text("user", content)
    }
}

/// Body posted to `{base_url}/conversation`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationPayload {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<WireMessage>>,
    pub conversation_id: Option<String>,
    pub parent_message_id: String,
    pub model: String,
    pub history_and_training_disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arkose_token: Option<String>,
}

impl ConversationPayload {
    /// A `next` round posting one or more messages.
    ///
    /// Without an existing conversation the parent message id is a fresh
    /// UUID, which is how upstream roots a new thread.
    pub fn next(
        messages: Vec<WireMessage>,
        conversation_id: Option<String>,
        parent_id: Option<String>,
        model: Option<String>,
        history_and_training_disabled: bool,
    ) -> Self {
        let parent_message_id = parent_id
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            action: "next".to_string(),
            messages: Some(messages),
            conversation_id: conversation_id.filter(|c| !c.is_empty()),
            parent_message_id,
            model: model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            history_and_training_disabled,
            arkose_token: None,
        }
    }

    /// A `continue` round asking upstream to keep generating after a
    /// `max_tokens` truncation.
    pub fn continuation(
        conversation_id: String,
        parent_id: String,
        model: String,
        history_and_training_disabled: bool,
    ) -> Self {
        Self {
            action: "continue".to_string(),
            messages: None,
            conversation_id: Some(conversation_id),
            parent_message_id: parent_id,
            model,
            history_and_training_disabled,
            arkose_token: None,
        }
    }
}

/// One partial assistant turn as surfaced to the scheduler.
///
/// The session accumulates text across continuation rounds, so the last
/// event drained from a stream always carries the complete response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnEvent {
    pub author: Value,
    pub message: String,
    pub conversation_id: String,
    pub parent_id: String,
    pub model: Option<String>,
    pub finish_details: Option<String>,
    pub end_turn: bool,
    pub recipient: String,
    pub citations: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_payload_fresh_thread() {
        let payload =
            ConversationPayload::next(vec![WireMessage::user("hi")], None, None, None, false);
        assert_eq!(payload.action, "next");
        assert_eq!(payload.conversation_id, None);
        assert_eq!(payload.model, DEFAULT_MODEL);
        // A fresh thread still roots at a valid parent id.
        assert!(Uuid::parse_str(&payload.parent_message_id).is_ok());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["conversation_id"], serde_json::Value::Null);
        assert!(json.get("arkose_token").is_none());
        assert_eq!(json["messages"][0]["author"]["role"], "user");
        assert_eq!(json["messages"][0]["content"]["content_type"], "text");
        assert_eq!(json["messages"][0]["content"]["parts"][0], "hi");
    }

    #[test]
    fn test_next_payload_resumes_thread() {
        let payload = ConversationPayload::next(
            vec![WireMessage::user("again")],
            Some("conv-1".to_string()),
            Some("node-1".to_string()),
            Some("gpt-4".to_string()),
            true,
        );
        assert_eq!(payload.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(payload.parent_message_id, "node-1");
        assert_eq!(payload.model, "gpt-4");
        assert!(payload.history_and_training_disabled);
    }

    #[test]
    fn test_empty_strings_treated_as_absent() {
        let payload = ConversationPayload::next(
            vec![WireMessage::user("hi")],
            Some(String::new()),
            Some(String::new()),
            Some(String::new()),
            false,
        );
        assert_eq!(payload.conversation_id, None);
        assert_eq!(payload.model, DEFAULT_MODEL);
        assert!(!payload.parent_message_id.is_empty());
    }

    #[test]
    fn test_continuation_payload_has_no_messages() {
        let payload = ConversationPayload::continuation(
            "conv-1".to_string(),
            "node-1".to_string(),
            "gpt-4".to_string(),
            false,
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "continue");
        assert!(json.get("messages").is_none());
        assert_eq!(json["conversation_id"], "conv-1");
        assert_eq!(json["parent_message_id"], "node-1");
    }
}
