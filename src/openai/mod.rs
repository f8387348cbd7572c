//! Public completion schema and translation to the upstream wire schema
//!
//! The edge speaks the standard chat-completion protocol. This module
//! adapts inbound requests into upstream conversation messages and wraps
//! accumulated assistant output back into a completion response,
//! including the structured function-call envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::upstream::wire::{WireMessage, DEFAULT_MODEL};

/// Submodels forwarded to upstream as-is; any other `gpt-4*` collapses
/// to plain `gpt-4`.
const GPT4_SUBMODELS: [&str; 4] = [
    "gpt-4-browsing",
    "gpt-4-plugins",
    "gpt-4-mobile",
    "gpt-4-code-interpreter",
];

/// Preamble injected when the caller declares functions. The upstream
/// assistant is asked to answer with the structured envelope that
/// `completion_from_text` unpacks.
const FUNCTIONS_PREAMBLE: &str = r#"rules:
    1. Depending on the user's request, you can decide whether to call
        functions from the functions list for additional data.
    2. If no function call is needed, answer the request from your own
        knowledge.
    3. Output must be a JSON object with the following properties:
        1) 'content' -- displayed to the user; must not be null when no
           function call is needed
        2) 'function_calls' -- list of functions and parameters
        3) 'explanation' -- debug info
        4) 'finish_reason' -- stop, length, function_call, content_filter.
    4. Avoid markdown syntax or line breaks in your responses.
functions: [{functions}]"#;

/// One message of the public completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<Value>,
    #[serde(default)]
    pub function_calls: Option<Vec<Value>>,
}

/// Function declaration of the public completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Body of `POST /v1/chat/completions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub messages: Vec<ApiMessage>,
    pub model: String,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub functions: Vec<ApiFunction>,
}

/// Body of `POST /v1/chat/prompt`
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub openid: Option<String>,
    #[serde(default)]
    pub new_chat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    pub content: Option<String>,
    pub function_call: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    pub index: u32,
    pub finish_reason: String,
}

/// OpenAI-shaped completion response with a single choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub usage: Usage,
    pub choices: Vec<Choice>,
}

/// Map a public model name onto an upstream slug.
pub fn map_model(model: &str) -> String {
    if model.starts_with("gpt-4") {
        if GPT4_SUBMODELS.contains(&model) {
            model.to_string()
        } else {
            "gpt-4".to_string()
        }
    } else {
        DEFAULT_MODEL.to_string()
    }
}

/// Translate a completion request into upstream messages plus the model
/// slug to post them with.
pub fn translate_request(request: &ApiRequest) -> (Vec<WireMessage>, String) {
    let model = map_model(&request.model);
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if !request.functions.is_empty() {
        let declarations: Vec<String> = request
            .functions
            .iter()
            .map(|f| serde_json::to_string(f).unwrap_or_default())
            .collect();
        let preamble = FUNCTIONS_PREAMBLE.replace("{functions}", &declarations.join(","));
        messages.push(WireMessage::text("critic", &preamble));
    }

    for message in &request.messages {
        let (role, content) = match message.role.as_str() {
            // Upstream has no system role; the critic channel stands in.
            "system" => ("critic", message.content.clone().unwrap_or_default()),
            "assistant" => {
                let mut calls: Vec<Value> = Vec::new();
                if let Some(call) = &message.function_call {
                    match call {
                        Value::Array(items) => calls.extend(items.iter().cloned()),
                        other => calls.push(other.clone()),
                    }
                }
                if let Some(more) = &message.function_calls {
                    calls.extend(more.iter().cloned());
                }
                if calls.is_empty() {
                    ("assistant", message.content.clone().unwrap_or_default())
                } else {
                    (
                        "assistant",
                        json!({ "function_calls": calls }).to_string(),
                    )
                }
            }
            "function" => (
                "critic",
                json!({
                    "role": "function",
                    "name": message.name.clone().unwrap_or_default(),
                    "response": message.content.clone().unwrap_or_default(),
                })
                .to_string(),
            ),
            role => (role, message.content.clone().unwrap_or_default()),
        };
        messages.push(WireMessage::text(role, &content));
    }

    (messages, model)
}

#[derive(Debug, Deserialize)]
struct FunctionEnvelope {
    content: Option<String>,
    function_calls: Option<Value>,
    finish_reason: Option<String>,
}

/// Wrap accumulated assistant text into a completion response.
///
/// Text that parses as the structured function-call envelope populates
/// the choice's `function_call` and nulls `content`; anything else is
/// returned verbatim as `content`.
pub fn completion_from_text(
    full_text: &str,
    model: &str,
    finish_details: Option<&str>,
) -> CompletionResponse {
    let mut content = None;
    let mut function_call = None;
    let mut finish_reason = match finish_details {
        Some("max_tokens") => "length".to_string(),
        _ => "stop".to_string(),
    };

    if full_text.contains("function_calls") && full_text.contains("explanation") {
        match serde_json::from_str::<FunctionEnvelope>(full_text) {
            Ok(envelope) => {
                content = envelope.content;
                function_call = envelope.function_calls;
                if let Some(reason) = envelope.finish_reason {
                    finish_reason = reason;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "assistant output looked like an envelope but did not parse");
                content = Some(full_text.to_string());
            }
        }
    } else {
        content = Some(full_text.to_string());
    }

    CompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
        choices: vec![Choice {
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content,
                function_call,
            },
            index: 0,
            finish_reason,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user_message(content: &str) -> ApiMessage {
        ApiMessage {
            role: "user".to_string(),
            name: None,
            content: Some(content.to_string()),
            function_call: None,
            function_calls: None,
        }
    }

    #[test]
    fn test_map_model() {
        assert_eq!(map_model("gpt-3.5-turbo"), DEFAULT_MODEL);
        assert_eq!(map_model("anything"), DEFAULT_MODEL);
        assert_eq!(map_model("gpt-4"), "gpt-4");
        assert_eq!(map_model("gpt-4-0613"), "gpt-4");
        assert_eq!(map_model("gpt-4-browsing"), "gpt-4-browsing");
        assert_eq!(map_model("gpt-4-plugins"), "gpt-4-plugins");
        assert_eq!(map_model("gpt-4-mobile"), "gpt-4-mobile");
        assert_eq!(map_model("gpt-4-code-interpreter"), "gpt-4-code-interpreter");
    }

    #[test]
    fn test_system_becomes_critic() {
        let request = ApiRequest {
            messages: vec![
                ApiMessage {
                    role: "system".to_string(),
                    name: None,
                    content: Some("be brief".to_string()),
                    function_call: None,
                    function_calls: None,
                },
                user_message("hi"),
            ],
            model: "gpt-3.5-turbo".to_string(),
            stream: None,
            functions: vec![],
        };

        let (messages, model) = translate_request(&request);
        assert_eq!(model, DEFAULT_MODEL);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].author.role, "critic");
        assert_eq!(messages[0].content.parts[0], "be brief");
        assert_eq!(messages[1].author.role, "user");
    }

    #[test]
    fn test_functions_prepend_preamble() {
        let request = ApiRequest {
            messages: vec![user_message("weather?")],
            model: "gpt-3.5-turbo".to_string(),
            stream: None,
            functions: vec![ApiFunction {
                name: "get_weather".to_string(),
                description: "Current weather".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        };

        let (messages, _) = translate_request(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].author.role, "critic");
        assert!(messages[0].content.parts[0].contains("get_weather"));
        assert!(messages[0].content.parts[0].contains("function_calls"));
    }

    #[test]
    fn test_assistant_function_calls_folded() {
        let request = ApiRequest {
            messages: vec![ApiMessage {
                role: "assistant".to_string(),
                name: None,
                content: None,
                function_call: Some(serde_json::json!({"function_name": "f", "arguments": "{}"})),
                function_calls: Some(vec![serde_json::json!({"function_name": "g", "arguments": "{}"})]),
            }],
            model: "x".to_string(),
            stream: None,
            functions: vec![],
        };

        let (messages, _) = translate_request(&request);
        let folded: Value = serde_json::from_str(&messages[0].content.parts[0]).unwrap();
        let calls = folded["function_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["function_name"], "f");
        assert_eq!(calls[1]["function_name"], "g");
    }

    #[test]
    fn test_function_result_becomes_critic() {
        let request = ApiRequest {
            messages: vec![ApiMessage {
                role: "function".to_string(),
                name: Some("get_weather".to_string()),
                content: Some("{\"temp\": 21}".to_string()),
                function_call: None,
                function_calls: None,
            }],
            model: "x".to_string(),
            stream: None,
            functions: vec![],
        };

        let (messages, _) = translate_request(&request);
        assert_eq!(messages[0].author.role, "critic");
        let body: Value = serde_json::from_str(&messages[0].content.parts[0]).unwrap();
        assert_eq!(body["role"], "function");
        assert_eq!(body["name"], "get_weather");
        assert_eq!(body["response"], "{\"temp\": 21}");
    }

    #[test]
    fn test_plain_text_preserved_verbatim() {
        let text = "line one\nline two, done.";
        let response = completion_from_text(text, "gpt-3.5-turbo", Some("stop"));
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content.as_deref(), Some(text));
        assert_eq!(response.choices[0].message.function_call, None);
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.object, "chat.completion");
        assert!(response.id.starts_with("chatcmpl-"));
    }

    #[test]
    fn test_max_tokens_maps_to_length() {
        let response = completion_from_text("partial", "m", Some("max_tokens"));
        assert_eq!(response.choices[0].finish_reason, "length");
    }

    #[test]
    fn test_envelope_populates_function_call() {
        let text = r#"{"content": null, "function_calls": [{"function_name": "get_weather", "arguments": "{\"location\": \"Shanghai\"}"}], "explanation": "Calling functions.", "finish_reason": "function_call"}"#;
        let response = completion_from_text(text, "m", Some("stop"));
        let choice = &response.choices[0];
        assert_eq!(choice.message.content, None);
        assert_eq!(choice.finish_reason, "function_call");
        let calls = choice.message.function_call.as_ref().unwrap();
        assert_eq!(calls[0]["function_name"], "get_weather");
    }

    #[test]
    fn test_broken_envelope_falls_back_to_text() {
        let text = "talks about function_calls and explanation but is not json";
        let response = completion_from_text(text, "m", None);
        assert_eq!(response.choices[0].message.content.as_deref(), Some(text));
        assert_eq!(response.choices[0].message.function_call, None);
    }

    #[test]
    fn test_roundtrip_preserves_assistant_text() {
        // completion request -> upstream messages -> (pretend stream) ->
        // completion response keeps the text byte-for-byte.
        let request = ApiRequest {
            messages: vec![user_message("echo this")],
            model: "gpt-3.5-turbo".to_string(),
            stream: None,
            functions: vec![],
        };
        let (messages, model) = translate_request(&request);
        assert_eq!(messages[0].content.parts[0], "echo this");

        let assistant_text = "here is the echo: echo this";
        let response = completion_from_text(assistant_text, &model, Some("stop"));
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some(assistant_text)
        );
    }
}
