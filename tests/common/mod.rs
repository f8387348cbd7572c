//! Shared test fixtures for the integration suites

#![allow(dead_code)]

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard::error::BotError;
use switchboard::upstream::{BotSession, TurnEvent};

/// Edge bearer token used across edge tests
pub const TEST_AUTH_TOKEN: &str = "test-edge-token";

/// An unsigned JWT with a future `exp`, shaped like the upstream access
/// tokens the gateway never signature-checks.
pub fn fresh_token() -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(
        r#"{{"exp":{}}}"#,
        Utc::now().timestamp() + 7200
    ));
    format!("{header}.{claims}.sig")
}

/// A session pointed at a mock upstream.
pub fn session(email: &str, base_url: &str) -> Arc<BotSession> {
    Arc::new(BotSession::new(email, &fresh_token(), None, base_url, None).unwrap())
}

/// Mount the `GET /models` mock every streaming call triggers on first
/// use.
pub async fn mock_models(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"slug": "text-davinci-002-render-sha"},
                {"slug": "gpt-4"},
            ]
        })))
        .mount(server)
        .await;
}

/// One assistant event line of the upstream stream.
pub fn event_line(
    conversation_id: &str,
    message_id: &str,
    text: &str,
    finish: Option<&str>,
) -> String {
    let finish = match finish {
        Some(kind) => json!({ "type": kind }),
        None => json!({ "type": null }),
    };
    format!(
        "data: {}\n\n",
        json!({
            "conversation_id": conversation_id,
            "message": {
                "id": message_id,
                "author": {"role": "assistant"},
                "content": {"content_type": "text", "parts": [text]},
                "end_turn": true,
                "recipient": "all",
                "metadata": {
                    "model_slug": "text-davinci-002-render-sha",
                    "finish_details": finish,
                }
            }
        })
    )
}

/// A stream body for a `text/event-stream` response.
pub fn stream_body(lines: &[String]) -> ResponseTemplate {
    let mut body = lines.concat();
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// Drain a session stream into a vector, propagating the first error.
pub async fn drain(
    stream: impl Stream<Item = Result<TurnEvent, BotError>>,
) -> Result<Vec<TurnEvent>, BotError> {
    futures::pin_mut!(stream);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}
