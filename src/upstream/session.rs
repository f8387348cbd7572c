//! Authenticated upstream session
//!
//! One `BotSession` per pooled account. It owns the HTTP client, speaks
//! the conversation event-stream protocol, and exposes the streaming
//! operations (`ask`, `post_messages`, `continue_write`) plus the
//! conversation-admin surface. The session never retries: every failure
//! propagates to the pool scheduler.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::jwt;
use crate::upstream::arkose::ArkoseClient;
use crate::upstream::stream::{parse_line, LineBuffer, ParsedLine};
use crate::upstream::wire::{ConversationPayload, TurnEvent, WireMessage};

/// Default budget for one upstream streaming call
pub const DEFAULT_TIMEOUT_SECS: u64 = 360;

const DESKTOP_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/113.0.0.0 Safari/537.36";

#[derive(Debug)]
struct Credentials {
    access_token: String,
    puid: Option<String>,
}

/// A live, authenticated upstream client bound to one account
pub struct BotSession {
    email: String,
    base_url: String,
    client: reqwest::Client,
    credentials: RwLock<Credentials>,
    /// Model slugs this account may use; empty until the first
    /// `models()` call populates it.
    supported_models: RwLock<Vec<String>>,
    arkose: Option<ArkoseClient>,
}

impl BotSession {
    /// Construct a session, refusing tokens that are malformed or
    /// already expired.
    pub fn new(
        email: &str,
        access_token: &str,
        puid: Option<String>,
        base_url: &str,
        arkose: Option<ArkoseClient>,
    ) -> Result<Self, BotError> {
        jwt::ensure_fresh(access_token)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .user_agent(DESKTOP_UA)
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            email: email.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials: RwLock::new(Credentials {
                access_token: access_token.to_string(),
                puid,
            }),
            supported_models: RwLock::new(Vec::new()),
            arkose,
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn access_token(&self) -> String {
        self.credentials.read().unwrap().access_token.clone()
    }

    /// Swap in refreshed credentials; unchanged values are left alone.
    pub fn update(&self, access_token: Option<&str>, puid: Option<&str>) {
        let mut credentials = self.credentials.write().unwrap();
        if let Some(token) = access_token {
            if !token.is_empty() && credentials.access_token != token {
                credentials.access_token = token.to_string();
            }
        }
        if let Some(puid) = puid {
            if !puid.is_empty() && credentials.puid.as_deref() != Some(puid) {
                credentials.puid = Some(puid.to_string());
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let credentials = self.credentials.read().unwrap();
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&credentials.access_token);
        if let Some(puid) = &credentials.puid {
            builder = builder.header("PUID", puid);
        }
        builder
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, BotError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BotError::OpenAi {
            code: status.as_u16(),
            message,
        })
    }

    /// Fetch and cache the model slugs this account supports, capturing
    /// the `_puid` affinity cookie when upstream sets one.
    pub async fn models(&self) -> Result<Vec<String>, BotError> {
        let response = self
            .request(Method::GET, "models?history_and_training_disabled=false")
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let puid = response
            .cookies()
            .find(|c| c.name() == "_puid")
            .map(|c| c.value().to_string());

        let body: Value = response.json().await?;
        let Some(models) = body["models"].as_array() else {
            return Err(BotError::InvalidResponse);
        };
        let slugs: Vec<String> = models
            .iter()
            .filter_map(|m| m["slug"].as_str().map(str::to_string))
            .collect();

        if let Some(puid) = puid {
            self.update(None, Some(&puid));
        }
        *self.supported_models.write().unwrap() = slugs.clone();
        Ok(slugs)
    }

    async fn ensure_models(&self) -> Result<(), BotError> {
        if self.supported_models.read().unwrap().is_empty() {
            self.models().await?;
        }
        Ok(())
    }

    fn is_supported(&self, model: &str) -> bool {
        self.supported_models
            .read()
            .unwrap()
            .iter()
            .any(|slug| slug == model)
    }

    /// Post a single user message.
    pub fn ask<'a>(
        &'a self,
        prompt: &str,
        conversation_id: Option<String>,
        parent_id: Option<String>,
        model: Option<String>,
        auto_continue: bool,
        history_and_training_disabled: bool,
        timeout_secs: u64,
    ) -> impl Stream<Item = Result<TurnEvent, BotError>> + 'a {
        let payload = ConversationPayload::next(
            vec![WireMessage::user(prompt)],
            conversation_id,
            parent_id,
            model,
            history_and_training_disabled,
        );
        self.send_request(payload, auto_continue, timeout_secs)
    }

    /// Post a pre-built list of messages.
    pub fn post_messages<'a>(
        &'a self,
        messages: Vec<WireMessage>,
        conversation_id: Option<String>,
        parent_id: Option<String>,
        model: Option<String>,
        auto_continue: bool,
        history_and_training_disabled: bool,
        timeout_secs: u64,
    ) -> impl Stream<Item = Result<TurnEvent, BotError>> + 'a {
        let payload = ConversationPayload::next(
            messages,
            conversation_id,
            parent_id,
            model,
            history_and_training_disabled,
        );
        self.send_request(payload, auto_continue, timeout_secs)
    }

    /// Ask upstream to keep generating after a `max_tokens` truncation.
    pub fn continue_write<'a>(
        &'a self,
        conversation_id: String,
        parent_id: String,
        model: String,
        auto_continue: bool,
        history_and_training_disabled: bool,
        timeout_secs: u64,
    ) -> impl Stream<Item = Result<TurnEvent, BotError>> + 'a {
        let payload = ConversationPayload::continuation(
            conversation_id,
            parent_id,
            model,
            history_and_training_disabled,
        );
        self.send_request(payload, auto_continue, timeout_secs)
    }

    /// Drive one or more conversation rounds, yielding partial assistant
    /// turns. When a round ends in `max_tokens` and `auto_continue` is
    /// set, a `continue` round follows and the text accumulated so far is
    /// prefixed onto every continued event, so the last drained event
    /// always carries the complete response.
    fn send_request(
        &self,
        payload: ConversationPayload,
        auto_continue: bool,
        timeout_secs: u64,
    ) -> impl Stream<Item = Result<TurnEvent, BotError>> + '_ {
        try_stream! {
            self.ensure_models().await?;
            if !self.is_supported(&payload.model) {
                Err(BotError::UnsupportedModel(payload.model.clone()))?;
            }

            let mut payload = payload;
            let mut prefix = String::new();
            loop {
                if payload.model.starts_with("gpt-4") {
                    if let Some(arkose) = &self.arkose {
                        match arkose.fetch_token().await {
                            Ok(token) => payload.arkose_token = Some(token),
                            Err(err) => {
                                error!(email = %self.email, error = %err, "arkose token fetch failed")
                            }
                        }
                    }
                }

                let started = Instant::now();
                let response = self
                    .request(Method::POST, "conversation")
                    .timeout(Duration::from_secs(timeout_secs))
                    .json(&payload)
                    .send()
                    .await?;
                let response = Self::check_response(response).await?;
                info!(
                    email = %self.email,
                    conversation_id = payload.conversation_id.as_deref().unwrap_or(""),
                    action = %payload.action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "conversation round started"
                );

                let mut last: Option<TurnEvent> = None;
                let mut buffer = LineBuffer::new();
                let mut body = response.bytes_stream();
                'round: while let Some(chunk) = body.next().await {
                    let chunk = chunk?;
                    for line in buffer.feed(&chunk) {
                        match parse_line(&line)? {
                            ParsedLine::Skip => continue,
                            ParsedLine::Done => break 'round,
                            ParsedLine::Event(mut event) => {
                                if !prefix.is_empty() {
                                    event.message = format!("{}{}", prefix, event.message);
                                }
                                last = Some(event.clone());
                                yield event;
                            }
                        }
                    }
                }
                if !buffer.remaining().is_empty() {
                    warn!(email = %self.email, "stream ended mid-line");
                }

                let Some(done) = last else { break };
                if !(auto_continue && done.finish_details.as_deref() == Some("max_tokens")) {
                    break;
                }

                prefix = done.message.trim_end_matches('\n').to_string();
                let model = done.model.clone().unwrap_or_else(|| payload.model.clone());
                payload = ConversationPayload::continuation(
                    done.conversation_id,
                    done.parent_id,
                    model,
                    payload.history_and_training_disabled,
                );
            }
        }
    }

    // --- conversation-admin surface (not on the hot path) ---

    /// List conversations owned by this account.
    pub async fn get_conversations(&self, offset: u32, limit: u32) -> Result<Value, BotError> {
        let path = format!("conversations?offset={offset}&limit={limit}");
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check_response(response).await?;
        let body: Value = response.json().await?;
        Ok(body["items"].clone())
    }

    /// Fetch the message history of one conversation.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Value, BotError> {
        let path = format!("conversation/{conversation_id}");
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    /// Create a public share link for a conversation node.
    pub async fn share_conversation(
        &self,
        conversation_id: &str,
        node_id: &str,
        title: Option<&str>,
    ) -> Result<String, BotError> {
        let response = self
            .request(Method::POST, "share/create")
            .json(&json!({
                "conversation_id": conversation_id,
                "current_node_id": node_id,
                "is_anonymous": true,
            }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let created: Value = response.json().await?;

        let Some(share_url) = created["share_url"].as_str().map(str::to_string) else {
            return Err(BotError::InvalidResponse);
        };
        let share_id = created["share_id"].as_str().unwrap_or_default();
        let title = title
            .map(str::to_string)
            .or_else(|| created["title"].as_str().map(str::to_string))
            .unwrap_or_else(|| "New chat".to_string());

        let response = self
            .request(Method::PATCH, &format!("share/{share_id}"))
            .json(&json!({
                "share_id": share_id,
                "highlighted_message_id": node_id,
                "title": title,
                "is_public": true,
                "is_visible": true,
                "is_anonymous": true,
            }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(share_url)
    }

    /// Ask upstream to title a conversation.
    pub async fn gen_title(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<String, BotError> {
        let response = self
            .request(
                Method::POST,
                &format!("conversation/gen_title/{conversation_id}"),
            )
            .json(&json!({
                "message_id": message_id,
                "model": "text-davinci-002-render",
            }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let body: Value = response.json().await?;
        Ok(body["title"].as_str().unwrap_or_default().to_string())
    }

    /// Rename a conversation.
    pub async fn change_title(&self, conversation_id: &str, title: &str) -> Result<(), BotError> {
        let response = self
            .request(Method::PATCH, &format!("conversation/{conversation_id}"))
            .json(&json!({ "title": title }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Hide a conversation; upstream models deletion as a visibility flip.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), BotError> {
        let response = self
            .request(Method::PATCH, &format!("conversation/{conversation_id}"))
            .json(&json!({ "is_visible": false }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Hide every conversation on the account.
    pub async fn clear_conversations(&self) -> Result<(), BotError> {
        let response = self
            .request(Method::PATCH, "conversations")
            .json(&json!({ "is_visible": false }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// List installable plugins.
    pub async fn get_plugins(
        &self,
        offset: u32,
        limit: u32,
        status: &str,
    ) -> Result<Value, BotError> {
        let path = format!("aip/p?offset={offset}&limit={limit}&statuses={status}");
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    /// Install a plugin by id.
    pub async fn install_plugin(&self, plugin_id: &str) -> Result<(), BotError> {
        let response = self
            .request(Method::PATCH, &format!("aip/p/{plugin_id}/user-settings"))
            .json(&json!({ "is_installed": true }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Look up an unverified plugin by domain, optionally installing it.
    pub async fn get_unverified_plugin(
        &self,
        domain: &str,
        install: bool,
    ) -> Result<Value, BotError> {
        let path = format!("aip/p/domain?domain={domain}");
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check_response(response).await?;
        let body: Value = response.json().await?;
        if install {
            if let Some(id) = body["id"].as_str() {
                self.install_plugin(id).await?;
            }
        }
        Ok(body)
    }
}
