//! Arkose token fetch
//!
//! Premium (`gpt-4*`) requests must carry an arkose token. A helper
//! service mints them; when it answers with a captcha challenge instead
//! (HTTP 511) there is nobody here to solve it, so the fetch fails and
//! the caller posts without a token.

use serde_json::Value;
use tracing::debug;

use crate::error::BotError;

/// Client for the captcha-bypass helper
#[derive(Clone)]
pub struct ArkoseClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArkoseClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch a fresh arkose token.
    pub async fn fetch_token(&self) -> Result<String, BotError> {
        let url = format!("{}/start?download_images=true", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if status.is_success() {
            if let Some(token) = body["token"].as_str() {
                debug!("arkose token acquired");
                return Ok(token.to_string());
            }
            return Err(BotError::InvalidResponse);
        }

        // 511 means the helper wants a captcha solved interactively;
        // anything else is a plain failure. Both are non-fatal upstream.
        let message = body["error"]
            .as_str()
            .unwrap_or("captcha challenge unsolved")
            .to_string();
        Err(BotError::OpenAi {
            code: status.as_u16(),
            message,
        })
    }
}
