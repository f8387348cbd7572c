//! Upstream auth flow
//!
//! Exchanges an account's email and password for a fresh access token.
//! Only the lifecycle worker calls this, at most once per wake-up, which
//! is the gateway's sole defense against upstream anti-abuse.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// Client for the upstream login endpoint
#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Run the login exchange, returning the fresh access token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = format!("{}/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await
            .context("login request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("login rejected ({}): {}", status, body));
        }

        let body: LoginResponse = response.json().await.context("malformed login response")?;
        Ok(body.access_token)
    }
}
