//! Configuration management for Switchboard
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Bearer token expected from edge clients
    pub auth_token: String,
    /// Base64 key for at-rest credential sealing (32 bytes)
    pub account_key: String,

    /// Redis connection URI (shared rate-limit store)
    pub redis_uri: String,
    /// MySQL connection URI (accounts, users, conversations)
    pub mysql_uri: String,

    /// Base URL of the upstream conversation API
    pub chatgpt_base_url: String,
    /// Base URL of the upstream auth flow used for token refresh
    pub chatgpt_auth_url: String,
    /// Captcha-bypass helper for arkose tokens (premium models)
    pub captcha_url: String,

    /// Allowed Host headers; empty disables the check
    pub allowed_hosts: Vec<String>,

    /// Wall-clock budget (seconds) for waiting on an available session
    pub work_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("host").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("port")
                .unwrap_or_else(|_| "9000".to_string())
                .parse()
                .context("Invalid port")?,

            auth_token: env::var("auth_token").context("auth_token must be set")?,
            account_key: env::var("account_key").context("account_key must be set")?,

            redis_uri: env::var("redis_uri")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            mysql_uri: env::var("mysql_uri").context("mysql_uri must be set")?,

            chatgpt_base_url: env::var("CHATGPT_BASE_URL")
                .unwrap_or_else(|_| "https://bypass.churchless.tech/".to_string()),
            chatgpt_auth_url: env::var("CHATGPT_AUTH_URL")
                .unwrap_or_else(|_| "https://auth0.openai.com/".to_string()),
            captcha_url: env::var("CAPTCHA_URL")
                .unwrap_or_else(|_| "https://bypass.churchless.tech/captcha/".to_string()),

            allowed_hosts: env::var("allowed_hosts")
                .map(|v| {
                    v.split(',')
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            work_timeout_secs: env::var("work_timeout")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid work_timeout")?,
        })
    }
}
