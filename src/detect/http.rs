//! Hosted detector over HTTP.
//!
//! The image is sent as a base64 string in the request body with
//! `application/x-www-form-urlencoded`, and the API key rides in the query
//! string. Non-2xx responses and transport failures are surfaced as
//! `ProviderError`; nothing is retried.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde_json::Value;
use url::Url;

use super::provider::DetectionProvider;
use crate::error::ProviderError;

const MAX_ERROR_BODY: usize = 512;

/// Configuration for the HTTP provider.
#[derive(Clone, Debug)]
pub struct HttpProviderConfig {
    /// Model endpoint, e.g. `https://detect.example.com/empty-shelf/3`.
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct HttpProvider {
    config: HttpProviderConfig,
    agent: ureq::Agent,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse provider url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported provider scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl DetectionProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&mut self, image: &[u8]) -> Result<Value, ProviderError> {
        let body = base64::engine::general_purpose::STANDARD.encode(image);
        let mut request = self
            .agent
            .post(&self.config.url)
            .set("Content-Type", "application/x-www-form-urlencoded");
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.query("api_key", key);
        }

        let response = match request.send_string(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body: String = response
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY)
                    .collect();
                return Err(ProviderError::Status { status, body });
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(ProviderError::Transport(err.to_string()))
            }
        };

        let text = response
            .into_string()
            .map_err(|e| ProviderError::Transport(format!("read response body: {}", e)))?;
        serde_json::from_str(&text).map_err(|e| ProviderError::MalformedPayload(e.to_string()))
    }
}
