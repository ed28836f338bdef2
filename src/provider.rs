//! Configuration Provider client
//!
//! The record-management side of the product (out of scope here) owns
//! agent configuration. At call start the session asks it, by destination
//! number, for the agent's instructions, voice and greeting. Any failure
//! falls back to a built-in default: a call is never dropped just because
//! the lookup failed.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider error: {message}")]
    Api { message: String },
}

/// Immutable per-call agent configuration, fetched once at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub instructions: String,
    pub voice_id: String,
    pub greeting: String,
}

impl AgentConfig {
    /// Built-in default used whenever the provider fails or has no entry
    /// for the dialed number.
    pub fn fallback() -> Self {
        Self {
            instructions: "You are a helpful phone assistant. Keep responses short and \
                           conversational; you are speaking on a live phone call."
                .to_string(),
            voice_id: "alloy".to_string(),
            greeting: "Hello! How can I help you today?".to_string(),
        }
    }
}

/// Source of per-call agent configuration.
#[async_trait]
pub trait AgentConfigProvider: Send + Sync {
    /// Look up configuration for a destination number. `Ok(None)` means no
    /// entry exists; the caller substitutes the fallback either way.
    async fn fetch(&self, callee_number: &str) -> Result<Option<AgentConfig>, ProviderError>;
}

/// HTTP-backed provider talking to the record-management service.
#[derive(Clone)]
pub struct HttpAgentProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAgentProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl AgentConfigProvider for HttpAgentProvider {
    async fn fetch(&self, callee_number: &str) -> Result<Option<AgentConfig>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/agents/by-number/{}", self.base_url, callee_number))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { message });
        }

        Ok(Some(response.json().await?))
    }
}

/// Fixed in-memory provider for tests and keyless development.
#[derive(Clone, Default)]
pub struct StaticProvider {
    entries: HashMap<String, AgentConfig>,
}

impl StaticProvider {
    pub fn new(entries: HashMap<String, AgentConfig>) -> Self {
        Self { entries }
    }

    /// A provider with no entries: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentConfigProvider for StaticProvider {
    async fn fetch(&self, callee_number: &str) -> Result<Option<AgentConfig>, ProviderError> {
        Ok(self.entries.get(callee_number).cloned())
    }
}
