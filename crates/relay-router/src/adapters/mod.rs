//! Protocol-family adapters. Each variant turns one generation call into
//! that family's wire shape and normalizes every outcome to plain text or
//! the shared [`EndpointError`] taxonomy; nothing above this layer sees a
//! protocol-specific error.

mod gemini;
mod openai;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::{EndpointDefinition, ProtocolFamily, ProviderDefinition};

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("upstream error: {0}")]
    Unknown(String),
}

impl EndpointError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Unauthorized(_) => "unauthorized",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Unknown(_) => "unknown",
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Unauthorized(message),
            _ => Self::Unknown(format!("HTTP {status}: {message}")),
        }
    }
}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Transport(err.to_string())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

/// A mode's system prompt compiled with the user's prompt. Each adapter
/// family renders this in its own shape.
#[derive(Debug, Clone)]
pub struct CompiledPrompt {
    pub system: String,
    pub user: String,
}

impl CompiledPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Minimal synthetic prompt used by health probes.
    pub fn probe() -> Self {
        Self::new("", "Test connection")
    }

    /// Single-string rendering for families without a separate system role.
    pub fn flattened(&self) -> String {
        if self.system.is_empty() {
            self.user.clone()
        } else {
            format!("{}\n\nUser: {}", self.system, self.user)
        }
    }
}

/// One generation call against one endpoint.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The protocol family this adapter speaks.
    fn family(&self) -> ProtocolFamily;

    /// Execute a single generation call, enforcing `timeout` and
    /// normalizing the result.
    async fn invoke(
        &self,
        provider: &ProviderDefinition,
        endpoint: &EndpointDefinition,
        prompt: &CompiledPrompt,
        timeout: Duration,
    ) -> Result<String, EndpointError>;
}

/// Adapter instances keyed by protocol family, fixed at construction.
pub struct AdapterSet {
    adapters: Vec<Box<dyn ProviderAdapter>>,
}

impl AdapterSet {
    /// The standard set covering every supported protocol family.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(GeminiAdapter::new()),
            Box::new(OpenAiAdapter::new()),
        ])
    }

    pub fn new(adapters: Vec<Box<dyn ProviderAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, family: ProtocolFamily) -> Option<&dyn ProviderAdapter> {
        self.adapters
            .iter()
            .find(|a| a.family() == family)
            .map(|a| a.as_ref())
    }
}
