use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{EndpointDefinition, ProtocolFamily, ProviderDefinition};

use super::{CompiledPrompt, EndpointError, ProviderAdapter};

/// Adapter for OpenAI-compatible chat-completion services (Groq, Mistral,
/// OpenRouter, local gateways). The provider's `base_url` selects the
/// actual upstream; validation guarantees it is present for this family.
pub struct OpenAiAdapter {
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::OpenAi
    }

    async fn invoke(
        &self,
        provider: &ProviderDefinition,
        endpoint: &EndpointDefinition,
        prompt: &CompiledPrompt,
        timeout: Duration,
    ) -> Result<String, EndpointError> {
        let api_key = endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| EndpointError::Unauthorized("endpoint has no api key".into()))?;
        let base = provider.base_url.as_deref().ok_or_else(|| {
            EndpointError::Unknown(format!("provider {} has no base_url", provider.name))
        })?;
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));

        debug!(model = %endpoint.model, url = %url, "Requesting chat completion");

        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: prompt.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.user.clone(),
        });

        let body = ChatRequest {
            model: endpoint.model.clone(),
            messages,
            max_tokens: endpoint.max_tokens,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EndpointError::from_status(status, message));
        }

        let api_response: ChatResponse = response.json().await?;
        api_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| EndpointError::MalformedResponse("no choices in response".into()))
    }
}
