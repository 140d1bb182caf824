use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{EndpointDefinition, ProtocolFamily, ProviderDefinition};

use super::{CompiledPrompt, EndpointError, ProviderAdapter};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini `generateContent` REST shape. The family has no
/// separate system role, so the compiled prompt is flattened into one part.
pub struct GeminiAdapter {
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Gemini
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
        let base = provider.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!(
            "{}/models/{}:generateContent",
            base.trim_end_matches('/'),
            endpoint.model
        );

        debug!(model = %endpoint.model, "Requesting generation from Gemini");

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.flattened(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: endpoint.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EndpointError::from_status(status, message));
        }

        let api_response: GenerateContentResponse = response.json().await?;
        api_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| EndpointError::MalformedResponse("no candidate text".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_camel_case_fields() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "hello".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: 256,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"generationConfig\""));
        assert!(json.contains("\"maxOutputTokens\":256"));
    }

    #[test]
    fn parse_generate_content_response() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "  routed reply  "}], "role": "model"}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text.trim(), "routed reply");
    }

    #[test]
    fn empty_candidates_parse_cleanly() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_empty());
    }
}
