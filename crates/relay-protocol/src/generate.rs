use serde::{Deserialize, Serialize};

/// Request to generate text for a prompt in a named mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The user's prompt.
    pub prompt: String,
    /// Agent mode selecting a system prompt and specialty preference.
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "general".to_string()
}

/// Response carrying generated text plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The generated text.
    pub text: String,
    /// Provider that served the request.
    pub provider: String,
    /// Endpoint within the provider.
    pub endpoint: String,
    /// Model identifier used.
    pub model: String,
    /// Time taken to serve the request (milliseconds).
    pub latency_ms: u64,
}

/// Parameters for persisting an endpoint credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCredentialParams {
    pub provider: String,
    pub endpoint: String,
    pub api_key: String,
}
