use relay_protocol::*;
use relay_router::{CompletionRouter, ConfigError, GenerateError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Handles incoming JSON-RPC requests by delegating to the router.
pub struct RequestHandler {
    router: Arc<CompletionRouter>,
}

impl RequestHandler {
    pub fn new(router: Arc<CompletionRouter>) -> Self {
        Self { router }
    }

    /// Process a JSON-RPC request and return a response.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, "Handling request");

        match request.method.as_str() {
            methods::GENERATE => self.handle_generate(request).await,
            methods::STATUS => self.handle_status(request),
            methods::MODES => self.handle_modes(request),
            methods::RELOAD => self.handle_reload(request),
            methods::SET_CREDENTIAL => self.handle_set_credential(request),
            methods::SHUTDOWN => self.handle_shutdown(request),
            _ => JsonRpcResponse::error(
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
                request.id,
            ),
        }
    }

    async fn handle_generate(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: GenerateRequest = match request.params {
            Some(params) => match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(
                        INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                        request.id,
                    )
                }
            },
            None => return JsonRpcResponse::error(INVALID_PARAMS, "Missing params", request.id),
        };

        match self.router.generate(&params.prompt, &params.mode).await {
            Ok(response) => {
                JsonRpcResponse::success(serde_json::to_value(&response).unwrap(), request.id)
            }
            Err(err @ GenerateError::NoAvailableEndpoint) => {
                JsonRpcResponse::error(NO_AVAILABLE_ENDPOINT, err.to_string(), request.id)
            }
            Err(err @ GenerateError::ExhaustedRetries { .. }) => {
                JsonRpcResponse::error(EXHAUSTED_RETRIES, err.to_string(), request.id)
            }
        }
    }

    fn handle_status(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let report = self.router.status();
        JsonRpcResponse::success(serde_json::to_value(&report).unwrap(), request.id)
    }

    fn handle_modes(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let modes = self.router.modes();
        JsonRpcResponse::success(serde_json::to_value(&modes).unwrap(), request.id)
    }

    fn handle_reload(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match self.router.reload() {
            Ok(()) => {
                JsonRpcResponse::success(Value::String("configuration reloaded".into()), request.id)
            }
            Err(e) => JsonRpcResponse::error(CONFIG_ERROR, e.to_string(), request.id),
        }
    }

    fn handle_set_credential(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: SetCredentialParams = match request.params {
            Some(params) => match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(
                        INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                        request.id,
                    )
                }
            },
            None => return JsonRpcResponse::error(INVALID_PARAMS, "Missing params", request.id),
        };

        match self
            .router
            .set_credential(&params.provider, &params.endpoint, &params.api_key)
        {
            Ok(()) => {
                JsonRpcResponse::success(Value::String("credential updated".into()), request.id)
            }
            Err(e @ ConfigError::NotFound(_)) => {
                JsonRpcResponse::error(NOT_FOUND, e.to_string(), request.id)
            }
            Err(e) => JsonRpcResponse::error(CONFIG_ERROR, e.to_string(), request.id),
        }
    }

    fn handle_shutdown(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        info!("Shutdown requested");
        JsonRpcResponse::success(Value::String("shutting down".to_string()), request.id)
    }
}
