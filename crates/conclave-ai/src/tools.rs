//! HTTP-backed `ToolsGateway` (spec §1, §4.6): the actual tools service is
//! an external HTTP collaborator out of scope for this platform, but the
//! worker loop still needs something to invoke. Grounded on
//! `conclave-ai::llm::http`'s minimal reqwest client shape, retargeted at a
//! single generic `POST {endpoint}` call instead of a provider-specific
//! request body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conclave_traits::{RegistryLookup, ToolGatewayError, ToolGatewayResult, ToolInvocation, ToolOutcome, ToolsGateway};
use serde_json::json;

/// Resolves a tool's `endpoint` through the registry, then POSTs
/// `{tool_id, arguments}` to it and expects back `{success, output}`.
pub struct HttpToolsGateway {
    http: reqwest::Client,
    registry: Arc<dyn RegistryLookup>,
    timeout: Duration,
}

impl HttpToolsGateway {
    pub fn new(registry: Arc<dyn RegistryLookup>) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ToolsGateway for HttpToolsGateway {
    async fn invoke(&self, invocation: ToolInvocation) -> ToolGatewayResult<ToolOutcome> {
        let tool = self
            .registry
            .get_tool(&invocation.tool_id)
            .await
            .ok_or_else(|| ToolGatewayError::UnknownTool(invocation.tool_id.as_str().to_string()))?;

        let started = Instant::now();
        let body = json!({"tool_id": invocation.tool_id.as_str(), "arguments": invocation.arguments});
        let response = self
            .http
            .post(&tool.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolGatewayError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    ToolGatewayError::GatewayError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolGatewayError::GatewayError(format!("{status}: {body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolGatewayError::GatewayError(e.to_string()))?;
        let success = json.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
        let output = json.get("output").cloned().unwrap_or(serde_json::Value::Null);

        Ok(ToolOutcome {
            tool_id: invocation.tool_id,
            success,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Stand-in used when no tools gateway URL is configured: every invocation
/// fails as unknown. Lets the server start without a gateway dependency for
/// workflows that never call `use_tools`.
pub struct NullToolsGateway;

#[async_trait]
impl ToolsGateway for NullToolsGateway {
    async fn invoke(&self, invocation: ToolInvocation) -> ToolGatewayResult<ToolOutcome> {
        Err(ToolGatewayError::UnknownTool(invocation.tool_id.as_str().to_string()))
    }
}
