//! Builds a retrying `LlmClient` for a given model profile (spec §3 "Model
//! profile", §4.6/§4.7 "call the LLM for this agent's model profile").
//! Grounded on `restflow-ai/src/llm/factory.rs`'s provider-tag dispatch.

use std::sync::Arc;

use conclave_models::{ModelProfile, Provider};
use conclave_traits::LlmClient;

use super::http::{AnthropicClient, OpenAiClient};
use super::retry::{LlmRetryConfig, RetryingLlmClient};

/// Resolves provider API keys. Concrete lookup (env vars, secret store) is
/// the caller's concern; the loops only ever see the `LlmClient` seam.
pub trait ApiKeyResolver: Send + Sync {
    fn resolve(&self, provider: Provider) -> Option<String>;
}

/// Resolves keys from `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` (spec §6
/// "Environment: ... LLM provider keys").
pub struct EnvApiKeyResolver;

impl ApiKeyResolver for EnvApiKeyResolver {
    fn resolve(&self, provider: Provider) -> Option<String> {
        let var = match provider {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Other => return None,
        };
        std::env::var(var).ok()
    }
}

pub fn build_client(
    profile: &ModelProfile,
    keys: &dyn ApiKeyResolver,
) -> Result<Arc<dyn LlmClient>, crate::error::AiError> {
    let api_key = keys.resolve(profile.provider).ok_or_else(|| {
        crate::error::AiError::InvalidFormat(format!(
            "no API key available for provider {:?}",
            profile.provider
        ))
    })?;

    let inner: Arc<dyn LlmClient> = match profile.provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(api_key, profile.model_name.clone())),
        Provider::OpenAi => Arc::new(OpenAiClient::new(api_key, profile.model_name.clone())),
        Provider::Other => {
            return Err(crate::error::AiError::InvalidFormat(
                "provider 'other' has no built-in HTTP client; supply one via dependency injection"
                    .into(),
            ));
        }
    };

    Ok(Arc::new(RetryingLlmClient::new(
        inner,
        LlmRetryConfig::from(profile.retry_policy),
    )))
}
