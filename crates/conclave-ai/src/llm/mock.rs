//! Deterministic scripted LLM client for tests (spec §8 "using a `MockLlm`
//! that plays back scripted JSON reasoning/action payloads"). Grounded on
//! `restflow-ai/src/llm/mock_client.rs`'s `MockLlmClient`.

use std::collections::VecDeque;

use async_trait::async_trait;
use conclave_traits::{CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmResult};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum MockStep {
    /// Respond with this raw text (the worker/orchestrator loop will try
    /// to parse JSON out of it).
    Text(String),
    Error(LlmErrorKind),
}

#[derive(Debug, Clone)]
pub enum LlmErrorKind {
    Transient,
    Hard,
}

/// Replays a fixed script of responses, one per `complete()` call; past the
/// end of the script it repeats the last step.
pub struct MockLlmClient {
    model: String,
    script: Mutex<VecDeque<MockStep>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(steps.into_iter().collect()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut script = self.script.lock().await;
        let step = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(MockStep::Text("{}".into()))
        };
        match step {
            MockStep::Text(content) => Ok(CompletionResponse {
                content,
                usage: None,
            }),
            MockStep::Error(LlmErrorKind::Transient) => {
                Err(LlmError::Transient("mock transient failure".into()))
            }
            MockStep::Error(LlmErrorKind::Hard) => {
                Err(LlmError::InvalidRequest("mock hard failure".into()))
            }
        }
    }
}
